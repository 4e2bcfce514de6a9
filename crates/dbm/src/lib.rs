//! The dbm crate.
//!
//! A small layer over sqlite with 3 primary entities:
//!
//! - The [Database], which lazily opens one connection and runs every statement in its own transaction.
//! - The [QueryBuilder], which accumulates the clauses of one statement against one table and renders them through a
//!   statement template.
//! - Rows and models: [Row] is the payload written by inserts and updates and the shape of everything read back, and a
//!   [TableModel] maps a plain struct onto a table's columns.
//!
//! Failures never get lost: the database reports each one to an [ErrorSink] before handing it back to the caller,
//! who decides what to show and whether to stop.  [ErrorOutput] renders failures as html, json or plain text.
mod config;
mod database;
mod errors;
mod model;
mod query;
mod row;
mod sink;
mod template;

pub use config::*;
pub use database::*;
pub use errors::*;
pub use model::*;
pub use query::*;
pub use row::*;
pub use sink::*;

pub use rusqlite;
