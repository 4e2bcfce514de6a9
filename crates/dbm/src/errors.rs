use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Opening the database or applying the session options failed.
    #[error("Connection error ({code}): {message}")]
    Connection { code: i32, message: String },

    /// A statement failed inside its transaction, which was rolled back.
    #[error("Execution error ({code}): {message}")]
    Execution { code: i32, message: String },

    #[error("Cannot execute an empty statement")]
    EmptyStatement,

    #[error("Template error: {}", _0)]
    Template(#[from] tera::Error),

    #[error("Row mapping error: {}", _0)]
    Mapping(String),

    /// The payload given to `insert`, `replace` or `update` could not be turned into a row.
    #[error("{table}: unusable payload")]
    Payload {
        table: String,
        #[source]
        source: Arc<Error>,
    },

    #[error("Json error: {}", _0)]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {}", _0)]
    Config(String),
}

impl Error {
    /// The driver's error code, for errors which came from the database.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Connection { code, .. } | Error::Execution { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
