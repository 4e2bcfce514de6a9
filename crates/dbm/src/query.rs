//! The query builder.
//!
//! A [QueryBuilder] is bound to one table.  One statement-shape method (`select`, `insert`, `replace`, `update`,
//! `delete`) picks the template; clause methods accumulate fragments; [QueryBuilder::send] renders everything into one
//! statement and runs it.  None of the chained methods can fail: empty arguments are no-ops, and problems with a
//! payload are held until the statement is rendered.
//!
//! Table names, field lists, conditions, join conditions and orderings are SQL text and are used verbatim.  Only
//! payload values are bound as parameters.
use std::sync::Arc;

use itertools::Itertools;
use log::*;

use crate::database::{Database, Execution, StatementResult};
use crate::errors::*;
use crate::model::RowSource;
use crate::row::{Row, Value};
use crate::template::*;

/// One entry of a clause argument: a value with an optional key.
///
/// What the key means depends on the clause.  For `where_` it is the connector placed after the condition (no key
/// means `AND`); for `order` the key is the column and the value the direction; for joins the key is the table and the
/// value the join condition.  Orderings and joins without a key are dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Term {
    key: Option<String>,
    value: String,
}

impl Term {
    pub fn positional(value: impl Into<String>) -> Term {
        Term {
            key: None,
            value: value.into(),
        }
    }

    pub fn keyed(key: impl Into<String>, value: impl Into<String>) -> Term {
        Term {
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

impl From<&str> for Term {
    fn from(v: &str) -> Term {
        Term::positional(v)
    }
}

impl From<String> for Term {
    fn from(v: String) -> Term {
        Term::positional(v)
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for Term {
    fn from((k, v): (K, V)) -> Term {
        Term::keyed(k, v)
    }
}

/// Things which may be a row count for `LIMIT`/`OFFSET`.
///
/// Anything that isn't a non-negative whole number gives `None` and is ignored by the builder.
pub trait Count {
    fn as_count(&self) -> Option<u64>;
}

macro_rules! unsigned_count {
    ($($t:ty),*) => {
        $(impl Count for $t {
            fn as_count(&self) -> Option<u64> {
                Some(*self as u64)
            }
        })*
    };
}

macro_rules! signed_count {
    ($($t:ty),*) => {
        $(impl Count for $t {
            fn as_count(&self) -> Option<u64> {
                u64::try_from(*self).ok()
            }
        })*
    };
}

unsigned_count!(u8, u16, u32, u64, usize);
signed_count!(i8, i16, i32, i64, isize);

impl Count for str {
    fn as_count(&self) -> Option<u64> {
        self.trim().parse().ok()
    }
}

impl Count for &str {
    fn as_count(&self) -> Option<u64> {
        (**self).as_count()
    }
}

impl Count for String {
    fn as_count(&self) -> Option<u64> {
        self.as_str().as_count()
    }
}

impl<T: Count> Count for Option<T> {
    fn as_count(&self) -> Option<u64> {
        self.as_ref().and_then(Count::as_count)
    }
}

/// A rendered statement, ready for [Database::execute].
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub execution: Execution,
}

/// What the chosen statement shape contributes beyond the shared clauses.
#[derive(Debug, Default)]
struct Payload {
    columns: String,
    values: String,
    assignments: String,
    ignore: &'static str,
    params: Vec<Value>,
}

#[derive(Debug)]
pub struct QueryBuilder {
    table: String,
    template: Option<&'static str>,
    fields: String,
    payload: Payload,
    /// Set by the writing shapes, which always run prepared.
    forced_prepared: bool,
    /// A payload which couldn't be converted; reported when the statement is rendered.
    deferred_error: Option<Arc<Error>>,
    wheres: Vec<String>,
    orders: Vec<String>,
    groups: Vec<String>,
    inner_joins: Vec<String>,
    left_joins: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

fn quote_column(column: &str) -> String {
    format!("`{}`", column)
}

/// Put `keyword` in front of `parts` joined by `sep`, or produce nothing at all if there are no parts.
fn keyword_clause(keyword: &str, parts: &[String], sep: &str) -> String {
    if parts.is_empty() {
        return String::new();
    }
    format!("{} {}", keyword, parts.iter().join(sep))
}

impl QueryBuilder {
    /// A builder for `table`.  The name is used as-is, so it must never come from user input.
    pub fn new(table: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            table: table.into(),
            template: None,
            fields: "*".into(),
            payload: Default::default(),
            forced_prepared: false,
            deferred_error: None,
            wheres: vec![],
            orders: vec![],
            groups: vec![],
            inner_joins: vec![],
            left_joins: vec![],
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Pick a statement shape.  The last shape chosen wins, and takes the previous shape's payload with it.
    fn set_shape(&mut self, template: &'static str, payload: Payload, forced_prepared: bool) {
        if let Some(previous) = self.template {
            if previous != template {
                debug!("{}: replacing statement shape", self.table);
            }
        }
        self.template = Some(template);
        self.payload = payload;
        self.forced_prepared = forced_prepared;
        self.deferred_error = None;
    }

    /// Convert a payload, or remember why we couldn't.
    fn take_payload(&mut self, source: &impl RowSource, unquoted: &[&str]) -> Option<(Row, Vec<String>)> {
        match source.to_payload() {
            Ok(row) => {
                let unquoted = unquoted
                    .iter()
                    .chain(source.unquoted_columns().iter())
                    .map(|x| x.to_string())
                    .collect();
                Some((row, unquoted))
            }
            Err(e) => {
                self.deferred_error = Some(Arc::new(e));
                None
            }
        }
    }

    pub fn select(mut self, fields: impl Into<String>) -> Self {
        self.set_shape(SELECT_TEMPLATE, Default::default(), false);
        self.fields = fields.into();
        self
    }

    /// Build the column and value lists shared by insert and replace.  Null and empty values are left out entirely.
    fn insert_payload(row: &Row, unquoted: &[String], ignore: bool) -> Payload {
        let mut columns = vec![];
        let mut values = vec![];
        let mut params = vec![];

        for (column, value) in row.iter().filter(|(_, v)| !v.is_blank()) {
            columns.push(quote_column(column));
            if unquoted.iter().any(|x| x == column) {
                values.push(value.to_raw_sql());
            } else {
                values.push("?".to_string());
                params.push(value.clone());
            }
        }

        Payload {
            columns: columns.join(", "),
            values: values.join(", "),
            assignments: String::new(),
            ignore: if ignore { " OR IGNORE " } else { " " },
            params,
        }
    }

    pub fn insert(mut self, row: &impl RowSource, unquoted: &[&str], ignore: bool) -> Self {
        if let Some((row, unquoted)) = self.take_payload(row, unquoted) {
            let payload = Self::insert_payload(&row, &unquoted, ignore);
            self.set_shape(INSERT_TEMPLATE, payload, true);
        }
        self
    }

    /// `ignore` is accepted for symmetry with `insert` and has no effect: sqlite has no `REPLACE OR IGNORE`.
    pub fn replace(mut self, row: &impl RowSource, unquoted: &[&str], ignore: bool) -> Self {
        if ignore {
            debug!("{}: ignore has no effect on replace", self.table);
        }
        if let Some((row, unquoted)) = self.take_payload(row, unquoted) {
            let payload = Self::insert_payload(&row, &unquoted, false);
            self.set_shape(REPLACE_TEMPLATE, payload, true);
        }
        self
    }

    /// Only null values are left out of an update; empty strings are written.
    pub fn update(mut self, row: &impl RowSource, unquoted: &[&str], ignore: bool) -> Self {
        if let Some((row, unquoted)) = self.take_payload(row, unquoted) {
            let mut assignments = vec![];
            let mut params = vec![];

            for (column, value) in row.iter().filter(|(_, v)| !v.is_null()) {
                if unquoted.iter().any(|x| x == column) {
                    assignments.push(format!("{}={}", quote_column(column), value.to_raw_sql()));
                } else {
                    assignments.push(format!("{}=?", quote_column(column)));
                    params.push(value.clone());
                }
            }

            let payload = Payload {
                assignments: assignments.join(", "),
                ignore: if ignore { " OR IGNORE" } else { "" },
                params,
                ..Default::default()
            };
            self.set_shape(UPDATE_TEMPLATE, payload, true);
        }
        self
    }

    pub fn delete(mut self) -> Self {
        self.set_shape(DELETE_TEMPLATE, Default::default(), true);
        self
    }

    /// Add conditions.
    ///
    /// Each condition is followed by its connector except the last one given.  If conditions were already present,
    /// the previously last one is joined to the new ones with `AND`.
    pub fn where_<T: Into<Term>>(mut self, conditions: impl IntoIterator<Item = T>) -> Self {
        let terms = conditions.into_iter().map(Into::into).collect::<Vec<Term>>();
        let Some(last_index) = terms.len().checked_sub(1) else {
            return self;
        };

        if let Some(previous) = self.wheres.last_mut() {
            previous.push_str(" AND");
        }

        for (i, term) in terms.into_iter().enumerate() {
            if i == last_index {
                self.wheres.push(term.value);
            } else {
                let connector = term.key.as_deref().unwrap_or("AND");
                self.wheres.push(format!("{} {}", term.value, connector));
            }
        }

        self
    }

    /// Add orderings as `(column, direction)` pairs.
    pub fn order<T: Into<Term>>(mut self, orderings: impl IntoIterator<Item = T>) -> Self {
        for term in orderings.into_iter().map(Into::into) {
            match term.key {
                Some(column) => self.orders.push(format!("{} {}", column, term.value)),
                None => debug!("{}: dropping ordering without a direction: {}", self.table, term.value),
            }
        }
        self
    }

    pub fn group<T: Into<String>>(mut self, columns: impl IntoIterator<Item = T>) -> Self {
        self.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    fn push_joins(table: &str, joins: &mut Vec<String>, terms: impl Iterator<Item = Term>) {
        for term in terms {
            match term.key {
                Some(joined) => joins.push(format!("{} ON {}", joined, term.value)),
                None => debug!("{}: dropping join without a table: {}", table, term.value),
            }
        }
    }

    /// Add inner joins as `(table, condition)` pairs.
    pub fn inner_join<T: Into<Term>>(mut self, joins: impl IntoIterator<Item = T>) -> Self {
        Self::push_joins(&self.table, &mut self.inner_joins, joins.into_iter().map(Into::into));
        self
    }

    /// Add left joins as `(table, condition)` pairs.
    pub fn left_join<T: Into<Term>>(mut self, joins: impl IntoIterator<Item = T>) -> Self {
        Self::push_joins(&self.table, &mut self.left_joins, joins.into_iter().map(Into::into));
        self
    }

    /// Set the limit.  Values which aren't a non-negative whole number are ignored.
    pub fn set_limit(mut self, limit: impl Count) -> Self {
        if let Some(n) = limit.as_count() {
            self.limit = Some(n);
        }
        self
    }

    /// Set the offset.  Values which aren't a non-negative whole number are ignored.
    pub fn set_offset(mut self, offset: impl Count) -> Self {
        if let Some(n) = offset.as_count() {
            self.offset = Some(n);
        }
        self
    }

    /// Render the statement without running it.
    ///
    /// Returns `None` if no statement shape was chosen.  `use_parameters` picks prepared execution for selects; every
    /// other shape is always prepared.
    pub fn render(&self, use_parameters: bool) -> Result<Option<Statement>> {
        if let Some(e) = &self.deferred_error {
            return Err(Error::Payload {
                table: self.table.clone(),
                source: e.clone(),
            });
        }
        let Some(template) = self.template else {
            return Ok(None);
        };

        let where_clause = keyword_clause("WHERE", &self.wheres, " ");
        let group = keyword_clause("GROUP BY", &self.groups, ", ");
        let order = keyword_clause("ORDER BY", &self.orders, ", ");
        let inner_join = self
            .inner_joins
            .iter()
            .map(|j| format!("INNER JOIN {}", j))
            .join(" ");
        let left_join = self
            .left_joins
            .iter()
            .map(|j| format!("LEFT JOIN {}", j))
            .join(" ");
        let limit = self.limit.map(|n| format!("LIMIT {}", n)).unwrap_or_default();
        let offset = self.offset.map(|n| format!("OFFSET {}", n)).unwrap_or_default();

        let sql = render(
            template,
            [
                ("fields", self.fields.as_str()),
                ("table", self.table.as_str()),
                ("where", where_clause.as_str()),
                ("inner_join", inner_join.as_str()),
                ("left_join", left_join.as_str()),
                ("group", group.as_str()),
                ("order", order.as_str()),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
                ("columns", self.payload.columns.as_str()),
                ("values", self.payload.values.as_str()),
                ("assignments", self.payload.assignments.as_str()),
                ("ignore", self.payload.ignore),
            ],
        )?;

        let execution = if self.forced_prepared {
            Execution::Prepared
        } else {
            Execution::from_flag(use_parameters)
        };

        Ok(Some(Statement {
            sql,
            params: self.payload.params.clone(),
            execution,
        }))
    }

    /// Render the statement and run it on `db`.
    ///
    /// A builder with no statement shape sends nothing and gives back the empty result.
    pub fn send(self, db: &mut Database, use_parameters: bool) -> Result<StatementResult> {
        match self.render(use_parameters)? {
            Some(statement) => db.execute(&statement.sql, &statement.params, statement.execution),
            None => Ok(Default::default()),
        }
    }
}
