//! The database wraps a single, lazily opened rusqlite connection and runs each statement in its own transaction.
use lazy_static::lazy_static;
use log::*;
use regex::Regex;

use crate::config::DbConfig;
use crate::errors::*;
use crate::model::TableModel;
use crate::row::{Row, Value};
use crate::sink::{ErrorSink, LogSink};

/// What protected mode replaces every database error message with.
pub const PROTECTED_MESSAGE: &str = "You do not have permission to do this";

/// How a statement reaches sqlite.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Execution {
    /// Prepare uncached and run once.
    Direct,

    /// Prepare through the connection's statement cache, bind parameters, and record the last insert id.
    Prepared,
}

impl Execution {
    pub fn from_flag(use_parameters: bool) -> Execution {
        if use_parameters {
            Execution::Prepared
        } else {
            Execution::Direct
        }
    }
}

/// The outcome of a statement.
///
/// The default value is the empty result, which is also what sending a builder without a statement produces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: usize,
    pub last_insert_id: Option<i64>,
}

impl StatementResult {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty() && self.rows_affected == 0
    }

    /// Map every row onto a [TableModel].
    pub fn fetch_models<T: TableModel>(&self) -> Result<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Deserialize every row into a plain struct whose fields are named after the columns.
    pub fn fetch_as<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|r| serde_json::from_value(serde_json::Value::Object(r.to_json_object())).map_err(Error::from))
            .collect()
    }
}

lazy_static! {
    static ref ESCAPED_QUOTE: Regex = Regex::new(r"\\+'").unwrap();
}

/// Trim the statement, and collapse any run of backslashes in front of a single quote into one escaped quote.
///
/// Statements which were put together by hand elsewhere have a habit of double-escaping quotes.  Values we bind are
/// never touched by this.
pub fn sanitize(sql: &str) -> String {
    ESCAPED_QUOTE.replace_all(sql.trim(), r"\'").into_owned()
}

/// Build the code and message for a rusqlite error.  Codes are sqlite extended result codes, or 0 for errors which
/// didn't come from sqlite itself.
fn describe(e: &rusqlite::Error) -> (i32, String) {
    let code = match e {
        rusqlite::Error::SqliteFailure(err, _) => err.extended_code,
        _ => 0,
    };
    (code, e.to_string())
}

fn open_connection(config: &DbConfig) -> rusqlite::Result<rusqlite::Connection> {
    info!("Opening database at {}", config.database());
    let conn = rusqlite::Connection::open(config.database())?;
    Ok(conn)
}

/// Apply the per-connection settings: busy timeout, foreign keys, and encoding.
fn apply_session(conn: &rusqlite::Connection, config: &DbConfig) -> Result<()> {
    let session = crate::template::render(
        crate::template::SESSION_TEMPLATE,
        [("encoding", config.charset().pragma_name())],
    )?;

    let configure = || -> rusqlite::Result<()> {
        conn.busy_timeout(config.timeout())?;
        conn.execute_batch(&session)
    };
    configure().map_err(|e| {
        let (code, message) = describe(&e);
        Error::Connection { code, message }
    })
}

/// Run one statement inside its own transaction.
///
/// Returning early drops the transaction, which rolls it back.
fn run_in_transaction(
    conn: &mut rusqlite::Connection,
    sql: &str,
    params: &[Value],
    execution: Execution,
) -> rusqlite::Result<StatementResult> {
    let transaction = conn.transaction()?;

    let result = match execution {
        Execution::Direct => run_statement(&mut transaction.prepare(sql)?, params)?,
        Execution::Prepared => {
            let mut statement = transaction.prepare_cached(sql)?;
            let mut result = run_statement(&mut statement, params)?;
            result.last_insert_id = Some(transaction.last_insert_rowid());
            result
        }
    };

    transaction.commit()?;
    Ok(result)
}

fn run_statement(statement: &mut rusqlite::Statement, params: &[Value]) -> rusqlite::Result<StatementResult> {
    let columns = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let bound = rusqlite::params_from_iter(params.iter());

    if columns.is_empty() {
        let rows_affected = statement.execute(bound)?;
        return Ok(StatementResult {
            rows_affected,
            ..Default::default()
        });
    }

    let mut rows = vec![];
    let mut cursor = statement.query(bound)?;
    while let Some(r) = cursor.next()? {
        let mut row = Row::new();
        for (i, c) in columns.iter().enumerate() {
            row.insert(c.as_str(), Value::from(r.get_ref(i)?));
        }
        rows.push(row);
    }

    Ok(StatementResult {
        columns,
        rows,
        ..Default::default()
    })
}

pub struct Database {
    config: DbConfig,
    conn: Option<rusqlite::Connection>,
    sink: Box<dyn ErrorSink>,
    last_insert_id: Option<i64>,
}

impl Database {
    /// Create a database for `config`.  Nothing is opened until the first statement runs.
    pub fn open(config: DbConfig) -> Database {
        Database {
            config,
            conn: None,
            sink: Box::new(LogSink),
            last_insert_id: None,
        }
    }

    /// Build a database from an already-open connection.
    ///
    /// Mostly useful for tests and benchmarks.
    pub fn with_connection(conn: rusqlite::Connection, config: DbConfig) -> Result<Database> {
        apply_session(&conn, &config)?;
        Ok(Database {
            conn: Some(conn),
            ..Database::open(config)
        })
    }

    /// Send failures to `sink` instead of the log.
    pub fn with_sink(mut self, sink: impl ErrorSink + 'static) -> Database {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The id recorded by the most recent successful prepared statement.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Execute a statement in its own transaction.
    ///
    /// On failure the transaction is rolled back, the error is reported to the sink, and the same (possibly redacted)
    /// code and message come back as the error.
    pub fn execute(&mut self, sql: &str, params: &[Value], execution: Execution) -> Result<StatementResult> {
        let sql = sanitize(sql);
        if sql.is_empty() {
            return Err(Error::EmptyStatement);
        }

        debug!("Executing ({:?}): {}", execution, sql);
        let res = self.try_execute(&sql, params, execution);
        res.map_err(|e| self.report(e))
    }

    fn connection(&mut self) -> Result<&mut rusqlite::Connection> {
        let conn = match self.conn.take() {
            Some(c) => c,
            None => {
                let conn = open_connection(&self.config).map_err(|e| {
                    let (code, message) = describe(&e);
                    Error::Connection { code, message }
                })?;
                apply_session(&conn, &self.config)?;
                conn
            }
        };

        Ok(self.conn.insert(conn))
    }

    fn try_execute(&mut self, sql: &str, params: &[Value], execution: Execution) -> Result<StatementResult> {
        let conn = self.connection()?;
        let result = run_in_transaction(conn, sql, params, execution).map_err(|e| {
            let (code, message) = describe(&e);
            warn!("Rolled back statement after error {}: {}", code, message);
            Error::Execution { code, message }
        })?;

        if result.last_insert_id.is_some() {
            self.last_insert_id = result.last_insert_id;
        }

        Ok(result)
    }

    /// Redact if needed, then hand the failure to the sink.
    fn report(&mut self, err: Error) -> Error {
        let protected = self.config.protected_mode();
        let redact = |message: String| {
            if protected {
                PROTECTED_MESSAGE.to_string()
            } else {
                message
            }
        };

        let err = match err {
            Error::Connection { code, message } => Error::Connection {
                code,
                message: redact(message),
            },
            Error::Execution { code, message } => Error::Execution {
                code,
                message: redact(message),
            },
            other => return other,
        };

        if let Error::Connection { code, message } | Error::Execution { code, message } = &err {
            self.sink.report(*code, message);
        }

        err
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    /// Sink which remembers what it was given.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) reports: Rc<RefCell<Vec<(i32, String)>>>,
    }

    impl ErrorSink for RecordingSink {
        fn report(&mut self, code: i32, message: &str) {
            self.reports.borrow_mut().push((code, message.to_string()));
        }
    }

    const SCHEMA: &str = r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            visit_count INTEGER NOT NULL DEFAULT 0,
            nick TEXT
        )
    "#;

    /// An in-memory database with the `users` table, plus the sink it reports to.
    pub(crate) fn test_database(config: DbConfig) -> (Database, RecordingSink) {
        dbm_logging::log_to_stderr();

        let sink = RecordingSink::default();
        let mut db = Database::open(config).with_sink(sink.clone());
        db.execute(SCHEMA, &[], Execution::Direct)
            .expect("Should create the schema");
        (db, sink)
    }

    #[test]
    fn sanitize_trims_and_collapses_backslashes() {
        assert_eq!(sanitize("  SELECT 1;\n"), "SELECT 1;");
        assert_eq!(sanitize(r"SELECT 'it\\\'s'"), r"SELECT 'it\'s'");
        assert_eq!(sanitize(r"SELECT 'it\'s'"), r"SELECT 'it\'s'");
        assert_eq!(sanitize(r"SELECT 'a\\b'"), r"SELECT 'a\\b'");
    }

    #[test]
    fn connects_lazily_and_reuses_the_connection() {
        let mut db = Database::open(DbConfig::default());
        assert!(!db.is_connected());

        db.execute("CREATE TABLE t (x INTEGER)", &[], Execution::Direct)
            .unwrap();
        assert!(db.is_connected());

        // An in-memory database only keeps the table if the second statement runs on the same connection.
        db.execute("INSERT INTO t (x) VALUES (1)", &[], Execution::Direct)
            .unwrap();
        let res = db
            .execute("SELECT x FROM t", &[], Execution::Direct)
            .unwrap();
        assert_eq!(res.columns, vec!["x".to_string()]);
        assert_eq!(res.rows, vec![Row::new().with("x", 1)]);
    }

    #[test]
    fn empty_statement() {
        let (mut db, sink) = test_database(DbConfig::default());
        assert!(matches!(
            db.execute("   \n", &[], Execution::Direct),
            Err(Error::EmptyStatement)
        ));
        assert!(sink.reports.borrow().is_empty());
    }

    #[test]
    fn prepared_execution_records_last_insert_id() {
        let (mut db, _) = test_database(DbConfig::default());
        assert_eq!(db.last_insert_id(), None);

        let res = db
            .execute(
                "INSERT INTO users (name, email) VALUES (?, ?)",
                &["Ana".into(), "ana@example.com".into()],
                Execution::Prepared,
            )
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        assert_eq!(res.last_insert_id, Some(1));
        assert_eq!(db.last_insert_id(), Some(1));

        // Direct execution leaves the recorded id alone.
        db.execute(
            "INSERT INTO users (name, email) VALUES ('Bia', 'bia@example.com')",
            &[],
            Execution::Direct,
        )
        .unwrap();
        assert_eq!(db.last_insert_id(), Some(1));
    }

    #[test]
    fn failure_rolls_back_and_reports() {
        let (mut db, sink) = test_database(DbConfig::default());
        db.execute(
            "INSERT INTO users (name, email) VALUES ('Ana', 'ana@example.com')",
            &[],
            Execution::Prepared,
        )
        .unwrap();

        let err = db
            .execute(
                "INSERT INTO users (name, email) VALUES ('Ana', 'ana@example.com')",
                &[],
                Execution::Prepared,
            )
            .unwrap_err();

        // SQLITE_CONSTRAINT_UNIQUE
        assert_eq!(err.code(), Some(2067));
        match &err {
            Error::Execution { message, .. } => assert!(message.contains("UNIQUE")),
            other => panic!("Unexpected error {:?}", other),
        }
        assert_eq!(sink.reports.borrow().len(), 1);
        assert_eq!(sink.reports.borrow()[0].0, 2067);
        assert_eq!(db.last_insert_id(), Some(1));

        // The failed transaction must not be left open: a new one can begin.
        let count = db
            .execute("SELECT COUNT(*) AS n FROM users", &[], Execution::Direct)
            .unwrap();
        assert_eq!(count.rows[0].get("n"), Some(&Value::Integer(1)));
    }

    #[test]
    fn protected_mode_redacts() {
        let config = crate::config::DbConfigBuilder::default()
            .protected_mode(true)
            .build()
            .unwrap();
        let (mut db, sink) = test_database(config);

        let err = db
            .execute("SELECT * FROM nowhere", &[], Execution::Direct)
            .unwrap_err();
        match &err {
            Error::Execution { message, .. } => assert_eq!(message, PROTECTED_MESSAGE),
            other => panic!("Unexpected error {:?}", other),
        }
        assert_eq!(sink.reports.borrow()[0].1, PROTECTED_MESSAGE);
    }

    #[test]
    fn connection_failures_are_reported() {
        let tdir = tempfile::TempDir::new().unwrap();
        let path = tdir.path().join("missing").join("db.sqlite");
        let config = crate::config::DbConfigBuilder::default()
            .database(path.to_string_lossy().into_owned())
            .build()
            .unwrap();

        let sink = RecordingSink::default();
        let mut db = Database::open(config).with_sink(sink.clone());
        let err = db.execute("SELECT 1", &[], Execution::Direct).unwrap_err();

        assert!(matches!(err, Error::Connection { .. }));
        // SQLITE_CANTOPEN
        assert_eq!(err.code(), Some(14));
        assert_eq!(sink.reports.borrow().len(), 1);
        assert!(!db.is_connected());
    }

    #[test]
    fn protected_mode_redacts_connection_failures() -> anyhow::Result<()> {
        let tdir = tempfile::TempDir::new()?;
        let path = tdir.path().join("missing").join("db.sqlite");
        let config = crate::config::DbConfigBuilder::default()
            .database(path.to_string_lossy().into_owned())
            .protected_mode(true)
            .build()
            .unwrap();

        let sink = RecordingSink::default();
        let mut db = Database::open(config).with_sink(sink.clone());
        let err = db.execute("SELECT 1", &[], Execution::Direct).unwrap_err();

        match &err {
            Error::Connection { code, message } => {
                assert_eq!(*code, 14);
                assert_eq!(message, PROTECTED_MESSAGE);
            }
            other => panic!("Unexpected error {:?}", other),
        }
        assert_eq!(
            *sink.reports.borrow(),
            vec![(14, PROTECTED_MESSAGE.to_string())]
        );
        Ok(())
    }

    #[test]
    fn file_backed_database_persists() -> anyhow::Result<()> {
        let tdir = tempfile::TempDir::new()?;
        let path = tdir.path().join("db.sqlite");
        let config = crate::config::DbConfigBuilder::default()
            .database(path.to_string_lossy().into_owned())
            .build()
            .unwrap();

        let mut db = Database::open(config.clone());
        db.execute("CREATE TABLE t (x TEXT)", &[], Execution::Direct)?;
        db.execute("INSERT INTO t (x) VALUES (?)", &["kept".into()], Execution::Prepared)?;
        drop(db);

        let mut db = Database::open(config);
        let res = db.execute("SELECT x FROM t", &[], Execution::Direct)?;
        assert_eq!(res.rows, vec![Row::new().with("x", "kept")]);
        Ok(())
    }

    #[test]
    fn with_connection_applies_session() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut db = Database::with_connection(conn, DbConfig::default()).unwrap();
        let res = db
            .execute("PRAGMA foreign_keys", &[], Execution::Direct)
            .unwrap();
        assert_eq!(res.rows[0].get("foreign_keys"), Some(&Value::Integer(1)));
    }

    #[test]
    fn fetches_plain_structs() -> anyhow::Result<()> {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Named {
            name: String,
            nick: Option<String>,
        }

        let (mut db, _) = test_database(DbConfig::default());
        db.execute(
            "INSERT INTO users (name, email, nick) VALUES ('Ana', 'a@x', 'aninha')",
            &[],
            Execution::Direct,
        )?;
        let res = db.execute("SELECT name, nick FROM users", &[], Execution::Direct)?;
        assert_eq!(
            res.fetch_as::<Named>()?,
            vec![Named {
                name: "Ana".into(),
                nick: Some("aninha".into()),
            }]
        );
        Ok(())
    }
}
