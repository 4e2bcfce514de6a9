use std::time::Duration;

use log::*;

use crate::errors::*;
use crate::sink::ErrorOutput;

/// Text encodings sqlite can store.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Charset {
    #[default]
    Utf8,
    Utf16,
    Utf16Le,
    Utf16Be,
}

impl Charset {
    /// Parse a charset name.  Accepts the MySQL-style spellings people already have in their `.env` files.
    pub fn from_name(name: &str) -> Option<Charset> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "utf8" | "utf8mb4" | "utf8mb3" => Some(Charset::Utf8),
            "utf16" => Some(Charset::Utf16),
            "utf16le" => Some(Charset::Utf16Le),
            "utf16be" => Some(Charset::Utf16Be),
            _ => None,
        }
    }

    /// The name `PRAGMA encoding` wants.
    pub fn pragma_name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Le => "UTF-16le",
            Charset::Utf16Be => "UTF-16be",
        }
    }
}

#[derive(Clone, Debug, derivative::Derivative, derive_builder::Builder)]
#[derivative(Default)]
#[builder(default, setter(into))]
pub struct DbConfig {
    /// Path to the database file, or `:memory:`.
    #[derivative(Default(value = "String::from(\":memory:\")"))]
    database: String,

    charset: Charset,

    /// How long a statement waits on a locked database before failing.
    #[derivative(Default(value = "Duration::from_secs(20)"))]
    timeout: Duration,

    error_output: ErrorOutput,

    /// When set, every database error message is replaced with a generic one before anyone sees it.
    protected_mode: bool,
}

impl DbConfig {
    /// Load the configuration from the process environment, reading a `.env` file first if there is one.
    pub fn from_env() -> Result<DbConfig> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        DbConfig::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from `DB_*` variables provided by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<DbConfig> {
        let mut builder = DbConfigBuilder::default();

        let database = lookup("DB_DATABASE")
            .filter(|x| !x.trim().is_empty())
            .ok_or_else(|| Error::Config("DB_DATABASE is not set".into()))?;
        builder.database(database);

        if let Some(charset) = lookup("DB_CHARSET") {
            builder.charset(
                Charset::from_name(&charset)
                    .ok_or_else(|| Error::Config(format!("Unknown charset {}", charset)))?,
            );
        }

        if let Some(timeout) = lookup("DB_TIMEOUT") {
            let secs: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("DB_TIMEOUT must be whole seconds, got {}", timeout)))?;
            builder.timeout(Duration::from_secs(secs));
        }

        if let Some(output) = lookup("DB_OUTPUT_MESSAGE") {
            builder.error_output(ErrorOutput::from_name(&output));
        }

        if let Some(protected) = lookup("DB_PROTECTED_MODE") {
            builder.protected_mode(parse_flag(&protected)?);
        }

        builder.build().map_err(|e| Error::Config(e.to_string()))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn error_output(&self) -> ErrorOutput {
        self.error_output
    }

    pub fn protected_mode(&self) -> bool {
        self.protected_mode
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("Expected a boolean, got {}", value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let config = DbConfig::default();
        assert_eq!(config.database(), ":memory:");
        assert_eq!(config.charset(), Charset::Utf8);
        assert_eq!(config.timeout(), Duration::from_secs(20));
        assert_eq!(config.error_output(), ErrorOutput::Text);
        assert!(!config.protected_mode());
    }

    #[test]
    fn builder_overrides() {
        let config = DbConfigBuilder::default()
            .database("app.sqlite")
            .protected_mode(true)
            .build()
            .unwrap();
        assert_eq!(config.database(), "app.sqlite");
        assert!(config.protected_mode());
        assert_eq!(config.timeout(), Duration::from_secs(20));
    }

    #[test]
    fn reads_everything() {
        let config = DbConfig::from_lookup(lookup_from(&[
            ("DB_DATABASE", "/var/lib/app/app.sqlite"),
            ("DB_CHARSET", "utf8mb4"),
            ("DB_TIMEOUT", "5"),
            ("DB_OUTPUT_MESSAGE", "JSON"),
            ("DB_PROTECTED_MODE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.database(), "/var/lib/app/app.sqlite");
        assert_eq!(config.charset(), Charset::Utf8);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.error_output(), ErrorOutput::Json);
        assert!(config.protected_mode());
    }

    #[test]
    fn database_is_required() {
        let err = DbConfig::from_lookup(lookup_from(&[("DB_CHARSET", "utf8")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_bad_values() {
        for (k, v) in [
            ("DB_CHARSET", "latin1"),
            ("DB_TIMEOUT", "soon"),
            ("DB_PROTECTED_MODE", "maybe"),
        ] {
            let res = DbConfig::from_lookup(lookup_from(&[("DB_DATABASE", "x.sqlite"), (k, v)]));
            assert!(matches!(res, Err(Error::Config(_))), "{}={} should fail", k, v);
        }
    }

    #[test]
    fn charset_names() {
        assert_eq!(Charset::from_name("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::from_name("utf_16le"), Some(Charset::Utf16Le));
        assert_eq!(Charset::Utf16Be.pragma_name(), "UTF-16be");
        assert_eq!(Charset::from_name("latin1"), None);
    }
}
