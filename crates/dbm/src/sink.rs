//! Where database failures go.
//!
//! The [crate::Database] reports every connection and execution failure to an [ErrorSink] before returning the error
//! to its caller.  Deciding what the failure looks like to a user (and whether to stop) is up to whoever owns the
//! sink; [ErrorOutput] knows how to render the three formats we support.
use std::io::Write;

use log::*;

/// Receives `(code, message)` for each database failure.  The message has already been redacted in protected mode.
pub trait ErrorSink {
    fn report(&mut self, code: i32, message: &str);
}

/// The default sink: log and carry on.
#[derive(Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&mut self, code: i32, message: &str) {
        error!("Database error {}: {}", code, message);
    }
}

/// How failures are rendered for the outside world.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ErrorOutput {
    Html,
    Json,
    #[default]
    Text,
}

/// A rendered failure: headers for adapters which speak HTTP, and the body.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RenderedError {
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl ErrorOutput {
    /// Parse an output selector.  Matching is case-insensitive, and anything unknown is plain text.
    pub fn from_name(name: &str) -> ErrorOutput {
        match name.to_ascii_lowercase().as_str() {
            "html" => ErrorOutput::Html,
            "json" => ErrorOutput::Json,
            _ => ErrorOutput::Text,
        }
    }

    pub fn render(&self, code: i32, message: &str) -> RenderedError {
        match self {
            ErrorOutput::Html => RenderedError {
                headers: vec![],
                body: format!(
                    "<div><strong>Error: ({})</strong></br><b>Message:</b> {}<div>",
                    code, message
                ),
            },
            ErrorOutput::Json => RenderedError {
                headers: vec![
                    ("Access-Control-Allow-Origin", "*".to_string()),
                    ("Content-type", "application/json; charset=utf-8".to_string()),
                ],
                // serde_json never escapes `/` or non-ASCII characters.
                body: serde_json::json!({ "code": code, "message": message }).to_string(),
            },
            ErrorOutput::Text => RenderedError {
                headers: vec![],
                body: format!("(ERROR {}) {}", code, message),
            },
        }
    }
}

/// A sink which writes the rendered body of each failure to a writer.
pub struct RenderingSink<W> {
    output: ErrorOutput,
    writer: W,
}

impl<W: Write> RenderingSink<W> {
    pub fn new(output: ErrorOutput, writer: W) -> Self {
        Self { output, writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ErrorSink for RenderingSink<W> {
    fn report(&mut self, code: i32, message: &str) {
        let rendered = self.output.render(code, message);
        if let Err(e) = writeln!(self.writer, "{}", rendered.body) {
            warn!("Unable to write database error {}: {}", code, e);
        }
    }
}
