//! Value formatting collaborator.
//!
//! Formatters turn a [`Value`] into one or more mime-typed renderings for
//! the display layer. They are pure: same value in, same renderings out,
//! and the kernel only calls them on successful non-void results.

use crate::protocol::FormattedValue;
use crate::value::Value;

pub const MIME_PLAIN: &str = "text/plain";
pub const MIME_JSON: &str = "application/json";

/// Renders return values for the display layer.
pub trait ValueFormatter: Send + Sync {
    fn format(&self, value: &Value) -> Vec<FormattedValue>;
}

/// `text/plain` rendering via `Display`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl ValueFormatter for PlainTextFormatter {
    fn format(&self, value: &Value) -> Vec<FormattedValue> {
        vec![FormattedValue::new(MIME_PLAIN, value.to_string())]
    }
}

/// `application/json` rendering via serde.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl ValueFormatter for JsonFormatter {
    fn format(&self, value: &Value) -> Vec<FormattedValue> {
        match serde_json::to_string(value) {
            Ok(json) => vec![FormattedValue::new(MIME_JSON, json)],
            Err(_) => Vec::new(),
        }
    }
}

/// Default kernel formatter: plain text first, then JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl ValueFormatter for DefaultFormatter {
    fn format(&self, value: &Value) -> Vec<FormattedValue> {
        let mut formatted = PlainTextFormatter.format(value);
        formatted.extend(JsonFormatter.format(value));
        formatted
    }
}
