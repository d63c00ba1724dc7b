use crate::record::LogRecord;

/// Renders a [`LogRecord`] into the single line that ends up in a log object.
pub trait LogFormatter: Send + Sync {
    /// Format one record. The returned string must not contain a newline.
    fn format(&self, record: &LogRecord) -> Result<String, FormatError>;
}

/// Error returned when a record cannot be rendered.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("record has neither a message nor fields")]
    Empty,

    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Plain-text formatter producing `{asctime} - {LEVEL} - {message}` lines.
///
/// Structured fields are appended as `key=value` pairs after the message,
/// and embedded newlines are escaped so every record stays on one line.
#[derive(Clone, Debug, Default)]
pub struct TextFormatter;

impl LogFormatter for TextFormatter {
    fn format(&self, record: &LogRecord) -> Result<String, FormatError> {
        if record.message.is_none() && record.fields.is_empty() {
            return Err(FormatError::Empty);
        }

        let mut line = format!(
            "{} - {} - {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level.to_ascii_uppercase(),
            record.message.as_deref().unwrap_or_default(),
        );

        for (key, value) in &record.fields {
            match value {
                serde_json::Value::String(s) => line.push_str(&format!(" {}={}", key, s)),
                other => line.push_str(&format!(" {}={}", key, other)),
            }
        }

        Ok(escape_newlines(&line))
    }
}

/// Formatter emitting each record as one JSON object per line.
#[derive(Clone, Debug, Default)]
pub struct JsonFormatter;

impl LogFormatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> Result<String, FormatError> {
        // serde_json escapes control characters, so the output is one line.
        Ok(serde_json::to_string(record)?)
    }
}

fn escape_newlines(line: &str) -> String {
    if !line.contains(['\n', '\r']) {
        return line.to_string();
    }
    line.replace('\r', "\\r").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(message: &str) -> LogRecord {
        let mut record = LogRecord::new("info", "gst_ingest::steam", message);
        record.timestamp = chrono::Utc
            .with_ymd_and_hms(2025, 2, 18, 10, 45, 30)
            .unwrap();
        record
    }

    #[test]
    fn text_formatter_matches_asctime_layout() {
        let line = TextFormatter.format(&record("players fetched")).unwrap();
        assert_eq!(line, "2025-02-18 10:45:30,000 - INFO - players fetched");
    }

    #[test]
    fn text_formatter_appends_fields_and_stays_single_line() {
        let mut rec = record("first\nsecond");
        rec.fields.insert("appid".into(), serde_json::json!(570));
        rec.fields.insert("origin".into(), serde_json::json!("steam"));

        let line = TextFormatter.format(&rec).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.ends_with("first\\nsecond appid=570 origin=steam"));
    }

    #[test]
    fn empty_record_is_a_format_error() {
        let mut rec = record("x");
        rec.message = None;
        assert!(matches!(TextFormatter.format(&rec), Err(FormatError::Empty)));
    }

    #[test]
    fn json_formatter_emits_one_object() {
        let line = JsonFormatter.format(&record("multi\nline")).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["message"], "multi\nline");
        assert_eq!(value["target"], "gst_ingest::steam");
    }
}
