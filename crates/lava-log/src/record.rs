use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tag attached to each record by the LAVA dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Exception,
    Results,
    Feedback,
    Input,
    Target,
    #[serde(other)]
    Other,
}

/// Payload of a record.
///
/// Most records carry a single line of text. Kernel log bursts arrive as a
/// list of lines, and `results` records carry a structured mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Text(String),
    Lines(Vec<String>),
    Structured(serde_json::Value),
}

impl Message {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut String> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => f.write_str(text),
            Message::Lines(lines) => f.write_str(&lines.join("\n")),
            Message::Structured(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Vec<String>> for Message {
    fn from(lines: Vec<String>) -> Self {
        Message::Lines(lines)
    }
}

/// One structured log record as produced by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lvl: Level,
    pub msg: Message,
    /// Namespace tag, e.g. `dut` for the device under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
    /// Dispatcher timestamp, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<String>,
}

impl LogRecord {
    pub fn new(lvl: Level, msg: impl Into<Message>) -> Self {
        Self {
            lvl,
            msg: msg.into(),
            ns: None,
            dt: None,
        }
    }

    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.msg.as_text()
    }
}

/// Parses one ingestion line: either a JSON array of records or a single record.
pub fn parse_batch(line: &str) -> serde_json::Result<Vec<LogRecord>> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value::<LogRecord>(value).map(|record| vec![record])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_text_record() {
        let record: LogRecord =
            serde_json::from_str(r#"{"lvl": "target", "msg": "hello\r\n"}"#).unwrap();
        assert_eq!(record.lvl, Level::Target);
        assert_eq!(record.text(), Some("hello\r\n"));
        assert!(record.ns.is_none());
    }

    #[test]
    fn test_deserialize_kernel_burst() {
        let record: LogRecord =
            serde_json::from_str(r#"{"lvl": "debug", "msg": ["a", "b"]}"#).unwrap();
        assert_eq!(record.msg, Message::Lines(vec!["a".into(), "b".into()]));
        assert!(record.text().is_none());
    }

    #[test]
    fn test_deserialize_results_and_unknown_level() {
        let record: LogRecord =
            serde_json::from_str(r#"{"lvl": "results", "msg": {"case": "x", "result": "pass"}}"#)
                .unwrap();
        assert!(matches!(record.msg, Message::Structured(_)));

        let record: LogRecord =
            serde_json::from_str(r#"{"lvl": "marker", "msg": "m", "ns": "dut"}"#).unwrap();
        assert_eq!(record.lvl, Level::Other);
        assert_eq!(record.ns.as_deref(), Some("dut"));
    }

    #[test]
    fn test_parse_batch_accepts_array_or_single() {
        let batch = parse_batch(r#"[{"lvl": "info", "msg": "a"}, {"lvl": "info", "msg": "b"}]"#)
            .unwrap();
        assert_eq!(batch.len(), 2);
        let single = parse_batch(r#"{"lvl": "info", "msg": "a"}"#).unwrap();
        assert_eq!(single.len(), 1);
        assert!(parse_batch("not json").is_err());
    }
}
