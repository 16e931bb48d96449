//! Per-record filters applied before section detection.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::record::{Level, LogRecord, Message};

/// Debug message LAVA sends once it stops listening to the device feedback.
pub const FEEDBACK_DONE: &str = "Listened to connection for namespace 'dut' done";

static TRAILING_CRLF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n$").expect("valid regex"));

static KERNEL_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\d\s]{5}\.[\d\s]{6}\] +\S{2,}").expect("valid regex"));

static COLOR_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\x1b)?(\[\d{1,2}m)").expect("valid regex"));

static ERASE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\x1b)?(\[0K)").expect("valid regex"));

static FORMATTED_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\x1b)?(\[0;3\d{1,2}m)").expect("valid regex"));

/// Removes a trailing `\r\n` from the text, or from every line of a burst.
pub fn strip_trailing_crlf(record: &mut LogRecord) {
    match &mut record.msg {
        Message::Text(text) => strip_crlf(text),
        Message::Lines(lines) => lines.iter_mut().for_each(strip_crlf),
        Message::Structured(_) => {}
    }
}

fn strip_crlf(text: &mut String) {
    if TRAILING_CRLF.is_match(text) {
        text.truncate(text.len() - 2);
    }
}

/// A record is a kernel dump when it is a debug-level burst of lines, or a
/// single line carrying a kernel timestamp (`[   12.345678] ...`).
pub fn is_kernel_dump(record: &LogRecord) -> bool {
    match &record.msg {
        Message::Lines(_) => record.lvl == Level::Debug,
        Message::Text(text) => KERNEL_TIMESTAMP.is_match(text),
        Message::Structured(_) => false,
    }
}

/// Out-of-band device feedback and the end-of-feedback notice.
pub fn is_feedback_noise(record: &LogRecord) -> bool {
    match record.lvl {
        Level::Feedback => record.ns.as_deref() == Some("dut"),
        Level::Debug => record.text() == Some(FEEDBACK_DONE),
        _ => false,
    }
}

/// Joins lines LAVA split on carriage returns.
///
/// LAVA maps every `\r` on the console to a line of its own, so progress
/// output arrives as a series of `...\r` records followed by the final one.
#[derive(Debug, Default)]
pub struct CarriageReturnMerger {
    pending: String,
}

impl CarriageReturnMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the record was absorbed into the pending fragment
    /// (its trailing `\r` dropped). Otherwise any pending fragment is
    /// prepended to the record's text.
    pub fn merge(&mut self, record: &mut LogRecord) -> bool {
        let Some(text) = record.msg.as_text_mut() else {
            return false;
        };
        if let Some(fragment) = text.strip_suffix('\r') {
            self.pending.push_str(fragment);
            return true;
        }
        if !self.pending.is_empty() {
            text.insert_str(0, &self.pending);
            self.pending.clear();
        }
        false
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Restores the `ESC` byte some farms drop in front of ANSI codes.
///
/// - `[31m` becomes `ESC[31m`
/// - `[0K` becomes `ESC[0K`
/// - `[0;31m` becomes `\rESC[0;31m`
///
/// Codes that still carry their escape are left as they are.
pub fn repair_color_codes(text: &str) -> String {
    let text = prefix_unescaped(&COLOR_CODE, text, "\x1b");
    let text = prefix_unescaped(&ERASE_LINE, &text, "\x1b");
    prefix_unescaped(&FORMATTED_COLOR, &text, "\r\x1b")
}

fn prefix_unescaped(pattern: &Regex, text: &str, prefix: &str) -> String {
    pattern
        .replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                format!("{prefix}{}", &caps[2])
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_trailing_crlf() {
        let mut record = LogRecord::new(Level::Target, "hello\r\n");
        strip_trailing_crlf(&mut record);
        assert_eq!(record.text(), Some("hello"));

        let mut record = LogRecord::new(Level::Target, "keep\r");
        strip_trailing_crlf(&mut record);
        assert_eq!(record.text(), Some("keep\r"));

        let mut burst = LogRecord::new(
            Level::Debug,
            Message::Lines(vec!["a\r\n".into(), "b".into(), "c\r\n".into()]),
        );
        strip_trailing_crlf(&mut burst);
        assert_eq!(
            burst.msg,
            Message::Lines(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_kernel_dump_detection() {
        let burst = LogRecord::new(Level::Debug, Message::Lines(vec!["oops".into()]));
        assert!(is_kernel_dump(&burst));
        let target_burst = LogRecord::new(Level::Target, Message::Lines(vec!["oops".into()]));
        assert!(!is_kernel_dump(&target_burst));

        let kmsg = LogRecord::new(Level::Target, "[   12.345678] usb 1-1: new device");
        assert!(is_kernel_dump(&kmsg));
        let plain = LogRecord::new(Level::Target, "[12.3] short");
        assert!(!is_kernel_dump(&plain));

        let results = LogRecord::new(Level::Results, Message::Structured(serde_json::json!({})));
        assert!(!is_kernel_dump(&results));
    }

    #[test]
    fn test_feedback_noise() {
        assert!(is_feedback_noise(
            &LogRecord::new(Level::Feedback, "x").with_ns("dut")
        ));
        assert!(!is_feedback_noise(
            &LogRecord::new(Level::Feedback, "x").with_ns("other")
        ));
        assert!(is_feedback_noise(&LogRecord::new(Level::Debug, FEEDBACK_DONE)));
        assert!(!is_feedback_noise(&LogRecord::new(Level::Debug, "other")));
        assert!(!is_feedback_noise(&LogRecord::new(Level::Target, FEEDBACK_DONE)));
    }

    #[test]
    fn test_carriage_return_merge() {
        let mut merger = CarriageReturnMerger::new();
        let mut first = LogRecord::new(Level::Target, "abc\r");
        assert!(merger.merge(&mut first));
        assert!(merger.has_pending());

        let mut second = LogRecord::new(Level::Target, "def");
        assert!(!merger.merge(&mut second));
        assert_eq!(second.text(), Some("abcdef"));
        assert!(!merger.has_pending());

        let mut alone = LogRecord::new(Level::Target, "abc");
        assert!(!merger.merge(&mut alone));
        assert_eq!(alone.text(), Some("abc"));
    }

    #[test]
    fn test_carriage_return_merge_ignores_non_text() {
        let mut merger = CarriageReturnMerger::new();
        let mut burst = LogRecord::new(Level::Target, Message::Lines(vec!["a\r".into()]));
        assert!(!merger.merge(&mut burst));
        assert_eq!(merger.take_pending(), None);
    }

    #[test]
    fn test_repair_color_codes() {
        assert_eq!(repair_color_codes("[31mred[0m"), "\x1b[31mred\x1b[0m");
        assert_eq!(
            repair_color_codes("[0Ksection_end:1:x"),
            "\x1b[0Ksection_end:1:x"
        );
        assert_eq!(repair_color_codes("[0;32mOK"), "\r\x1b[0;32mOK");
    }

    #[test]
    fn test_repair_color_codes_leaves_escaped_codes() {
        let good = "\x1b[31mred\x1b[0m \x1b[0K \x1b[0;32mOK";
        assert_eq!(repair_color_codes(good), good);
        assert_eq!(repair_color_codes("[not a code]"), "[not a code]");
    }
}
