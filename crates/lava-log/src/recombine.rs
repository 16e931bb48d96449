//! Repair of GitLab section markers split across two records.
//!
//! GitLab expects a marker and its header on one line:
//!
//! ```text
//! ESC[0Ksection_start:<timestamp>:<id>[collapsed=true]\rESC[0K<header>
//! ESC[0Ksection_end:<timestamp>:<id>\rESC[0K
//! ```
//!
//! Between the dispatcher and the device the `\r` is sometimes turned into a
//! line break, so the marker reaches us as two records. The recombiner holds
//! the first half back for one record and glues the halves together again.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::LogRecord;

static SPLIT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[0Ksection_(?:start|end):\d+:[^\s\r]+$").expect("valid regex")
});

static CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[0K(?:[\S ]+)?").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    AwaitingContinuation {
        held: String,
    },
}

/// Two-state fixer with a single-slot lookahead.
#[derive(Debug, Default)]
pub struct SplitMarkerRecombiner {
    state: State,
}

impl SplitMarkerRecombiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.state, State::AwaitingContinuation { .. })
    }

    /// Consumes one record.
    ///
    /// A lone marker half is moved out of the record (leaving its text empty)
    /// and held. The next record either completes it, in which case the
    /// record's text becomes `held + "\r" + text`, or doesn't, in which case
    /// the held half is returned so the caller can put it back in the stream
    /// ahead of the untouched record.
    pub fn process(&mut self, record: &mut LogRecord) -> Option<String> {
        match std::mem::take(&mut self.state) {
            State::Idle => {
                if let Some(text) = record.msg.as_text_mut()
                    && SPLIT_MARKER.is_match(text)
                {
                    let held = std::mem::take(text);
                    self.state = State::AwaitingContinuation { held };
                }
                None
            }
            State::AwaitingContinuation { held } => match record.msg.as_text_mut() {
                Some(text) if CONTINUATION.is_match(text) => {
                    *text = format!("{held}\r{text}");
                    None
                }
                _ => Some(held),
            },
        }
    }

    /// Releases a held fragment, if any. Used when the stream ends.
    pub fn take_held(&mut self) -> Option<String> {
        match std::mem::take(&mut self.state) {
            State::AwaitingContinuation { held } => Some(held),
            State::Idle => None,
        }
    }
}
