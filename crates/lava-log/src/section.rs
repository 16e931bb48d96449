//! GitLab collapsible sections and their marker wire format.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::console::{FG_CYAN, RESET, SECTION_ESCAPE};
use crate::error::SectionError;

/// Stage of a LAVA job a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Unknown,
    LavaSubmit,
    LavaQueue,
    LavaDeploy,
    LavaBoot,
    TestSuite,
    TestCase,
    LavaPostProcessing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unknown => "UNKNOWN",
            Phase::LavaSubmit => "LAVA_SUBMIT",
            Phase::LavaQueue => "LAVA_QUEUE",
            Phase::LavaDeploy => "LAVA_DEPLOY",
            Phase::LavaBoot => "LAVA_BOOT",
            Phase::TestSuite => "TEST_SUITE",
            Phase::TestCase => "TEST_CASE",
            Phase::LavaPostProcessing => "LAVA_POST_PROCESSING",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static ID_FILTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w_-]+").expect("valid regex"));

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\x1b\[0Ksection_(start|end):(\d+):([\w-]+)(\[collapsed=true\])?\r\x1b\[0K(.*)$")
        .expect("valid regex")
});

/// Replaces every run of characters outside `[\w_-]` with a single `-`.
pub fn sanitize_id(value: &str) -> String {
    ID_FILTER.replace_all(value, "-").into_owned()
}

/// Renders a duration the way budgets are shown in section headers: `H:MM:SS`,
/// with a leading day count when needed.
pub fn format_duration(duration: &TimeDelta) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let rest = total % 86_400;
    let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Start,
    End,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Start => f.write_str("start"),
            MarkerKind::End => f.write_str("end"),
        }
    }
}

/// A named, collapsible phase of the job output.
///
/// Lifecycle only moves forward: unstarted, started, finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    id: String,
    header: String,
    phase: Phase,
    start_collapsed: bool,
    suppress_start: bool,
    suppress_end: bool,
    colour: String,
    relative_to: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Section {
    pub fn new(id: &str, header: impl Into<String>, phase: Phase) -> Self {
        Self {
            id: sanitize_id(id),
            header: header.into(),
            phase,
            start_collapsed: false,
            suppress_start: false,
            suppress_end: false,
            colour: FG_CYAN.to_string(),
            relative_to: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn collapsed(mut self, start_collapsed: bool) -> Self {
        self.start_collapsed = start_collapsed;
        self
    }

    pub fn suppress_start(mut self, suppress: bool) -> Self {
        self.suppress_start = suppress;
        self
    }

    pub fn suppress_end(mut self, suppress: bool) -> Self {
        self.suppress_end = suppress;
        self
    }

    pub fn colour(mut self, colour: impl Into<String>) -> Self {
        self.colour = colour.into();
        self
    }

    /// Baseline for the `[MM:SS]` prefix shown before the header.
    pub fn relative_to(mut self, baseline: Option<DateTime<Utc>>) -> Self {
        self.relative_to = baseline;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn has_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn has_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn start(&mut self) -> Result<String, SectionError> {
        self.start_at(Utc::now())
    }

    /// Marks the section as started at `now` and returns its start marker,
    /// or an empty string when the start marker is suppressed.
    pub fn start_at(&mut self, now: DateTime<Utc>) -> Result<String, SectionError> {
        if self.has_finished() {
            return Err(SectionError::AlreadyFinished {
                id: self.id.clone(),
            });
        }
        self.start_time = Some(now);
        if self.suppress_start {
            return Ok(String::new());
        }
        Ok(self.render(MarkerKind::Start, &self.header, now))
    }

    pub fn end(&mut self) -> Result<String, SectionError> {
        self.end_at(Utc::now())
    }

    /// Marks the section as finished at `now` and returns its end marker,
    /// or an empty string when the end marker is suppressed.
    pub fn end_at(&mut self, now: DateTime<Utc>) -> Result<String, SectionError> {
        let Some(start) = self.start_time else {
            return Err(SectionError::NotStarted {
                id: self.id.clone(),
            });
        };
        if self.has_finished() {
            return Err(SectionError::AlreadyFinished {
                id: self.id.clone(),
            });
        }
        self.end_time = Some(now);
        if now < start {
            log::warn!(
                "Section {} ended before it started, clamping the delta time to 0",
                self.id
            );
        }
        if self.suppress_end {
            return Ok(String::new());
        }
        Ok(self.render(MarkerKind::End, "", now))
    }

    pub fn elapsed(&self) -> Option<TimeDelta> {
        self.elapsed_at(Utc::now())
    }

    /// Time spent in this section, never negative.
    ///
    /// `None` when the section has not started; measured up to `now` while
    /// the section is still in progress.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or(now);
        Some((end - start).max(TimeDelta::zero()))
    }

    fn render(&self, kind: MarkerKind, header: &str, time: DateTime<Utc>) -> String {
        let collapsed = if kind == MarkerKind::Start && self.start_collapsed {
            "[collapsed=true]"
        } else {
            ""
        };
        let mut line = format!(
            "{SECTION_ESCAPE}section_{kind}:{}:{}{collapsed}\r{SECTION_ESCAPE}",
            time.timestamp(),
            self.id
        );
        if !header.is_empty() {
            line.push_str(&self.colour);
            line.push_str(&self.relative_prefix());
            line.push_str(header);
            line.push_str(RESET);
        }
        line
    }

    fn relative_prefix(&self) -> String {
        match (self.relative_to, self.start_time) {
            (Some(baseline), Some(start)) => {
                // Timestamps come from different hosts, drift may make this negative.
                let secs = (start - baseline).num_seconds().max(0);
                format!("[{:02}:{:02}] ", secs / 60, secs % 60)
            }
            _ => String::new(),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match (self.has_started(), self.has_finished()) {
            (false, _) => "NS",
            (true, false) => "IP",
            (true, true) => "F",
        };
        // In-progress sections have no fixed elapsed time.
        let elapsed = match (self.start_time, self.end_time) {
            (Some(_), Some(end)) => self
                .elapsed_at(end)
                .map_or_else(|| "N/A".to_string(), |delta| format_duration(&delta)),
            _ => "N/A".to_string(),
        };
        write!(
            f,
            "Section({}, {}, {}, SC={}, S={}, ET={})",
            self.id, self.header, self.phase, self.start_collapsed, status, elapsed
        )
    }
}

/// A section marker recovered from a rendered output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionMarker {
    pub kind: MarkerKind,
    pub timestamp: i64,
    pub id: String,
    pub collapsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl SectionMarker {
    /// Parses a line the way GitLab's log viewer does; `None` if it is not a marker.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = MARKER.captures(line)?;
        let kind = match &caps[1] {
            "start" => MarkerKind::Start,
            _ => MarkerKind::End,
        };
        let timestamp = caps[2].parse().ok()?;
        let header = caps
            .get(5)
            .map(|m| m.as_str())
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        Some(Self {
            kind,
            timestamp,
            id: caps[3].to_string(),
            collapsed: caps.get(4).is_some(),
            header,
        })
    }
}
