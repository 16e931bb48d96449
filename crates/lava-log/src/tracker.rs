use std::io::Write;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::console::{FG_BOLD_RED, RESET, bold, format_log_line};
use crate::error::TrackerError;
use crate::hints::{FailureHintDetector, KnownIssue, KnownIssueDetector};
use crate::matcher::{PhaseMatcher, RegexPhaseMatcher};
use crate::normalize::{self, CarriageReturnMerger, repair_color_codes};
use crate::record::{Level, LogRecord, Message};
use crate::recombine::SplitMarkerRecombiner;
use crate::section::{Phase, Section};

/// Follows a LAVA log stream and rebuilds its GitLab sections.
///
/// Records are pushed in batches with [`feed`](Self::feed); corrected output
/// lines are pulled with [`flush`](Self::flush). Kernel dumps bypass the
/// buffer and are written to the console right away.
pub struct SectionTracker {
    config: TrackerConfig,
    relative_to: Option<DateTime<Utc>>,
    current: Option<Section>,
    history: Vec<Section>,
    buffer: Vec<String>,
    merger: CarriageReturnMerger,
    recombiner: SplitMarkerRecombiner,
    matcher: Box<dyn PhaseMatcher>,
    hints: Box<dyn FailureHintDetector>,
    clock: Box<dyn Clock>,
    console: Box<dyn Write + Send>,
}

impl SectionTracker {
    /// Creates a tracker with the default rule set, known-issue detection,
    /// the system clock and stdout as console.
    pub fn new(config: TrackerConfig) -> Self {
        let matcher = RegexPhaseMatcher::with_default_rules(config.timeouts.clone());
        Self {
            config,
            relative_to: None,
            current: None,
            history: Vec::new(),
            buffer: Vec::new(),
            merger: CarriageReturnMerger::new(),
            recombiner: SplitMarkerRecombiner::new(),
            matcher: Box::new(matcher),
            hints: Box::new(KnownIssueDetector::new()),
            clock: Box::new(SystemClock),
            console: Box::new(std::io::stdout()),
        }
    }

    pub fn with_matcher(mut self, matcher: impl PhaseMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn with_hints(mut self, hints: impl FailureHintDetector + 'static) -> Self {
        self.hints = Box::new(hints);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Where kernel dumps are written as they are detected.
    pub fn with_console(mut self, console: impl Write + Send + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    /// Baseline for the `[MM:SS]` prefix of section headers.
    pub fn relative_to(mut self, baseline: Option<DateTime<Utc>>) -> Self {
        self.relative_to = baseline;
        self
    }

    /// Resumes following from a section the caller already opened.
    pub fn with_starting_section(mut self, section: Section) -> Result<Self, TrackerError> {
        if !section.has_started() {
            return Err(TrackerError::UnstartedSection(section.id().to_string()));
        }
        self.install(section);
        Ok(self)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.current.as_ref()
    }

    pub fn history(&self) -> &[Section] {
        &self.history
    }

    pub fn phase(&self) -> Phase {
        self.current
            .as_ref()
            .map_or(Phase::Unknown, |section| section.phase())
    }

    pub fn known_issue(&self) -> Option<&KnownIssue> {
        self.hints.known_issue()
    }

    /// Processes one batch of records.
    ///
    /// Returns `true` when at least one record was real output, i.e. not a
    /// kernel dump, a carriage-return fragment or feedback noise. Fails with
    /// [`TrackerError::Timeout`] before touching the batch if the current
    /// section has exceeded its budget.
    pub fn feed(&mut self, mut records: Vec<LogRecord>) -> Result<bool, TrackerError> {
        self.watchdog()?;

        let mut alive = false;
        for record in records.iter_mut() {
            normalize::strip_trailing_crlf(record);

            if normalize::is_kernel_dump(record) {
                self.print_kernel_dump(record)?;
                continue;
            }
            if self.merger.merge(record) {
                continue;
            }
            if normalize::is_feedback_noise(record) {
                continue;
            }

            alive = true;
            self.manage_sections(record)?;
            if let Some(line) = self.format_record(record) {
                self.buffer.push(line);
            }
        }

        let phase = self.phase();
        self.hints.inspect(phase, &records);

        Ok(alive)
    }

    /// Fails when the current section has run longer than its phase budget.
    pub fn watchdog(&self) -> Result<(), TrackerError> {
        let Some(section) = &self.current else {
            return Ok(());
        };
        let budget = self.config.timeouts.budget_for(section.phase());
        let elapsed = section
            .elapsed_at(self.clock.now())
            .unwrap_or(TimeDelta::zero());
        if elapsed > budget {
            return Err(TrackerError::Timeout {
                section: section.id().to_string(),
                phase: section.phase(),
                budget,
            });
        }
        Ok(())
    }

    /// Ends the current section, buffering its end marker, and leaves the
    /// tracker without a current section.
    pub fn clear_current_section(&mut self) -> Result<(), TrackerError> {
        let Some(section) = self.current.as_mut() else {
            return Ok(());
        };
        if section.has_finished() {
            return Ok(());
        }
        let marker = section.end_at(self.clock.now())?;
        self.push_line(marker);
        if let Some(section) = self.current.take() {
            self.history.push(section);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffer)
    }

    /// Closes the stream: releases held fragments, ends the current section
    /// and returns everything still buffered.
    pub fn finish(mut self) -> Result<Vec<String>, TrackerError> {
        if let Some(fragment) = self.recombiner.take_held() {
            self.push_line(fragment);
        }
        if let Some(fragment) = self.merger.take_pending() {
            self.push_line(fragment);
        }
        self.clear_current_section()?;
        self.console.flush()?;
        Ok(self.flush())
    }

    fn push_line(&mut self, line: String) {
        if !line.is_empty() {
            self.buffer.push(line);
        }
    }

    fn install(&mut self, section: Section) {
        if let Some(old) = self.current.replace(section) {
            self.history.push(old);
        }
    }

    fn manage_sections(&mut self, record: &LogRecord) -> Result<(), TrackerError> {
        if matches!(record.msg, Message::Lines(_)) {
            log::debug!("Ignoring messages as list. Kernel dumps.");
            return Ok(());
        }
        let candidate = self.matcher.match_record(
            record,
            self.config.main_test_case.as_deref(),
            self.relative_to,
        );
        match candidate {
            Some(section) => self.update_section(section),
            None => Ok(()),
        }
    }

    fn update_section(&mut self, mut section: Section) -> Result<(), TrackerError> {
        // Several patterns may announce the same section, LAVA interleaves
        // kmsg with stdout/stderr.
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.id() == section.id())
        {
            return Ok(());
        }
        self.clear_current_section()?;
        let marker = section.start_at(self.clock.now())?;
        self.install(section);
        self.push_line(marker);
        Ok(())
    }

    fn format_record(&mut self, record: &mut LogRecord) -> Option<String> {
        let (prefix, suffix) = match record.lvl {
            Level::Results | Level::Feedback | Level::Debug => return None,
            Level::Warning | Level::Error => (FG_BOLD_RED, RESET),
            Level::Input => ("$ ", ""),
            Level::Target if !self.config.farm.is_reference() => {
                if self.config.farm.mangles_color_codes()
                    && let Some(text) = record.msg.as_text_mut()
                {
                    *text = repair_color_codes(text);
                }
                if let Some(recovered) = self.recombiner.process(record) {
                    self.buffer.push(recovered);
                }
                ("", "")
            }
            _ => ("", ""),
        };
        let line = format!("{prefix}{}{suffix}", record.msg);
        (!line.is_empty()).then_some(line)
    }

    fn print_kernel_dump(&mut self, record: &LogRecord) -> Result<(), TrackerError> {
        let now = self.clock.now();
        match &record.msg {
            Message::Text(text) => {
                writeln!(self.console, "{}", format_log_line(&bold(text), now))?;
            }
            Message::Lines(lines) => {
                for line in lines {
                    writeln!(self.console, "{}", format_log_line(&bold(line), now))?;
                }
            }
            Message::Structured(_) => {}
        }
        Ok(())
    }
}
