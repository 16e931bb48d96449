//! Detection of known infrastructure failures in the log stream.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::{Level, LogRecord};
use crate::section::Phase;

static R8152_TX_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"r8152 \S+ eth0: Tx status -71").expect("valid regex"));

static NFS_NOT_RESPONDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"nfs: server \d+\.\d+\.\d+\.\d+ not responding, still trying")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownIssue {
    pub message: String,
}

impl fmt::Display for KnownIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Found known issue: {}", self.message)
    }
}

/// Inspects each fed batch for failure signatures.
///
/// Findings are kept by the detector; the tracker never acts on them.
pub trait FailureHintDetector {
    fn inspect(&mut self, phase: Phase, records: &[LogRecord]);

    fn known_issue(&self) -> Option<&KnownIssue> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHints;

impl FailureHintDetector for NoHints {
    fn inspect(&mut self, _phase: Phase, _records: &[LogRecord]) {}
}

/// Recognises network failures on r8152 adapters and forced reboots.
#[derive(Debug, Default)]
pub struct KnownIssueDetector {
    r8152_streak: u32,
    issue: Option<KnownIssue>,
}

impl KnownIssueDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_issue(&mut self, message: &str) {
        if self.issue.is_some() {
            return;
        }
        log::warn!("Found known issue: {message}");
        self.issue = Some(KnownIssue {
            message: message.to_string(),
        });
    }

    fn detect_r8152_issue(&mut self, phase: Phase, record: &LogRecord, text: &str) {
        if matches!(phase, Phase::LavaBoot | Phase::TestCase)
            && matches!(record.lvl, Level::Feedback | Level::Target)
        {
            if R8152_TX_ERROR.is_match(text) {
                self.r8152_streak += 1;
                return;
            }
            if self.r8152_streak == 1 && NFS_NOT_RESPONDING.is_match(text) {
                self.record_issue("Probable network issue failure encountered, retrying the job");
            }
        }
        self.r8152_streak = 0;
    }

    fn detect_forced_reboot(&mut self, phase: Phase, record: &LogRecord, text: &str) {
        if phase == Phase::TestCase
            && record.lvl == Level::Feedback
            && text.starts_with("Reboot requested")
        {
            self.record_issue("Forced reboot detected during test phase, failing the job...");
        }
    }
}

impl FailureHintDetector for KnownIssueDetector {
    fn inspect(&mut self, phase: Phase, records: &[LogRecord]) {
        for record in records {
            let Some(text) = record.text() else {
                continue;
            };
            self.detect_r8152_issue(phase, record, text);
            self.detect_forced_reboot(phase, record, text);
        }
    }

    fn known_issue(&self) -> Option<&KnownIssue> {
        self.issue.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX_ERROR: &str = "[  100.000000] r8152 2-1.3:1.0 eth0: Tx status -71";
    const NFS: &str = "[  101.000000] nfs: server 192.168.201.1 not responding, still trying";

    fn target(msg: &str) -> LogRecord {
        LogRecord::new(Level::Target, msg)
    }

    #[test]
    fn test_r8152_followed_by_nfs() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(Phase::TestCase, &[target(TX_ERROR), target(NFS)]);
        let issue = detector.known_issue().unwrap();
        assert!(issue.message.contains("network issue"));
        assert!(issue.to_string().starts_with("Found known issue"));
    }

    #[test]
    fn test_r8152_streak_across_batches() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(Phase::LavaBoot, &[target(TX_ERROR)]);
        detector.inspect(Phase::LavaBoot, &[target(NFS)]);
        assert!(detector.known_issue().is_some());
    }

    #[test]
    fn test_r8152_reset_by_unrelated_line() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(
            Phase::TestCase,
            &[target(TX_ERROR), target("something else"), target(NFS)],
        );
        assert!(detector.known_issue().is_none());
    }

    #[test]
    fn test_r8152_requires_single_error() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(
            Phase::TestCase,
            &[target(TX_ERROR), target(TX_ERROR), target(NFS)],
        );
        assert!(detector.known_issue().is_none());
    }

    #[test]
    fn test_r8152_ignored_outside_boot_and_test() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(Phase::LavaDeploy, &[target(TX_ERROR), target(NFS)]);
        assert!(detector.known_issue().is_none());
    }

    #[test]
    fn test_forced_reboot() {
        let mut detector = KnownIssueDetector::new();
        let reboot = LogRecord::new(Level::Feedback, "Reboot requested by the test").with_ns("dut");
        detector.inspect(Phase::LavaBoot, std::slice::from_ref(&reboot));
        assert!(detector.known_issue().is_none());
        detector.inspect(Phase::TestCase, &[reboot]);
        assert!(detector.known_issue().unwrap().message.contains("Forced reboot"));
    }

    #[test]
    fn test_first_issue_is_kept() {
        let mut detector = KnownIssueDetector::new();
        detector.inspect(Phase::TestCase, &[target(TX_ERROR), target(NFS)]);
        let reboot = LogRecord::new(Level::Feedback, "Reboot requested");
        detector.inspect(Phase::TestCase, &[reboot]);
        assert!(detector.known_issue().unwrap().message.contains("network"));
    }
}
