use std::path::PathBuf;

use chrono::TimeDelta;
use thiserror::Error;

use crate::section::{Phase, format_duration};

/// Lifecycle violations on a [`Section`](crate::section::Section).
///
/// These indicate an integration bug in the caller, not a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionError {
    #[error("ending section `{id}` that was never started")]
    NotStarted { id: String },
    #[error("section `{id}` has already finished")]
    AlreadyFinished { id: String },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The current section outlived the budget configured for its phase.
    #[error("section `{section}` ({phase}) has timed out after {}", format_duration(.budget))]
    Timeout {
        section: String,
        phase: Phase,
        budget: TimeDelta,
    },
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error("cannot follow logs beginning from unstarted section `{0}`")]
    UnstartedSection(String),
    #[error("failed to write console output")]
    Console(#[from] std::io::Error),
}

impl TrackerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackerError::Timeout { .. })
    }

    /// The exceeded budget, for timeout failures.
    pub fn timeout_budget(&self) -> Option<TimeDelta> {
        match self {
            TrackerError::Timeout { budget, .. } => Some(*budget),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value `{value}` for {var}: expected whole minutes")]
    InvalidEnv { var: String, value: String },
}
