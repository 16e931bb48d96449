//! Tracker configuration: farm identity, main test case and phase budgets.
//!
//! Values come from a JSON file, then the job environment, then the CLI.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::section::Phase;

/// The LAVA lab the log stream comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Farm {
    /// Reference farm; its target output needs no repair.
    Collabora,
    /// Runs an older LAVA that drops the escape byte of color codes.
    Lima,
    Other(String),
}

impl Farm {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "collabora" => Farm::Collabora,
            "lima" => Farm::Lima,
            other => Farm::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Farm::Collabora => "collabora",
            Farm::Lima => "lima",
            Farm::Other(name) => name,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Farm::Collabora)
    }

    pub fn mangles_color_codes(&self) -> bool {
        matches!(self, Farm::Lima)
    }
}

impl Default for Farm {
    fn default() -> Self {
        Farm::Other("unknown".to_string())
    }
}

impl From<String> for Farm {
    fn from(name: String) -> Self {
        Farm::from_name(&name)
    }
}

impl From<Farm> for String {
    fn from(farm: Farm) -> Self {
        farm.name().to_string()
    }
}

/// Per-phase watchdog budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutBudgets {
    /// Entries given in a config file override the defaults one by one.
    #[serde(deserialize_with = "merge_default_phases")]
    pub phases: BTreeMap<Phase, u64>,
    pub fallback_secs: u64,
}

impl Default for TimeoutBudgets {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        let phases = BTreeMap::from([
            (Phase::LavaSubmit, 5 * MINUTE),
            (Phase::LavaQueue, 24 * 60 * MINUTE),
            (Phase::LavaDeploy, 5 * MINUTE),
            (Phase::LavaBoot, 5 * MINUTE),
            (Phase::TestSuite, 60 * MINUTE),
            (Phase::TestCase, 60 * MINUTE),
            (Phase::LavaPostProcessing, 5 * MINUTE),
        ]);
        Self {
            phases,
            fallback_secs: 10 * MINUTE,
        }
    }
}

impl TimeoutBudgets {
    /// Budget for `phase`, or the fallback when none is configured.
    pub fn budget_for(&self, phase: Phase) -> TimeDelta {
        let secs = self.phases.get(&phase).copied().unwrap_or(self.fallback_secs);
        secs_to_delta(secs)
    }

    pub fn fallback(&self) -> TimeDelta {
        secs_to_delta(self.fallback_secs)
    }

    pub fn set(&mut self, phase: Phase, budget: TimeDelta) {
        self.phases
            .insert(phase, budget.num_seconds().max(0) as u64);
    }
}

fn merge_default_phases<'de, D>(deserializer: D) -> Result<BTreeMap<Phase, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<Phase, u64>::deserialize(deserializer)?;
    let mut phases = TimeoutBudgets::default().phases;
    phases.extend(overrides);
    Ok(phases)
}

fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub farm: Farm,
    /// Section id of the job's main test case. Its markers are not emitted,
    /// the CI job itself already frames it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_test_case: Option<String>,
    pub timeouts: TimeoutBudgets,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded tracker config from {:?}", path);
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlays `FARM` and the `*_TIMEOUT` job variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    pub fn apply_vars(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(farm) = lookup("FARM") {
            self.farm = Farm::from_name(&farm);
        }
        let minute_vars: [(&str, &[Phase]); 3] = [
            ("LAVA_BOOT_TIMEOUT", &[Phase::LavaBoot]),
            ("JOB_TIMEOUT", &[Phase::TestCase, Phase::TestSuite]),
            ("LAVA_POST_PROCESSING_TIMEOUT", &[Phase::LavaPostProcessing]),
        ];
        for (var, phases) in minute_vars {
            let Some(value) = lookup(var) else {
                continue;
            };
            let minutes: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: value.clone(),
            })?;
            for phase in phases {
                self.timeouts.phases.insert(*phase, minutes.saturating_mul(60));
            }
        }
        Ok(())
    }
}
