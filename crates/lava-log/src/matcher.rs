//! Mapping raw records to new sections.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::TimeoutBudgets;
use crate::record::{Level, LogRecord};
use crate::section::{Phase, Section, format_duration};

/// Decides whether a record opens a new phase of the job.
pub trait PhaseMatcher {
    /// Returns the section the record opens, or `None` if it opens none.
    ///
    /// `main_test_case` names the section whose markers the CI job already
    /// provides; `relative_to` is the baseline for elapsed-time prefixes.
    fn match_record(
        &self,
        record: &LogRecord,
        main_test_case: Option<&str>,
        relative_to: Option<DateTime<Utc>>,
    ) -> Option<Section>;
}

/// One regex-driven section detection rule.
///
/// `{}` placeholders in the templates are filled with the capture groups, in order.
#[derive(Debug, Clone)]
pub struct SectionRule {
    pattern: Regex,
    levels: Vec<Level>,
    id_template: String,
    header_template: String,
    phase: Phase,
    collapsed: bool,
}

impl SectionRule {
    pub fn new(
        pattern: &str,
        levels: &[Level],
        id_template: &str,
        header_template: &str,
        phase: Phase,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            levels: levels.to_vec(),
            id_template: id_template.to_string(),
            header_template: header_template.to_string(),
            phase,
            collapsed: false,
        })
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    fn to_section(
        &self,
        record: &LogRecord,
        main_test_case: Option<&str>,
        relative_to: Option<DateTime<Utc>>,
        budgets: &TimeoutBudgets,
    ) -> Option<Section> {
        if !self.levels.contains(&record.lvl) {
            return None;
        }
        let caps = self.pattern.captures(record.text()?)?;
        let groups: Vec<&str> = caps
            .iter()
            .skip(1)
            .map(|m| m.map_or("", |m| m.as_str()))
            .collect();

        let id = fill_template(&self.id_template, &groups);
        // GitLab ignores markers without an id.
        if id.trim().is_empty() {
            log::debug!("Ignoring section without id: {:?}", record.text());
            return None;
        }
        let header = fill_template(&self.header_template, &groups);
        let is_main_test_case = main_test_case == Some(id.as_str());
        let budget = format_duration(&budgets.budget_for(self.phase));

        Some(
            Section::new(&id, format!("{header} - Timeout: {budget}"), self.phase)
                .collapsed(self.collapsed)
                .suppress_start(is_main_test_case)
                .suppress_end(is_main_test_case)
                .relative_to(relative_to),
        )
    }
}

fn fill_template(template: &str, groups: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut groups = groups.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        out.push_str(groups.next().copied().unwrap_or(""));
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// The detection rules for LAVA's lava-test-shell signals and action starts.
pub fn default_rules() -> Vec<SectionRule> {
    let rule = |pattern: &str, levels: &[Level], id: &str, header: &str, phase: Phase| {
        SectionRule::new(pattern, levels, id, header, phase).expect("valid regex")
    };
    vec![
        rule(
            r"<?STARTTC>? ([^>]*)",
            &[Level::Target, Level::Debug],
            "{}",
            "test_case {}",
            Phase::TestCase,
        ),
        rule(
            r"<?STARTRUN>? ([^>]*)",
            &[Level::Debug],
            "{}",
            "test_suite {}",
            Phase::TestSuite,
        ),
        rule(
            r"ENDTC>? ([^>]+)",
            &[Level::Target, Level::Debug],
            "post-{}",
            "Post test_case {}",
            Phase::LavaPostProcessing,
        )
        .collapsed(true),
        rule(
            r"start: 1 (\S+) \(timeout ([^)]+)\)",
            &[Level::Info],
            "deploy-{}",
            "Deploying via {}",
            Phase::LavaDeploy,
        )
        .collapsed(true),
        rule(
            r"start: 2 (\S+) \(timeout ([^)]+)\)",
            &[Level::Info],
            "boot-{}",
            "Booting via {}",
            Phase::LavaBoot,
        )
        .collapsed(true),
    ]
}

/// Tries each rule in order; the first match wins.
#[derive(Debug, Clone)]
pub struct RegexPhaseMatcher {
    rules: Vec<SectionRule>,
    budgets: TimeoutBudgets,
}

impl RegexPhaseMatcher {
    pub fn new(rules: Vec<SectionRule>, budgets: TimeoutBudgets) -> Self {
        Self { rules, budgets }
    }

    pub fn with_default_rules(budgets: TimeoutBudgets) -> Self {
        Self::new(default_rules(), budgets)
    }
}

impl PhaseMatcher for RegexPhaseMatcher {
    fn match_record(
        &self,
        record: &LogRecord,
        main_test_case: Option<&str>,
        relative_to: Option<DateTime<Utc>>,
    ) -> Option<Section> {
        self.rules
            .iter()
            .find_map(|rule| rule.to_section(record, main_test_case, relative_to, &self.budgets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Message;

    fn matcher() -> RegexPhaseMatcher {
        RegexPhaseMatcher::with_default_rules(TimeoutBudgets::default())
    }

    #[test]
    fn test_fill_template() {
        assert_eq!(fill_template("post-{}", &["x"]), "post-x");
        assert_eq!(fill_template("{} and {}", &["a"]), "a and ");
        assert_eq!(fill_template("plain", &["a"]), "plain");
    }

    #[test]
    fn test_start_test_case() {
        let record = LogRecord::new(Level::Target, "<LAVA_SIGNAL_STARTTC mesa-ci_iris-kbl>");
        let section = matcher().match_record(&record, None, None).unwrap();
        assert_eq!(section.id(), "mesa-ci_iris-kbl");
        assert_eq!(section.phase(), Phase::TestCase);
        assert_eq!(section.header(), "test_case mesa-ci_iris-kbl - Timeout: 1:00:00");
        assert!(!section.has_started());
    }

    #[test]
    fn test_end_test_case_is_collapsed_post_processing() {
        let record = LogRecord::new(Level::Debug, "<LAVA_SIGNAL_ENDTC mesa-ci_iris-kbl>");
        let mut section = matcher().match_record(&record, None, None).unwrap();
        assert_eq!(section.id(), "post-mesa-ci_iris-kbl");
        assert_eq!(section.phase(), Phase::LavaPostProcessing);
        let marker = section.start().unwrap();
        assert!(marker.contains("[collapsed=true]"));
    }

    #[test]
    fn test_test_suite_only_on_debug() {
        let m = matcher();
        let debug = LogRecord::new(Level::Debug, "<STARTRUN> 0_mesa 5971831_1.3.2.3.1");
        let section = m.match_record(&debug, None, None).unwrap();
        assert_eq!(section.phase(), Phase::TestSuite);
        assert_eq!(section.id(), "0_mesa-5971831_1-3-2-3-1");

        let target = LogRecord::new(Level::Target, "<STARTRUN> 0_mesa 5971831_1.3.2.3.1");
        assert!(m.match_record(&target, None, None).is_none());
    }

    #[test]
    fn test_boot_action() {
        let record = LogRecord::new(
            Level::Info,
            "start: 2 depthcharge-action (timeout 00:04:19) [common]",
        );
        let section = matcher().match_record(&record, None, None).unwrap();
        assert_eq!(section.id(), "boot-depthcharge-action");
        assert_eq!(section.phase(), Phase::LavaBoot);
        assert!(section.header().starts_with("Booting via depthcharge-action"));
    }

    #[test]
    fn test_main_test_case_is_suppressed() {
        let record = LogRecord::new(Level::Target, "<LAVA_SIGNAL_STARTTC mesa-ci>");
        let mut section = matcher()
            .match_record(&record, Some("mesa-ci"), None)
            .unwrap();
        assert_eq!(section.start().unwrap(), "");
        assert_eq!(section.end().unwrap(), "");
    }

    #[test]
    fn test_signal_without_name_is_ignored() {
        let m = matcher();
        for text in ["<LAVA_SIGNAL_STARTTC >", "<LAVA_SIGNAL_STARTTC   >"] {
            let record = LogRecord::new(Level::Target, text);
            assert!(m.match_record(&record, None, None).is_none(), "{text}");
        }
    }

    #[test]
    fn test_non_text_and_plain_records_do_not_match() {
        let m = matcher();
        let burst = LogRecord::new(
            Level::Target,
            Message::Lines(vec!["<LAVA_SIGNAL_STARTTC x>".into()]),
        );
        assert!(m.match_record(&burst, None, None).is_none());
        let plain = LogRecord::new(Level::Target, "just output");
        assert!(m.match_record(&plain, None, None).is_none());
    }
}
