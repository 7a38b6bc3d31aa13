/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Rule Matcher Module
//!
//! A small table of signature rules matched against container states,
//! events, and log lines to produce a local triage hint alongside the
//! collected bundle.
//!
//! The default table is embedded at compile time; an override file can
//! be supplied through `diagnosis.rules_path`. Rules are evaluated in
//! table order and the FIRST firing rule wins, so the table must be
//! ordered most-specific-first — reordering entries changes results.
//! Malformed rules and invalid regexes are skipped with a warning at
//! load time rather than failing startup.

use heimdall_models::models::bundle::EventRecord;
use heimdall_models::models::failure::ContainerStateSnapshot;
use heimdall_models::models::rules::{DiagnosisRule, RuleDiagnosis};
use regex::Regex;
use tracing::warn;

// Include the default rule table as a string constant
const DEFAULT_RULES: &str = include_str!("default_rules.json");

/// A compiled log/event matcher.
enum TextMatcher {
    /// Case-insensitive substring.
    Substring(String),
    /// Compiled regular expression.
    Pattern(Regex),
}

impl TextMatcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            TextMatcher::Substring(needle) => text.to_lowercase().contains(needle),
            TextMatcher::Pattern(re) => re.is_match(text),
        }
    }
}

/// Compiles a matcher string. `regex:` prefixes compile to a pattern;
/// `substr:` prefixes (and bare strings) become case-insensitive
/// substrings. Invalid regexes return None.
fn compile_matcher(rule_id: &str, raw: &str) -> Option<TextMatcher> {
    if let Some(pattern) = raw.strip_prefix("regex:") {
        match Regex::new(pattern) {
            Ok(re) => Some(TextMatcher::Pattern(re)),
            Err(e) => {
                warn!(
                    "Skipping invalid regex {:?} in rule '{}': {}",
                    pattern, rule_id, e
                );
                None
            }
        }
    } else {
        let needle = raw.strip_prefix("substr:").unwrap_or(raw);
        Some(TextMatcher::Substring(needle.to_lowercase()))
    }
}

struct CompiledRule {
    id: String,
    container_states: Vec<String>,
    logs: Vec<TextMatcher>,
    events: Vec<TextMatcher>,
    diagnosis: RuleDiagnosis,
}

impl CompiledRule {
    fn compile(rule: DiagnosisRule) -> Option<Self> {
        let container_states: Vec<String> = rule
            .matchers
            .container_states
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        let logs: Vec<TextMatcher> = rule
            .matchers
            .logs
            .iter()
            .filter_map(|m| compile_matcher(&rule.id, m))
            .collect();
        let events: Vec<TextMatcher> = rule
            .matchers
            .events
            .iter()
            .filter_map(|m| compile_matcher(&rule.id, m))
            .collect();

        if container_states.is_empty() && logs.is_empty() && events.is_empty() {
            warn!("Skipping rule '{}': no usable matchers", rule.id);
            return None;
        }

        Some(CompiledRule {
            id: rule.id,
            container_states,
            logs,
            events,
            diagnosis: rule.diagnosis,
        })
    }

    /// A rule fires if ANY of its declared sub-matchers matches.
    fn fires(
        &self,
        container_states: &[ContainerStateSnapshot],
        events: &[EventRecord],
        logs: &[String],
    ) -> bool {
        if !self.container_states.is_empty() {
            let hit = container_states.iter().any(|cs| {
                cs.reason.as_ref().is_some_and(|reason| {
                    let reason = reason.to_lowercase();
                    self.container_states.iter().any(|m| reason.contains(m))
                })
            });
            if hit {
                return true;
            }
        }

        if !self.events.is_empty() {
            let hit = events.iter().any(|ev| {
                let text = format!(
                    "{} {}",
                    ev.reason.as_deref().unwrap_or(""),
                    ev.message.as_deref().unwrap_or("")
                );
                self.events.iter().any(|m| m.matches(&text))
            });
            if hit {
                return true;
            }
        }

        if !self.logs.is_empty() {
            let hit = logs
                .iter()
                .any(|line| self.logs.iter().any(|m| m.matches(line)));
            if hit {
                return true;
            }
        }

        false
    }
}

/// The compiled rule table.
pub struct RuleTable {
    rules: Vec<CompiledRule>,
}

impl RuleTable {
    /// Loads the embedded default table.
    pub fn embedded() -> Self {
        Self::from_json(DEFAULT_RULES)
    }

    /// Loads the table from an override file, falling back to the
    /// embedded defaults when the file cannot be read.
    pub fn load(rules_path: Option<&str>) -> Self {
        match rules_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(contents) => Self::from_json(&contents),
                Err(e) => {
                    warn!(
                        "Failed to read rule table at {}: {}; using embedded defaults",
                        path, e
                    );
                    Self::embedded()
                }
            },
            None => Self::embedded(),
        }
    }

    /// Parses and compiles a JSON rule table. Malformed entries are
    /// skipped with a warning.
    pub fn from_json(json: &str) -> Self {
        let values: Vec<serde_json::Value> = match serde_json::from_str(json) {
            Ok(values) => values,
            Err(e) => {
                warn!("Rule table is not a JSON array: {}; no rules loaded", e);
                vec![]
            }
        };

        let mut rules = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<DiagnosisRule>(value) {
                Ok(rule) => {
                    if let Some(compiled) = CompiledRule::compile(rule) {
                        rules.push(compiled);
                    }
                }
                Err(e) => {
                    warn!("Skipping malformed rule at index {}: {}", index, e);
                }
            }
        }
        RuleTable { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the diagnosis of the first rule that fires, with its
    /// rule id. Table order is authoritative.
    pub fn match_rules(
        &self,
        container_states: &[ContainerStateSnapshot],
        events: &[EventRecord],
        logs: &[String],
    ) -> Option<(&str, &RuleDiagnosis)> {
        self.rules
            .iter()
            .find(|rule| rule.fires(container_states, events, logs))
            .map(|rule| (rule.id.as_str(), &rule.diagnosis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heimdall_models::models::failure::{ContainerKind, ContainerStateKind};

    fn waiting_state(name: &str, reason: &str) -> ContainerStateSnapshot {
        ContainerStateSnapshot {
            name: name.to_string(),
            kind: ContainerKind::Main,
            state: ContainerStateKind::Waiting,
            reason: Some(reason.to_string()),
        }
    }

    fn event(reason: &str, message: &str) -> EventRecord {
        EventRecord {
            event_type: Some("Warning".to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object_kind: Some("Pod".to_string()),
            involved_object_name: Some("p".to_string()),
            timestamp: None,
            uid: None,
            count: Some(1),
        }
    }

    #[test]
    fn test_embedded_table_loads() {
        let table = RuleTable::embedded();
        assert!(!table.is_empty());
    }

    #[test]
    fn test_container_state_matcher() {
        let table = RuleTable::embedded();
        let states = vec![waiting_state("api", "CrashLoopBackOff")];
        let (id, diagnosis) = table.match_rules(&states, &[], &[]).unwrap();
        assert_eq!(id, "crash-loop");
        assert!(diagnosis.summary.to_lowercase().contains("crash"));
    }

    #[test]
    fn test_log_regex_matcher() {
        let table = RuleTable::embedded();
        let logs = vec!["worker terminated: Out Of Memory".to_string()];
        let (id, _) = table.match_rules(&[], &[], &logs).unwrap();
        assert_eq!(id, "oom-killed");
    }

    #[test]
    fn test_event_substring_matcher_is_case_insensitive() {
        let table = RuleTable::from_json(
            r#"[{
                "id": "sched",
                "match": { "events": ["substr:failedscheduling"] },
                "diagnosis": { "summary": "unschedulable", "confidence": 0.8 }
            }]"#,
        );
        let events = vec![event("FailedScheduling", "0/3 nodes are available")];
        assert!(table.match_rules(&[], &events, &[]).is_some());
    }

    #[test]
    fn test_first_match_wins_in_table_order() {
        let table = RuleTable::from_json(
            r#"[
                { "id": "first", "match": { "logs": ["boom"] },
                  "diagnosis": { "summary": "first", "confidence": 0.5 } },
                { "id": "second", "match": { "logs": ["boom"] },
                  "diagnosis": { "summary": "second", "confidence": 0.9 } }
            ]"#,
        );
        let logs = vec!["BOOM happened".to_string()];
        let (id, diagnosis) = table.match_rules(&[], &[], &logs).unwrap();
        assert_eq!(id, "first");
        assert_eq!(diagnosis.summary, "first");
    }

    #[test]
    fn test_invalid_regex_is_skipped_not_fatal() {
        let table = RuleTable::from_json(
            r#"[{
                "id": "broken",
                "match": { "logs": ["regex:([unclosed"], "events": ["substr:ok"] },
                "diagnosis": { "summary": "broken regex rule", "confidence": 0.5 }
            }]"#,
        );
        // The rule survives on its remaining event matcher.
        assert_eq!(table.len(), 1);
        let events = vec![event("X", "ok fine")];
        assert!(table.match_rules(&[], &events, &[]).is_some());
    }

    #[test]
    fn test_malformed_rule_is_skipped() {
        let table = RuleTable::from_json(
            r#"[
                { "id": "no-diagnosis-field" },
                { "id": "good", "match": { "logs": ["fine"] },
                  "diagnosis": { "summary": "ok", "confidence": 0.5 } }
            ]"#,
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rule_with_no_matchers_is_dropped() {
        let table = RuleTable::from_json(
            r#"[{ "id": "empty", "diagnosis": { "summary": "x", "confidence": 0.1 } }]"#,
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_no_match_returns_none() {
        let table = RuleTable::embedded();
        assert!(table
            .match_rules(&[], &[], &["all quiet".to_string()])
            .is_none());
    }
}
