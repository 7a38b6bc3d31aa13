/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Diagnosis Rule Module
//!
//! Signature rules used for local triage hints. Each rule declares
//! matchers over container states, log lines, and events, and the
//! diagnosis to attach when any of them fires.
//!
//! Log and event matchers are strings with an optional scheme prefix:
//! `substr:` for a case-insensitive substring (the default when no
//! prefix is given) and `regex:` for a regular expression compiled once
//! at load time.

use serde::{Deserialize, Serialize};

/// Matchers for a single rule. A rule fires if any declared matcher
/// matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleMatchers {
    /// Container waiting/terminated reasons, matched case-insensitively.
    #[serde(default)]
    pub container_states: Vec<String>,
    /// Log line matchers (`substr:` or `regex:`).
    #[serde(default)]
    pub logs: Vec<String>,
    /// Event reason/message matchers (`substr:` or `regex:`).
    #[serde(default)]
    pub events: Vec<String>,
}

impl RuleMatchers {
    pub fn is_empty(&self) -> bool {
        self.container_states.is_empty() && self.logs.is_empty() && self.events.is_empty()
    }
}

/// The diagnosis attached when a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDiagnosis {
    /// One-line summary of what is wrong.
    pub summary: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Suggested remediation, when known.
    #[serde(default)]
    pub suggested_fix: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single signature rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisRule {
    /// Stable rule identifier.
    pub id: String,
    /// What the rule matches on.
    #[serde(rename = "match", default)]
    pub matchers: RuleMatchers,
    /// What to report when it fires.
    pub diagnosis: RuleDiagnosis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserialization() {
        let json = r#"{
            "id": "crashloop",
            "match": {
                "container_states": ["CrashLoopBackOff"],
                "logs": ["regex:panic: .+"]
            },
            "diagnosis": {
                "summary": "Container is crash-looping",
                "confidence": 0.9,
                "suggested_fix": "Inspect the previous container logs",
                "tags": ["crash"]
            }
        }"#;

        let rule: DiagnosisRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, "crashloop");
        assert_eq!(rule.matchers.container_states, vec!["CrashLoopBackOff"]);
        assert_eq!(rule.matchers.logs, vec!["regex:panic: .+"]);
        assert!(rule.matchers.events.is_empty());
        assert_eq!(rule.diagnosis.confidence, 0.9);
        assert_eq!(rule.diagnosis.tags, vec!["crash"]);
    }

    #[test]
    fn test_rule_deserialization_defaults() {
        let json = r#"{
            "id": "minimal",
            "diagnosis": { "summary": "something", "confidence": 0.5 }
        }"#;
        let rule: DiagnosisRule = serde_json::from_str(json).unwrap();
        assert!(rule.matchers.is_empty());
        assert!(rule.diagnosis.suggested_fix.is_none());
        assert!(rule.diagnosis.tags.is_empty());
    }
}
