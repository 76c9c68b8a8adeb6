//! Structural validation of policy documents.
//!
//! Errors reject the document. Warnings are reported but the document is
//! still accepted.

use std::collections::HashSet;

use serde::Serialize;

use crate::condition::Operator;
use crate::document::{Effect, MAX_PRIORITY, MIN_PRIORITY, PolicyDocument};

/// Outcome of validating a policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Hard failures. Any entry rejects the document.
    pub errors: Vec<String>,
    /// Suspicious but accepted constructs.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if the document has no hard failures.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

/// Validates the structure of a policy document.
#[must_use]
pub fn validate_document(document: &PolicyDocument) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(spec) = &document.spec else {
        report.error("document has no spec".to_string());
        return report;
    };

    if spec.rules.is_empty() {
        report.warn(format!(
            "document has no rules; default effect '{}' applies to every request",
            Effect::from(spec.default_effect)
        ));
    }

    let mut seen = HashSet::new();
    for (index, rule) in spec.rules.iter().enumerate() {
        let blank_id = rule.id.trim().is_empty();
        let label = if blank_id {
            format!("rule #{}", index + 1)
        } else {
            format!("rule '{}'", rule.id)
        };

        if blank_id {
            report.error(format!("{label}: missing id"));
        } else if !seen.insert(rule.id.as_str()) {
            report.error(format!("{label}: duplicate id"));
        }

        match rule.priority {
            None => report.error(format!("{label}: missing priority")),
            Some(p) if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) => report.error(format!(
                "{label}: priority {p} outside [{MIN_PRIORITY}, {MAX_PRIORITY}]"
            )),
            Some(_) => {}
        }

        match rule.effect {
            None => report.error(format!("{label}: missing effect")),
            Some(Effect::Mutate) if rule.mutations.is_empty() => {
                report.warn(format!("{label}: mutate rule has no mutations"));
            }
            Some(_) => {}
        }

        for condition in &rule.when {
            match Operator::parse(&condition.op) {
                None => report.warn(format!(
                    "{label}: unknown operator '{}' on '{}' always fails",
                    condition.op, condition.path
                )),
                Some(op) if op.is_pattern() => {
                    if let Some(pattern) = condition.value.as_str() {
                        if let Err(e) = regex::Regex::new(pattern) {
                            report.warn(format!(
                                "{label}: invalid pattern on '{}': {e}",
                                condition.path
                            ));
                        }
                    } else {
                        report.warn(format!(
                            "{label}: pattern operand on '{}' is not a string",
                            condition.path
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        for mutation in &rule.mutations {
            if !matches!(mutation.op.as_str(), "set" | "remove") {
                report.warn(format!(
                    "{label}: unsupported mutation operator '{}' on '{}'",
                    mutation.op, mutation.path
                ));
            }
        }
    }

    for exception in &spec.exceptions {
        for rule_id in &exception.rule_ids {
            if !seen.contains(rule_id.as_str()) {
                report.warn(format!(
                    "exception '{}': references unknown rule '{rule_id}'",
                    exception.id
                ));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Condition, PolicySpec, Rule};
    use serde_json::json;

    fn document(rules: Vec<Rule>) -> PolicyDocument {
        PolicyDocument {
            spec: Some(PolicySpec {
                rules,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_document() {
        let report = validate_document(&document(vec![
            Rule::new("a", 1, Effect::Allow),
            Rule::new("b", 10_000, Effect::Deny),
        ]));
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_spec_is_error() {
        let report = validate_document(&PolicyDocument::default());
        assert!(!report.is_valid());
        assert_eq!(report.errors, vec!["document has no spec".to_string()]);
    }

    #[test]
    fn test_blank_id_is_labelled_by_position() {
        let report = validate_document(&document(vec![
            Rule::new("a", 1, Effect::Allow),
            Rule::new("  ", 2, Effect::Deny),
        ]));
        assert_eq!(report.errors, vec!["rule #2: missing id".to_string()]);
    }

    #[test]
    fn test_empty_rules_is_warning() {
        let report = validate_document(&document(vec![]));
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_rule_defects_are_errors() {
        let mut missing_effect = Rule::new("no-effect", 5, Effect::Allow);
        missing_effect.effect = None;
        let mut missing_priority = Rule::new("no-priority", 5, Effect::Allow);
        missing_priority.priority = None;

        let report = validate_document(&document(vec![
            Rule::new("", 5, Effect::Allow),
            Rule::new("low", 0, Effect::Deny),
            Rule::new("high", 10_001, Effect::Deny),
            missing_effect,
            missing_priority,
            Rule::new("low", 3, Effect::Allow),
        ]));

        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 6);
        assert!(report.errors[0].contains("missing id"));
        assert!(report.errors.iter().any(|e| e.contains("duplicate id")));
        assert!(report.errors.iter().any(|e| e.contains("priority 10001")));
    }

    #[test]
    fn test_suspicious_constructs_are_warnings() {
        let report = validate_document(&document(vec![
            Rule::new("m", 1, Effect::Mutate),
            Rule::new("op", 2, Effect::Deny)
                .when(Condition::new("a", "greaterThan", json!(1)))
                .when(Condition::new("b", "matches", json!("(unclosed")))
                .when(Condition::new("c", "notMatches", json!(7))),
        ]));

        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 4);
    }
}
