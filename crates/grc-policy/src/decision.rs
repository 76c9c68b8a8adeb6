//! Decisions and evaluation outcomes.

use std::time::Duration;

use serde::Serialize;

use crate::condition::ConditionResult;
use crate::document::{DefaultEffect, Effect, Mutation, Rule, Severity};
use crate::error::PolicyViolation;
use crate::mutation::MutationReport;

// =============================================================================
// Policy Decision
// =============================================================================

/// Outcome for one rule, or the final outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub effect: Effect,
    /// Rule that produced the decision. `None` when the default effect applied.
    pub matched_rule_id: Option<String>,
    pub message: Option<String>,
    pub remediation_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl PolicyDecision {
    /// Decision recorded for a rule whose conditions all passed.
    #[must_use]
    pub fn from_rule(rule: &Rule, effect: Effect) -> Self {
        Self {
            effect,
            matched_rule_id: Some(rule.id.clone()),
            message: rule.message.clone(),
            remediation_hint: rule.remediation_hint().map(str::to_string),
            severity: rule.severity.clone(),
        }
    }

    /// Decision used when no rule decided the request.
    #[must_use]
    pub fn default_effect(effect: DefaultEffect) -> Self {
        let message = match effect {
            DefaultEffect::Allow => "No rule denied the request",
            DefaultEffect::Deny => "No rule permitted the request",
        };
        Self {
            effect: effect.into(),
            matched_rule_id: None,
            message: Some(message.to_string()),
            remediation_hint: None,
            severity: None,
        }
    }

    /// Allow-through used when the engine itself failed.
    #[must_use]
    pub fn fail_open(reason: &str) -> Self {
        Self {
            effect: Effect::Allow,
            matched_rule_id: None,
            message: Some(format!("Policy evaluation failed, request allowed: {reason}")),
            remediation_hint: None,
            severity: None,
        }
    }

    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.effect == Effect::Deny
    }

    /// Converts a deny decision into the violation raised to callers.
    #[must_use]
    pub fn to_violation(&self, correlation_id: &str) -> PolicyViolation {
        PolicyViolation::new(
            self.message.clone(),
            self.matched_rule_id.clone(),
            self.remediation_hint.clone(),
            correlation_id,
        )
        .with_severity(self.severity.clone())
    }
}

/// Combines recorded decisions into the final decision.
///
/// First deny, else first mutate, else the default effect. Explicit allows
/// never override a deny default; under an allow default the first allow is
/// reported as the deciding rule.
#[must_use]
pub fn final_decision(decisions: &[PolicyDecision], default_effect: DefaultEffect) -> PolicyDecision {
    let first = |effect: Effect| decisions.iter().find(|d| d.effect == effect);

    first(Effect::Deny)
        .or_else(|| first(Effect::Mutate))
        .or_else(|| match default_effect {
            DefaultEffect::Allow => first(Effect::Allow),
            DefaultEffect::Deny => None,
        })
        .cloned()
        .unwrap_or_else(|| PolicyDecision::default_effect(default_effect))
}

// =============================================================================
// Evaluation Outcome
// =============================================================================

/// Conditions evaluated for one applicable rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub priority: Option<i64>,
    /// Whether every condition passed.
    pub matched: bool,
    pub conditions: Vec<ConditionResult>,
}

impl RuleEvaluation {
    /// Results of the conditions that failed.
    pub fn failed_conditions(&self) -> impl Iterator<Item = &ConditionResult> {
        self.conditions.iter().filter(|c| !c.passed)
    }
}

/// Full result of evaluating a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    /// Decisions of every matched rule, in evaluation order.
    pub decisions: Vec<PolicyDecision>,
    pub final_decision: PolicyDecision,
    /// Every applicable rule that was evaluated.
    pub evaluations: Vec<RuleEvaluation>,
    pub mutations: MutationReport,
    /// Set when the engine failed and allowed the request through.
    pub engine_error: Option<String>,
    /// Version of the policy document used, if one was available.
    pub policy_version: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl EvaluationOutcome {
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.final_decision.is_deny()
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !self.is_denied()
    }

    /// Returns `true` if the engine failed and the request was allowed through.
    #[must_use]
    pub fn is_fail_open(&self) -> bool {
        self.engine_error.is_some()
    }

    /// Ids of the rules that matched, in evaluation order.
    pub fn matched_rule_ids(&self) -> impl Iterator<Item = &str> {
        self.decisions
            .iter()
            .filter_map(|d| d.matched_rule_id.as_deref())
    }
}

// =============================================================================
// Validation Result
// =============================================================================

/// A deny rule that would fire for the resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationViolation {
    pub rule_id: String,
    pub message: String,
    pub remediation_hint: Option<String>,
    pub severity: Option<Severity>,
}

/// A mutate rule that would fire for the resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSuggestion {
    pub rule_id: String,
    pub message: Option<String>,
    pub mutations: Vec<Mutation>,
}

/// Non-raising pre-submission check of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// `true` when no deny rule would fire.
    pub is_valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub suggestions: Vec<MutationSuggestion>,
    /// `true` when the only findings are mutations the engine would apply.
    pub can_auto_fix: bool,
}

impl ValidationResult {
    #[must_use]
    pub fn new(violations: Vec<ValidationViolation>, suggestions: Vec<MutationSuggestion>) -> Self {
        let is_valid = violations.is_empty();
        Self {
            is_valid,
            can_auto_fix: is_valid && !suggestions.is_empty(),
            violations,
            suggestions,
        }
    }
}
