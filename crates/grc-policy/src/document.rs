//! Policy document model.
//!
//! A policy document is authored externally as YAML or JSON:
//!
//! ```yaml
//! metadata:
//!   name: grc-baseline
//!   version: 1.0.0
//! spec:
//!   defaultEffect: allow
//!   rules:
//!     - id: require-classification
//!       priority: 10
//!       effect: deny
//!       match:
//!         resource: { type: "*" }
//!         environment: prod
//!       when:
//!         - { path: metadata.labels.dataClassification, op: notMatches, value: "^(public|internal|confidential|restricted)$" }
//!       message: Every resource must carry a data classification
//!       remediation:
//!         hint: Set metadata.labels.dataClassification
//!       severity: high
//! ```
//!
//! Parsing is forward compatible: unknown fields are ignored. Structural
//! checks (ids, priorities, effects) live in [`crate::validation`] so that a
//! document can be parsed, inspected and rejected with a full report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Wildcard accepted by every match filter.
pub const WILDCARD: &str = "*";

/// Lowest (most precedent) rule priority.
pub const MIN_PRIORITY: i64 = 1;

/// Highest (least precedent) rule priority.
pub const MAX_PRIORITY: i64 = 10_000;

// =============================================================================
// Effects
// =============================================================================

/// Outcome category of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Explicitly permit the request.
    Allow,
    /// Reject the request.
    Deny,
    /// Permit the request after applying the rule's mutations.
    Mutate,
}

impl Effect {
    /// Returns the wire name of the effect.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Mutate => "mutate",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect applied when no rule decides the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultEffect {
    /// Permit requests no rule denied.
    #[default]
    Allow,
    /// Reject requests no rule permitted.
    Deny,
}

impl From<DefaultEffect> for Effect {
    fn from(value: DefaultEffect) -> Self {
        match value {
            DefaultEffect::Allow => Effect::Allow,
            DefaultEffect::Deny => Effect::Deny,
        }
    }
}

/// Severity declared on a rule.
///
/// Unrecognised severities are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Other(String),
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Other(value),
        }
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
            Self::Critical => f.write_str("critical"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// Root policy artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: PolicyMetadata,

    /// Rules and defaults. A document without a spec fails validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PolicySpec>,
}

/// Document metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMetadata {
    /// Document name.
    #[serde(default)]
    pub name: String,

    /// Semantic version of the document.
    #[serde(default)]
    pub version: String,

    /// Creation timestamp, defaulted to load time when absent.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,

    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Rules, exceptions and the default effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Effect applied when no rule denies.
    #[serde(default)]
    pub default_effect: DefaultEffect,

    /// Optional document-wide target filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PolicyTarget>,

    /// Rules in authoring order.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Time-bounded rule waivers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<PolicyException>,
}

/// Document-wide filter on resource types and environments.
///
/// Empty lists accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTarget {
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
}

impl PolicyDocument {
    /// Minimal document used when no policy has been authored.
    #[must_use]
    pub fn default_allow() -> Self {
        Self {
            metadata: PolicyMetadata {
                name: "default".to_string(),
                version: "0.0.0".to_string(),
                created_at: Some(OffsetDateTime::now_utc()),
                labels: BTreeMap::new(),
            },
            spec: Some(PolicySpec::default()),
        }
    }

    /// Parses a document in the given format.
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ParseError> {
        let document = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        Ok(document)
    }

    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ParseError> {
        Self::parse(content, DocumentFormat::Yaml)
    }

    /// Parses a JSON document.
    pub fn from_json(content: &str) -> Result<Self, ParseError> {
        Self::parse(content, DocumentFormat::Json)
    }

    /// Fills load-time defaults.
    #[must_use]
    pub fn with_load_defaults(mut self) -> Self {
        if self.metadata.created_at.is_none() {
            self.metadata.created_at = Some(OffsetDateTime::now_utc());
        }
        self
    }

    /// Effect applied when no rule decides.
    #[must_use]
    pub fn default_effect(&self) -> DefaultEffect {
        self.spec
            .as_ref()
            .map(|s| s.default_effect)
            .unwrap_or_default()
    }

    /// All rules in authoring order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        self.spec.as_ref().map_or(&[], |s| s.rules.as_slice())
    }

    /// All exceptions in authoring order.
    #[must_use]
    pub fn exceptions(&self) -> &[PolicyException] {
        self.spec.as_ref().map_or(&[], |s| s.exceptions.as_slice())
    }

    /// Document-wide target, if any.
    #[must_use]
    pub fn target(&self) -> Option<&PolicyTarget> {
        self.spec.as_ref().and_then(|s| s.target.as_ref())
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules().iter().find(|r| r.id == id)
    }
}

/// Serialization format of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Picks the format from a file extension. YAML unless the file ends in `.json`.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Malformed policy document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Rules
// =============================================================================

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique, non-empty identifier.
    #[serde(default)]
    pub id: String,

    /// 1 to 10000, lower evaluates first. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    /// Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Which requests the rule applies to.
    #[serde(default, rename = "match")]
    pub selector: RuleMatch,

    /// Conditions that must all pass for the rule to match.
    #[serde(default)]
    pub when: Vec<Condition>,

    /// Writes applied when a mutate rule matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutations: Vec<Mutation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Creates an enabled rule matching every resource type and environment.
    pub fn new(id: impl Into<String>, priority: i64, effect: Effect) -> Self {
        Self {
            id: id.into(),
            priority: Some(priority),
            effect: Some(effect),
            enabled: true,
            selector: RuleMatch::default(),
            when: Vec::new(),
            mutations: Vec::new(),
            message: None,
            remediation: None,
            severity: None,
        }
    }

    /// Restricts the rule to a resource type and environment.
    #[must_use]
    pub fn matching(mut self, resource_type: &str, environment: &str) -> Self {
        self.selector.resource.resource_type = resource_type.to_string();
        self.selector.environment = environment.to_string();
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.when.push(condition);
        self
    }

    /// Adds a mutation.
    #[must_use]
    pub fn mutation(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the remediation hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(Remediation { hint: hint.into() });
        self
    }

    /// Disables the rule.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Remediation hint, if any.
    #[must_use]
    pub fn remediation_hint(&self) -> Option<&str> {
        self.remediation.as_ref().map(|r| r.hint.as_str())
    }

    /// Sort key: priority then id. Rules without a priority sort last.
    pub(crate) fn order_key(&self) -> (i64, &str) {
        (self.priority.unwrap_or(i64::MAX), self.id.as_str())
    }
}

/// Request filter of a rule or exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    #[serde(default)]
    pub resource: ResourceMatch,

    /// Environment name or `*`.
    #[serde(default = "wildcard")]
    pub environment: String,

    /// Optional principal filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PrincipalMatch>,
}

impl Default for RuleMatch {
    fn default() -> Self {
        Self {
            resource: ResourceMatch::default(),
            environment: wildcard(),
            principal: None,
        }
    }
}

/// Resource-type filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMatch {
    /// Resource type name or `*`.
    #[serde(rename = "type", default = "wildcard")]
    pub resource_type: String,
}

impl Default for ResourceMatch {
    fn default() -> Self {
        Self {
            resource_type: wildcard(),
        }
    }
}

/// Principal filter. Both parts are optional; present parts must all pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalMatch {
    /// Exact principal id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The principal must hold at least one of these roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

/// Remediation guidance attached to a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    #[serde(default)]
    pub hint: String,
}

// =============================================================================
// Conditions and Mutations
// =============================================================================

/// One predicate over a resource.
///
/// The operator is kept as written so that unknown operators survive parsing
/// and fail closed at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: op.into(),
            value,
        }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::new(path, "exists", Value::Null)
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, "equals", value.into())
    }
}

/// One write instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub path: String,
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl Mutation {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: "set".to_string(),
            value: value.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: "remove".to_string(),
            value: Value::Null,
        }
    }
}

// =============================================================================
// Exceptions
// =============================================================================

/// Waiver removing rules from the applicable set for matching requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyException {
    pub id: String,

    /// Rules waived by this exception.
    #[serde(default)]
    pub rule_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The exception stops applying at this instant.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,

    #[serde(default, rename = "match")]
    pub selector: RuleMatch,
}

impl PolicyException {
    /// Returns `true` once the expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns `true` if the exception waives the given rule.
    #[must_use]
    pub fn covers_rule(&self, rule_id: &str) -> bool {
        self.rule_ids.iter().any(|id| id == rule_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const BASELINE: &str = r#"
metadata:
  name: grc-baseline
  version: 1.2.0
  createdAt: 2025-01-15T10:00:00Z
  owner: compliance-team
spec:
  defaultEffect: deny
  target:
    resourceTypes: [Evidence, Risk]
  rules:
    - id: r1
      priority: 10
      effect: deny
      match:
        resource:
          type: "*"
        environment: "*"
      when:
        - path: metadata.labels.dataClassification
          op: equals
          value: public
      message: Public data is not allowed
      remediation:
        hint: Reclassify the resource
      severity: critical
      owner: someone
    - id: r2
      priority: 5
      effect: mutate
      match:
        resource:
          type: Evidence
        environment: prod
        principal:
          roles: [auditor]
      mutations:
        - path: metadata.labels.reviewed
          op: set
          value: "true"
  exceptions:
    - id: ex-1
      ruleIds: [r1]
      reason: migration window
      expiresAt: 2030-01-01T00:00:00Z
"#;

    #[test]
    fn test_parse_yaml_document() {
        let doc = PolicyDocument::from_yaml(BASELINE).unwrap();

        assert_eq!(doc.metadata.name, "grc-baseline");
        assert_eq!(doc.metadata.version, "1.2.0");
        assert_eq!(
            doc.metadata.created_at,
            Some(datetime!(2025-01-15 10:00:00 UTC))
        );
        assert_eq!(doc.default_effect(), DefaultEffect::Deny);
        assert_eq!(doc.rules().len(), 2);

        let r1 = doc.rule("r1").unwrap();
        assert_eq!(r1.priority, Some(10));
        assert_eq!(r1.effect, Some(Effect::Deny));
        assert!(r1.enabled);
        assert_eq!(r1.selector.resource.resource_type, "*");
        assert_eq!(r1.when[0].value, json!("public"));
        assert_eq!(r1.remediation_hint(), Some("Reclassify the resource"));
        assert_eq!(r1.severity, Some(Severity::Critical));

        let r2 = doc.rule("r2").unwrap();
        assert_eq!(r2.selector.environment, "prod");
        assert_eq!(
            r2.selector.principal.as_ref().unwrap().roles,
            vec!["auditor".to_string()]
        );
        assert_eq!(r2.mutations[0], Mutation::set("metadata.labels.reviewed", "true"));

        let target = doc.target().unwrap();
        assert_eq!(target.resource_types, vec!["Evidence", "Risk"]);
        assert!(target.environments.is_empty());

        let exception = &doc.exceptions()[0];
        assert!(exception.covers_rule("r1"));
        assert!(!exception.is_expired(datetime!(2026-01-01 00:00:00 UTC)));
        assert!(exception.is_expired(datetime!(2031-01-01 00:00:00 UTC)));
    }

    #[test]
    fn test_parse_json_document() {
        let content = r#"{
            "metadata": {"name": "json-policy", "version": "1.0.0"},
            "spec": {
                "rules": [{"id": "a", "priority": 1, "effect": "allow", "extra": 42}]
            }
        }"#;
        let doc = PolicyDocument::from_json(content).unwrap();

        assert_eq!(doc.default_effect(), DefaultEffect::Allow);
        assert_eq!(doc.rules()[0].selector, RuleMatch::default());
        assert!(doc.metadata.created_at.is_none());
        assert!(doc.with_load_defaults().metadata.created_at.is_some());
    }

    #[test]
    fn test_missing_fields_are_preserved_as_absent() {
        let doc = PolicyDocument::from_yaml("spec:\n  rules:\n    - message: no id\n").unwrap();
        let rule = &doc.rules()[0];

        assert!(rule.id.is_empty());
        assert!(rule.priority.is_none());
        assert!(rule.effect.is_none());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(PolicyDocument::from_yaml("spec: [unclosed").is_err());
        assert!(PolicyDocument::from_json("{").is_err());
        assert!(PolicyDocument::from_yaml("spec:\n  rules:\n    - id: x\n      effect: block\n").is_err());
    }

    #[test]
    fn test_default_allow_document() {
        let doc = PolicyDocument::default_allow();

        assert_eq!(doc.default_effect(), DefaultEffect::Allow);
        assert!(doc.rules().is_empty());
        assert!(doc.spec.is_some());
    }

    #[test]
    fn test_unknown_severity_round_trips() {
        let severity: Severity = serde_json::from_value(json!("Blocker")).unwrap();
        assert_eq!(severity, Severity::Other("Blocker".to_string()));
        assert_eq!(serde_json::to_value(&severity).unwrap(), json!("Blocker"));

        let severity: Severity = serde_json::from_value(json!("HIGH")).unwrap();
        assert_eq!(severity, Severity::High);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("policy.json")),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("policy.yml")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("policy")),
            DocumentFormat::Yaml
        );
    }

    #[test]
    fn test_rule_order_key() {
        let rule = Rule::new("b", 5, Effect::Allow);
        assert_eq!(rule.order_key(), (5, "b"));

        let mut unprioritised = rule.clone();
        unprioritised.priority = None;
        assert_eq!(unprioritised.order_key().0, i64::MAX);
    }
}
