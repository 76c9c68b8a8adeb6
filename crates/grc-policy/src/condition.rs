//! Condition evaluation.
//!
//! Every condition in a rule is evaluated, in declared order, and every
//! result is returned. Unknown operators fail closed.

use std::fmt;

use dashmap::DashMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Number, Value};

use crate::document::Condition;
use crate::path::{Navigable, PathResolver};

/// Supported condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Path resolves to a non-null value.
    Exists,
    /// Resolved value structurally equals the operand.
    Equals,
    NotEquals,
    /// Operand is a list containing the resolved value.
    In,
    NotIn,
    /// Resolved value's string form matches the operand pattern.
    Matches,
    NotMatches,
}

impl Operator {
    /// Parses an operator as written in a policy document.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "exists" => Some(Self::Exists),
            "equals" => Some(Self::Equals),
            "notEquals" => Some(Self::NotEquals),
            "in" => Some(Self::In),
            "notIn" => Some(Self::NotIn),
            "matches" => Some(Self::Matches),
            "notMatches" => Some(Self::NotMatches),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Matches => "matches",
            Self::NotMatches => "notMatches",
        }
    }

    /// Returns `true` for the regular-expression operators.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Matches | Self::NotMatches)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionResult {
    pub condition: Condition,
    pub passed: bool,
    /// Human-readable explanation, suitable for user feedback.
    pub message: String,
}

impl ConditionResult {
    fn new(condition: &Condition, passed: bool, message: String) -> Self {
        Self {
            condition: condition.clone(),
            passed,
            message,
        }
    }
}

/// Compiled patterns kept before the cache is flushed.
const MAX_CACHED_PATTERNS: usize = 256;

/// Evaluates declarative conditions against a resource.
pub struct ConditionEvaluator {
    resolver: PathResolver,
    patterns: DashMap<String, Regex>,
}

impl ConditionEvaluator {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            patterns: DashMap::new(),
        }
    }

    /// Evaluates every condition, without short-circuiting.
    pub fn evaluate(&self, conditions: &[Condition], resource: &dyn Navigable) -> Vec<ConditionResult> {
        conditions
            .iter()
            .map(|condition| self.evaluate_one(condition, resource))
            .collect()
    }

    /// Evaluates a single condition.
    pub fn evaluate_one(&self, condition: &Condition, resource: &dyn Navigable) -> ConditionResult {
        let path = condition.path.as_str();

        let Some(op) = Operator::parse(&condition.op) else {
            return ConditionResult::new(
                condition,
                false,
                format!("unsupported operator '{}' on '{path}'", condition.op),
            );
        };

        let actual = self.resolver.resolve(resource, path);
        let expected = &condition.value;

        let (passed, message) = match op {
            Operator::Exists => match actual {
                Some(_) => (true, format!("'{path}' is present")),
                None => (false, format!("'{path}' is missing")),
            },
            Operator::Equals | Operator::NotEquals => {
                let equal = values_equal(actual.as_ref(), expected);
                let passed = equal == (op == Operator::Equals);
                let message = if passed {
                    format!("'{path}' {op} {expected}")
                } else if equal {
                    format!("'{path}' must not be {expected}")
                } else {
                    format!("'{path}' is {}, expected {expected}", describe(actual.as_ref()))
                };
                (passed, message)
            }
            Operator::In | Operator::NotIn => match expected.as_array() {
                None => (false, format!("operand of '{op}' on '{path}' must be a list")),
                Some(items) => {
                    let contained = items.iter().any(|item| values_equal(actual.as_ref(), item));
                    let passed = contained == (op == Operator::In);
                    let verb = if contained { "is" } else { "is not" };
                    (
                        passed,
                        format!("'{path}' ({}) {verb} in {expected}", describe(actual.as_ref())),
                    )
                }
            },
            Operator::Matches | Operator::NotMatches => {
                self.evaluate_pattern(op, path, actual.as_ref(), expected)
            }
        };

        ConditionResult::new(condition, passed, message)
    }

    fn evaluate_pattern(
        &self,
        op: Operator,
        path: &str,
        actual: Option<&Value>,
        expected: &Value,
    ) -> (bool, String) {
        let Some(text) = actual.and_then(string_form) else {
            return (
                false,
                format!("'{path}' ({}) has no string form to match", describe(actual)),
            );
        };
        let Some(pattern) = expected.as_str() else {
            return (false, format!("pattern for '{path}' must be a string"));
        };
        let regex = match self.pattern(pattern) {
            Ok(regex) => regex,
            Err(e) => return (false, format!("invalid pattern '{pattern}' on '{path}': {e}")),
        };

        let is_match = regex.is_match(&text);
        let passed = is_match == (op == Operator::Matches);
        let verb = if is_match { "matches" } else { "does not match" };
        (passed, format!("'{path}' (\"{text}\") {verb} /{pattern}/"))
    }

    fn pattern(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(pattern)?;
        if self.patterns.len() >= MAX_CACHED_PATTERNS {
            self.patterns.clear();
        }
        self.patterns.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

/// Structural equality with numeric values compared by magnitude.
///
/// An absent value equals `null`.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(actual) => json_equal(actual, expected),
    }
}

fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Integers compare exactly; `f64` is used only when either side is a float.
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if x.is_f64() || y.is_f64() {
        return match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    match (integer(x), integer(y)) {
        (Some(x), Some(y)) => x == y,
        _ => x == y,
    }
}

fn integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn string_form(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "absent".to_string(), Value::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(PathResolver::default())
    }

    fn resource() -> Value {
        json!({
            "metadata": {"labels": {"dataClassification": "public", "tier": 2}},
            "owner": "alice",
            "tags": ["sox", "gdpr"]
        })
    }

    fn check(op: &str, path: &str, value: Value) -> ConditionResult {
        evaluator().evaluate_one(&Condition::new(path, op, value), &resource())
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("notMatches"), Some(Operator::NotMatches));
        assert_eq!(Operator::parse("NOTMATCHES"), None);
        assert_eq!(Operator::In.to_string(), "in");
        assert!(Operator::Matches.is_pattern());
    }

    #[test]
    fn test_exists() {
        assert!(check("exists", "owner", Value::Null).passed);
        let missing = check("exists", "approver", Value::Null);
        assert!(!missing.passed);
        assert_eq!(missing.message, "'approver' is missing");
    }

    #[test]
    fn test_equals_and_not_equals() {
        assert!(check("equals", "metadata.labels.dataClassification", json!("public")).passed);
        assert!(!check("equals", "metadata.labels.dataClassification", json!("internal")).passed);
        assert!(check("equals", "metadata.labels.tier", json!(2.0)).passed);
        assert!(check("equals", "approver", Value::Null).passed);
        assert!(check("notEquals", "owner", json!("bob")).passed);
        assert!(!check("notEquals", "owner", json!("alice")).passed);
        assert!(check("equals", "tags", json!(["sox", "gdpr"])).passed);
    }

    #[test]
    fn test_in_and_not_in() {
        assert!(check("in", "owner", json!(["alice", "bob"])).passed);
        assert!(!check("in", "owner", json!(["carol"])).passed);
        assert!(check("notIn", "owner", json!(["carol"])).passed);
        assert!(!check("in", "owner", json!("alice")).passed);
        assert!(!check("notIn", "owner", json!("alice")).passed);
    }

    #[test]
    fn test_matches_and_not_matches() {
        assert!(check("matches", "owner", json!("^al")).passed);
        assert!(!check("matches", "owner", json!("^bo")).passed);
        assert!(check("notMatches", "owner", json!("^bo")).passed);
        assert!(check("matches", "metadata.labels.tier", json!("^[0-9]+$")).passed);
    }

    #[test]
    fn test_pattern_operators_fail_on_non_string_operands() {
        assert!(!check("notMatches", "approver", json!("^x")).passed);
        assert!(!check("notMatches", "tags", json!("^x")).passed);
        assert!(!check("notMatches", "owner", json!(5)).passed);
        let invalid = check("notMatches", "owner", json!("(unclosed"));
        assert!(!invalid.passed);
        assert!(invalid.message.contains("invalid pattern"));
    }

    #[test]
    fn test_unknown_operator_fails_closed() {
        let result = check("greaterThan", "metadata.labels.tier", json!(1));
        assert!(!result.passed);
        assert!(result.message.contains("unsupported operator 'greaterThan'"));
    }

    #[test]
    fn test_all_conditions_are_evaluated() {
        let conditions = vec![
            Condition::exists("approver"),
            Condition::new("owner", "bogus", Value::Null),
            Condition::equals("owner", "alice"),
        ];
        let results = evaluator().evaluate(&conditions, &resource());

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.passed).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(results[2].condition, conditions[2]);
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        let evaluator = evaluator();
        let condition = Condition::new("owner", "matches", json!("^a"));
        evaluator.evaluate_one(&condition, &resource());
        evaluator.evaluate_one(&condition, &resource());
        assert_eq!(evaluator.patterns.len(), 1);
    }

    #[test]
    fn test_pattern_cache_is_bounded() {
        let evaluator = evaluator();
        for i in 0..MAX_CACHED_PATTERNS + 10 {
            let condition = Condition::new("owner", "matches", json!(format!("^a{{0,{i}}}")));
            assert!(evaluator.evaluate_one(&condition, &resource()).passed);
        }
        assert!(evaluator.patterns.len() <= MAX_CACHED_PATTERNS);
        assert!(!evaluator.patterns.is_empty());
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let evaluator = evaluator();
        let resource = json!({"n": 9007199254740992u64, "big": u64::MAX, "neg": -3});

        let result = evaluator.evaluate_one(&Condition::equals("n", 9007199254740993u64), &resource);
        assert!(!result.passed);
        assert!(evaluator.evaluate_one(&Condition::equals("n", 9007199254740992u64), &resource).passed);
        assert!(evaluator.evaluate_one(&Condition::equals("big", u64::MAX), &resource).passed);
        assert!(!evaluator.evaluate_one(&Condition::equals("big", u64::MAX - 1), &resource).passed);
        assert!(evaluator.evaluate_one(&Condition::equals("neg", -3.0), &resource).passed);
        assert!(evaluator.evaluate_one(&Condition::new("n", "notEquals", json!(9007199254740993u64)), &resource).passed);
    }
}
