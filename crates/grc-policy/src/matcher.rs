//! Rule selection.
//!
//! [`RuleMatcher::applicable_rules`] filters on the type/environment match of
//! each rule. [`RuleMatcher::rules_for_context`] additionally applies the
//! document target, principal filters and active exceptions.

use time::OffsetDateTime;

use crate::context::PolicyContext;
use crate::document::{PolicyDocument, PolicyException, PrincipalMatch, Rule, RuleMatch, WILDCARD};

/// Target lists also accept this alias for "every value".
const TARGET_ANY: &str = "Any";

/// Selects and orders the rules that apply to a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleMatcher;

impl RuleMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Enabled rules matching the resource type and environment, ordered by
    /// ascending priority then id.
    pub fn applicable_rules<'a>(
        &self,
        document: &'a PolicyDocument,
        resource_type: &str,
        environment: &str,
    ) -> Vec<&'a Rule> {
        let mut rules: Vec<&Rule> = document
            .rules()
            .iter()
            .filter(|rule| rule.enabled && self.matches(&rule.selector, resource_type, environment))
            .collect();
        rules.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        rules
    }

    /// Applicable rules for a full request context.
    pub fn rules_for_context<'a>(
        &self,
        document: &'a PolicyDocument,
        context: &PolicyContext,
        now: OffsetDateTime,
    ) -> Vec<&'a Rule> {
        if !self.target_applies(document, &context.resource_type, &context.environment) {
            tracing::debug!(
                resource_type = %context.resource_type,
                environment = %context.environment,
                "Request outside policy target"
            );
            return Vec::new();
        }

        let exceptions = self.active_exceptions(document, context, now);

        self.applicable_rules(document, &context.resource_type, &context.environment)
            .into_iter()
            .filter(|rule| self.principal_matches(rule.selector.principal.as_ref(), context))
            .filter(|rule| match exceptions.iter().find(|e| e.covers_rule(&rule.id)) {
                Some(exception) => {
                    tracing::debug!(
                        rule_id = %rule.id,
                        exception_id = %exception.id,
                        "Rule waived by policy exception"
                    );
                    false
                }
                None => true,
            })
            .collect()
    }

    /// Returns `true` if the type and environment filters accept the request.
    #[must_use]
    pub fn matches(&self, selector: &RuleMatch, resource_type: &str, environment: &str) -> bool {
        filter_matches(&selector.resource.resource_type, resource_type)
            && filter_matches(&selector.environment, environment)
    }

    /// Returns `true` if the principal filter, if any, accepts the request.
    #[must_use]
    pub fn principal_matches(&self, filter: Option<&PrincipalMatch>, context: &PolicyContext) -> bool {
        let Some(filter) = filter else {
            return true;
        };

        let id_matches = filter
            .id
            .as_deref()
            .is_none_or(|id| context.principal_id.as_deref() == Some(id));
        let roles_match =
            filter.roles.is_empty() || filter.roles.iter().any(|role| context.has_role(role));

        id_matches && roles_match
    }

    /// Returns `true` if the document target accepts the request.
    #[must_use]
    pub fn target_applies(&self, document: &PolicyDocument, resource_type: &str, environment: &str) -> bool {
        document.target().is_none_or(|target| {
            target_list_matches(&target.resource_types, resource_type)
                && target_list_matches(&target.environments, environment)
        })
    }

    /// Unexpired exceptions whose match covers the request.
    pub fn active_exceptions<'a>(
        &self,
        document: &'a PolicyDocument,
        context: &PolicyContext,
        now: OffsetDateTime,
    ) -> Vec<&'a PolicyException> {
        document
            .exceptions()
            .iter()
            .filter(|exception| {
                if exception.is_expired(now) {
                    tracing::debug!(exception_id = %exception.id, "Policy exception expired");
                    return false;
                }
                self.matches(&exception.selector, &context.resource_type, &context.environment)
                    && self.principal_matches(exception.selector.principal.as_ref(), context)
            })
            .collect()
    }
}

fn filter_matches(filter: &str, value: &str) -> bool {
    filter == WILDCARD || filter == value
}

fn target_list_matches(list: &[String], value: &str) -> bool {
    list.is_empty()
        || list
            .iter()
            .any(|entry| entry == WILDCARD || entry == TARGET_ANY || entry == value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Effect, PolicySpec, PolicyTarget};
    use serde_json::json;
    use time::macros::datetime;

    fn document(rules: Vec<Rule>) -> PolicyDocument {
        PolicyDocument {
            spec: Some(PolicySpec {
                rules,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn context(resource_type: &str, environment: &str) -> PolicyContext {
        PolicyContext::builder()
            .action("create")
            .environment(environment)
            .resource_type(resource_type)
            .resource(json!({}))
            .principal("user-1", ["auditor"])
            .build()
            .unwrap()
    }

    fn ids(rules: &[&Rule]) -> Vec<String> {
        rules.iter().map(|r| r.id.clone()).collect()
    }

    const NOW: OffsetDateTime = datetime!(2026-06-01 00:00:00 UTC);

    #[test]
    fn test_wildcards_match_everything() {
        let doc = document(vec![Rule::new("any", 1, Effect::Deny)]);
        let matcher = RuleMatcher::new();

        for (rt, env) in [("Evidence", "prod"), ("Risk", "dev"), ("", "")] {
            assert_eq!(ids(&matcher.applicable_rules(&doc, rt, env)), vec!["any"]);
        }
    }

    #[test]
    fn test_literal_filters() {
        let doc = document(vec![
            Rule::new("evidence-prod", 1, Effect::Deny).matching("Evidence", "prod"),
            Rule::new("evidence-any", 2, Effect::Deny).matching("Evidence", "*"),
            Rule::new("risk-prod", 3, Effect::Deny).matching("Risk", "prod"),
        ]);
        let matcher = RuleMatcher::new();

        assert_eq!(
            ids(&matcher.applicable_rules(&doc, "Evidence", "prod")),
            vec!["evidence-prod", "evidence-any"]
        );
        assert_eq!(
            ids(&matcher.applicable_rules(&doc, "Evidence", "dev")),
            vec!["evidence-any"]
        );
        assert!(matcher.applicable_rules(&doc, "evidence", "prod").is_empty());
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let doc = document(vec![
            Rule::new("off", 1, Effect::Deny).disabled(),
            Rule::new("on", 2, Effect::Deny),
        ]);
        assert_eq!(
            ids(&RuleMatcher::new().applicable_rules(&doc, "Risk", "prod")),
            vec!["on"]
        );
    }

    #[test]
    fn test_ordering_by_priority_then_id() {
        let doc = document(vec![
            Rule::new("c", 50, Effect::Allow),
            Rule::new("b", 5, Effect::Allow),
            Rule::new("a", 50, Effect::Allow),
            Rule::new("z", 1, Effect::Allow),
        ]);
        assert_eq!(
            ids(&RuleMatcher::new().applicable_rules(&doc, "Risk", "prod")),
            vec!["z", "b", "a", "c"]
        );
    }

    #[test]
    fn test_principal_filter() {
        let mut by_role = Rule::new("auditors", 1, Effect::Allow);
        by_role.selector.principal = Some(PrincipalMatch {
            id: None,
            roles: vec!["admin".into(), "auditor".into()],
        });
        let mut by_id = Rule::new("someone-else", 2, Effect::Allow);
        by_id.selector.principal = Some(PrincipalMatch {
            id: Some("user-2".into()),
            roles: vec![],
        });
        let doc = document(vec![by_role, by_id]);

        let rules = RuleMatcher::new().rules_for_context(&doc, &context("Risk", "prod"), NOW);
        assert_eq!(ids(&rules), vec!["auditors"]);
    }

    #[test]
    fn test_target_restricts_document() {
        let mut doc = document(vec![Rule::new("r", 1, Effect::Deny)]);
        if let Some(spec) = doc.spec.as_mut() {
            spec.target = Some(PolicyTarget {
                resource_types: vec!["Evidence".into()],
                environments: vec![],
            });
        }
        let matcher = RuleMatcher::new();

        assert_eq!(
            matcher.rules_for_context(&doc, &context("Evidence", "prod"), NOW).len(),
            1
        );
        assert!(matcher.rules_for_context(&doc, &context("Risk", "prod"), NOW).is_empty());

        if let Some(spec) = doc.spec.as_mut() {
            spec.target = Some(PolicyTarget {
                resource_types: vec!["Any".into()],
                environments: vec!["prod".into()],
            });
        }
        assert!(matcher.target_applies(&doc, "Risk", "prod"));
        assert!(!matcher.target_applies(&doc, "Risk", "dev"));
    }

    #[test]
    fn test_exceptions_waive_rules_until_expiry() {
        let mut doc = document(vec![
            Rule::new("r1", 1, Effect::Deny),
            Rule::new("r2", 2, Effect::Deny),
        ]);
        if let Some(spec) = doc.spec.as_mut() {
            spec.exceptions = vec![PolicyException {
                id: "ex-1".into(),
                rule_ids: vec!["r1".into()],
                reason: Some("migration".into()),
                expires_at: Some(datetime!(2026-12-31 00:00:00 UTC)),
                selector: RuleMatch::default(),
            }];
        }
        let matcher = RuleMatcher::new();
        let ctx = context("Risk", "prod");

        assert_eq!(ids(&matcher.rules_for_context(&doc, &ctx, NOW)), vec!["r2"]);
        assert_eq!(
            ids(&matcher.rules_for_context(&doc, &ctx, datetime!(2027-01-01 00:00:00 UTC))),
            vec!["r1", "r2"]
        );
    }

    #[test]
    fn test_exception_match_is_scoped() {
        let mut doc = document(vec![Rule::new("r1", 1, Effect::Deny)]);
        let mut selector = RuleMatch::default();
        selector.resource.resource_type = "Evidence".into();
        if let Some(spec) = doc.spec.as_mut() {
            spec.exceptions = vec![PolicyException {
                id: "ex-evidence".into(),
                rule_ids: vec!["r1".into()],
                reason: None,
                expires_at: None,
                selector,
            }];
        }
        let matcher = RuleMatcher::new();

        assert!(matcher.rules_for_context(&doc, &context("Evidence", "prod"), NOW).is_empty());
        assert_eq!(
            matcher.rules_for_context(&doc, &context("Risk", "prod"), NOW).len(),
            1
        );
    }
}
