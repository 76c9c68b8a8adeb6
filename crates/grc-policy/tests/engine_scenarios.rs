use std::sync::Arc;

use grc_policy::path::ResourceMetadata;
use grc_policy::{
    DocumentFormat, Effect, MemoryAuditSink, MutationError, PathError, PathResolver,
    PolicyContext, PolicyEngine, PolicyStore, ResourceWrapper, StaticPolicySource, AuditLogger,
    Mutation, MutationApplier,
};
use serde_json::{Value, json};

const CLASSIFICATION_RULES: &str = r#"
metadata:
  name: classification
  version: "1.0.0"
  createdAt: "2026-01-15T09:00:00Z"
spec:
  defaultEffect: allow
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
      message: Public data classification is not permitted
      remediation:
        hint: Set dataClassification to internal or confidential
      severity: high
    - id: r2
      priority: 5
      effect: allow
      match:
        resource:
          type: "*"
        environment: "*"
      when: []
"#;

fn engine(content: &str) -> (Arc<StaticPolicySource>, PolicyEngine, Arc<MemoryAuditSink>) {
    let source = Arc::new(StaticPolicySource::yaml(content));
    let store = Arc::new(PolicyStore::new(source.clone()));
    let sink = Arc::new(MemoryAuditSink::new());
    let audit = Arc::new(AuditLogger::new().with_sink(sink.clone()));
    (source, PolicyEngine::new(store, PathResolver::default(), audit), sink)
}

fn context(resource_type: &str, environment: &str, resource: ResourceWrapper) -> PolicyContext {
    PolicyContext::builder()
        .resource_type(resource_type)
        .action("create")
        .environment(environment)
        .resource(resource)
        .tenant("tenant-a")
        .principal("user-7", ["compliance-officer"])
        .build()
        .unwrap()
}

fn evidence(classification: &str) -> ResourceWrapper {
    ResourceWrapper::new("ev-1", "Evidence")
        .with_title("Q3 access review")
        .with_label("dataClassification", classification)
}

#[tokio::test]
async fn public_resource_is_denied_by_r1() {
    let (_, engine, sink) = engine(CLASSIFICATION_RULES);
    let mut ctx = context("Evidence", "prod", evidence("public"));

    let violation = engine.enforce(&mut ctx).await.unwrap_err();

    assert_eq!(violation.rule_id, "r1");
    assert_eq!(violation.message, "Public data classification is not permitted");
    assert_eq!(
        violation.remediation_hint,
        "Set dataClassification to internal or confidential"
    );

    let response = serde_json::to_value(violation.to_response()).unwrap();
    assert_eq!(response["code"], "POLICY_VIOLATION");
    assert_eq!(response["ruleId"], "r1");
    assert_eq!(response["correlationId"], ctx.correlation_id.as_str());

    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].effect, Effect::Deny);
    assert_eq!(records[0].matched_rules, vec!["r2", "r1"]);
    assert_eq!(records[0].principal_id.as_deref(), Some("user-7"));
}

#[tokio::test]
async fn internal_resource_is_allowed() {
    let (_, engine, _) = engine(CLASSIFICATION_RULES);
    let mut ctx = context("Evidence", "prod", evidence("internal"));

    let outcome = engine.enforce(&mut ctx).await.unwrap();

    assert_eq!(outcome.final_decision.effect, Effect::Allow);
    assert_eq!(outcome.final_decision.matched_rule_id.as_deref(), Some("r2"));
    assert!(!outcome.is_fail_open());
}

#[tokio::test]
async fn wildcards_match_every_type_and_environment() {
    let (_, engine, _) = engine(CLASSIFICATION_RULES);

    for (resource_type, environment) in [("Evidence", "prod"), ("Risk", "dev"), ("Control", "staging")] {
        let mut ctx = context(resource_type, environment, evidence("public"));
        let outcome = engine.evaluate(&mut ctx).await;
        assert!(outcome.is_denied(), "{resource_type}/{environment} should be denied");
    }
}

#[tokio::test]
async fn highest_priority_deny_wins() {
    let doc = r#"
spec:
  rules:
    - id: late-deny
      priority: 100
      effect: deny
    - id: early-deny
      priority: 3
      effect: deny
      when:
        - path: title
          op: exists
    - id: skipped-deny
      priority: 1
      effect: deny
      when:
        - path: title
          op: equals
          value: something else
"#;
    let (_, engine, _) = engine(doc);
    let outcome = engine.evaluate(&mut context("Evidence", "prod", evidence("public"))).await;

    assert_eq!(outcome.final_decision.matched_rule_id.as_deref(), Some("early-deny"));
    let evaluated: Vec<_> = outcome.evaluations.iter().map(|e| e.rule_id.as_str()).collect();
    assert_eq!(evaluated, vec!["skipped-deny", "early-deny"]);
}

#[tokio::test]
async fn unrecognized_operator_fails_closed() {
    let doc = r#"
spec:
  rules:
    - id: soft-deny
      priority: 1
      effect: deny
      when:
        - path: title
          op: Equals
          value: Q3 access review
"#;
    let (_, engine, _) = engine(doc);
    let outcome = engine.evaluate(&mut context("Evidence", "prod", evidence("public"))).await;

    // The rule's only condition failed, so the deny never fired.
    assert!(outcome.is_allowed());
    let condition = &outcome.evaluations[0].conditions[0];
    assert!(!condition.passed);
    assert!(condition.message.contains("Equals"));
}

#[tokio::test]
async fn malformed_reload_keeps_prior_document() {
    let (source, engine, _) = engine(CLASSIFICATION_RULES);
    let original = engine.get_policy().await.unwrap();

    source.replace("{ \"spec\": { \"rules\": [ { \"id\": \"x\" ", DocumentFormat::Json);
    assert!(engine.reload_policy().await.is_err());

    let malformed = grc_policy::PolicyDocument::from_yaml("spec:\n  rules:\n    - id: x\n").unwrap();
    assert!(!engine.store().validate_policy(&malformed));

    assert!(Arc::ptr_eq(&original, &engine.get_policy().await.unwrap()));
    let outcome = engine.evaluate(&mut context("Evidence", "prod", evidence("public"))).await;
    assert!(outcome.is_denied());
}

#[tokio::test]
async fn mutation_without_labels_fails_only_that_mutation() {
    let doc = r#"
spec:
  rules:
    - id: stamp
      priority: 1
      effect: mutate
      match:
        resource:
          type: Evidence
        environment: "*"
      mutations:
        - op: set
          path: resource.metadata.labels.owner
          value: alice
        - op: set
          path: resource.reviewed
          value: true
"#;
    let (_, engine, _) = engine(doc);
    let resource = ResourceWrapper::new("ev-2", "Evidence").with_resource(json!({"title": "Q3"}));
    let mut ctx = context("Evidence", "prod", resource);

    let outcome = engine.evaluate(&mut ctx).await;

    assert_eq!(outcome.final_decision.effect, Effect::Mutate);
    assert_eq!(outcome.mutations.applied, 1);
    assert_eq!(outcome.mutations.failures.len(), 1);
    assert_eq!(outcome.mutations.failures[0].path(), "resource.metadata.labels.owner");

    let value = ctx.resource_value();
    assert_eq!(value["resource"]["reviewed"], Value::Bool(true));
    assert_eq!(value["resource"]["metadata"], Value::Null);
}

#[test]
fn applier_reports_missing_intermediate_segment() {
    let applier = MutationApplier::new(PathResolver::default());
    let mut resource = json!({"title": "Q3"});

    let err = applier
        .apply_one(0, &Mutation::set("metadata.labels.owner", "alice"), &mut resource)
        .unwrap_err();

    assert_eq!(
        err,
        MutationError::Path {
            index: 0,
            path: "metadata.labels.owner".into(),
            source: PathError::segment_missing("metadata.labels.owner", "metadata"),
        }
    );
}

#[test]
fn resolution_scenarios() {
    let resolver = PathResolver::default();
    let resource = json!({"metadata": {"labels": {"x": "1"}}});

    assert_eq!(resolver.resolve(&resource, "metadata.labels.x"), Some(json!("1")));
    assert_eq!(resolver.resolve(&resource, "metadata.labels.missing"), None);
    assert!(!resolver.exists(&resource, "metadata.labels.missing"));

    let mut wrapper = ResourceWrapper::new("ev-3", "Evidence");
    resolver
        .set(&mut wrapper, "Metadata.Labels.owner", json!("alice"))
        .unwrap();
    assert_eq!(
        resolver.resolve(&wrapper, "metadata.labels.owner"),
        Some(json!("alice"))
    );
    assert_eq!(wrapper.metadata, ResourceMetadata {
        labels: [("owner".to_string(), "alice".to_string())].into(),
        additional: Default::default(),
    });
}

#[test]
fn validate_is_usable_from_sync_code() {
    let (_, engine, sink) = engine(CLASSIFICATION_RULES);

    let result = tokio_test::block_on(engine.validate("Evidence", &evidence("public"), "prod"));
    assert!(!result.is_valid);
    assert_eq!(result.violations[0].rule_id, "r1");

    assert!(tokio_test::block_on(sink.is_empty()));
}
