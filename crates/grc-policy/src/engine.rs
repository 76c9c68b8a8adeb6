//! Policy engine: ties the store, matcher, evaluator, mutations and audit
//! together for one enforcement call.
//!
//! # Evaluation
//!
//! 1. Take a snapshot of the active document.
//! 2. Select the applicable rules in priority order.
//! 3. For each rule, evaluate every condition. When all pass:
//!    - `deny` records the decision and stops;
//!    - `mutate` records the decision, applies its mutations and continues;
//!    - `allow` records the decision and continues.
//! 4. Combine the recorded decisions into the final decision.
//! 5. Audit the outcome and update metrics.
//!
//! Internal failures (including panics) during steps 1-4 fail open: the
//! request is allowed and the outcome carries `engine_error` so it can be
//! told apart from a legitimate allow.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLogger;
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::context::PolicyContext;
use crate::decision::{
    EvaluationOutcome, MutationSuggestion, PolicyDecision, RuleEvaluation, ValidationResult,
    ValidationViolation, final_decision,
};
use crate::document::{Effect, PolicyDocument};
use crate::error::{PolicyError, PolicyViolation};
use crate::matcher::RuleMatcher;
use crate::metrics::EngineMetrics;
use crate::mutation::{MutationApplier, MutationReport};
use crate::path::{Navigable, PathResolver};
use crate::store::{PolicyReloaded, PolicyStore, ReloadStatus, WatchHandle};

/// Evaluates requests against the active policy document.
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
    resolver: PathResolver,
    matcher: RuleMatcher,
    conditions: ConditionEvaluator,
    mutations: MutationApplier,
    audit: Arc<AuditLogger>,
    metrics: Arc<EngineMetrics>,
}

/// Result of running the rules, before auditing.
struct RuleRun {
    decisions: Vec<PolicyDecision>,
    evaluations: Vec<RuleEvaluation>,
    mutations: MutationReport,
}

impl PolicyEngine {
    pub fn new(store: Arc<PolicyStore>, resolver: PathResolver, audit: Arc<AuditLogger>) -> Self {
        Self {
            store,
            matcher: RuleMatcher::new(),
            conditions: ConditionEvaluator::new(resolver.clone()),
            mutations: MutationApplier::new(resolver.clone()),
            resolver,
            audit,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Engine with a default resolver and a tracing-only audit logger.
    pub fn with_store(store: Arc<PolicyStore>) -> Self {
        Self::new(store, PathResolver::default(), Arc::new(AuditLogger::new()))
    }

    /// Engine wired from configuration. The store is file-backed and not
    /// yet watched.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(PolicyStore::from_config(&config.store)),
            PathResolver::with_ttl(config.resolver.cache_ttl),
            Arc::new(AuditLogger::from_config(&config.audit)),
        )
    }

    /// Builds the engine from configuration, loads the policy and, when
    /// `store.watch` is set, starts the file watcher.
    ///
    /// The watcher runs until `cancel` fires or the handle is stopped.
    pub async fn start(
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, Option<WatchHandle>), PolicyError> {
        let engine = Self::from_config(config);
        let document = engine.store.get_policy().await?;
        tracing::info!(
            policy = %document.metadata.name,
            version = %document.metadata.version,
            rules = document.rules().len(),
            source = %engine.store.source_name(),
            watch = config.store.watch,
            "Policy engine started"
        );

        let watcher = if config.store.watch {
            Some(engine.store.watch(&config.store, cancel)?)
        } else {
            None
        };
        Ok((engine, watcher))
    }

    /// Shares a metrics registry with other components.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    // =========================================================================
    // Enforcement
    // =========================================================================

    /// Evaluates the request, applying mutations to `context.resource`.
    ///
    /// Never fails. A deny is reported through the outcome; use
    /// [`enforce`](Self::enforce) to get it as an error.
    pub async fn evaluate(&self, context: &mut PolicyContext) -> EvaluationOutcome {
        let started = Instant::now();

        let mut outcome = match self.store.get_policy().await {
            Ok(document) => {
                let version = self.store.version();
                let mut outcome = self.evaluate_document(&document, context);
                outcome.policy_version = Some(version);
                outcome
            }
            Err(e) => {
                tracing::error!(
                    correlation_id = %context.correlation_id,
                    category = %e.category(),
                    error = %e,
                    "Policy document unavailable, failing open"
                );
                fail_open(format!("policy document unavailable: {e}"))
            }
        };
        outcome.elapsed = started.elapsed();

        self.audit.log_decision(context, &outcome).await;
        self.metrics.record(&context.metrics_key(), &outcome);
        outcome
    }

    /// Evaluates the request and raises a violation if it is denied.
    pub async fn enforce(&self, context: &mut PolicyContext) -> Result<EvaluationOutcome, PolicyViolation> {
        let outcome = self.evaluate(context).await;
        if outcome.is_denied() {
            return Err(outcome.final_decision.to_violation(&context.correlation_id));
        }
        Ok(outcome)
    }

    /// Returns `true` unless the request is denied. Mutations are still applied.
    pub async fn is_allowed(&self, context: &mut PolicyContext) -> bool {
        self.evaluate(context).await.is_allowed()
    }

    /// Evaluates a specific document synchronously. No audit, no metrics.
    pub fn evaluate_document(&self, document: &PolicyDocument, context: &mut PolicyContext) -> EvaluationOutcome {
        let now = OffsetDateTime::now_utc();
        let run = catch_unwind(AssertUnwindSafe(|| self.run_rules(document, context, now)));

        match run {
            Ok(run) => {
                let final_decision = final_decision(&run.decisions, document.default_effect());
                tracing::debug!(
                    correlation_id = %context.correlation_id,
                    effect = %final_decision.effect,
                    matched_rule_id = ?final_decision.matched_rule_id,
                    "Policy evaluated"
                );
                EvaluationOutcome {
                    decisions: run.decisions,
                    final_decision,
                    evaluations: run.evaluations,
                    mutations: run.mutations,
                    engine_error: None,
                    policy_version: None,
                    elapsed: Default::default(),
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(
                    correlation_id = %context.correlation_id,
                    resource_type = %context.resource_type,
                    action = %context.action,
                    error = %reason,
                    "Policy engine internal error, failing open"
                );
                fail_open(format!("internal engine error: {reason}"))
            }
        }
    }

    fn run_rules(&self, document: &PolicyDocument, context: &mut PolicyContext, now: OffsetDateTime) -> RuleRun {
        let rules = self.matcher.rules_for_context(document, context, now);
        let mut run = RuleRun {
            decisions: Vec::new(),
            evaluations: Vec::with_capacity(rules.len()),
            mutations: MutationReport::default(),
        };

        for rule in rules {
            let results = self.conditions.evaluate(&rule.when, context.resource.as_ref());
            let matched = results.iter().all(|r| r.passed);
            run.evaluations.push(RuleEvaluation {
                rule_id: rule.id.clone(),
                priority: rule.priority,
                matched,
                conditions: results,
            });

            if !matched {
                continue;
            }
            let Some(effect) = rule.effect else {
                continue;
            };

            tracing::debug!(rule_id = %rule.id, effect = %effect, "Rule matched");
            run.decisions.push(PolicyDecision::from_rule(rule, effect));

            match effect {
                Effect::Deny => break,
                Effect::Mutate => {
                    let report = self.mutations.apply(&rule.mutations, context.resource.as_mut());
                    run.mutations.merge(report);
                }
                Effect::Allow => {}
            }
        }

        run
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Reports what would happen to a resource without applying anything.
    ///
    /// Every applicable rule is evaluated, so all would-be violations are
    /// listed, not just the first.
    pub async fn validate(
        &self,
        resource_type: &str,
        resource: &dyn Navigable,
        environment: &str,
    ) -> ValidationResult {
        let document = match self.store.get_policy().await {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(error = %e, "Policy document unavailable, skipping validation");
                return ValidationResult::new(Vec::new(), Vec::new());
            }
        };

        let run = catch_unwind(AssertUnwindSafe(|| {
            self.collect_findings(&document, resource_type, resource, environment)
        }));

        match run {
            Ok((violations, suggestions)) => ValidationResult::new(violations, suggestions),
            Err(payload) => {
                tracing::error!(
                    resource_type,
                    error = %panic_message(payload.as_ref()),
                    "Policy validation internal error"
                );
                ValidationResult::new(Vec::new(), Vec::new())
            }
        }
    }

    fn collect_findings(
        &self,
        document: &PolicyDocument,
        resource_type: &str,
        resource: &dyn Navigable,
        environment: &str,
    ) -> (Vec<ValidationViolation>, Vec<MutationSuggestion>) {
        let mut violations = Vec::new();
        let mut suggestions = Vec::new();

        if !self.matcher.target_applies(document, resource_type, environment) {
            return (violations, suggestions);
        }

        for rule in self.matcher.applicable_rules(document, resource_type, environment) {
            let results = self.conditions.evaluate(&rule.when, resource);
            if !results.iter().all(|r| r.passed) {
                continue;
            }

            match rule.effect {
                Some(Effect::Deny) => violations.push(ValidationViolation {
                    rule_id: rule.id.clone(),
                    message: rule
                        .message
                        .clone()
                        .unwrap_or_else(|| PolicyViolation::DEFAULT_MESSAGE.to_string()),
                    remediation_hint: rule.remediation_hint().map(str::to_string),
                    severity: rule.severity.clone(),
                }),
                Some(Effect::Mutate) => suggestions.push(MutationSuggestion {
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                    mutations: rule.mutations.clone(),
                }),
                Some(Effect::Allow) | None => {}
            }
        }

        (violations, suggestions)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// The active document, loading it on first access.
    pub async fn get_policy(&self) -> Result<Arc<PolicyDocument>, PolicyError> {
        self.store.get_policy().await
    }

    /// Forces a reload from the backing source.
    pub async fn reload_policy(&self) -> Result<Arc<PolicyDocument>, PolicyError> {
        self.store.reload_policy().await
    }

    pub fn reload_status(&self) -> ReloadStatus {
        self.store.reload_status()
    }

    pub fn subscribe_reloads(&self) -> broadcast::Receiver<PolicyReloaded> {
        self.store.subscribe()
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("store", &self.store)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

fn fail_open(reason: String) -> EvaluationOutcome {
    EvaluationOutcome {
        decisions: Vec::new(),
        final_decision: PolicyDecision::fail_open(&reason),
        evaluations: Vec::new(),
        mutations: MutationReport::default(),
        engine_error: Some(reason),
        policy_version: None,
        elapsed: Default::default(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
