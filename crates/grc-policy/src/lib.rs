//! Declarative policy enforcement for GRC resources.
//!
//! Policies are authored as YAML or JSON documents and evaluated against
//! business resources at runtime. The document can be replaced while the
//! process runs; evaluations in flight keep the snapshot they started with.
//!
//! # Components
//!
//! - [`path::PathResolver`] walks resources with dot-paths (`metadata.labels.owner`)
//! - [`store::PolicyStore`] holds the active document and hot-reloads it
//! - [`matcher::RuleMatcher`] selects the rules that apply to a request
//! - [`condition::ConditionEvaluator`] tests rule conditions
//! - [`mutation::MutationApplier`] writes approved changes into resources
//! - [`engine::PolicyEngine`] orchestrates a single enforcement call
//! - [`audit::AuditLogger`] records every decision
//!
//! # Example
//!
//! ```ignore
//! use grc_policy::{PolicyContext, PolicyEngine, PolicyStore, ResourceWrapper};
//!
//! let store = Arc::new(PolicyStore::from_path("etc/policies/grc-baseline.yml"));
//! let engine = PolicyEngine::with_store(store);
//!
//! let mut context = PolicyContext::builder()
//!     .resource_type("Evidence")
//!     .action("create")
//!     .environment("prod")
//!     .resource(ResourceWrapper::new("ev-1", "Evidence").with_label("dataClassification", "public"))
//!     .build()?;
//!
//! match engine.enforce(&mut context).await {
//!     Ok(outcome) => println!("allowed: {:?}", outcome.final_decision.effect),
//!     Err(violation) => println!("denied by {}: {}", violation.rule_id, violation.message),
//! }
//! ```

pub mod audit;
pub mod condition;
pub mod config;
pub mod context;
pub mod decision;
pub mod document;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod mutation;
pub mod path;
pub mod store;
pub mod validation;

pub use audit::{AuditLogger, AuditRecord, AuditSink, JsonLinesAuditSink, MemoryAuditSink};
pub use condition::{ConditionEvaluator, ConditionResult, Operator};
pub use config::{ConfigError, EngineConfig};
pub use context::{ContextError, PolicyContext, PolicyContextBuilder};
pub use decision::{EvaluationOutcome, PolicyDecision, ValidationResult};
pub use document::{
    Condition, DefaultEffect, DocumentFormat, Effect, Mutation, PolicyDocument, Rule, Severity,
};
pub use engine::PolicyEngine;
pub use error::{
    ErrorCategory, MutationError, PathError, PolicyError, PolicyViolation, ViolationResponse,
};
pub use matcher::RuleMatcher;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use mutation::{MutationApplier, MutationReport};
pub use path::{Navigable, PathResolver, Record, ResolutionCache, ResourceWrapper};
pub use store::{
    FilePolicySource, PolicyReloaded, PolicySource, PolicyStore, ReloadStatus, ReloadTrigger,
    StaticPolicySource, WatchHandle,
};
pub use validation::{ValidationReport, validate_document};
