//! Application of rule mutations.
//!
//! Mutations run in order and are best-effort per item: a failed mutation is
//! reported and the remaining ones still run. Nothing is rolled back.

use serde::Serialize;

use crate::document::Mutation;
use crate::error::MutationError;
use crate::path::{Navigable, PathResolver};

/// Outcome of applying a batch of mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationReport {
    /// Number of mutations written successfully.
    pub applied: usize,
    /// Mutations that could not be written.
    #[serde(serialize_with = "serialize_errors")]
    pub failures: Vec<MutationError>,
}

impl MutationReport {
    /// Returns `true` if every mutation was applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: MutationReport) {
        self.applied += other.applied;
        self.failures.extend(other.failures);
    }
}

fn serialize_errors<S: serde::Serializer>(errors: &[MutationError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

/// Writes approved changes into a resource through the path resolver.
#[derive(Clone)]
pub struct MutationApplier {
    resolver: PathResolver,
}

impl MutationApplier {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Applies every mutation in order.
    pub fn apply(&self, mutations: &[Mutation], resource: &mut dyn Navigable) -> MutationReport {
        let mut report = MutationReport::default();

        for (index, mutation) in mutations.iter().enumerate() {
            match self.apply_one(index, mutation, resource) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::warn!(path = %mutation.path, op = %mutation.op, error = %e, "Mutation failed");
                    report.failures.push(e);
                }
            }
        }

        report
    }

    /// Applies a single mutation.
    ///
    /// `index` is the position of the mutation in its rule, used in errors.
    pub fn apply_one(
        &self,
        index: usize,
        mutation: &Mutation,
        resource: &mut dyn Navigable,
    ) -> Result<(), MutationError> {
        let result = match mutation.op.as_str() {
            "set" => self
                .resolver
                .set(resource, &mutation.path, mutation.value.clone()),
            "remove" => self.resolver.remove(resource, &mutation.path),
            other => {
                return Err(MutationError::UnsupportedOperator {
                    index,
                    path: mutation.path.clone(),
                    op: other.to_string(),
                });
            }
        };

        result.map_err(|source| MutationError::Path {
            index,
            path: mutation.path.clone(),
            source,
        })?;

        tracing::debug!(path = %mutation.path, op = %mutation.op, "Mutation applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PathError;
    use serde_json::{Value, json};

    fn applier() -> MutationApplier {
        MutationApplier::new(PathResolver::default())
    }

    #[test]
    fn test_set_and_remove() {
        let mut resource = json!({"metadata": {"labels": {"draft": "yes"}}});
        let report = applier().apply(
            &[
                Mutation::set("metadata.labels.owner", "alice"),
                Mutation::remove("metadata.labels.draft"),
            ],
            &mut resource,
        );

        assert!(report.is_complete());
        assert_eq!(report.applied, 2);
        assert_eq!(resource["metadata"]["labels"]["owner"], "alice");
        assert_eq!(resource["metadata"]["labels"]["draft"], Value::Null);
    }

    #[test]
    fn test_later_mutation_sees_earlier_structure() {
        let mut resource = json!({"metadata": {}});
        let report = applier().apply(
            &[
                Mutation::set("metadata.labels", json!({})),
                Mutation::set("metadata.labels.owner", "alice"),
            ],
            &mut resource,
        );

        assert!(report.is_complete());
        assert_eq!(resource["metadata"]["labels"]["owner"], "alice");
    }

    #[test]
    fn test_missing_intermediate_fails_only_that_mutation() {
        let mut resource = json!({"title": "Q3"});
        let report = applier().apply(
            &[
                Mutation::set("reviewed", true),
                Mutation::set("metadata.labels.owner", "alice"),
                Mutation::set("status", "draft"),
            ],
            &mut resource,
        );

        assert_eq!(report.applied, 2);
        assert_eq!(
            report.failures,
            vec![MutationError::Path {
                index: 1,
                path: "metadata.labels.owner".into(),
                source: PathError::segment_missing("metadata.labels.owner", "metadata"),
            }]
        );
        assert_eq!(resource["reviewed"], true);
        assert_eq!(resource["status"], "draft");
    }

    #[test]
    fn test_unsupported_operator() {
        let mut resource = json!({});
        let mutation = Mutation {
            path: "a".into(),
            op: "append".into(),
            value: json!(1),
        };
        let err = applier().apply_one(0, &mutation, &mut resource).unwrap_err();

        assert!(matches!(err, MutationError::UnsupportedOperator { ref op, .. } if op == "append"));
        assert_eq!(err.path(), "a");
    }

    #[test]
    fn test_report_serializes_failures_as_messages() {
        let mut resource = json!({});
        let report = applier().apply(&[Mutation::set("a.b", 1)], &mut resource);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["applied"], 0);
        assert!(json["failures"][0].as_str().unwrap().contains("a.b"));
    }
}
