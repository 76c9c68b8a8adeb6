//! Error types for policy loading, path navigation, mutation and enforcement.
//!
//! Only [`PolicyViolation`] is meant to cross the engine boundary as an error
//! outcome. Everything else is absorbed by the component that produced it and
//! surfaced through logs, reload status or evaluation outcomes.

use std::fmt;

use serde::Serialize;

use crate::document::Severity;

/// Errors raised while loading, validating or watching policy documents.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The backing document could not be read or parsed.
    #[error("Failed to load policy from {source_name}: {message}")]
    Load {
        /// Human-readable description of the source (file path, "static", ...).
        source_name: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The document parsed but failed structural validation.
    #[error("Policy validation failed: {}", errors.join("; "))]
    Validation {
        /// Every hard validation failure found in the document.
        errors: Vec<String>,
    },

    /// An I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The file watcher could not be started.
    #[error("Watch error: {0}")]
    Watch(String),

    /// Unexpected failure inside the engine.
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl PolicyError {
    /// Creates a load error.
    pub fn load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error from a list of failures.
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// Creates a watch error.
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if the document could not be read or parsed.
    #[must_use]
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Io(_))
    }

    /// Returns `true` if the document was rejected by validation.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the error category for metrics and logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Load { .. } => ErrorCategory::Load,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Io(_) => ErrorCategory::Load,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Watch(_) => ErrorCategory::Infrastructure,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for grouping errors in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Reading or parsing the policy document.
    Load,
    /// Structural defects in the policy document.
    Validation,
    /// Writing through a dot-path.
    Path,
    /// Applying a rule mutation.
    Mutation,
    /// The expected deny outcome.
    Violation,
    /// Cancelled operation.
    Cancelled,
    /// File watching and other infrastructure.
    Infrastructure,
    /// Unexpected engine failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Load => "load",
            Self::Validation => "validation",
            Self::Path => "path",
            Self::Mutation => "mutation",
            Self::Violation => "violation",
            Self::Cancelled => "cancelled",
            Self::Infrastructure => "infrastructure",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Path Errors
// =============================================================================

/// Errors returned when writing through a dot-path.
///
/// Reads never fail: an unresolvable path is simply absent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path expression was empty.
    #[error("Path is empty")]
    EmptyPath,

    /// An intermediate segment did not resolve to a value.
    #[error("Path segment '{segment}' missing in '{path}'")]
    SegmentMissing {
        /// Full path being written.
        path: String,
        /// The segment that failed to resolve.
        segment: String,
    },

    /// The final segment does not name a writable member.
    #[error("Member '{member}' in '{path}' is not writable: {reason}")]
    NotWritable {
        /// Full path being written.
        path: String,
        /// Name of the member that rejected the write.
        member: String,
        /// Why the write was rejected.
        reason: String,
    },
}

impl PathError {
    /// Creates a segment-missing error.
    pub fn segment_missing(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Self::SegmentMissing {
            path: path.into(),
            segment: segment.into(),
        }
    }

    /// Creates a not-writable error.
    pub fn not_writable(
        path: impl Into<String>,
        member: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::NotWritable {
            path: path.into(),
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// Returns a copy of this error reported against a different full path.
    #[must_use]
    pub fn at_path(self, full_path: &str) -> Self {
        match self {
            Self::EmptyPath => Self::EmptyPath,
            Self::SegmentMissing { segment, .. } => Self::segment_missing(full_path, segment),
            Self::NotWritable { member, reason, .. } => {
                Self::not_writable(full_path, member, reason)
            }
        }
    }
}

// =============================================================================
// Mutation Errors
// =============================================================================

/// A single mutation that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// The target path could not be written.
    #[error("Mutation #{index} on '{path}' failed: {source}")]
    Path {
        /// Position of the mutation in its rule.
        index: usize,
        /// Target path of the mutation.
        path: String,
        /// Underlying path error.
        source: PathError,
    },

    /// The mutation operator is not recognised.
    #[error("Mutation #{index} on '{path}' uses unsupported operator '{op}'")]
    UnsupportedOperator {
        /// Position of the mutation in its rule.
        index: usize,
        /// Target path of the mutation.
        path: String,
        /// The operator as written in the document.
        op: String,
    },
}

impl MutationError {
    /// Returns the target path of the failed mutation.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Path { path, .. } | Self::UnsupportedOperator { path, .. } => path,
        }
    }
}

// =============================================================================
// Policy Violation
// =============================================================================

/// The deny outcome of an enforcement call.
///
/// Callers must propagate this as a user-facing rejection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (rule: {rule_id})")]
pub struct PolicyViolation {
    /// Human-readable reason for the denial.
    pub message: String,
    /// Id of the rule that denied the request.
    pub rule_id: String,
    /// What the caller can do to satisfy the policy.
    pub remediation_hint: String,
    /// Severity declared on the rule, if any.
    pub severity: Option<Severity>,
    /// Correlation id of the enforcement call.
    pub correlation_id: String,
}

impl PolicyViolation {
    /// Error code used in structured responses.
    pub const CODE: &'static str = "POLICY_VIOLATION";
    /// Message used when the denying rule carries none.
    pub const DEFAULT_MESSAGE: &'static str = "Policy violation";
    /// Rule id used when the denial did not come from a named rule.
    pub const UNKNOWN_RULE: &'static str = "unknown";
    /// Hint used when the denying rule carries none.
    pub const DEFAULT_HINT: &'static str = "Contact administrator";

    /// Creates a violation, filling defaults for missing fields.
    pub fn new(
        message: Option<String>,
        rule_id: Option<String>,
        remediation_hint: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.unwrap_or_else(|| Self::DEFAULT_MESSAGE.to_string()),
            rule_id: rule_id.unwrap_or_else(|| Self::UNKNOWN_RULE.to_string()),
            remediation_hint: remediation_hint.unwrap_or_else(|| Self::DEFAULT_HINT.to_string()),
            severity: None,
            correlation_id: correlation_id.into(),
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Option<Severity>) -> Self {
        self.severity = severity;
        self
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Violation
    }

    /// Converts the violation into a transport-neutral error response.
    #[must_use]
    pub fn to_response(&self) -> ViolationResponse {
        ViolationResponse {
            code: Self::CODE.to_string(),
            message: self.message.clone(),
            rule_id: self.rule_id.clone(),
            remediation_hint: self.remediation_hint.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Structured error response for a violation.
///
/// Used identically by HTTP layers, the CLI and batch jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationResponse {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Rule that denied the request.
    pub rule_id: String,
    /// Remediation hint.
    pub remediation_hint: String,
    /// Correlation id for audit linkage.
    pub correlation_id: String,
}

// =============================================================================
// Tests
// =============================================================================
