//! Request context for a single enforcement call.
//!
//! ```ignore
//! use grc_policy::context::PolicyContextBuilder;
//!
//! let mut context = PolicyContextBuilder::new()
//!     .resource_type("Evidence")
//!     .action("create")
//!     .environment("prod")
//!     .resource(wrapper)
//!     .principal("user-1", ["auditor"])
//!     .tenant("tenant-a")
//!     .build()?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::path::Navigable;

// =============================================================================
// Policy Context
// =============================================================================

/// Everything the engine needs to decide one request.
///
/// Constructed fresh per call and never persisted. Mutations from `mutate`
/// rules are written into `resource` in place.
pub struct PolicyContext {
    pub action: String,
    pub environment: String,
    pub resource_type: String,
    pub resource: Box<dyn Navigable>,
    pub tenant_id: Option<String>,
    pub principal_id: Option<String>,
    pub principal_roles: Vec<String>,
    /// Links the decision to its audit records.
    pub correlation_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl PolicyContext {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> PolicyContextBuilder {
        PolicyContextBuilder::new()
    }

    /// Returns `true` if the principal holds the role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.principal_roles.iter().any(|r| r == role)
    }

    /// `resourceType:action` key used for metrics.
    #[must_use]
    pub fn metrics_key(&self) -> String {
        format!("{}:{}", self.resource_type, self.action)
    }

    /// JSON snapshot of the resource, including applied mutations.
    #[must_use]
    pub fn resource_value(&self) -> Value {
        self.resource.to_value()
    }

    /// Takes the resource back out of the context.
    #[must_use]
    pub fn into_resource(self) -> Box<dyn Navigable> {
        self.resource
    }
}

impl fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyContext")
            .field("action", &self.action)
            .field("environment", &self.environment)
            .field("resource_type", &self.resource_type)
            .field("resource", &self.resource.type_name())
            .field("tenant_id", &self.tenant_id)
            .field("principal_id", &self.principal_id)
            .field("principal_roles", &self.principal_roles)
            .field("correlation_id", &self.correlation_id)
            .field("metadata", &self.metadata)
            .finish()
    }
}

// =============================================================================
// Policy Context Builder
// =============================================================================

/// Builder for [`PolicyContext`].
///
/// Resource type, action, environment and resource are required. A v4 UUID
/// correlation id is generated unless one is supplied.
#[derive(Default)]
pub struct PolicyContextBuilder {
    action: Option<String>,
    environment: Option<String>,
    resource_type: Option<String>,
    resource: Option<Box<dyn Navigable>>,
    tenant_id: Option<String>,
    principal_id: Option<String>,
    principal_roles: Vec<String>,
    correlation_id: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl PolicyContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Navigable + 'static) -> Self {
        self.resource = Some(Box::new(resource));
        self
    }

    #[must_use]
    pub fn boxed_resource(mut self, resource: Box<dyn Navigable>) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn principal<I, S>(mut self, principal_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.principal_id = Some(principal_id.into());
        self.principal_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing.
    pub fn build(self) -> Result<PolicyContext, ContextError> {
        Ok(PolicyContext {
            action: self.action.ok_or(ContextError::MissingAction)?,
            environment: self.environment.ok_or(ContextError::MissingEnvironment)?,
            resource_type: self.resource_type.ok_or(ContextError::MissingResourceType)?,
            resource: self.resource.ok_or(ContextError::MissingResource)?,
            tenant_id: self.tenant_id,
            principal_id: self.principal_id,
            principal_roles: self.principal_roles,
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            metadata: self.metadata,
        })
    }
}

/// Errors that can occur when building a [`PolicyContext`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum ContextError {
    #[error("Missing action")]
    MissingAction,

    #[error("Missing environment")]
    MissingEnvironment,

    #[error("Missing resource type")]
    MissingResourceType,

    #[error("Missing resource")]
    MissingResource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ResourceWrapper;
    use serde_json::json;

    #[test]
    fn test_builder_generates_correlation_id() {
        let context = PolicyContextBuilder::new()
            .action("create")
            .environment("prod")
            .resource_type("Evidence")
            .resource(json!({"title": "Q3"}))
            .principal("user-1", ["auditor", "viewer"])
            .tenant("tenant-a")
            .metadata("source", "api")
            .build()
            .unwrap();

        assert!(Uuid::parse_str(&context.correlation_id).is_ok());
        assert!(context.has_role("auditor"));
        assert!(!context.has_role("admin"));
        assert_eq!(context.metrics_key(), "Evidence:create");
        assert_eq!(context.metadata["source"], "api");
        assert_eq!(context.resource_value(), json!({"title": "Q3"}));
    }

    #[test]
    fn test_builder_keeps_supplied_correlation_id() {
        let context = PolicyContext::builder()
            .action("update")
            .environment("dev")
            .resource_type("Risk")
            .resource(ResourceWrapper::new("r-1", "Risk"))
            .correlation_id("corr-1")
            .build()
            .unwrap();

        assert_eq!(context.correlation_id, "corr-1");
        assert!(format!("{context:?}").contains("ResourceWrapper"));
    }

    #[test]
    fn test_builder_requires_fields() {
        let result = PolicyContextBuilder::new()
            .environment("prod")
            .resource_type("Evidence")
            .resource(json!({}))
            .build();
        assert_eq!(result.unwrap_err(), ContextError::MissingAction);

        let result = PolicyContextBuilder::new()
            .action("create")
            .environment("prod")
            .resource_type("Evidence")
            .build();
        assert_eq!(result.unwrap_err(), ContextError::MissingResource);
    }
}
