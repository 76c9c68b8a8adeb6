//! Dot-path navigation over resource payloads.
//!
//! Resources are navigated through the [`Navigable`] capability. Every
//! navigable type declares exactly one [`Shape`], which fixes how a path
//! segment is matched against its members:
//!
//! | Shape       | Examples                                  | Member lookup            |
//! |-------------|-------------------------------------------|--------------------------|
//! | `Map`       | `HashMap<String, Value>`, label maps      | by key, case-sensitive   |
//! | `Wrapper`   | [`ResourceWrapper`], [`ResourceMetadata`] | by name, case-insensitive|
//! | `Tree`      | `serde_json::Value`                       | by property or index     |
//! | `Record`    | [`Record`]                                | properties, then fields, case-insensitive |
//!
//! The [`PathResolver`] walks segments through these capabilities, caching
//! the canonical member names it found per `(type name, path)`.

mod cache;
mod resolver;
mod shapes;

pub use cache::{ResolutionCache, ResolutionCacheStats};
pub use resolver::PathResolver;
pub use shapes::{Record, ResourceMetadata, ResourceWrapper};

use serde_json::Value;

use crate::error::PathError;

/// How a navigable node matches path segments against its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Keyed container, exact key lookup.
    Map,
    /// Well-known domain wrapper with a fixed set of named members.
    Wrapper,
    /// Semi-structured tree node such as a parsed JSON value.
    Tree,
    /// Generic structured object with properties and fields.
    Record,
}

impl Shape {
    /// Returns `true` if segments match member names ignoring ASCII case.
    #[must_use]
    pub fn is_case_insensitive(&self) -> bool {
        matches!(self, Self::Wrapper | Self::Record)
    }
}

/// A member reached while walking a path.
pub enum Member<'a> {
    /// A navigable child borrowed from its parent.
    Node(&'a dyn Navigable),
    /// A scalar or computed member, materialised as a JSON value.
    Value(Value),
}

/// Capability for values that can be walked with dot-paths.
pub trait Navigable: Send + Sync {
    /// Concrete type name. Part of every resolution cache key.
    fn type_name(&self) -> &str;

    /// How segments are matched against this node's members.
    fn shape(&self) -> Shape;

    /// Member names in recognition order.
    ///
    /// Only consulted for case-insensitive shapes.
    fn member_names(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Looks up a member by its canonical name.
    fn member(&self, name: &str) -> Option<Member<'_>>;

    /// Mutable access to a navigable member, for writes through it.
    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable>;

    /// Writes a member. A `Null` value clears it.
    ///
    /// Errors report `name` as the path; the resolver rewrites it to the
    /// full path.
    fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError>;

    /// JSON snapshot of this node.
    fn to_value(&self) -> Value;

    /// Returns `true` if this node stands for an absent value.
    fn is_null(&self) -> bool {
        false
    }
}
