//! Reading and writing through dot-paths.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{Member, Navigable, ResolutionCache};
use crate::error::PathError;

/// Resolves and writes dot-separated paths such as `metadata.labels.owner`.
///
/// Reads never fail: anything that cannot be resolved is `None`. Writes
/// report [`PathError`] and invalidate cached plans for the written path.
#[derive(Clone)]
pub struct PathResolver {
    cache: Arc<ResolutionCache>,
}

impl PathResolver {
    pub fn new(cache: Arc<ResolutionCache>) -> Self {
        Self { cache }
    }

    /// Creates a resolver with its own cache.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(Arc::new(ResolutionCache::new(ttl)))
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Resolves `path` against `root`. An empty path yields the root itself.
    ///
    /// `Null` values resolve to `None`.
    pub fn resolve(&self, root: &dyn Navigable, path: &str) -> Option<Value> {
        let path = path.trim();
        if path.is_empty() {
            return present(root.to_value());
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.resolve_inner(root, path))) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    path = %path,
                    type_name = %root.type_name(),
                    "Path resolution panicked, treating value as absent"
                );
                None
            }
        }
    }

    /// Returns `true` if `path` resolves to a non-null value.
    pub fn exists(&self, root: &dyn Navigable, path: &str) -> bool {
        self.resolve(root, path).is_some()
    }

    /// Writes `value` at `path`.
    ///
    /// Every segment but the last must resolve to a non-null value.
    pub fn set(&self, root: &mut dyn Navigable, path: &str, value: Value) -> Result<(), PathError> {
        let path = path.trim();
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(PathError::EmptyPath);
        };
        if path.is_empty() {
            return Err(PathError::EmptyPath);
        }

        let type_name = root.type_name().to_string();
        let mut node: &mut dyn Navigable = root;

        for segment in parents {
            let name = canonical_name(&*node, segment)
                .ok_or_else(|| PathError::segment_missing(path, *segment))?;
            node = match node.member_mut(&name) {
                Some(child) if !child.is_null() => child,
                _ => return Err(PathError::segment_missing(path, *segment)),
            };
        }

        let name = canonical_name(&*node, last).unwrap_or_else(|| (*last).to_string());
        node.set_member(&name, value).map_err(|e| e.at_path(path))?;

        self.cache.invalidate(&type_name, path);
        Ok(())
    }

    /// Clears the value at `path`.
    pub fn remove(&self, root: &mut dyn Navigable, path: &str) -> Result<(), PathError> {
        self.set(root, path, Value::Null)
    }

    fn resolve_inner(&self, root: &dyn Navigable, path: &str) -> Option<Value> {
        let type_name = root.type_name();

        if let Some(plan) = self.cache.get(type_name, path)
            && let Some(value) = follow(root, &plan)
        {
            return Some(value);
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut plan = Vec::with_capacity(segments.len());
        let value = walk(root, &segments, &mut plan)?;
        self.cache.insert(type_name, path, plan);
        Some(value)
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(Arc::new(ResolutionCache::default()))
    }
}

fn present(value: Value) -> Option<Value> {
    if value.is_null() { None } else { Some(value) }
}

/// Maps a path segment to the member name the node actually exposes.
fn canonical_name(node: &dyn Navigable, segment: &str) -> Option<String> {
    if node.shape().is_case_insensitive() {
        node.member_names()
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(segment))
            .map(str::to_string)
    } else {
        Some(segment.to_string())
    }
}

/// Walks `segments`, recording the canonical name used at each step.
fn walk(node: &dyn Navigable, segments: &[&str], plan: &mut Vec<String>) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return present(node.to_value());
    };
    if node.is_null() {
        return None;
    }

    let name = canonical_name(node, segment)?;
    let member = node.member(&name)?;
    plan.push(name);

    match member {
        Member::Node(child) => walk(child, rest, plan),
        Member::Value(value) => walk(&value, rest, plan),
    }
}

/// Walks a cached plan. `None` if the plan does not fit this instance.
fn follow(node: &dyn Navigable, plan: &[String]) -> Option<Value> {
    let Some((name, rest)) = plan.split_first() else {
        return present(node.to_value());
    };

    match node.member(name)? {
        Member::Node(child) => follow(child, rest),
        Member::Value(value) => follow(&value, rest),
    }
}
