//! Backing sources for policy documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::document::DocumentFormat;
use crate::error::PolicyError;

/// Raw document text and its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub content: String,
    pub format: DocumentFormat,
}

/// Where the policy document comes from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Human-readable description, used in logs and errors.
    fn name(&self) -> String;

    /// Reads the current document. `Ok(None)` means no document exists.
    async fn load(&self) -> Result<Option<SourceDocument>, PolicyError>;

    /// File to watch for changes, if the source is file-backed.
    fn watch_path(&self) -> Option<&Path> {
        None
    }
}

// =============================================================================
// File Source
// =============================================================================

/// Policy document stored in a YAML or JSON file.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Option<SourceDocument>, PolicyError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(SourceDocument {
                content,
                format: DocumentFormat::from_path(&self.path),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Policy file does not exist");
                Ok(None)
            }
            Err(e) => Err(PolicyError::load(self.name(), e.to_string())),
        }
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

// =============================================================================
// Static Source
// =============================================================================

/// In-memory policy document, replaceable at runtime.
///
/// Used when policies are embedded or pushed by another component.
#[derive(Default)]
pub struct StaticPolicySource {
    document: ArcSwapOption<SourceDocument>,
}

impl StaticPolicySource {
    /// A source with no document.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn yaml(content: impl Into<String>) -> Self {
        let source = Self::empty();
        source.replace(content, DocumentFormat::Yaml);
        source
    }

    pub fn json(content: impl Into<String>) -> Self {
        let source = Self::empty();
        source.replace(content, DocumentFormat::Json);
        source
    }

    /// Replaces the document. Takes effect on the next store reload.
    pub fn replace(&self, content: impl Into<String>, format: DocumentFormat) {
        self.document.store(Some(Arc::new(SourceDocument {
            content: content.into(),
            format,
        })));
    }

    /// Removes the document.
    pub fn clear(&self) {
        self.document.store(None);
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    fn name(&self) -> String {
        "static".to_string()
    }

    async fn load(&self) -> Result<Option<SourceDocument>, PolicyError> {
        Ok(self.document.load_full().map(|doc| (*doc).clone()))
    }
}
