//! Tool execution context.
//!
//! Every tool handler receives one of these alongside the caller's
//! arguments: references to the engine services plus the project-root
//! containment check for path-taking tools.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use loci_core::{
    EmbeddingService, GraphStore, Indexer, JobRegistry, MemoryManager, Normalizer, QueryEngine,
    Settings, SyncLayer, VectorStore,
};

/// Failure from a tool handler, lifted into a JSON-RPC error by the server.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub message: String,
    /// Transient storage loss; the caller may retry as-is.
    pub retryable: bool,
    /// Validation failure; maps to invalid-params instead of internal.
    pub invalid: bool,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            invalid: false,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            invalid: true,
        }
    }
}

impl From<loci_core::CoreError> for ToolError {
    fn from(e: loci_core::CoreError) -> Self {
        Self {
            retryable: e.is_retryable(),
            invalid: matches!(e, loci_core::CoreError::Validation { .. }),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type ToolResult = Result<serde_json::Value, ToolError>;

/// Services injected into every tool call.
pub struct ToolContext {
    pub settings: Settings,
    pub vector: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub embeddings: Arc<EmbeddingService>,
    pub manager: Arc<MemoryManager>,
    pub query: Arc<QueryEngine>,
    pub sync: Arc<SyncLayer>,
    pub indexer: Arc<Indexer>,
    pub normalizer: Arc<Normalizer>,
    pub jobs: Arc<JobRegistry>,
    /// Shutdown signal handed to long-running operations.
    pub shutdown: watch::Receiver<bool>,
}

impl ToolContext {
    /// Resolve a tool-supplied path against the project root, rejecting
    /// anything that would escape it. `..` components are refused outright
    /// rather than normalized.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(raw);

        for component in candidate.components() {
            if matches!(component, Component::ParentDir) {
                return Err(ToolError::new(format!(
                    "path '{}' escapes the project root",
                    raw
                )));
            }
        }

        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.settings.project_path.join(candidate)
        };

        let root = self
            .settings
            .project_path
            .canonicalize()
            .unwrap_or_else(|_| self.settings.project_path.clone());
        let checked = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());

        if !checked.starts_with(&root) {
            return Err(ToolError::new(format!(
                "path '{}' is outside the project root",
                raw
            )));
        }

        Ok(resolved)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::test_context;

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = test_context(dir.path().to_path_buf()).await;
        assert!(ctx.resolve_path("../outside.py").is_err());
        assert!(ctx.resolve_path("src/../../outside.py").is_err());
    }

    #[tokio::test]
    async fn test_accepts_paths_inside_root() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        let ctx = test_context(dir.path().to_path_buf()).await;

        assert!(ctx.resolve_path("a.py").is_ok());
        let absolute = dir.path().join("a.py");
        assert!(ctx.resolve_path(&absolute.to_string_lossy()).is_ok());
    }

    #[tokio::test]
    async fn test_rejects_foreign_absolute_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let other = tempfile::TempDir::new().unwrap();
        let foreign = other.path().join("b.py");
        std::fs::write(&foreign, "x = 1").unwrap();

        let ctx = test_context(dir.path().to_path_buf()).await;
        assert!(ctx.resolve_path(&foreign.to_string_lossy()).is_err());
    }
}
