use std::fmt;

/// Failure kinds for local view operations. `NotReady` warrants a bounded
/// retry; `Failed` does not.
#[derive(Debug)]
pub enum ViewError {
    NotReady,
    Failed(String),
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::NotReady => write!(f, "View engine is not ready"),
            ViewError::Failed(e) => write!(f, "View operation failed: {}", e),
        }
    }
}

impl std::error::Error for ViewError {}

/// Capability boundary to the local diagram editor.
///
/// The editor itself (rendering, modeling semantics) is an external
/// collaborator; the synchronization engine only reads the serialized
/// document out of it and writes remote state back into it.
pub trait DiagramView: Send {
    /// Whether the underlying editor engine can accept an import right now.
    fn is_ready(&self) -> bool;

    /// Serialize the current local document.
    fn content(&self) -> Result<String, ViewError>;

    /// Replace the local document with remote state.
    fn apply_content(&mut self, content: &str) -> Result<(), ViewError>;
}
