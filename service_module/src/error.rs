use crate::store::StoreError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A generation or send collaborator failed. Collaborator crates keep their
/// own error types; at the trait seam only the message travels.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct UpstreamError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("upstream failure: {0}")]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
