use std::sync::Arc;

/// Errors produced by the pull orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("registry error: {0}")]
    Registry(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A trust store checked a key and declined to verify it. This is a
    /// normal trust outcome, not a fatal error.
    #[error("key not verified: {0}")]
    NotVerified(String),

    #[error("trust error: {0}")]
    Trust(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A terminal error observed through a dedup broadcaster. Every caller
    /// that joined the same in-flight operation sees the same underlying
    /// error through this variant.
    #[error("{0}")]
    Shared(Arc<PullError>),
}

impl PullError {
    /// Convert into a shareable handle without double-wrapping an error that
    /// already came off a broadcaster.
    pub fn into_shared(self) -> Arc<PullError> {
        match self {
            PullError::Shared(err) => err,
            other => Arc::new(other),
        }
    }

    /// The underlying error, unwrapping any broadcaster sharing layers.
    pub fn root(&self) -> &PullError {
        match self {
            PullError::Shared(err) => err.root(),
            other => other,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PullError>;

/// A failed pull plus the protocol-fallback decision for it.
///
/// `fallback` is `true` when the transport layer classified the failure as
/// "this protocol isn't usable here", in which case the caller is expected to
/// retry the pull against an older protocol version.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct PullFailure {
    pub fallback: bool,
    #[source]
    pub source: PullError,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
