//! External collaborator contracts for the registry transport.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::digest::Digest;
use crate::error::{PullError, Result};
use crate::manifest::SignedManifest;

/// An open streaming read of a blob.
pub type BlobStream = Box<dyn AsyncRead + Send + Unpin>;

/// A repository handle produced by the transport layer after endpoint
/// selection and authentication: lists tags, fetches manifests, and stats or
/// opens blobs by digest.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The repository's remote name, used in progress output and trust
    /// advisories.
    fn name(&self) -> String;

    /// List all tags the repository offers.
    async fn tags(&self) -> Result<Vec<String>>;

    /// Fetch the signed manifest for a tag (or digest reference).
    async fn manifest_by_tag(&self, tag: &str) -> Result<SignedManifest>;

    /// Probe a blob's authoritative size without downloading it.
    async fn stat_blob(&self, digest: &Digest) -> Result<u64>;

    /// Open a streaming read of a blob.
    async fn open_blob(&self, digest: &Digest) -> Result<BlobStream>;
}

/// Produces repository handles and classifies transport failures.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    /// Obtain a repository handle for a reference. Failure here is always
    /// fallback-eligible: the caller may retry against an older protocol.
    async fn repository(&self, reference: &str) -> Result<Arc<dyn Repository>>;

    /// Whether an error means "this protocol isn't usable here", permitting
    /// the caller to retry the pull against an older protocol version.
    fn continue_on_error(&self, err: &PullError) -> bool {
        matches!(err, PullError::Registry(_))
    }
}
