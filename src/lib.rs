//! Content-addressable image pull orchestrator.
//!
//! Given a repository reference and a tag (or content digest), a [`Puller`]
//! resolves the set of tags to fetch, retrieves each tag's signed manifest,
//! downloads every missing layer blob exactly once across arbitrarily many
//! concurrent pulls, cryptographically verifies every downloaded byte, and
//! atomically publishes the result into a local layer store and tag mapping.
//!
//! Transport, archive extraction, the layer storage engine, and the trust key
//! store are external collaborators, injected through the traits in
//! [`registry`], [`store`], and [`trust`].

pub mod digest;
mod download;
pub mod error;
pub mod manifest;
pub mod pool;
pub mod progress;
pub mod puller;
pub mod reference;
pub mod registry;
pub mod store;
pub mod trust;
pub mod validate;

pub use digest::{Digest, DigestReader};
pub use error::{PullError, PullFailure, Result};
pub use manifest::{FsLayer, HistoryEntry, SignedManifest, V1Image};
pub use pool::{Broadcaster, PullPool};
pub use progress::{ProgressEvent, ProgressReader, ProgressSink};
pub use puller::{PullRequest, Puller};
pub use registry::{BlobStream, Repository, RepositoryResolver};
pub use store::{LayerStore, RetainGuard, TagStore};
pub use trust::{SignatureKey, SignatureVerifier, TrustStore, PERMISSION_READ_WRITE};
