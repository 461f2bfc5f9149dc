//! External collaborator contracts for the local layer graph and the tag
//! mapping store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::digest::Digest;
use crate::error::Result;
use crate::manifest::V1Image;
use crate::registry::BlobStream;

// ---------------------------------------------------------------------------
// LayerStore
// ---------------------------------------------------------------------------

/// The local layer graph: existence checks, per-session reference counting,
/// and registration of verified layer streams.
///
/// Implementations must make every operation safe under concurrent access
/// from multiple pull sessions; retain/release bookkeeping is keyed by
/// session ID so concurrent pulls do not interfere with each other.
#[async_trait]
pub trait LayerStore: Send + Sync {
    /// Whether a layer with this legacy identity is already registered.
    fn exists(&self, id: &str) -> bool;

    /// Protect layers from garbage collection while `session` needs them.
    fn retain(&self, session: &str, ids: &[String]);

    /// Drop `session`'s protection of the given layers.
    fn release(&self, session: &str, ids: &[String]);

    /// Extract `layer` into storage and commit it under `image`'s identity.
    async fn register(&self, image: &V1Image, layer: BlobStream) -> Result<()>;

    /// Associate a content digest with a registered layer identity.
    async fn set_digest(&self, id: &str, digest: &Digest) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TagStore
// ---------------------------------------------------------------------------

/// Persistence of tag → image-identity mappings per repository.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// The current tag mapping for a repository, or `None` if the repository
    /// is unknown.
    async fn get(&self, repository: &str) -> Result<Option<HashMap<String, String>>>;

    /// Create or overwrite a tag → identity mapping.
    async fn tag(&self, repository: &str, tag: &str, id: &str, force: bool) -> Result<()>;

    /// Associate a digest reference with an identity.
    async fn set_digest(&self, repository: &str, digest: &str, id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// RetainGuard
// ---------------------------------------------------------------------------

/// Scoped layer retention for one pull session. Every identity retained
/// through the guard is released when the guard drops, regardless of how the
/// pipeline exits.
pub struct RetainGuard {
    store: Arc<dyn LayerStore>,
    session: String,
    ids: Vec<String>,
}

impl RetainGuard {
    pub fn new(store: Arc<dyn LayerStore>, session: impl Into<String>) -> Self {
        Self {
            store,
            session: session.into(),
            ids: Vec::new(),
        }
    }

    /// Retain one identity for this session.
    pub fn retain(&mut self, id: &str) {
        let id = id.to_string();
        self.store.retain(&self.session, std::slice::from_ref(&id));
        self.ids.push(id);
    }

    /// Identities retained so far, in retention order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl Drop for RetainGuard {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            self.store.release(&self.session, &self.ids);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
