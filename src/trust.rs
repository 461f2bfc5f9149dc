//! Trust collaborator contracts and the key-verification fold.

use std::borrow::Cow;

use tracing::debug;

use crate::error::{PullError, Result};
use crate::manifest::SignedManifest;

/// Key permission mask required for pulled manifests: read and write.
pub const PERMISSION_READ_WRITE: u16 = 0x03;

/// An opaque serialized public key extracted from a manifest signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureKey(Vec<u8>);

impl SignatureKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The manifest signature primitive: verifies the signature envelope and
/// extracts the public keys that produced it. A structurally invalid
/// signature is an error, distinct from a key that is simply untrusted.
pub trait SignatureVerifier: Send + Sync {
    fn extract_keys(&self, manifest: &SignedManifest) -> Result<Vec<SignatureKey>>;
}

/// Maps a namespace to its permitted public keys.
///
/// `check_key` returns `Ok(true)` for a trusted key, `Ok(false)` or
/// `Err(PullError::NotVerified)` for a checked-but-untrusted key, and any
/// other error for a failure of the check itself.
pub trait TrustStore: Send + Sync {
    fn check_key(&self, namespace: &str, key: &[u8], permission: u16) -> Result<bool>;
}

/// Check the extracted keys against the trust store for `namespace`.
///
/// The namespace is normalized to begin with a path separator. Each key's
/// result overwrites the previous one, so the last key checked decides the
/// outcome; a `NotVerified` classification is a normal trust outcome, while
/// any other trust-store error is fatal.
pub fn verify_trusted_keys(
    trust: &dyn TrustStore,
    namespace: &str,
    keys: &[SignatureKey],
) -> Result<bool> {
    let namespace: Cow<'_, str> = if namespace.starts_with('/') {
        Cow::Borrowed(namespace)
    } else {
        Cow::Owned(format!("/{}", namespace))
    };

    let mut verified = false;
    for key in keys {
        match trust.check_key(&namespace, key.as_bytes(), PERMISSION_READ_WRITE) {
            Ok(v) => verified = v,
            Err(PullError::NotVerified(reason)) => {
                debug!(%reason, "key check result");
                verified = false;
            }
            Err(err) => {
                return Err(PullError::Trust(format!("error running key check: {}", err)));
            }
        }
    }

    if verified {
        debug!("key check result: verified");
    }
    Ok(verified)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
