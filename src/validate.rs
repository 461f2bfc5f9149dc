//! Structural and trust validation of signed manifests.

use tracing::error;

use crate::digest::Digest;
use crate::error::{PullError, Result};
use crate::manifest::SignedManifest;
use crate::trust::{verify_trusted_keys, SignatureVerifier, TrustStore};

/// Validate a fetched manifest against the tag it was requested by.
///
/// Returns whether the manifest's signature keys are trusted for its
/// namespace. Checks short-circuit in order: a payload that cannot be
/// verified against a digest reference must not be trusted enough to have its
/// structure inspected.
pub fn validate_manifest(
    manifest: &SignedManifest,
    tag: &str,
    trust: &dyn TrustStore,
    signatures: &dyn SignatureVerifier,
) -> Result<bool> {
    // Pull-by-digest: the payload digest must match the requested digest
    // before any other check runs.
    if let Ok(expected) = Digest::parse(tag) {
        let actual = manifest.payload_digest();
        if actual != expected {
            let err = PullError::Verification(format!(
                "image verification failed for digest {}",
                expected
            ));
            error!(%expected, %actual, "manifest payload digest mismatch");
            return Err(err);
        }
    }

    if manifest.schema_version != 1 {
        return Err(PullError::Manifest(format!(
            "unsupported schema version {} for tag {:?}",
            manifest.schema_version, tag
        )));
    }
    if manifest.fs_layers.len() != manifest.history.len() {
        return Err(PullError::Manifest(format!(
            "length of history not equal to number of layers for tag {:?}",
            tag
        )));
    }
    if manifest.fs_layers.is_empty() {
        return Err(PullError::Manifest(format!(
            "no filesystem layers in manifest for tag {:?}",
            tag
        )));
    }

    let keys = signatures.extract_keys(manifest).map_err(|err| {
        PullError::Manifest(format!("error verifying manifest for tag {:?}: {}", tag, err))
    })?;

    verify_trusted_keys(trust, &manifest.name, &keys)
        .map_err(|err| PullError::Trust(format!("error verifying manifest keys: {}", err)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
