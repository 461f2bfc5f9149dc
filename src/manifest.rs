use serde::Deserialize;

use crate::digest::Digest;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Signed manifest (schema 1)
// ---------------------------------------------------------------------------

/// A reference to one filesystem layer blob.
#[derive(Debug, Clone, Deserialize)]
pub struct FsLayer {
    /// Content digest of the layer blob.
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// One history entry, carrying the legacy image descriptor for the layer at
/// the same index in `fs_layers`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Embedded JSON document describing the legacy image.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestFields {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    name: String,
    #[serde(default)]
    tag: String,
    #[serde(rename = "fsLayers")]
    fs_layers: Vec<FsLayer>,
    history: Vec<HistoryEntry>,
}

/// A decoded signed manifest: an ordered stack of filesystem layers plus a
/// parallel list of history entries, one legacy image descriptor per layer.
///
/// Wire order puts the image the tag resolves to at index 0. The pipeline
/// walks indices `len-1 → 0`, so the identity decoded last is the artifact's
/// resolved identity.
///
/// The raw signed payload is retained alongside the decoded fields so its
/// digest can be recomputed for pull-by-digest verification.
#[derive(Debug, Clone)]
pub struct SignedManifest {
    pub schema_version: u32,
    pub name: String,
    pub tag: String,
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<HistoryEntry>,
    raw_payload: Vec<u8>,
}

impl SignedManifest {
    /// Decode a manifest from its raw signed payload bytes.
    pub fn from_payload(payload: Vec<u8>) -> Result<Self> {
        let fields: ManifestFields = serde_json::from_slice(&payload)?;
        Ok(Self {
            schema_version: fields.schema_version,
            name: fields.name,
            tag: fields.tag,
            fs_layers: fields.fs_layers,
            history: fields.history,
            raw_payload: payload,
        })
    }

    /// The raw signed payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.raw_payload
    }

    /// Recompute the digest of the raw signed payload.
    pub fn payload_digest(&self) -> Digest {
        Digest::of(&self.raw_payload)
    }
}

// ---------------------------------------------------------------------------
// Legacy image descriptor
// ---------------------------------------------------------------------------

/// The legacy image identity decoded from a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct V1Image {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
}

impl V1Image {
    /// Decode the embedded legacy image document of a history entry.
    pub fn from_history(entry: &HistoryEntry) -> Result<Self> {
        let image: V1Image = serde_json::from_str(&entry.v1_compatibility)?;
        Ok(image)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
