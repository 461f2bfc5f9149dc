//! Per-layer blob download: streaming fetch into a staging file with digest
//! verification.

use std::sync::Arc;

use tempfile::TempPath;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::digest::{Digest, DigestReader};
use crate::error::{PullError, Result};
use crate::manifest::V1Image;
use crate::pool::Broadcaster;
use crate::progress::{truncate_id, ProgressEvent, ProgressReader, ProgressSink};
use crate::registry::Repository;

/// A verified layer staged on local disk, ready for registration. Holding one
/// signals that this pipeline owns registration of the layer.
#[derive(Debug)]
pub(crate) struct StagedLayer {
    pub file: tokio::fs::File,
    pub size: u64,
}

/// Per-layer work unit tracked by the tag pipeline.
///
/// `result_rx` is the single-slot completion signal: exactly one producer
/// pushes `Some(StagedLayer)` (this pipeline downloaded the blob) or `None`
/// (another in-flight pull owns the layer; block on its broadcaster instead).
/// Only the owning pipeline may retire the layer's dedup slot. The staging
/// file is removed when `_staging` drops, on every exit path.
pub(crate) struct DownloadTask {
    pub image: V1Image,
    pub digest: Digest,
    pub pool_key: String,
    pub owned: bool,
    pub broadcaster: Arc<Broadcaster>,
    pub result_rx: oneshot::Receiver<Result<Option<StagedLayer>>>,
    pub _staging: TempPath,
}

/// Worker body for one layer download. Runs concurrently with its siblings
/// and with other pulls' downloaders; always reports through `result_tx`.
pub(crate) async fn download_layer(
    repository: Arc<dyn Repository>,
    image_id: String,
    digest: Digest,
    staging: tokio::fs::File,
    broadcaster: Arc<Broadcaster>,
    result_tx: oneshot::Sender<Result<Option<StagedLayer>>>,
) {
    let outcome = fetch_layer(&*repository, &image_id, &digest, staging, &broadcaster).await;
    let _ = result_tx.send(outcome);
}

async fn fetch_layer(
    repository: &dyn Repository,
    image_id: &str,
    digest: &Digest,
    mut staging: tokio::fs::File,
    broadcaster: &Arc<Broadcaster>,
) -> Result<Option<StagedLayer>> {
    debug!(%digest, image = image_id, "pulling blob");

    let size = repository.stat_blob(digest).await?;
    let stream = repository.open_blob(digest).await?;

    let sink: Arc<dyn ProgressSink> = broadcaster.clone();
    let mut reader = ProgressReader::new(
        DigestReader::new(stream),
        sink,
        truncate_id(image_id),
        "Downloading",
        size,
    );
    tokio::io::copy(&mut reader, &mut staging).await?;

    broadcaster.write(ProgressEvent::status(
        truncate_id(image_id),
        "Verifying Checksum",
    ));

    if !reader.into_inner().verified(digest) {
        let err = PullError::Verification(format!(
            "filesystem layer verification failed for digest {}",
            digest
        ));
        error!(%digest, "layer verification failed");
        return Err(err);
    }

    broadcaster.write(ProgressEvent::status(
        truncate_id(image_id),
        "Download complete",
    ));
    debug!(image = image_id, "downloaded layer to staging file");

    Ok(Some(StagedLayer {
        file: staging,
        size,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
