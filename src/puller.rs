//! Pull orchestrator and per-tag pipeline.
//!
//! A [`Puller`] resolves the set of tags to fetch for a reference, retrieves
//! and validates each tag's signed manifest, downloads every missing layer
//! blob exactly once across concurrent pulls, verifies every byte, and
//! atomically publishes the result into the layer store and tag mapping.

use std::io::SeekFrom;
use std::sync::Arc;

use tokio::io::AsyncSeekExt;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::digest::Digest;
use crate::download::{download_layer, DownloadTask};
use crate::error::{PullError, PullFailure, Result};
use crate::manifest::{SignedManifest, V1Image};
use crate::pool::{Broadcaster, PullPool};
use crate::progress::{truncate_id, ProgressEvent, ProgressSink};
use crate::reference::{image_reference, is_digest_reference};
use crate::registry::{Repository, RepositoryResolver};
use crate::store::{LayerStore, RetainGuard, TagStore};
use crate::trust::{SignatureVerifier, TrustStore};
use crate::validate::validate_manifest;

// ---------------------------------------------------------------------------
// PullRequest
// ---------------------------------------------------------------------------

/// Immutable per-call input driving one pull.
pub struct PullRequest {
    /// Local repository reference (e.g. "library/alpine").
    pub reference: String,
    /// Explicit tag or digest string; `None` pulls every tag the repository
    /// lists.
    pub tag: Option<String>,
    /// Destination for progress output.
    pub sink: Arc<dyn ProgressSink>,
    /// Report what would be downloaded without downloading anything.
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Puller
// ---------------------------------------------------------------------------

/// The pull orchestrator. Holds the injected collaborators plus the shared
/// dedup pool; one instance is created at process start and shared by
/// reference across all pull invocations.
pub struct Puller {
    resolver: Arc<dyn RepositoryResolver>,
    graph: Arc<dyn LayerStore>,
    tag_store: Arc<dyn TagStore>,
    trust: Arc<dyn TrustStore>,
    signatures: Arc<dyn SignatureVerifier>,
    pool: Arc<PullPool>,
}

impl Puller {
    pub fn new(
        resolver: Arc<dyn RepositoryResolver>,
        graph: Arc<dyn LayerStore>,
        tag_store: Arc<dyn TagStore>,
        trust: Arc<dyn TrustStore>,
        signatures: Arc<dyn SignatureVerifier>,
        pool: Arc<PullPool>,
    ) -> Self {
        Self {
            resolver,
            graph,
            tag_store,
            trust,
            signatures,
            pool,
        }
    }

    /// Pull an artifact. On failure, [`PullFailure::fallback`] reports
    /// whether the caller should retry against an older protocol version.
    pub async fn pull(&self, request: &PullRequest) -> std::result::Result<(), PullFailure> {
        let repository = match self.resolver.repository(&request.reference).await {
            Ok(repository) => repository,
            Err(err) => {
                debug!(%err, "error getting registry");
                return Err(PullFailure {
                    fallback: true,
                    source: err,
                });
            }
        };

        // Fresh per-pull session, scoping layer reference counting so
        // concurrent pulls do not interfere with each other's bookkeeping.
        let session = Uuid::now_v7().to_string();

        match self.pull_repository(&repository, request, &session).await {
            Ok(()) => Ok(()),
            Err(err) if self.resolver.continue_on_error(err.root()) => {
                debug!(%err, "error eligible for protocol fallback");
                Err(PullFailure {
                    fallback: true,
                    source: err,
                })
            }
            Err(err) => Err(PullFailure {
                fallback: false,
                source: err,
            }),
        }
    }

    async fn pull_repository(
        &self,
        repository: &Arc<dyn Repository>,
        request: &PullRequest,
        session: &str,
    ) -> Result<()> {
        let (tags, tagged_name) = match &request.tag {
            Some(tag) => (
                vec![tag.clone()],
                image_reference(&request.reference, tag),
            ),
            None => (repository.tags().await?, request.reference.clone()),
        };

        let (broadcaster, in_flight) = self.pool.acquire("pull", &tagged_name);
        broadcaster.add(request.sink.clone());
        if in_flight {
            // Another pull of the same reference is already taking place;
            // just wait for it to finish.
            if request.dry_run {
                request.sink.write(ProgressEvent::status(
                    "",
                    format!(
                        "Another pull of {} is already in progress; dry-run is not available until it completes",
                        tagged_name
                    ),
                ));
            }
            return broadcaster.wait().await;
        }

        let result = self
            .pull_tags(repository, &tags, &tagged_name, &broadcaster, request, session)
            .await;
        // Retirement carries the final error so late joiners observe it too.
        match result {
            Ok(()) => {
                self.pool.retire("pull", &tagged_name, None);
                Ok(())
            }
            Err(err) => {
                let err = err.into_shared();
                self.pool.retire("pull", &tagged_name, Some(err.clone()));
                Err(PullError::Shared(err))
            }
        }
    }

    async fn pull_tags(
        &self,
        repository: &Arc<dyn Repository>,
        tags: &[String],
        tagged_name: &str,
        out: &Arc<Broadcaster>,
        request: &PullRequest,
        session: &str,
    ) -> Result<()> {
        let mut layers_downloaded = false;
        for tag in tags {
            let pulled_new = self
                .pull_tag(repository, tag, tagged_name, out, request, session)
                .await?;
            layers_downloaded = layers_downloaded || pulled_new;
        }

        if request.dry_run {
            out.write(ProgressEvent::status(
                "",
                format!("Status: Dry run complete for {}", tagged_name),
            ));
        } else if layers_downloaded {
            out.write(ProgressEvent::status(
                "",
                format!("Status: Downloaded newer image for {}", tagged_name),
            ));
        } else {
            out.write(ProgressEvent::status(
                "",
                format!("Status: Image is up to date for {}", tagged_name),
            ));
        }
        Ok(())
    }

    /// Pull one tagged artifact. Returns whether anything new arrived: fresh
    /// layers, or a tag mapping that did not previously exist.
    async fn pull_tag(
        &self,
        repository: &Arc<dyn Repository>,
        tag: &str,
        tagged_name: &str,
        out: &Arc<Broadcaster>,
        request: &PullRequest,
        session: &str,
    ) -> Result<bool> {
        debug!(tag, "pulling tag");

        let manifest = repository.manifest_by_tag(tag).await?;
        let verified =
            validate_manifest(&manifest, tag, self.trust.as_ref(), self.signatures.as_ref())?;
        if verified {
            info!(image = tagged_name, "image manifest has been verified");
        }

        out.write(ProgressEvent::status(
            tag,
            format!("Pulling from {}", repository.name()),
        ));

        let mut retained = RetainGuard::new(self.graph.clone(), session);
        let mut downloads: Vec<DownloadTask> = Vec::new();

        let result = self
            .pull_tag_layers(
                repository,
                &manifest,
                tag,
                out,
                request,
                &mut retained,
                &mut downloads,
                verified,
            )
            .await;

        // Deferred cleanup on every exit path: retire each owned layer slot
        // with the final error so concurrent listeners observe the same
        // outcome. Staging files are removed when the tasks drop, and the
        // retain guard releases every identity for this session.
        match result {
            Ok(updated) => {
                for task in downloads.iter().filter(|t| t.owned) {
                    self.pool.retire("pull", &task.pool_key, None);
                }
                Ok(updated)
            }
            Err(err) => {
                let err = err.into_shared();
                for task in downloads.iter().filter(|t| t.owned) {
                    self.pool.retire("pull", &task.pool_key, Some(err.clone()));
                }
                Err(PullError::Shared(err))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pull_tag_layers(
        &self,
        repository: &Arc<dyn Repository>,
        manifest: &SignedManifest,
        tag: &str,
        out: &Arc<Broadcaster>,
        request: &PullRequest,
        retained: &mut RetainGuard,
        downloads: &mut Vec<DownloadTask>,
        verified: bool,
    ) -> Result<bool> {
        let mut total_size: u64 = 0;
        let mut layer_count = 0usize;

        if request.dry_run {
            out.write(ProgressEvent::status(
                "",
                "Dry run: nothing will be downloaded",
            ));
        }

        // Newest-first: the identity decoded from wire index 0, visited last,
        // is the tag's target.
        for i in (0..manifest.fs_layers.len()).rev() {
            let image = V1Image::from_history(&manifest.history[i])?;
            retained.retain(&image.id);

            if self.graph.exists(&image.id) {
                debug!(id = %image.id, "layer already exists");
                out.write(ProgressEvent::status(
                    truncate_id(&image.id),
                    "Already exists",
                ));
                continue;
            }

            let digest = Digest::parse(&manifest.fs_layers[i].blob_sum)?;
            let size = repository.stat_blob(&digest).await?;
            total_size += size;
            layer_count += 1;

            if request.dry_run {
                debug!(id = %image.id, size, "layer would be downloaded");
                continue;
            }

            out.write(ProgressEvent::status(
                truncate_id(&image.id),
                "Pulling fs layer",
            ));

            let (staging, staging_path) = tempfile::NamedTempFile::new()?.into_parts();
            let staging = tokio::fs::File::from_std(staging);

            let pool_key = format!("layer:{}", image.id);
            let (layer_broadcaster, in_flight) = self.pool.acquire("pull", &pool_key);
            layer_broadcaster.add(out.clone() as Arc<dyn ProgressSink>);

            let (result_tx, result_rx) = oneshot::channel();
            if in_flight {
                // Another concurrent pull is already fetching this content;
                // the empty result tells the await loop to block on its
                // broadcaster.
                let _ = result_tx.send(Ok(None));
            } else {
                tokio::spawn(download_layer(
                    repository.clone(),
                    image.id.clone(),
                    digest.clone(),
                    staging,
                    layer_broadcaster.clone(),
                    result_tx,
                ));
            }

            downloads.push(DownloadTask {
                image,
                digest,
                pool_key,
                owned: !in_flight,
                broadcaster: layer_broadcaster,
                result_rx,
                _staging: staging_path,
            });
        }

        if request.dry_run {
            out.write(ProgressEvent::status(
                tag,
                format!(
                    "Dry run: {} bytes to be downloaded in {} layers",
                    total_size, layer_count
                ),
            ));
            return Ok(true);
        }

        let mut tag_updated = false;
        for task in downloads.iter_mut() {
            let staged = (&mut task.result_rx).await.map_err(|_| {
                PullError::Storage("layer download worker dropped its result channel".to_string())
            })??;

            let Some(staged) = staged else {
                // A different pull is downloading and registering this layer.
                task.broadcaster.wait().await?;
                continue;
            };

            let mut file = staged.file;
            file.seek(SeekFrom::Start(0)).await?;
            let reader = crate::progress::ProgressReader::new(
                file,
                task.broadcaster.clone() as Arc<dyn ProgressSink>,
                truncate_id(&task.image.id),
                "Extracting",
                staged.size,
            );
            self.graph.register(&task.image, Box::new(reader)).await?;
            self.graph.set_digest(&task.image.id, &task.digest).await?;

            task.broadcaster.write(ProgressEvent::status(
                truncate_id(&task.image.id),
                "Pull complete",
            ));
            task.broadcaster.close(None);
            tag_updated = true;
        }

        let manifest_digest = manifest.payload_digest();

        // No layers downloaded: the pull still counts as an update when the
        // tag mapping did not previously exist.
        if !tag_updated {
            match self.tag_store.get(&request.reference).await? {
                Some(mapping) => {
                    if !mapping.contains_key(tag) {
                        tag_updated = true;
                    }
                }
                None => tag_updated = true,
            }
        }

        if verified && tag_updated {
            out.write(ProgressEvent::status(
                format!("{}:{}", repository.name(), tag),
                "The image you are pulling has been verified. Important: image verification \
                 is a tech preview feature and should not be relied on to provide security.",
            ));
        }

        let resolved_id = retained
            .ids()
            .last()
            .cloned()
            .ok_or_else(|| PullError::Manifest(format!("no layers resolved for tag {:?}", tag)))?;

        if is_digest_reference(tag) {
            self.tag_store
                .set_digest(&request.reference, tag, &resolved_id)
                .await?;
        } else {
            self.tag_store
                .tag(&request.reference, tag, &resolved_id, true)
                .await?;
        }

        out.write(ProgressEvent::status(
            "",
            format!("Digest: {}", manifest_digest),
        ));

        Ok(tag_updated)
    }
}
