//! Upload orchestrator.
//!
//! Validates the request, negotiates with the store, runs the parallel or
//! stream delivery, then verifies the published digest.

use std::path::Path;
use std::sync::Arc;

use chunkvault_protocol::messages::UploadStatus;
use chunkvault_protocol::types::TransferMode;
use chunkvault_rpc::ArtifactService;
use chunkvault_transfer::{RetryDecision, chunk_count, partition, validate_artifact_name};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::UploadError;
use crate::negotiator::ResumeNegotiator;
use crate::reporter::Reporter;
use crate::scheduler::{ChunkPlan, ChunkScheduler};
use crate::stream::StreamUploader;
use crate::types::{UploadEvent, UploadReport, UploaderConfig};
use crate::verify::{IntegrityReport, IntegrityVerifier};

/// What a delivery produced before verification.
struct Delivered {
    status: UploadStatus,
    chunks_sent: u64,
    bytes_skipped: u64,
}

/// Uploads local files to a store.
pub struct Uploader {
    service: Arc<dyn ArtifactService>,
    config: UploaderConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl Uploader {
    /// Creates an uploader talking to `service`.
    pub fn new(service: Arc<dyn ArtifactService>, config: UploaderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            service,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token of this uploader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Uploads `source` as artifact `name`.
    pub async fn upload(
        &self,
        source: &Path,
        name: &str,
        mode: TransferMode,
    ) -> Result<UploadReport, UploadError> {
        self.config.validate()?;
        validate_artifact_name(name)?;
        let total_size = tokio::fs::metadata(source).await?.len();
        info!(
            artifact = %name,
            source = %source.display(),
            total_size,
            ?mode,
            "upload starting"
        );

        let mut reporter = Reporter::new(self.events_tx.clone(), total_size);
        let delivered = match mode {
            TransferMode::Chunked => self.upload_chunked(source, name, total_size, &reporter).await,
            TransferMode::Stream => {
                self.upload_stream(source, name, total_size, &mut reporter)
                    .await
            }
        };
        let delivered = match delivered {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(artifact = %name, "upload failed: {e}");
                return Err(e);
            }
        };

        let Delivered {
            status,
            chunks_sent,
            bytes_skipped,
        } = delivered;
        reporter.emit(UploadEvent::Finalized {
            size: status.size,
            digest: status.sha256.clone(),
        });

        let integrity = IntegrityVerifier::verify(source, &status.sha256).await?;
        if let IntegrityReport::Mismatch { local, remote } = &integrity {
            reporter.emit(UploadEvent::IntegrityWarning {
                local: local.clone(),
                remote: remote.clone(),
            });
        }

        info!(
            artifact = %name,
            size = status.size,
            chunks_sent,
            bytes_skipped,
            "upload complete"
        );
        Ok(UploadReport {
            name: name.to_string(),
            mode,
            size: status.size,
            digest: status.sha256,
            chunks_sent,
            bytes_skipped,
            integrity,
        })
    }

    async fn upload_chunked(
        &self,
        source: &Path,
        name: &str,
        total_size: u64,
        reporter: &Reporter,
    ) -> Result<Delivered, UploadError> {
        let spans = partition(total_size, self.config.chunk_size)?;
        let total_chunks = chunk_count(total_size, self.config.chunk_size)?;

        let negotiator = ResumeNegotiator::new(self.service.as_ref(), self.config.call_timeout());
        let stored = negotiator.status(name).await?;
        let resume = ResumeNegotiator::plan_chunks(&stored, &spans, total_size);
        if resume.skipped_bytes > 0 {
            info!(
                artifact = %name,
                skipped_bytes = resume.skipped_bytes,
                pending = resume.pending.len(),
                "resuming upload"
            );
        }
        reporter.skip(resume.skipped_bytes);

        let plan = ChunkPlan {
            source: source.to_path_buf(),
            name: name.to_string(),
            total_size,
            total_chunks,
            pending: resume.pending,
        };
        let scheduler =
            ChunkScheduler::new(Arc::clone(&self.service), &self.config, self.cancel.clone());
        let (status, chunks_sent) = scheduler.run(plan, reporter).await?;

        Ok(Delivered {
            status,
            chunks_sent,
            bytes_skipped: resume.skipped_bytes,
        })
    }

    /// Stream mode. A failed stream is renegotiated and resumed from what
    /// the store kept, under the same retry policy as a chunk.
    async fn upload_stream(
        &self,
        source: &Path,
        name: &str,
        total_size: u64,
        reporter: &mut Reporter,
    ) -> Result<Delivered, UploadError> {
        let negotiator = ResumeNegotiator::new(self.service.as_ref(), self.config.call_timeout());
        let streamer =
            StreamUploader::new(Arc::clone(&self.service), &self.config, self.cancel.clone());
        let policy = self.config.retry_policy();

        let mut chunks_sent = 0u64;
        let mut bytes_skipped = None;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            reporter.restart();

            let result = Self::stream_attempt(
                &negotiator,
                &streamer,
                source,
                name,
                total_size,
                reporter,
                &mut chunks_sent,
            )
            .await;

            let err = match result {
                Ok((status, start)) => {
                    return Ok(Delivered {
                        status,
                        chunks_sent,
                        bytes_skipped: *bytes_skipped.get_or_insert(start),
                    });
                }
                Err((UploadError::Rpc(e), start)) => {
                    if let Some(start) = start {
                        bytes_skipped.get_or_insert(start);
                    }
                    e
                }
                Err((e, _)) => return Err(e),
            };

            let position = reporter.uploaded();
            match policy.after_failure(attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        artifact = %name,
                        attempt,
                        position,
                        ?delay,
                        "stream failed, resuming: {err}"
                    );
                    reporter.emit(UploadEvent::ChunkRetry {
                        chunk_id: position / self.config.chunk_size,
                        attempt,
                        delay,
                        error: err.to_string(),
                    });
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted => {
                    return Err(UploadError::FatalChunkFailure {
                        chunk_id: position / self.config.chunk_size,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// Negotiates and runs one stream. Returns the status and the offset the
    /// stream started at; a failure carries the start offset once known.
    async fn stream_attempt(
        negotiator: &ResumeNegotiator<'_>,
        streamer: &StreamUploader,
        source: &Path,
        name: &str,
        total_size: u64,
        reporter: &Reporter,
        chunks_sent: &mut u64,
    ) -> Result<(UploadStatus, u64), (UploadError, Option<u64>)> {
        let stored = negotiator.status(name).await.map_err(|e| (e, None))?;
        let resume = ResumeNegotiator::plan_stream(&stored, total_size);
        let start = resume.offset(total_size);
        reporter.skip(start);
        let status = streamer
            .send(source, name, resume, total_size, reporter, chunks_sent)
            .await
            .map_err(|e| (e, Some(start)))?;
        Ok((status, start))
    }
}
