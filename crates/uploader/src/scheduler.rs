//! Parallel chunk delivery with bounded concurrency and retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chunkvault_protocol::messages::{FinalizeRequest, PutChunkRequest, UploadStatus};
use chunkvault_rpc::{ArtifactService, RpcError};
use chunkvault_transfer::{Chunk, ChunkReader, ChunkSpan, RetryDecision, RetryPolicy};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::reporter::Reporter;
use crate::timed;
use crate::types::{UploadEvent, UploaderConfig};

/// One artifact's worth of chunks to deliver.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub source: PathBuf,
    pub name: String,
    pub total_size: u64,
    pub total_chunks: u64,
    /// Chunks still to send; may be a subset of the full partition.
    pub pending: Vec<ChunkSpan>,
}

/// Delivers chunks through a pool of workers, then finalizes once.
///
/// At most `concurrency` chunks are read and in flight at a time. Each
/// failed attempt is retried after a linear backoff; a chunk that exhausts
/// its attempts cancels the transfer and no finalize is sent.
pub struct ChunkScheduler {
    service: Arc<dyn ArtifactService>,
    concurrency: usize,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl ChunkScheduler {
    pub fn new(
        service: Arc<dyn ArtifactService>,
        config: &UploaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            concurrency: config.concurrency.max(1),
            policy: config.retry_policy(),
            call_timeout: config.call_timeout(),
            cancel,
        }
    }

    /// Overrides the per-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Delivers every pending chunk, then sends the finalize request.
    ///
    /// Returns the store's status and the number of chunks sent.
    pub async fn run(
        &self,
        plan: ChunkPlan,
        reporter: &Reporter,
    ) -> Result<(UploadStatus, u64), UploadError> {
        let sent = self.deliver(&plan, reporter).await?;
        let status = self.finalize(&plan).await?;
        Ok((status, sent))
    }

    /// Sends the pending chunks. Returns how many were acknowledged.
    pub async fn deliver(&self, plan: &ChunkPlan, reporter: &Reporter) -> Result<u64, UploadError> {
        // Cancelled on the first fatal chunk; the caller's token cancels it too.
        let stop = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for span in plan.pending.iter().copied() {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = ChunkJob {
                service: Arc::clone(&self.service),
                source: plan.source.clone(),
                name: plan.name.clone(),
                span,
                total_chunks: plan.total_chunks,
                policy: self.policy,
                call_timeout: self.call_timeout,
                stop: stop.clone(),
                reporter: reporter.clone(),
            };
            workers.spawn(async move {
                let _permit = permit;
                job.run().await
            });
        }

        let mut sent = 0u64;
        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(UploadError::from).and_then(|result| result) {
                Ok(()) => sent += 1,
                // Workers stopped by someone else's failure or by the caller.
                Err(UploadError::Cancelled) => {}
                Err(e) => {
                    stop.cancel();
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(sent)
    }

    /// Asks the store to merge and publish the artifact.
    pub async fn finalize(&self, plan: &ChunkPlan) -> Result<UploadStatus, UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let req = FinalizeRequest {
            name: plan.name.clone(),
            total_size: plan.total_size,
            total_chunks: plan.total_chunks,
        };
        let status = timed(self.call_timeout, self.service.finalize(req))
            .await
            .map_err(UploadError::Finalize)?;
        info!(
            artifact = %plan.name,
            size = status.size,
            digest = %status.sha256,
            "store finalized artifact"
        );
        Ok(status)
    }
}

/// Delivery of a single chunk, retried until it succeeds or runs out of
/// attempts.
struct ChunkJob {
    service: Arc<dyn ArtifactService>,
    source: PathBuf,
    name: String,
    span: ChunkSpan,
    total_chunks: u64,
    policy: RetryPolicy,
    call_timeout: Duration,
    stop: CancellationToken,
    reporter: Reporter,
}

impl ChunkJob {
    async fn run(self) -> Result<(), UploadError> {
        if self.stop.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let chunk = match read_chunk(&self.source, self.span).await {
            Ok(chunk) => chunk,
            Err(e) => {
                error!(artifact = %self.name, chunk_id = self.span.id, "failed to read chunk: {e}");
                self.stop.cancel();
                return Err(e);
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let req = PutChunkRequest {
                name: self.name.clone(),
                chunk_id: chunk.id,
                offset: chunk.offset,
                total_chunks: Some(self.total_chunks),
                checksum: chunk.checksum.clone(),
            };
            let result = timed(
                self.call_timeout,
                self.service.put_chunk(req, chunk.data.clone()),
            )
            .await;

            let err = match result {
                Ok(resp) if resp.bytes_received == chunk.size() => {
                    let uploaded = self.reporter.advance(chunk.size());
                    debug!(
                        artifact = %self.name,
                        chunk_id = chunk.id,
                        offset = chunk.offset,
                        size = chunk.size(),
                        attempt,
                        uploaded,
                        "chunk acknowledged"
                    );
                    return Ok(());
                }
                Ok(resp) => RpcError::Protocol(format!(
                    "store received {} of {} bytes",
                    resp.bytes_received,
                    chunk.size()
                )),
                Err(e) => e,
            };

            match self.policy.after_failure(attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        artifact = %self.name,
                        chunk_id = chunk.id,
                        attempt,
                        ?delay,
                        "chunk upload failed, retrying: {err}"
                    );
                    self.reporter.emit(UploadEvent::ChunkRetry {
                        chunk_id: chunk.id,
                        attempt,
                        delay,
                        error: err.to_string(),
                    });
                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted => {
                    error!(
                        artifact = %self.name,
                        chunk_id = chunk.id,
                        attempts = attempt,
                        "chunk upload failed permanently: {err}"
                    );
                    self.stop.cancel();
                    return Err(UploadError::FatalChunkFailure {
                        chunk_id: chunk.id,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

async fn read_chunk(source: &Path, span: ChunkSpan) -> Result<Chunk, UploadError> {
    let path = source.to_path_buf();
    let chunk = tokio::task::spawn_blocking(move || {
        let mut reader = ChunkReader::new(&path, span.size)?;
        reader.read_span(span)
    })
    .await??;
    Ok(chunk)
}
