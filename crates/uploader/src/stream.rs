//! Sequential stream upload at absolute offsets.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chunkvault_protocol::messages::{StreamChunkHeader, StreamOpenRequest, UploadStatus};
use chunkvault_rpc::ArtifactService;
use chunkvault_transfer::{ChunkReader, TransferError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::UploadError;
use crate::negotiator::StreamResume;
use crate::reporter::Reporter;
use crate::timed;
use crate::types::UploaderConfig;

/// Sends an artifact as one stream, starting where the store left off.
pub struct StreamUploader {
    service: Arc<dyn ArtifactService>,
    chunk_size: u64,
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl StreamUploader {
    pub fn new(
        service: Arc<dyn ArtifactService>,
        config: &UploaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            chunk_size: config.chunk_size,
            call_timeout: config.call_timeout(),
            cancel,
        }
    }

    /// Runs one stream from `resume` to close.
    ///
    /// The target name travels once, in the open message; every chunk
    /// carries its absolute offset. `sent` counts the chunks written, also
    /// when the stream fails part way.
    pub async fn send(
        &self,
        source: &Path,
        name: &str,
        resume: StreamResume,
        total_size: u64,
        reporter: &Reporter,
        sent: &mut u64,
    ) -> Result<UploadStatus, UploadError> {
        let open = StreamOpenRequest { name: name.into() };
        let mut stream = timed(self.call_timeout, self.service.open_stream(open)).await?;

        if resume != StreamResume::Complete {
            let start = resume.offset(total_size);
            let path = source.to_path_buf();
            let chunk_size = self.chunk_size;
            let mut reader = tokio::task::spawn_blocking(move || {
                let mut reader = ChunkReader::new(&path, chunk_size)?;
                reader.seek_to(start)?;
                Ok::<_, TransferError>(reader)
            })
            .await??;
            debug!(artifact = %name, start, "stream positioned");

            let mut wrote_any = false;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(UploadError::Cancelled);
                }

                let (returned, next) = tokio::task::spawn_blocking(move || {
                    let next = reader.next_chunk();
                    (reader, next)
                })
                .await?;
                reader = returned;
                let Some(chunk) = next? else {
                    break;
                };

                let size = chunk.size();
                let header = StreamChunkHeader {
                    offset: chunk.offset,
                };
                timed(self.call_timeout, stream.send(header, chunk.data)).await?;
                *sent += 1;
                wrote_any = true;
                reporter.advance(size);
            }

            // Close publishes only what this stream wrote to. An empty write
            // claims the destination at `start`: at 0 it drops whatever the
            // store held, at the end it adopts a destination already whole.
            if !wrote_any {
                timed(
                    self.call_timeout,
                    stream.send(StreamChunkHeader { offset: start }, Vec::new()),
                )
                .await?;
            }
        }

        let status = timed(self.call_timeout, stream.close()).await?;
        Ok(status)
    }
}
