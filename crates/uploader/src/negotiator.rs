//! Works out what the store already holds before sending anything.

use std::collections::HashSet;
use std::time::Duration;

use chunkvault_protocol::messages::{CheckStatusRequest, CheckStatusResponse};
use chunkvault_protocol::types::ChunkRecord;
use chunkvault_rpc::ArtifactService;
use chunkvault_transfer::ChunkSpan;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::timed;

/// Resume plan of a parallel upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedResume {
    /// Chunks still to send, in id order.
    pub pending: Vec<ChunkSpan>,
    /// Bytes covered by chunks the store already holds.
    pub skipped_bytes: u64,
}

/// Where a stream upload starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResume {
    /// The store has the whole artifact; send nothing and close.
    Complete,
    /// Continue at this absolute offset.
    ResumeAt(u64),
    /// Stored state does not fit the source; start over at 0.
    Restart,
}

impl StreamResume {
    /// First offset that will be sent.
    pub fn offset(&self, total_size: u64) -> u64 {
        match self {
            StreamResume::Complete => total_size,
            StreamResume::ResumeAt(offset) => *offset,
            StreamResume::Restart => 0,
        }
    }
}

/// Asks the store for an artifact's state and turns it into a resume plan.
pub struct ResumeNegotiator<'a> {
    service: &'a dyn ArtifactService,
    call_timeout: Duration,
}

impl<'a> ResumeNegotiator<'a> {
    pub fn new(service: &'a dyn ArtifactService, call_timeout: Duration) -> Self {
        Self {
            service,
            call_timeout,
        }
    }

    /// Fetches the stored state of `name`.
    pub async fn status(&self, name: &str) -> Result<CheckStatusResponse, UploadError> {
        let req = CheckStatusRequest { name: name.into() };
        let status = timed(self.call_timeout, self.service.check_status(req)).await?;
        debug!(
            artifact = %name,
            state = ?status.state,
            uploaded_size = status.uploaded_size,
            records = status.chunks.len(),
            "store status"
        );
        Ok(status)
    }

    /// Removes already-stored chunks from `plan`.
    ///
    /// A planned chunk is skipped only when a stored record matches its
    /// id, offset and size exactly. Without any records, a published
    /// artifact of the same size counts as fully stored.
    pub fn plan_chunks(
        status: &CheckStatusResponse,
        plan: &[ChunkSpan],
        total_size: u64,
    ) -> ChunkedResume {
        if status.chunks.is_empty() && status.finalized_size == Some(total_size) {
            return ChunkedResume {
                pending: Vec::new(),
                skipped_bytes: total_size,
            };
        }

        let stored: HashSet<ChunkRecord> = status.chunks.iter().copied().collect();
        let mut pending = Vec::with_capacity(plan.len());
        let mut skipped_bytes = 0;
        for span in plan {
            let record = ChunkRecord {
                id: span.id,
                offset: span.offset,
                size: span.size,
            };
            if stored.contains(&record) {
                skipped_bytes += span.size;
            } else {
                pending.push(*span);
            }
        }
        ChunkedResume {
            pending,
            skipped_bytes,
        }
    }

    /// Decides where a stream upload of `total_size` bytes starts.
    ///
    /// A published artifact of the same size is complete. Otherwise the
    /// stream destination is resumed when it fits the source; chunk
    /// records of a parallel upload never count here.
    pub fn plan_stream(status: &CheckStatusResponse, total_size: u64) -> StreamResume {
        if status.finalized_size == Some(total_size) {
            return StreamResume::Complete;
        }
        match status.stream_size {
            Some(len) if len <= total_size => StreamResume::ResumeAt(len),
            None if status.finalized_size.is_none() => StreamResume::ResumeAt(0),
            stream_size => {
                warn!(
                    ?stream_size,
                    finalized_size = ?status.finalized_size,
                    total_size,
                    "stored state does not match source, restarting"
                );
                StreamResume::Restart
            }
        }
    }
}
