//! Data types for the upload flow.

use std::time::Duration;

use chunkvault_protocol::constants::{DEFAULT_CALL_TIMEOUT, MAX_PAYLOAD_SIZE};
use chunkvault_protocol::types::TransferMode;
use chunkvault_transfer::{DEFAULT_CHUNK_SIZE, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::verify::IntegrityReport;

/// Tuning knobs of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// Chunks in flight at once.
    pub concurrency: usize,
    /// Attempts per chunk before the transfer fails.
    pub max_attempts: u32,
    /// Backoff unit: attempt `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,
    /// Timeout of a single store call.
    pub call_timeout_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
        }
    }
}

impl UploaderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::Config("chunk_size must be > 0".into()));
        }
        // A larger chunk cannot travel in one frame.
        if self.chunk_size > MAX_PAYLOAD_SIZE as u64 {
            return Err(UploadError::Config(format!(
                "chunk_size {} exceeds the {MAX_PAYLOAD_SIZE} byte frame payload limit",
                self.chunk_size
            )));
        }
        if self.concurrency == 0 {
            return Err(UploadError::Config("concurrency must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::Config("max_attempts must be > 0".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(UploadError::Config("call_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Event emitted while an upload runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Bytes acknowledged by the store so far.
    Progress {
        uploaded: u64,
        total: u64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// A chunk call failed and will be retried after `delay`.
    ChunkRetry {
        chunk_id: u64,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The store already held `bytes` of the artifact.
    Resumed { bytes: u64 },
    /// The store published the artifact.
    Finalized { size: u64, digest: String },
    /// Local and store digests differ.
    IntegrityWarning { local: String, remote: String },
}

/// Outcome of a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub name: String,
    pub mode: TransferMode,
    /// Size of the published artifact.
    pub size: u64,
    /// SHA-256 hex reported by the store.
    pub digest: String,
    /// Chunks (or stream messages) sent during this run.
    pub chunks_sent: u64,
    /// Bytes the store already held and were not re-sent.
    pub bytes_skipped: u64,
    pub integrity: IntegrityReport,
}
