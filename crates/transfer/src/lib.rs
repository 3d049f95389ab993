//! Chunked artifact transfer primitives shared by the uploader and the store.
//!
//! - [`partition`] splits an artifact into fixed-size [`ChunkSpan`]s.
//! - [`ChunkReader`] reads chunk payloads from a local source.
//! - [`HashingWriter`] and [`calculate_file_checksum`] produce the SHA-256
//!   digests both ends compare.
//! - [`RetryPolicy`] and [`ProgressCounter`] drive the client scheduler.

mod chunked;
mod progress;
mod retry;
mod types;
mod validation;

pub use chunked::{
    ChunkReader, HashingWriter, calculate_file_checksum, checksum_bytes, empty_digest,
};
pub use progress::{ProgressCounter, SpeedCalculator};
pub use retry::{RetryDecision, RetryPolicy};
pub use types::{Chunk, ChunkSpan, chunk_count, partition};
pub use validation::{MAX_NAME_LEN, PARTIAL_SUFFIX, STREAM_SUFFIX, validate_artifact_name};

/// Default chunk size: 4 MiB.
///
/// Larger chunks reduce per-chunk overhead (SHA-256, ACKs, syscalls).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by chunk transfer operations on either side.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incomplete transfer: {0}")]
    IncompleteTransfer(String),

    #[error("integrity mismatch: local {local}, remote {remote}")]
    IntegrityMismatch { local: String, remote: String },

    #[error("chunk {chunk_id} out of range (artifact has {total_chunks} chunks)")]
    ChunkOutOfRange { chunk_id: u64, total_chunks: u64 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("offset gap: destination holds {stored} bytes, chunk starts at {offset}")]
    OffsetGap { stored: u64, offset: u64 },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),
}
