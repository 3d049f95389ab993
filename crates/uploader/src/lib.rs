//! Client side of a chunkvault transfer.
//!
//! This crate holds the upload logic only; it talks to a store through
//! the [`ArtifactService`](chunkvault_rpc::ArtifactService) trait, so the
//! same code runs against an in-process store or an `RpcClient`.
//!
//! # Pipeline
//!
//! 1. **Negotiate**: ask the store what it already holds
//! 2. **Deliver**: send the missing chunks (parallel) or the remaining
//!    bytes (stream)
//! 3. **Finalize**: have the store merge and publish the artifact
//! 4. **Verify**: compare the local digest with the store's

pub mod error;
pub mod negotiator;
pub mod reporter;
pub mod scheduler;
pub mod stream;
pub mod types;
pub mod upload;
pub mod verify;

// Re-export primary types for convenience.
pub use error::UploadError;
pub use negotiator::{ChunkedResume, ResumeNegotiator, StreamResume};
pub use scheduler::{ChunkPlan, ChunkScheduler};
pub use types::{UploadEvent, UploadReport, UploaderConfig};
pub use upload::Uploader;
pub use verify::{IntegrityReport, IntegrityVerifier};

use std::time::Duration;

use chunkvault_rpc::{RpcError, ServiceFuture};

/// Runs one store call under `limit`; running out of time is a failed call.
async fn timed<T>(limit: Duration, call: ServiceFuture<'_, T>) -> Result<T, RpcError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RpcError::Timeout))
}
