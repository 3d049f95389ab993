//! Upload error types.

use chunkvault_rpc::RpcError;
use chunkvault_transfer::TransferError;

/// Errors produced during an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("store error: {0}")]
    Rpc(#[from] RpcError),

    #[error("chunk {chunk_id} failed after {attempts} attempts: {source}")]
    FatalChunkFailure {
        chunk_id: u64,
        attempts: u32,
        #[source]
        source: RpcError,
    },

    #[error("finalize failed: {0}")]
    Finalize(#[source] RpcError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for UploadError {
    fn from(e: tokio::task::JoinError) -> Self {
        UploadError::Task(e.to_string())
    }
}
