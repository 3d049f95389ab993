//! Error types for the transport.

use chunkvault_protocol::constants::{
    CODE_BAD_REQUEST, CODE_CHECKSUM_MISMATCH, CODE_INCOMPLETE, CODE_OUT_OF_RANGE, CODE_STORAGE,
};
use chunkvault_protocol::envelope::{EnvelopeError, ErrorBody};
use chunkvault_transfer::TransferError;

/// Errors produced by a service call, local or remote.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("call timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl RpcError {
    /// Wire error code, if the error came from (or is destined for) the store.
    pub fn code(&self) -> Option<i32> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `true` if the store reported missing chunks or nothing to finalize.
    pub fn is_incomplete(&self) -> bool {
        self.code() == Some(CODE_INCOMPLETE)
    }

    /// Converts the error into the body sent back in an `error` envelope.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            RpcError::Remote { code, message } => ErrorBody {
                code: *code,
                message: message.clone(),
            },
            RpcError::Json(e) => ErrorBody {
                code: CODE_BAD_REQUEST,
                message: format!("invalid payload: {e}"),
            },
            RpcError::Protocol(msg) => ErrorBody {
                code: CODE_BAD_REQUEST,
                message: msg.clone(),
            },
            other => ErrorBody {
                code: CODE_STORAGE,
                message: other.to_string(),
            },
        }
    }
}

impl From<ErrorBody> for RpcError {
    fn from(body: ErrorBody) -> Self {
        RpcError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

impl From<EnvelopeError> for RpcError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Json(e) => RpcError::Json(e),
            EnvelopeError::Remote(body) => body.into(),
            other => RpcError::Protocol(other.to_string()),
        }
    }
}

impl From<TransferError> for RpcError {
    fn from(err: TransferError) -> Self {
        let code = match &err {
            TransferError::IncompleteTransfer(_) => CODE_INCOMPLETE,
            TransferError::ChunkOutOfRange { .. } | TransferError::OffsetGap { .. } => {
                CODE_OUT_OF_RANGE
            }
            TransferError::ChecksumMismatch => CODE_CHECKSUM_MISMATCH,
            TransferError::InvalidName(_) | TransferError::InvalidChunkSize(_) => {
                CODE_BAD_REQUEST
            }
            TransferError::Io(_) | TransferError::IntegrityMismatch { .. } => CODE_STORAGE,
        };
        RpcError::Remote {
            code,
            message: err.to_string(),
        }
    }
}
