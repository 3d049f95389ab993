use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-call timeout for request/response operations.
///
/// Chunk uploads include disk I/O on the store side, so this is generous.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum size of a JSON envelope in a frame (64 KB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum size of a raw payload in a frame (64 MB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Request could not be parsed or carried invalid fields.
pub const CODE_BAD_REQUEST: i32 = 400;

/// Finalize found missing chunks, or nothing to finalize.
pub const CODE_INCOMPLETE: i32 = 409;

/// Chunk id or offset outside the declared artifact.
pub const CODE_OUT_OF_RANGE: i32 = 416;

/// Payload did not match its declared checksum.
pub const CODE_CHECKSUM_MISMATCH: i32 = 422;

/// Storage failure on the store side.
pub const CODE_STORAGE: i32 = 500;

/// Message type not handled by the receiver.
pub const CODE_NOT_IMPLEMENTED: i32 = 501;

/// Message type identifier carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Unary requests
    CheckStatus,
    PutChunk,
    Finalize,

    // Unary responses
    CheckStatusResponse,
    PutChunkResponse,
    FinalizeResponse,

    // Client-streaming upload
    StreamOpen,
    StreamChunk,
    StreamClose,
    UploadStatus,

    Error,
}

impl MessageType {
    /// Returns the response type expected for a unary request type.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::CheckStatus => Some(MessageType::CheckStatusResponse),
            MessageType::PutChunk => Some(MessageType::PutChunkResponse),
            MessageType::Finalize => Some(MessageType::FinalizeResponse),
            MessageType::StreamClose => Some(MessageType::UploadStatus),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::CheckStatusResponse).unwrap();
        assert_eq!(json, "\"check_status_response\"");

        let parsed: MessageType = serde_json::from_str("\"stream_chunk\"").unwrap();
        assert_eq!(parsed, MessageType::StreamChunk);
    }

    #[test]
    fn response_types() {
        assert_eq!(
            MessageType::PutChunk.response_type(),
            Some(MessageType::PutChunkResponse)
        );
        assert_eq!(
            MessageType::StreamClose.response_type(),
            Some(MessageType::UploadStatus)
        );
        assert_eq!(MessageType::StreamChunk.response_type(), None);
    }
}
