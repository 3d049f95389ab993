//! Wire protocol types shared by the chunkvault uploader and store.
//!
//! Every frame on the wire carries a JSON [`Message`] envelope; bulk data
//! (chunk payloads) travels next to it as raw bytes and never inside JSON.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{EnvelopeError, ErrorBody, Message};
pub use messages::{
    CheckStatusRequest, CheckStatusResponse, FinalizeRequest, PutChunkRequest, PutChunkResponse,
    StreamChunkHeader, StreamOpenRequest, UploadStatus,
};
pub use types::{ArtifactState, ChunkRecord, TransferMode};
