use serde::{Deserialize, Serialize};

use crate::types::{ArtifactState, ChunkRecord};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks how much of an artifact the store already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatusRequest {
    pub name: String,
}

/// Header of a single chunk write. The chunk bytes travel as the frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutChunkRequest {
    pub name: String,
    pub chunk_id: u64,
    pub offset: u64,
    /// Chunk count the sender planned, if known. Writes past it are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    /// SHA-256 hex of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Merges all chunk records of an artifact into the published artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub name: String,
    pub total_size: u64,
    pub total_chunks: u64,
}

/// First message of a stream upload; names the target once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOpenRequest {
    pub name: String,
}

/// Header of one stream message. The bytes travel as the frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamChunkHeader {
    /// Absolute byte offset of the payload within the artifact.
    pub offset: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Store-side view of an artifact, used to resume.
///
/// `state` and `uploaded_size` describe partial state first: an upload in
/// progress over an older published version reports `partial`. The
/// published size and the stream destination length are carried apart so
/// each transfer mode can resume from its own kind of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResponse {
    pub uploaded_size: u64,
    pub state: ArtifactState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkRecord>,
    /// Length of the stream destination, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_size: Option<u64>,
    /// Size of the published artifact, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_size: Option<u64>,
}

/// Acknowledges a chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutChunkResponse {
    pub bytes_received: u64,
}

/// Result of a finalize or a closed stream upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub message: String,
    pub size: u64,
    /// SHA-256 hex of the published artifact.
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_chunk_omits_optional_fields() {
        let req = PutChunkRequest {
            name: "dump.bin".into(),
            chunk_id: 3,
            offset: 12,
            total_chunks: None,
            checksum: String::new(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"chunkId\":3"));
        assert!(!json.contains("totalChunks"));
        assert!(!json.contains("checksum"));
    }

    #[test]
    fn put_chunk_legacy_json_defaults() {
        let json = r#"{"name":"a","chunkId":1,"offset":4}"#;
        let req: PutChunkRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.total_chunks, None);
        assert!(req.checksum.is_empty());
    }

    #[test]
    fn check_status_response_roundtrip() {
        let resp = CheckStatusResponse {
            uploaded_size: 8,
            state: ArtifactState::Partial,
            chunks: vec![
                ChunkRecord {
                    id: 0,
                    offset: 0,
                    size: 4,
                },
                ChunkRecord {
                    id: 1,
                    offset: 4,
                    size: 4,
                },
            ],
            stream_size: None,
            finalized_size: Some(3),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"uploadedSize\":8"));
        assert!(json.contains("\"finalizedSize\":3"));
        assert!(!json.contains("streamSize"));
        let parsed: CheckStatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn check_status_response_without_chunks() {
        let json = r#"{"uploadedSize":0,"state":"absent"}"#;
        let parsed: CheckStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.state, ArtifactState::Absent);
        assert!(parsed.chunks.is_empty());
        assert_eq!(parsed.stream_size, None);
        assert_eq!(parsed.finalized_size, None);
    }

    #[test]
    fn finalize_request_field_names() {
        let req = FinalizeRequest {
            name: "x".into(),
            total_size: 7,
            total_chunks: 3,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["totalSize"], 7);
        assert_eq!(v["totalChunks"], 3);
    }
}
