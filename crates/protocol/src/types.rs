use serde::{Deserialize, Serialize};

/// What the store currently holds under an artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Nothing stored yet.
    Absent,
    /// Chunk records or a stream destination exist, not yet published.
    Partial,
    /// The artifact has been published.
    Finalized,
}

/// A chunk record persisted by the store, as reported to a resuming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u64,
    pub offset: u64,
    pub size: u64,
}

/// How an artifact travels to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Independent chunks delivered in parallel, merged on finalize.
    #[default]
    Chunked,
    /// One sequential stream written at absolute offsets.
    Stream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&ArtifactState::Finalized).unwrap(),
            "\"finalized\""
        );
        let s: ArtifactState = serde_json::from_str("\"absent\"").unwrap();
        assert_eq!(s, ArtifactState::Absent);
    }

    #[test]
    fn transfer_mode_defaults_to_chunked() {
        assert_eq!(TransferMode::default(), TransferMode::Chunked);
        let m: TransferMode = serde_json::from_str("\"stream\"").unwrap();
        assert_eq!(m, TransferMode::Stream);
    }
}
