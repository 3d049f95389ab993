//! What the store holds for an artifact, as reported by CheckStatus.

use std::path::Path;

use chunkvault_protocol::messages::CheckStatusResponse;
use chunkvault_protocol::types::{ArtifactState, ChunkRecord};
use chunkvault_transfer::TransferError;

use crate::layout::{ArtifactPaths, list_chunks};

/// Reports the stored state of `name`.
///
/// Partial state wins over a published artifact: with a stream destination
/// `uploaded_size` is its length, else with chunk records it is their sum.
/// Only when neither exists does a published artifact report `finalized`.
/// Stream length and published size are reported on their own as well.
pub fn inspect(root: &Path, name: &str) -> Result<CheckStatusResponse, TransferError> {
    let paths = ArtifactPaths::resolve(root, name)?;

    let chunks: Vec<ChunkRecord> = list_chunks(&paths.partial_dir)?
        .into_iter()
        .map(|c| ChunkRecord {
            id: c.id,
            offset: c.offset,
            size: c.size,
        })
        .collect();
    let stream_size = paths.stream_size()?;
    let finalized_size = paths.finalized_size()?;

    let (state, uploaded_size) = match (stream_size, finalized_size) {
        (Some(len), _) => (ArtifactState::Partial, len),
        (None, _) if !chunks.is_empty() => {
            (ArtifactState::Partial, chunks.iter().map(|c| c.size).sum())
        }
        (None, Some(size)) => (ArtifactState::Finalized, size),
        (None, None) => (ArtifactState::Absent, 0),
    };

    Ok(CheckStatusResponse {
        uploaded_size,
        state,
        chunks,
        stream_size,
        finalized_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChunkSink, ChunkSlot, IndexedSink, OffsetSink};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn absent_artifact() {
        let dir = TempDir::new().unwrap();
        let status = inspect(dir.path(), "new.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Absent);
        assert_eq!(status.uploaded_size, 0);
        assert!(status.chunks.is_empty());
    }

    #[test]
    fn partial_chunks_are_listed() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "p.bin").unwrap();
        sink.put(ChunkSlot { id: 2, offset: 8 }, b"cc").unwrap();
        sink.put(ChunkSlot { id: 0, offset: 0 }, b"aaaa").unwrap();

        let status = inspect(dir.path(), "p.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 6);
        assert_eq!(
            status.chunks,
            vec![
                ChunkRecord { id: 0, offset: 0, size: 4 },
                ChunkRecord { id: 2, offset: 8, size: 2 },
            ]
        );
    }

    #[test]
    fn stream_partial_reports_length() {
        let dir = TempDir::new().unwrap();
        let mut sink = OffsetSink::open(dir.path(), "s.bin").unwrap();
        sink.put(ChunkSlot { id: 0, offset: 0 }, b"12345").unwrap();

        let status = inspect(dir.path(), "s.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 5);
        assert_eq!(status.stream_size, Some(5));
    }

    #[test]
    fn finalized_reports_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.bin"), b"published").unwrap();

        let status = inspect(dir.path(), "f.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Finalized);
        assert_eq!(status.uploaded_size, 9);
        assert_eq!(status.finalized_size, Some(9));
        assert_eq!(status.stream_size, None);
    }

    #[test]
    fn stream_partial_over_published_artifact_is_partial() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("v.bin"), b"version one").unwrap();
        fs::write(dir.path().join("v.bin.stream"), b"vers").unwrap();

        let status = inspect(dir.path(), "v.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 4);
        assert_eq!(status.stream_size, Some(4));
        assert_eq!(status.finalized_size, Some(11));
    }

    #[test]
    fn chunk_records_over_published_artifact_are_partial() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("c.bin"), b"old").unwrap();
        let mut sink = IndexedSink::open(dir.path(), "c.bin").unwrap();
        sink.put(ChunkSlot { id: 0, offset: 0 }, b"new!").unwrap();

        let status = inspect(dir.path(), "c.bin").unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 4);
        assert_eq!(status.chunks.len(), 1);
        assert_eq!(status.finalized_size, Some(3));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            inspect(dir.path(), "a/b"),
            Err(TransferError::InvalidName(_))
        ));
    }
}
