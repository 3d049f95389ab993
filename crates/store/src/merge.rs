//! Finalize: merge indexed chunk records into the published artifact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chunkvault_transfer::{HashingWriter, TransferError, calculate_file_checksum};
use tracing::{info, warn};

use crate::layout::{ArtifactPaths, StoredChunk, list_chunks};

/// Write buffer of the merge destination (1 MiB).
const MERGE_BUFFER_SIZE: usize = 1024 * 1024;

/// Size and chunk count the sender declares at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declared {
    pub total_size: u64,
    pub total_chunks: u64,
}

/// A published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub size: u64,
    /// SHA-256 hex of the artifact.
    pub digest: String,
}

/// Merges the chunk records of an artifact and publishes it atomically.
///
/// Records are taken from one directory snapshot and concatenated in
/// numeric id order into a temp file while being hashed, then renamed onto
/// the final path. Any failure before the rename leaves the records intact
/// so the call can be retried.
///
/// Records with an id at or beyond `declared.total_chunks` are not merged;
/// they are deleted together with the partial state.
pub fn finalize(paths: &ArtifactPaths, declared: Declared) -> Result<Published, TransferError> {
    let (chunks, orphans): (Vec<StoredChunk>, Vec<StoredChunk>) =
        list_chunks(&paths.partial_dir)?
            .into_iter()
            .partition(|c| c.id < declared.total_chunks);

    if chunks.is_empty() {
        return finalize_without_records(paths, declared, &orphans);
    }

    validate(&chunks, declared)?;

    let published = publish(paths, &chunks)?;
    info!(
        artifact = %paths.name,
        size = published.size,
        chunks = chunks.len(),
        digest = %published.digest,
        "artifact finalized"
    );
    discard_partial(paths, &orphans);
    Ok(published)
}

fn finalize_without_records(
    paths: &ArtifactPaths,
    declared: Declared,
    orphans: &[StoredChunk],
) -> Result<Published, TransferError> {
    if declared.total_chunks == 0 && declared.total_size == 0 {
        let published = publish(paths, &[])?;
        info!(artifact = %paths.name, "empty artifact finalized");
        discard_partial(paths, orphans);
        return Ok(published);
    }

    // A retried finalize whose first response was lost finds the records
    // already merged and gone.
    if paths.finalized_size()? == Some(declared.total_size) {
        let digest = calculate_file_checksum(&paths.final_path)?;
        info!(artifact = %paths.name, "artifact already finalized");
        discard_partial(paths, orphans);
        return Ok(Published {
            size: declared.total_size,
            digest,
        });
    }

    Err(TransferError::IncompleteTransfer(format!(
        "no chunks stored for {}",
        paths.name
    )))
}

/// Checks that `chunks` (sorted by id) tile `[0, total_size)` with ids
/// `0..total_chunks`.
fn validate(chunks: &[StoredChunk], declared: Declared) -> Result<(), TransferError> {
    let mut expected_offset = 0u64;
    for (index, chunk) in chunks.iter().enumerate() {
        let index = index as u64;
        if chunk.id < index {
            return Err(TransferError::IncompleteTransfer(format!(
                "conflicting records for chunk {}",
                chunk.id
            )));
        }
        if chunk.id > index {
            return Err(TransferError::IncompleteTransfer(format!(
                "missing chunk {index}"
            )));
        }
        if chunk.offset != expected_offset {
            return Err(TransferError::IncompleteTransfer(format!(
                "chunk {} stored at offset {}, expected {expected_offset}",
                chunk.id, chunk.offset
            )));
        }
        expected_offset += chunk.size;
    }

    let count = chunks.len() as u64;
    if count != declared.total_chunks {
        return Err(TransferError::IncompleteTransfer(format!(
            "missing chunks {count}..{}",
            declared.total_chunks
        )));
    }
    if expected_offset != declared.total_size {
        return Err(TransferError::IncompleteTransfer(format!(
            "stored chunks cover {expected_offset} bytes, expected {}",
            declared.total_size
        )));
    }
    Ok(())
}

fn publish(paths: &ArtifactPaths, chunks: &[StoredChunk]) -> Result<Published, TransferError> {
    fs::create_dir_all(&paths.root)?;
    let temp = paths.merge_temp();

    let merged = write_merged(&temp, chunks);
    let published = match merged {
        Ok(published) => published,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&temp, &paths.final_path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(published)
}

fn write_merged(temp: &Path, chunks: &[StoredChunk]) -> Result<Published, TransferError> {
    let file = File::create_new(temp)?;
    let mut dest = HashingWriter::new(BufWriter::with_capacity(MERGE_BUFFER_SIZE, file));

    for chunk in chunks {
        let mut source = File::open(&chunk.path)?;
        let copied = io::copy(&mut source, &mut dest)?;
        if copied != chunk.size {
            return Err(TransferError::IncompleteTransfer(format!(
                "chunk {} changed during merge",
                chunk.id
            )));
        }
    }

    let (mut writer, digest, size) = dest.finish();
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(Published { size, digest })
}

/// Removes the partial state of a published artifact.
///
/// The artifact is already visible at this point, so failures only leave
/// stale records behind and are logged.
fn discard_partial(paths: &ArtifactPaths, orphans: &[StoredChunk]) {
    for orphan in orphans {
        warn!(
            artifact = %paths.name,
            chunk_id = orphan.id,
            offset = orphan.offset,
            "discarding chunk beyond declared count"
        );
    }
    match fs::remove_dir_all(&paths.partial_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(artifact = %paths.name, "failed to remove partial state: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChunkSink, ChunkSlot, IndexedSink};
    use chunkvault_transfer::{MAX_NAME_LEN, checksum_bytes, empty_digest, partition};
    use tempfile::TempDir;

    fn put(sink: &mut IndexedSink, id: u64, offset: u64, data: &[u8]) {
        sink.put(ChunkSlot { id, offset }, data).unwrap();
    }

    fn declared(total_size: u64, total_chunks: u64) -> Declared {
        Declared {
            total_size,
            total_chunks,
        }
    }

    #[test]
    fn seven_mib_in_three_mib_chunks_out_of_order() {
        let dir = TempDir::new().unwrap();
        let source: Vec<u8> = (0..7 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let spans = partition(source.len() as u64, 3 * 1024 * 1024).unwrap();
        assert_eq!(spans.len(), 3);

        let mut sink = IndexedSink::open(dir.path(), "big.bin").unwrap();
        for index in [2usize, 0, 1] {
            let span = spans[index];
            let bytes = &source[span.offset as usize..span.end() as usize];
            put(&mut sink, span.id, span.offset, bytes);
        }

        let published = finalize(sink.paths(), declared(source.len() as u64, 3)).unwrap();
        assert_eq!(published.size, 7 * 1024 * 1024);
        assert_eq!(published.digest, checksum_bytes(&source));
        assert_eq!(fs::read(dir.path().join("big.bin")).unwrap(), source);
        assert!(!sink.paths().partial_dir.exists());
    }

    #[test]
    fn ids_above_nine_merge_in_numeric_order() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "many.bin").unwrap();
        let mut expected = Vec::new();
        for id in 0..12u64 {
            expected.push(id as u8);
        }
        // Lexicographic order would put 10 and 11 right after 1.
        for id in (0..12u64).rev() {
            put(&mut sink, id, id, &[id as u8]);
        }

        let published = finalize(sink.paths(), declared(12, 12)).unwrap();
        assert_eq!(fs::read(dir.path().join("many.bin")).unwrap(), expected);
        assert_eq!(published.digest, checksum_bytes(&expected));
    }

    #[test]
    fn delivery_order_does_not_change_digest() {
        let data = b"0123456789abcdefghij";
        let orders: [[u64; 4]; 3] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]];
        let mut digests = Vec::new();
        for order in orders {
            let dir = TempDir::new().unwrap();
            let mut sink = IndexedSink::open(dir.path(), "p.bin").unwrap();
            for id in order {
                let start = (id * 5) as usize;
                put(&mut sink, id, id * 5, &data[start..start + 5]);
            }
            digests.push(finalize(sink.paths(), declared(20, 4)).unwrap().digest);
        }
        assert!(digests.iter().all(|d| *d == checksum_bytes(data)));
    }

    #[test]
    fn no_records_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let sink = IndexedSink::open(dir.path(), "none.bin").unwrap();
        let err = finalize(sink.paths(), declared(10, 1)).unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
        assert!(!dir.path().join("none.bin").exists());
    }

    #[test]
    fn missing_chunk_keeps_state_for_retry() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "gap.bin").unwrap();
        put(&mut sink, 0, 0, b"aaaa");
        put(&mut sink, 2, 8, b"cccc");

        let err = finalize(sink.paths(), declared(12, 3)).unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
        assert!(!dir.path().join("gap.bin").exists());
        assert_eq!(list_chunks(&sink.paths().partial_dir).unwrap().len(), 2);

        put(&mut sink, 1, 4, b"bbbb");
        let published = finalize(sink.paths(), declared(12, 3)).unwrap();
        assert_eq!(published.digest, checksum_bytes(b"aaaabbbbcccc"));
    }

    #[test]
    fn trailing_chunk_missing_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "t.bin").unwrap();
        put(&mut sink, 0, 0, b"aaaa");
        let err = finalize(sink.paths(), declared(8, 2)).unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
    }

    #[test]
    fn offset_mismatch_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "o.bin").unwrap();
        put(&mut sink, 0, 0, b"aaaa");
        put(&mut sink, 1, 6, b"bbbb");
        let err = finalize(sink.paths(), declared(8, 2)).unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
    }

    #[test]
    fn declared_size_mismatch_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "s.bin").unwrap();
        put(&mut sink, 0, 0, b"aaaa");
        let err = finalize(sink.paths(), declared(5, 1)).unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
    }

    #[test]
    fn zero_length_publishes_empty_artifact_every_time() {
        let dir = TempDir::new().unwrap();
        let sink = IndexedSink::open(dir.path(), "empty.bin").unwrap();
        for _ in 0..2 {
            let published = finalize(sink.paths(), declared(0, 0)).unwrap();
            assert_eq!(published.size, 0);
            assert_eq!(published.digest, empty_digest());
        }
        assert_eq!(fs::read(dir.path().join("empty.bin")).unwrap(), b"");
    }

    #[test]
    fn retry_after_success_returns_same_digest() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "r.bin").unwrap();
        put(&mut sink, 0, 0, b"abc");
        put(&mut sink, 1, 3, b"def");

        let first = finalize(sink.paths(), declared(6, 2)).unwrap();
        let second = finalize(sink.paths(), declared(6, 2)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn orphans_are_excluded_and_removed() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "x.bin").unwrap();
        put(&mut sink, 0, 0, b"abc");
        put(&mut sink, 1, 3, b"def");
        put(&mut sink, 7, 21, b"zzz");

        let published = finalize(sink.paths(), declared(6, 2)).unwrap();
        assert_eq!(published.digest, checksum_bytes(b"abcdef"));
        assert_eq!(fs::read(dir.path().join("x.bin")).unwrap(), b"abcdef");
        assert!(!sink.paths().partial_dir.exists());
    }

    #[test]
    fn no_merge_temp_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut sink = IndexedSink::open(dir.path(), "c.bin").unwrap();
        put(&mut sink, 0, 0, b"abc");
        finalize(sink.paths(), declared(3, 1)).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["c.bin".to_string()]);
    }

    #[test]
    fn longest_accepted_name_finalizes() {
        let dir = TempDir::new().unwrap();
        let name = "n".repeat(MAX_NAME_LEN);
        let mut sink = IndexedSink::open(dir.path(), &name).unwrap();
        put(&mut sink, 0, 0, b"abc");
        put(&mut sink, 1, 3, b"def");

        let published = finalize(sink.paths(), declared(6, 2)).unwrap();
        assert_eq!(published.digest, checksum_bytes(b"abcdef"));
        assert_eq!(fs::read(dir.path().join(&name)).unwrap(), b"abcdef");
        assert!(!sink.paths().partial_dir.exists());
    }
}
