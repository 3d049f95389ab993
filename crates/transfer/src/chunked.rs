use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::{Chunk, ChunkSpan};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of zero bytes.
pub fn empty_digest() -> String {
    checksum_bytes(&[])
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let file = std::fs::File::open(path)?;
    let mut writer = HashingWriter::new(io::sink());
    io::copy(&mut io::BufReader::new(file), &mut writer)?;
    let (_, digest, _) = writer.finish();
    Ok(digest)
}

// ---------------------------------------------------------------------------
// HashingWriter
// ---------------------------------------------------------------------------

/// Forwards writes to an inner writer while hashing every byte that lands.
///
/// Lets a merge or stream destination compute its digest in the same pass
/// that writes the data.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Feeds bytes into the digest without writing them (already on disk).
    pub fn absorb(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.written += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Mutable access to the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the inner writer, the hex digest and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a local source in fixed-size chunks with SHA-256 checksums.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u64,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next sequential chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        let chunk = Chunk {
            id: self.offset / self.chunk_size,
            offset: self.offset,
            checksum: checksum_bytes(&buf),
            data: buf,
        };
        self.offset += n as u64;
        Ok(Some(chunk))
    }

    /// Reads exactly the bytes of `span`, independent of the sequential cursor.
    ///
    /// Fails with an `UnexpectedEof` I/O error if the source shrank.
    pub fn read_span(&mut self, span: ChunkSpan) -> Result<Chunk, TransferError> {
        self.file.seek(SeekFrom::Start(span.offset))?;
        let mut buf = vec![0u8; span.size as usize];
        self.file.read_exact(&mut buf)?;
        self.file.seek(SeekFrom::Start(self.offset))?;
        Ok(Chunk {
            id: span.id,
            offset: span.offset,
            checksum: checksum_bytes(&buf),
            data: buf,
        })
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Configured chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn empty_digest_is_sha256_of_nothing() {
        assert_eq!(
            empty_digest(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "test.bin", data);

        assert_eq!(calculate_file_checksum(&path).unwrap(), checksum_bytes(data));
    }

    #[test]
    fn hashing_writer_matches_one_shot_digest() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"The quick brown fox ").unwrap();
        writer.write_all(b"jumps over the lazy dog").unwrap();
        let (inner, digest, written) = writer.finish();

        assert_eq!(inner, b"The quick brown fox jumps over the lazy dog");
        assert_eq!(written, inner.len() as u64);
        assert_eq!(digest, checksum_bytes(&inner));
    }

    #[test]
    fn hashing_writer_absorb_counts_prefix() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.absorb(b"prefix-");
        writer.write_all(b"tail").unwrap();
        let (inner, digest, written) = writer.finish();

        assert_eq!(inner, b"tail");
        assert_eq!(written, 11);
        assert_eq!(digest, checksum_bytes(b"prefix-tail"));
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.remaining(), 10);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c1.id, c1.offset, c1.size()), (0, 0, 4));
        assert_eq!(&c1.data, b"AABB");
        assert_eq!(c1.checksum, checksum_bytes(b"AABB"));
        assert_eq!(reader.remaining(), 6);

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c2.id, c2.offset), (1, 4));
        assert_eq!(&c2.data, b"CCDD");

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c3.id, c3.offset, c3.size()), (2, 8, 2));
        assert_eq!(&c3.data, b"EE");

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_seek_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        reader.seek_to(6).unwrap();
        assert_eq!(reader.offset(), 6);
        assert_eq!(reader.remaining(), 4);

        let c = reader.next_chunk().unwrap().unwrap();
        assert_eq!(c.offset, 6);
        assert_eq!(&c.data, b"6789");

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_read_span_keeps_cursor() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        let span = ChunkSpan {
            id: 2,
            offset: 8,
            size: 2,
        };
        let c = reader.read_span(span).unwrap();
        assert_eq!(c.id, 2);
        assert_eq!(&c.data, b"89");

        let first = reader.next_chunk().unwrap().unwrap();
        assert_eq!(&first.data, b"0123");
    }

    #[test]
    fn chunk_reader_read_span_past_eof_fails() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123");

        let mut reader = ChunkReader::new(&path, 4).unwrap();
        let span = ChunkSpan {
            id: 1,
            offset: 4,
            size: 4,
        };
        assert!(matches!(reader.read_span(span), Err(TransferError::Io(_))));
    }

    #[test]
    fn chunk_reader_default_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"x");
        let reader = ChunkReader::new(&path, 0).unwrap();
        assert_eq!(reader.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(reader.file_size(), 1);
    }

    #[test]
    fn chunk_reader_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut reader = ChunkReader::new(&path, 4).unwrap();
        assert!(reader.next_chunk().unwrap().is_none());
    }
}
