//! Chunk destinations.
//!
//! Both sinks are synchronous and are driven from `spawn_blocking` by the
//! service. Neither keeps state between requests that is not on disk, so a
//! store restart loses nothing that was acknowledged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chunkvault_protocol::types::TransferMode;
use chunkvault_transfer::{HashingWriter, TransferError, calculate_file_checksum};
use tracing::debug;

use crate::layout::{ArtifactPaths, list_chunks};
use crate::merge::{self, Declared, Published};

/// Buffer used when hashing bytes already on disk.
const PREFIX_BUFFER_SIZE: usize = 1024 * 1024;

/// Where a chunk goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSlot {
    pub id: u64,
    pub offset: u64,
}

/// A destination for the chunks of one artifact.
pub trait ChunkSink: Send {
    /// Stores `data` at `slot`. Returns the number of bytes received.
    fn put(&mut self, slot: ChunkSlot, data: &[u8]) -> Result<u64, TransferError>;

    /// Bytes durably held for this artifact.
    fn stored_bytes(&self) -> Result<u64, TransferError>;

    /// Publishes the artifact and returns its size and digest.
    ///
    /// `declared` is the size and chunk count the sender planned. The
    /// indexed sink needs it to validate the record set; the offset sink
    /// only checks the size when given.
    fn finish(self: Box<Self>, declared: Option<Declared>) -> Result<Published, TransferError>;
}

/// Opens the sink matching `mode` for artifact `name` under `root`.
pub fn open_sink(
    root: &Path,
    name: &str,
    mode: TransferMode,
) -> Result<Box<dyn ChunkSink>, TransferError> {
    Ok(match mode {
        TransferMode::Chunked => Box::new(IndexedSink::open(root, name)?),
        TransferMode::Stream => Box::new(OffsetSink::open(root, name)?),
    })
}

// ---------------------------------------------------------------------------
// IndexedSink
// ---------------------------------------------------------------------------

/// One file per chunk id under `<root>/X.partial/`.
///
/// Each record is written to a temp file and renamed into place, so a
/// record is either absent or complete. Re-writing an id replaces it.
pub struct IndexedSink {
    paths: ArtifactPaths,
}

impl IndexedSink {
    pub fn open(root: &Path, name: &str) -> Result<Self, TransferError> {
        Ok(Self {
            paths: ArtifactPaths::resolve(root, name)?,
        })
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    fn write_record(&self, slot: ChunkSlot, data: &[u8]) -> Result<(), TransferError> {
        fs::create_dir_all(&self.paths.partial_dir)?;

        let temp = self.paths.chunk_temp(slot.id);
        let written = File::create(&temp).and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        // A record for the same id at another offset comes from an earlier
        // plan with a different chunk size; it must not survive next to the
        // new one.
        for stale in list_chunks(&self.paths.partial_dir)? {
            if stale.id == slot.id && stale.offset != slot.offset {
                match fs::remove_file(&stale.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        let _ = fs::remove_file(&temp);
                        return Err(e.into());
                    }
                }
            }
        }

        if let Err(e) = fs::rename(&temp, self.paths.chunk_path(slot.id, slot.offset)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ChunkSink for IndexedSink {
    fn put(&mut self, slot: ChunkSlot, data: &[u8]) -> Result<u64, TransferError> {
        self.write_record(slot, data)?;
        debug!(
            artifact = %self.paths.name,
            chunk_id = slot.id,
            offset = slot.offset,
            size = data.len(),
            "chunk stored"
        );
        Ok(data.len() as u64)
    }

    fn stored_bytes(&self) -> Result<u64, TransferError> {
        Ok(list_chunks(&self.paths.partial_dir)?
            .iter()
            .map(|c| c.size)
            .sum())
    }

    fn finish(self: Box<Self>, declared: Option<Declared>) -> Result<Published, TransferError> {
        let declared = declared.ok_or_else(|| {
            TransferError::IncompleteTransfer("finalize requires a declared size".into())
        })?;
        merge::finalize(&self.paths, declared)
    }
}

// ---------------------------------------------------------------------------
// OffsetSink
// ---------------------------------------------------------------------------

/// A single destination `<root>/X.stream` written at absolute offsets.
///
/// The digest is kept running: bytes already on disk are hashed once when
/// the sink positions itself, new bytes as they are written.
pub struct OffsetSink {
    paths: ArtifactPaths,
    dest: Option<HashingWriter<File>>,
}

impl OffsetSink {
    pub fn open(root: &Path, name: &str) -> Result<Self, TransferError> {
        let paths = ArtifactPaths::resolve(root, name)?;
        fs::create_dir_all(&paths.root)?;
        Ok(Self { paths, dest: None })
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Opens the destination positioned at `offset`.
    ///
    /// Anything past `offset` is truncated; an offset past the end is a gap.
    fn position(&mut self, offset: u64) -> Result<(), TransferError> {
        if let Some(mut old) = self.dest.take() {
            old.flush()?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.paths.stream_path)?;
        let stored = file.metadata()?.len();
        if offset > stored {
            return Err(TransferError::OffsetGap { stored, offset });
        }
        if offset < stored {
            debug!(artifact = %self.paths.name, stored, offset, "truncating stream destination");
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(0))?;

        let mut dest = HashingWriter::new(file);
        let mut buf = vec![0u8; PREFIX_BUFFER_SIZE];
        let mut remaining = offset;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = dest.get_mut().read(&mut buf[..want])?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            dest.absorb(&buf[..n]);
            remaining -= n as u64;
        }

        self.dest = Some(dest);
        Ok(())
    }
}

impl ChunkSink for OffsetSink {
    fn put(&mut self, slot: ChunkSlot, data: &[u8]) -> Result<u64, TransferError> {
        let aligned = self
            .dest
            .as_ref()
            .is_some_and(|dest| dest.written() == slot.offset);
        if !aligned {
            self.position(slot.offset)?;
        }

        let dest = self
            .dest
            .as_mut()
            .ok_or_else(|| io::Error::other("stream destination not open"))?;
        dest.write_all(data)?;
        Ok(data.len() as u64)
    }

    fn stored_bytes(&self) -> Result<u64, TransferError> {
        match &self.dest {
            Some(dest) => Ok(dest.written()),
            None => Ok(self.paths.stream_size()?.unwrap_or(0)),
        }
    }

    fn finish(
        mut self: Box<Self>,
        declared: Option<Declared>,
    ) -> Result<Published, TransferError> {
        if self.dest.is_none() {
            // Nothing was written through this sink. A published artifact is
            // reported as is; a destination left by another stream is not
            // ours to publish.
            if let Some(size) = self.paths.finalized_size()? {
                let digest = calculate_file_checksum(&self.paths.final_path)?;
                debug!(
                    artifact = %self.paths.name,
                    size,
                    "close without data, artifact already published"
                );
                return Ok(Published { size, digest });
            }
            match self.paths.stream_size()? {
                Some(len) => self.position(len)?,
                None => self.position(0)?,
            }
        }

        let dest = self
            .dest
            .take()
            .ok_or_else(|| io::Error::other("stream destination not open"))?;
        let (mut file, digest, size) = dest.finish();
        file.flush()?;

        if let Some(declared) = declared
            && declared.total_size != size
        {
            return Err(TransferError::IncompleteTransfer(format!(
                "stream holds {size} bytes, expected {}",
                declared.total_size
            )));
        }

        file.sync_all()?;
        drop(file);
        fs::rename(&self.paths.stream_path, &self.paths.final_path)?;
        Ok(Published { size, digest })
    }
}
