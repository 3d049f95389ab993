use crate::TransferError;

/// Byte range of one chunk within an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpan {
    /// 0-based sequence number.
    pub id: u64,
    /// Byte offset within the artifact (`id * chunk_size`).
    pub offset: u64,
    /// Size in bytes; only the last chunk may be smaller than the chunk size.
    pub size: u64,
}

impl ChunkSpan {
    /// First byte past this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A chunk of artifact data for transfer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based sequence number.
    pub id: u64,
    /// Byte offset within the artifact.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns the span this chunk covers.
    pub fn span(&self) -> ChunkSpan {
        ChunkSpan {
            id: self.id,
            offset: self.offset,
            size: self.size(),
        }
    }
}

/// Number of chunks needed for `total_size` bytes.
///
/// Zero-length artifacts have zero chunks.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> Result<u64, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }
    Ok(total_size.div_ceil(chunk_size))
}

/// Splits `[0, total_size)` into consecutive fixed-size chunks.
pub fn partition(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpan>, TransferError> {
    let count = chunk_count(total_size, chunk_size)?;
    Ok((0..count)
        .map(|id| {
            let offset = id * chunk_size;
            ChunkSpan {
                id,
                offset,
                size: chunk_size.min(total_size - offset),
            }
        })
        .collect())
}
