//! Where an artifact and its partial state live under the store root.
//!
//! ```text
//! <root>/X                       finalized artifact
//! <root>/X.partial/<id>_<off>.chunk   one record per chunk id
//! <root>/X.stream                stream destination
//! <root>/.merge-<uuid>           merge temp, renamed onto X
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chunkvault_transfer::{PARTIAL_SUFFIX, STREAM_SUFFIX, TransferError, validate_artifact_name};

const CHUNK_EXT: &str = ".chunk";

/// Resolved paths of one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub root: PathBuf,
    pub name: String,
    pub final_path: PathBuf,
    pub partial_dir: PathBuf,
    pub stream_path: PathBuf,
}

impl ArtifactPaths {
    /// Validates `name` and resolves its paths under `root`.
    pub fn resolve(root: &Path, name: &str) -> Result<Self, TransferError> {
        validate_artifact_name(name)?;
        Ok(Self {
            root: root.to_path_buf(),
            name: name.to_string(),
            final_path: root.join(name),
            partial_dir: root.join(format!("{name}{PARTIAL_SUFFIX}")),
            stream_path: root.join(format!("{name}{STREAM_SUFFIX}")),
        })
    }

    /// A fresh merge temp path next to the final artifact.
    ///
    /// The name does not embed the artifact name, so its length is fixed.
    pub fn merge_temp(&self) -> PathBuf {
        self.root
            .join(format!(".merge-{}", uuid::Uuid::new_v4()))
    }

    /// Path of the record for chunk `id` at `offset`.
    pub fn chunk_path(&self, id: u64, offset: u64) -> PathBuf {
        self.partial_dir.join(chunk_file_name(id, offset))
    }

    /// A fresh temp path inside the partial directory.
    pub fn chunk_temp(&self, id: u64) -> PathBuf {
        self.partial_dir
            .join(format!(".{id}.tmp-{}", uuid::Uuid::new_v4()))
    }

    /// Size of the finalized artifact, if one is published.
    pub fn finalized_size(&self) -> Result<Option<u64>, TransferError> {
        file_size(&self.final_path)
    }

    /// Length of the stream destination, if one exists.
    pub fn stream_size(&self) -> Result<Option<u64>, TransferError> {
        file_size(&self.stream_path)
    }
}

fn file_size(path: &Path) -> Result<Option<u64>, TransferError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A chunk record found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: u64,
    pub offset: u64,
    pub size: u64,
    pub path: PathBuf,
}

pub fn chunk_file_name(id: u64, offset: u64) -> String {
    format!("{id}_{offset}{CHUNK_EXT}")
}

/// Parses `<id>_<offset>.chunk` numerically. Anything else is not a record.
pub fn parse_chunk_file_name(file_name: &str) -> Option<(u64, u64)> {
    let stem = file_name.strip_suffix(CHUNK_EXT)?;
    let (id, offset) = stem.split_once('_')?;
    Some((id.parse().ok()?, offset.parse().ok()?))
}

/// Lists the chunk records of one artifact, sorted by numeric id.
///
/// A missing partial directory yields an empty list. Temp files are skipped.
pub fn list_chunks(partial_dir: &Path) -> Result<Vec<StoredChunk>, TransferError> {
    let entries = match fs::read_dir(partial_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut chunks = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some((id, offset)) = file_name.to_str().and_then(parse_chunk_file_name) else {
            continue;
        };
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        chunks.push(StoredChunk {
            id,
            offset,
            size: meta.len(),
            path: entry.path(),
        });
    }
    chunks.sort_by_key(|c| (c.id, c.offset));
    Ok(chunks)
}
