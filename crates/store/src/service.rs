//! The store as an [`ArtifactService`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chunkvault_protocol::messages::{
    CheckStatusRequest, CheckStatusResponse, FinalizeRequest, PutChunkRequest, PutChunkResponse,
    StreamChunkHeader, StreamOpenRequest, UploadStatus,
};
use chunkvault_protocol::types::TransferMode;
use chunkvault_rpc::{ArtifactService, RpcError, ServiceFuture, UploadStream};
use chunkvault_transfer::{TransferError, checksum_bytes, validate_artifact_name};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::merge::{Declared, Published};
use crate::sink::{ChunkSink, ChunkSlot, open_sink};
use crate::status;

/// Serves uploads into a directory on the local filesystem.
///
/// Chunk writes for the same artifact run without coordination; finalize
/// and stream close are serialized per artifact name.
pub struct StoreService {
    config: StoreConfig,
    locks: Arc<KeyLocks>,
}

impl StoreService {
    /// Creates the service, creating the root directory if needed.
    pub fn new(config: StoreConfig) -> Result<Self, TransferError> {
        fs::create_dir_all(&config.root)?;
        info!(root = %config.root.display(), "store opened");
        Ok(Self {
            config,
            locks: Arc::new(KeyLocks::default()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn check_payload_size(&self, size: u64) -> Result<(), TransferError> {
        if size > self.config.max_chunk_size {
            return Err(TransferError::InvalidChunkSize(size));
        }
        Ok(())
    }
}

impl ArtifactService for StoreService {
    fn check_status(&self, req: CheckStatusRequest) -> ServiceFuture<'_, CheckStatusResponse> {
        Box::pin(async move {
            let root = self.config.root.clone();
            blocking(move || status::inspect(&root, &req.name)).await
        })
    }

    fn put_chunk(
        &self,
        req: PutChunkRequest,
        payload: Vec<u8>,
    ) -> ServiceFuture<'_, PutChunkResponse> {
        Box::pin(async move {
            self.check_payload_size(payload.len() as u64)?;
            if let Some(total_chunks) = req.total_chunks
                && req.chunk_id >= total_chunks
            {
                return Err(TransferError::ChunkOutOfRange {
                    chunk_id: req.chunk_id,
                    total_chunks,
                }
                .into());
            }

            let root = self.config.root.clone();
            let bytes_received = blocking(move || {
                if !req.checksum.is_empty() && checksum_bytes(&payload) != req.checksum {
                    warn!(artifact = %req.name, chunk_id = req.chunk_id, "chunk checksum mismatch");
                    return Err(TransferError::ChecksumMismatch);
                }
                let mut sink = open_sink(&root, &req.name, TransferMode::Chunked)?;
                let slot = ChunkSlot {
                    id: req.chunk_id,
                    offset: req.offset,
                };
                sink.put(slot, &payload)
            })
            .await?;

            Ok(PutChunkResponse { bytes_received })
        })
    }

    fn finalize(&self, req: FinalizeRequest) -> ServiceFuture<'_, UploadStatus> {
        Box::pin(async move {
            validate_artifact_name(&req.name)?;
            let declared = Declared {
                total_size: req.total_size,
                total_chunks: req.total_chunks,
            };

            let guard = self.locks.lock(&req.name).await;
            let root = self.config.root.clone();
            let name = req.name.clone();
            let result = blocking(move || {
                open_sink(&root, &name, TransferMode::Chunked)?.finish(Some(declared))
            })
            .await;
            drop(guard);
            self.locks.prune();

            let published = result?;
            Ok(upload_status(&req.name, published))
        })
    }

    fn open_stream(&self, req: StreamOpenRequest) -> ServiceFuture<'_, Box<dyn UploadStream>> {
        Box::pin(async move {
            let root = self.config.root.clone();
            let name = req.name.clone();
            let sink = blocking(move || open_sink(&root, &name, TransferMode::Stream)).await?;
            debug!(artifact = %req.name, "stream sink opened");

            let stream: Box<dyn UploadStream> = Box::new(StoreStream {
                name: req.name,
                sink: Some(sink),
                locks: Arc::clone(&self.locks),
                max_chunk_size: self.config.max_chunk_size,
                received: 0,
            });
            Ok(stream)
        })
    }
}

/// Store side of one stream upload.
struct StoreStream {
    name: String,
    /// `None` once a write failed; the sink was dropped with it.
    sink: Option<Box<dyn ChunkSink>>,
    locks: Arc<KeyLocks>,
    max_chunk_size: u64,
    received: u64,
}

impl UploadStream for StoreStream {
    fn send(&mut self, header: StreamChunkHeader, payload: Vec<u8>) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            let size = payload.len() as u64;
            if size > self.max_chunk_size {
                self.sink = None;
                return Err(TransferError::InvalidChunkSize(size).into());
            }
            let mut sink = self
                .sink
                .take()
                .ok_or_else(|| RpcError::Protocol("stream already failed".into()))?;

            let slot = ChunkSlot {
                id: self.received,
                offset: header.offset,
            };
            let (sink, result) = tokio::task::spawn_blocking(move || {
                let result = sink.put(slot, &payload);
                (sink, result)
            })
            .await
            .map_err(join_error)?;

            result?;
            self.sink = Some(sink);
            self.received += 1;
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> ServiceFuture<'static, UploadStatus> {
        Box::pin(async move {
            let StoreStream {
                name, sink, locks, ..
            } = *self;
            let sink = sink.ok_or_else(|| RpcError::Protocol("stream already failed".into()))?;

            let guard = locks.lock(&name).await;
            let result = blocking(move || sink.finish(None)).await;
            drop(guard);
            locks.prune();

            let published = result?;
            info!(artifact = %name, size = published.size, "stream upload published");
            Ok(upload_status(&name, published))
        })
    }
}

fn upload_status(name: &str, published: Published) -> UploadStatus {
    UploadStatus {
        message: format!("{name} finalized"),
        size: published.size,
        sha256: published.digest,
    }
}

/// Runs filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, RpcError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(join_error)?
        .map_err(RpcError::from)
}

fn join_error(e: tokio::task::JoinError) -> RpcError {
    RpcError::Io(io::Error::other(format!("store task failed: {e}")))
}

/// One async mutex per artifact name, dropped when nobody holds it.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    fn prune(&self) {
        self.locks
            .lock()
            .unwrap()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkvault_protocol::constants::{
        CODE_BAD_REQUEST, CODE_CHECKSUM_MISMATCH, CODE_INCOMPLETE, CODE_OUT_OF_RANGE,
    };
    use chunkvault_protocol::types::ArtifactState;
    use chunkvault_transfer::empty_digest;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> StoreService {
        StoreService::new(StoreConfig {
            root: dir.path().join("vault"),
            port: 0,
            max_chunk_size: 1024,
        })
        .unwrap()
    }

    fn put(name: &str, chunk_id: u64, offset: u64) -> PutChunkRequest {
        PutChunkRequest {
            name: name.into(),
            chunk_id,
            offset,
            total_chunks: None,
            checksum: String::new(),
        }
    }

    fn finalize_req(name: &str, total_size: u64, total_chunks: u64) -> FinalizeRequest {
        FinalizeRequest {
            name: name.into(),
            total_size,
            total_chunks,
        }
    }

    #[tokio::test]
    async fn put_then_finalize() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        svc.put_chunk(put("a.bin", 1, 3), b"def".to_vec()).await.unwrap();
        let resp = svc.put_chunk(put("a.bin", 0, 0), b"abc".to_vec()).await.unwrap();
        assert_eq!(resp.bytes_received, 3);

        let status = svc
            .check_status(CheckStatusRequest { name: "a.bin".into() })
            .await
            .unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 6);

        let done = svc.finalize(finalize_req("a.bin", 6, 2)).await.unwrap();
        assert_eq!(done.size, 6);
        assert_eq!(done.sha256, checksum_bytes(b"abcdef"));

        let status = svc
            .check_status(CheckStatusRequest { name: "a.bin".into() })
            .await
            .unwrap();
        assert_eq!(status.state, ArtifactState::Finalized);
        assert!(status.chunks.is_empty());
    }

    #[tokio::test]
    async fn chunk_beyond_declared_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut req = put("r.bin", 4, 16);
        req.total_chunks = Some(4);
        let err = svc.put_chunk(req, vec![0; 4]).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_OUT_OF_RANGE));

        let status = svc
            .check_status(CheckStatusRequest { name: "r.bin".into() })
            .await
            .unwrap();
        assert_eq!(status.state, ArtifactState::Absent);
    }

    #[tokio::test]
    async fn bad_checksum_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut req = put("c.bin", 0, 0);
        req.checksum = checksum_bytes(b"other");
        let err = svc.put_chunk(req, b"data".to_vec()).await.unwrap_err();
        assert_eq!(err.code(), Some(CODE_CHECKSUM_MISMATCH));

        let mut req = put("c.bin", 0, 0);
        req.checksum = checksum_bytes(b"data");
        svc.put_chunk(req, b"data".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc
            .put_chunk(put("big.bin", 0, 0), vec![0; 2048])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_BAD_REQUEST));
    }

    #[tokio::test]
    async fn invalid_name_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc
            .check_status(CheckStatusRequest { name: "../x".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_BAD_REQUEST));
    }

    #[tokio::test]
    async fn finalize_without_chunks_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc.finalize(finalize_req("none.bin", 5, 1)).await.unwrap_err();
        assert!(err.is_incomplete());
        assert_eq!(err.code(), Some(CODE_INCOMPLETE));
    }

    #[tokio::test]
    async fn zero_length_finalize() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let done = svc.finalize(finalize_req("empty.bin", 0, 0)).await.unwrap();
        assert_eq!(done.size, 0);
        assert_eq!(done.sha256, empty_digest());
    }

    #[tokio::test]
    async fn concurrent_finalize_is_serialized() {
        let dir = TempDir::new().unwrap();
        let svc = Arc::new(service(&dir));
        for id in 0..8u64 {
            svc.put_chunk(put("k.bin", id, id * 4), vec![id as u8; 4])
                .await
                .unwrap();
        }

        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.finalize(finalize_req("k.bin", 32, 8)).await })
        };
        let b = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.finalize(finalize_req("k.bin", 32, 8)).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(svc.locks.len(), 0);
    }

    #[tokio::test]
    async fn stream_upload_publishes_on_close() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut stream = svc
            .open_stream(StreamOpenRequest { name: "s.bin".into() })
            .await
            .unwrap();
        stream
            .send(StreamChunkHeader { offset: 0 }, b"abc".to_vec())
            .await
            .unwrap();
        stream
            .send(StreamChunkHeader { offset: 3 }, b"def".to_vec())
            .await
            .unwrap();
        let status = stream.close().await.unwrap();
        assert_eq!(status.size, 6);
        assert_eq!(status.sha256, checksum_bytes(b"abcdef"));
        assert_eq!(
            fs::read(svc.root().join("s.bin")).unwrap(),
            b"abcdef".to_vec()
        );
    }

    #[tokio::test]
    async fn stream_gap_fails_and_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut stream = svc
            .open_stream(StreamOpenRequest { name: "g.bin".into() })
            .await
            .unwrap();
        stream
            .send(StreamChunkHeader { offset: 0 }, b"abc".to_vec())
            .await
            .unwrap();
        let err = stream
            .send(StreamChunkHeader { offset: 9 }, b"xyz".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(CODE_OUT_OF_RANGE));
        assert!(stream.close().await.is_err());

        let status = svc
            .check_status(CheckStatusRequest { name: "g.bin".into() })
            .await
            .unwrap();
        assert_eq!(status.state, ArtifactState::Partial);
        assert_eq!(status.uploaded_size, 3);
    }
}
