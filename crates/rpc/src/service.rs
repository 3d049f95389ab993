//! The service seam shared by the in-process store and the TCP client.

use std::future::Future;
use std::pin::Pin;

use chunkvault_protocol::messages::{
    CheckStatusRequest, CheckStatusResponse, FinalizeRequest, PutChunkRequest, PutChunkResponse,
    StreamChunkHeader, StreamOpenRequest, UploadStatus,
};

use crate::error::RpcError;

/// A boxed future returned by service methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RpcError>> + Send + 'a>>;

/// The calls a store answers.
///
/// Implemented by the store itself and by [`RpcClient`](crate::RpcClient),
/// so upload logic runs unchanged in-process or over the network.
pub trait ArtifactService: Send + Sync {
    /// Reports how much of an artifact is already stored.
    fn check_status(&self, req: CheckStatusRequest) -> ServiceFuture<'_, CheckStatusResponse>;

    /// Stores one chunk. Idempotent per `(name, chunk_id)`.
    fn put_chunk(
        &self,
        req: PutChunkRequest,
        payload: Vec<u8>,
    ) -> ServiceFuture<'_, PutChunkResponse>;

    /// Merges stored chunks into the published artifact. Safe to retry.
    fn finalize(&self, req: FinalizeRequest) -> ServiceFuture<'_, UploadStatus>;

    /// Opens a sequential upload stream for one artifact.
    fn open_stream(&self, req: StreamOpenRequest) -> ServiceFuture<'_, Box<dyn UploadStream>>;
}

/// Sending half of a client-streaming upload.
pub trait UploadStream: Send {
    /// Sends bytes positioned at an absolute artifact offset.
    fn send(&mut self, header: StreamChunkHeader, payload: Vec<u8>) -> ServiceFuture<'_, ()>;

    /// Closes the stream and returns the published artifact status.
    fn close(self: Box<Self>) -> ServiceFuture<'static, UploadStatus>;
}
