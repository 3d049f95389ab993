//! TCP client (uploader side).
//!
//! Keeps a small pool of idle connections so concurrent chunk uploads do
//! not pay a connect per call. A connection that saw an I/O or framing
//! error is dropped instead of being returned to the pool.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chunkvault_protocol::constants::MessageType;
use chunkvault_protocol::envelope::Message;
use chunkvault_protocol::messages::{
    CheckStatusRequest, CheckStatusResponse, FinalizeRequest, PutChunkRequest, PutChunkResponse,
    StreamChunkHeader, StreamOpenRequest, UploadStatus,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::error::RpcError;
use crate::service::{ArtifactService, ServiceFuture, UploadStream};
use crate::wire::{Frame, read_frame, write_frame};
use crate::{MAX_IDLE_CONNECTIONS, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    async fn connect(addr: SocketAddr) -> Result<Self, RpcError> {
        let stream = match tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(RpcError::Timeout),
        };
        stream.set_nodelay(true)?;
        debug!(%addr, "store connection opened");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::with_capacity(TCP_BUFFER_SIZE, reader),
            writer: BufWriter::with_capacity(TCP_BUFFER_SIZE, writer),
        })
    }

    async fn send(&mut self, message: &Message, payload: &[u8]) -> Result<(), RpcError> {
        write_frame(&mut self.writer, message, payload).await
    }

    async fn receive(&mut self) -> Result<Frame, RpcError> {
        read_frame(&mut self.reader)
            .await?
            .ok_or_else(|| RpcError::Protocol("connection closed by store".into()))
    }
}

/// [`ArtifactService`] implementation that forwards calls to a remote store.
pub struct RpcClient {
    addr: SocketAddr,
    idle: Mutex<Vec<Connection>>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn checkout(&self) -> Result<Connection, RpcError> {
        let pooled = self.idle.lock().unwrap().pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Connection::connect(self.addr).await,
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    async fn call<Req, Resp>(
        &self,
        msg_type: MessageType,
        req: &Req,
        payload: &[u8],
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let id = self.next_id();
        let request = Message::new(id.as_str(), msg_type, Some(req))?;

        let mut conn = self.checkout().await?;
        conn.send(&request, payload).await?;
        let frame = conn.receive().await?;
        // The frame was read completely, so the connection is still aligned
        // even if the store answered with an error.
        self.checkin(conn);

        Ok(frame.message.into_response(&id, msg_type)?)
    }
}

impl ArtifactService for RpcClient {
    fn check_status(&self, req: CheckStatusRequest) -> ServiceFuture<'_, CheckStatusResponse> {
        Box::pin(async move { self.call(MessageType::CheckStatus, &req, &[]).await })
    }

    fn put_chunk(
        &self,
        req: PutChunkRequest,
        payload: Vec<u8>,
    ) -> ServiceFuture<'_, PutChunkResponse> {
        Box::pin(async move { self.call(MessageType::PutChunk, &req, &payload).await })
    }

    fn finalize(&self, req: FinalizeRequest) -> ServiceFuture<'_, UploadStatus> {
        Box::pin(async move { self.call(MessageType::Finalize, &req, &[]).await })
    }

    fn open_stream(&self, req: StreamOpenRequest) -> ServiceFuture<'_, Box<dyn UploadStream>> {
        Box::pin(async move {
            // A stream owns its connection until close; it never goes back
            // to the pool.
            let mut conn = self.checkout().await?;
            let id = self.next_id();
            let open = Message::new(id.as_str(), MessageType::StreamOpen, Some(&req))?;
            conn.send(&open, &[]).await?;
            debug!(artifact = %req.name, "upload stream opened");

            let stream: Box<dyn UploadStream> = Box::new(TcpUploadStream {
                conn,
                id,
                sent: 0,
            });
            Ok(stream)
        })
    }
}

/// Client half of a streaming upload over a dedicated connection.
struct TcpUploadStream {
    conn: Connection,
    id: String,
    sent: u64,
}

impl UploadStream for TcpUploadStream {
    fn send(&mut self, header: StreamChunkHeader, payload: Vec<u8>) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            self.sent += 1;
            let msg = Message::new(
                format!("{}.{}", self.id, self.sent),
                MessageType::StreamChunk,
                Some(&header),
            )?;
            self.conn.send(&msg, &payload).await
        })
    }

    fn close(self: Box<Self>) -> ServiceFuture<'static, UploadStatus> {
        Box::pin(async move {
            let TcpUploadStream { mut conn, id, .. } = *self;
            let close = Message::new::<()>(id.as_str(), MessageType::StreamClose, None)?;
            conn.send(&close, &[]).await?;
            let frame = conn.receive().await?;
            Ok(frame.message.into_response(&id, MessageType::StreamClose)?)
        })
    }
}
