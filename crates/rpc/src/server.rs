//! TCP server (store side).
//!
//! Accepts connections until cancelled and serves each one on its own task,
//! dispatching frames to an [`ArtifactService`].

use std::net::SocketAddr;
use std::sync::Arc;

use chunkvault_protocol::constants::{CODE_NOT_IMPLEMENTED, MessageType};
use chunkvault_protocol::envelope::Message;
use chunkvault_protocol::messages::{StreamChunkHeader, StreamOpenRequest};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::TCP_BUFFER_SIZE;
use crate::error::RpcError;
use crate::service::{ArtifactService, UploadStream};
use crate::wire::{Frame, read_frame, write_frame};

/// Serves an [`ArtifactService`] over TCP.
pub struct RpcServer {
    service: Arc<dyn ArtifactService>,
    cancel: CancellationToken,
}

impl RpcServer {
    pub fn new(service: Arc<dyn ArtifactService>, cancel: CancellationToken) -> Self {
        Self { service, cancel }
    }

    /// Binds a listener on `addr` (port 0 = OS-assigned).
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RpcError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "store listener bound");
        Ok(listener)
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RpcError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("store server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(%peer_addr, "connection accepted");
                            let service = Arc::clone(&self.service);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(service, stream, cancel).await {
                                    warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    service: Arc<dyn ArtifactService>,
    stream: TcpStream,
    cancel: CancellationToken,
) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
    let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame(&mut reader) => frame?,
        };
        let Some(frame) = frame else {
            debug!("connection closed by peer");
            return Ok(());
        };

        if frame.message.msg_type == MessageType::StreamOpen {
            serve_stream(service.as_ref(), frame, &mut reader, &mut writer).await?;
            continue;
        }

        let reply = dispatch_unary(service.as_ref(), frame).await;
        write_frame(&mut writer, &reply, &[]).await?;
    }
}

/// Runs one unary call and builds the reply envelope.
async fn dispatch_unary(service: &dyn ArtifactService, frame: Frame) -> Message {
    let msg = frame.message;
    let result = match msg.msg_type {
        MessageType::CheckStatus => match msg.payload_as() {
            Ok(req) => respond(&msg, service.check_status(req).await),
            Err(e) => Err(e.into()),
        },
        MessageType::PutChunk => match msg.payload_as() {
            Ok(req) => respond(&msg, service.put_chunk(req, frame.payload).await),
            Err(e) => Err(e.into()),
        },
        MessageType::Finalize => match msg.payload_as() {
            Ok(req) => respond(&msg, service.finalize(req).await),
            Err(e) => Err(e.into()),
        },
        other => {
            return msg.reply_error(
                CODE_NOT_IMPLEMENTED,
                format!("unexpected message type {other:?}"),
            );
        }
    };

    result.unwrap_or_else(|e| {
        let body = e.to_body();
        msg.reply_error(body.code, body.message)
    })
}

/// Serves a client-streaming upload from `stream_open` to `stream_close`.
///
/// Frames are always drained up to the close frame so the connection stays
/// aligned even after the store rejected part of the stream.
async fn serve_stream<R, W>(
    service: &dyn ArtifactService,
    open: Frame,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut state: Result<Box<dyn UploadStream>, RpcError> =
        match open.message.payload_as::<StreamOpenRequest>() {
            Ok(req) => {
                debug!(artifact = %req.name, "stream opened");
                service.open_stream(req).await
            }
            Err(e) => Err(e.into()),
        };

    loop {
        let Some(frame) = read_frame(reader).await? else {
            // Peer went away mid-stream; whatever reached the store stays
            // there for a later resume.
            debug!("stream abandoned by peer");
            return Ok(());
        };

        match frame.message.msg_type {
            MessageType::StreamChunk => {
                if let Ok(stream) = state.as_mut() {
                    let sent = match frame.message.payload_as::<StreamChunkHeader>() {
                        Ok(header) => stream.send(header, frame.payload).await,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = sent {
                        warn!("stream chunk rejected: {e}");
                        state = Err(e);
                    }
                }
            }
            MessageType::StreamClose => {
                let result = match state {
                    Ok(stream) => stream.close().await,
                    Err(e) => Err(e),
                };
                let reply = respond(&frame.message, result).unwrap_or_else(|e| {
                    let body = e.to_body();
                    frame.message.reply_error(body.code, body.message)
                });
                write_frame(writer, &reply, &[]).await?;
                return Ok(());
            }
            other => {
                return Err(RpcError::Protocol(format!(
                    "unexpected {other:?} inside stream"
                )));
            }
        }
    }
}

fn respond<T: Serialize>(msg: &Message, result: Result<T, RpcError>) -> Result<Message, RpcError> {
    Ok(msg.respond(&result?)?)
}
