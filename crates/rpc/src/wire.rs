//! TCP wire format.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [4 bytes BE: header_len]
//!   [header_len bytes: JSON envelope (Message)]
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: raw payload]
//!
//! UNARY CALL:   request frame -> response frame (same envelope id)
//! STREAM:       stream_open, stream_chunk*, stream_close -> upload_status
//! ```
//!
//! A clean EOF where a frame would start ends the connection.

use chunkvault_protocol::constants::{MAX_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use chunkvault_protocol::envelope::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;

/// One frame read from the wire.
#[derive(Debug)]
pub struct Frame {
    pub message: Message,
    pub payload: Vec<u8>,
}

/// Writes a frame and flushes the writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
    payload: &[u8],
) -> Result<(), RpcError> {
    let header = serde_json::to_vec(message)?;
    if header.len() > MAX_HEADER_SIZE {
        return Err(RpcError::Protocol(format!(
            "header too long: {} bytes (max {MAX_HEADER_SIZE})",
            header.len()
        )));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(RpcError::Protocol(format!(
            "payload too long: {} bytes (max {MAX_PAYLOAD_SIZE})",
            payload.len()
        )));
    }

    writer.write_u32(header.len() as u32).await?;
    writer.write_all(&header).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `None` if the peer closed the connection between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, RpcError> {
    let header_len = match reader.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if header_len == 0 || header_len > MAX_HEADER_SIZE {
        return Err(RpcError::Protocol(format!(
            "invalid header length: {header_len}"
        )));
    }

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).await?;
    let message: Message = serde_json::from_slice(&header)
        .map_err(|e| RpcError::Protocol(format!("invalid envelope: {e}")))?;

    let payload_len = reader.read_u32().await? as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(RpcError::Protocol(format!(
            "payload too long: {payload_len} bytes (max {MAX_PAYLOAD_SIZE})"
        )));
    }

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame { message, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkvault_protocol::constants::MessageType;
    use chunkvault_protocol::messages::{PutChunkRequest, StreamChunkHeader};

    #[tokio::test]
    async fn frame_with_payload_roundtrip() {
        let req = PutChunkRequest {
            name: "disk.img".into(),
            chunk_id: 7,
            offset: 28,
            total_chunks: Some(8),
            checksum: String::new(),
        };
        let msg = Message::new("1", MessageType::PutChunk, Some(&req)).unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, b"payload bytes").await.unwrap();

        let mut cursor = &buf[..];
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.message.msg_type, MessageType::PutChunk);
        assert_eq!(frame.payload, b"payload bytes");
        let parsed: PutChunkRequest = frame.message.parse_payload().unwrap().unwrap();
        assert_eq!(parsed, req);
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let msg = Message::new::<()>("1", MessageType::StreamClose, None).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, &[]).await.unwrap();

        let mut cursor = &buf[..];
        assert!(read_frame(&mut cursor).await.unwrap().is_some());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multiple_frames_in_order() {
        let mut buf = Vec::new();
        for offset in [0u64, 4, 8] {
            let msg = Message::new(
                offset.to_string(),
                MessageType::StreamChunk,
                Some(&StreamChunkHeader { offset }),
            )
            .unwrap();
            write_frame(&mut buf, &msg, b"abcd").await.unwrap();
        }

        let mut cursor = &buf[..];
        for expected in [0u64, 4, 8] {
            let frame = read_frame(&mut cursor).await.unwrap().unwrap();
            let header: StreamChunkHeader = frame.message.parse_payload().unwrap().unwrap();
            assert_eq!(header.offset, expected);
        }
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let msg = Message::new::<()>("1", MessageType::StreamClose, None).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, b"12345678").await.unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = &buf[..];
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn oversized_header_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_HEADER_SIZE as u32) + 1).to_be_bytes());

        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(RpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_payload_rejected_on_write() {
        let msg = Message::new::<()>("1", MessageType::PutChunk, None).unwrap();
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let mut buf = Vec::new();
        assert!(write_frame(&mut buf, &msg, &payload).await.is_err());
        assert!(buf.is_empty());
    }
}
