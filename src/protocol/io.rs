//! Low-level socket reads and writes.

use super::types::{MAX_MESSAGE_LEN, ResultType};
use crate::error::{DetectorError, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// Write a whole request and flush it.
pub(crate) async fn write_packet<W: AsyncWrite + Unpin>(stream: &mut W, packet: &[u8]) -> Result<()> {
    debug!("TX ({} bytes): {:02X?}", packet.len(), &packet[..packet.len().min(32)]);
    stream.write_all(packet).await.map_err(|e| {
        error!("Write failed: {e}");
        DetectorError::connection(format!("Write failed: {e}"))
    })?;
    stream
        .flush()
        .await
        .map_err(|e| DetectorError::connection(format!("Flush failed: {e}")))
}

/// Read exactly `size` bytes; a short read or closed peer is a connection error.
pub(crate) async fn read_bytes<R: AsyncRead + Unpin>(stream: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; size];
    stream.read_exact(&mut data).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            DetectorError::connection(format!("connection closed while reading {size} bytes"))
        } else {
            error!("Read failed: {e}");
            DetectorError::connection(format!("Read failed: {e}"))
        }
    })?;
    Ok(data)
}

pub(crate) async fn read_i32<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32> {
    let raw = read_bytes(stream, 4).await?;
    Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Read the 4-byte result tag that opens every reply.
pub(crate) async fn read_result<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ResultType> {
    let raw = read_i32(stream).await?;
    let result = ResultType::try_from(raw)?;
    debug!("RX result {result:?}");
    Ok(result)
}

/// Read the text of a FAIL reply.
///
/// Stops at the first NUL, at end of stream, or after `MAX_MESSAGE_LEN`
/// bytes, so nothing past the message is consumed.
pub(crate) async fn read_message<R: AsyncBufRead + Unpin>(stream: &mut R) -> Result<String> {
    let mut raw = Vec::new();
    (&mut *stream)
        .take(MAX_MESSAGE_LEN as u64)
        .read_until(0, &mut raw)
        .await
        .map_err(|e| DetectorError::connection(format!("Message read failed: {e}")))?;

    let text = String::from_utf8_lossy(&raw);
    let message = text.trim_end_matches(['\0', '\n']).to_string();
    debug!("RX message ({} bytes): {message}", raw.len());
    Ok(message)
}
