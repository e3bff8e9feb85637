//! Length-prefixed framing over async byte streams.
//!
//! ```text
//! +----------------+----------------------+
//! | length (4 BE)  |  MessagePack payload |
//! +----------------+----------------------+
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_FRAME_SIZE;

/// Read one frame payload.
///
/// Returns `Ok(None)` on a clean EOF before any byte of the length prefix.
/// An oversized length is `InvalidData`: the stream cannot be resynchronized
/// after it, so callers treat it as fatal.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max: {})", len, MAX_FRAME_SIZE),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame (length prefix + payload) and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame too large: {} bytes (max: {})",
                payload.len(),
                MAX_FRAME_SIZE
            ),
        ));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
