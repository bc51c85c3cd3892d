//! Length-prefixed bincode framing
//!
//! Each frame is a big-endian `u32` byte length followed by the bincode body.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

/// Largest frame body accepted in either direction
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialize `message` and write it as one frame, flushing afterwards
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message).map_err(|e| SharedError::SerializationError {
        message: e.to_string(),
    })?;
    if data.len() > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge {
            size: data.len(),
            limit: MAX_FRAME_BYTES,
        });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream before a new frame.
pub async fn read_frame<R, T>(reader: &mut R) -> SharedResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(SharedError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    bincode::deserialize(&data)
        .map(Some)
        .map_err(|e| SharedError::DeserializationError { message: e.to_string() })
}
