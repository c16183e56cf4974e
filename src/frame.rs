//! Wire framing for the FarmBot OS pipe API.
//!
//! Every message in either direction is a 10-byte header followed by a UTF-8
//! JSON payload:
//!
//! ```text
//! +--------+------------+-------------+----------------+
//! | 0xFBFB | reserved=0 | length (BE) | JSON payload   |
//! | 2 bytes| 4 bytes    | 4 bytes     | `length` bytes |
//! +--------+------------+-------------+----------------+
//! ```

use crate::error::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: u16 = 0xFBFB;
pub const HEADER_LEN: usize = 10;
/// Largest payload accepted from the controller.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub reserved: u32,
    pub length: u32,
}

impl Header {
    /// Decode and check a raw header.
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Result<Self> {
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return Err(Error::Protocol(format!("bad frame magic {magic:#06x}")));
        }
        let reserved = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let length = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        if length > MAX_PAYLOAD_LEN {
            return Err(Error::Protocol(format!("frame of {length} bytes exceeds limit")));
        }
        Ok(Self { reserved, length })
    }

    #[must_use]
    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..2].copy_from_slice(&MAGIC.to_be_bytes());
        bytes[2..6].copy_from_slice(&self.reserved.to_be_bytes());
        bytes[6..].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

/// Encode a JSON message as one complete frame.
pub fn encode(message: &Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message).map_err(Error::Serialize)?;
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| Error::Protocol(format!("payload of {} bytes is too large", payload.len())))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&Header { reserved: 0, length }.encode());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one complete frame held in memory.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| Error::Protocol("truncated frame header".into()))?;
    let header = Header::decode(header)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(Error::Protocol(format!(
            "frame declares {} bytes but carries {}",
            header.length,
            payload.len()
        )));
    }
    serde_json::from_slice(payload).map_err(Error::Deserialize)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await.map_err(Error::Send)?;
    writer.flush().await.map_err(Error::Send)
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream before any header byte.
/// [`Error::Deserialize`] is only returned after the whole payload has been
/// read, so the stream is still positioned at the next frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(Error::Receive)?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Protocol("stream closed mid-header".into()));
        }
        filled += n;
    }
    let header = Header::decode(header)?;
    let mut payload = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(Error::Receive)?;
    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(Error::Deserialize)
}
