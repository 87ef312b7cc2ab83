//! Length-prefixed wire format for the camera -> relay stream
//!
//! Each frame is sent as:
//! - 4 bytes: payload length L (big-endian u32)
//! - L bytes: JPEG-encoded image
//!
//! A reader must consume exactly 4 length bytes and then exactly L payload
//! bytes before the next header is valid. Frames repeat for the life of the
//! connection; a new connection starts again at a header.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length prefix in bytes
pub const HEADER_LEN: usize = 4;

/// Largest payload the 4-byte prefix can describe
pub const MAX_PAYLOAD_LEN: u64 = u32::MAX as u64;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 4-byte length prefix")]
    TooLarge(usize),
}

/// Encode the length prefix for a payload of `len` bytes
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], FrameError> {
    if len as u64 > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(len));
    }
    Ok((len as u32).to_be_bytes())
}

/// Prepend the length prefix to `payload`
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header = encode_header(payload.len())?;
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len());
    wire.extend_from_slice(&header);
    wire.extend_from_slice(payload);
    Ok(wire)
}

/// Read one frame from `reader` (server side).
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// A stream that ends inside a header or payload is `UnexpectedEof`, and a
/// length above `max_len` is `InvalidData`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} header bytes"),
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum {max_len}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
