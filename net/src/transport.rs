//! Length-prefixed frame I/O shared by the RPC client and server.
//!
//! Wire format, identical in both directions:
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode payload]
//! ```
//!
//! The reader validates the length against a configured maximum before
//! allocating, so a corrupt or hostile peer cannot request an absurd
//! buffer.

use {
    crate::error::{NetError, Result},
    serde::{de::DeserializeOwned, Serialize},
    tokio::io::{AsyncReadExt, AsyncWriteExt},
};

/// Default cap on a single encoded frame.  Payloads are application
/// data plus small routing metadata; 1 MiB leaves generous headroom.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Encode a message with its 4-byte length prefix.
pub fn encode_frame<T: Serialize>(msg: &T, max_size: usize) -> Result<Vec<u8>> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > max_size {
        return Err(NetError::FrameTooLarge {
            size: payload.len(),
            max: max_size,
        });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Write one framed message to the stream.
pub async fn write_frame<T, S>(stream: &mut S, msg: &T, max_size: usize) -> Result<()>
where
    T: Serialize,
    S: AsyncWriteExt + Unpin,
{
    let frame = encode_frame(msg, max_size)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message from the stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary (the peer hung
/// up between requests), `Err` on everything else.
pub async fn read_frame<T, S>(stream: &mut S, max_size: usize) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max_size {
        return Err(NetError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}

// ── Tests ───────────────────────────────────────────────────────────────────
