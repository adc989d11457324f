//! Framed channel between the orchestrating side and a sandbox worker process.
//!
//! Each frame is a one-byte tag, a four-byte big-endian payload length and the
//! payload itself. The worker reads exactly one `Request` from its stdin and
//! answers on its stdout with any number of `Stdout` frames followed by at most
//! one `Result` frame.

use std::io::{ErrorKind, Read, Write};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use research_agent_core::{Error, Result};

use crate::bindings::BindingSnapshot;
use crate::outcome::WorkerResult;

/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const TAG_REQUEST: u8 = 0x01;
const TAG_STDOUT: u8 = 0x02;
const TAG_RESULT: u8 = 0x03;

const HEADER_LEN: usize = 5;

/// Work order sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub snippet: String,
    #[serde(default)]
    pub bindings: BindingSnapshot,
}

/// One message on the worker channel.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(WorkerRequest),
    Stdout(String),
    Result(WorkerResult),
}

impl Frame {
    fn tag(&self) -> u8 {
        match self {
            Self::Request(_) => TAG_REQUEST,
            Self::Stdout(_) => TAG_STDOUT,
            Self::Result(_) => TAG_RESULT,
        }
    }

    /// Encode header and payload into one buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Request(req) => serde_json::to_vec(req)?,
            Self::Stdout(text) => text.as_bytes().to_vec(),
            Self::Result(res) => serde_json::to_vec(res)?,
        };
        if payload.len() > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(self.tag());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    fn decode(tag: u8, payload: Vec<u8>) -> Result<Self> {
        match tag {
            TAG_REQUEST => Ok(Self::Request(serde_json::from_slice(&payload)?)),
            TAG_STDOUT => String::from_utf8(payload)
                .map(Self::Stdout)
                .map_err(|e| Error::protocol(format!("stdout frame is not UTF-8: {}", e))),
            TAG_RESULT => Ok(Self::Result(serde_json::from_slice(&payload)?)),
            other => Err(Error::protocol(format!("unknown frame tag 0x{:02x}", other))),
        }
    }
}

fn parse_len(header: &[u8; HEADER_LEN]) -> Result<usize> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "frame length {} exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        Error::protocol("truncated frame")
    } else {
        Error::Io(err)
    }
}

// =============================================================================
// Blocking codec (worker side)
// =============================================================================

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()?)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream at a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header[..1]) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut header[1..]).map_err(truncated)?;

    let len = parse_len(&header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(truncated)?;
    Frame::decode(header[0], payload).map(Some)
}

// =============================================================================
// Async codec (orchestrating side)
// =============================================================================

/// Write one frame and flush.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()?).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream at a frame boundary.
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut header[1..]).await.map_err(truncated)?;

    let len = parse_len(&header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(truncated)?;
    Frame::decode(header[0], payload).map(Some)
}
