//! # IPC Protocol
//!
//! Message types for manual triggers and status queries over a Unix socket.
//!
//! Uses length-prefixed JSON framing:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON payload

use crate::features::reminders::CycleSummary;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

// ============================================================================
// Client -> Daemon Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    /// Run one reminder cycle now and report its summary
    RunCycle {
        request_id: String,
        /// Must match the daemon's trigger secret when one is configured
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
        /// Candidate lookahead override, in seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lookahead_secs: Option<i64>,
    },
    /// Request daemon status
    GetStatus,
}

// ============================================================================
// Daemon -> Client Replies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlReply {
    CycleCompleted {
        request_id: String,
        summary: CycleSummary,
    },
    /// The cycle itself failed (bad request or candidate fetch)
    CycleFailed {
        request_id: String,
        error: String,
    },
    Unauthorized {
        request_id: String,
    },
    Status {
        uptime_seconds: u64,
        cycles_run: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_summary: Option<CycleSummary>,
    },
    /// The command could not be decoded
    Error {
        message: String,
    },
}

// ============================================================================
// Framing - Length-prefixed JSON messages
// ============================================================================

/// Encode a message with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes", json.len()));
    }
    let len = json.len() as u32;
    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Read a length-prefixed message from a blocking reader
pub fn decode_message<T: for<'de> Deserialize<'de>, R: Read>(reader: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes", len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    Ok(serde_json::from_slice(&buf)?)
}

/// Write a framed message to a blocking writer
pub fn write_message<T: Serialize, W: Write>(writer: &mut W, msg: &T) -> Result<()> {
    let encoded = encode_message(msg)?;
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

/// Read one raw frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes", len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Encode and write one message, then flush
pub async fn send_message<T: Serialize, W: AsyncWrite + Unpin>(writer: &mut W, msg: &T) -> Result<()> {
    let data = encode_message(msg)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_run_cycle_wire_format() {
        let cmd = ControlCommand::RunCycle {
            request_id: "req-1".to_string(),
            secret: None,
            lookahead_secs: Some(604_800),
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "RunCycle");
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["lookahead_secs"], 604_800);
        assert!(json.get("secret").is_none());
    }

    #[test]
    fn test_minimal_run_cycle_decodes() {
        let cmd: ControlCommand = serde_json::from_str(r#"{"type":"RunCycle","request_id":"r"}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::RunCycle {
                request_id: "r".to_string(),
                secret: None,
                lookahead_secs: None,
            }
        );
    }

    #[test]
    fn test_blocking_framing() {
        let mut buf = Vec::new();
        write_message(&mut buf, &ControlCommand::GetStatus).unwrap();
        assert_eq!(&buf[..4], &(buf.len() as u32 - 4).to_be_bytes());

        let decoded: ControlCommand = decode_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, ControlCommand::GetStatus);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes());
        let result: Result<ControlCommand> = decode_message(&mut Cursor::new(buf));
        assert!(result.unwrap_err().to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_async_frame_and_clean_eof() {
        let reply = ControlReply::Unauthorized {
            request_id: "r2".to_string(),
        };
        let data = encode_message(&reply).unwrap();

        let mut reader = Cursor::new(data);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        let decoded: ControlReply = serde_json::from_slice(&frame).unwrap();
        assert_eq!(decoded, reply);

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
