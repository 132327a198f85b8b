//! # IPC Client
//!
//! Unix socket client used by `remindctl` to talk to a running daemon.

use crate::ipc::protocol::{read_frame, send_message, ControlCommand, ControlReply};
use anyhow::{anyhow, Result};
use log::{debug, info};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};

/// Connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a reply; a manual cycle may send many emails
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// Request/reply client for the daemon's control socket
pub struct IpcClient {
    stream: UnixStream,
    reply_timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon's IPC server
    pub async fn connect(socket_path: &str) -> Result<Self> {
        info!("Connecting to IPC server at {}", socket_path);

        let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path))
            .await
            .map_err(|_| anyhow!("Connection timeout"))?
            .map_err(|e| anyhow!("Failed to connect to {}: {} (is reminderd running?)", socket_path, e))?;

        debug!("Connected to IPC server");
        Ok(IpcClient {
            stream,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Send one command and wait for its reply
    pub async fn request(&mut self, cmd: &ControlCommand) -> Result<ControlReply> {
        send_message(&mut self.stream, cmd).await?;

        let frame = timeout(self.reply_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| anyhow!("Timed out after {}s waiting for a reply", self.reply_timeout.as_secs()))??
            .ok_or_else(|| anyhow!("Daemon closed the connection"))?;

        Ok(serde_json::from_slice(&frame)?)
    }
}
