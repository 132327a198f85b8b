//! # IPC Server
//!
//! Unix socket server that lets operators trigger a reminder cycle by hand
//! and query daemon status.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: RunCycle with optional shared secret, GetStatus with last summary
//! - 1.0.0: Initial Unix socket protocol

use crate::core::error::{ReminderError, Result as CycleResult};
use crate::features::reminders::{CycleOptions, CycleSummary, ReminderEngine};
use crate::ipc::protocol::{read_frame, send_message, ControlCommand, ControlReply};
use anyhow::Result;
use chrono::Duration;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;

/// Maximum number of simultaneously connected control clients
const MAX_CLIENTS: usize = 10;

/// Shared handle to the engine plus cycle bookkeeping
#[derive(Clone)]
pub struct IpcServer {
    engine: Arc<ReminderEngine>,
    socket_path: String,
    /// Required on RunCycle when set
    trigger_secret: Option<String>,
    /// Connected client count
    client_count: Arc<RwLock<usize>>,
    cycles_run: Arc<RwLock<u64>>,
    last_summary: Arc<RwLock<Option<CycleSummary>>>,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl IpcServer {
    /// Create a new IPC server (does not start listening yet)
    pub fn new(engine: Arc<ReminderEngine>, socket_path: &str) -> Self {
        IpcServer {
            engine,
            socket_path: socket_path.to_string(),
            trigger_secret: None,
            client_count: Arc::new(RwLock::new(0)),
            cycles_run: Arc::new(RwLock::new(0)),
            last_summary: Arc::new(RwLock::new(None)),
            start_time: Instant::now(),
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.trigger_secret = secret.filter(|s| !s.is_empty());
        self
    }

    /// Run one cycle and record it for status queries
    ///
    /// Scheduled ticks go through here too, so status reflects every cycle.
    pub async fn run_cycle(&self, options: &CycleOptions) -> CycleResult<CycleSummary> {
        let summary = self.engine.run_cycle(options).await?;
        *self.cycles_run.write().await += 1;
        *self.last_summary.write().await = Some(summary.clone());
        Ok(summary)
    }

    /// Bind the socket and spawn the accept loop
    pub async fn start(self: Arc<Self>) -> Result<()> {
        // Remove existing socket file if it exists
        if std::path::Path::new(&self.socket_path).exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {}", self.socket_path);

        let server = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let client_count = *server.client_count.read().await;
                        if client_count >= MAX_CLIENTS {
                            warn!("Maximum IPC clients reached ({}), rejecting connection", MAX_CLIENTS);
                            continue;
                        }

                        *server.client_count.write().await += 1;
                        debug!("Control client connected (total: {})", client_count + 1);

                        let server_clone = server.clone();
                        tokio::spawn(async move {
                            let handler = server_clone.clone();
                            let session =
                                tokio::spawn(async move { handler.handle_client(stream).await });
                            match session.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => debug!("Client handler ended: {}", e),
                                Err(e) => error!("Client handler aborted: {}", e),
                            }
                            *server_clone.client_count.write().await -= 1;
                            debug!("Control client disconnected");
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept IPC connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// Answer commands from one client until it hangs up
    async fn handle_client(&self, stream: UnixStream) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        while let Some(frame) = read_frame(&mut reader).await? {
            let reply = match serde_json::from_slice::<ControlCommand>(&frame) {
                Ok(cmd) => self.handle_command(cmd).await,
                Err(e) => {
                    warn!("Failed to parse control command: {}", e);
                    ControlReply::Error {
                        message: format!("invalid command: {e}"),
                    }
                }
            };
            send_message(&mut writer, &reply).await?;
        }

        Ok(())
    }

    pub async fn handle_command(&self, cmd: ControlCommand) -> ControlReply {
        match cmd {
            ControlCommand::RunCycle {
                request_id,
                secret,
                lookahead_secs,
            } => {
                if !self.authorized(secret.as_deref()) {
                    warn!("Rejected manual trigger {}: bad or missing secret", request_id);
                    return ControlReply::Unauthorized { request_id };
                }

                info!("Manual trigger {} received", request_id);
                let lookahead = match lookahead_secs {
                    None => None,
                    Some(secs) => match Duration::try_seconds(secs) {
                        Some(lookahead) => Some(lookahead),
                        None => {
                            let e = ReminderError::InvalidRequest(format!(
                                "lookahead of {secs} seconds is out of range"
                            ));
                            warn!("Manual trigger {} rejected: {}", request_id, e);
                            return ControlReply::CycleFailed {
                                request_id,
                                error: e.to_string(),
                            };
                        }
                    },
                };
                match self.run_cycle(&CycleOptions { lookahead }).await {
                    Ok(summary) => ControlReply::CycleCompleted { request_id, summary },
                    Err(e) => {
                        error!("Manual trigger {} failed: {}", request_id, e);
                        ControlReply::CycleFailed {
                            request_id,
                            error: e.to_string(),
                        }
                    }
                }
            }
            ControlCommand::GetStatus => ControlReply::Status {
                uptime_seconds: self.start_time.elapsed().as_secs(),
                cycles_run: *self.cycles_run.read().await,
                last_summary: self.last_summary.read().await.clone(),
            },
        }
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.trigger_secret {
            None => true,
            Some(expected) => presented == Some(expected.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::reminders::{
        MemoryTaskStore, MessageTemplate, NotificationSender, ReminderMessage, SendReceipt, Task, TierTable,
    };
    use crate::ipc::client::IpcClient;
    use async_trait::async_trait;
    use chrono::{FixedOffset, Utc};

    struct NullSender;

    #[async_trait]
    impl NotificationSender for NullSender {
        async fn send(&self, _to: &str, _message: &ReminderMessage) -> anyhow::Result<SendReceipt> {
            Ok(SendReceipt::default())
        }
    }

    fn server(socket_path: &str) -> IpcServer {
        let store = Arc::new(MemoryTaskStore::new());
        store.insert_profile("ana", Some("ana@example.com"), Some("Ana"));
        store.insert_task(Task::new("t1", "ana", "Report", Utc::now() + Duration::days(1)));
        let engine = ReminderEngine::new(
            TierTable::standard(),
            store.clone(),
            store,
            Arc::new(NullSender),
            MessageTemplate::new("http://localhost:8080", FixedOffset::east_opt(0).unwrap()),
        );
        IpcServer::new(Arc::new(engine), socket_path)
    }

    fn run_cycle(secret: Option<&str>, lookahead_secs: Option<i64>) -> ControlCommand {
        ControlCommand::RunCycle {
            request_id: "req".to_string(),
            secret: secret.map(String::from),
            lookahead_secs,
        }
    }

    #[tokio::test]
    async fn test_run_cycle_updates_status() {
        let server = server("/unused.sock");
        match server.handle_command(run_cycle(None, None)).await {
            ControlReply::CycleCompleted { request_id, summary } => {
                assert_eq!(request_id, "req");
                assert_eq!(summary.tasks_checked, 1);
                assert_eq!(summary.reminders_sent, 1);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        match server.handle_command(ControlCommand::GetStatus).await {
            ControlReply::Status {
                cycles_run, last_summary, ..
            } => {
                assert_eq!(cycles_run, 1);
                assert_eq!(last_summary.unwrap().reminders_sent, 1);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_secret_is_enforced() {
        let server = server("/unused.sock").with_secret(Some("hunter2".to_string()));

        let reply = server.handle_command(run_cycle(None, None)).await;
        assert!(matches!(reply, ControlReply::Unauthorized { .. }));
        let reply = server.handle_command(run_cycle(Some("wrong"), None)).await;
        assert!(matches!(reply, ControlReply::Unauthorized { .. }));
        let reply = server.handle_command(run_cycle(Some("hunter2"), None)).await;
        assert!(matches!(reply, ControlReply::CycleCompleted { .. }));
    }

    #[tokio::test]
    async fn test_bad_lookahead_reports_cycle_failure() {
        let server = server("/unused.sock");
        match server.handle_command(run_cycle(None, Some(-60))).await {
            ControlReply::CycleFailed { error, .. } => assert!(error.contains("lookahead")),
            other => panic!("unexpected reply: {other:?}"),
        }

        for secs in [i64::MAX, i64::MIN, 9_000_000_000_000] {
            match server.handle_command(run_cycle(None, Some(secs))).await {
                ControlReply::CycleFailed { error, .. } => assert!(error.contains("lookahead")),
                other => panic!("unexpected reply for {secs}: {other:?}"),
            }
        }

        // Failed cycles are not counted
        match server.handle_command(ControlCommand::GetStatus).await {
            ControlReply::Status { cycles_run, .. } => assert_eq!(cycles_run, 0),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.sock");
        let path = path.to_str().unwrap();

        Arc::new(server(path)).start().await.unwrap();

        let mut client = IpcClient::connect(path).await.unwrap();
        let reply = client.request(&run_cycle(None, None)).await.unwrap();
        assert!(matches!(reply, ControlReply::CycleCompleted { .. }));

        // Same connection, second command
        let reply = client.request(&ControlCommand::GetStatus).await.unwrap();
        assert!(matches!(reply, ControlReply::Status { cycles_run: 1, .. }));
    }

    #[tokio::test]
    async fn test_client_slot_released_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reminders.sock");
        let path = path.to_str().unwrap();

        let server = Arc::new(server(path));
        server.clone().start().await.unwrap();

        let mut client = IpcClient::connect(path).await.unwrap();
        client.request(&ControlCommand::GetStatus).await.unwrap();
        assert_eq!(*server.client_count.read().await, 1);
        drop(client);

        for _ in 0..100 {
            if *server.client_count.read().await == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("client slot was never released");
    }
}
