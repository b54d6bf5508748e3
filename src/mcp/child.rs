//! Child session management
//!
//! One session per configured downstream MCP server: the spawned process,
//! a writer task serializing outbound messages onto its stdin, and a reader
//! task draining its stdout. Requests carry per-child monotone ids and are
//! matched back to callers through a pending table, so a child's internal
//! ids never reach the host.

use super::protocol::{Capabilities, JsonRpcMessage};
use super::transport::{MessageReader, MessageWriter};
use crate::config::McpServerConfig;
use crate::errors::{Result, SstartError};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Buffered outbound messages per child before writers apply backpressure
const OUTBOUND_BUFFER: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcMessage>>>>;

pub struct ChildSession {
    id: String,
    outbound: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    capabilities: Mutex<Capabilities>,
    process: tokio::sync::Mutex<Option<tokio::process::Child>>,
}

impl std::fmt::Debug for ChildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSession")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ChildSession {
    /// Spawn the configured server process with the given environment and
    /// wire up its session. Stderr is inherited for diagnostics.
    pub fn spawn(
        config: &McpServerConfig,
        env: &HashMap<String, String>,
        upstream: mpsc::Sender<JsonRpcMessage>,
    ) -> Result<Arc<Self>> {
        let mut command = tokio::process::Command::new(&config.command);
        command
            .args(&config.args)
            .env_clear()
            .envs(env)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SstartError::config(format!(
                "failed to spawn mcp server '{}' ({}): {}",
                config.id, config.command, e
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SstartError::protocol(&config.id, "child stdin pipe was not created")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SstartError::protocol(&config.id, "child stdout pipe was not created")
        })?;

        Ok(Self::from_streams(&config.id, stdin, stdout, upstream, Some(child)))
    }

    /// Build a session over arbitrary streams. Used by `spawn` and by tests
    /// that script a child over in-process pipes.
    pub fn from_streams<W, R>(
        id: &str,
        stdin: W,
        stdout: R,
        upstream: mpsc::Sender<JsonRpcMessage>,
        process: Option<tokio::process::Child>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<JsonRpcMessage>(OUTBOUND_BUFFER);

        let session = Arc::new(Self {
            id: id.to_string(),
            outbound: Mutex::new(Some(outbound_tx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            alive: Arc::new(AtomicBool::new(true)),
            capabilities: Mutex::new(Capabilities::default()),
            process: tokio::sync::Mutex::new(process),
        });

        // Writer: the only flow of control touching the child's stdin, so
        // writes are serialized at message granularity. Ends when the
        // session closes its sender.
        let writer_id = session.id.clone();
        tokio::spawn(async move {
            let mut writer = MessageWriter::new(stdin);
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = writer.write(&message).await {
                    warn!(server_id = %writer_id, error = %e, "Child write failed");
                    break;
                }
            }
        });

        // Reader: resolves pending requests, forwards child notifications
        // upward, and poisons the session on EOF or a protocol violation.
        let reader_session = Arc::clone(&session);
        tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            loop {
                match reader.read().await {
                    Ok(Some(message)) => reader_session.dispatch_inbound(message, &upstream).await,
                    Ok(None) => {
                        debug!(server_id = %reader_session.id, "Child closed stdout");
                        break;
                    }
                    Err(e) => {
                        warn!(server_id = %reader_session.id, error = %e, "Child protocol error");
                        break;
                    }
                }
            }
            reader_session.poison();
        });

        session
    }

    async fn dispatch_inbound(
        &self,
        message: JsonRpcMessage,
        upstream: &mpsc::Sender<JsonRpcMessage>,
    ) {
        if message.is_response() {
            let request_id = message.id.as_ref().and_then(|id| id.as_u64());
            let sender = request_id.and_then(|id| self.pending.lock().unwrap().remove(&id));
            match sender {
                Some(sender) => {
                    let _ = sender.send(message);
                }
                None => {
                    warn!(server_id = %self.id, id = ?message.id, "Response with unexpected id");
                }
            }
        } else if message.is_notification() {
            // Notifications carry no id and pass through untranslated.
            let _ = upstream.send(message).await;
        } else {
            warn!(
                server_id = %self.id,
                method = message.method.as_deref().unwrap_or(""),
                "Dropping request originated by child"
            );
        }
    }

    /// Complete every outstanding request with a closed-channel error and
    /// refuse new traffic.
    fn poison(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.pending.lock().unwrap().clear();
        *self.outbound.lock().unwrap() = None;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Record the capabilities reported by the child's initialize response
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock().unwrap() = capabilities;
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().unwrap().clone()
    }

    fn sender(&self) -> Result<mpsc::Sender<JsonRpcMessage>> {
        self.outbound
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SstartError::protocol(&self.id, "child session is closed"))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(u64, oneshot::Receiver<JsonRpcMessage>)> {
        if !self.is_alive() {
            return Err(SstartError::protocol(&self.id, "child session is closed"));
        }

        let sender = self.sender()?;
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);

        let message =
            JsonRpcMessage::request(serde_json::Value::from(request_id), method, params);
        if let Err(e) = sender.send(message).await {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(SstartError::protocol(&self.id, format!("failed to queue request: {}", e)));
        }

        Ok((request_id, rx))
    }

    /// Send a request under a fresh child-local id and await the response
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcMessage> {
        let (_, rx) = self.send_request(method, params).await?;
        rx.await.map_err(|_| SstartError::protocol(&self.id, "child closed before responding"))
    }

    /// `request` with an upper bound on the wait; on timeout the pending
    /// slot is released so a late response is discarded
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage> {
        let (request_id, rx) = self.send_request(method, params).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => {
                Err(SstartError::protocol(&self.id, "child closed before responding"))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(SstartError::protocol(
                    &self.id,
                    format!("'{}' timed out after {:?}", method, timeout),
                ))
            }
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        if !self.is_alive() {
            return Err(SstartError::protocol(&self.id, "child session is closed"));
        }
        let message = JsonRpcMessage::notification(method, params);
        self.sender()?
            .send(message)
            .await
            .map_err(|e| SstartError::protocol(&self.id, format!("failed to queue notification: {}", e)))
    }

    /// Close the child's stdin and, after the grace period, kill the
    /// process if it has not exited.
    pub async fn shutdown(&self, grace: Duration) {
        self.poison();

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server_id = %self.id, status = %status, "Child exited");
                }
                Ok(Err(e)) => {
                    warn!(server_id = %self.id, error = %e, "Failed to wait for child");
                }
                Err(_) => {
                    warn!(server_id = %self.id, "Child did not exit within grace period, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
    }
}
