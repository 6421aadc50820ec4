//! Unix domain socket server for IPC
//!
//! Serves status queries and pushes diagnostic event notifications to
//! subscribed monitoring clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::DiagnosticEvent;
use crate::hotkey::TapManager;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// IPC Server handling monitoring clients
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    tap: Arc<TapManager>,
    start_time: Instant,
    /// Source of diagnostic events for subscribed clients
    events_tx: broadcast::Sender<DiagnosticEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        tap: Arc<TapManager>,
        events_tx: broadcast::Sender<DiagnosticEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            tap,
            start_time: Instant::now(),
            events_tx,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let tap = Arc::clone(&self.tap);
                    let start_time = self.start_time;
                    let event_rx = self.events_tx.subscribe();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, tap, start_time, event_rx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        tap: Arc<TapManager>,
        start_time: Instant,
        mut event_rx: broadcast::Receiver<DiagnosticEvent>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > 1024 * 1024 {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            // Parse request
            let request: Request =
                serde_json::from_slice(&msg_buf).context("failed to parse request")?;

            debug!(?request, "received request");

            match request {
                Request::Ping => {
                    Self::send_message(&mut stream, &Response::Pong).await?;
                }
                Request::GetStatus => {
                    let mut status = DaemonStatus::from(tap.status());
                    status.uptime_secs = start_time.elapsed().as_secs();
                    Self::send_message(&mut stream, &Response::Status(status)).await?;
                }
                Request::Subscribe => {
                    Self::send_message(&mut stream, &Response::Subscribed).await?;
                    debug!("client subscribed to notifications");
                    // The connection is push-only from here on
                    return Self::push_notifications(stream, &mut event_rx).await;
                }
            }
        }
    }

    /// Forward diagnostic events until the client goes away
    async fn push_notifications(
        mut stream: UnixStream,
        event_rx: &mut broadcast::Receiver<DiagnosticEvent>,
    ) -> Result<()> {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let note = Notification::Event(event);
                    if Self::send_message(&mut stream, &note).await.is_err() {
                        debug!("subscriber disconnected");
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Ok(());
                }
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
