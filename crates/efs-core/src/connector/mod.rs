//! Persistent connection to the native `efs-server` daemon.
//!
//! The connector plays two roles behind one socket:
//!
//! - a request/reply channel: [`DaemonConnector::execute`] writes one command
//!   and waits for its final reply
//! - an event source: unsolicited `6xx` lines go to the registered
//!   [`DaemonCallbacks`] and to every [`DaemonConnector::subscribe_events`]
//!   receiver
//!
//! ```text
//! ┌──────────┐  execute()   ┌───────────────┐   control socket   ┌────────────┐
//! │  callers │─────────────▶│   connector   │───────────────────▶│ efs-server │
//! └──────────┘              │  correlator   │◀───────────────────│  (daemon)  │
//!       ▲                   │  worker task  │   replies, events  └────────────┘
//!       └───── reply ───────┴───────┬───────┘
//!                                   ▼
//!                          DaemonCallbacks / broadcast
//! ```
//!
//! A single exchange lock serializes complete command/reply round trips, so
//! there is never more than one command in flight.

mod correlator;
pub mod reply;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tracing::{debug, info, warn};

use efs_config::DaemonConfig;

use crate::command::{self, Arg, EncodeError};
use crate::runtime::ShutdownSignal;

use correlator::{Correlator, Dispatch};
pub use reply::{DaemonEvent, Line, Reply, ReplyParseError, ResponseClass, parse_line};

/// Status code the daemon uses when the storage is busy.
pub const STATUS_STORAGE_BUSY: u16 = 405;

/// Errors from a daemon exchange.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("not connected to the daemon")]
    NotConnected,

    #[error("daemon connection lost")]
    ConnectionLost,

    #[error("daemon failed the command with status {code}: {message}")]
    Daemon { code: u16, message: String },

    #[error("no reply from the daemon within {0:?}")]
    Timeout(Duration),

    #[error("lost track of which reply answers which command")]
    OutOfSync,

    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// The daemon status code, for failures reported by the daemon itself.
    pub fn code(&self) -> Option<u16> {
        match self {
            ConnectorError::Daemon { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the daemon reported the storage as busy.
    pub fn is_busy(&self) -> bool {
        self.code() == Some(STATUS_STORAGE_BUSY)
    }
}

/// Callbacks invoked by the connector's worker task.
pub trait DaemonCallbacks: Send + Sync {
    /// Called after every successful (re)connect.
    fn on_daemon_connected(&self) {}

    /// Handle an unsolicited event. Returns whether it was handled.
    fn on_event(&self, event: &DaemonEvent) -> bool {
        let _ = event;
        false
    }
}

/// Callbacks that ignore everything.
#[derive(Debug, Default)]
pub struct NoCallbacks;

impl DaemonCallbacks for NoCallbacks {}

/// Client side of the daemon control socket.
pub struct DaemonConnector {
    config: DaemonConfig,
    /// Write half of the live connection. Holding this lock is holding the
    /// exchange: a caller keeps it until its reply arrives.
    writer: Mutex<Option<OwnedWriteHalf>>,
    correlator: Correlator,
    next_seq: AtomicU32,
    connected: watch::Sender<bool>,
    /// Tells the worker to drop the connection and start over.
    resync: Notify,
    events: broadcast::Sender<DaemonEvent>,
}

impl DaemonConnector {
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            config,
            writer: Mutex::new(None),
            correlator: Correlator::default(),
            next_seq: AtomicU32::new(1),
            connected,
            resync: Notify::new(),
            events,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Whether the worker currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the worker has connected, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.connected.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|connected| *connected))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Subscribe to unsolicited daemon events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    /// Send one command and wait for its final reply.
    ///
    /// A `4xx`/`5xx` reply is returned as [`ConnectorError::Daemon`].
    pub async fn execute(&self, subcommand: &str, args: &[Arg]) -> Result<Reply, ConnectorError> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(ConnectorError::NotConnected)?;

        let seq = self
            .config
            .sequence_numbers
            .then(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        let command = command::encode(seq, &self.config.command_prefix, subcommand, args)?;
        let frame = command.to_frame(self.config.framing.terminator());

        let rx = self.correlator.register(seq)?;
        debug!(cmd = %command.loggable(), "SND ->");
        let started = Instant::now();

        if let Err(e) = write_frame(stream, &frame).await {
            self.correlator.cancel(seq);
            warn!(error = %e, subcommand, "failed to write command");
            return Err(ConnectorError::Io(e));
        }

        let received = match self.config.command_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.correlator.cancel(seq);
                    warn!(subcommand, ?seq, timeout = ?limit, "daemon did not reply in time");
                    if seq.is_none() {
                        // Without sequence numbers nothing tells whether the
                        // next reply answers this command or the next one.
                        self.connected.send_replace(false);
                        if let Some(mut stream) = writer.take() {
                            let _ = stream.shutdown().await;
                            self.resync.notify_one();
                        }
                    }
                    return Err(ConnectorError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        drop(writer);

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_command_threshold() {
            warn!(subcommand, elapsed_ms = elapsed.as_millis() as u64, "slow daemon command");
        }

        let reply = received.map_err(|_| ConnectorError::ConnectionLost)??;
        debug!(code = reply.code, seq = ?reply.seq, message = %reply.message, "RCV <-");

        if reply.class() == Some(ResponseClass::Failed) {
            return Err(ConnectorError::Daemon {
                code: reply.code,
                message: reply.message,
            });
        }
        Ok(reply)
    }

    /// Worker loop: connect, read lines, reconnect after failures.
    ///
    /// Runs until `shutdown` fires. Pending calls fail with
    /// [`ConnectorError::ConnectionLost`] whenever the connection drops.
    pub async fn run(
        self: Arc<Self>,
        callbacks: Arc<dyn DaemonCallbacks>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        info!(socket = %self.config.socket_path, "daemon connector started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = self.listen(callbacks.as_ref()) => {
                    if let Err(e) = result {
                        warn!(error = %e, "daemon connection ended");
                    }
                }
            }
            self.disconnect().await;

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }

        self.disconnect().await;
        info!("daemon connector stopped");
    }

    /// Connect once and process lines until the connection fails.
    async fn listen(&self, callbacks: &dyn DaemonCallbacks) -> Result<(), ConnectorError> {
        let stream = UnixStream::connect(&self.config.socket_path)
            .await
            .map_err(|source| ConnectorError::Connect {
                path: PathBuf::from(&self.config.socket_path),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        *self.writer.lock().await = Some(write_half);
        self.correlator.open();
        self.connected.send_replace(true);
        info!(socket = %self.config.socket_path, "connected to daemon");
        callbacks.on_daemon_connected();

        self.read_lines(read_half, callbacks).await
    }

    async fn read_lines(
        &self,
        read_half: OwnedReadHalf,
        callbacks: &dyn DaemonCallbacks,
    ) -> Result<(), ConnectorError> {
        let terminator = self.config.framing.terminator();
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                read = reader.read_until(terminator, &mut buf) => read?,
                _ = self.resync.notified() => return Err(ConnectorError::OutOfSync),
            };
            if read == 0 {
                return Err(ConnectorError::ConnectionLost);
            }
            if buf.last() == Some(&terminator) {
                buf.pop();
            } else {
                // EOF in the middle of a line
                return Err(ConnectorError::ConnectionLost);
            }
            let raw = String::from_utf8_lossy(&buf);
            let raw = raw.trim_end_matches(['\r', '\n']);
            if raw.is_empty() {
                continue;
            }
            self.handle_line(raw, callbacks);
        }
    }

    fn handle_line(&self, raw: &str, callbacks: &dyn DaemonCallbacks) {
        match parse_line(raw, self.config.sequence_numbers) {
            Ok(Line::Event(event)) => {
                debug!(code = event.code, message = %event.message, "daemon event");
                if !callbacks.on_event(&event) {
                    debug!(raw = %event.raw, "unhandled daemon event");
                }
                let _ = self.events.send(event);
            }
            Ok(Line::Reply(reply)) => {
                if self.correlator.dispatch(reply) == Dispatch::Unmatched {
                    debug!(raw, "discarded unmatched reply");
                }
            }
            Err(e) => warn!(error = %e, "malformed line from daemon"),
        }
    }

    /// Tear down the current connection and fail pending calls.
    async fn disconnect(&self) {
        self.connected.send_replace(false);
        // Fail waiters first so whoever holds the exchange lock releases it.
        self.correlator.close();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

async fn write_frame(stream: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_classification() {
        let busy = ConnectorError::Daemon {
            code: STATUS_STORAGE_BUSY,
            message: "busy".into(),
        };
        assert!(busy.is_busy());
        assert_eq!(busy.code(), Some(405));

        let other = ConnectorError::Daemon {
            code: 500,
            message: "failed".into(),
        };
        assert!(!other.is_busy());
        assert!(!ConnectorError::ConnectionLost.is_busy());
        assert_eq!(ConnectorError::NotConnected.code(), None);
    }

    #[tokio::test]
    async fn test_execute_without_connection() {
        let connector = DaemonConnector::new(DaemonConfig::default());
        assert!(!connector.is_connected());
        let result = connector.execute("lock", &[Arg::from("/data/x")]).await;
        assert!(matches!(result, Err(ConnectorError::NotConnected)));
    }

    #[tokio::test]
    async fn test_wait_connected_times_out() {
        let connector = DaemonConnector::new(DaemonConfig::default());
        assert!(!connector.wait_connected(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown_without_daemon() {
        let config = DaemonConfig {
            socket_path: "/nonexistent/efs-server".to_string(),
            reconnect_delay_ms: 10,
            ..DaemonConfig::default()
        };
        let connector = DaemonConnector::new(config);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = tokio::spawn(connector.clone().run(Arc::new(NoCallbacks), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(ShutdownSignal).unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(!connector.is_connected());
    }
}
