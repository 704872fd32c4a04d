//! A scripted stand-in for the native `efs-server` daemon.
//!
//! [`FakeDaemon`] listens on a Unix socket inside a temp directory, records
//! every command it receives, and answers with whatever the responder
//! closure returns. Tests can also push unsolicited event lines and drop
//! connections to exercise reconnects.
//!
//! Everything exposed here is plain data (strings and integers), so the
//! fake can be used from `efs-core`'s own unit tests as well as from
//! integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use efs_config::Framing;
use efs_core::command::tokenize;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// One command line as the daemon saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub seq: Option<u32>,
    pub prefix: String,
    pub subcommand: String,
    pub args: Vec<String>,
    /// The line exactly as read, without its terminator.
    pub raw: String,
}

/// One scripted action in answer to a command.
#[derive(Debug, Clone)]
pub enum FakeReply {
    /// `<code> [<seq>] <message>`, carrying the command's sequence number
    /// when the daemon runs with sequence numbers.
    Line(u16, String),
    /// A line written verbatim.
    Raw(String),
    /// Pause before the next action.
    Delay(Duration),
    /// Close the connection.
    Hangup,
}

impl FakeReply {
    /// `200 <seq> <value>`.
    pub fn ok(value: impl ToString) -> Self {
        FakeReply::Line(200, value.to_string())
    }

    /// An error reply with the given status code.
    pub fn error(code: u16, message: &str) -> Self {
        FakeReply::Line(code, message.to_string())
    }

    /// An unsolicited event line.
    pub fn event(code: u16, message: &str) -> Self {
        FakeReply::Raw(format!("{code} {message}"))
    }
}

type Responder = dyn Fn(&ReceivedCommand) -> Vec<FakeReply> + Send + Sync;

struct Shared {
    terminator: u8,
    sequence_numbers: bool,
    responder: Arc<Responder>,
    received: Mutex<Vec<ReceivedCommand>>,
    writers: tokio::sync::Mutex<Vec<Arc<tokio::sync::Mutex<OwnedWriteHalf>>>>,
    connections: AtomicUsize,
}

/// Builder for [`FakeDaemon`].
pub struct FakeDaemonBuilder {
    framing: Framing,
    sequence_numbers: bool,
    responder: Arc<Responder>,
}

impl FakeDaemonBuilder {
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn sequence_numbers(mut self, enabled: bool) -> Self {
        self.sequence_numbers = enabled;
        self
    }

    /// Decide the answer to each command. The default answers `200 <seq> 0`.
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ReceivedCommand) -> Vec<FakeReply> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// Bind the socket and start accepting connections.
    pub async fn start(self) -> FakeDaemon {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("efs-server.sock");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind fake daemon socket");

        let shared = Arc::new(Shared {
            terminator: self.framing.terminator(),
            sequence_numbers: self.sequence_numbers,
            responder: self.responder,
            received: Mutex::new(Vec::new()),
            writers: tokio::sync::Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });

        let accept_task = tokio::spawn(accept_loop(listener, shared.clone()));

        FakeDaemon {
            socket_path,
            shared,
            accept_task,
            _temp_dir: temp_dir,
        }
    }
}

/// A fake daemon bound to a socket in its own temp directory.
///
/// The listener and all connections are torn down when this value is
/// dropped.
pub struct FakeDaemon {
    socket_path: PathBuf,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl FakeDaemon {
    pub fn builder() -> FakeDaemonBuilder {
        FakeDaemonBuilder {
            framing: Framing::Nul,
            sequence_numbers: true,
            responder: Arc::new(|_: &ReceivedCommand| vec![FakeReply::ok(0)]),
        }
    }

    /// Start a daemon that answers every command with `200 <seq> 0`.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Every command received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedCommand> {
        self.shared
            .received
            .lock()
            .expect("received log poisoned")
            .clone()
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` connections have been accepted.
    pub async fn wait_for_connections(&self, n: usize) -> bool {
        self.wait_until(|| self.connection_count() >= n).await
    }

    /// Wait until at least `n` commands have been received.
    pub async fn wait_for_commands(&self, n: usize) -> bool {
        self.wait_until(|| self.received().len() >= n).await
    }

    async fn wait_until(&self, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    /// Write a raw line (typically a `6xx` event) to every live connection.
    pub async fn emit(&self, line: &str) {
        let writers = self.shared.writers.lock().await.clone();
        for writer in writers {
            let mut writer = writer.lock().await;
            if let Err(e) = write_line(&mut writer, line, self.shared.terminator).await {
                debug!(error = %e, "fake daemon could not emit to a closed connection");
            }
        }
    }

    /// Close every live connection from the daemon side.
    pub async fn disconnect_all(&self) {
        let writers: Vec<_> = self.shared.writers.lock().await.drain(..).collect();
        for writer in writers {
            let _ = writer.lock().await.shutdown().await;
        }
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: UnixListener, shared: Arc<Shared>) {
    // Dropping the set when this task is aborted aborts every connection.
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                connections.spawn(serve_connection(stream, shared.clone()));
            }
            Err(e) => {
                warn!(error = %e, "fake daemon accept failed");
                return;
            }
        }
    }
}

async fn serve_connection(stream: UnixStream, shared: Arc<Shared>) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    shared.writers.lock().await.push(writer.clone());

    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(shared.terminator, &mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if buf.last() == Some(&shared.terminator) {
            buf.pop();
        }
        let raw = String::from_utf8_lossy(&buf).into_owned();
        let Some(command) = parse_command(&raw, shared.sequence_numbers) else {
            warn!(raw, "fake daemon ignored a malformed command");
            continue;
        };
        debug!(raw, "fake daemon received command");
        shared
            .received
            .lock()
            .expect("received log poisoned")
            .push(command.clone());

        for reply in (shared.responder)(&command) {
            let line = match reply {
                FakeReply::Delay(d) => {
                    tokio::time::sleep(d).await;
                    continue;
                }
                FakeReply::Hangup => {
                    let _ = writer.lock().await.shutdown().await;
                    return;
                }
                FakeReply::Raw(line) => line,
                FakeReply::Line(code, message) => match command.seq {
                    Some(seq) => format!("{code} {seq} {message}"),
                    None => format!("{code} {message}"),
                },
            };
            let mut writer = writer.lock().await;
            if write_line(&mut writer, &line, shared.terminator)
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

fn parse_command(raw: &str, sequence_numbers: bool) -> Option<ReceivedCommand> {
    let mut words = tokenize(raw).ok()?.into_iter();
    let seq = if sequence_numbers {
        Some(words.next()?.parse().ok()?)
    } else {
        None
    };
    let prefix = words.next()?;
    let subcommand = words.next()?;
    Some(ReceivedCommand {
        seq,
        prefix,
        subcommand,
        args: words.collect(),
        raw: raw.to_string(),
    })
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    line: &str,
    terminator: u8,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(&[terminator]).await?;
    writer.flush().await
}
