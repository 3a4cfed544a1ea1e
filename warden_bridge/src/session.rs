//! Shell sessions.
//!
//! ## Overview
//!
//! One client connection owns one `ShellSession`: a freshly spawned shell
//! process (no arguments, no pre-supplied command) whose stdin, stdout and
//! stderr are piped exclusively to the session. Sessions never share a
//! process and never outlive their connection.
//!
//! ## How It Works
//!
//! 1. **Spawn**: the shell starts with all three streams piped and
//!    `kill_on_drop` set, so a session dropped on any path still takes its
//!    process down.
//! 2. **Streams**: three tasks each own one pipe exclusively. The two readers
//!    read at most `read_chunk_size` bytes at a time, decode, and only ever
//!    *send* frames into a shared mpsc channel; per-stream order is preserved
//!    and stdout and stderr interleave freely. The writer drains an input
//!    queue into stdin, flushing after every frame.
//! 3. **Pump**: the session loop waits on the next inbound frame and the next
//!    stream event at the same time and never blocks on the shell's stdin, so
//!    a shell that stops reading input cannot hide a client disconnect.
//! 4. **Teardown**: client disconnect, end of either output stream, or an
//!    unrecoverable I/O error ends the loop. After an end of stream, output
//!    the other stream already produced is forwarded for a short while.
//!    `shutdown` then closes the input queue, requests a kill without
//!    blocking, reaps the child within a bounded window and aborts the stream
//!    tasks. It runs once per session.

use crate::codec::{StreamDecoder, TextCodec};
use crate::connection::{CloseReason, Connection};
use crate::error::{BridgeError, Result};
use chrono::Local;
use owo_colors::OwoColorize;
use std::{fmt, io::ErrorKind, path::PathBuf, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_common::{SessionLifecycle, SessionPhase, TerminationReason};

/// Bytes read from an output stream per chunk.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// How long teardown waits for a killed shell to be reaped.
pub const DEFAULT_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long output still queued on the other stream is forwarded after one
/// stream reaches end of input.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The platform shell spawned when none is configured.
pub fn default_shell() -> &'static str {
    if cfg!(windows) { "powershell.exe" } else { "bash" }
}

/// How sessions spawn and talk to their shell.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Shell executable, started without arguments.
    pub command: String,
    /// Working directory of the shell (normally the workspace root).
    pub working_dir: Option<PathBuf>,
    pub codec: TextCodec,
    pub read_chunk_size: usize,
    pub reap_timeout: Duration,
    /// Mirror session traffic to stderr with colors (debug aid).
    pub echo_io: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: default_shell().to_string(),
            working_dir: None,
            codec: TextCodec::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            reap_timeout: DEFAULT_REAP_TIMEOUT,
            echo_io: false,
        }
    }
}

/// Which output stream a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug)]
enum StreamEvent {
    Output { stream: StreamKind, text: String },
    Closed { stream: StreamKind },
    Failed { stream: StreamKind, error: std::io::Error },
    InputFailed { error: std::io::Error },
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// `None` when the shell never started.
    pub session_id: Option<String>,
    pub pid: Option<u32>,
    pub reason: TerminationReason,
    pub frames_in: u64,
    pub frames_out: u64,
    pub error: Option<String>,
}

/// A running shell bound to one client connection.
pub struct ShellSession {
    id: String,
    child: Child,
    pid: Option<u32>,
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    events: mpsc::Receiver<StreamEvent>,
    tasks: Vec<JoinHandle<()>>,
    lifecycle: SessionLifecycle,
    codec: TextCodec,
    echo_io: bool,
    reap_timeout: Duration,
    torn_down: bool,
}

impl ShellSession {
    /// Spawn the shell and start its stream tasks (`Idle -> Connected`).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &ShellConfig) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let lifecycle = SessionLifecycle::new();

        let mut command = Command::new(&config.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        info!(session_id = %id, shell = %config.command, "Spawning shell");

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                lifecycle.terminate(TerminationReason::SpawnFailed);
                error!(session_id = %id, shell = %config.command, "Failed to spawn shell: {}", source);
                return Err(BridgeError::Spawn {
                    command: config.command.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    lifecycle.terminate(TerminationReason::SpawnFailed);
                    let _ = child.start_kill();
                    return Err(BridgeError::StreamIo(
                        "Shell pipes unavailable".to_string(),
                    ));
                }
            };

        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (input, queued) = mpsc::unbounded_channel();
        let chunk_size = config.read_chunk_size.max(1);
        let tasks = vec![
            tokio::spawn(forward_stream(
                id.clone(),
                StreamKind::Stdout,
                stdout,
                config.codec.decoder(),
                chunk_size,
                tx.clone(),
            )),
            tokio::spawn(forward_stream(
                id.clone(),
                StreamKind::Stderr,
                stderr,
                config.codec.decoder(),
                chunk_size,
                tx.clone(),
            )),
            tokio::spawn(write_stdin(id.clone(), stdin, queued, tx)),
        ];

        if let Err(e) = lifecycle.connect_with(pid) {
            debug!(session_id = %id, "Lifecycle rejected connect: {}", e);
        }
        info!(session_id = %id, pid = ?pid, encoding = config.codec.primary().name(), "Shell session connected");

        Ok(Self {
            id,
            child,
            pid,
            input: Some(input),
            events,
            tasks,
            lifecycle,
            codec: config.codec,
            echo_io: config.echo_io,
            reap_timeout: config.reap_timeout,
            torn_down: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process id captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn phase(&self) -> SessionPhase {
        self.lifecycle.current()
    }

    /// Handle for observing this session's lifecycle from elsewhere.
    pub fn lifecycle(&self) -> SessionLifecycle {
        self.lifecycle.clone()
    }

    /// Encode `text` and queue it for the shell's stdin.
    ///
    /// Never waits for the shell. Fails once the session is shut down or the
    /// writer has stopped.
    pub fn write_input(&self, text: &str) -> Result<()> {
        self.echo(Traffic::Stdin, text);
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| BridgeError::StreamIo("Shell stdin already closed".to_string()))?;
        input
            .send(self.codec.encode(text).into_owned())
            .map_err(|_| BridgeError::StreamIo("Shell stdin writer stopped".to_string()))
    }

    /// Pump frames between `connection` and the shell until either side ends,
    /// then tear the session down.
    pub async fn run<C: Connection + ?Sized>(mut self, connection: &mut C) -> SessionOutcome {
        let mut frames_in = 0u64;
        let mut frames_out = 0u64;
        let mut failure = None;

        let reason = loop {
            tokio::select! {
                inbound = connection.recv() => match inbound {
                    Some(Ok(text)) => {
                        frames_in += 1;
                        if let Err(e) = self.write_input(&text) {
                            if self.has_exited() {
                                debug!(session_id = %self.id, "Input after shell exit: {}", e);
                                break TerminationReason::ProcessExited;
                            }
                            error!(session_id = %self.id, "Failed to queue shell input: {}", e);
                            failure = Some(e.to_string());
                            break TerminationReason::StreamError;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %self.id, "Connection error: {}", e);
                        failure = Some(e.to_string());
                        break TerminationReason::StreamError;
                    }
                    None => {
                        info!(session_id = %self.id, "Client disconnected");
                        break TerminationReason::ClientDisconnected;
                    }
                },
                event = self.events.recv() => match event {
                    Some(StreamEvent::Output { stream, text }) => {
                        self.echo(Traffic::Output(stream), &text);
                        if let Err(e) = connection.send(text).await {
                            debug!(session_id = %self.id, "Outbound frame not delivered: {}", e);
                            break TerminationReason::ClientDisconnected;
                        }
                        frames_out += 1;
                    }
                    Some(StreamEvent::Closed { stream }) => {
                        info!(session_id = %self.id, stream = %stream, "Shell output stream closed");
                        match self.drain_after_eof(connection, stream, &mut frames_out).await {
                            Ok(()) => break TerminationReason::ProcessExited,
                            Err(_) => break TerminationReason::ClientDisconnected,
                        }
                    }
                    Some(StreamEvent::Failed { stream, error: e }) => {
                        error!(session_id = %self.id, stream = %stream, "Failed to read shell output: {}", e);
                        failure = Some(e.to_string());
                        break TerminationReason::StreamError;
                    }
                    Some(StreamEvent::InputFailed { error: e }) => {
                        if e.kind() == ErrorKind::BrokenPipe || self.has_exited() {
                            debug!(session_id = %self.id, "Shell stopped reading input: {}", e);
                            break TerminationReason::ProcessExited;
                        }
                        error!(session_id = %self.id, "Failed to write to shell stdin: {}", e);
                        failure = Some(e.to_string());
                        break TerminationReason::StreamError;
                    }
                    None => break TerminationReason::ProcessExited,
                },
            }
        };

        self.shutdown(reason).await;

        match reason {
            TerminationReason::ClientDisconnected => {}
            TerminationReason::ProcessExited => {
                connection
                    .close(Some(CloseReason::normal("Shell exited")))
                    .await;
            }
            TerminationReason::StreamError | TerminationReason::SpawnFailed => {
                let message = failure
                    .clone()
                    .unwrap_or_else(|| "Shell stream error".to_string());
                connection
                    .close(Some(CloseReason::internal_error(message).truncated()))
                    .await;
            }
        }

        SessionOutcome {
            session_id: Some(self.id.clone()),
            pid: self.pid,
            reason,
            frames_in,
            frames_out,
            error: failure,
        }
    }

    /// Forward output the other stream still has queued after `closed` hit
    /// end of input, for at most [`OUTPUT_DRAIN_TIMEOUT`].
    ///
    /// Errs only when the client can no longer receive frames.
    async fn drain_after_eof<C: Connection + ?Sized>(
        &mut self,
        connection: &mut C,
        closed: StreamKind,
        frames_out: &mut u64,
    ) -> Result<()> {
        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while let Some(event) = self.events.recv().await {
                match event {
                    StreamEvent::Output { stream, text } => {
                        self.echo(Traffic::Output(stream), &text);
                        connection.send(text).await?;
                        *frames_out += 1;
                    }
                    StreamEvent::Closed { stream } if stream != closed => break,
                    _ => {}
                }
            }
            Ok::<_, BridgeError>(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => {
                debug!(session_id = %self.id, stream = %closed, "Other stream still open after drain window");
                Ok(())
            }
        }
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Terminate the session: no reads or writes happen afterwards.
    ///
    /// Safe to call more than once; only the first call acts.
    pub async fn shutdown(&mut self, reason: TerminationReason) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if !self.lifecycle.terminate(reason) {
            debug!(session_id = %self.id, "Lifecycle already terminated");
        }

        drop(self.input.take());

        if let Err(e) = self.child.start_kill() {
            debug!(session_id = %self.id, "Kill request ignored: {}", e);
        }

        match tokio::time::timeout(self.reap_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(session_id = %self.id, pid = ?self.pid, reason = %reason, %status, "Shell session terminated");
            }
            Ok(Err(e)) => {
                warn!(session_id = %self.id, pid = ?self.pid, "Failed to reap shell: {}", e);
            }
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    pid = ?self.pid,
                    "Shell did not exit within {:?}",
                    self.reap_timeout
                );
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.events.close();
    }

    fn echo(&self, traffic: Traffic, text: &str) {
        if !self.echo_io {
            return;
        }
        let timestamp = format!("[{}]", Local::now().format("%H:%M:%S%.3f"));
        let tag = format!("[{}]", &self.id[..8]);
        match traffic {
            Traffic::Stdin => eprintln!("{} {} {}\n{}", timestamp, tag.cyan(), "→ STDIN:".cyan(), text.cyan()),
            Traffic::Output(StreamKind::Stdout) => {
                eprintln!("{} {} {}\n{}", timestamp, tag.green(), "← STDOUT:".green(), text.green())
            }
            Traffic::Output(StreamKind::Stderr) => {
                eprintln!("{} {} {}\n{}", timestamp, tag.red(), "⚠ STDERR:".red(), text.red())
            }
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.lifecycle.terminate(TerminationReason::ClientDisconnected);
        self.input.take();
        let _ = self.child.start_kill();
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Traffic {
    Stdin,
    Output(StreamKind),
}

/// Run a whole session for `connection`: spawn, pump, tear down.
///
/// A shell that cannot be spawned closes the connection with an explanatory
/// internal-error status instead of leaving it open and silent.
pub async fn run_session<C: Connection + ?Sized>(
    connection: &mut C,
    config: &ShellConfig,
) -> SessionOutcome {
    match ShellSession::start(config) {
        Ok(session) => session.run(connection).await,
        Err(e) => {
            let message = format!("Failed to start shell: {}", e);
            connection
                .close(Some(CloseReason::internal_error(message.clone()).truncated()))
                .await;
            SessionOutcome {
                session_id: None,
                pid: None,
                reason: TerminationReason::SpawnFailed,
                frames_in: 0,
                frames_out: 0,
                error: Some(message),
            }
        }
    }
}

/// Writer task: owns stdin and writes queued input in arrival order.
///
/// Ends when the queue closes (stdin is dropped, so the shell sees end of
/// input) or on the first write error.
async fn write_stdin(
    session_id: String,
    mut stdin: ChildStdin,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::Sender<StreamEvent>,
) {
    while let Some(bytes) = queued.recv().await {
        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            debug!(session_id = %session_id, "Shell stdin write failed: {}", error);
            let _ = events.send(StreamEvent::InputFailed { error }).await;
            return;
        }
    }
}

/// Reader task: owns one output stream and its decoder.
async fn forward_stream<R>(
    session_id: String,
    stream: StreamKind,
    mut reader: R,
    mut decoder: StreamDecoder,
    chunk_size: usize,
    events: mpsc::Sender<StreamEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let tail = decoder.finish();
                if !tail.is_empty() {
                    let _ = events.send(StreamEvent::Output { stream, text: tail }).await;
                }
                debug!(session_id = %session_id, stream = %stream, "End of stream");
                let _ = events.send(StreamEvent::Closed { stream }).await;
                return;
            }
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if events
                    .send(StreamEvent::Output { stream, text })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = events.send(StreamEvent::Failed { stream, error: e }).await;
                return;
            }
        }
    }
}
