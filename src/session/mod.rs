//! Session Controller
//!
//! One `Session` per attacker connection. It owns the decoder, the shell
//! context and the idle deadline, drives the interactive loop over any
//! async byte stream, and reports lifecycle events.
//!
//! Lifecycle: Connecting -> Authenticating -> Interactive -> Closing -> Closed.
//! Exactly one disconnect event is emitted per session, either from `close`
//! or from the `Drop` fallback.

pub mod registry;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{EventContext, EventKind};
use crate::shell::{Interpreter, Outcome, STATUS_FAILURE, ShellContext};
use crate::terminal::{ERASE_SEQUENCE, Input, LineDecoder, TAB_FILL};
use crate::vfs::{FsTree, VirtualFs};

pub use registry::{ActiveSession, Rejected, SessionRegistry, SessionTicket};

const READ_CHUNK: usize = 1024;

// ============================================================================
// Identity & State
// ============================================================================

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Process-unique session number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        SessionId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Interactive,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// `exit` or `logout`
    Exit,
    /// Ctrl-D
    EndOfTransmission,
    IdleTimeout,
    PeerDisconnected,
    Shutdown,
    Fault,
}

/// One credential offered by the peer; every attempt is accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    pub method: String,
    pub username: String,
    pub password: Option<String>,
}

impl AuthAttempt {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            method: String::from("password"),
            username: username.to_string(),
            password: Some(password.to_string()),
        }
    }

    pub fn publickey(username: &str) -> Self {
        Self {
            method: String::from("publickey"),
            username: username.to_string(),
            password: None,
        }
    }

    pub fn none(username: &str) -> Self {
        Self {
            method: String::from("none"),
            username: username.to_string(),
            password: None,
        }
    }
}

/// Per-session knobs taken from the operator configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub command_delay: Duration,
    pub show_motd: bool,
    pub rng_seed: Option<u64>,
}

impl SessionSettings {
    /// Seeded from `rng_seed` mixed with the session id, else from entropy
    pub fn rng_for(&self, id: SessionId) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ id.get()),
            None => StdRng::from_entropy(),
        }
    }
}

fn to_crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    id: SessionId,
    state: SessionState,
    started: Instant,
    settings: Arc<SessionSettings>,
    tree: Arc<FsTree>,
    events: EventContext,
    interpreter: Interpreter,
    shell: Option<ShellContext>,
    commands: u64,
    cancel: CancellationToken,
    ticket: Option<SessionTicket>,
    intel_task: Option<JoinHandle<()>>,
}

impl Session {
    /// A freshly admitted session; emits the connection event
    pub(crate) fn open(
        ticket: SessionTicket,
        settings: Arc<SessionSettings>,
        tree: Arc<FsTree>,
        events: EventContext,
        intel_task: Option<JoinHandle<()>>,
    ) -> Self {
        let id = ticket.id();
        let cancel = ticket.cancel_token();
        tracing::info!(session = %id, peer = %events.peer(), "connection opened");
        events.emit(EventKind::Connection);
        Self {
            id,
            state: SessionState::Authenticating,
            started: Instant::now(),
            interpreter: Interpreter::new(settings.command_delay),
            settings,
            tree,
            events,
            shell: None,
            commands: 0,
            cancel,
            ticket: Some(ticket),
            intel_task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> std::net::SocketAddr {
        self.events.peer()
    }

    /// Hostname shown at login
    pub fn hostname(&self) -> &'static str {
        self.tree.persona().hostname
    }

    pub fn command_count(&self) -> u64 {
        self.commands
    }

    /// Authenticated name, once interactive
    pub fn username(&self) -> Option<&str> {
        self.shell.as_ref().map(|ctx| ctx.username.as_str())
    }

    /// Cancelled when the process shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Longest silence tolerated from the peer, at login or in the shell
    pub fn idle_timeout(&self) -> Duration {
        self.settings.idle_timeout
    }

    /// Log a credential and accept it; the first attempt opens the shell
    pub fn authenticate(&mut self, attempt: AuthAttempt) -> bool {
        tracing::info!(
            session = %self.id,
            method = %attempt.method,
            username = %attempt.username,
            "authentication accepted"
        );
        self.events.emit(EventKind::authentication(
            &attempt.method,
            &attempt.username,
            attempt.password.as_deref(),
        ));
        if self.state == SessionState::Authenticating {
            let fs = VirtualFs::new(Arc::clone(&self.tree));
            let rng = self.settings.rng_for(self.id);
            self.shell = Some(ShellContext::new(&attempt.username, fs, self.events.clone(), rng));
            self.state = SessionState::Interactive;
        }
        true
    }

    /// Drive an interactive shell over `stream` until the session ends
    pub async fn run_shell<S>(&mut self, mut stream: S) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let reason = if self.state != SessionState::Interactive {
            tracing::warn!(session = %self.id, state = ?self.state, "shell requested before authentication");
            CloseReason::Fault
        } else {
            match self.shell_loop(&mut stream).await {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::debug!(session = %self.id, error = %e, "transport write failed");
                    CloseReason::PeerDisconnected
                }
            }
        };
        let _ = stream.shutdown().await;
        self.close(reason);
        reason
    }

    /// Run one command line for an exec request; returns its exit status
    pub async fn exec<S>(&mut self, command: &str, mut stream: S) -> i32
    where
        S: AsyncWrite + Unpin,
    {
        if self.state != SessionState::Interactive {
            self.close(CloseReason::Fault);
            return STATUS_FAILURE;
        }
        let (reason, status) = match self.run_command(command).await {
            Some(outcome) => {
                let mut text = outcome.output;
                if !text.is_empty() {
                    text.push('\n');
                }
                match stream.write_all(text.as_bytes()).await {
                    Ok(()) => (CloseReason::Exit, outcome.status),
                    Err(_) => (CloseReason::PeerDisconnected, outcome.status),
                }
            }
            None => (CloseReason::Shutdown, STATUS_FAILURE),
        };
        let _ = stream.shutdown().await;
        self.close(reason);
        status
    }

    /// Release resources and emit the disconnect event; later calls are no-ops
    pub fn close(&mut self, reason: CloseReason) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(task) = self.intel_task.take() {
            task.abort();
        }
        let duration = self.started.elapsed();
        tracing::info!(
            session = %self.id,
            ?reason,
            duration_secs = duration.as_secs_f64(),
            commands = self.commands,
            "session closed"
        );
        self.events.emit(EventKind::Disconnect {
            duration_secs: duration.as_secs_f64(),
            command_count: self.commands,
            reason,
        });
        self.shell = None;
        self.ticket = None;
        self.state = SessionState::Closed;
    }

    /// Run a line through the interpreter and record it; `None` if cancelled
    async fn run_command(&mut self, line: &str) -> Option<Outcome> {
        let ctx = self.shell.as_mut()?;
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            outcome = self.interpreter.execute(line, ctx) => outcome,
        };
        self.commands += 1;
        tracing::debug!(session = %self.id, command = line, status = outcome.status, "command");
        self.events
            .emit(EventKind::command(line, &outcome.output, outcome.status));
        Some(outcome)
    }

    fn prompt(&self) -> String {
        self.shell.as_ref().map(ShellContext::prompt).unwrap_or_default()
    }

    async fn shell_loop<S>(&mut self, stream: &mut S) -> std::io::Result<CloseReason>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.settings.show_motd {
            let motd = self.tree.persona().motd;
            stream.write_all(to_crlf(motd).as_bytes()).await?;
            stream.write_all(b"\r\n\r\n").await?;
        }
        stream.write_all(self.prompt().as_bytes()).await?;

        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = stream.write_all(b"\r\nlogout\r\n").await;
                    return Ok(CloseReason::Shutdown);
                }
                read = tokio::time::timeout(self.settings.idle_timeout, stream.read(&mut buf)) => read,
            };
            let n = match read {
                Err(_) => {
                    let _ = stream
                        .write_all(b"\r\ntimed out waiting for input: auto-logout\r\n")
                        .await;
                    return Ok(CloseReason::IdleTimeout);
                }
                Ok(Ok(0)) => return Ok(CloseReason::PeerDisconnected),
                Ok(Err(e)) => {
                    tracing::debug!(session = %self.id, error = %e, "transport read failed");
                    return Ok(CloseReason::PeerDisconnected);
                }
                Ok(Ok(n)) => n,
            };

            for input in decoder.feed_all(&buf[..n]) {
                match input {
                    Input::Echo(byte) => stream.write_all(&[byte]).await?,
                    Input::Erase => stream.write_all(ERASE_SEQUENCE).await?,
                    Input::Tab => stream.write_all(TAB_FILL).await?,
                    Input::Blank => {
                        stream.write_all(b"\r\n").await?;
                        stream.write_all(self.prompt().as_bytes()).await?;
                    }
                    Input::Interrupt => {
                        stream.write_all(b"^C\r\n").await?;
                        stream.write_all(self.prompt().as_bytes()).await?;
                    }
                    Input::EndOfTransmission => {
                        stream.write_all(b"\r\nlogout\r\n").await?;
                        return Ok(CloseReason::EndOfTransmission);
                    }
                    Input::Submit(line) => {
                        stream.write_all(b"\r\n").await?;
                        let Some(outcome) = self.run_command(&line).await else {
                            let _ = stream.write_all(b"logout\r\n").await;
                            return Ok(CloseReason::Shutdown);
                        };
                        if !outcome.output.is_empty() {
                            stream.write_all(to_crlf(&outcome.output).as_bytes()).await?;
                            stream.write_all(b"\r\n").await?;
                        }
                        if outcome.exit {
                            stream.write_all(b"logout\r\n").await?;
                            return Ok(CloseReason::Exit);
                        }
                        stream.write_all(self.prompt().as_bytes()).await?;
                    }
                }
            }
        }
    }

}

impl Drop for Session {
    fn drop(&mut self) {
        let reason = if self.cancel.is_cancelled() {
            CloseReason::Shutdown
        } else {
            CloseReason::PeerDisconnected
        };
        self.close(reason);
    }
}
