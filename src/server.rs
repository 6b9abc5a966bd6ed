//! Line-mode TCP Front End
//!
//! Accepts plain TCP connections, runs a `login:`/`Password:` exchange and
//! hands the stream to the session's interactive shell. Any credentials are
//! accepted. Telnet negotiation bytes are ignored. A peer that stays silent
//! for the session's idle timeout during login is disconnected.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::session::{AuthAttempt, CloseReason, Session};

/// Longest credential accepted during login
const MAX_CREDENTIAL: usize = 256;

/// Accept connections until `shutdown` fires, then drain the engine
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, persona = engine.persona().name, "listening");
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                // rejected peers get a closed socket and nothing else
                let Ok(session) = engine.connect(peer) else {
                    continue;
                };
                tasks.spawn(handle_connection(stream, session));
            }
        }
    }

    drop(listener);
    if !engine.shutdown().await {
        tasks.abort_all();
    }
    while tasks.join_next().await.is_some() {}
    tracing::info!("server stopped");
    Ok(())
}

async fn handle_connection(stream: TcpStream, session: Session) {
    let _ = stream.set_nodelay(true);
    run_connection(stream, session).await;
}

/// Login exchange followed by the shell, over any byte stream
async fn run_connection<S>(stream: S, mut session: Session)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let cancel = session.cancel_token();
    let hostname = session.hostname();
    let idle = session.idle_timeout();

    let login = tokio::select! {
        _ = cancel.cancelled() => return,
        login = login_exchange(&mut stream, hostname, idle) => login,
    };
    match login {
        Ok(Some((username, password))) => {
            session.authenticate(AuthAttempt::password(&username, &password));
            session.run_shell(stream).await;
        }
        Ok(None) => tracing::debug!(session = %session.id(), "peer left during login"),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            tracing::debug!(session = %session.id(), "login timed out");
            let notice = format!("\r\nLogin timed out after {} seconds.\r\n", idle.as_secs());
            let _ = stream.write_all(notice.as_bytes()).await;
            let _ = stream.shutdown().await;
            session.close(CloseReason::IdleTimeout);
        }
        Err(e) => tracing::debug!(session = %session.id(), error = %e, "login exchange failed"),
    }
}

/// Prompt for credentials; `None` if the peer hangs up first
///
/// Fails with `TimedOut` when the peer sends nothing for `idle`.
async fn login_exchange<S>(
    stream: &mut BufReader<S>,
    hostname: &str,
    idle: Duration,
) -> io::Result<Option<(String, String)>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut username = String::new();
    while username.is_empty() {
        stream.write_all(format!("{} login: ", hostname).as_bytes()).await?;
        stream.flush().await?;
        match read_credential(stream, idle).await? {
            Some(line) => username = line,
            None => return Ok(None),
        }
    }
    stream.write_all(b"Password: ").await?;
    stream.flush().await?;
    let Some(password) = read_credential(stream, idle).await? else {
        return Ok(None);
    };
    stream.write_all(b"\r\n").await?;
    Ok(Some((username, password)))
}

/// One byte, or `TimedOut` after `idle` of silence
async fn read_byte<S>(stream: &mut BufReader<S>, idle: Duration) -> io::Result<u8>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(idle, stream.read_u8()).await {
        Ok(read) => read,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "login idle timeout")),
    }
}

/// Read one line of printable bytes, swallowing telnet option negotiation
async fn read_credential<S>(stream: &mut BufReader<S>, idle: Duration) -> io::Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = match read_byte(stream, idle).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        match byte {
            // IAC: command byte plus an option byte for WILL/WONT/DO/DONT
            0xFF => {
                let command = read_byte(stream, idle).await?;
                if (0xFB..=0xFE).contains(&command) {
                    read_byte(stream, idle).await?;
                }
            }
            b'\r' | b'\n' => {
                if byte == b'\r' && matches!(stream.buffer().first(), Some(b'\n') | Some(0)) {
                    stream.consume(1);
                }
                return Ok(Some(String::from_utf8_lossy(&line).trim().to_string()));
            }
            0x20..=0x7E if line.len() < MAX_CREDENTIAL => line.push(byte),
            _ => {}
        }
    }
}
