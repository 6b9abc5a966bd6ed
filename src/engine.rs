//! Honeypot Engine
//!
//! Entry point for transports. Owns the persona's filesystem image, the
//! session registry and the collaborators, and turns accepted peers into
//! `Session`s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, HoneypotConfig};
use crate::events::{EventContext, EventSink};
use crate::intel::{self, ThreatIntel};
use crate::persona::Persona;
use crate::session::{Rejected, Session, SessionId, SessionRegistry, SessionSettings};
use crate::vfs::FsTree;

pub struct Engine {
    persona: &'static Persona,
    tree: Arc<FsTree>,
    registry: Arc<SessionRegistry>,
    settings: Arc<SessionSettings>,
    sink: Arc<dyn EventSink>,
    intel: Option<Arc<dyn ThreatIntel>>,
    intel_timeout: Duration,
    log_localhost: bool,
    shutdown_grace: Duration,
}

impl Engine {
    pub fn new(
        config: &HoneypotConfig,
        sink: Arc<dyn EventSink>,
        intel: Arc<dyn ThreatIntel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let persona = config.resolve_persona()?;
        let tree = Arc::new(FsTree::for_persona(persona));
        tracing::info!(
            persona = persona.name,
            hostname = persona.hostname,
            nodes = tree.len(),
            "filesystem image built"
        );
        Ok(Self {
            persona,
            tree,
            registry: SessionRegistry::new(config.max_sessions),
            settings: Arc::new(SessionSettings {
                idle_timeout: config.idle_timeout(),
                command_delay: config.command_delay(),
                show_motd: config.show_motd,
                rng_seed: config.rng_seed,
            }),
            sink,
            intel: config.threat_intel.then_some(intel),
            intel_timeout: config.intel_timeout(),
            log_localhost: config.log_localhost,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn persona(&self) -> &'static Persona {
        self.persona
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Admit `peer` as a new session, or reject it before any state exists
    pub fn connect(&self, peer: SocketAddr) -> Result<Session, Rejected> {
        if peer.ip().is_loopback() && !self.log_localhost {
            tracing::debug!(%peer, "loopback peer filtered");
            return Err(Rejected::Loopback(peer.ip()));
        }
        let id = SessionId::next();
        let ticket = match self.registry.admit(id, peer) {
            Ok(ticket) => ticket,
            Err(rejected) => {
                tracing::warn!(%peer, reason = %rejected, "connection rejected");
                return Err(rejected);
            }
        };

        let events = EventContext::new(id, peer, Arc::clone(&self.sink));
        let intel_task = self.intel.as_ref().map(|provider| {
            let provider = Arc::clone(provider);
            let slot = events.intel_slot();
            let limit = self.intel_timeout;
            tokio::spawn(async move {
                if let Some(report) = intel::enrich_bounded(provider, peer.ip(), limit).await {
                    tracing::debug!(session = %id, ?report, "threat intel attached");
                    *slot.lock() = Some(report);
                }
            })
        });

        Ok(Session::open(
            ticket,
            Arc::clone(&self.settings),
            Arc::clone(&self.tree),
            events,
            intel_task,
        ))
    }

    /// Cancel every session and wait out the grace period; true if all drained
    pub async fn shutdown(&self) -> bool {
        let active = self.registry.snapshot();
        tracing::info!(sessions = active.len(), "shutting down");
        for session in &active {
            tracing::info!(
                session = %session.id,
                peer = %session.peer,
                duration_secs = session.started.elapsed().as_secs_f64(),
                "closing active session"
            );
        }
        self.registry.close_all();
        let drained = self.registry.drain(self.shutdown_grace).await;
        if !drained {
            tracing::warn!(
                remaining = self.registry.len(),
                "grace period expired with sessions still open"
            );
        }
        drained
    }
}
