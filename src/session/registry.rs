//! Session Registry
//!
//! The only state shared between sessions. Admission (cap check plus insert)
//! and removal each happen under one lock. Every admitted session holds a
//! `SessionTicket`; dropping the ticket removes the entry.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use spinning_top::Spinlock;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::SessionId;

/// Why a connection never became a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("session cap of {cap} reached")]
    AtCapacity { cap: usize },
    #[error("loopback peer {0} filtered")]
    Loopback(IpAddr),
    #[error("shutting down")]
    ShuttingDown,
}

/// Registry view of one live session
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub started: Instant,
}

struct Entry {
    peer: SocketAddr,
    started: Instant,
}

pub struct SessionRegistry {
    cap: usize,
    entries: Spinlock<HashMap<SessionId, Entry>>,
    /// Parent of every session's cancellation token
    root: CancellationToken,
    emptied: Notify,
}

impl SessionRegistry {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            cap,
            entries: Spinlock::new(HashMap::new()),
            root: CancellationToken::new(),
            emptied: Notify::new(),
        })
    }

    /// Reserve a slot for `id`, or reject when the cap is reached
    pub fn admit(self: &Arc<Self>, id: SessionId, peer: SocketAddr) -> Result<SessionTicket, Rejected> {
        if self.root.is_cancelled() {
            return Err(Rejected::ShuttingDown);
        }
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.cap {
                return Err(Rejected::AtCapacity { cap: self.cap });
            }
            entries.insert(
                id,
                Entry {
                    peer,
                    started: Instant::now(),
                },
            );
        }
        Ok(SessionTicket {
            registry: Arc::clone(self),
            id,
            cancel: self.root.child_token(),
        })
    }

    fn remove(&self, id: SessionId) {
        let empty = {
            let mut entries = self.entries.lock();
            entries.remove(&id);
            entries.is_empty()
        };
        if empty {
            self.emptied.notify_waiters();
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Every live session, oldest first
    pub fn snapshot(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| ActiveSession {
                id: *id,
                peer: entry.peer,
                started: entry.started,
            })
            .collect();
        sessions.sort_by_key(|s| s.started);
        sessions
    }

    /// Cancel every session and refuse new ones
    pub fn close_all(&self) {
        self.root.cancel();
    }

    /// Wait until every ticket is dropped; false if `grace` ran out first
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.emptied.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }
}

/// Proof of admission; removes the registry entry when dropped
pub struct SessionTicket {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    cancel: CancellationToken,
}

impl SessionTicket {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Cancelled by `SessionRegistry::close_all`
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([198, 51, 100, 7], port))
    }

    #[test]
    fn test_admit_respects_cap() {
        let registry = SessionRegistry::new(2);
        let a = registry.admit(SessionId::from_raw(1), peer(1)).unwrap();
        let _b = registry.admit(SessionId::from_raw(2), peer(2)).unwrap();
        assert_eq!(
            registry.admit(SessionId::from_raw(3), peer(3)).err(),
            Some(Rejected::AtCapacity { cap: 2 })
        );
        drop(a);
        assert_eq!(registry.len(), 1);
        assert!(registry.admit(SessionId::from_raw(4), peer(4)).is_ok());
    }

    #[test]
    fn test_close_all_cancels_tickets() {
        let registry = SessionRegistry::new(4);
        let ticket = registry.admit(SessionId::from_raw(1), peer(1)).unwrap();
        let token = ticket.cancel_token();
        registry.close_all();
        assert!(token.is_cancelled());
        assert_eq!(
            registry.admit(SessionId::from_raw(2), peer(2)).err(),
            Some(Rejected::ShuttingDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_tickets() {
        let registry = SessionRegistry::new(4);
        let ticket = registry.admit(SessionId::from_raw(1), peer(1)).unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(ticket);
        });
        assert!(registry.drain(Duration::from_secs(5)).await);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let registry = SessionRegistry::new(4);
        let _ticket = registry.admit(SessionId::from_raw(1), peer(1)).unwrap();
        assert!(!registry.drain(Duration::from_secs(2)).await);
    }
}
