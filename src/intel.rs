//! Threat Intelligence
//!
//! Best-effort enrichment of attacker addresses. Lookups run detached from the
//! session and are bounded by a timeout; a late or failed lookup yields `None`
//! and never delays the attacker-facing stream.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use spinning_top::Spinlock;
use tokio::time::Instant;

/// Enrichment attached to events once available
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntelReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    /// Abuse confidence, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abuse_score: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Async lookup seam for reputation and geolocation providers
#[async_trait]
pub trait ThreatIntel: Send + Sync {
    async fn enrich(&self, ip: IpAddr) -> Option<IntelReport>;
}

/// Never returns anything
pub struct NoIntel;

#[async_trait]
impl ThreatIntel for NoIntel {
    async fn enrich(&self, _ip: IpAddr) -> Option<IntelReport> {
        None
    }
}

// ============================================================================
// Offline Classifier
// ============================================================================

/// Tags addresses by well-known range without any network access
pub struct AddressClassifier;

impl AddressClassifier {
    pub fn classify(ip: IpAddr) -> Vec<&'static str> {
        let mut tags = Vec::new();
        match ip {
            IpAddr::V4(v4) => {
                let [a, b, ..] = v4.octets();
                if v4.is_loopback() {
                    tags.push("loopback");
                }
                if v4.is_private() {
                    tags.push("private");
                }
                if v4.is_link_local() {
                    tags.push("link-local");
                }
                if v4.is_documentation() {
                    tags.push("documentation");
                }
                if a == 100 && (64..128).contains(&b) {
                    tags.push("cgnat");
                }
                if v4.is_multicast() {
                    tags.push("multicast");
                }
            }
            IpAddr::V6(v6) => {
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return Self::classify(IpAddr::V4(mapped));
                }
                let first = v6.segments()[0];
                if v6.is_loopback() {
                    tags.push("loopback");
                }
                if first & 0xfe00 == 0xfc00 {
                    tags.push("private");
                }
                if first & 0xffc0 == 0xfe80 {
                    tags.push("link-local");
                }
                if first == 0x2001 && v6.segments()[1] == 0x0db8 {
                    tags.push("documentation");
                }
                if v6.is_multicast() {
                    tags.push("multicast");
                }
            }
        }
        if tags.is_empty() {
            tags.push("public");
        }
        tags
    }
}

#[async_trait]
impl ThreatIntel for AddressClassifier {
    async fn enrich(&self, ip: IpAddr) -> Option<IntelReport> {
        Some(IntelReport {
            tags: Self::classify(ip).into_iter().map(String::from).collect(),
            ..IntelReport::default()
        })
    }
}

// ============================================================================
// Caching
// ============================================================================

/// Wraps a provider with a per-address TTL cache
pub struct CachedIntel<T> {
    inner: T,
    ttl: Duration,
    entries: Spinlock<HashMap<IpAddr, (Instant, Option<IntelReport>)>>,
}

impl<T: ThreatIntel> CachedIntel<T> {
    pub fn new(inner: T, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Spinlock::new(HashMap::new()),
        }
    }

    fn cached(&self, ip: IpAddr) -> Option<Option<IntelReport>> {
        let mut entries = self.entries.lock();
        match entries.get(&ip) {
            Some((stored, report)) if stored.elapsed() < self.ttl => Some(report.clone()),
            Some(_) => {
                entries.remove(&ip);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl<T: ThreatIntel> ThreatIntel for CachedIntel<T> {
    async fn enrich(&self, ip: IpAddr) -> Option<IntelReport> {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }
        let report = self.inner.enrich(ip).await;
        self.entries.lock().insert(ip, (Instant::now(), report.clone()));
        report
    }
}

/// Run a lookup, giving up after `limit`
pub async fn enrich_bounded(
    intel: Arc<dyn ThreatIntel>,
    ip: IpAddr,
    limit: Duration,
) -> Option<IntelReport> {
    match tokio::time::timeout(limit, intel.enrich(ip)).await {
        Ok(report) => report,
        Err(_) => {
            tracing::debug!(%ip, "threat intel lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl ThreatIntel for Counting {
        async fn enrich(&self, _ip: IpAddr) -> Option<IntelReport> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(IntelReport {
                country: Some("NL".into()),
                ..IntelReport::default()
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl ThreatIntel for Slow {
        async fn enrich(&self, _ip: IpAddr) -> Option<IntelReport> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Some(IntelReport::default())
        }
    }

    #[test]
    fn classifier_ranges() {
        let tags = |s: &str| AddressClassifier::classify(s.parse().unwrap());
        assert_eq!(tags("127.0.0.1"), vec!["loopback"]);
        assert_eq!(tags("10.1.2.3"), vec!["private"]);
        assert_eq!(tags("169.254.0.9"), vec!["link-local"]);
        assert_eq!(tags("203.0.113.7"), vec!["documentation"]);
        assert_eq!(tags("100.72.0.1"), vec!["cgnat"]);
        assert_eq!(tags("8.8.8.8"), vec!["public"]);
        assert_eq!(tags("::ffff:192.168.0.1"), vec!["private"]);
        assert_eq!(tags("fe80::1"), vec!["link-local"]);
        assert_eq!(tags("2001:db8::1"), vec!["documentation"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_respects_ttl() {
        let cached = CachedIntel::new(Counting(AtomicUsize::new(0)), Duration::from_secs(60));
        let ip: IpAddr = "198.51.100.4".parse().unwrap();

        cached.enrich(ip).await;
        cached.enrich(ip).await;
        assert_eq!(cached.inner.0.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cached.enrich(ip).await;
        assert_eq!(cached.inner.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_is_abandoned() {
        let report = enrich_bounded(
            Arc::new(Slow),
            "198.51.100.4".parse().unwrap(),
            Duration::from_millis(100),
        )
        .await;
        assert!(report.is_none());
    }
}
