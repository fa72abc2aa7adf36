//! Live master peers, learned from `peers-heartbeat`

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Peer address → last heartbeat. Entries older than the TTL are treated as
/// gone and dropped on the next [`PeerSet::prune`].
#[derive(Debug)]
pub struct PeerSet {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl PeerSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Record a heartbeat; true if the peer was not known (or had expired)
    pub fn touch(&self, addr: &str) -> bool {
        let now = Instant::now();
        let previous = self.seen.insert(addr.to_string(), now);
        !matches!(previous, Some(at) if now.duration_since(at) <= self.ttl)
    }

    pub fn is_alive(&self, addr: &str) -> bool {
        self.seen
            .get(addr)
            .map(|at| at.elapsed() <= self.ttl)
            .unwrap_or(false)
    }

    /// Addresses heard from within the TTL, sorted
    pub fn alive(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .seen
            .iter()
            .filter(|entry| entry.value().elapsed() <= self.ttl)
            .map(|entry| entry.key().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Forget expired peers; returns how many were removed
    pub fn prune(&self) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, at| at.elapsed() <= self.ttl);
        let removed = before - self.seen.len();
        if removed > 0 {
            debug!(removed, remaining = self.seen.len(), "Expired peers pruned");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_reports_new_peers() {
        let peers = PeerSet::new(Duration::from_secs(60));
        assert!(peers.touch("master-1:55655"));
        assert!(!peers.touch("master-1:55655"));
        assert!(peers.touch("master-2:55655"));
        assert_eq!(peers.alive(), vec!["master-1:55655", "master-2:55655"]);
    }

    #[test]
    fn test_expired_peer_counts_as_new_again() {
        let peers = PeerSet::new(Duration::from_millis(20));
        peers.touch("master-1:55655");
        std::thread::sleep(Duration::from_millis(50));

        assert!(!peers.is_alive("master-1:55655"));
        assert!(peers.touch("master-1:55655"));
        assert!(peers.is_alive("master-1:55655"));
    }

    #[test]
    fn test_prune_drops_expired() {
        let peers = PeerSet::new(Duration::from_millis(20));
        peers.touch("old:55655");
        std::thread::sleep(Duration::from_millis(50));
        peers.touch("new:55655");

        assert_eq!(peers.prune(), 1);
        assert_eq!(peers.len(), 1);
        assert!(peers.is_alive("new:55655"));
    }
}
