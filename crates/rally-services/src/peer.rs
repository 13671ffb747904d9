//! Peer registry: which remote peers are currently present.
//!
//! Any traffic from a peer refreshes its record. Expiry is a periodic sweep
//! over last-seen timestamps, so a peer's liveness never depends on which of
//! several in-flight timers fires first.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use rally_core::{PeerId, Timestamp};
use serde::Serialize;

/// Tracked state for a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub id: PeerId,
    /// Local receive time of the most recent envelope from this peer.
    pub last_seen_at: Timestamp,
}

/// Keyed on peer id. The local peer is never tracked.
#[derive(Debug)]
pub struct PeerRegistry {
    local: PeerId,
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    /// Insert or refresh. Returns true when `id` was not present before.
    pub fn touch(&mut self, id: &PeerId, at: Timestamp) -> bool {
        if *id == self.local {
            return false;
        }
        match self.peers.get_mut(id) {
            Some(record) => {
                record.last_seen_at = record.last_seen_at.max(at);
                false
            }
            None => {
                self.peers.insert(
                    id.clone(),
                    PeerRecord {
                        id: id.clone(),
                        last_seen_at: at,
                    },
                );
                true
            }
        }
    }

    /// Remove every peer silent for at least `ttl`. Returns the removed ids.
    pub fn sweep(&mut self, now: Timestamp, ttl: Duration) -> BTreeSet<PeerId> {
        let ttl_ms = ttl.as_millis() as u64;
        let mut removed = BTreeSet::new();
        self.peers.retain(|id, record| {
            let expired = now.saturating_sub(record.last_seen_at) >= ttl_ms;
            if expired {
                removed.insert(id.clone());
            }
            !expired
        });
        removed
    }

    pub fn active_count(&self) -> usize {
        self.peers.len()
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}
