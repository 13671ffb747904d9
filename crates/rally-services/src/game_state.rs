//! Shared state replicator: the scoreboard and match clock every peer keeps.
//!
//! Replication is state-based. Each peer is the only writer of its own
//! record and broadcasts its full cumulative score, so a remote update simply
//! overwrites. The match clock is shared: the last start applied wins.

use std::collections::BTreeMap;

use rally_core::{PeerId, Timestamp};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchClock {
    pub started_at: Timestamp,
    pub duration_seconds: u32,
}

impl MatchClock {
    /// Whole seconds left at `now`, clamped to zero.
    pub fn remaining_seconds(&self, now: Timestamp) -> u64 {
        let elapsed_ms = now.saturating_sub(self.started_at);
        let total_ms = self.duration_seconds as u64 * 1_000;
        total_ms.saturating_sub(elapsed_ms) / 1_000
    }

    pub fn is_running(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.started_at) < self.duration_seconds as u64 * 1_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub display_name: String,
    pub score: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameState {
    #[serde(rename = "match")]
    pub match_clock: Option<MatchClock>,
    pub players: BTreeMap<PeerId, PlayerRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub peer: PeerId,
    pub display_name: String,
    pub score: u64,
}

impl GameState {
    /// Players ordered by score, highest first; ties broken by peer id.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .players
            .iter()
            .map(|(peer, record)| LeaderboardEntry {
                peer: peer.clone(),
                display_name: record.display_name.clone(),
                score: record.score,
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.peer.cmp(&b.peer)));
        entries
    }

    pub fn score_of(&self, peer: &PeerId) -> u64 {
        self.players.get(peer).map(|p| p.score).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.match_clock.is_none() && self.players.is_empty()
    }
}

/// A transition of the read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    PlayerJoined { peer: PeerId, display_name: String },
    ScoreChanged { peer: PeerId, score: u64 },
    MatchStarted(MatchClock),
    Reset,
}

#[derive(Debug, Default)]
pub struct StateReplicator {
    state: GameState,
}

impl StateReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &GameState {
        &self.state
    }

    /// Record a player's presence on the scoreboard. A new display name for a
    /// known player is reported as a fresh join.
    pub fn apply_join(&mut self, peer: &PeerId, display_name: &str) -> Vec<StateChange> {
        match self.state.players.get_mut(peer) {
            Some(record) if record.display_name == display_name => Vec::new(),
            Some(record) => {
                record.display_name = display_name.to_string();
                vec![StateChange::PlayerJoined {
                    peer: peer.clone(),
                    display_name: display_name.to_string(),
                }]
            }
            None => {
                self.state.players.insert(
                    peer.clone(),
                    PlayerRecord {
                        display_name: display_name.to_string(),
                        score: 0,
                    },
                );
                vec![StateChange::PlayerJoined {
                    peer: peer.clone(),
                    display_name: display_name.to_string(),
                }]
            }
        }
    }

    /// Overwrite a player's cumulative score. Unknown players are joined
    /// under their peer id first.
    pub fn apply_score_report(&mut self, peer: &PeerId, score: u64) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if !self.state.players.contains_key(peer) {
            changes = self.apply_join(peer, peer.as_str());
        }
        if let Some(record) = self.state.players.get_mut(peer) {
            if record.score != score {
                record.score = score;
                changes.push(StateChange::ScoreChanged {
                    peer: peer.clone(),
                    score,
                });
            }
        }
        changes
    }

    pub fn apply_match_start(
        &mut self,
        started_at: Timestamp,
        duration_seconds: u32,
    ) -> Vec<StateChange> {
        let clock = MatchClock {
            started_at,
            duration_seconds,
        };
        if self.state.match_clock == Some(clock) {
            return Vec::new();
        }
        self.state.match_clock = Some(clock);
        vec![StateChange::MatchStarted(clock)]
    }

    /// Clear players and match together.
    pub fn apply_reset(&mut self) -> Vec<StateChange> {
        if self.state.is_empty() {
            return Vec::new();
        }
        self.state = GameState::default();
        vec![StateChange::Reset]
    }
}
