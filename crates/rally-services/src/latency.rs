//! Latency prober: round-trip time to the peer population via probe/echo.
//!
//! Every peer answers a probe with an echo addressed to the prober. Each
//! distinct echoing peer yields one sample. Unanswered probes are forgotten
//! after a timeout and never retried.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use rally_core::wire::{Echo, Probe};
use rally_core::{Body, PeerId, ProbeId, Timestamp};
use serde::Serialize;

/// Samples kept for the rolling average.
pub const LATENCY_RING_CAPACITY: usize = 10;

/// Read model exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    /// Oldest first.
    pub samples_ms: Vec<u64>,
    pub average_ms: Option<f64>,
    pub probes_sent: u64,
    pub echoes_received: u64,
    /// 0.0..=1.0. 1.0 before any probe has been sent.
    pub success_ratio: f64,
    pub outstanding: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// A new RTT sample, in milliseconds.
    Sample(u64),
    /// Addressed to another prober.
    NotOurs,
    /// Probe id expired or never issued.
    Unknown,
    /// This peer already answered this probe.
    Duplicate,
    /// `originalSentAt` lies in the future.
    Invalid,
}

#[derive(Debug)]
struct OutstandingProbe {
    issued_at: Timestamp,
    answered_by: HashSet<PeerId>,
}

#[derive(Debug)]
pub struct LatencyProber {
    local: PeerId,
    next_probe_id: ProbeId,
    outstanding: HashMap<ProbeId, OutstandingProbe>,
    samples: VecDeque<u64>,
    probes_sent: u64,
    echoes_received: u64,
}

impl LatencyProber {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            next_probe_id: 1,
            outstanding: HashMap::new(),
            samples: VecDeque::with_capacity(LATENCY_RING_CAPACITY),
            probes_sent: 0,
            echoes_received: 0,
        }
    }

    /// Issue a probe. The returned body goes out with `sentAt = now`.
    pub fn send_probe(&mut self, now: Timestamp) -> (ProbeId, Body) {
        let probe_id = self.next_probe_id;
        self.next_probe_id += 1;
        self.probes_sent += 1;
        self.outstanding.insert(
            probe_id,
            OutstandingProbe {
                issued_at: now,
                answered_by: HashSet::new(),
            },
        );
        (probe_id, Body::Probe(Probe { probe_id }))
    }

    /// Answer someone else's probe. Own probes are never echoed.
    pub fn on_probe(&self, sender: &PeerId, sent_at: Timestamp, probe: &Probe) -> Option<Body> {
        if *sender == self.local {
            return None;
        }
        Some(Body::Echo(Echo {
            probe_id: probe.probe_id,
            original_sent_at: sent_at,
            prober: sender.clone(),
        }))
    }

    pub fn on_echo(&mut self, responder: &PeerId, echo: &Echo, now: Timestamp) -> EchoOutcome {
        if echo.prober != self.local {
            return EchoOutcome::NotOurs;
        }
        if echo.original_sent_at > now {
            return EchoOutcome::Invalid;
        }
        let Some(probe) = self.outstanding.get_mut(&echo.probe_id) else {
            return EchoOutcome::Unknown;
        };
        if !probe.answered_by.insert(responder.clone()) {
            return EchoOutcome::Duplicate;
        }
        if probe.answered_by.len() == 1 {
            self.echoes_received += 1;
        }

        let rtt = now - echo.original_sent_at;
        if self.samples.len() == LATENCY_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
        EchoOutcome::Sample(rtt)
    }

    /// Forget probes older than `timeout`. Returns how many were unanswered.
    pub fn expire(&mut self, now: Timestamp, timeout: Duration) -> usize {
        let timeout_ms = timeout.as_millis() as u64;
        let mut unanswered = 0;
        self.outstanding.retain(|_, probe| {
            let keep = now.saturating_sub(probe.issued_at) < timeout_ms;
            if !keep && probe.answered_by.is_empty() {
                unanswered += 1;
            }
            keep
        });
        unanswered
    }

    /// Mean of the samples currently in the ring.
    pub fn average_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn success_ratio(&self) -> f64 {
        if self.probes_sent == 0 {
            return 1.0;
        }
        (self.echoes_received as f64 / self.probes_sent as f64).min(1.0)
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats {
            samples_ms: self.samples.iter().copied().collect(),
            average_ms: self.average_ms(),
            probes_sent: self.probes_sent,
            echoes_received: self.echoes_received,
            success_ratio: self.success_ratio(),
            outstanding: self.outstanding.len(),
        }
    }
}
