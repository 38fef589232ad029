//! Adaptive loss recovery
//!
//! Pure per-session state driven by two inputs: SSRC observations and the
//! periodically refreshed RTCP snapshots. Until the first remote SSRC is
//! seen a session is `NoTraffic` and the sender nags with key frames so a
//! late-joining receiver has something to sync on; after that, sync points
//! are produced only when the remote's cumulative loss counter strictly
//! increases, one request per detected event. Receive latency is tunable at
//! runtime without tearing the call down; every change is followed by a
//! fresh key-frame request.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::MAX_LATENCY_MS;
use crate::error::{Error, Result};
use crate::types::{MediaKind, RtcpSnapshot, SessionId};

/// Key-frame nagging period for video sessions before traffic is seen
const VIDEO_NAG_PERIOD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrafficState {
    /// No packet from the remote peer yet
    NoTraffic,
    /// At least one remote SSRC observed
    Established,
}

struct SessionRecovery {
    kind: MediaKind,
    state: TrafficState,
    last_packets_lost: i32,
    frames_submitted: u32,
}

/// Loss recovery controller for all sessions of one call
pub struct RecoveryController {
    sessions: HashMap<SessionId, SessionRecovery>,
    latency_ms: u32,
}

impl RecoveryController {
    /// New controller with the given initial receive latency
    pub fn new(latency_ms: u32) -> Self {
        Self { sessions: HashMap::new(), latency_ms }
    }

    /// Track a newly added session
    pub fn register(&mut self, id: SessionId, kind: MediaKind) {
        self.sessions.insert(
            id,
            SessionRecovery {
                kind,
                state: TrafficState::NoTraffic,
                last_packets_lost: 0,
                frames_submitted: 0,
            },
        );
    }

    /// Current receive latency in milliseconds
    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    /// A remote SSRC appeared on `id`. Returns whether this was the
    /// transition out of `NoTraffic` (the nagging stops here).
    pub fn on_ssrc_observed(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(s) if s.state == TrafficState::NoTraffic => {
                s.state = TrafficState::Established;
                info!("{} established, stopping startup key frames", id);
                true
            }
            _ => false,
        }
    }

    /// Whether the session has seen remote traffic
    pub fn is_established(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .map(|s| s.state == TrafficState::Established)
            .unwrap_or(false)
    }

    /// Called for every frame the sender submits on `id`. Returns whether
    /// the encoder must produce a sync point for this frame: before the
    /// first remote SSRC, every depth frame and every fifth video frame is
    /// forced.
    pub fn force_keyframe_for_submit(&mut self, id: SessionId) -> bool {
        let Some(s) = self.sessions.get_mut(&id) else {
            return false;
        };
        if s.state == TrafficState::Established {
            return false;
        }
        let n = s.frames_submitted;
        s.frames_submitted += 1;
        match s.kind {
            MediaKind::Depth | MediaKind::Depth16 => true,
            MediaKind::Video => n % VIDEO_NAG_PERIOD == 0,
            _ => false,
        }
    }

    /// Evaluate a fresh snapshot for `id`. Returns whether exactly one
    /// key-frame request should fire: only a strict increase of the
    /// remote's cumulative loss counter triggers; an equal reading is the
    /// same event, a lower one is a counter reset and only moves the
    /// baseline.
    pub fn evaluate(&mut self, id: SessionId, snapshot: &RtcpSnapshot) -> bool {
        let Some(s) = self.sessions.get_mut(&id) else {
            return false;
        };
        let lost = snapshot.packets_lost;
        if lost > s.last_packets_lost {
            debug!(
                "{}: packets lost {} -> {}, requesting key frame",
                id, s.last_packets_lost, lost
            );
            s.last_packets_lost = lost;
            true
        } else {
            if lost < s.last_packets_lost {
                s.last_packets_lost = lost;
            }
            false
        }
    }

    /// Change the receive latency. Valid range 0..=2000 ms. Returns the
    /// sessions that need a fresh sync point so the rebuffered streams
    /// restart cleanly.
    pub fn set_latency(&mut self, latency_ms: u32) -> Result<Vec<SessionId>> {
        if latency_ms > MAX_LATENCY_MS {
            return Err(Error::config(format!(
                "latency {} ms outside 0..={} ms",
                latency_ms, MAX_LATENCY_MS
            )));
        }
        self.latency_ms = latency_ms;
        let mut ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                matches!(s.kind, MediaKind::Video | MediaKind::Depth | MediaKind::Depth16)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Forget all sessions (call reset)
    pub fn reset(&mut self) {
        self.sessions.clear();
    }
}
