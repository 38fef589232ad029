//! Call-level events
//!
//! One unbounded channel per call; the owner takes the receiver once and
//! drains it from its own loop.

use crate::types::SessionId;

/// Events surfaced to the call owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// First packet from a new remote source arrived on a session
    SsrcObserved {
        /// Session the source appeared on
        session: SessionId,
        /// The remote SSRC
        ssrc: u32,
    },
    /// The recovery controller asked the encoder for a sync point
    KeyFrameRequested {
        /// Session whose encoder was forced
        session: SessionId,
    },
    /// The remote peer said goodbye or its transport went away. The owner
    /// is expected to reset the call.
    RemoteDisconnected,
    /// Receive latency was changed at runtime
    LatencyChanged {
        /// New latency in milliseconds
        latency_ms: u32,
    },
}
