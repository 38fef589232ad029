//! Bidirectional RTP/RTCP transport of synchronized media streams
//!
//! `rtpcall` moves color video, 16-bit depth, voice audio, and OSC control
//! messages between exactly two peers over RTP, with RTCP-driven loss
//! recovery. One [`mux::SessionMux`] owns all sessions of a call: channels
//! are added before start and numbered from 0, each gets its own transport
//! (direct UDP port blocks or externally connected NAT-traversed pipes),
//! and decoded media reaches the application through poll-driven
//! double-buffered exchanges where the newest frame wins.
//!
//! Depth travels either remapped onto a color ramp that survives lossy video
//! encoding ([`depth::DepthColorLut`]) or raw as keyframe/delta pairs
//! ([`depth::DepthDeltaCodec`]). The voice path runs through an echo-cancel
//! bridge that slices device callbacks into exact 10 ms quanta. Lost packets
//! reported by the remote peer turn into at most one key-frame request per
//! loss event; until the first remote source is seen, senders nag with key
//! frames so late joiners can sync.

pub mod audio_bridge;
pub mod codec;
pub mod config;
pub mod depth;
pub mod error;
pub mod events;
pub mod exchange;
pub mod mux;
pub mod osc;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod rtcp;
pub mod rtp;
pub mod transport;
pub mod types;

pub use audio_bridge::{EchoCancelBridge, ProcessedQuantum, QuantumSlicer, QUANTUM_SAMPLES};
pub use config::{AudioProcessingConfig, CallConfig, ChannelConfig};
pub use depth::{DepthCalibration, DepthColorLut, DepthDeltaCodec, DEFAULT_MAX_DEPTH};
pub use error::{Error, Result};
pub use events::CallEvent;
pub use exchange::{FrameExchange, FrameProducer, OscExchange};
pub use mux::{ConsumerHandle, SessionMux};
pub use osc::{OscArg, OscMessage};
pub use pool::{AudioFramePool, FrameBufferPool, PooledFrame};
pub use recovery::RecoveryController;
pub use transport::{IcePipes, IceTransport, PortBlock, Transport, UdpTransport};
pub use types::{
    CandidateInfo, ChannelDescription, Direction, MediaKind, RtcpSnapshot, SessionId,
    TransportCredentials, VideoFormat,
};
