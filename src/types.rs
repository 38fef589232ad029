//! Core media types shared across the call engine
//!
//! These are the vocabulary types the rest of the crate speaks: media kinds
//! and directions, session identifiers, frame containers, cached RTCP
//! statistics, and the serializable session-description records handed to
//! the signaling collaborator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of media carried by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Color video frames
    Video,
    /// Depth data remapped through the color ramp and sent as video
    Depth,
    /// Raw 16-bit depth sent as keyframe/delta pairs
    Depth16,
    /// Voice audio
    Audio,
    /// OSC control messages
    Osc,
}

impl MediaKind {
    /// RTP payload type number for this media kind
    pub fn payload_type(&self) -> u8 {
        match self {
            MediaKind::Video => 96,
            MediaKind::Depth | MediaKind::Depth16 => 97,
            MediaKind::Audio => 98,
            MediaKind::Osc => 99,
        }
    }

    /// RTP clock rate for this media kind
    pub fn clock_rate(&self) -> u32 {
        match self {
            MediaKind::Audio => 48_000,
            _ => 90_000,
        }
    }

    /// Wire name used in session descriptions
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Depth => "depth",
            MediaKind::Depth16 => "depth16",
            MediaKind::Audio => "audio",
            MediaKind::Osc => "osc",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a media session relative to the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local media sent to the remote peer
    Send,
    /// Remote media received locally
    Recv,
}

/// Opaque identifier for a session inside one mux lifetime
///
/// Ids are assigned monotonically from 0 in `add_channel` order and restart
/// from 0 after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Fixed shape of a video frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per pixel (3 = RGB, 4 = RGBA)
    pub channels: u32,
}

impl VideoFormat {
    /// Total buffer size in bytes for this format
    pub fn byte_len(&self) -> usize {
        (self.width * self.height * self.channels) as usize
    }

    /// Number of pixels in a frame of this format
    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }
}

/// Cached RTCP statistics snapshot for one session
///
/// Refreshed by the stats poll loop; reading never touches the network.
#[derive(Debug, Clone, Default)]
pub struct RtcpSnapshot {
    /// Estimated round trip time, if a report pair has completed
    pub round_trip: Option<Duration>,
    /// Cumulative packets lost as reported by the remote receiver.
    /// Monotone non-decreasing within a session lifetime.
    pub packets_lost: i32,
    /// Loss fraction over the last report interval (0..=255 per RFC 3550)
    pub fraction_lost: u8,
    /// Interarrival jitter in clock-rate units
    pub jitter: u32,
    /// Local sending bitrate estimate in bits per second
    pub local_bitrate: u64,
}

/// Describes one media channel for the signaling boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDescription {
    /// Media kind name ("video" | "audio" | "depth" | "depth16" | "osc")
    pub media: String,
    /// RTP payload type
    pub payload_type: u8,
    /// RTP clock rate
    pub clock_rate: u32,
    /// Codec name advertised for this channel
    pub codec: String,
}

/// ICE-style credentials for a NAT-traversed transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCredentials {
    /// Username fragment
    pub ufrag: String,
    /// Password
    pub password: String,
}

/// One transport candidate offered during negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInfo {
    /// Candidate address
    pub address: String,
    /// Candidate port
    pub port: u16,
    /// Component id (1 = RTP, 2 = RTCP recv, 3 = RTCP send)
    pub component: u8,
    /// Candidate type ("host" | "srflx" | "relay")
    pub kind: String,
}
