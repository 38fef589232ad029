//! Configuration for calls, channels, and audio processing
//!
//! Plain structs with sensible `Default`s, consumed at construction time.
//! Per-encoder bitrates are runtime-adjustable through the pipeline handles;
//! the values here are only the initial settings.

use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Default video bitrate in kbit/s
pub const DEFAULT_VIDEO_BITRATE_KBPS: u32 = 300;
/// Allowed video bitrate range in kbit/s
pub const VIDEO_BITRATE_RANGE_KBPS: RangeInclusive<u32> = 0..=6000;

/// Default depth bitrate in kbit/s
pub const DEFAULT_DEPTH_BITRATE_KBPS: u32 = 1024;
/// Allowed depth bitrate range in kbit/s
pub const DEPTH_BITRATE_RANGE_KBPS: RangeInclusive<u32> = 0..=6000;

/// Default audio bitrate in bit/s
pub const DEFAULT_AUDIO_BITRATE_BPS: u32 = 64_000;
/// Allowed audio bitrate range in bit/s
pub const AUDIO_BITRATE_RANGE_BPS: RangeInclusive<u32> = 4000..=650_000;

/// Default receive-side jitter latency in milliseconds
pub const DEFAULT_LATENCY_MS: u32 = 200;
/// Maximum settable receive latency in milliseconds
pub const MAX_LATENCY_MS: u32 = 2000;

/// Top-level configuration for one call
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Remote peer address (direct UDP mode)
    pub remote_address: Option<IpAddr>,
    /// Base port of the local port block. RTP = base, RTCP receive =
    /// base + 1, base + 2 reserved, RTCP send target = base + 3.
    pub base_port: u16,
    /// Initial receive-side jitter latency in milliseconds
    pub latency_ms: u32,
    /// Drop frames that overflow the configured latency instead of
    /// letting the receive buffer grow
    pub drop_on_latency: bool,
    /// Audio processing (echo cancel) settings; `None` leaves the bridge out
    pub audio_processing: Option<AudioProcessingConfig>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            remote_address: None,
            base_port: 5000,
            latency_ms: DEFAULT_LATENCY_MS,
            drop_on_latency: true,
            audio_processing: None,
        }
    }
}

/// Per-channel parameters supplied to `add_channel`
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frame shape for video and depth channels; ignored for audio/OSC
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame rate for video and depth channels
    pub fps: u32,
    /// Initial encoder bitrate. Video/depth in kbit/s, audio in bit/s.
    pub bitrate: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            bitrate: DEFAULT_VIDEO_BITRATE_KBPS,
        }
    }
}

impl ChannelConfig {
    /// Channel config for a video stream of the given shape
    pub fn video(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps, bitrate: DEFAULT_VIDEO_BITRATE_KBPS }
    }

    /// Channel config for a depth stream of the given shape
    pub fn depth(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps, bitrate: DEFAULT_DEPTH_BITRATE_KBPS }
    }

    /// Channel config for the voice channel
    pub fn audio() -> Self {
        Self { width: 0, height: 0, fps: 0, bitrate: DEFAULT_AUDIO_BITRATE_BPS }
    }

    /// Channel config for the OSC control channel
    pub fn osc() -> Self {
        Self { width: 0, height: 0, fps: 0, bitrate: 0 }
    }
}

/// Echo-cancel audio bridge settings
///
/// Each toggle enables one stage of the injected audio processor. Drift
/// compensation additionally feeds the processed-sample counter difference
/// between the two peers into the processor each quantum.
#[derive(Debug, Clone)]
pub struct AudioProcessingConfig {
    /// Enable acoustic echo cancellation
    pub echo_cancel: bool,
    /// Enable noise suppression
    pub noise_suppression: bool,
    /// Enable automatic gain control
    pub gain_control: bool,
    /// Enable voice activity detection (silence is zeroed)
    pub voice_detection: bool,
    /// Enable clock drift compensation
    pub drift_compensation: bool,
    /// Flip the sign of the drift estimate (device pairs that drift the
    /// other way)
    pub reverse_drift: bool,
    /// Capture path minimum latency in milliseconds, part of the stream
    /// delay fed to the processor
    pub capture_min_latency_ms: u32,
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            echo_cancel: true,
            noise_suppression: true,
            gain_control: true,
            voice_detection: false,
            drift_compensation: false,
            reverse_drift: false,
            capture_min_latency_ms: 10,
        }
    }
}
