//! Codec trait seams
//!
//! The actual video, depth, and voice codecs (and the acoustic echo
//! canceller) are black boxes behind these traits; the pipeline only cares
//! about the operations it drives: encode with an optional forced sync
//! point, runtime bitrate changes, and the echo processor's capture/render
//! split. The passthrough implementations below are the trivial reference
//! codecs used by default and in tests.

use bytes::{Bytes, BytesMut};

use crate::config::AudioProcessingConfig;
use crate::error::Result;

/// Encoder for video-shaped frames (color video or color-mapped depth)
pub trait VideoEncoder: Send {
    /// Encode one raw frame. `force_keyframe` requests a sync point.
    fn encode(&mut self, frame: &[u8], force_keyframe: bool) -> Result<EncodedVideo>;

    /// Change the target bitrate in kbit/s without reinitializing
    fn set_bitrate(&mut self, kbps: u32);
}

/// One encoded video access unit
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    /// Encoded bytes
    pub data: Bytes,
    /// Whether this unit is independently decodable
    pub is_keyframe: bool,
}

/// Decoder for video-shaped payloads
pub trait VideoDecoder: Send {
    /// Decode one payload into raw frame bytes
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes>;
}

/// Voice encoder working on 16-bit mono samples
pub trait AudioEncoder: Send {
    /// Encode one block of samples
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes>;

    /// Change the target bitrate in bit/s
    fn set_bitrate(&mut self, bps: u32);
}

/// Voice decoder producing 16-bit mono samples
pub trait AudioDecoder: Send {
    /// Decode one payload; appends samples to `out`
    fn decode(&mut self, payload: &[u8], out: &mut Vec<i16>) -> Result<()>;
}

/// Echo-cancel processor capability
///
/// Implementations wrap a real AEC engine. The bridge feeds render (far-end)
/// audio and capture (near-end) audio in matched 10 ms quanta and keeps the
/// processor's delay, drift, and analog-level inputs current.
pub trait AudioProcessor: Send {
    /// Enable or disable the processor's stages (echo cancellation, noise
    /// suppression, gain control). Called once when the bridge is built.
    fn configure(&mut self, _config: &AudioProcessingConfig) {}

    /// Total capture-to-render delay estimate in milliseconds
    fn set_stream_delay_ms(&mut self, delay_ms: u32);

    /// Clock drift between the two peers, in samples per quantum. Positive
    /// means the remote clock runs fast.
    fn set_stream_drift_samples(&mut self, drift: i32);

    /// Analog input level hint for gain control (device-specific units)
    fn set_analog_level(&mut self, level: u32);

    /// Level the processor recommends for the next quantum
    fn analog_level(&self) -> u32;

    /// Process one captured quantum in place. Returns whether voice was
    /// detected.
    fn process_capture(&mut self, quantum: &mut [i16]) -> bool;

    /// Feed one rendered (far-end) quantum for echo estimation
    fn process_render(&mut self, quantum: &[i16]);
}

/// Identity video codec: raw bytes pass through, every frame is a keyframe
/// unless the stream says otherwise
pub struct PassthroughVideoCodec {
    bitrate_kbps: u32,
}

impl PassthroughVideoCodec {
    /// New passthrough codec at the given nominal bitrate
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }
}

impl VideoEncoder for PassthroughVideoCodec {
    fn encode(&mut self, frame: &[u8], force_keyframe: bool) -> Result<EncodedVideo> {
        Ok(EncodedVideo {
            data: Bytes::copy_from_slice(frame),
            is_keyframe: force_keyframe,
        })
    }

    fn set_bitrate(&mut self, kbps: u32) {
        self.bitrate_kbps = kbps;
    }
}

impl VideoDecoder for PassthroughVideoCodec {
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

/// Linear PCM voice codec: i16 samples as little-endian bytes
pub struct PcmAudioCodec {
    bitrate_bps: u32,
}

impl PcmAudioCodec {
    /// New PCM codec at the given nominal bitrate
    pub fn new(bitrate_bps: u32) -> Self {
        Self { bitrate_bps }
    }
}

impl AudioEncoder for PcmAudioCodec {
    fn encode(&mut self, samples: &[i16]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        Ok(buf.freeze())
    }

    fn set_bitrate(&mut self, bps: u32) {
        self.bitrate_bps = bps;
    }
}

impl AudioDecoder for PcmAudioCodec {
    fn decode(&mut self, payload: &[u8], out: &mut Vec<i16>) -> Result<()> {
        out.reserve(payload.len() / 2);
        for pair in payload.chunks_exact(2) {
            out.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        Ok(())
    }
}

/// Processor that does nothing: no echo path, voice always present
pub struct NullAudioProcessor {
    analog_level: u32,
}

impl NullAudioProcessor {
    /// New inert processor
    pub fn new() -> Self {
        // Gain control levels start at the midpoint of the device range
        Self { analog_level: 0x10000 }
    }
}

impl Default for NullAudioProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioProcessor for NullAudioProcessor {
    fn set_stream_delay_ms(&mut self, _delay_ms: u32) {}

    fn set_stream_drift_samples(&mut self, _drift: i32) {}

    fn set_analog_level(&mut self, level: u32) {
        self.analog_level = level;
    }

    fn analog_level(&self) -> u32 {
        self.analog_level
    }

    fn process_capture(&mut self, _quantum: &mut [i16]) -> bool {
        true
    }

    fn process_render(&mut self, _quantum: &[i16]) {}
}
