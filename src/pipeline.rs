//! Per-media send and receive chains
//!
//! One chain per session, built by the mux when a channel is added. Send
//! chains run on the caller's thread: format assert, encode (with an
//! optional forced sync point), packetize, and hand the wire bytes to the
//! session's transport channel. Receive chains run inside the session's
//! receive task: reorder through the jitter buffer, decode, and submit into
//! the frame exchange where the consumer's tick picks them up.
//!
//! Per-frame failures are absorbed here: a mis-sized frame or a closed
//! downstream logs a warning and drops the frame, the chain stays usable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{AudioDecoder, AudioEncoder, VideoDecoder, VideoEncoder};
use crate::depth::{DepthColorLut, DepthDeltaCodec};
use crate::error::{Error, Result};
use crate::exchange::FrameProducer;
use crate::osc::{self, OscMessage};
use crate::pool::FrameBufferPool;
use crate::rtp::{RtpPacket, RtpPacketizer};
use crate::types::{MediaKind, VideoFormat};

/// Reorder buffer for one receive session
///
/// Packets come out strictly in sequence order. When the buffer exceeds its
/// capacity the head gap is abandoned: with `drop_on_overflow` the stalled
/// packets are discarded, otherwise they are released out of order late.
/// Capacity derives from the configured latency and the stream's rate and
/// is shared through an atomic, so a runtime latency change reaches the
/// chain while it runs.
pub struct JitterBuffer {
    packets: BTreeMap<u64, RtpPacket>,
    next_seq: Option<u16>,
    capacity: Arc<AtomicUsize>,
    drop_on_overflow: bool,
    cycles: u64,
    last_seq: u16,
}

impl JitterBuffer {
    /// New buffer holding at most `capacity` packets
    pub fn new(capacity: usize, drop_on_overflow: bool) -> Self {
        Self {
            packets: BTreeMap::new(),
            next_seq: None,
            capacity: Arc::new(AtomicUsize::new(capacity.max(1))),
            drop_on_overflow,
            cycles: 0,
            last_seq: 0,
        }
    }

    /// Shared capacity handle, for retargeting the buffer while the chain
    /// is running
    pub fn capacity_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.capacity)
    }

    fn extend_seq(&mut self, seq: u16) -> u64 {
        // Signed distance from the highest sequence seen decides whether
        // this packet is ahead of the head or a reordered straggler
        let delta = seq.wrapping_sub(self.last_seq) as i16;
        if delta >= 0 {
            if seq < self.last_seq {
                self.cycles += 1 << 16;
            }
            self.last_seq = seq;
            self.cycles + u64::from(seq)
        } else if seq > self.last_seq {
            // Behind the head but numerically larger: previous cycle
            self.cycles.saturating_sub(1 << 16) + u64::from(seq)
        } else {
            self.cycles + u64::from(seq)
        }
    }

    /// Insert one packet and drain everything that is ready, in order
    pub fn insert(&mut self, packet: RtpPacket) -> Vec<RtpPacket> {
        let seq = packet.sequence;
        if self.next_seq.is_none() {
            self.next_seq = Some(seq);
            self.last_seq = seq;
        } else if let Some(expected) = self.next_seq {
            // Older than everything still wanted: duplicate or stale
            if (seq.wrapping_sub(expected) as i16) < 0 {
                debug!("dropping late packet seq {}", seq);
                return Vec::new();
            }
        }
        let key = self.extend_seq(seq);
        self.packets.insert(key, packet);

        let mut ready = Vec::new();
        loop {
            let Some(expected) = self.next_seq else { break };
            let head_key = match self.packets.keys().next() {
                Some(&k) => k,
                None => break,
            };
            let head_seq = (head_key & 0xffff) as u16;
            if head_seq == expected {
                if let Some(pkt) = self.packets.remove(&head_key) {
                    ready.push(pkt);
                }
                self.next_seq = Some(expected.wrapping_add(1));
            } else if self.packets.len() > self.capacity.load(Ordering::Relaxed).max(1) {
                // Head-of-line gap held too long: abandon it
                if self.drop_on_overflow {
                    debug!("jitter buffer overflow, skipping gap at seq {}", expected);
                }
                self.next_seq = Some(head_seq);
            } else {
                break;
            }
        }
        ready
    }

    /// Packets currently waiting on a gap
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Video-shaped send chain: raw frames in, wire packets out
pub struct VideoSendChain {
    format: VideoFormat,
    pool: FrameBufferPool<u8>,
    encoder: Box<dyn VideoEncoder>,
    packetizer: RtpPacketizer,
    out: mpsc::UnboundedSender<Bytes>,
    timestamp: u32,
    ts_step: u32,
    force_key: bool,
}

impl VideoSendChain {
    /// Build a send chain for `format` at `fps`
    pub fn new(
        kind: MediaKind,
        format: VideoFormat,
        fps: u32,
        encoder: Box<dyn VideoEncoder>,
        out: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let ts_step = kind.clock_rate() / fps.max(1);
        Self {
            format,
            pool: FrameBufferPool::new(format.byte_len(), 2),
            encoder,
            packetizer: RtpPacketizer::new(kind.payload_type()),
            out,
            timestamp: 0,
            ts_step,
            force_key: false,
        }
    }

    /// Pool the application checks raw frames out of
    pub fn pool(&self) -> FrameBufferPool<u8> {
        self.pool.clone()
    }

    /// Frame shape this chain asserts on
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Local SSRC of the outgoing stream
    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    /// Packets and payload bytes sent so far
    pub fn sent_counts(&self) -> (u64, u64) {
        (self.packetizer.packets_sent(), self.packetizer.bytes_sent())
    }

    /// Ask for a sync point on the next frame
    pub fn request_keyframe(&mut self) {
        self.force_key = true;
    }

    /// Retarget the encoder bitrate (kbit/s) without rebuilding
    pub fn set_bitrate(&mut self, kbps: u32) {
        self.encoder.set_bitrate(kbps);
    }

    /// Encode and send one frame. `force_key` is OR-ed with any pending
    /// key-frame request.
    pub fn push_frame(&mut self, frame: &[u8], force_key: bool) -> Result<()> {
        if frame.len() != self.format.byte_len() {
            return Err(Error::TransientPush(format!(
                "frame size {} does not match {}x{}x{}",
                frame.len(),
                self.format.width,
                self.format.height,
                self.format.channels
            )));
        }
        let force = force_key || std::mem::take(&mut self.force_key);
        let encoded = self.encoder.encode(frame, force)?;
        let packet = self.packetizer.packetize(encoded.data, self.timestamp);
        self.timestamp = self.timestamp.wrapping_add(self.ts_step);
        self.out
            .send(packet.serialize())
            .map_err(|_| Error::TransientPush("send chain disconnected".into()))
    }
}

/// Depth send chain over the color ramp: u16 depth remapped to RGB, then
/// treated as video
pub struct DepthColorSendChain {
    inner: VideoSendChain,
    lut: DepthColorLut,
    rgb: Vec<u8>,
}

impl DepthColorSendChain {
    /// Build a depth-over-color chain; `format` must be 3-channel
    pub fn new(
        format: VideoFormat,
        fps: u32,
        lut: DepthColorLut,
        encoder: Box<dyn VideoEncoder>,
        out: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        let rgb = vec![0u8; format.byte_len()];
        Self { inner: VideoSendChain::new(MediaKind::Depth, format, fps, encoder, out), lut, rgb }
    }

    /// Ask for a sync point on the next frame
    pub fn request_keyframe(&mut self) {
        self.inner.request_keyframe();
    }

    /// Local SSRC of the outgoing stream
    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc()
    }

    /// Packets and payload bytes sent so far
    pub fn sent_counts(&self) -> (u64, u64) {
        self.inner.sent_counts()
    }

    /// Retarget the encoder bitrate (kbit/s)
    pub fn set_bitrate(&mut self, kbps: u32) {
        self.inner.set_bitrate(kbps);
    }

    /// Remap one depth frame through the ramp and send it
    pub fn push_depth(&mut self, depth: &[u16], force_key: bool) -> Result<()> {
        if depth.len() * 3 != self.rgb.len() {
            return Err(Error::TransientPush(format!(
                "depth frame has {} pixels, chain expects {}",
                depth.len(),
                self.rgb.len() / 3
            )));
        }
        self.lut.depth_to_color(depth, &mut self.rgb);
        let rgb = std::mem::take(&mut self.rgb);
        let result = self.inner.push_frame(&rgb, force_key);
        self.rgb = rgb;
        result
    }
}

/// Raw 16-bit depth send chain using the keyframe/delta codec
pub struct Depth16SendChain {
    codec: DepthDeltaCodec,
    pixel_count: usize,
    packetizer: RtpPacketizer,
    out: mpsc::UnboundedSender<Bytes>,
    timestamp: u32,
    ts_step: u32,
    force_key: bool,
}

impl Depth16SendChain {
    /// Build a raw depth chain for frames of `pixel_count` values
    pub fn new(
        pixel_count: usize,
        fps: u32,
        codec: DepthDeltaCodec,
        out: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            codec,
            pixel_count,
            packetizer: RtpPacketizer::new(MediaKind::Depth16.payload_type()),
            out,
            timestamp: 0,
            ts_step: MediaKind::Depth16.clock_rate() / fps.max(1),
            force_key: false,
        }
    }

    /// Ask for a keyframe (baseline replacement) on the next frame
    pub fn request_keyframe(&mut self) {
        self.force_key = true;
    }

    /// Local SSRC of the outgoing stream
    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    /// Packets and payload bytes sent so far
    pub fn sent_counts(&self) -> (u64, u64) {
        (self.packetizer.packets_sent(), self.packetizer.bytes_sent())
    }

    /// Encode and send one depth frame
    pub fn push_depth(&mut self, depth: &[u16], force_key: bool) -> Result<()> {
        if depth.len() != self.pixel_count {
            return Err(Error::TransientPush(format!(
                "depth frame has {} pixels, chain expects {}",
                depth.len(),
                self.pixel_count
            )));
        }
        let force = force_key || std::mem::take(&mut self.force_key);
        let payload = self.codec.encode(depth, force);
        let packet = self.packetizer.packetize(payload, self.timestamp);
        self.timestamp = self.timestamp.wrapping_add(self.ts_step);
        self.out
            .send(packet.serialize())
            .map_err(|_| Error::TransientPush("send chain disconnected".into()))
    }
}

/// Voice send chain: processed quanta in, wire packets out
pub struct AudioSendChain {
    encoder: Box<dyn AudioEncoder>,
    packetizer: RtpPacketizer,
    out: mpsc::UnboundedSender<Bytes>,
}

impl AudioSendChain {
    /// Build the voice chain
    pub fn new(encoder: Box<dyn AudioEncoder>, out: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { encoder, packetizer: RtpPacketizer::new(MediaKind::Audio.payload_type()), out }
    }

    /// Local SSRC of the outgoing stream
    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    /// Packets and payload bytes sent so far
    pub fn sent_counts(&self) -> (u64, u64) {
        (self.packetizer.packets_sent(), self.packetizer.bytes_sent())
    }

    /// Retarget the encoder bitrate (bit/s)
    pub fn set_bitrate(&mut self, bps: u32) {
        self.encoder.set_bitrate(bps);
    }

    /// Encode and send one quantum. `timestamp` is in capture samples
    /// (32 kHz); the wire clock runs at 48 kHz.
    pub fn push_quantum(&mut self, samples: &[i16], timestamp: u64) -> Result<()> {
        let payload = self.encoder.encode(samples)?;
        let rtp_ts = (timestamp * 3 / 2) as u32;
        let packet = self.packetizer.packetize(payload, rtp_ts);
        self.out
            .send(packet.serialize())
            .map_err(|_| Error::TransientPush("send chain disconnected".into()))
    }
}

/// OSC send chain: message in, compressed packet out
pub struct OscSendChain {
    packetizer: RtpPacketizer,
    out: mpsc::UnboundedSender<Bytes>,
    timestamp: u32,
}

impl OscSendChain {
    /// Build the control chain
    pub fn new(out: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { packetizer: RtpPacketizer::new(MediaKind::Osc.payload_type()), out, timestamp: 0 }
    }

    /// Local SSRC of the outgoing stream
    pub fn ssrc(&self) -> u32 {
        self.packetizer.ssrc()
    }

    /// Packets and payload bytes sent so far
    pub fn sent_counts(&self) -> (u64, u64) {
        (self.packetizer.packets_sent(), self.packetizer.bytes_sent())
    }

    /// Encode, compress, and send one message
    pub fn send_message(&mut self, msg: &OscMessage) -> Result<()> {
        let payload = osc::encode_payload(msg);
        let packet = self.packetizer.packetize(payload, self.timestamp);
        self.timestamp = self.timestamp.wrapping_add(1);
        self.out
            .send(packet.serialize())
            .map_err(|_| Error::TransientPush("send chain disconnected".into()))
    }
}

/// Video-shaped receive chain: wire packets in, decoded frames into the
/// exchange
pub struct VideoRecvChain {
    jitter: JitterBuffer,
    decoder: Box<dyn VideoDecoder>,
    producer: FrameProducer<Bytes>,
}

impl VideoRecvChain {
    /// Build the receive chain
    pub fn new(
        jitter: JitterBuffer,
        decoder: Box<dyn VideoDecoder>,
        producer: FrameProducer<Bytes>,
    ) -> Self {
        Self { jitter, decoder, producer }
    }

    /// Handle one arrived packet
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        for pkt in self.jitter.insert(packet) {
            match self.decoder.decode(&pkt.payload) {
                Ok(frame) => self.producer.submit(frame),
                Err(e) => warn!("video decode failed: {}", e),
            }
        }
    }
}

/// Depth-over-color receive chain: decoded RGB unmapped back to u16 depth
pub struct DepthColorRecvChain {
    jitter: JitterBuffer,
    decoder: Box<dyn VideoDecoder>,
    lut: DepthColorLut,
    producer: FrameProducer<Vec<u16>>,
}

impl DepthColorRecvChain {
    /// Build the receive chain
    pub fn new(
        jitter: JitterBuffer,
        decoder: Box<dyn VideoDecoder>,
        lut: DepthColorLut,
        producer: FrameProducer<Vec<u16>>,
    ) -> Self {
        Self { jitter, decoder, lut, producer }
    }

    /// Handle one arrived packet
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        for pkt in self.jitter.insert(packet) {
            match self.decoder.decode(&pkt.payload) {
                Ok(rgb) => {
                    if rgb.len() % 3 != 0 {
                        warn!("depth frame length {} is not RGB shaped", rgb.len());
                        continue;
                    }
                    let mut depth = vec![0u16; rgb.len() / 3];
                    self.lut.color_to_depth(&rgb, &mut depth);
                    self.producer.submit(depth);
                }
                Err(e) => warn!("depth decode failed: {}", e),
            }
        }
    }
}

/// Raw 16-bit depth receive chain with the resident-keyframe decoder
pub struct Depth16RecvChain {
    jitter: JitterBuffer,
    codec: DepthDeltaCodec,
    pixel_count: usize,
    producer: FrameProducer<Vec<u16>>,
}

impl Depth16RecvChain {
    /// Build the receive chain for frames of `pixel_count` values
    pub fn new(
        jitter: JitterBuffer,
        codec: DepthDeltaCodec,
        pixel_count: usize,
        producer: FrameProducer<Vec<u16>>,
    ) -> Self {
        Self { jitter, codec, pixel_count, producer }
    }

    /// Zero-plane calibration from the most recent keyframe
    pub fn calibration(&self) -> crate::depth::DepthCalibration {
        self.codec.calibration()
    }

    /// Handle one arrived packet
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        for pkt in self.jitter.insert(packet) {
            let mut depth = vec![0u16; self.pixel_count];
            match self.codec.decode(pkt.payload, &mut depth) {
                Ok(()) => self.producer.submit(depth),
                Err(e) => warn!("depth delta decode failed: {}", e),
            }
        }
    }
}

/// Voice receive chain: decoded sample runs queued for playout (audio is
/// queued, never newest-wins)
pub struct AudioRecvChain {
    jitter: JitterBuffer,
    decoder: Box<dyn AudioDecoder>,
    out: mpsc::UnboundedSender<Vec<i16>>,
}

impl AudioRecvChain {
    /// Build the receive chain
    pub fn new(
        jitter: JitterBuffer,
        decoder: Box<dyn AudioDecoder>,
        out: mpsc::UnboundedSender<Vec<i16>>,
    ) -> Self {
        Self { jitter, decoder, out }
    }

    /// Handle one arrived packet
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        for pkt in self.jitter.insert(packet) {
            let mut samples = Vec::new();
            match self.decoder.decode(&pkt.payload, &mut samples) {
                Ok(()) => {
                    if self.out.send(samples).is_err() {
                        warn!("audio playout queue closed, dropping samples");
                    }
                }
                Err(e) => warn!("audio decode failed: {}", e),
            }
        }
    }
}

/// OSC receive chain: compressed payloads into the exchange, decoded at
/// the consumer's poll
pub struct OscRecvChain {
    jitter: JitterBuffer,
    producer: FrameProducer<Bytes>,
}

impl OscRecvChain {
    /// Build the receive chain
    pub fn new(jitter: JitterBuffer, producer: FrameProducer<Bytes>) -> Self {
        Self { jitter, producer }
    }

    /// Handle one arrived packet
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        for pkt in self.jitter.insert(packet) {
            self.producer.submit(pkt.payload);
        }
    }
}

/// The receive chain variants the mux binds to arriving pads
pub enum RecvChain {
    /// Color video
    Video(VideoRecvChain),
    /// Depth over the color ramp
    Depth(DepthColorRecvChain),
    /// Raw 16-bit depth
    Depth16(Depth16RecvChain),
    /// Voice
    Audio(AudioRecvChain),
    /// Control messages
    Osc(OscRecvChain),
}

impl RecvChain {
    /// Route one packet into the variant's handler
    pub fn handle_packet(&mut self, packet: RtpPacket) {
        match self {
            RecvChain::Video(c) => c.handle_packet(packet),
            RecvChain::Depth(c) => c.handle_packet(packet),
            RecvChain::Depth16(c) => c.handle_packet(packet),
            RecvChain::Audio(c) => c.handle_packet(packet),
            RecvChain::Osc(c) => c.handle_packet(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PassthroughVideoCodec, PcmAudioCodec};
    use crate::exchange::FrameExchange;

    fn packet(seq: u16, payload: &'static [u8]) -> RtpPacket {
        RtpPacket {
            marker: true,
            payload_type: 96,
            sequence: seq,
            timestamp: 0,
            ssrc: 1,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_jitter_buffer_reorders() {
        let mut jb = JitterBuffer::new(8, true);
        assert_eq!(jb.insert(packet(10, b"a")).len(), 1);
        assert!(jb.insert(packet(12, b"c")).is_empty());
        let ready = jb.insert(packet(11, b"b"));
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].sequence, 11);
        assert_eq!(ready[1].sequence, 12);
    }

    #[test]
    fn test_jitter_buffer_abandons_gap_on_overflow() {
        let mut jb = JitterBuffer::new(2, true);
        jb.insert(packet(0, b"x"));
        // Packet 1 never arrives
        assert!(jb.insert(packet(2, b"a")).is_empty());
        assert!(jb.insert(packet(3, b"b")).is_empty());
        let ready = jb.insert(packet(4, b"c"));
        assert_eq!(ready.len(), 3);
        assert_eq!(ready[0].sequence, 2);
    }

    #[test]
    fn test_jitter_buffer_sequence_wrap() {
        let mut jb = JitterBuffer::new(8, true);
        assert_eq!(jb.insert(packet(0xffff, b"a")).len(), 1);
        assert_eq!(jb.insert(packet(0x0000, b"b")).len(), 1);
        assert_eq!(jb.insert(packet(0x0001, b"c")).len(), 1);
    }

    #[test]
    fn test_stale_packet_after_wrap_is_dropped() {
        let mut jb = JitterBuffer::new(8, true);
        assert_eq!(jb.insert(packet(0xfffe, b"a")).len(), 1);
        assert_eq!(jb.insert(packet(0xffff, b"b")).len(), 1);
        assert_eq!(jb.insert(packet(0x0000, b"c")).len(), 1);

        // A straggler from the previous cycle must not disturb the cycle
        // count or block the head
        assert!(jb.insert(packet(0xffff, b"late")).is_empty());
        assert_eq!(jb.insert(packet(0x0001, b"d")).len(), 1);
        assert_eq!(jb.insert(packet(0x0002, b"e")).len(), 1);
    }

    #[test]
    fn test_jitter_capacity_retargets_live() {
        use std::sync::atomic::Ordering;

        let mut jb = JitterBuffer::new(2, true);
        let cap = jb.capacity_handle();
        assert_eq!(jb.insert(packet(0, b"x")).len(), 1);

        // Widen the buffer mid-stream: packets behind a gap that would
        // have overflowed the old capacity now wait for the missing head
        cap.store(8, Ordering::Relaxed);
        assert!(jb.insert(packet(2, b"a")).is_empty());
        assert!(jb.insert(packet(3, b"b")).is_empty());
        assert!(jb.insert(packet(4, b"c")).is_empty());

        let ready = jb.insert(packet(1, b"gap"));
        assert_eq!(ready.len(), 4);
        assert_eq!(ready[0].sequence, 1);
        assert_eq!(ready[3].sequence, 4);
    }

    #[test]
    fn test_video_send_chain_asserts_format() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let format = VideoFormat { width: 2, height: 2, channels: 3 };
        let mut chain = VideoSendChain::new(
            MediaKind::Video,
            format,
            30,
            Box::new(PassthroughVideoCodec::new(300)),
            tx,
        );

        assert!(chain.push_frame(&[0u8; 5], false).is_err());
        assert!(chain.push_frame(&[0u8; 12], false).is_ok());
        let wire = rx.try_recv().unwrap();
        let pkt = RtpPacket::parse(wire).unwrap();
        assert_eq!(pkt.payload_type, 96);
        assert_eq!(pkt.payload.len(), 12);
    }

    #[test]
    fn test_pending_keyframe_request_is_consumed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let format = VideoFormat { width: 1, height: 1, channels: 3 };
        let mut chain = VideoSendChain::new(
            MediaKind::Video,
            format,
            30,
            Box::new(PassthroughVideoCodec::new(300)),
            tx,
        );

        chain.request_keyframe();
        chain.push_frame(&[0u8; 3], false).unwrap();
        chain.push_frame(&[0u8; 3], false).unwrap();
        // Both frames went out; the request only applied to the first
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_depth16_chain_end_to_end() {
        use crate::depth::{DepthCalibration, DepthDeltaCodec};

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut send = Depth16SendChain::new(
            4,
            30,
            DepthDeltaCodec::new(DepthCalibration {
                zero_plane_pixel_size: 0.1,
                zero_plane_distance: 120.0,
            }),
            tx,
        );

        let (producer, mut consumer) = FrameExchange::channel();
        let mut recv = Depth16RecvChain::new(
            JitterBuffer::new(8, true),
            DepthDeltaCodec::new(DepthCalibration::default()),
            4,
            producer,
        );

        send.push_depth(&[1, 2, 3, 4], true).unwrap();
        send.push_depth(&[2, 2, 3, 5], false).unwrap();
        while let Ok(wire) = rx.try_recv() {
            recv.handle_packet(RtpPacket::parse(wire).unwrap());
        }

        assert!(consumer.poll());
        assert_eq!(consumer.frame().unwrap(), &vec![2u16, 2, 3, 5]);
        assert!((recv.calibration().zero_plane_distance - 120.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_audio_chain_timestamp_scaling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut chain = AudioSendChain::new(Box::new(PcmAudioCodec::new(64_000)), tx);
        chain.push_quantum(&[0i16; 320], 320).unwrap();
        let pkt = RtpPacket::parse(rx.try_recv().unwrap()).unwrap();
        // 320 samples at 32 kHz = 480 ticks at 48 kHz
        assert_eq!(pkt.timestamp, 480);
        assert_eq!(pkt.payload_type, 98);
    }

    #[test]
    fn test_osc_chain_round_trip() {
        use crate::exchange::OscExchange;
        use crate::osc::OscArg;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut send = OscSendChain::new(tx);
        let (producer, mut consumer) = OscExchange::channel();
        let mut recv = OscRecvChain::new(JitterBuffer::new(8, true), producer);

        let mut msg = OscMessage::new("/cursor");
        msg.push(OscArg::Float(0.5));
        send.send_message(&msg).unwrap();

        recv.handle_packet(RtpPacket::parse(rx.try_recv().unwrap()).unwrap());
        assert!(consumer.poll());
        assert_eq!(consumer.message(), &msg);
    }
}
