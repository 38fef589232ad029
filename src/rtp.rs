//! Minimal RTP packet handling
//!
//! Fixed 12-byte header, no CSRC list, no extensions. Each encoded payload
//! travels as one packet with the marker bit set, which is all the encode
//! chains here produce.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::{Error, Result};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;
/// Fixed header size in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// Parsed RTP header plus payload
#[derive(Debug, Clone)]
pub struct RtpPacket {
    /// Marker bit (frame boundary)
    pub marker: bool,
    /// Payload type
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Media timestamp in the stream's clock rate
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Payload bytes
    pub payload: Bytes,
}

impl RtpPacket {
    /// Serialize header and payload into wire form
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + self.payload.len());
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7f));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a wire packet
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(Error::MalformedPacket("RTP packet shorter than header".into()));
        }
        let b0 = data.get_u8();
        if b0 >> 6 != RTP_VERSION {
            return Err(Error::MalformedPacket(format!("bad RTP version {}", b0 >> 6)));
        }
        let b1 = data.get_u8();
        Ok(Self {
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7f,
            sequence: data.get_u16(),
            timestamp: data.get_u32(),
            ssrc: data.get_u32(),
            payload: data,
        })
    }
}

/// Per-session packetizer: owns the sequence counter and SSRC
pub struct RtpPacketizer {
    payload_type: u8,
    sequence: u16,
    ssrc: u32,
    packets_sent: u64,
    bytes_sent: u64,
}

impl RtpPacketizer {
    /// New packetizer with a random SSRC and sequence start
    pub fn new(payload_type: u8) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            payload_type,
            sequence: rng.gen(),
            ssrc: rng.gen(),
            packets_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Local SSRC of this stream
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Packets sent so far
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Payload bytes sent so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Wrap one payload into a packet, advancing the sequence number
    pub fn packetize(&mut self, payload: Bytes, timestamp: u32) -> RtpPacket {
        let packet = RtpPacket {
            marker: true,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp,
            ssrc: self.ssrc,
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.packets_sent += 1;
        self.bytes_sent += packet.payload.len() as u64;
        packet
    }
}
