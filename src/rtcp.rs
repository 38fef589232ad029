//! Compact RTCP: sender/receiver reports and BYE
//!
//! Enough of RFC 3550 for the control loop this crate runs: senders emit
//! SRs, receivers answer with RRs carrying one report block per remote
//! stream, and the loss/RTT fields of those blocks drive the recovery
//! controller. BYE signals an orderly disconnect.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const PT_SR: u8 = 200;
const PT_RR: u8 = 201;
const PT_BYE: u8 = 203;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Current time as a 64-bit NTP timestamp
pub fn ntp_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let secs = since_unix.as_secs() + NTP_UNIX_OFFSET;
    let frac = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Middle 32 bits of an NTP timestamp (the LSR/DLSR unit, 1/65536 s)
pub fn ntp_short(ntp: u64) -> u32 {
    ((ntp >> 16) & 0xffff_ffff) as u32
}

/// One report block inside an SR or RR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    /// SSRC of the stream being reported on
    pub ssrc: u32,
    /// Fraction of packets lost in the last interval (0..=255)
    pub fraction_lost: u8,
    /// Cumulative packets lost (signed 24-bit on the wire)
    pub cumulative_lost: i32,
    /// Extended highest sequence number received
    pub highest_seq: u32,
    /// Interarrival jitter in clock-rate units
    pub jitter: u32,
    /// Middle 32 bits of the last SR's NTP timestamp
    pub last_sr: u32,
    /// Delay since that SR, in 1/65536 s
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        let lost = (self.cumulative_lost.clamp(-(1 << 23), (1 << 23) - 1) as u32) & 0x00ff_ffff;
        buf.put_u32((u32::from(self.fraction_lost) << 24) | lost);
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }

    fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 24 {
            return Err(Error::MalformedPacket("truncated report block".into()));
        }
        let ssrc = buf.get_u32();
        let word = buf.get_u32();
        let fraction_lost = (word >> 24) as u8;
        let mut cumulative_lost = (word & 0x00ff_ffff) as i32;
        if cumulative_lost & 0x0080_0000 != 0 {
            cumulative_lost -= 1 << 24;
        }
        Ok(Self {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    /// Round trip time derived from this block, given the current NTP short
    /// timestamp. `None` when no SR has been mirrored back yet.
    pub fn round_trip(&self, now_short: u32) -> Option<Duration> {
        if self.last_sr == 0 {
            return None;
        }
        let rtt_units = now_short
            .wrapping_sub(self.last_sr)
            .wrapping_sub(self.delay_since_last_sr);
        // Wrapped or nonsense values read as huge; cap at 10 s
        let micros = (u64::from(rtt_units) * 1_000_000) >> 16;
        if micros > 10_000_000 {
            return None;
        }
        Some(Duration::from_micros(micros))
    }
}

/// An RTCP packet this crate understands
#[derive(Debug, Clone)]
pub enum RtcpPacket {
    /// Sender report
    SenderReport {
        /// Sender's SSRC
        ssrc: u32,
        /// 64-bit NTP timestamp at send time
        ntp: u64,
        /// RTP timestamp corresponding to the NTP timestamp
        rtp_timestamp: u32,
        /// Total packets sent
        packet_count: u32,
        /// Total payload octets sent
        octet_count: u32,
        /// Reception reports piggybacked on the SR
        reports: Vec<ReportBlock>,
    },
    /// Receiver report
    ReceiverReport {
        /// Reporter's SSRC
        ssrc: u32,
        /// One block per remote stream
        reports: Vec<ReportBlock>,
    },
    /// Goodbye from the given source
    Bye {
        /// Departing SSRC
        ssrc: u32,
    },
}

impl RtcpPacket {
    /// Serialize into wire form
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            RtcpPacket::SenderReport { ssrc, ntp, rtp_timestamp, packet_count, octet_count, reports } => {
                let words = 6 + reports.len() * 6;
                buf.put_u8(0x80 | (reports.len() as u8 & 0x1f));
                buf.put_u8(PT_SR);
                buf.put_u16(words as u16);
                buf.put_u32(*ssrc);
                buf.put_u64(*ntp);
                buf.put_u32(*rtp_timestamp);
                buf.put_u32(*packet_count);
                buf.put_u32(*octet_count);
                for r in reports {
                    r.serialize_into(&mut buf);
                }
            }
            RtcpPacket::ReceiverReport { ssrc, reports } => {
                let words = 1 + reports.len() * 6;
                buf.put_u8(0x80 | (reports.len() as u8 & 0x1f));
                buf.put_u8(PT_RR);
                buf.put_u16(words as u16);
                buf.put_u32(*ssrc);
                for r in reports {
                    r.serialize_into(&mut buf);
                }
            }
            RtcpPacket::Bye { ssrc } => {
                buf.put_u8(0x81);
                buf.put_u8(PT_BYE);
                buf.put_u16(1);
                buf.put_u32(*ssrc);
            }
        }
        buf.freeze()
    }

    /// Parse one wire packet
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.remaining() < 8 {
            return Err(Error::MalformedPacket("RTCP packet shorter than header".into()));
        }
        let b0 = data.get_u8();
        if b0 >> 6 != 2 {
            return Err(Error::MalformedPacket("bad RTCP version".into()));
        }
        let count = (b0 & 0x1f) as usize;
        let pt = data.get_u8();
        let _length = data.get_u16();

        match pt {
            PT_SR => {
                if data.remaining() < 24 {
                    return Err(Error::MalformedPacket("truncated sender report".into()));
                }
                let ssrc = data.get_u32();
                let ntp = data.get_u64();
                let rtp_timestamp = data.get_u32();
                let packet_count = data.get_u32();
                let octet_count = data.get_u32();
                let mut reports = Vec::with_capacity(count);
                for _ in 0..count {
                    reports.push(ReportBlock::parse(&mut data)?);
                }
                Ok(RtcpPacket::SenderReport { ssrc, ntp, rtp_timestamp, packet_count, octet_count, reports })
            }
            PT_RR => {
                if data.remaining() < 4 {
                    return Err(Error::MalformedPacket("truncated receiver report".into()));
                }
                let ssrc = data.get_u32();
                let mut reports = Vec::with_capacity(count);
                for _ in 0..count {
                    reports.push(ReportBlock::parse(&mut data)?);
                }
                Ok(RtcpPacket::ReceiverReport { ssrc, reports })
            }
            PT_BYE => {
                if data.remaining() < 4 {
                    return Err(Error::MalformedPacket("truncated BYE".into()));
                }
                Ok(RtcpPacket::Bye { ssrc: data.get_u32() })
            }
            other => Err(Error::MalformedPacket(format!("unsupported RTCP type {}", other))),
        }
    }
}

/// Receive-side bookkeeping for one remote stream, enough to fill a report
/// block
#[derive(Debug, Default)]
pub struct ReceptionTracker {
    remote_ssrc: u32,
    base_seq: u32,
    highest_seq: u32,
    cycles: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
    jitter: u32,
    last_sr_short: u32,
    last_sr_arrival: Option<std::time::Instant>,
    started: bool,
}

impl ReceptionTracker {
    /// New tracker; the remote SSRC is learned from the first packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote SSRC being tracked, once traffic has arrived
    pub fn remote_ssrc(&self) -> Option<u32> {
        self.started.then_some(self.remote_ssrc)
    }

    /// Account for one received RTP packet
    pub fn on_packet(&mut self, ssrc: u32, sequence: u16) {
        let seq = u32::from(sequence);
        if !self.started {
            self.started = true;
            self.remote_ssrc = ssrc;
            self.base_seq = seq;
            self.highest_seq = seq;
            self.received = 1;
            return;
        }
        self.received = self.received.wrapping_add(1);
        let prev = (self.highest_seq & 0xffff) as u16;
        let delta = sequence.wrapping_sub(prev);
        if delta < 0x8000 {
            if sequence < prev {
                self.cycles = self.cycles.wrapping_add(1 << 16);
            }
            self.highest_seq = self.cycles | seq;
        }
    }

    /// Record that a sender report arrived, for LSR/DLSR mirroring
    pub fn on_sender_report(&mut self, ntp: u64) {
        self.last_sr_short = ntp_short(ntp);
        self.last_sr_arrival = Some(std::time::Instant::now());
    }

    /// Cumulative packets lost so far
    pub fn cumulative_lost(&self) -> i32 {
        let expected = self.highest_seq.wrapping_sub(self.base_seq).wrapping_add(1);
        expected as i32 - self.received as i32
    }

    /// Produce a report block for the current interval
    pub fn report_block(&mut self) -> ReportBlock {
        let expected = self.highest_seq.wrapping_sub(self.base_seq).wrapping_add(1);
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i32 - received_interval as i32;
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i32) as u8
        };

        let dlsr = self
            .last_sr_arrival
            .map(|at| ((at.elapsed().as_micros() as u64) << 16) / 1_000_000)
            .unwrap_or(0) as u32;

        ReportBlock {
            ssrc: self.remote_ssrc,
            fraction_lost,
            cumulative_lost: self.cumulative_lost(),
            highest_seq: self.highest_seq,
            jitter: self.jitter,
            last_sr: self.last_sr_short,
            delay_since_last_sr: dlsr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr_round_trip() {
        let rr = RtcpPacket::ReceiverReport {
            ssrc: 7,
            reports: vec![ReportBlock {
                ssrc: 42,
                fraction_lost: 12,
                cumulative_lost: -3,
                highest_seq: 0x0001_0010,
                jitter: 88,
                last_sr: 0x1234_5678,
                delay_since_last_sr: 100,
            }],
        };
        match RtcpPacket::parse(rr.serialize()).unwrap() {
            RtcpPacket::ReceiverReport { ssrc, reports } => {
                assert_eq!(ssrc, 7);
                assert_eq!(reports.len(), 1);
                assert_eq!(reports[0].cumulative_lost, -3);
                assert_eq!(reports[0].fraction_lost, 12);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_sr_and_bye_round_trip() {
        let sr = RtcpPacket::SenderReport {
            ssrc: 1,
            ntp: ntp_now(),
            rtp_timestamp: 90_000,
            packet_count: 10,
            octet_count: 1000,
            reports: vec![],
        };
        assert!(matches!(
            RtcpPacket::parse(sr.serialize()).unwrap(),
            RtcpPacket::SenderReport { ssrc: 1, .. }
        ));

        let bye = RtcpPacket::Bye { ssrc: 99 };
        assert!(matches!(
            RtcpPacket::parse(bye.serialize()).unwrap(),
            RtcpPacket::Bye { ssrc: 99 }
        ));
    }

    #[test]
    fn test_tracker_counts_loss() {
        let mut t = ReceptionTracker::new();
        t.on_packet(5, 100);
        t.on_packet(5, 101);
        t.on_packet(5, 103); // 102 lost
        t.on_packet(5, 104);
        assert_eq!(t.remote_ssrc(), Some(5));
        assert_eq!(t.cumulative_lost(), 1);

        let block = t.report_block();
        assert_eq!(block.cumulative_lost, 1);
        assert!(block.fraction_lost > 0);

        // Clean interval afterwards
        t.on_packet(5, 105);
        t.on_packet(5, 106);
        let block = t.report_block();
        assert_eq!(block.cumulative_lost, 1);
        assert_eq!(block.fraction_lost, 0);
    }

    #[test]
    fn test_tracker_sequence_wrap() {
        let mut t = ReceptionTracker::new();
        t.on_packet(9, 0xfffe);
        t.on_packet(9, 0xffff);
        t.on_packet(9, 0x0000);
        t.on_packet(9, 0x0001);
        assert_eq!(t.cumulative_lost(), 0);
    }

    #[test]
    fn test_round_trip_requires_mirrored_sr() {
        let block = ReportBlock {
            ssrc: 0,
            fraction_lost: 0,
            cumulative_lost: 0,
            highest_seq: 0,
            jitter: 0,
            last_sr: 0,
            delay_since_last_sr: 0,
        };
        assert!(block.round_trip(ntp_short(ntp_now())).is_none());
    }
}
