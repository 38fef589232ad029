//! OSC message model, binary wire format, and snappy framing
//!
//! The OSC channel carries one snappy-compressed OSC packet per RTP payload.
//! On the receive side a bundle is flattened into a single message: every
//! element's arguments are appended in order and the flattened message takes
//! the address of the last message in the bundle. Malformed packets become an
//! empty message; they are never surfaced as an error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{Error, Result};

/// One OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// 32-bit integer, type tag 'i'
    Int32(i32),
    /// 64-bit integer, type tag 'h'
    Int64(i64),
    /// 32-bit float, type tag 'f'
    Float(f32),
    /// String, type tag 's'
    String(String),
}

impl OscArg {
    fn type_tag(&self) -> u8 {
        match self {
            OscArg::Int32(_) => b'i',
            OscArg::Int64(_) => b'h',
            OscArg::Float(_) => b'f',
            OscArg::String(_) => b's',
        }
    }
}

/// An OSC message: an address pattern plus typed arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OscMessage {
    /// Address pattern, e.g. "/wand/position"
    pub address: String,
    /// Arguments in order
    pub args: Vec<OscArg>,
}

impl OscMessage {
    /// New message with the given address and no arguments
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), args: Vec::new() }
    }

    /// Append an argument
    pub fn push(&mut self, arg: OscArg) {
        self.args.push(arg);
    }

    /// Whether this is the empty message (no address, no args)
    pub fn is_empty(&self) -> bool {
        self.address.is_empty() && self.args.is_empty()
    }
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_slice(bytes);
    // OSC strings are null terminated then padded to a 4-byte boundary
    let padded = pad4(bytes.len() + 1);
    for _ in bytes.len()..padded {
        buf.put_u8(0);
    }
}

fn read_padded_str(buf: &mut Bytes) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MalformedPacket("unterminated OSC string".into()))?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::MalformedPacket("non-utf8 OSC string".into()))?
        .to_string();
    let padded = pad4(end + 1);
    if buf.len() < padded {
        return Err(Error::MalformedPacket("truncated OSC string padding".into()));
    }
    buf.advance(padded);
    Ok(s)
}

/// Encode a message into the standard OSC binary layout
pub fn encode_message(msg: &OscMessage) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    put_padded_str(&mut buf, &msg.address);

    let mut tags = String::with_capacity(msg.args.len() + 1);
    tags.push(',');
    for arg in &msg.args {
        tags.push(arg.type_tag() as char);
    }
    put_padded_str(&mut buf, &tags);

    for arg in &msg.args {
        match arg {
            OscArg::Int32(v) => buf.put_i32(*v),
            OscArg::Int64(v) => buf.put_i64(*v),
            OscArg::Float(v) => buf.put_f32(*v),
            OscArg::String(v) => put_padded_str(&mut buf, v),
        }
    }
    buf.freeze()
}

fn parse_message(mut buf: Bytes) -> Result<OscMessage> {
    let address = read_padded_str(&mut buf)?;
    let tags = read_padded_str(&mut buf)?;
    let tags = tags
        .strip_prefix(',')
        .ok_or_else(|| Error::MalformedPacket("missing OSC type tag prefix".into()))?;

    let mut msg = OscMessage::new(address);
    for tag in tags.bytes() {
        match tag {
            b'i' => {
                if buf.remaining() < 4 {
                    return Err(Error::MalformedPacket("truncated i32 argument".into()));
                }
                msg.push(OscArg::Int32(buf.get_i32()));
            }
            b'h' => {
                if buf.remaining() < 8 {
                    return Err(Error::MalformedPacket("truncated i64 argument".into()));
                }
                msg.push(OscArg::Int64(buf.get_i64()));
            }
            b'f' => {
                if buf.remaining() < 4 {
                    return Err(Error::MalformedPacket("truncated f32 argument".into()));
                }
                msg.push(OscArg::Float(buf.get_f32()));
            }
            b's' => {
                msg.push(OscArg::String(read_padded_str(&mut buf)?));
            }
            other => {
                return Err(Error::MalformedPacket(format!(
                    "unsupported OSC type tag '{}'",
                    other as char
                )));
            }
        }
    }
    Ok(msg)
}

/// Deepest bundle nesting accepted before a packet is rejected as
/// malformed. Control traffic in practice nests one or two levels; the cap
/// keeps a crafted packet from exhausting the stack.
const MAX_BUNDLE_DEPTH: usize = 16;

/// Parse an OSC packet (message or bundle), flattening bundles into a
/// single message.
///
/// Bundle flattening appends every contained message's arguments in bundle
/// order; the flattened message carries the address of the last message.
/// Nested bundles flatten recursively, down to [`MAX_BUNDLE_DEPTH`].
fn parse_packet(buf: Bytes) -> Result<OscMessage> {
    parse_packet_at(buf, 0)
}

fn parse_packet_at(buf: Bytes, depth: usize) -> Result<OscMessage> {
    if buf.starts_with(b"#bundle\0") {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(Error::MalformedPacket("bundle nested too deeply".into()));
        }
        let mut cursor = buf.slice(8..);
        if cursor.remaining() < 8 {
            return Err(Error::MalformedPacket("truncated bundle timetag".into()));
        }
        cursor.advance(8); // timetag, unused

        let mut flat = OscMessage::default();
        while cursor.has_remaining() {
            if cursor.remaining() < 4 {
                return Err(Error::MalformedPacket("truncated bundle element size".into()));
            }
            let size = cursor.get_u32() as usize;
            if cursor.remaining() < size {
                return Err(Error::MalformedPacket("truncated bundle element".into()));
            }
            let element = cursor.slice(..size);
            cursor.advance(size);

            let inner = parse_packet_at(element, depth + 1)?;
            flat.address = inner.address;
            flat.args.extend(inner.args);
        }
        Ok(flat)
    } else {
        parse_message(buf)
    }
}

/// Decode a snappy-compressed OSC payload into a message.
///
/// Corrupt compression framing or a malformed OSC body yields the empty
/// message; decode problems are logged, not propagated.
pub fn decode_payload(payload: &[u8]) -> OscMessage {
    let raw = match snap::raw::Decoder::new().decompress_vec(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("dropping undecodable OSC payload: {}", e);
            return OscMessage::default();
        }
    };
    match parse_packet(Bytes::from(raw)) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("dropping malformed OSC packet: {}", e);
            OscMessage::default()
        }
    }
}

/// Encode a message and compress it for the wire
pub fn encode_payload(msg: &OscMessage) -> Bytes {
    let raw = encode_message(msg);
    Bytes::from(snap::raw::Encoder::new().compress_vec(&raw).unwrap_or_default())
}
