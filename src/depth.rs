//! Depth codecs: the depth-to-color ramp and the keyframe/delta 16-bit codec
//!
//! Two ways of moving depth over a video wire:
//!
//! - [`DepthColorLut`] remaps each 16-bit depth value onto an HSB color ramp
//!   so the result survives a lossy video encoder. The inverse recovers an
//!   approximation by averaging three independent readings of the ramp. The
//!   red and green channels are swapped on the wire; both directions must
//!   agree on the swap for the ramp to invert.
//! - [`DepthDeltaCodec`] sends raw 16-bit depth as a resident keyframe plus
//!   per-frame deltas, with the zero-plane calibration pair carried on every
//!   keyframe so a point-cloud consumer can undistort.
//!
//! The LUT is an owned object built per channel; nothing here is process
//! global.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Default number of representable depth values (14-bit sensors)
pub const DEFAULT_MAX_DEPTH: u16 = 16_384;

fn hsb_to_rgb(h: f32, s: f32, b: f32) -> [f32; 3] {
    if s <= 0.0 {
        return [b, b, b];
    }
    let h = (h - h.floor()) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = b * (1.0 - s);
    let q = b * (1.0 - s * f);
    let t = b * (1.0 - s * (1.0 - f));
    match i as u32 {
        0 => [b, t, p],
        1 => [q, b, p],
        2 => [p, b, t],
        3 => [p, q, b],
        4 => [t, p, b],
        _ => [b, p, q],
    }
}

fn rgb_to_hsb(r: f32, g: f32, b: f32) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let brightness = max;
    if delta <= 0.0 {
        return [0.0, 0.0, brightness];
    }
    let saturation = delta / max;
    let hue = if max == r {
        (g - b) / delta
    } else if max == g {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    let hue = hue / 6.0;
    let hue = if hue < 0.0 { hue + 1.0 } else { hue };
    [hue, saturation, brightness]
}

/// Owned lookup table mapping 16-bit depth to an RGB color ramp
pub struct DepthColorLut {
    max_depth: u16,
    table: Vec<[u8; 3]>,
}

impl DepthColorLut {
    /// Build the table for the given depth range. Deterministic for a
    /// given `max_depth`.
    pub fn new(max_depth: u16) -> Self {
        let max = f32::from(max_depth);
        let mut table = Vec::with_capacity(max_depth as usize);
        for d in 0..max_depth {
            let p = f32::from(d) / max;
            let [r, g, b] = hsb_to_rgb(p, 1.0 - p, 1.0 - p);
            // R and G swap places on the wire
            table.push([
                (g * 255.0).round() as u8,
                (r * 255.0).round() as u8,
                (b * 255.0).round() as u8,
            ]);
        }
        Self { max_depth, table }
    }

    /// Depth range this table covers
    pub fn max_depth(&self) -> u16 {
        self.max_depth
    }

    /// Color for one depth value. Values at or beyond `max_depth` clamp to
    /// the last table entry.
    pub fn color_for(&self, depth: u16) -> [u8; 3] {
        let idx = (depth as usize).min(self.table.len() - 1);
        self.table[idx]
    }

    /// Remap a depth frame into an RGB frame. `rgb` must hold
    /// `depth.len() * 3` bytes.
    pub fn depth_to_color(&self, depth: &[u16], rgb: &mut [u8]) {
        debug_assert_eq!(rgb.len(), depth.len() * 3);
        for (d, px) in depth.iter().zip(rgb.chunks_exact_mut(3)) {
            let c = self.color_for(*d);
            px.copy_from_slice(&c);
        }
    }

    /// Recover one depth value from a wire color.
    ///
    /// The channels are unswapped, converted back to HSB, and the hue,
    /// saturation, and brightness readings of the ramp are averaged. This
    /// inverse is lossy by construction.
    pub fn depth_from_color(&self, color: [u8; 3]) -> u16 {
        let max = f32::from(self.max_depth);
        // Undo the wire swap
        let r = f32::from(color[1]) / 255.0;
        let g = f32::from(color[0]) / 255.0;
        let b = f32::from(color[2]) / 255.0;
        let [h, s, v] = rgb_to_hsb(r, g, b);
        let d = (h * max + (1.0 - v) * max + (1.0 - s) * max) / 3.0;
        (d.round() as u32).min(u32::from(self.max_depth) - 1) as u16
    }

    /// Remap an RGB frame back into depth. `depth` must hold
    /// `rgb.len() / 3` values.
    pub fn color_to_depth(&self, rgb: &[u8], depth: &mut [u16]) {
        debug_assert_eq!(rgb.len(), depth.len() * 3);
        for (px, d) in rgb.chunks_exact(3).zip(depth.iter_mut()) {
            *d = self.depth_from_color([px[0], px[1], px[2]]);
        }
    }
}

/// Zero-plane calibration for a depth sensor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthCalibration {
    /// Pixel size at the zero plane, in millimeters
    pub zero_plane_pixel_size: f32,
    /// Distance of the zero plane from the sensor, in millimeters
    pub zero_plane_distance: f32,
}

const FLAG_KEYFRAME: u8 = 0x01;

/// Keyframe/delta codec for raw 16-bit depth frames
///
/// The encoder keeps the last keyframe resident and emits per-pixel wrapping
/// differences against it; the decoder reconstructs with a wrapping add, so
/// reconstruction is exact. A frame flagged as a keyframe replaces the
/// baseline on both sides and carries the calibration pair in its header.
pub struct DepthDeltaCodec {
    keyframe: Option<Vec<u16>>,
    calibration: DepthCalibration,
}

impl DepthDeltaCodec {
    /// New codec with no resident keyframe
    pub fn new(calibration: DepthCalibration) -> Self {
        Self { keyframe: None, calibration }
    }

    /// Calibration last seen (encoder: as configured; decoder: from the
    /// most recent keyframe header)
    pub fn calibration(&self) -> DepthCalibration {
        self.calibration
    }

    /// Encode one frame. `keyframe` forces a baseline replacement; the
    /// first frame is always encoded as a keyframe.
    pub fn encode(&mut self, pixels: &[u16], keyframe: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + pixels.len() * 2 + 8);
        match self.keyframe.as_ref() {
            Some(key) if !keyframe => {
                buf.put_u8(0);
                for (p, k) in pixels.iter().zip(key.iter()) {
                    buf.put_u16(p.wrapping_sub(*k));
                }
            }
            _ => {
                buf.put_u8(FLAG_KEYFRAME);
                buf.put_f32(self.calibration.zero_plane_pixel_size);
                buf.put_f32(self.calibration.zero_plane_distance);
                for &p in pixels {
                    buf.put_u16(p);
                }
                self.keyframe = Some(pixels.to_vec());
            }
        }
        buf.freeze()
    }

    /// Decode one frame into `out`. Delta frames before any keyframe are
    /// rejected; the caller logs and drops them.
    pub fn decode(&mut self, mut payload: Bytes, out: &mut [u16]) -> Result<()> {
        if payload.remaining() < 1 {
            return Err(Error::MalformedPacket("empty depth payload".into()));
        }
        let flags = payload.get_u8();
        if flags & FLAG_KEYFRAME != 0 {
            if payload.remaining() < 8 {
                return Err(Error::MalformedPacket("truncated depth calibration".into()));
            }
            self.calibration.zero_plane_pixel_size = payload.get_f32();
            self.calibration.zero_plane_distance = payload.get_f32();
            if payload.remaining() != out.len() * 2 {
                return Err(Error::MalformedPacket("depth keyframe size mismatch".into()));
            }
            for px in out.iter_mut() {
                *px = payload.get_u16();
            }
            self.keyframe = Some(out.to_vec());
        } else {
            let key = self
                .keyframe
                .as_ref()
                .ok_or_else(|| Error::MalformedPacket("delta frame before keyframe".into()))?;
            if payload.remaining() != out.len() * 2 {
                return Err(Error::MalformedPacket("depth delta size mismatch".into()));
            }
            for (px, k) in out.iter_mut().zip(key.iter()) {
                *px = k.wrapping_add(payload.get_u16());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_is_deterministic() {
        let a = DepthColorLut::new(DEFAULT_MAX_DEPTH);
        let b = DepthColorLut::new(DEFAULT_MAX_DEPTH);
        for d in (0..DEFAULT_MAX_DEPTH).step_by(127) {
            assert_eq!(a.color_for(d), b.color_for(d));
        }
    }

    #[test]
    fn test_round_trip_error_is_bounded() {
        let lut = DepthColorLut::new(DEFAULT_MAX_DEPTH);
        // Three quantized readings averaged back. Near the far end of the
        // ramp saturation and brightness both approach zero, the 8-bit
        // channels collapse and the hue reading degrades, so the bound is
        // tight over the working range and loose at the extreme.
        let max = i32::from(DEFAULT_MAX_DEPTH);
        let tight = max / 50;
        let working = (DEFAULT_MAX_DEPTH as u32 * 3 / 4) as u16;
        for d in (0..working).step_by(61) {
            let back = lut.depth_from_color(lut.color_for(d));
            let err = (i32::from(back) - i32::from(d)).abs();
            assert!(err <= tight, "depth {} -> {} (err {})", d, back, err);
        }
        for d in (working..DEFAULT_MAX_DEPTH).step_by(61) {
            let back = lut.depth_from_color(lut.color_for(d));
            let err = (i32::from(back) - i32::from(d)).abs();
            assert!(err <= max / 2, "depth {} -> {} (err {})", d, back, err);
        }
    }

    #[test]
    fn test_out_of_range_depth_clamps() {
        let lut = DepthColorLut::new(1024);
        assert_eq!(lut.color_for(5000), lut.color_for(1023));
    }

    #[test]
    fn test_frame_remap_shapes() {
        let lut = DepthColorLut::new(1024);
        let depth = vec![0u16, 100, 500, 700];
        let mut rgb = vec![0u8; depth.len() * 3];
        lut.depth_to_color(&depth, &mut rgb);

        let mut back = vec![0u16; depth.len()];
        lut.color_to_depth(&rgb, &mut back);
        for (a, b) in depth.iter().zip(back.iter()) {
            assert!((i32::from(*a) - i32::from(*b)).abs() <= 16);
        }
    }

    #[test]
    fn test_delta_codec_reconstructs_exactly() {
        let cal = DepthCalibration { zero_plane_pixel_size: 0.1042, zero_plane_distance: 120.0 };
        let mut enc = DepthDeltaCodec::new(cal);
        let mut dec = DepthDeltaCodec::new(DepthCalibration::default());

        let key = vec![100u16, 200, 65_500, 0];
        let next = vec![101u16, 150, 10, 65_535];

        let mut out = vec![0u16; 4];
        dec.decode(enc.encode(&key, true), &mut out).unwrap();
        assert_eq!(out, key);
        assert_eq!(dec.calibration(), cal);

        dec.decode(enc.encode(&next, false), &mut out).unwrap();
        assert_eq!(out, next);
    }

    #[test]
    fn test_keyframe_replaces_baseline() {
        let mut enc = DepthDeltaCodec::new(DepthCalibration::default());
        let mut dec = DepthDeltaCodec::new(DepthCalibration::default());
        let mut out = vec![0u16; 2];

        dec.decode(enc.encode(&[10, 10], true), &mut out).unwrap();
        dec.decode(enc.encode(&[5000, 5000], true), &mut out).unwrap();
        dec.decode(enc.encode(&[5001, 4999], false), &mut out).unwrap();
        assert_eq!(out, vec![5001, 4999]);
    }

    #[test]
    fn test_delta_before_keyframe_is_rejected() {
        let mut enc = DepthDeltaCodec::new(DepthCalibration::default());
        enc.encode(&[1, 2], true);
        let delta = enc.encode(&[2, 3], false);

        let mut fresh = DepthDeltaCodec::new(DepthCalibration::default());
        let mut out = vec![0u16; 2];
        assert!(fresh.decode(delta, &mut out).is_err());
    }
}
