//! Texel storage formats
//!
//! The passes compute in `f32` and round-trip every stored value through the
//! format of the texture it lands in, so reads see exactly what a GPU
//! attachment of that format would hold.

use glam::{Vec2, Vec3, Vec4};
use half::f16;

/// Luminance weights (Rec. 709)
pub const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(LUMA)
}

// ============================================================================
// R11G11B10 packed float
// ============================================================================

/// Pack an RGB colour into 11/11/10 unsigned floats.
///
/// Each channel is converted to half precision and its sign bit and low
/// mantissa bits are dropped: red lands in bits 31..21, green in 20..10 and
/// blue in 9..0. Negative channels clamp to zero.
pub fn pack_r11g11b10(rgb: Vec3) -> u32 {
    let bits = |v: f32| u32::from(f16::from_f32(v.max(0.0)).to_bits());
    let r = (bits(rgb.x) << 17) & 0xffe0_0000;
    let g = (bits(rgb.y) << 6) & 0x001f_fc00;
    let b = (bits(rgb.z) >> 5) & 0x0000_03ff;
    r | g | b
}

pub fn unpack_r11g11b10(packed: u32) -> Vec3 {
    let half = |bits: u32| f16::from_bits(bits as u16).to_f32();
    Vec3::new(
        half(((packed >> 21) & 0x7ff) << 4),
        half(((packed >> 10) & 0x7ff) << 4),
        half((packed & 0x3ff) << 5),
    )
}

/// The value an `R11F_G11F_B10F` texel holds after a write of `rgb`
#[inline]
pub fn quantize_r11g11b10(rgb: Vec3) -> Vec3 {
    unpack_r11g11b10(pack_r11g11b10(rgb))
}

/// Spacing between representable values around `x` for an unsigned small
/// float with 5 exponent bits and `mantissa_bits` mantissa bits
pub fn small_float_ulp(x: f32, mantissa_bits: i32) -> f32 {
    let x = x.abs().max(f32::from(f16::MIN_POSITIVE));
    let exponent = x.log2().floor() as i32;
    2.0_f32.powi(exponent - mantissa_bits)
}

// ============================================================================
// Half float (RGBA16F / RG16F)
// ============================================================================

#[inline]
pub fn quantize_f16(v: f32) -> f32 {
    f16::from_f32(v).to_f32()
}

#[inline]
pub fn quantize_rgba16f(v: Vec4) -> Vec4 {
    Vec4::new(
        quantize_f16(v.x),
        quantize_f16(v.y),
        quantize_f16(v.z),
        quantize_f16(v.w),
    )
}

#[inline]
pub fn quantize_rg16f(v: Vec2) -> Vec2 {
    Vec2::new(quantize_f16(v.x), quantize_f16(v.y))
}

// ============================================================================
// Unorm16 (distance field)
// ============================================================================

#[inline]
pub fn encode_unorm16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

#[inline]
pub fn decode_unorm16(v: u16) -> f32 {
    f32::from(v) / 65535.0
}

// ============================================================================
// Distance encoding (polar depth, distance field)
// ============================================================================

/// `1 - 1/(1+d)`: monotonic, 0 at the origin and approaching 1 at infinity
#[inline]
pub fn encode_distance(d: f32) -> f32 {
    1.0 - 1.0 / (1.0 + d)
}

/// Inverse of [`encode_distance`]; the cleared value 1.0 decodes to infinity
#[inline]
pub fn decode_distance(v: f32) -> f32 {
    if v >= 1.0 {
        f32::INFINITY
    } else {
        1.0 / (1.0 - v) - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r11g11b10_exact_values() {
        for c in [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.5, 0.25, 2.0),
            Vec3::ONE,
        ] {
            assert_eq!(quantize_r11g11b10(c), c);
        }
    }

    #[test]
    fn test_r11g11b10_channel_layout() {
        // 1.0 in half is 0x3c00; top 11 bits land in the red slot
        let packed = pack_r11g11b10(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(packed, 0x3c00 << 17);
        let packed = pack_r11g11b10(Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(packed, 0x3c00 >> 5);
    }

    #[test]
    fn test_r11g11b10_error_within_ulp() {
        let c = Vec3::new(0.3, 0.7, 0.11);
        let q = quantize_r11g11b10(c);
        assert!((q.x - c.x).abs() <= small_float_ulp(c.x, 6));
        assert!((q.y - c.y).abs() <= small_float_ulp(c.y, 6));
        assert!((q.z - c.z).abs() <= small_float_ulp(c.z, 5));
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        assert_eq!(quantize_r11g11b10(Vec3::new(-1.0, 0.5, -0.1)), Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_distance_encoding_round_trip() {
        for d in [0.0, 0.01, 0.5, 1.0, 10.0] {
            assert!((decode_distance(encode_distance(d)) - d).abs() < 1e-4);
        }
        assert!(decode_distance(1.0).is_infinite());
    }

    #[test]
    fn test_unorm16() {
        assert_eq!(encode_unorm16(1.5), 65535);
        assert_eq!(encode_unorm16(-1.0), 0);
        assert!((decode_unorm16(encode_unorm16(0.25)) - 0.25).abs() < 1e-5);
    }
}
