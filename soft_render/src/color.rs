//! Pixel formats and the codecs between them.
//!
//! Every format is identified by a [`ColorFormat`] tag. Uncompressed formats
//! are `{R, RG, RGB, RGBA}` over `{u8, u16, u32, u64, f32, f64}` channels;
//! the packed formats carry their bit layout in the variant name, most
//! significant bits first. Conversions go through [`TexelValue`], which keeps
//! integer data wide enough to rescale without rounding twice.

use glam::{Vec3, Vec4};

/// Format tag for texels stored in textures and framebuffer attachments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    R16,
    Rg16,
    Rgb16,
    Rgba16,
    R32,
    Rg32,
    Rgb32,
    Rgba32,
    R64,
    Rg64,
    Rgb64,
    Rgba64,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    R64Float,
    Rg64Float,
    Rgb64Float,
    Rgba64Float,
    /// R:3 G:3 B:2
    Rgb332,
    /// R:5 G:6 B:5
    Rgb565,
    /// R:5 G:5 B:5 A:1
    Rgba5551,
    /// R:4 G:4 B:4 A:4
    Rgba4444,
    /// R:10 G:10 B:10 A:2
    Rgb10A2,
    /// R:9 G:9 B:9 E:5 shared-exponent float
    Rgb9E5,
}

impl ColorFormat {
    pub const fn bytes_per_texel(&self) -> usize {
        match self {
            Self::R8 | Self::Rgb332 => 1,
            Self::Rg8 | Self::R16 | Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Rg16 | Self::R32 | Self::R32Float | Self::Rgb10A2 | Self::Rgb9E5 => 4,
            Self::Rgb16 => 6,
            Self::Rgba16 | Self::Rg32 | Self::Rg32Float | Self::R64 | Self::R64Float => 8,
            Self::Rgb32 | Self::Rgb32Float => 12,
            Self::Rgba32 | Self::Rgba32Float | Self::Rg64 | Self::Rg64Float => 16,
            Self::Rgb64 | Self::Rgb64Float => 24,
            Self::Rgba64 | Self::Rgba64Float => 32,
        }
    }

    pub const fn channels(&self) -> usize {
        match self {
            Self::R8 | Self::R16 | Self::R32 | Self::R64 | Self::R32Float | Self::R64Float => 1,
            Self::Rg8 | Self::Rg16 | Self::Rg32 | Self::Rg64 | Self::Rg32Float | Self::Rg64Float => 2,
            Self::Rgb8
            | Self::Rgb16
            | Self::Rgb32
            | Self::Rgb64
            | Self::Rgb32Float
            | Self::Rgb64Float
            | Self::Rgb332
            | Self::Rgb565
            | Self::Rgb9E5 => 3,
            Self::Rgba8
            | Self::Rgba16
            | Self::Rgba32
            | Self::Rgba64
            | Self::Rgba32Float
            | Self::Rgba64Float
            | Self::Rgba5551
            | Self::Rgba4444
            | Self::Rgb10A2 => 4,
        }
    }

    /// True for formats whose channels carry raw floating-point values.
    pub const fn is_float(&self) -> bool {
        matches!(
            self,
            Self::R32Float
                | Self::Rg32Float
                | Self::Rgb32Float
                | Self::Rgba32Float
                | Self::R64Float
                | Self::Rg64Float
                | Self::Rgb64Float
                | Self::Rgba64Float
                | Self::Rgb9E5
        )
    }

    pub const fn is_packed(&self) -> bool {
        matches!(
            self,
            Self::Rgb332 | Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 | Self::Rgb10A2 | Self::Rgb9E5
        )
    }

    /// Per-channel maximum for integer formats. Absent channels report 1 so
    /// that rescaling them is the identity.
    pub const fn channel_max(&self) -> [u64; 4] {
        match self {
            Self::R8 => [u8::MAX as u64, 1, 1, 1],
            Self::Rg8 => [u8::MAX as u64, u8::MAX as u64, 1, 1],
            Self::Rgb8 => [u8::MAX as u64, u8::MAX as u64, u8::MAX as u64, 1],
            Self::Rgba8 => [u8::MAX as u64; 4],
            Self::R16 => [u16::MAX as u64, 1, 1, 1],
            Self::Rg16 => [u16::MAX as u64, u16::MAX as u64, 1, 1],
            Self::Rgb16 => [u16::MAX as u64, u16::MAX as u64, u16::MAX as u64, 1],
            Self::Rgba16 => [u16::MAX as u64; 4],
            Self::R32 => [u32::MAX as u64, 1, 1, 1],
            Self::Rg32 => [u32::MAX as u64, u32::MAX as u64, 1, 1],
            Self::Rgb32 => [u32::MAX as u64, u32::MAX as u64, u32::MAX as u64, 1],
            Self::Rgba32 => [u32::MAX as u64; 4],
            Self::R64 => [u64::MAX, 1, 1, 1],
            Self::Rg64 => [u64::MAX, u64::MAX, 1, 1],
            Self::Rgb64 => [u64::MAX, u64::MAX, u64::MAX, 1],
            Self::Rgba64 => [u64::MAX; 4],
            Self::Rgb332 => [7, 7, 3, 1],
            Self::Rgb565 => [31, 63, 31, 1],
            Self::Rgba5551 => [31, 31, 31, 1],
            Self::Rgba4444 => [15, 15, 15, 15],
            Self::Rgb10A2 => [1023, 1023, 1023, 3],
            _ => [1; 4],
        }
    }
}

/// A texel widened to a lossless intermediate representation.
///
/// Integer channels keep their value together with the source channel
/// maximum so a later rescale can use exact integer arithmetic.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TexelValue {
    Uint { value: [u64; 4], max: [u64; 4] },
    Float([f64; 4]),
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_ne_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    u64::from_ne_bytes(b)
}

/// Rescale an integer channel between ranges.
///
/// Widening multiplies by `dst_max / src_max`, narrowing divides by
/// `src_max / dst_max`; both ratios use truncating integer division so
/// round-trips through a wider range are lossless.
pub const fn rescale_channel(value: u64, src_max: u64, dst_max: u64) -> u64 {
    if src_max == dst_max {
        value
    } else if dst_max > src_max {
        value * (dst_max / src_max)
    } else {
        value / (src_max / dst_max)
    }
}

/// `floor(v * max + 0.5)`, saturated to `[0, max]`.
pub fn quantize_channel(v: f64, max: u64) -> u64 {
    let scaled = (v * max as f64 + 0.5).floor();
    if scaled <= 0.0 {
        0
    } else if scaled >= max as f64 {
        max
    } else {
        scaled as u64
    }
}

/// Decode one texel into its widened representation.
pub fn read_texel(format: ColorFormat, bytes: &[u8]) -> TexelValue {
    use ColorFormat::*;

    let max = format.channel_max();
    let uint = |value: [u64; 4]| TexelValue::Uint { value, max };

    match format {
        R8 => uint([bytes[0] as u64, 0, 0, 1]),
        Rg8 => uint([bytes[0] as u64, bytes[1] as u64, 0, 1]),
        Rgb8 => uint([bytes[0] as u64, bytes[1] as u64, bytes[2] as u64, 1]),
        Rgba8 => uint([bytes[0] as u64, bytes[1] as u64, bytes[2] as u64, bytes[3] as u64]),
        R16 => uint([read_u16(bytes) as u64, 0, 0, 1]),
        Rg16 => uint([read_u16(bytes) as u64, read_u16(&bytes[2..]) as u64, 0, 1]),
        Rgb16 => uint([
            read_u16(bytes) as u64,
            read_u16(&bytes[2..]) as u64,
            read_u16(&bytes[4..]) as u64,
            1,
        ]),
        Rgba16 => uint([
            read_u16(bytes) as u64,
            read_u16(&bytes[2..]) as u64,
            read_u16(&bytes[4..]) as u64,
            read_u16(&bytes[6..]) as u64,
        ]),
        R32 => uint([read_u32(bytes) as u64, 0, 0, 1]),
        Rg32 => uint([read_u32(bytes) as u64, read_u32(&bytes[4..]) as u64, 0, 1]),
        Rgb32 => uint([
            read_u32(bytes) as u64,
            read_u32(&bytes[4..]) as u64,
            read_u32(&bytes[8..]) as u64,
            1,
        ]),
        Rgba32 => uint([
            read_u32(bytes) as u64,
            read_u32(&bytes[4..]) as u64,
            read_u32(&bytes[8..]) as u64,
            read_u32(&bytes[12..]) as u64,
        ]),
        R64 => uint([read_u64(bytes), 0, 0, 1]),
        Rg64 => uint([read_u64(bytes), read_u64(&bytes[8..]), 0, 1]),
        Rgb64 => uint([read_u64(bytes), read_u64(&bytes[8..]), read_u64(&bytes[16..]), 1]),
        Rgba64 => uint([
            read_u64(bytes),
            read_u64(&bytes[8..]),
            read_u64(&bytes[16..]),
            read_u64(&bytes[24..]),
        ]),
        R32Float => TexelValue::Float([f32::from_bits(read_u32(bytes)) as f64, 0.0, 0.0, 1.0]),
        Rg32Float => TexelValue::Float([
            f32::from_bits(read_u32(bytes)) as f64,
            f32::from_bits(read_u32(&bytes[4..])) as f64,
            0.0,
            1.0,
        ]),
        Rgb32Float => TexelValue::Float([
            f32::from_bits(read_u32(bytes)) as f64,
            f32::from_bits(read_u32(&bytes[4..])) as f64,
            f32::from_bits(read_u32(&bytes[8..])) as f64,
            1.0,
        ]),
        Rgba32Float => TexelValue::Float([
            f32::from_bits(read_u32(bytes)) as f64,
            f32::from_bits(read_u32(&bytes[4..])) as f64,
            f32::from_bits(read_u32(&bytes[8..])) as f64,
            f32::from_bits(read_u32(&bytes[12..])) as f64,
        ]),
        R64Float => TexelValue::Float([f64::from_bits(read_u64(bytes)), 0.0, 0.0, 1.0]),
        Rg64Float => TexelValue::Float([
            f64::from_bits(read_u64(bytes)),
            f64::from_bits(read_u64(&bytes[8..])),
            0.0,
            1.0,
        ]),
        Rgb64Float => TexelValue::Float([
            f64::from_bits(read_u64(bytes)),
            f64::from_bits(read_u64(&bytes[8..])),
            f64::from_bits(read_u64(&bytes[16..])),
            1.0,
        ]),
        Rgba64Float => TexelValue::Float([
            f64::from_bits(read_u64(bytes)),
            f64::from_bits(read_u64(&bytes[8..])),
            f64::from_bits(read_u64(&bytes[16..])),
            f64::from_bits(read_u64(&bytes[24..])),
        ]),
        Rgb332 => {
            let v = bytes[0];
            uint([(v >> 5) as u64, ((v >> 2) & 0x7) as u64, (v & 0x3) as u64, 1])
        }
        Rgb565 => {
            let v = read_u16(bytes);
            uint([(v >> 11) as u64, ((v >> 5) & 0x3f) as u64, (v & 0x1f) as u64, 1])
        }
        Rgba5551 => {
            let v = read_u16(bytes);
            uint([
                (v >> 11) as u64,
                ((v >> 6) & 0x1f) as u64,
                ((v >> 1) & 0x1f) as u64,
                (v & 0x1) as u64,
            ])
        }
        Rgba4444 => {
            let v = read_u16(bytes);
            uint([
                (v >> 12) as u64,
                ((v >> 8) & 0xf) as u64,
                ((v >> 4) & 0xf) as u64,
                (v & 0xf) as u64,
            ])
        }
        Rgb10A2 => {
            let v = read_u32(bytes);
            uint([
                (v >> 22) as u64,
                ((v >> 12) & 0x3ff) as u64,
                ((v >> 2) & 0x3ff) as u64,
                (v & 0x3) as u64,
            ])
        }
        Rgb9E5 => {
            let rgb = unpack_rgb9e5(read_u32(bytes));
            TexelValue::Float([rgb.x as f64, rgb.y as f64, rgb.z as f64, 1.0])
        }
    }
}

/// Encode a widened texel into `out`, rescaling or quantizing as needed.
pub fn write_texel(format: ColorFormat, texel: TexelValue, out: &mut [u8]) {
    let dst_max = format.channel_max();

    if format.is_float() {
        let f = match texel {
            TexelValue::Float(f) => f,
            TexelValue::Uint { value, max } => {
                let mut f = [0.0f64; 4];
                for i in 0..4 {
                    f[i] = value[i] as f64 / max[i] as f64;
                }
                f
            }
        };
        write_float_channels(format, f, out);
        return;
    }

    let ch = match texel {
        TexelValue::Uint { value, max } => {
            let mut ch = [0u64; 4];
            for i in 0..4 {
                ch[i] = rescale_channel(value[i], max[i], dst_max[i]);
            }
            ch
        }
        TexelValue::Float(f) => {
            let mut ch = [0u64; 4];
            for i in 0..4 {
                ch[i] = quantize_channel(f[i], dst_max[i]);
            }
            ch
        }
    };
    write_uint_channels(format, ch, out);
}

fn write_float_channels(format: ColorFormat, f: [f64; 4], out: &mut [u8]) {
    use ColorFormat::*;

    match format {
        R32Float | Rg32Float | Rgb32Float | Rgba32Float => {
            for i in 0..format.channels() {
                out[i * 4..i * 4 + 4].copy_from_slice(&(f[i] as f32).to_ne_bytes());
            }
        }
        R64Float | Rg64Float | Rgb64Float | Rgba64Float => {
            for i in 0..format.channels() {
                out[i * 8..i * 8 + 8].copy_from_slice(&f[i].to_ne_bytes());
            }
        }
        Rgb9E5 => {
            let packed = pack_rgb9e5(Vec3::new(f[0] as f32, f[1] as f32, f[2] as f32));
            out[..4].copy_from_slice(&packed.to_ne_bytes());
        }
        _ => unreachable!("integer format in float path"),
    }
}

fn write_uint_channels(format: ColorFormat, ch: [u64; 4], out: &mut [u8]) {
    use ColorFormat::*;

    match format {
        R8 | Rg8 | Rgb8 | Rgba8 => {
            for i in 0..format.channels() {
                out[i] = ch[i] as u8;
            }
        }
        R16 | Rg16 | Rgb16 | Rgba16 => {
            for i in 0..format.channels() {
                out[i * 2..i * 2 + 2].copy_from_slice(&(ch[i] as u16).to_ne_bytes());
            }
        }
        R32 | Rg32 | Rgb32 | Rgba32 => {
            for i in 0..format.channels() {
                out[i * 4..i * 4 + 4].copy_from_slice(&(ch[i] as u32).to_ne_bytes());
            }
        }
        R64 | Rg64 | Rgb64 | Rgba64 => {
            for i in 0..format.channels() {
                out[i * 8..i * 8 + 8].copy_from_slice(&ch[i].to_ne_bytes());
            }
        }
        Rgb332 => out[0] = ((ch[0] as u8) << 5) | ((ch[1] as u8) << 2) | ch[2] as u8,
        Rgb565 => {
            let v = ((ch[0] as u16) << 11) | ((ch[1] as u16) << 5) | ch[2] as u16;
            out[..2].copy_from_slice(&v.to_ne_bytes());
        }
        Rgba5551 => {
            let v = ((ch[0] as u16) << 11) | ((ch[1] as u16) << 6) | ((ch[2] as u16) << 1) | ch[3] as u16;
            out[..2].copy_from_slice(&v.to_ne_bytes());
        }
        Rgba4444 => {
            let v = ((ch[0] as u16) << 12) | ((ch[1] as u16) << 8) | ((ch[2] as u16) << 4) | ch[3] as u16;
            out[..2].copy_from_slice(&v.to_ne_bytes());
        }
        Rgb10A2 => {
            let v = ((ch[0] as u32) << 22) | ((ch[1] as u32) << 12) | ((ch[2] as u32) << 2) | ch[3] as u32;
            out[..4].copy_from_slice(&v.to_ne_bytes());
        }
        _ => unreachable!("float format in integer path"),
    }
}

/// Convert one texel between two formats.
pub fn convert_texel(src: ColorFormat, bytes: &[u8], dst: ColorFormat, out: &mut [u8]) {
    write_texel(dst, read_texel(src, bytes), out);
}

/// Decode a texel to a normalized RGBA vector.
///
/// Integer channels map onto `[0, 1]`; float channels pass through.
pub fn load_vec4(format: ColorFormat, bytes: &[u8]) -> Vec4 {
    match read_texel(format, bytes) {
        TexelValue::Uint { value, max } => Vec4::new(
            (value[0] as f64 / max[0] as f64) as f32,
            (value[1] as f64 / max[1] as f64) as f32,
            (value[2] as f64 / max[2] as f64) as f32,
            (value[3] as f64 / max[3] as f64) as f32,
        ),
        TexelValue::Float(f) => Vec4::new(f[0] as f32, f[1] as f32, f[2] as f32, f[3] as f32),
    }
}

/// Encode a normalized RGBA vector into `out`.
pub fn store_vec4(format: ColorFormat, rgba: Vec4, out: &mut [u8]) {
    write_texel(
        format,
        TexelValue::Float([rgba.x as f64, rgba.y as f64, rgba.z as f64, rgba.w as f64]),
        out,
    );
}

/*-----------------------------------------------------------------------------
 * RGB9E5 shared-exponent packing
-----------------------------------------------------------------------------*/

pub const RGB9E5_MANTISSA_BITS: i32 = 9;
pub const RGB9E5_EXP_BIAS: i32 = 15;
pub const RGB9E5_MAX_VALID_BIASED_EXP: i32 = 31;

const RGB9E5_MANTISSA_VALUES: i32 = 1 << RGB9E5_MANTISSA_BITS;
const MAX_RGB9E5_MANTISSA: i32 = RGB9E5_MANTISSA_VALUES - 1;
const MAX_RGB9E5_EXP: i32 = RGB9E5_MAX_VALID_BIASED_EXP - RGB9E5_EXP_BIAS;

/// Largest representable shared-exponent value.
pub const MAX_RGB9E5: f32 =
    (MAX_RGB9E5_MANTISSA as f32 / RGB9E5_MANTISSA_VALUES as f32) * (1u32 << MAX_RGB9E5_EXP) as f32;

// Not correct for denormals and zero, but those are hidden by the max()
// against the minimum rgb9e5 exponent below.
fn floor_log2(x: f32) -> i32 {
    ((x.to_bits() >> 23) & 0xff) as i32 - 127
}

fn rgb9e5_clamp(x: f32) -> f32 {
    x.clamp(0.0, MAX_RGB9E5)
}

/// Pack a linear RGB triple into the 9-9-9-5 shared-exponent format.
///
/// Inputs are clamped to `[0, MAX_RGB9E5]` first, so the shared exponent
/// saturates rather than overflowing.
pub fn pack_rgb9e5(rgb: Vec3) -> u32 {
    let rc = rgb9e5_clamp(rgb.x);
    let gc = rgb9e5_clamp(rgb.y);
    let bc = rgb9e5_clamp(rgb.z);
    let maxrgb = rc.max(gc).max(bc);

    let mut exp_shared = (-RGB9E5_EXP_BIAS - 1).max(floor_log2(maxrgb)) + 1 + RGB9E5_EXP_BIAS;
    debug_assert!(exp_shared >= 0);
    debug_assert!(exp_shared <= RGB9E5_MAX_VALID_BIASED_EXP);

    let mut denom = ((exp_shared - RGB9E5_EXP_BIAS - RGB9E5_MANTISSA_BITS) as f32).exp2();

    let maxm = (maxrgb / denom + 0.5).floor() as i32;
    if maxm == MAX_RGB9E5_MANTISSA + 1 {
        denom *= 2.0;
        exp_shared += 1;
        debug_assert!(exp_shared <= RGB9E5_MAX_VALID_BIASED_EXP);
    } else {
        debug_assert!(maxm <= MAX_RGB9E5_MANTISSA);
    }

    let rm = (rc / denom + 0.5).floor() as u32;
    let gm = (gc / denom + 0.5).floor() as u32;
    let bm = (bc / denom + 0.5).floor() as u32;

    (rm << 23) | (gm << 14) | (bm << 5) | exp_shared as u32
}

/// Unpack a 9-9-9-5 shared-exponent value into linear RGB.
pub fn unpack_rgb9e5(v: u32) -> Vec3 {
    let exponent = (v & 0x1f) as i32 - RGB9E5_EXP_BIAS - RGB9E5_MANTISSA_BITS;
    let scale = (exponent as f32).exp2();

    Vec3::new(
        (v >> 23) as f32 * scale,
        ((v >> 14) & 0x1ff) as f32 * scale,
        ((v >> 5) & 0x1ff) as f32 * scale,
    )
}
