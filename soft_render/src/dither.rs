//! Ordered (Bayer) dithering helpers.
//!
//! Fragment shaders can run their channels through these before the store
//! when rendering into low-bit-depth targets such as RGB332 or RGB565.
//! Each function maps a normalized channel to a normalized channel; the
//! threshold pattern repeats every 2, 4, or 8 pixels.

/// 1-bit threshold against the 2x2 Bayer matrix.
pub fn bayer_2x2(color: f32, x: u32, y: u32) -> f32 {
    const MATRIX: [f32; 4] = [
        0.0, 2.0, //
        3.0, 1.0,
    ];
    let threshold = MATRIX[(x % 2 + (y % 2) * 2) as usize] / 4.0;
    if threshold >= color {
        1.0
    } else {
        0.0
    }
}

/// 1-bit threshold against the 4x4 Bayer matrix.
pub fn bayer_4x4(color: f32, x: u32, y: u32) -> f32 {
    const MATRIX: [f32; 16] = [
        0.0, 8.0, 2.0, 10.0, //
        12.0, 4.0, 14.0, 6.0, //
        3.0, 11.0, 1.0, 9.0, //
        15.0, 7.0, 13.0, 5.0,
    ];
    let threshold = MATRIX[(x % 4 + (y % 4) * 4) as usize] / 16.0;
    if threshold >= color {
        1.0
    } else {
        0.0
    }
}

/// 1-bit threshold against the 8x8 Bayer matrix.
pub fn bayer_8x8(color: f32, x: u32, y: u32) -> f32 {
    const MATRIX: [f32; 64] = [
        0.0, 32.0, 8.0, 40.0, 2.0, 34.0, 10.0, 42.0, //
        48.0, 16.0, 56.0, 24.0, 50.0, 18.0, 58.0, 26.0, //
        12.0, 44.0, 4.0, 36.0, 14.0, 46.0, 6.0, 38.0, //
        60.0, 28.0, 52.0, 20.0, 62.0, 30.0, 54.0, 22.0, //
        3.0, 35.0, 11.0, 43.0, 1.0, 33.0, 9.0, 41.0, //
        51.0, 19.0, 59.0, 27.0, 49.0, 17.0, 57.0, 25.0, //
        15.0, 47.0, 7.0, 39.0, 13.0, 45.0, 5.0, 37.0, //
        63.0, 31.0, 55.0, 23.0, 61.0, 29.0, 53.0, 21.0,
    ];
    let threshold = MATRIX[(x % 8 + (y % 8) * 8) as usize] / 64.0;
    if threshold >= color {
        1.0
    } else {
        0.0
    }
}

fn dither(c: f32, bits: u32, bayer: f32) -> f32 {
    if bits <= 1 {
        return 1.0 - bayer;
    }
    let levels = ((1u32 << bits) - 1) as f32;
    ((c * levels + bayer) / levels).clamp(0.0, 1.0)
}

/// Dither `c` for a `bits`-deep channel with the 2x2 pattern.
pub fn dither_2x2(c: f32, bits: u32, x: u32, y: u32) -> f32 {
    dither(c, bits, bayer_2x2(c, x, y))
}

/// Dither `c` for a `bits`-deep channel with the 4x4 pattern.
pub fn dither_4x4(c: f32, bits: u32, x: u32, y: u32) -> f32 {
    dither(c, bits, bayer_4x4(c, x, y))
}

/// Dither `c` for a `bits`-deep channel with the 8x8 pattern.
pub fn dither_8x8(c: f32, bits: u32, x: u32, y: u32) -> f32 {
    dither(c, bits, bayer_8x8(c, x, y))
}
