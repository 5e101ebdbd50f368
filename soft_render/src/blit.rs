//! Nearest-neighbor, format-converting blits.
//!
//! The source rectangle is mapped with 16.16 fixed-point stepping and a
//! vertical flip, so rendered framebuffers present upright into window
//! back buffers. Rows are interleaved across threads.

use glam::IVec4;

use crate::color;
use crate::texture::TextureView;

const FIXED_BITS: u32 = 16;

/// One blit dispatch: copy `src_rect` into `dst_rect`, converting formats
/// texel by texel.
pub(crate) struct BlitTask {
    pub src: TextureView,
    pub dst: TextureView,
    /// `(x0, y0, x1, y1)` in source texels.
    pub src_rect: IVec4,
    /// `(x0, y0, x1, y1)` in destination texels.
    pub dst_rect: IVec4,
    pub num_threads: usize,
}

impl BlitTask {
    pub fn run(&self, thread_id: usize) {
        let src_bpt = self.src.bytes_per_texel();
        let dst_bpt = self.dst.bytes_per_texel();
        let src_format = self.src.format();
        let dst_format = self.dst.format();

        let in_w = (self.src_rect.z - self.src_rect.x).max(0) as u64;
        let in_h = (self.src_rect.w - self.src_rect.y).max(0) as u64;
        let out_w = (self.dst_rect.z - self.dst_rect.x).max(0) as i64;
        if in_w == 0 || in_h == 0 || out_w == 0 {
            return;
        }

        let total_out_w = self.dst.width() as i64;
        let total_out_h = self.dst.height() as u64;

        // Map with the full destination extent; +1 absorbs the truncation
        // of the fixed-point division.
        let fout_w = ((in_w << FIXED_BITS) / total_out_w as u64) + 1;
        let fout_h = ((in_h << FIXED_BITS) / total_out_h) + 1;

        let x0 = self.dst_rect.x.max(0) as i64;
        let x1 = (x0 + out_w).min(total_out_w);
        let y0 = self.dst_rect.y.max(0) as u64;
        let y1 = (self.dst_rect.w.max(0) as u64).min(total_out_h);

        let mut y = y0 + thread_id as u64;
        while y < y1 {
            let yf = (y * fout_h) >> FIXED_BITS;
            // vertical flip: the top destination row samples the bottom of
            // the source rectangle
            let src_y = (self.src_rect.w as i64 - (self.src_rect.y as i64 + yf as i64) - 1)
                .clamp(0, self.src.height() as i64 - 1) as u16;

            for x in x0..x1 {
                let src_x = (((x as u64 * fout_w) >> FIXED_BITS) as i64)
                    .clamp(0, self.src.width() as i64 - 1) as u16;

                // SAFETY: coordinates are clamped in bounds; destination
                // rows are owned by this thread (`y % num_threads`).
                unsafe {
                    let src_bytes =
                        core::slice::from_raw_parts(self.src.texel_ptr(src_x, src_y), src_bpt);
                    let dst_bytes = core::slice::from_raw_parts_mut(
                        self.dst.texel_ptr(x as u16, y as u16),
                        dst_bpt,
                    );
                    color::convert_texel(src_format, src_bytes, dst_format, dst_bytes);
                }
            }

            y += self.num_threads as u64;
        }
    }
}
