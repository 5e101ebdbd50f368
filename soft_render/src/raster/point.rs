//! Point rasterization: one fragment per bin.

use glam::Vec4;

use super::RasterContext;
use crate::shader::{FragCoord, FragmentParams, MAX_VARYING_VECTORS};

pub(super) fn rasterize(ctx: &RasterContext<'_>) {
    for &bin_id in ctx.bin_ids {
        let bin = &ctx.bins[bin_id as usize];
        let coord = bin.screen_coords[0];

        let x = coord.x as i32;
        let y = coord.y as i32;
        if !ctx.contains(x, y) || y.rem_euclid(ctx.num_threads) != ctx.thread_id {
            continue;
        }

        let frag = FragCoord {
            x: x as u16,
            y: y as u16,
            depth: coord.z,
        };

        // SAFETY: inside the render area and on a row this thread owns.
        let stored = unsafe { (ctx.fbo.depth_load)(&ctx.fbo.depth, frag.x, frag.y) };
        if !ctx.pipeline.depth_test().compare(frag.depth, stored) {
            continue;
        }

        let mut varyings = [Vec4::ZERO; MAX_VARYING_VECTORS];
        varyings.copy_from_slice(&bin.varyings[..MAX_VARYING_VECTORS]);

        let mut outputs = [Vec4::ZERO; crate::shader::MAX_RENDER_TARGETS];
        let mut params = FragmentParams {
            coord: frag,
            uniforms: ctx.uniforms,
            varyings: &varyings,
            outputs: &mut outputs,
        };
        if (ctx.fragment_fn)(&mut params) {
            ctx.commit_fragment(frag, &outputs);
        }
    }
}
