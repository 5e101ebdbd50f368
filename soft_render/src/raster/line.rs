//! Line rasterization: integer Bresenham with linear interpolation.

use glam::Vec2;

use super::{flush_line_fragments, FragQueue, RasterContext};
use crate::bins::FragmentBin;
use crate::shader::FragCoord;

pub(super) fn rasterize(ctx: &RasterContext<'_>) {
    let mut queue = FragQueue::new();
    for &bin_id in ctx.bin_ids {
        render_line(ctx, &ctx.bins[bin_id as usize], &mut queue);
    }
}

fn render_line(ctx: &RasterContext<'_>, bin: &FragmentBin, queue: &mut FragQueue) {
    let c0 = bin.screen_coords[0];
    let c1 = bin.screen_coords[1];
    let start = Vec2::new(c0.x, c0.y);

    let length = (Vec2::new(c1.x, c1.y) - start).length();
    let inv_length = if length > 0.0 { 1.0 / length } else { 0.0 };
    let (z0, z1) = (c0.z, c1.z);

    bresenham(
        c0.x as i32,
        c0.y as i32,
        c1.x as i32,
        c1.y as i32,
        |x, y| {
            if !ctx.contains(x, y) || y.rem_euclid(ctx.num_threads) != ctx.thread_id {
                return;
            }

            let t = (Vec2::new(x as f32, y as f32) - start).length() * inv_length;
            let z = z0 + (z1 - z0) * t;

            // SAFETY: inside the render area and on a row this thread owns.
            let stored = unsafe { (ctx.fbo.depth_load)(&ctx.fbo.depth, x as u16, y as u16) };
            if !ctx.pipeline.depth_test().compare(z, stored) {
                return;
            }

            let coord = FragCoord {
                x: x as u16,
                y: y as u16,
                depth: z,
            };
            if queue.push(coord, glam::Vec4::new(t, 0.0, 0.0, 0.0)) {
                flush_line_fragments(ctx, bin, queue);
            }
        },
    );

    if queue.len > 0 {
        flush_line_fragments(ctx, bin, queue);
    }
}

/// Classic integer DDA from `(x0, y0)` to `(x1, y1)`, inclusive.
fn bresenham(x0: i32, y0: i32, x1: i32, y1: i32, mut plot: impl FnMut(i32, i32)) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let mut x = x0;
    let mut y = y0;
    let mut err = dx + dy;

    loop {
        plot(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
