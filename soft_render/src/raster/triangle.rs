//! Triangle rasterization: interleaved scanline walk over precomputed
//! barycentric gradients.

use glam::Vec4;

use super::{flush_tri_fragments, FragQueue, RasterContext};
use crate::bins::FragmentBin;
use crate::scanline::{scanline_offset, ScanlineBounds};
use crate::shader::FragCoord;

pub(super) fn rasterize(ctx: &RasterContext<'_>, wireframe: bool) {
    let mut queue = FragQueue::new();
    for &bin_id in ctx.bin_ids {
        let bin = &ctx.bins[bin_id as usize];
        if wireframe {
            render_wireframe(ctx, bin, &mut queue);
        } else {
            render_filled(ctx, bin, &mut queue);
        }
    }
}

struct RowWalk {
    y: i32,
    y_end: i32,
    bounds: ScanlineBounds,
    depth: Vec4,
}

fn begin_walk(ctx: &RasterContext<'_>, bin: &FragmentBin) -> Option<RowWalk> {
    let points = &bin.screen_coords;
    let min_y = points[0].y.min(points[1].y).min(points[2].y) as i32;
    let max_y = points[0].y.max(points[1].y).max(points[2].y) as i32;

    let y = min_y + scanline_offset(ctx.num_threads, ctx.thread_id, min_y);
    let y_end = max_y.min(ctx.rect.w);
    if y >= y_end {
        return None;
    }

    Some(RowWalk {
        y,
        y_end,
        bounds: ScanlineBounds::new(points[0], points[1], points[2]),
        depth: Vec4::new(points[0].z, points[1].z, points[2].z, 0.0),
    })
}

fn render_filled(ctx: &RasterContext<'_>, bin: &FragmentBin, queue: &mut FragQueue) {
    let Some(mut walk) = begin_walk(ctx, bin) else {
        return;
    };

    let bc_dx = bin.barycentric[0];
    let bc_dy = bin.barycentric[1];
    let bc_origin = bin.barycentric[2];

    while walk.y < walk.y_end {
        if walk.y < ctx.rect.y {
            walk.y += ctx.num_threads;
            continue;
        }

        let yf = walk.y as f32;
        let (x_min, x_max) = walk.bounds.step(yf);
        let x0 = x_min.max(ctx.rect.x);
        let x1 = x_max.min(ctx.rect.z);
        if x0 >= x1 {
            walk.y += ctx.num_threads;
            continue;
        }

        let bc_row = bc_dy * yf + bc_origin;
        let mut bc = bc_dx * x0 as f32 + bc_row;

        for x in x0..x1 {
            let z = walk.depth.dot(bc);
            // SAFETY: inside the render area and on a row this thread owns.
            let stored = unsafe { (ctx.fbo.depth_load)(&ctx.fbo.depth, x as u16, walk.y as u16) };

            if ctx.pipeline.depth_test().compare(z, stored) {
                let coord = FragCoord {
                    x: x as u16,
                    y: walk.y as u16,
                    depth: z,
                };
                if queue.push(coord, bc) {
                    flush_tri_fragments(ctx, bin, queue);
                }
            }

            bc += bc_dx;
        }

        walk.y += ctx.num_threads;
    }

    if queue.len > 0 {
        flush_tri_fragments(ctx, bin, queue);
    }
}

/// Edge-only variant: per row, emit the leading pixels of the left edge and
/// the trailing pixels of the right edge, sized by how far each edge moved
/// since the previous row.
fn render_wireframe(ctx: &RasterContext<'_>, bin: &FragmentBin, queue: &mut FragQueue) {
    let Some(mut walk) = begin_walk(ctx, bin) else {
        return;
    };

    let bc_dx = bin.barycentric[0];
    let bc_dy = bin.barycentric[1];
    let bc_origin = bin.barycentric[2];

    while walk.y < walk.y_end {
        if walk.y < ctx.rect.y {
            walk.y += ctx.num_threads;
            continue;
        }

        let yf = walk.y as f32;
        let (x_min, x_max) = walk.bounds.step(yf);
        let (prev_min, prev_max) = walk.bounds.step(yf - 1.0);
        let d0 = (x_min - prev_min).abs().max(1);
        let d1 = (x_max - prev_max).abs().max(1);

        let bc_row = bc_dy * yf + bc_origin;

        let mut ix = 0;
        let mut x = x_min;
        while x < x_max {
            if ix == d0 {
                // skip the interior, land on the right edge
                x = x_min.max(x_max - d1 - 1);
            } else if x >= ctx.rect.x && x < ctx.rect.z {
                let bc = bc_dx * x as f32 + bc_row;
                let z = walk.depth.dot(bc);
                // SAFETY: inside the render area and on a row this thread
                // owns.
                let stored =
                    unsafe { (ctx.fbo.depth_load)(&ctx.fbo.depth, x as u16, walk.y as u16) };

                if ctx.pipeline.depth_test().compare(z, stored) {
                    let coord = FragCoord {
                        x: x as u16,
                        y: walk.y as u16,
                        depth: z,
                    };
                    if queue.push(coord, bc) {
                        flush_tri_fragments(ctx, bin, queue);
                    }
                }
            }

            ix += 1;
            x += 1;
        }

        walk.y += ctx.num_threads;
    }

    if queue.len > 0 {
        flush_tri_fragments(ctx, bin, queue);
    }
}
