//! The three fragment processors.
//!
//! Each consumes prepared bins, walks pixel coverage for its primitive
//! type, and funnels surviving fragments through the shared flush path
//! below. Rows are interleaved across threads, so color and depth writes
//! need no locks.

mod line;
mod point;
mod triangle;

use glam::{IVec4, Vec4};

use crate::bins::FragmentBin;
use crate::framebuffer::FramebufferViews;
use crate::mesh::RenderMode;
use crate::pipeline::{BlendMode, PipelineState};
use crate::shader::{
    FragCoord, FragmentParams, FragmentShaderFn, MAX_QUEUED_FRAGS, MAX_VARYING_VECTORS,
};

/// Everything one thread needs to rasterize the active bank.
pub(crate) struct RasterContext<'a> {
    pub fragment_fn: FragmentShaderFn,
    pub pipeline: PipelineState,
    pub uniforms: &'a [u8],
    pub fbo: &'a FramebufferViews,
    /// Render area as `(x0, y0, x1, y1)`, exclusive on the high end.
    pub rect: IVec4,
    pub thread_id: i32,
    pub num_threads: i32,
    pub bins: &'a [FragmentBin],
    pub bin_ids: &'a [u32],
}

impl RasterContext<'_> {
    pub fn execute(&self, mode: RenderMode) {
        match mode {
            RenderMode::Points => point::rasterize(self),
            RenderMode::Lines => line::rasterize(self),
            RenderMode::Triangles => triangle::rasterize(self, false),
            RenderMode::TriangleWire => triangle::rasterize(self, true),
        }
    }

    #[inline]
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.rect.x && x < self.rect.z && y >= self.rect.y && y < self.rect.w
    }

    /// Store or blend the shader outputs into every active render target,
    /// then write depth if the mask allows.
    #[inline]
    fn commit_fragment(&self, coord: FragCoord, outputs: &[Vec4; crate::shader::MAX_RENDER_TARGETS]) {
        let blend = self.pipeline.blend_mode();
        let targets = self.pipeline.num_targets().min(self.fbo.num_colors);

        for t in 0..targets {
            // SAFETY: the fragment lies inside the render area and this
            // thread owns its row.
            unsafe {
                if blend == BlendMode::Off {
                    (self.fbo.store_fns[t])(&self.fbo.colors[t], coord.x, coord.y, outputs[t]);
                } else {
                    (self.fbo.blend_fns[t])(&self.fbo.colors[t], coord.x, coord.y, outputs[t], blend);
                }
            }
        }

        if self.pipeline.depth_mask() {
            // SAFETY: same row-ownership argument as the color writes.
            unsafe { (self.fbo.depth_store)(&self.fbo.depth, coord.x, coord.y, coord.depth) };
        }
    }
}

/// The per-thread batch of fragments awaiting the shader.
pub(crate) struct FragQueue {
    coords: [FragCoord; MAX_QUEUED_FRAGS],
    /// Barycentric weights for triangles; `x` holds the line parameter.
    bc: [Vec4; MAX_QUEUED_FRAGS],
    len: usize,
}

impl FragQueue {
    pub fn new() -> Self {
        Self {
            coords: [FragCoord::default(); MAX_QUEUED_FRAGS],
            bc: [Vec4::ZERO; MAX_QUEUED_FRAGS],
            len: 0,
        }
    }

    /// True when the queue filled up and must be flushed.
    #[inline]
    fn push(&mut self, coord: FragCoord, bc: Vec4) -> bool {
        self.coords[self.len] = coord;
        self.bc[self.len] = bc;
        self.len += 1;
        self.len == MAX_QUEUED_FRAGS
    }
}

/// Shade and commit queued line fragments; varyings lerp on the stored
/// parameter.
fn flush_line_fragments(ctx: &RasterContext<'_>, bin: &FragmentBin, queue: &mut FragQueue) {
    let num_varyings = ctx.pipeline.num_varyings();
    let mut varyings = [Vec4::ZERO; MAX_VARYING_VECTORS];
    let mut outputs = [Vec4::ZERO; crate::shader::MAX_RENDER_TARGETS];

    for i in 0..queue.len {
        let t = queue.bc[i].x;
        for v in 0..num_varyings {
            varyings[v] = bin.varyings[v].lerp(bin.varyings[v + MAX_VARYING_VECTORS], t);
        }

        let mut params = FragmentParams {
            coord: queue.coords[i],
            uniforms: ctx.uniforms,
            varyings: &varyings,
            outputs: &mut outputs,
        };
        if (ctx.fragment_fn)(&mut params) {
            ctx.commit_fragment(queue.coords[i], &outputs);
        }
    }

    queue.len = 0;
}

/// Shade and commit queued triangle fragments.
///
/// The queued weights are affine; they are made perspective-correct here by
/// scaling with each vertex's `1/w` and renormalizing.
fn flush_tri_fragments(ctx: &RasterContext<'_>, bin: &FragmentBin, queue: &mut FragQueue) {
    let points = &bin.screen_coords;
    let homogenous = Vec4::new(points[0].w, points[1].w, points[2].w, 0.0);

    for i in 0..queue.len {
        let bc = queue.bc[i] * homogenous;
        queue.bc[i] = bc / bc.element_sum();
    }

    let num_varyings = ctx.pipeline.num_varyings();
    let mut varyings = [Vec4::ZERO; MAX_VARYING_VECTORS];
    let mut outputs = [Vec4::ZERO; crate::shader::MAX_RENDER_TARGETS];

    for i in 0..queue.len {
        let bc = queue.bc[i];
        for v in 0..num_varyings {
            varyings[v] = bin.varyings[v] * bc.x
                + bin.varyings[v + MAX_VARYING_VECTORS] * bc.y
                + bin.varyings[v + 2 * MAX_VARYING_VECTORS] * bc.z;
        }

        let mut params = FragmentParams {
            coord: queue.coords[i],
            uniforms: ctx.uniforms,
            varyings: &varyings,
            outputs: &mut outputs,
        };
        if (ctx.fragment_fn)(&mut params) {
            ctx.commit_fragment(queue.coords[i], &outputs);
        }
    }

    queue.len = 0;
}
