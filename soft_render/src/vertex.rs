//! The vertex stage: fetch, shade, clip, project, bin.
//!
//! Every worker runs the same code over a disjoint slice of primitives and
//! feeds the shared bin queue. When the queue saturates (or the draw ends)
//! the workers meet at a gate, rasterize the active bank together, and flip
//! banks. The gate is the `frag_processors` counter of the bank:
//!
//! * `>= 0` — threads arriving; the `num_threads`-th arrival sorts the bin
//!   list and stores `-(num_threads + 1)` as the go signal.
//! * `< 0` — rasterization in flight; each finisher adds one. The thread
//!   that brings it to `-2` re-arms the bank.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use glam::{IVec4, Mat4, Vec4};

use crate::bins::{cpu_yield_exponential, spin_wait, BinQueue, FragmentBin};
use crate::buffer::{IndexBuffer, VertexArray};
use crate::framebuffer::FramebufferViews;
use crate::mesh::RenderMode;
use crate::pipeline::CullMode;
use crate::raster::RasterContext;
use crate::shader::{Shader, VertexParams, MAX_VARYING_VECTORS};

/// Borrowed bytes smuggled across the thread boundary.
///
/// The context keeps the owning resources alive (and unmodified) for the
/// whole dispatch, so reconstituting the slice on a worker is sound.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RawSlice {
    ptr: *const u8,
    len: usize,
}

impl RawSlice {
    pub fn new(slice: &[u8]) -> Self {
        Self {
            ptr: slice.as_ptr(),
            len: slice.len(),
        }
    }

    /// # Safety
    ///
    /// The source slice must outlive every use; the dispatch blocking in
    /// [`Context::draw`](crate::Context::draw) guarantees it.
    #[inline]
    pub unsafe fn as_slice<'a>(self) -> &'a [u8] {
        if self.len == 0 {
            &[]
        } else {
            // SAFETY: per the type contract above.
            unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum IndexKind {
    U8,
    U16,
    U32,
}

/// Raw view of an element array.
#[derive(Copy, Clone, Debug)]
pub(crate) struct IndexData {
    kind: IndexKind,
    ptr: *const u8,
    len: usize,
}

impl IndexData {
    pub fn new(buffer: &IndexBuffer) -> Self {
        match buffer {
            IndexBuffer::U8(v) => Self {
                kind: IndexKind::U8,
                ptr: v.as_ptr(),
                len: v.len(),
            },
            IndexBuffer::U16(v) => Self {
                kind: IndexKind::U16,
                ptr: v.as_ptr().cast(),
                len: v.len(),
            },
            IndexBuffer::U32(v) => Self {
                kind: IndexKind::U32,
                ptr: v.as_ptr().cast(),
                len: v.len(),
            },
        }
    }

    /// # Safety
    ///
    /// `element < len`, and the owning buffer must outlive the dispatch.
    #[inline]
    unsafe fn get(&self, element: usize) -> u32 {
        debug_assert!(element < self.len);
        // SAFETY: in-bounds typed read per the caller contract.
        unsafe {
            match self.kind {
                IndexKind::U8 => *self.ptr.add(element) as u32,
                IndexKind::U16 => self.ptr.cast::<u16>().add(element).read() as u32,
                IndexKind::U32 => self.ptr.cast::<u32>().add(element).read(),
            }
        }
    }
}

/// One mesh range inside a dispatch.
#[derive(Clone, Debug)]
pub(crate) struct MeshDraw {
    pub indexed: bool,
    pub begin: u32,
    pub end: u32,
    /// First primitive ordinal of this mesh, continuing across the batch.
    pub prim_base: u32,
}

/// Everything a draw dispatch shares between worker threads.
pub(crate) struct DrawTask {
    pub mode: RenderMode,
    pub meshes: Vec<MeshDraw>,
    pub vao: VertexArray,
    pub vertex_data: RawSlice,
    pub indices: Option<IndexData>,
    pub shader: Shader,
    pub uniforms: RawSlice,
    pub fbo: FramebufferViews,
    /// `(x, y, w, h)` region NDC maps onto; the §4.2 intersection.
    pub viewport: IVec4,
    pub scissor: Option<Mat4>,
    pub bins: Arc<BinQueue>,
    pub busy_processors: AtomicI64,
    pub num_threads: usize,
}

// SAFETY: the raw slices and texture views inside the task point at
// context-owned resources which the dispatching thread keeps alive (it
// blocks until every worker is done) and does not mutate meanwhile.
unsafe impl Send for DrawTask {}
unsafe impl Sync for DrawTask {}

impl DrawTask {
    pub fn run(&self, thread_id: usize) {
        let mut processor = VertexProcessor {
            task: self,
            thread_id,
            active: 0,
        };

        for mesh in &self.meshes {
            processor.process_mesh(mesh);
        }
        processor.cleanup();
    }
}

#[derive(Copy, Clone)]
struct ClipVertex {
    pos: Vec4,
    varyings: [Vec4; MAX_VARYING_VECTORS],
}

fn lerp_vertex(a: &ClipVertex, b: &ClipVertex, t: f32, num_varyings: usize) -> ClipVertex {
    let mut out = ClipVertex {
        pos: a.pos.lerp(b.pos, t),
        varyings: a.varyings,
    };
    for v in 0..num_varyings {
        out.varyings[v] = a.varyings[v].lerp(b.varyings[v], t);
    }
    out
}

struct VertexProcessor<'a> {
    task: &'a DrawTask,
    thread_id: usize,
    /// Bank this thread currently fills; flips in lockstep at every gate.
    active: usize,
}

impl VertexProcessor<'_> {
    fn process_mesh(&mut self, mesh: &MeshDraw) {
        let task = self.task;
        let prim_size = task.mode.vertices_per_primitive();
        let num_prims = (mesh.end - mesh.begin) as usize / prim_size;
        let num_varyings = task.shader.pipeline.num_varyings();

        // SAFETY: the context keeps the buffers alive for the dispatch.
        let vertex_data = unsafe { task.vertex_data.as_slice() };
        let uniforms = unsafe { task.uniforms.as_slice() };

        let mut vertices = [ClipVertex {
            pos: Vec4::ZERO,
            varyings: [Vec4::ZERO; MAX_VARYING_VECTORS],
        }; 3];

        for prim in (self.thread_id..num_prims).step_by(task.num_threads) {
            for v in 0..prim_size {
                let element = mesh.begin as usize + prim * prim_size + v;
                let vertex_id = match (&task.indices, mesh.indexed) {
                    // SAFETY: the element range was validated against the
                    // index buffer when the draw was submitted.
                    (Some(indices), true) => unsafe { indices.get(element) as usize },
                    _ => element,
                };

                let pos = {
                    let mut params = VertexParams {
                        vertex_id,
                        instance_id: 0,
                        uniforms,
                        vao: &task.vao,
                        vertex_data,
                        varyings: &mut vertices[v].varyings,
                    };
                    (task.shader.vertex_fn)(&mut params)
                };
                vertices[v].pos = pos;
            }

            let prim_index = mesh.prim_base + prim as u32;
            match task.mode {
                RenderMode::Points => self.emit_point(&vertices[0], prim_index),
                RenderMode::Lines => self.emit_line(&vertices, prim_index, num_varyings),
                RenderMode::Triangles | RenderMode::TriangleWire => {
                    self.emit_triangle(&vertices, prim_index, num_varyings)
                }
            }
        }
    }

    /// Map a clip-space position to window space, keeping `1/w` in the
    /// fourth component.
    fn to_screen(&self, clip: Vec4) -> Vec4 {
        let vp = self.task.viewport;
        let inv_w = 1.0 / clip.w;

        Vec4::new(
            (clip.x * inv_w * 0.5 + 0.5) * vp.z as f32 + vp.x as f32,
            (clip.y * inv_w * 0.5 + 0.5) * vp.w as f32 + vp.y as f32,
            clip.z * inv_w * 0.5 + 0.5,
            inv_w,
        )
    }

    fn apply_scissor(&self, pos: Vec4) -> Vec4 {
        match self.task.scissor {
            Some(matrix) => matrix * pos,
            None => pos,
        }
    }

    fn emit_point(&mut self, vertex: &ClipVertex, prim_index: u32) {
        let p = self.apply_scissor(vertex.pos);
        let w = p.w;
        if p.x < -w || p.x > w || p.y < -w || p.y > w || p.z < -w || p.z > w {
            return;
        }

        let mut bin = FragmentBin::empty();
        bin.screen_coords[0] = self.to_screen(p);
        bin.varyings[..MAX_VARYING_VECTORS].copy_from_slice(&vertex.varyings);
        bin.prim_index = prim_index;
        self.push_bin(bin);
    }

    /// Liang–Barsky clip against all six planes, then bin.
    fn emit_line(&mut self, vertices: &[ClipVertex; 3], prim_index: u32, num_varyings: usize) {
        let a = ClipVertex {
            pos: self.apply_scissor(vertices[0].pos),
            varyings: vertices[0].varyings,
        };
        let b = ClipVertex {
            pos: self.apply_scissor(vertices[1].pos),
            varyings: vertices[1].varyings,
        };

        let distances = |p: Vec4| [p.w + p.x, p.w - p.x, p.w + p.y, p.w - p.y, p.w + p.z, p.w - p.z];
        let fa = distances(a.pos);
        let fb = distances(b.pos);

        let mut t0 = 0.0f32;
        let mut t1 = 1.0f32;
        for plane in 0..6 {
            let (da, db) = (fa[plane], fb[plane]);
            if da < 0.0 && db < 0.0 {
                return;
            }
            if da < 0.0 {
                t0 = t0.max(da / (da - db));
            } else if db < 0.0 {
                t1 = t1.min(da / (da - db));
            }
        }
        if t0 > t1 {
            return;
        }

        let start = if t0 > 0.0 { lerp_vertex(&a, &b, t0, num_varyings) } else { a };
        let end = if t1 < 1.0 { lerp_vertex(&a, &b, t1, num_varyings) } else { b };

        let mut bin = FragmentBin::empty();
        bin.screen_coords[0] = self.to_screen(start.pos);
        bin.screen_coords[1] = self.to_screen(end.pos);
        bin.varyings[..MAX_VARYING_VECTORS].copy_from_slice(&start.varyings);
        bin.varyings[MAX_VARYING_VECTORS..2 * MAX_VARYING_VECTORS].copy_from_slice(&end.varyings);
        bin.prim_index = prim_index;
        self.push_bin(bin);
    }

    /// Sutherland–Hodgman clip against the near plane only; side and far
    /// overflow is bounded per-pixel by the render area instead.
    fn emit_triangle(&mut self, vertices: &[ClipVertex; 3], prim_index: u32, num_varyings: usize) {
        let mut input = *vertices;
        for vertex in &mut input {
            vertex.pos = self.apply_scissor(vertex.pos);
        }

        let near = |p: Vec4| p.w + p.z;
        let inside = [
            near(input[0].pos) >= 0.0,
            near(input[1].pos) >= 0.0,
            near(input[2].pos) >= 0.0,
        ];

        if inside == [true; 3] {
            self.project_and_bin(&input, prim_index);
            return;
        }
        if inside == [false; 3] {
            return;
        }

        let mut clipped = [input[0]; 4];
        let mut count = 0;
        for i in 0..3 {
            let a = &input[i];
            let b = &input[(i + 1) % 3];
            let da = near(a.pos);
            let db = near(b.pos);

            if da >= 0.0 {
                clipped[count] = *a;
                count += 1;
            }
            if (da >= 0.0) != (db >= 0.0) {
                clipped[count] = lerp_vertex(a, b, da / (da - db), num_varyings);
                count += 1;
            }
        }

        // one plane yields a triangle or a quad
        if count >= 3 {
            self.project_and_bin(&[clipped[0], clipped[1], clipped[2]], prim_index);
        }
        if count == 4 {
            self.project_and_bin(&[clipped[0], clipped[2], clipped[3]], prim_index);
        }
    }

    fn project_and_bin(&mut self, vertices: &[ClipVertex; 3], prim_index: u32) {
        let s0 = self.to_screen(vertices[0].pos);
        let s1 = self.to_screen(vertices[1].pos);
        let s2 = self.to_screen(vertices[2].pos);

        // signed doubled area; CCW is positive
        let area = (s1.x - s0.x) * (s2.y - s0.y) - (s2.x - s0.x) * (s1.y - s0.y);
        let keep = match self.task.shader.pipeline.cull_mode() {
            CullMode::Back => area > 0.0,
            CullMode::Front => area < 0.0,
            CullMode::Off => area != 0.0,
        };
        if !keep || !area.is_finite() {
            return;
        }

        // barycentric gradients: λ(x, y) = λ0 + x dλ/dx + y dλ/dy
        let inv = 1.0 / area;
        let bc_dx = Vec4::new(s1.y - s2.y, s2.y - s0.y, s0.y - s1.y, 0.0) * inv;
        let bc_dy = Vec4::new(s2.x - s1.x, s0.x - s2.x, s1.x - s0.x, 0.0) * inv;
        let bc_origin = Vec4::new(
            s1.x * s2.y - s2.x * s1.y,
            s2.x * s0.y - s0.x * s2.y,
            s0.x * s1.y - s1.x * s0.y,
            0.0,
        ) * inv;

        let mut bin = FragmentBin::empty();
        bin.screen_coords = [s0, s1, s2];
        bin.barycentric = [bc_dx, bc_dy, bc_origin];
        for (k, vertex) in vertices.iter().enumerate() {
            bin.varyings[k * MAX_VARYING_VECTORS..(k + 1) * MAX_VARYING_VECTORS]
                .copy_from_slice(&vertex.varyings);
        }
        bin.prim_index = prim_index;
        self.push_bin(bin);
    }

    fn push_bin(&mut self, bin: FragmentBin) {
        loop {
            let bank = self.task.bins.bank(self.active);
            match bank.reserve() {
                Some(slot) => {
                    // SAFETY: `slot` is a fresh reservation on the bank this
                    // thread is filling.
                    unsafe { bank.write(slot, bin) };
                    return;
                }
                None => self.flush_rasterizer(),
            }
        }
    }

    /// Meet the other threads at the gate, rasterize the active bank, flip.
    fn flush_rasterizer(&mut self) {
        let task = self.task;
        let num_threads = task.num_threads as i64;
        let bank = task.bins.bank(self.active);
        let go_signal = -num_threads - 1;

        let arrival = bank.frag_processors.fetch_add(1, Ordering::AcqRel);
        let num_bins;

        if arrival == num_threads - 1 {
            // last to arrive: order the bins, then release everyone
            num_bins = bank.bins_in_flight();
            let is_triangles = matches!(
                task.mode,
                RenderMode::Triangles | RenderMode::TriangleWire
            );
            // SAFETY: all other threads are parked at the gate.
            unsafe {
                bank.sort_for_raster(num_bins, task.shader.pipeline.blend_mode(), is_triangles);
            }
            bank.frag_processors.store(go_signal, Ordering::Release);
        } else {
            spin_wait(|| bank.frag_processors.load(Ordering::Acquire) < 0);
            num_bins = bank.bins_in_flight();
        }

        // SAFETY: production on this bank is parked until the bank resets;
        // the gate publishes every producer's writes.
        let (bins, bin_ids) = unsafe { (bank.bins(), bank.bin_ids(num_bins)) };
        let uniforms = unsafe { task.uniforms.as_slice() };

        let vp = task.viewport;
        let ctx = RasterContext {
            fragment_fn: task.shader.fragment_fn,
            pipeline: task.shader.pipeline,
            uniforms,
            fbo: &task.fbo,
            rect: IVec4::new(vp.x, vp.y, vp.x + vp.z, vp.y + vp.w),
            thread_id: self.thread_id as i32,
            num_threads: task.num_threads as i32,
            bins,
            bin_ids,
        };
        ctx.execute(task.mode);

        let finishers = bank.frag_processors.fetch_add(1, Ordering::AcqRel);
        if finishers == -2 {
            bank.reset();
        }

        self.active ^= 1;
    }

    /// Stop producing, assist any in-flight flushes, and run the final one.
    fn cleanup(&mut self) {
        let task = self.task;
        task.busy_processors.fetch_sub(1, Ordering::AcqRel);

        let mut yields = 0;
        loop {
            if task.bins.bank(self.active).frag_processors.load(Ordering::Acquire) > 0 {
                self.flush_rasterizer();
            } else {
                yields = cpu_yield_exponential(yields);
            }

            if task.busy_processors.load(Ordering::Acquire) == 0 {
                break;
            }
        }

        if task.bins.bank(self.active).bins_in_flight() > 0 {
            self.flush_rasterizer();
        }
    }
}
