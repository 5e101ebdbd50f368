//! A bin-based, multi-threaded software rasterizer.
//!
//! The [`Context`] owns every resource (textures, buffers, shaders,
//! framebuffers, uniform blocks) behind generational handles, plus the
//! worker pool that executes draws. A draw runs the classic programmable
//! pipeline on the CPU: vertex fetch and shading, clipping, viewport
//! transform, primitive binning, rasterization, fragment shading, depth
//! test, blend, and framebuffer stores — all partitioned across the pool.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_crate_dependencies)]

pub mod buffer;
pub mod color;
pub mod dither;
pub mod framebuffer;
pub mod mesh;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod texture;
pub mod viewport;

mod bins;
mod blit;
mod clear;
mod pool;
mod raster;
mod scanline;
mod vertex;

use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use glam::{IVec4, Vec4};
use slotmap::{DefaultKey, SlotMap};
use thiserror::Error;
use tracing::trace_span;

use bins::BinQueue;
use blit::BlitTask;
use buffer::{IndexBuffer, VertexArray, VertexBuffer};
use clear::{ClearTarget, ClearTask};
use color::ColorFormat;
use framebuffer::{Framebuffer, FramebufferViews};
use mesh::Mesh;
use pipeline::PipelineState;
use pool::{Job, WorkerPool};
use shader::{FragmentShaderFn, Shader, VertexShaderFn};
use texture::{Texture, TextureView};
use vertex::{DrawTask, IndexData, MeshDraw, RawSlice};
use viewport::ViewportState;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid or stale resource handle")]
    InvalidHandle,
    #[error("invalid framebuffer: {0}")]
    InvalidFramebuffer(&'static str),
    #[error("no codec for the requested format")]
    InvalidFormat,
    #[error("allocation failure")]
    AllocationFailure,
}

macro_rules! resource_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
            pub struct $name(DefaultKey);
        )*
    };
}

resource_id!(
    TextureId,
    VertexBufferId,
    IndexBufferId,
    VertexArrayId,
    FramebufferId,
    ShaderId,
    UniformBufferId,
);

/// The rendering context: every resource, the viewport state, and the
/// worker pool.
///
/// Two contexts are fully independent and may render in parallel.
pub struct Context {
    textures: SlotMap<DefaultKey, Texture>,
    vertex_buffers: SlotMap<DefaultKey, VertexBuffer>,
    index_buffers: SlotMap<DefaultKey, IndexBuffer>,
    vertex_arrays: SlotMap<DefaultKey, VertexArray>,
    framebuffers: SlotMap<DefaultKey, Framebuffer>,
    shaders: SlotMap<DefaultKey, Shader>,
    uniform_buffers: SlotMap<DefaultKey, Vec<u8>>,
    viewport: ViewportState,
    bins: Arc<BinQueue>,
    pool: WorkerPool,
}

impl Context {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(threads)
    }

    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            textures: SlotMap::new(),
            vertex_buffers: SlotMap::new(),
            index_buffers: SlotMap::new(),
            vertex_arrays: SlotMap::new(),
            framebuffers: SlotMap::new(),
            shaders: SlotMap::new(),
            uniform_buffers: SlotMap::new(),
            viewport: ViewportState::new(),
            bins: Arc::new(BinQueue::new()),
            pool: WorkerPool::new(num_threads),
        }
    }

    /// Resize the worker pool. Takes effect for subsequent dispatches.
    pub fn num_threads(&mut self, num_threads: usize) {
        if num_threads != self.pool.num_threads() {
            self.pool = WorkerPool::new(num_threads);
        }
    }

    /*-------------------------------------------------------------------------
     * Resources
     *-----------------------------------------------------------------------*/

    pub fn create_texture(
        &mut self,
        format: ColorFormat,
        width: u16,
        height: u16,
        depth: u16,
    ) -> Result<TextureId, Error> {
        let texture = Texture::new(format, width, height, depth)?;
        Ok(TextureId(self.textures.insert(texture)))
    }

    pub fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(id.0);
    }

    pub fn texture(&self, id: TextureId) -> Result<&Texture, Error> {
        self.textures.get(id.0).ok_or(Error::InvalidHandle)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Result<&mut Texture, Error> {
        self.textures.get_mut(id.0).ok_or(Error::InvalidHandle)
    }

    pub fn create_vertex_buffer(&mut self, buffer: VertexBuffer) -> VertexBufferId {
        VertexBufferId(self.vertex_buffers.insert(buffer))
    }

    pub fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        self.vertex_buffers.remove(id.0);
    }

    pub fn vertex_buffer_mut(&mut self, id: VertexBufferId) -> Result<&mut VertexBuffer, Error> {
        self.vertex_buffers.get_mut(id.0).ok_or(Error::InvalidHandle)
    }

    pub fn create_index_buffer(&mut self, buffer: IndexBuffer) -> IndexBufferId {
        IndexBufferId(self.index_buffers.insert(buffer))
    }

    pub fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        self.index_buffers.remove(id.0);
    }

    pub fn create_vertex_array(&mut self, vao: VertexArray) -> Result<VertexArrayId, Error> {
        if !self.vertex_buffers.contains_key(vao.vertex_buffer.0) {
            return Err(Error::InvalidHandle);
        }
        if let Some(ibo) = vao.index_buffer {
            if !self.index_buffers.contains_key(ibo.0) {
                return Err(Error::InvalidHandle);
            }
        }
        Ok(VertexArrayId(self.vertex_arrays.insert(vao)))
    }

    pub fn destroy_vertex_array(&mut self, id: VertexArrayId) {
        self.vertex_arrays.remove(id.0);
    }

    pub fn create_framebuffer(&mut self, framebuffer: Framebuffer) -> Result<FramebufferId, Error> {
        for attachment in framebuffer.color.iter().flatten() {
            if !self.textures.contains_key(attachment.0) {
                return Err(Error::InvalidHandle);
            }
        }
        if let Some(depth) = framebuffer.depth {
            if !self.textures.contains_key(depth.0) {
                return Err(Error::InvalidHandle);
            }
        }
        Ok(FramebufferId(self.framebuffers.insert(framebuffer)))
    }

    pub fn destroy_framebuffer(&mut self, id: FramebufferId) {
        self.framebuffers.remove(id.0);
    }

    pub fn create_uniform_buffer(&mut self, size: usize) -> UniformBufferId {
        UniformBufferId(self.uniform_buffers.insert(vec![0; size]))
    }

    pub fn destroy_uniform_buffer(&mut self, id: UniformBufferId) {
        self.uniform_buffers.remove(id.0);
    }

    /// Overwrite a uniform block with a typed value.
    pub fn set_uniforms<T: bytemuck::NoUninit>(
        &mut self,
        id: UniformBufferId,
        value: &T,
    ) -> Result<(), Error> {
        let buffer = self
            .uniform_buffers
            .get_mut(id.0)
            .ok_or(Error::InvalidHandle)?;
        buffer.clear();
        buffer.extend_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    pub fn create_shader(
        &mut self,
        vertex_fn: VertexShaderFn,
        fragment_fn: FragmentShaderFn,
        pipeline: PipelineState,
        uniforms: Option<UniformBufferId>,
    ) -> Result<ShaderId, Error> {
        if let Some(ubo) = uniforms {
            if !self.uniform_buffers.contains_key(ubo.0) {
                return Err(Error::InvalidHandle);
            }
        }
        Ok(ShaderId(self.shaders.insert(Shader {
            vertex_fn,
            fragment_fn,
            pipeline,
            uniforms,
        })))
    }

    pub fn destroy_shader(&mut self, id: ShaderId) {
        self.shaders.remove(id.0);
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.viewport.set_viewport(x, y, w, h);
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.viewport.set_scissor(x, y, w, h);
    }

    /*-------------------------------------------------------------------------
     * Operations
     *-----------------------------------------------------------------------*/

    /// Clear every color attachment to `color` and the depth attachment to
    /// `depth`.
    pub fn clear_framebuffer(
        &mut self,
        fbo: FramebufferId,
        color: Vec4,
        depth: f64,
    ) -> Result<(), Error> {
        let _span = trace_span!("Context::clear_framebuffer").entered();

        let framebuffer = self.framebuffers.get(fbo.0).ok_or(Error::InvalidHandle)?;
        let mut targets = Vec::new();

        for attachment in framebuffer.color.iter().flatten() {
            let view = self
                .textures
                .get(attachment.0)
                .ok_or(Error::InvalidHandle)?
                .view();
            targets.push(encode_clear(view, color_value(color)));
        }
        if let Some(attachment) = framebuffer.depth {
            let view = self
                .textures
                .get(attachment.0)
                .ok_or(Error::InvalidHandle)?
                .view();
            framebuffer::depth_fns(view.format())?;
            targets.push(encode_clear(
                view,
                color::TexelValue::Float([depth, 0.0, 0.0, 1.0]),
            ));
        }

        self.run_clear(targets);
        Ok(())
    }

    /// Clear one color attachment.
    pub fn clear_attachment(
        &mut self,
        fbo: FramebufferId,
        slot: usize,
        color: Vec4,
    ) -> Result<(), Error> {
        let framebuffer = self.framebuffers.get(fbo.0).ok_or(Error::InvalidHandle)?;
        let attachment = framebuffer
            .color
            .get(slot)
            .copied()
            .flatten()
            .ok_or(Error::InvalidHandle)?;
        let view = self
            .textures
            .get(attachment.0)
            .ok_or(Error::InvalidHandle)?
            .view();

        self.run_clear(vec![encode_clear(view, color_value(color))]);
        Ok(())
    }

    fn run_clear(&self, targets: Vec<ClearTarget>) {
        let task = Arc::new(ClearTask {
            targets,
            num_threads: self.pool.num_threads(),
        });
        self.pool.dispatch(|| Job::Clear(task.clone()));
    }

    /// Draw one mesh.
    pub fn draw(&mut self, mesh: &Mesh, shader: ShaderId, fbo: FramebufferId) -> Result<(), Error> {
        self.draw_multiple(core::slice::from_ref(mesh), shader, fbo)
    }

    /// Draw a batch of meshes through one shader into one framebuffer.
    ///
    /// Primitive ordinals continue across the batch, so blended output
    /// keeps submission order even across mesh boundaries.
    pub fn draw_multiple(
        &mut self,
        meshes: &[Mesh],
        shader: ShaderId,
        fbo: FramebufferId,
    ) -> Result<(), Error> {
        let _span = trace_span!("Context::draw").entered();

        let shader = *self.shaders.get(shader.0).ok_or(Error::InvalidHandle)?;
        let views = self.resolve_framebuffer(fbo)?;

        let rect = self
            .viewport
            .viewport_rect(views.width as i32, views.height as i32);
        if rect.z <= 0 || rect.w <= 0 {
            return Ok(());
        }
        let scissor = self
            .viewport
            .scissor_enabled()
            .then(|| self.viewport.scissor_matrix(views.width as f32, views.height as f32));

        let uniforms = match shader.uniforms {
            Some(ubo) => RawSlice::new(self.uniform_buffers.get(ubo.0).ok_or(Error::InvalidHandle)?),
            None => RawSlice::new(&[]),
        };

        // Validate the whole batch up front; a failing draw must have no
        // side effects.
        struct Chunk {
            vao: VertexArrayId,
            mode: mesh::RenderMode,
            meshes: Vec<MeshDraw>,
        }
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut prim_base = 0u32;

        for mesh in meshes {
            let vao = self
                .vertex_arrays
                .get(mesh.vao.0)
                .ok_or(Error::InvalidHandle)?;
            if !self.vertex_buffers.contains_key(vao.vertex_buffer.0) {
                return Err(Error::InvalidHandle);
            }
            if mesh.indexed {
                let ibo = vao.index_buffer.ok_or(Error::InvalidHandle)?;
                let index_buffer = self.index_buffers.get(ibo.0).ok_or(Error::InvalidHandle)?;
                if mesh.elements.end as usize > index_buffer.len() {
                    return Err(Error::InvalidHandle);
                }
            }

            let draw = MeshDraw {
                indexed: mesh.indexed,
                begin: mesh.elements.start,
                end: mesh.elements.end,
                prim_base,
            };
            prim_base += mesh.primitive_count() as u32;

            match chunks.last_mut() {
                Some(chunk) if chunk.vao == mesh.vao && chunk.mode == mesh.mode => {
                    chunk.meshes.push(draw);
                }
                _ => chunks.push(Chunk {
                    vao: mesh.vao,
                    mode: mesh.mode,
                    meshes: vec![draw],
                }),
            }
        }

        let num_threads = self.pool.num_threads();
        for chunk in chunks {
            let vao = &self.vertex_arrays[chunk.vao.0];
            let vertex_data = RawSlice::new(self.vertex_buffers[vao.vertex_buffer.0].as_bytes());
            let indices = vao
                .index_buffer
                .map(|ibo| IndexData::new(&self.index_buffers[ibo.0]));

            let task = Arc::new(DrawTask {
                mode: chunk.mode,
                meshes: chunk.meshes,
                vao: vao.clone(),
                vertex_data,
                indices,
                shader,
                uniforms,
                fbo: views,
                viewport: rect,
                scissor,
                bins: self.bins.clone(),
                busy_processors: AtomicI64::new(num_threads as i64),
                num_threads,
            });
            self.pool.dispatch(|| Job::Draw(task.clone()));
        }

        Ok(())
    }

    /// Copy between two context textures with format conversion.
    pub fn blit(
        &mut self,
        dst: TextureId,
        src: TextureId,
        dst_rect: IVec4,
        src_rect: IVec4,
    ) -> Result<(), Error> {
        if dst == src {
            return Err(Error::InvalidHandle);
        }
        let dst_view = self.textures.get(dst.0).ok_or(Error::InvalidHandle)?.view();
        self.blit_into(dst_view, src, dst_rect, src_rect)
    }

    /// Copy a context texture into an external target, e.g. a window back
    /// buffer wrapped with [`TextureView::from_raw_parts`].
    pub fn blit_into(
        &mut self,
        dst: TextureView,
        src: TextureId,
        dst_rect: IVec4,
        src_rect: IVec4,
    ) -> Result<(), Error> {
        let _span = trace_span!("Context::blit").entered();

        let src_view = self.textures.get(src.0).ok_or(Error::InvalidHandle)?.view();
        let task = Arc::new(BlitTask {
            src: src_view,
            dst,
            src_rect,
            dst_rect,
            num_threads: self.pool.num_threads(),
        });
        self.pool.dispatch(|| Job::Blit(task.clone()));
        Ok(())
    }

    fn resolve_framebuffer(&self, fbo: FramebufferId) -> Result<FramebufferViews, Error> {
        let framebuffer = self.framebuffers.get(fbo.0).ok_or(Error::InvalidHandle)?;

        let mut colors = Vec::new();
        for attachment in framebuffer.color.iter().flatten() {
            colors.push(
                self.textures
                    .get(attachment.0)
                    .ok_or(Error::InvalidHandle)?
                    .view(),
            );
        }
        let depth = framebuffer
            .depth
            .ok_or(Error::InvalidFramebuffer("missing depth attachment"))?;
        let depth_view = self.textures.get(depth.0).ok_or(Error::InvalidHandle)?.view();

        FramebufferViews::new(&colors, depth_view)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn color_value(color: Vec4) -> color::TexelValue {
    color::TexelValue::Float([color.x as f64, color.y as f64, color.z as f64, color.w as f64])
}

fn encode_clear(view: TextureView, value: color::TexelValue) -> ClearTarget {
    let mut texel = [0u8; 32];
    color::write_texel(view.format(), value, &mut texel[..view.format().bytes_per_texel()]);
    ClearTarget { view, texel }
}
