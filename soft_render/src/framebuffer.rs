//! Render-target state: attachment sets, per-format pixel stores, blending.
//!
//! Store and blend routines are resolved to plain function pointers once per
//! draw, when the attachment set is validated; the rasterizers then write
//! pixels without consulting the format again.

use glam::Vec4;

use crate::color::{self, ColorFormat};
use crate::pipeline::BlendMode;
use crate::shader::MAX_RENDER_TARGETS;
use crate::texture::TextureView;
use crate::{Error, TextureId};

/// An attachment set: up to four color targets and one depth target.
///
/// Attachments are non-owning references to context textures; the set is
/// validated when a draw or clear resolves it.
#[derive(Clone, Debug, Default)]
pub struct Framebuffer {
    pub(crate) color: [Option<TextureId>; MAX_RENDER_TARGETS],
    pub(crate) depth: Option<TextureId>,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_color(&mut self, slot: usize, texture: Option<TextureId>) {
        self.color[slot] = texture;
    }

    pub fn attach_depth(&mut self, texture: Option<TextureId>) {
        self.depth = texture;
    }
}

pub(crate) type StoreFn = unsafe fn(&TextureView, u16, u16, Vec4);
pub(crate) type BlendFn = unsafe fn(&TextureView, u16, u16, Vec4, BlendMode);
pub(crate) type DepthLoadFn = unsafe fn(&TextureView, u16, u16) -> f32;
pub(crate) type DepthStoreFn = unsafe fn(&TextureView, u16, u16, f32);

/// A validated attachment set with its dispatch tables, ready to rasterize
/// into.
#[derive(Copy, Clone, Debug)]
pub(crate) struct FramebufferViews {
    pub colors: [TextureView; MAX_RENDER_TARGETS],
    pub num_colors: usize,
    pub store_fns: [StoreFn; MAX_RENDER_TARGETS],
    pub blend_fns: [BlendFn; MAX_RENDER_TARGETS],
    pub depth: TextureView,
    pub depth_load: DepthLoadFn,
    pub depth_store: DepthStoreFn,
    pub width: u16,
    pub height: u16,
}

impl FramebufferViews {
    pub fn new(colors: &[TextureView], depth: TextureView) -> Result<Self, Error> {
        let first = colors
            .first()
            .ok_or(Error::InvalidFramebuffer("no color attachments"))?;
        let (width, height) = (first.width(), first.height());

        for view in colors {
            if view.width() != width || view.height() != height {
                return Err(Error::InvalidFramebuffer("attachment dimensions disagree"));
            }
            if view.format() == ColorFormat::Rgb9E5 {
                return Err(Error::InvalidFormat);
            }
        }
        if depth.width() != width || depth.height() != height {
            return Err(Error::InvalidFramebuffer("depth dimensions disagree"));
        }

        let (depth_load, depth_store) = depth_fns(depth.format())?;

        let mut views = Self {
            colors: [*first; MAX_RENDER_TARGETS],
            num_colors: colors.len(),
            store_fns: [store_fn(first.format()); MAX_RENDER_TARGETS],
            blend_fns: [blend_fn(first.format()); MAX_RENDER_TARGETS],
            depth,
            depth_load,
            depth_store,
            width,
            height,
        };
        for (i, view) in colors.iter().enumerate() {
            views.colors[i] = *view;
            views.store_fns[i] = store_fn(view.format());
            views.blend_fns[i] = blend_fn(view.format());
        }
        Ok(views)
    }
}

pub(crate) fn depth_fns(format: ColorFormat) -> Result<(DepthLoadFn, DepthStoreFn), Error> {
    match format {
        ColorFormat::R16 => Ok((depth_load_u16, depth_store_u16)),
        ColorFormat::R32Float => Ok((depth_load_f32, depth_store_f32)),
        ColorFormat::R64Float => Ok((depth_load_f64, depth_store_f64)),
        _ => Err(Error::InvalidFramebuffer("unsupported depth format")),
    }
}

/*-----------------------------------------------------------------------------
 * Blending
-----------------------------------------------------------------------------*/

/// Combine a shader output with the framebuffer value, then clamp to
/// `[0, 1]`.
pub fn blend_vec4(mode: BlendMode, src: Vec4, dst: Vec4) -> Vec4 {
    let src_alpha = Vec4::splat(src.w);
    let modulation = Vec4::ONE - src_alpha;

    let out = match mode {
        BlendMode::Off => src,
        BlendMode::Alpha => {
            let dst_mod = modulation * dst.w;
            let dst_alpha = dst_mod + src_alpha;
            let rgb = (src * src_alpha + dst * dst_mod) / dst_alpha;
            Vec4::new(rgb.x, rgb.y, rgb.z, dst_alpha.x)
        }
        BlendMode::PremultipliedAlpha => src + dst * modulation,
        BlendMode::Additive => dst + src * src_alpha,
        BlendMode::Screen => src * src_alpha + dst * modulation,
    };

    out.clamp(Vec4::ZERO, Vec4::ONE)
}

/*-----------------------------------------------------------------------------
 * Per-format store functions
-----------------------------------------------------------------------------*/

/// One framebuffer channel: normalized load/store over the raw value.
trait Channel: Copy {
    fn from_unorm(v: f32) -> Self;
    fn to_unorm(self) -> f32;
}

impl Channel for u8 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        (v * 255.0 + 0.5) as u8
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        self as f32 / 255.0
    }
}

impl Channel for u16 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        (v * 65535.0 + 0.5) as u16
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        self as f32 / 65535.0
    }
}

impl Channel for u32 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        (v as f64 * u32::MAX as f64 + 0.5) as u32
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        (self as f64 / u32::MAX as f64) as f32
    }
}

impl Channel for u64 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        (v as f64 * u64::MAX as f64 + 0.5) as u64
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        (self as f64 / u64::MAX as f64) as f32
    }
}

impl Channel for f32 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        v
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        self
    }
}

impl Channel for f64 {
    #[inline]
    fn from_unorm(v: f32) -> Self {
        v as f64
    }

    #[inline]
    fn to_unorm(self) -> f32 {
        self as f32
    }
}

/// SAFETY contract shared by every function in the tables below: `(x, y)`
/// must be in bounds of `view` and the calling thread must own the pixel
/// under the row partition.
unsafe fn store_pixel<T: Channel, const N: usize>(view: &TextureView, x: u16, y: u16, rgba: Vec4) {
    // SAFETY: forwarded caller contract.
    let ptr = unsafe { view.texel_ptr(x, y) }.cast::<T>();
    let src = [rgba.x, rgba.y, rgba.z, rgba.w];
    for i in 0..N {
        // SAFETY: channel `i < N` lies inside the texel.
        unsafe { ptr.add(i).write_unaligned(T::from_unorm(src[i])) };
    }
}

unsafe fn load_pixel<T: Channel, const N: usize>(view: &TextureView, x: u16, y: u16) -> Vec4 {
    // SAFETY: forwarded caller contract.
    let ptr = unsafe { view.texel_ptr(x, y) }.cast::<T>();
    let mut dst = Vec4::new(0.0, 0.0, 0.0, 1.0);
    for i in 0..N {
        // SAFETY: channel `i < N` lies inside the texel.
        dst[i] = unsafe { ptr.add(i).read_unaligned() }.to_unorm();
    }
    dst
}

unsafe fn blend_pixel<T: Channel, const N: usize>(
    view: &TextureView,
    x: u16,
    y: u16,
    rgba: Vec4,
    mode: BlendMode,
) {
    // SAFETY: forwarded caller contract.
    unsafe {
        let dst = load_pixel::<T, N>(view, x, y);
        store_pixel::<T, N>(view, x, y, blend_vec4(mode, rgba, dst));
    }
}

// Packed formats go through the tagged codec; the bit shuffling dwarfs the
// dispatch cost there.
unsafe fn store_packed(view: &TextureView, x: u16, y: u16, rgba: Vec4) {
    // SAFETY: forwarded caller contract.
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(view.texel_ptr(x, y), view.bytes_per_texel())
    };
    color::store_vec4(view.format(), rgba, bytes);
}

unsafe fn blend_packed(view: &TextureView, x: u16, y: u16, rgba: Vec4, mode: BlendMode) {
    // SAFETY: forwarded caller contract.
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(view.texel_ptr(x, y), view.bytes_per_texel())
    };
    let dst = color::load_vec4(view.format(), bytes);
    color::store_vec4(view.format(), blend_vec4(mode, rgba, dst), bytes);
}

fn store_fn(format: ColorFormat) -> StoreFn {
    use ColorFormat::*;

    match format {
        R8 => store_pixel::<u8, 1>,
        Rg8 => store_pixel::<u8, 2>,
        Rgb8 => store_pixel::<u8, 3>,
        Rgba8 => store_pixel::<u8, 4>,
        R16 => store_pixel::<u16, 1>,
        Rg16 => store_pixel::<u16, 2>,
        Rgb16 => store_pixel::<u16, 3>,
        Rgba16 => store_pixel::<u16, 4>,
        R32 => store_pixel::<u32, 1>,
        Rg32 => store_pixel::<u32, 2>,
        Rgb32 => store_pixel::<u32, 3>,
        Rgba32 => store_pixel::<u32, 4>,
        R64 => store_pixel::<u64, 1>,
        Rg64 => store_pixel::<u64, 2>,
        Rgb64 => store_pixel::<u64, 3>,
        Rgba64 => store_pixel::<u64, 4>,
        R32Float => store_pixel::<f32, 1>,
        Rg32Float => store_pixel::<f32, 2>,
        Rgb32Float => store_pixel::<f32, 3>,
        Rgba32Float => store_pixel::<f32, 4>,
        R64Float => store_pixel::<f64, 1>,
        Rg64Float => store_pixel::<f64, 2>,
        Rgb64Float => store_pixel::<f64, 3>,
        Rgba64Float => store_pixel::<f64, 4>,
        Rgb332 | Rgb565 | Rgba5551 | Rgba4444 | Rgb10A2 | Rgb9E5 => store_packed,
    }
}

fn blend_fn(format: ColorFormat) -> BlendFn {
    use ColorFormat::*;

    match format {
        R8 => blend_pixel::<u8, 1>,
        Rg8 => blend_pixel::<u8, 2>,
        Rgb8 => blend_pixel::<u8, 3>,
        Rgba8 => blend_pixel::<u8, 4>,
        R16 => blend_pixel::<u16, 1>,
        Rg16 => blend_pixel::<u16, 2>,
        Rgb16 => blend_pixel::<u16, 3>,
        Rgba16 => blend_pixel::<u16, 4>,
        R32 => blend_pixel::<u32, 1>,
        Rg32 => blend_pixel::<u32, 2>,
        Rgb32 => blend_pixel::<u32, 3>,
        Rgba32 => blend_pixel::<u32, 4>,
        R64 => blend_pixel::<u64, 1>,
        Rg64 => blend_pixel::<u64, 2>,
        Rgb64 => blend_pixel::<u64, 3>,
        Rgba64 => blend_pixel::<u64, 4>,
        R32Float => blend_pixel::<f32, 1>,
        Rg32Float => blend_pixel::<f32, 2>,
        Rgb32Float => blend_pixel::<f32, 3>,
        Rgba32Float => blend_pixel::<f32, 4>,
        R64Float => blend_pixel::<f64, 1>,
        Rg64Float => blend_pixel::<f64, 2>,
        Rgb64Float => blend_pixel::<f64, 3>,
        Rgba64Float => blend_pixel::<f64, 4>,
        Rgb332 | Rgb565 | Rgba5551 | Rgba4444 | Rgb10A2 | Rgb9E5 => blend_packed,
    }
}

/*-----------------------------------------------------------------------------
 * Depth attachment access
-----------------------------------------------------------------------------*/

unsafe fn depth_load_u16(view: &TextureView, x: u16, y: u16) -> f32 {
    // SAFETY: forwarded caller contract.
    let raw = unsafe { view.texel_ptr(x, y).cast::<u16>().read_unaligned() };
    raw as f32 / 65535.0
}

unsafe fn depth_store_u16(view: &TextureView, x: u16, y: u16, depth: f32) {
    // SAFETY: forwarded caller contract.
    unsafe {
        view.texel_ptr(x, y)
            .cast::<u16>()
            .write_unaligned((depth * 65535.0 + 0.5) as u16);
    }
}

unsafe fn depth_load_f32(view: &TextureView, x: u16, y: u16) -> f32 {
    // SAFETY: forwarded caller contract.
    unsafe { view.texel_ptr(x, y).cast::<f32>().read_unaligned() }
}

unsafe fn depth_store_f32(view: &TextureView, x: u16, y: u16, depth: f32) {
    // SAFETY: forwarded caller contract.
    unsafe { view.texel_ptr(x, y).cast::<f32>().write_unaligned(depth) };
}

unsafe fn depth_load_f64(view: &TextureView, x: u16, y: u16) -> f32 {
    // SAFETY: forwarded caller contract.
    unsafe { view.texel_ptr(x, y).cast::<f64>().read_unaligned() as f32 }
}

unsafe fn depth_store_f64(view: &TextureView, x: u16, y: u16, depth: f32) {
    // SAFETY: forwarded caller contract.
    unsafe { view.texel_ptr(x, y).cast::<f64>().write_unaligned(depth as f64) };
}
