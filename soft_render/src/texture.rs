//! Owned texture storage and the raw views the pipeline works through.

use glam::Vec4;

use crate::color::{self, ColorFormat};
use crate::Error;

/// A non-owning, format-tagged view over a strided 2D/3D texel array.
///
/// Texel `(x, y, z)` lives at byte offset `(x + w * (y + h * z)) * bpt`.
/// The view does not own its memory; it is invalidated when the owning
/// [`Texture`] is re-initialized or dropped.
#[derive(Copy, Clone, Debug)]
pub struct TextureView {
    format: ColorFormat,
    bytes_per_texel: u16,
    width: u16,
    height: u16,
    depth: u16,
    texels: *mut u8,
}

// SAFETY: views are handed to worker threads which write disjoint rows (the
// fragment and blit stages partition rows by `y % num_threads`) or disjoint
// texel ranges (clear). The pipeline never aliases a mutable row across
// threads within one dispatch.
unsafe impl Send for TextureView {}
unsafe impl Sync for TextureView {}

impl TextureView {
    /// Wrap externally-owned texel memory, e.g. a window back buffer.
    ///
    /// # Safety
    ///
    /// `texels` must point to at least `width * height * depth` texels of
    /// `format` and stay valid (and unaliased by other writers) for the
    /// lifetime of every pipeline operation the view is passed to.
    pub unsafe fn from_raw_parts(
        format: ColorFormat,
        width: u16,
        height: u16,
        depth: u16,
        texels: *mut u8,
    ) -> Self {
        Self {
            format,
            bytes_per_texel: format.bytes_per_texel() as u16,
            width,
            height,
            depth,
            texels,
        }
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn bytes_per_texel(&self) -> usize {
        self.bytes_per_texel as usize
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    #[inline]
    fn texel_index(&self, x: u16, y: u16, z: u16) -> usize {
        x as usize + self.width as usize * (y as usize + self.height as usize * z as usize)
    }

    /// Raw pointer to texel `(x, y)` in slice 0.
    ///
    /// # Safety
    ///
    /// `x < width` and `y < height` must hold, and the caller must own the
    /// addressed row for writing under the pipeline's row partition.
    #[inline]
    pub unsafe fn texel_ptr(&self, x: u16, y: u16) -> *mut u8 {
        // SAFETY: in-bounds per the caller contract.
        unsafe {
            self.texels
                .add(self.texel_index(x, y, 0) * self.bytes_per_texel as usize)
        }
    }

    /// # Safety
    ///
    /// Same bounds contract as [`TextureView::texel_ptr`], extended with
    /// `z < depth`.
    #[inline]
    pub unsafe fn texel_ptr_3d(&self, x: u16, y: u16, z: u16) -> *mut u8 {
        // SAFETY: in-bounds per the caller contract.
        unsafe {
            self.texels
                .add(self.texel_index(x, y, z) * self.bytes_per_texel as usize)
        }
    }

    /// Decode texel `(x, y, z)` to normalized RGBA.
    ///
    /// # Safety
    ///
    /// Coordinates must be in bounds and no other thread may be writing the
    /// addressed texel.
    #[inline]
    pub unsafe fn load(&self, x: u16, y: u16, z: u16) -> Vec4 {
        // SAFETY: in-bounds per the caller contract.
        let bytes = unsafe {
            core::slice::from_raw_parts(self.texel_ptr_3d(x, y, z), self.bytes_per_texel as usize)
        };
        color::load_vec4(self.format, bytes)
    }

    /// Encode normalized RGBA into texel `(x, y, z)`.
    ///
    /// # Safety
    ///
    /// Coordinates must be in bounds and the caller must own the texel for
    /// writing.
    #[inline]
    pub unsafe fn store(&self, x: u16, y: u16, z: u16, rgba: Vec4) {
        // SAFETY: in-bounds per the caller contract.
        let bytes = unsafe {
            core::slice::from_raw_parts_mut(
                self.texel_ptr_3d(x, y, z),
                self.bytes_per_texel as usize,
            )
        };
        color::store_vec4(self.format, rgba, bytes);
    }
}

/// Texel storage owned by the [`Context`](crate::Context).
///
/// Storage is 8-byte aligned so every channel type can be addressed
/// directly. `init` reallocates and invalidates previously obtained views.
#[derive(Debug)]
pub struct Texture {
    // u64-backed so f64/u64 texels are naturally aligned.
    storage: Box<[u64]>,
    view: TextureView,
}

impl Texture {
    pub fn new(format: ColorFormat, width: u16, height: u16, depth: u16) -> Result<Self, Error> {
        let mut texture = Self {
            storage: Vec::new().into_boxed_slice(),
            view: TextureView {
                format,
                bytes_per_texel: format.bytes_per_texel() as u16,
                width: 0,
                height: 0,
                depth: 0,
                texels: core::ptr::null_mut(),
            },
        };
        texture.init(format, width, height, depth)?;
        Ok(texture)
    }

    /// Reallocate the texture. All texels start zeroed.
    pub fn init(
        &mut self,
        format: ColorFormat,
        width: u16,
        height: u16,
        depth: u16,
    ) -> Result<(), Error> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::AllocationFailure);
        }

        let texels = width as usize * height as usize * depth as usize;
        let bytes = texels
            .checked_mul(format.bytes_per_texel())
            .ok_or(Error::AllocationFailure)?;

        self.storage = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();
        self.view = TextureView {
            format,
            bytes_per_texel: format.bytes_per_texel() as u16,
            width,
            height,
            depth,
            texels: self.storage.as_mut_ptr().cast(),
        };
        Ok(())
    }

    pub fn view(&self) -> TextureView {
        self.view
    }

    pub fn format(&self) -> ColorFormat {
        self.view.format
    }

    pub fn width(&self) -> u16 {
        self.view.width
    }

    pub fn height(&self) -> u16 {
        self.view.height
    }

    pub fn depth(&self) -> u16 {
        self.view.depth
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.view.texel_index(0, 0, self.view.depth) * self.view.bytes_per_texel as usize;
        // SAFETY: `view.texels` points at `storage`, which holds at least
        // `len` initialized bytes.
        unsafe { core::slice::from_raw_parts(self.view.texels, len) }
    }

    /// Decode texel `(x, y, z)` to normalized RGBA.
    pub fn read(&self, x: u16, y: u16, z: u16) -> Vec4 {
        assert!(x < self.view.width && y < self.view.height && z < self.view.depth);
        // SAFETY: bounds checked above; `&self` excludes concurrent writers.
        unsafe { self.view.load(x, y, z) }
    }

    /// Encode normalized RGBA into texel `(x, y, z)`.
    pub fn write(&mut self, x: u16, y: u16, z: u16, rgba: Vec4) {
        assert!(x < self.view.width && y < self.view.height && z < self.view.depth);
        // SAFETY: bounds checked above; `&mut self` grants exclusive access.
        unsafe { self.view.store(x, y, z, rgba) }
    }
}
