//! Viewport and scissor state.

use glam::{IVec4, Mat4, Vec4};

const DIMENSION_MIN: i32 = -65536;
const DIMENSION_MAX: i32 = 65535;

const DEFAULT_RECT: IVec4 = IVec4::new(0, 0, DIMENSION_MAX, DIMENSION_MAX);

/// Integer viewport and scissor rectangles, `(x, y, w, h)` each.
///
/// Both default to the full addressable range, so an untouched state maps
/// NDC onto the whole framebuffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewportState {
    viewport: IVec4,
    scissor: IVec4,
}

impl ViewportState {
    pub const fn new() -> Self {
        Self {
            viewport: DEFAULT_RECT,
            scissor: DEFAULT_RECT,
        }
    }

    pub fn viewport(&self) -> IVec4 {
        self.viewport
    }

    pub fn scissor(&self) -> IVec4 {
        self.scissor
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.viewport = clamp_rect(x, y, w, h);
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.scissor = clamp_rect(x, y, w, h);
    }

    pub fn scissor_enabled(&self) -> bool {
        self.scissor != DEFAULT_RECT
    }

    /// Intersection of viewport, scissor, and framebuffer, in pixels.
    pub fn viewport_rect(&self, fbo_w: i32, fbo_h: i32) -> IVec4 {
        let scissor = self.scissor;
        let mut rect = self.viewport;

        rect.x = (rect.x + scissor.x).clamp(0, fbo_w);
        rect.y = (rect.y + scissor.y).clamp(0, fbo_h);
        rect.z = rect.z.min(scissor.x + scissor.z - rect.x).min(fbo_w - rect.x);
        rect.w = rect.w.min(scissor.y + scissor.w - rect.y).min(fbo_h - rect.y);

        rect
    }

    /// Post-projection matrix mapping the scissor rectangle onto NDC
    /// `[-1, 1]`, so out-of-scissor geometry lands outside the clip volume.
    pub fn scissor_matrix(&self, fbo_w: f32, fbo_h: f32) -> Mat4 {
        let scissor = self.scissor.as_vec4();
        let dims = scissor / Vec4::new(fbo_w, fbo_h, fbo_w, fbo_h);

        let mut x = dims.x;
        let mut y = dims.y;
        let mut w = dims.z;
        let mut h = dims.w;

        if x < 0.0 {
            w += x;
            x = 0.0;
        }
        if y < 0.0 {
            h += y;
            y = 0.0;
        }
        w = w.min(1.0 - x);
        h = h.min(1.0 - y);

        let nm00 = 1.0 / w;
        let nm11 = 1.0 / h;
        let m30 = x * (-2.0 * nm00) + (nm00 - 1.0);
        let m31 = y * (-2.0 * nm11) + (nm11 - 1.0);

        Mat4::from_cols(
            Vec4::new(nm00, 0.0, 0.0, 0.0),
            Vec4::new(0.0, nm11, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            Vec4::new(m30, m31, 0.0, 1.0),
        )
    }
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_rect(x: i32, y: i32, w: i32, h: i32) -> IVec4 {
    IVec4::new(
        x.clamp(DIMENSION_MIN, DIMENSION_MAX),
        y.clamp(DIMENSION_MIN, DIMENSION_MAX),
        w.clamp(DIMENSION_MIN, DIMENSION_MAX),
        h.clamp(DIMENSION_MIN, DIMENSION_MAX),
    )
}
