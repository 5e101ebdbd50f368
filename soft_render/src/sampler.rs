//! Texture sampling.

use glam::Vec4;

use crate::texture::Texture;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Repeat,
    /// Saturate the coordinate to `[0, 1]`.
    Clamp,
    /// Clamp to the centers of the edge texels.
    ClampToEdge,
    /// Out-of-range lookups return the border color.
    ClampToBorder,
}

/// Sampling state: filtering, addressing, and the border color used by
/// [`AddressMode::ClampToBorder`].
#[derive(Copy, Clone, Debug, Default)]
pub struct Sampler {
    pub filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub border: Vec4,
}

impl Sampler {
    /// Sample `texture` at normalized `(u, v)`, slice 0.
    pub fn sample(&self, texture: &Texture, u: f32, v: f32) -> Vec4 {
        let (Some(u), Some(v)) = (wrap(u, self.address_u), wrap(v, self.address_v)) else {
            return self.border;
        };

        let view = texture.view();
        let w = view.width() as f32;
        let h = view.height() as f32;

        // edge addressing keeps the sample point half a texel inside
        let clamp_edge = |coord: f32, extent: f32, mode: AddressMode| {
            if mode == AddressMode::ClampToEdge {
                coord.clamp(0.5 / extent, 1.0 - 0.5 / extent)
            } else {
                coord
            }
        };
        let u = clamp_edge(u, w, self.address_u);
        let v = clamp_edge(v, h, self.address_v);

        match self.filter {
            FilterMode::Nearest => {
                let x = ((u * w) as u16).min(view.width() - 1);
                let y = ((v * h) as u16).min(view.height() - 1);
                texture.read(x, y, 0)
            }
            FilterMode::Linear => {
                let fx = (u * w - 0.5).max(0.0);
                let fy = (v * h - 0.5).max(0.0);
                let x0 = (fx as u16).min(view.width() - 1);
                let y0 = (fy as u16).min(view.height() - 1);
                let x1 = (x0 + 1).min(view.width() - 1);
                let y1 = (y0 + 1).min(view.height() - 1);
                let tx = fx.fract();
                let ty = fy.fract();

                let c00 = texture.read(x0, y0, 0);
                let c10 = texture.read(x1, y0, 0);
                let c01 = texture.read(x0, y1, 0);
                let c11 = texture.read(x1, y1, 0);

                let top = c00.lerp(c10, tx);
                let bottom = c01.lerp(c11, tx);
                top.lerp(bottom, ty)
            }
        }
    }
}

/// Returns `None` when the coordinate falls outside a border-addressed
/// texture.
fn wrap(coord: f32, mode: AddressMode) -> Option<f32> {
    match mode {
        AddressMode::Repeat => Some(coord.rem_euclid(1.0)),
        AddressMode::Clamp | AddressMode::ClampToEdge => Some(coord.clamp(0.0, 1.0)),
        AddressMode::ClampToBorder => (0.0..=1.0).contains(&coord).then_some(coord),
    }
}
