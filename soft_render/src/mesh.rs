//! Draw records.

use std::ops::Range;

use crate::VertexArrayId;

/// Primitive topology of a draw.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Points,
    Lines,
    Triangles,
    /// Triangle walk that only emits the edge pixels of each scanline.
    TriangleWire,
}

impl RenderMode {
    pub const fn vertices_per_primitive(&self) -> usize {
        match self {
            Self::Points => 1,
            Self::Lines => 2,
            Self::Triangles | Self::TriangleWire => 3,
        }
    }
}

/// One renderable range of a vertex array.
///
/// `elements` spans indices into the bound element array when `indexed`,
/// otherwise raw vertex ids.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub mode: RenderMode,
    pub indexed: bool,
    pub elements: Range<u32>,
    pub vao: VertexArrayId,
}

impl Mesh {
    pub fn primitive_count(&self) -> usize {
        self.elements.len() / self.mode.vertices_per_primitive()
    }
}
