//! Vertex layout and the built-in quad.

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Per-vertex data: 2D position and RGB color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }

    /// Single interleaved binding at slot 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// Location 0 is position, location 1 is color.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Self, pos) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Self, color) as u32),
        ]
    }
}

/// Corners of a unit-half quad, each a different color.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
];

/// Two triangles covering [`QUAD_VERTICES`].
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(Vertex::binding_description().stride, 20);

        let [pos, color] = Vertex::attribute_descriptions();
        assert_eq!(pos.offset, 0);
        assert_eq!(color.offset, 8);
        assert_eq!(pos.location, 0);
        assert_eq!(color.location, 1);
    }

    #[test]
    fn quad_indices_stay_in_range() {
        assert!(QUAD_INDICES
            .iter()
            .all(|&i| usize::from(i) < QUAD_VERTICES.len()));
        assert_eq!(QUAD_INDICES.len() % 3, 0);
    }
}
