//! Per-frame uniform data.

use crate::camera::Camera;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Degrees per second the quad turns about Z.
pub const SPIN_DEGREES_PER_SECOND: f32 = 90.0;

/// Model, view and projection matrices, std140-compatible.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Size in bytes as bound in the descriptor set.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Transform for the spinning quad `elapsed_secs` after startup.
    pub fn spinning(elapsed_secs: f32, aspect: f32) -> Self {
        let camera = Camera::with_aspect(aspect);
        Self {
            model: Mat4::from_rotation_z((elapsed_secs * SPIN_DEGREES_PER_SECOND).to_radians()),
            view: camera.view_matrix(),
            proj: camera.projection_matrix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn size_is_three_matrices() {
        assert_eq!(UniformBufferObject::SIZE, 192);
    }

    #[test]
    fn starts_unrotated() {
        let ubo = UniformBufferObject::spinning(0.0, 1.0);
        assert_eq!(ubo.model, Mat4::IDENTITY);
    }

    #[test]
    fn quarter_turn_per_second() {
        let ubo = UniformBufferObject::spinning(1.0, 1.0);
        let x = ubo.model.transform_vector3(Vec3::X);

        assert_relative_eq!(x.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(x.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(x.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn full_turn_after_four_seconds() {
        let ubo = UniformBufferObject::spinning(4.0, 1.0);
        let x = ubo.model.transform_vector3(Vec3::X);

        assert_relative_eq!(x.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(x.y, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn aspect_only_touches_projection() {
        let square = UniformBufferObject::spinning(0.5, 1.0);
        let wide = UniformBufferObject::spinning(0.5, 2.0);

        assert_eq!(square.model, wide.model);
        assert_eq!(square.view, wide.view);
        assert_relative_eq!(wide.proj.x_axis.x * 2.0, square.proj.x_axis.x, epsilon = 1e-5);
        assert!(wide.proj.y_axis.y < 0.0);
    }
}
