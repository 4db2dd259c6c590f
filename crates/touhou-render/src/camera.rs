//! Camera and projection for Vulkan clip space.

use glam::{Mat4, Vec3};

/// Look-at camera with a perspective projection.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(2.0, 2.0, 2.0),
            target: Vec3::ZERO,
            up: Vec3::Z,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 10.0,
        }
    }
}

impl Camera {
    /// Default camera with the given aspect ratio.
    pub fn with_aspect(aspect: f32) -> Self {
        Self {
            aspect,
            ..Self::default()
        }
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// World-to-view transform.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// View-to-clip transform with Y flipped, since Vulkan clip space points Y down.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_flips_y() {
        let camera = Camera::with_aspect(1.0);
        let unflipped = Mat4::perspective_rh(camera.fov, 1.0, camera.near, camera.far);
        let proj = camera.projection_matrix();

        assert!(proj.y_axis.y < 0.0);
        assert_relative_eq!(proj.y_axis.y, -unflipped.y_axis.y);
        assert_relative_eq!(proj.x_axis.x, unflipped.x_axis.x);
    }

    #[test]
    fn view_maps_eye_to_origin() {
        let camera = Camera::default();
        let eye = camera.view_matrix().transform_point3(camera.position);
        assert_relative_eq!(eye.length(), 0.0, epsilon = 1e-5);

        // Target sits straight ahead on -Z in view space
        let target = camera.view_matrix().transform_point3(camera.target);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-5);
        assert!(target.z < 0.0);
    }
}
