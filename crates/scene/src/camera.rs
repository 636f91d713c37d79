//! Camera and its GPU representation.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};

/// Camera projection type.
#[derive(Clone, Debug)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

/// Camera with a position, orientation and projection.
#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Quat,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y: 45.0_f32.to_radians(),
                aspect: 16.0 / 9.0,
                near: 0.1,
                far: 1000.0,
            },
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the aspect ratio of a perspective projection. No-op for
    /// orthographic cameras.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = &mut self.projection {
            *a = aspect;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Projection with Y flipped for Vulkan clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        };
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.length_squared() > 0.0 {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, direction.normalize());
        }
    }

    /// GPU camera block for a view occupying `viewport` (x, y, width, height
    /// in pixels of the present target).
    pub fn gpu_data(&self, viewport: Vec4) -> CameraData {
        let projection = self.projection_matrix();
        let view = self.view_matrix();
        CameraData {
            projection,
            projection_inverse: projection.inverse(),
            view,
            view_inverse: view.inverse(),
            viewport,
            position: self.position.extend(1.0),
        }
    }
}

/// Camera block read by the raster and ray-tracing shaders (binding 0 of
/// the per-frame set). 288 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub projection: Mat4,
    pub projection_inverse: Mat4,
    pub view: Mat4,
    pub view_inverse: Mat4,
    /// x, y, width, height.
    pub viewport: Vec4,
    /// World-space eye position, w = 1.
    pub position: Vec4,
}

impl Default for CameraData {
    fn default() -> Self {
        Camera::default().gpu_data(Vec4::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_data_size() {
        assert_eq!(std::mem::size_of::<CameraData>(), 288);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let unflipped = match camera.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            _ => unreachable!(),
        };
        assert_eq!(
            camera.projection_matrix().y_axis.y,
            -unflipped.y_axis.y
        );
    }

    #[test]
    fn test_gpu_data_inverses() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(3.0, 2.0, 1.0);
        camera.look_at(Vec3::ZERO);
        let data = camera.gpu_data(Vec4::new(0.0, 0.0, 768.0, 432.0));
        let identity = data.view * data.view_inverse;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert_eq!(data.viewport.z, 768.0);
        assert_eq!(data.position.w, 1.0);
    }

    #[test]
    fn test_set_aspect_only_changes_perspective() {
        let mut camera = Camera::default();
        camera.set_aspect(2.0);
        assert!(matches!(
            camera.projection,
            Projection::Perspective { aspect, .. } if aspect == 2.0
        ));
    }
}
