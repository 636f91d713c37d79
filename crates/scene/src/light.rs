//! Lights.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A point light as authored by the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub radius: f32,
    pub strength: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            radius: 10.0,
            strength: 1.0,
        }
    }
}

impl PointLight {
    pub fn to_gpu(&self) -> GpuLight {
        GpuLight {
            position: self.position.to_array(),
            color: self.color.to_array(),
            radius: self.radius,
            strength: self.strength,
        }
    }
}

/// Tightly packed light record in the per-frame light buffer; 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub radius: f32,
    pub strength: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_light_is_packed() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
    }

    #[test]
    fn test_point_light_conversion() {
        let light = PointLight {
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::new(1.0, 0.5, 0.25),
            radius: 4.0,
            strength: 2.0,
        };
        let gpu = light.to_gpu();
        assert_eq!(gpu.position, [1.0, 2.0, 3.0]);
        assert_eq!(gpu.color, [1.0, 0.5, 0.25]);
        assert_eq!(gpu.radius, 4.0);
        assert_eq!(gpu.strength, 2.0);
    }
}
