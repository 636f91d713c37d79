//! Renderer configuration resolved once at startup.

use std::path::PathBuf;

use crate::{Error, Result};

/// When the per-frame top-level acceleration structure is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlasRebuildPolicy {
    /// Rebuild every primary-view frame, even if nothing moved.
    #[default]
    Always,
    /// Skip the rebuild when the slot's instance list is unchanged.
    OnChange,
}

/// Startup configuration for the renderer.
///
/// All capacities are element counts, not byte sizes.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frame slots kept in flight (N).
    pub frames_in_flight: usize,
    /// Initial present resolution.
    pub present_width: u32,
    pub present_height: u32,
    /// Size of the full-size final image, independent of the internal resolution.
    pub native_width: u32,
    pub native_height: u32,
    /// Multiple of the present resolution used for the G-buffer, lighting and ray-tracing targets.
    pub supersample_factor: u32,
    /// Text lines that should fit vertically on the loading screen.
    pub loading_screen_lines: u32,
    /// Pixel height of one line of the standard bitmap font.
    pub font_line_height: u32,
    /// Slots in the bindless texture array.
    pub texture_array_size: u32,
    pub max_render_items_2d: usize,
    pub max_render_items_3d: usize,
    pub max_lights: usize,
    pub max_animated_transforms: usize,
    pub max_indirect_commands: usize,
    /// Enable the Khronos validation layer.
    pub enable_validation: bool,
    /// Directory holding compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    pub tlas_rebuild: TlasRebuildPolicy,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_width: 768,
            present_height: 432,
            native_width: 1920,
            native_height: 1080,
            supersample_factor: 2,
            loading_screen_lines: 40,
            font_line_height: 16,
            texture_array_size: 1024,
            max_render_items_2d: 16384,
            max_render_items_3d: 4096,
            max_lights: 64,
            max_animated_transforms: 4096,
            max_indirect_commands: 4096,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            tlas_rebuild: TlasRebuildPolicy::Always,
        }
    }
}

impl RendererConfig {
    /// Check the configuration for values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.present_width == 0 || self.present_height == 0 {
            return Err(Error::Config(format!(
                "present resolution {}x{} has a zero dimension",
                self.present_width, self.present_height
            )));
        }
        if self.native_width == 0 || self.native_height == 0 {
            return Err(Error::Config(format!(
                "native resolution {}x{} has a zero dimension",
                self.native_width, self.native_height
            )));
        }
        if self.supersample_factor == 0 {
            return Err(Error::Config("supersample_factor must be at least 1".into()));
        }
        if self.font_line_height == 0 || self.loading_screen_lines == 0 {
            return Err(Error::Config(
                "loading screen line settings must be non-zero".into(),
            ));
        }
        if self.texture_array_size == 0 {
            return Err(Error::Config("texture_array_size must be at least 1".into()));
        }

        let capacities = [
            ("max_render_items_2d", self.max_render_items_2d),
            ("max_render_items_3d", self.max_render_items_3d),
            ("max_lights", self.max_lights),
            ("max_animated_transforms", self.max_animated_transforms),
            ("max_indirect_commands", self.max_indirect_commands),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be at least 1")));
        }

        Ok(())
    }

    /// Loading-screen target extent, never smaller than 1x1.
    ///
    /// The present size scaled by `loading_screen_lines` over the number of
    /// font lines in the present height, computed in integers so the height
    /// lands exactly on a whole line count.
    pub fn loading_screen_extent(&self) -> (u32, u32) {
        let numerator = self.loading_screen_lines as u64 * self.font_line_height as u64;
        let height = self.present_height as u64;
        let scaled = |value: u32| ((value as u64 * numerator / height) as u32).max(1);
        (scaled(self.present_width), scaled(self.present_height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.supersample_factor, 2);
        assert_eq!(config.tlas_rebuild, TlasRebuildPolicy::Always);
    }

    #[test]
    fn test_single_slot_is_valid() {
        let config = RendererConfig {
            frames_in_flight: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_frames_rejected() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = RendererConfig {
            max_lights: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_lights"));
    }

    #[test]
    fn test_zero_present_size_rejected() {
        let config = RendererConfig {
            present_height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_loading_screen_extent() {
        // 432 / 16 = 27 lines fit natively; 40 wanted gives a 40/27 scale.
        let config = RendererConfig::default();
        let (w, h) = config.loading_screen_extent();
        assert_eq!(h, 640);
        assert_eq!(w, 768 * 640 / 432);
    }
}
