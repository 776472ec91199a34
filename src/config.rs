//! Renderer and per-frame configuration

use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Mat4, Vec2, Vec4};
use static_assertions::{const_assert, const_assert_eq};

use crate::backend::types::ClearValues;
use crate::error::{RendererError, RendererResult};
use crate::scene::CullStats;

/// Number of user clip planes in [`SceneData`].
pub const NUM_CLIPPING_PLANES: usize = 3;

/// How the geometry stream draws the draw list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawStrategy {
    /// One indexed draw per item through the standard vertex pipeline.
    #[default]
    DirectIndexed,
    /// A compute pass culls meshlets and writes indirect commands that the
    /// geometry stream consumes.
    ComputeCulled,
}

/// Configuration for a meshlet renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub strategy: DrawStrategy,
    /// Meshlets handled by one culling workgroup.
    pub task_group_size: u32,
    pub clear: ClearValues,
    /// Upper bound for a single wait on an in-flight submission.
    pub fence_timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            strategy: DrawStrategy::DirectIndexed,
            task_group_size: 32,
            clear: ClearValues::default(),
            fence_timeout: Duration::from_secs(1),
        }
    }
}

impl RendererConfig {
    pub fn with_strategy(mut self, strategy: DrawStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_task_group_size(mut self, size: u32) -> Self {
        self.task_group_size = size;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear.color = color;
        self
    }

    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear.depth = depth;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn validate(&self) -> RendererResult<()> {
        if self.task_group_size == 0 {
            return Err(RendererError::InvalidConfig(
                "task_group_size must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.clear.depth) {
            return Err(RendererError::InvalidConfig(format!(
                "clear depth {} outside [0, 1]",
                self.clear.depth
            )));
        }
        Ok(())
    }
}

/// View uniform block, uploaded to the view buffer every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    pub view_proj_matrix: Mat4,
    pub view_matrix: Mat4,
    pub view_matrix_it: Mat4,
    pub view_pos: Vec4,
    pub view_dir: Vec4,
    pub light_pos_world: Vec4,
    pub viewport: IVec2,
    pub viewport_f: Vec2,
    pub viewport_task_cull: Vec2,
    pub colorize: i32,
    pub _pad0: i32,
    pub clip_planes_world: [Vec4; NUM_CLIPPING_PLANES],
}

const_assert_eq!(std::mem::size_of::<SceneData>(), 320);
const_assert!(std::mem::size_of::<SceneData>() % 4 == 0);

impl Default for SceneData {
    fn default() -> Self {
        Self {
            view_proj_matrix: Mat4::IDENTITY,
            view_matrix: Mat4::IDENTITY,
            view_matrix_it: Mat4::IDENTITY,
            ..Self::zeroed()
        }
    }
}

impl SceneData {
    /// Fill the viewport fields for a target of `width` x `height` pixels.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = IVec2::new(width as i32, height as i32);
        self.viewport_f = Vec2::new(width as f32, height as f32);
        self.viewport_task_cull = self.viewport_f;
        self
    }
}

/// Inputs of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameConfig {
    pub scene: SceneData,
    /// Also execute the bounding-box debug stream.
    pub meshlet_boxes: bool,
    pub stats: CullStats,
}

impl FrameConfig {
    pub fn new(scene: SceneData) -> Self {
        Self {
            scene,
            ..Default::default()
        }
    }

    pub fn with_meshlet_boxes(mut self, enabled: bool) -> Self {
        self.meshlet_boxes = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.task_group_size, 32);
        assert_eq!(config.strategy, DrawStrategy::DirectIndexed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_task_group_rejected() {
        let config = RendererConfig::default().with_task_group_size(0);
        assert!(matches!(
            config.validate(),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_scene_data_viewport() {
        let scene = SceneData::default().with_viewport(1280, 720);
        assert_eq!(scene.viewport, IVec2::new(1280, 720));
        assert_eq!(scene.viewport_f, Vec2::new(1280.0, 720.0));
        assert_eq!(scene.view_matrix, Mat4::IDENTITY);
    }
}
