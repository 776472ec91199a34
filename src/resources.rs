//! Externally owned GPU objects the renderer binds
//!
//! Pipelines, descriptor sets, uniform buffers and the scene render target are
//! created and owned by the application. The renderer only reads their handles
//! and watches the change tokens to decide when recorded streams went stale.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::traits::RenderTarget;
use crate::backend::types::*;
use crate::error::{RendererError, RendererResult};
use crate::scene::SceneBindings;

/// Logical descriptor set slots shared by every pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorSlot {
    /// View uniforms and statistics.
    Scene = 0,
    /// Per-object matrices, bound with a dynamic offset.
    Object = 1,
    /// Per-chunk meshlet buffers.
    Geometry = 2,
}

impl DescriptorSlot {
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Pipeline layout plus the descriptor sets bound through it.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorContainer {
    pub layout: PipelineLayoutHandle,
    pub scene: Option<DescriptorSetHandle>,
    pub object: Option<DescriptorSetHandle>,
    /// Indexed by chunk.
    pub geometry: Vec<DescriptorSetHandle>,
}

impl DescriptorContainer {
    pub fn new(layout: PipelineLayoutHandle) -> Self {
        Self {
            layout,
            scene: None,
            object: None,
            geometry: Vec::new(),
        }
    }

    pub fn with_scene(mut self, set: DescriptorSetHandle) -> Self {
        self.scene = Some(set);
        self
    }

    pub fn with_object(mut self, set: DescriptorSetHandle) -> Self {
        self.object = Some(set);
        self
    }

    pub fn with_geometry_sets(mut self, sets: Vec<DescriptorSetHandle>) -> Self {
        self.geometry = sets;
        self
    }

    /// Look up the set bound at `slot`. `chunk` selects among the per-chunk sets.
    pub fn set(&self, slot: DescriptorSlot, chunk: Option<u32>) -> RendererResult<DescriptorSetHandle> {
        let set = match slot {
            DescriptorSlot::Scene => self.scene,
            DescriptorSlot::Object => self.object,
            DescriptorSlot::Geometry => {
                chunk.and_then(|chunk| self.geometry.get(chunk as usize).copied())
            }
        };
        set.ok_or(RendererError::MissingDescriptorSet { slot, chunk })
    }
}

/// A pipeline together with the container its descriptor sets come from.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawSetup {
    pub pipeline: PipelineHandle,
    pub bind_point: PipelineBindPoint,
    pub container: DescriptorContainer,
}

impl DrawSetup {
    pub fn graphics(pipeline: PipelineHandle, container: DescriptorContainer) -> Self {
        Self {
            pipeline,
            bind_point: PipelineBindPoint::Graphics,
            container,
        }
    }

    pub fn compute(pipeline: PipelineHandle, container: DescriptorContainer) -> Self {
        Self {
            pipeline,
            bind_point: PipelineBindPoint::Compute,
            container,
        }
    }
}

/// The three pipelines the renderer records with.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawSetups {
    pub standard: DrawSetup,
    /// Compute culling pipeline; only used by the culled strategy.
    pub cull: Option<DrawSetup>,
    pub bbox: DrawSetup,
}

/// Buffers written by the per-frame primary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonBuffers {
    pub view: BufferHandle,
    pub stats: BufferHandle,
    /// Host-visible copy target for the statistics.
    pub stats_readback: BufferHandle,
}

/// Versions of the objects recorded streams depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeTokens {
    pub framebuffer: u64,
    pub pipeline: u64,
}

/// Everything the renderer reads from the application each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSet {
    pub setups: DrawSetups,
    pub scene: SceneBindings,
    pub common: CommonBuffers,
    pub target: RenderTarget,
    tokens: ChangeTokens,
}

impl ResourceSet {
    pub fn new(
        setups: DrawSetups,
        scene: SceneBindings,
        common: CommonBuffers,
        target: RenderTarget,
    ) -> Self {
        Self {
            setups,
            scene,
            common,
            target,
            tokens: ChangeTokens::default(),
        }
    }

    pub fn tokens(&self) -> ChangeTokens {
        self.tokens
    }

    /// Replace the render target after a resize and bump the framebuffer token.
    pub fn set_target(&mut self, target: RenderTarget) {
        self.target = target;
        self.notify_framebuffer_changed();
    }

    /// Replace the pipelines after a reload and bump the pipeline token.
    pub fn set_setups(&mut self, setups: DrawSetups) {
        self.setups = setups;
        self.notify_pipeline_changed();
    }

    pub fn notify_framebuffer_changed(&mut self) {
        self.tokens.framebuffer += 1;
        log::debug!("framebuffer token -> {}", self.tokens.framebuffer);
    }

    pub fn notify_pipeline_changed(&mut self) {
        self.tokens.pipeline += 1;
        log::debug!("pipeline token -> {}", self.tokens.pipeline);
    }
}

/// Resources shared between the application and the renderer.
pub type SharedResources = Arc<RwLock<ResourceSet>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> DescriptorContainer {
        DescriptorContainer::new(PipelineLayoutHandle::from_raw(1))
            .with_scene(DescriptorSetHandle::from_raw(10))
            .with_geometry_sets(vec![
                DescriptorSetHandle::from_raw(20),
                DescriptorSetHandle::from_raw(21),
            ])
    }

    #[test]
    fn test_descriptor_lookup() {
        let container = container();
        assert_eq!(
            container.set(DescriptorSlot::Scene, None),
            Ok(DescriptorSetHandle::from_raw(10))
        );
        assert_eq!(
            container.set(DescriptorSlot::Geometry, Some(1)),
            Ok(DescriptorSetHandle::from_raw(21))
        );
    }

    #[test]
    fn test_missing_descriptor_sets() {
        let container = container();
        assert_eq!(
            container.set(DescriptorSlot::Object, None),
            Err(RendererError::MissingDescriptorSet {
                slot: DescriptorSlot::Object,
                chunk: None
            })
        );
        assert!(container.set(DescriptorSlot::Geometry, Some(2)).is_err());
        assert!(container.set(DescriptorSlot::Geometry, None).is_err());
    }

    #[test]
    fn test_slot_indices() {
        assert_eq!(DescriptorSlot::Scene.index(), 0);
        assert_eq!(DescriptorSlot::Object.index(), 1);
        assert_eq!(DescriptorSlot::Geometry.index(), 2);
    }
}
