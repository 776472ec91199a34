//! Renderer lifecycle
//!
//! A [`MeshletRenderer`] goes through `Uninitialized -> Initialized ->
//! Deinitialized`. `init` validates the scene, creates the command pool and
//! records the streams right away; `draw` submits one frame; `deinit` waits
//! for the GPU and releases every command buffer and the pool.

use std::sync::Arc;

use crate::arena::CommandArena;
use crate::backend::traits::{DeviceLimits, GpuBackend};
use crate::backend::types::SubmissionId;
use crate::config::{DrawStrategy, FrameConfig, RendererConfig};
use crate::error::{RendererError, RendererResult};
use crate::resources::{DescriptorSlot, ResourceSet, SharedResources};
use crate::scene::DrawList;
use crate::sequencer::FrameSequencer;

/// Lifecycle state of a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    /// Terminal; a deinitialized renderer cannot be initialized again.
    Deinitialized,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Deinitialized => "deinitialized",
        }
    }
}

/// A renderer that turns a draw list into submitted frames.
pub trait FrameRenderer<B: GpuBackend> {
    /// Display name, as registered.
    fn name(&self) -> &'static str;

    fn state(&self) -> LifecycleState;

    /// Create the command pool and record the streams for `list`.
    fn init(
        &mut self,
        backend: &mut B,
        list: Arc<DrawList>,
        resources: SharedResources,
        config: RendererConfig,
    ) -> RendererResult<()>;

    /// Release every GPU object owned by the renderer.
    fn deinit(&mut self, backend: &mut B) -> RendererResult<()>;

    /// Record and submit one frame.
    fn draw(&mut self, backend: &mut B, frame: &FrameConfig) -> RendererResult<SubmissionId>;
}

/// Renderer bound to the state it was initialized with.
#[derive(Debug)]
struct Bound {
    list: Arc<DrawList>,
    resources: SharedResources,
    config: RendererConfig,
    arena: CommandArena,
}

/// Meshlet renderer recording through a [`GpuBackend`].
#[derive(Debug)]
pub struct MeshletRenderer {
    name: &'static str,
    /// Strategy pinned by the renderer type, overriding the config.
    strategy: Option<DrawStrategy>,
    state: LifecycleState,
    sequencer: FrameSequencer,
    bound: Option<Bound>,
}

impl Default for MeshletRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshletRenderer {
    /// Renderer using the strategy of the config it is initialized with.
    pub fn new() -> Self {
        Self {
            name: "meshlet",
            strategy: None,
            state: LifecycleState::Uninitialized,
            sequencer: FrameSequencer::new(),
            bound: None,
        }
    }

    /// Renderer always using `strategy`.
    pub fn with_strategy(name: &'static str, strategy: DrawStrategy) -> Self {
        Self {
            name,
            strategy: Some(strategy),
            ..Self::new()
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn sequencer(&self) -> &FrameSequencer {
        &self.sequencer
    }

    pub fn arena(&self) -> Option<&CommandArena> {
        self.bound.as_ref().map(|bound| &bound.arena)
    }

    /// Effective configuration, available once initialized.
    pub fn config(&self) -> Option<&RendererConfig> {
        self.bound.as_ref().map(|bound| &bound.config)
    }

    fn expect_state(&self, expected: LifecycleState) -> RendererResult<()> {
        debug_assert_eq!(
            self.state,
            expected,
            "renderer used in state {}",
            self.state.name()
        );
        if self.state != expected {
            return Err(RendererError::InvalidState {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }
}

/// Checks performed once on init, before anything is recorded.
fn validate_resources(
    resources: &ResourceSet,
    list: &DrawList,
    limits: &DeviceLimits,
    strategy: DrawStrategy,
) -> RendererResult<()> {
    resources.scene.validate(limits)?;

    let available = resources.scene.geometries.len();
    for (item, draw) in list.items().iter().enumerate() {
        if draw.geometry_index as usize >= available {
            return Err(RendererError::GeometryOutOfRange {
                item,
                geometry: draw.geometry_index,
                available,
            });
        }
        let index_size = draw.index_format.size();
        if draw.index_range.offset % index_size != 0 {
            return Err(RendererError::MisalignedIndexRange {
                item,
                offset: draw.index_range.offset,
                index_size,
            });
        }
    }

    let mut chunked = vec![&resources.setups.bbox];
    if strategy == DrawStrategy::ComputeCulled {
        let cull = resources.setups.cull.as_ref().ok_or_else(|| {
            RendererError::InvalidConfig("compute culling requires a cull pipeline".into())
        })?;
        chunked.push(cull);

        let required = list.total_meshlets();
        let capacity = resources.scene.culled_capacity();
        if required > capacity {
            return Err(RendererError::IndirectOutputTooSmall { capacity, required });
        }
    }
    for setup in chunked {
        for chunk in 0..resources.scene.chunk_count() {
            setup.container.set(DescriptorSlot::Geometry, Some(chunk))?;
        }
    }
    Ok(())
}

impl<B: GpuBackend> FrameRenderer<B> for MeshletRenderer {
    fn name(&self) -> &'static str {
        MeshletRenderer::name(self)
    }

    fn state(&self) -> LifecycleState {
        MeshletRenderer::state(self)
    }

    fn init(
        &mut self,
        backend: &mut B,
        list: Arc<DrawList>,
        resources: SharedResources,
        config: RendererConfig,
    ) -> RendererResult<()> {
        self.expect_state(LifecycleState::Uninitialized)?;

        let config = match self.strategy {
            Some(strategy) => config.with_strategy(strategy),
            None => config,
        };
        config.validate()?;

        let mut arena = {
            let guard = resources.read();
            validate_resources(&guard, &list, &backend.limits(), config.strategy)?;

            let mut arena = CommandArena::new(backend)?;
            if let Err(err) =
                self.sequencer
                    .ensure_streams(backend, &mut arena, &list, &guard, &config)
            {
                if let Err((_, teardown)) = arena.teardown(backend, config.fence_timeout) {
                    log::warn!("releasing the command pool after a failed init: {}", teardown);
                }
                return Err(err);
            }
            arena
        };
        arena.retire(backend);

        log::info!(
            "{} renderer initialized on {}: {} items, {:?}",
            self.name,
            backend.name(),
            list.len(),
            config.strategy
        );
        self.bound = Some(Bound {
            list,
            resources,
            config,
            arena,
        });
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    fn deinit(&mut self, backend: &mut B) -> RendererResult<()> {
        self.expect_state(LifecycleState::Initialized)?;

        if let Some(mut bound) = self.bound.take() {
            if let Err((arena, err)) = bound.arena.teardown(backend, bound.config.fence_timeout) {
                // still initialized; deinit can be retried
                bound.arena = arena;
                self.bound = Some(bound);
                return Err(err);
            }
        }
        self.state = LifecycleState::Deinitialized;
        log::info!(
            "{} renderer deinitialized after {} frames",
            self.name,
            self.sequencer.frame_index()
        );
        Ok(())
    }

    fn draw(&mut self, backend: &mut B, frame: &FrameConfig) -> RendererResult<SubmissionId> {
        self.expect_state(LifecycleState::Initialized)?;
        let bound = self.bound.as_mut().ok_or(RendererError::InvalidState {
            expected: LifecycleState::Initialized.name(),
            found: "unbound",
        })?;

        let resources = bound.resources.read();
        self.sequencer.submit_frame(
            backend,
            &mut bound.arena,
            &bound.list,
            &resources,
            &bound.config,
            frame,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_state_names() {
        assert_eq!(LifecycleState::Uninitialized.name(), "uninitialized");
        assert_eq!(LifecycleState::Deinitialized.name(), "deinitialized");
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "renderer used in state"))]
    fn test_draw_before_init() {
        let mut backend = DummyBackend::new();
        let mut renderer = MeshletRenderer::new();
        let result = renderer.draw(&mut backend, &FrameConfig::default());
        assert!(matches!(
            result,
            Err(RendererError::InvalidState {
                expected: "initialized",
                found: "uninitialized"
            })
        ));
    }

    #[test]
    fn test_pinned_strategy() {
        let renderer = MeshletRenderer::with_strategy("VK compute cull", DrawStrategy::ComputeCulled);
        assert_eq!(renderer.name(), "VK compute cull");
        assert_eq!(renderer.state(), LifecycleState::Uninitialized);
        assert_eq!(renderer.strategy, Some(DrawStrategy::ComputeCulled));
        assert!(renderer.config().is_none());
    }
}
