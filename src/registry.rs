//! Registry of the available renderer types
//!
//! Entries are registered explicitly at startup. The application picks a
//! renderer by name or takes the highest priority one the device supports.

use crate::backend::traits::{DeviceLimits, GpuBackend};
use crate::config::DrawStrategy;
use crate::renderer::{FrameRenderer, MeshletRenderer};

/// Name of the direct indexed renderer.
pub const STANDARD_RENDERER: &str = "VK standard";
/// Name of the compute culling renderer.
pub const COMPUTE_CULL_RENDERER: &str = "VK compute cull";

/// One renderer type.
pub struct RendererEntry<B: GpuBackend> {
    pub name: &'static str,
    /// Higher wins when several entries are available.
    pub priority: u32,
    pub is_available: fn(&DeviceLimits) -> bool,
    pub create: fn() -> Box<dyn FrameRenderer<B>>,
}

impl<B: GpuBackend> Clone for RendererEntry<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: GpuBackend> Copy for RendererEntry<B> {}

impl<B: GpuBackend> std::fmt::Debug for RendererEntry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

fn always_available(_: &DeviceLimits) -> bool {
    true
}

fn supports_multi_draw_indirect(limits: &DeviceLimits) -> bool {
    limits.multi_draw_indirect
}

fn create_standard<B: GpuBackend + 'static>() -> Box<dyn FrameRenderer<B>> {
    Box::new(MeshletRenderer::with_strategy(
        STANDARD_RENDERER,
        DrawStrategy::DirectIndexed,
    ))
}

fn create_compute_cull<B: GpuBackend + 'static>() -> Box<dyn FrameRenderer<B>> {
    Box::new(MeshletRenderer::with_strategy(
        COMPUTE_CULL_RENDERER,
        DrawStrategy::ComputeCulled,
    ))
}

/// Registry of renderer types.
pub struct RendererRegistry<B: GpuBackend> {
    entries: Vec<RendererEntry<B>>,
}

impl<B: GpuBackend> std::fmt::Debug for RendererRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

impl<B: GpuBackend + 'static> Default for RendererRegistry<B> {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl<B: GpuBackend + 'static> RendererRegistry<B> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry with the built-in renderer types.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(RendererEntry {
            name: STANDARD_RENDERER,
            priority: 10,
            is_available: always_available,
            create: create_standard::<B>,
        });
        registry.register(RendererEntry {
            name: COMPUTE_CULL_RENDERER,
            priority: 12,
            is_available: supports_multi_draw_indirect,
            create: create_compute_cull::<B>,
        });
        registry
    }

    /// Add an entry. An entry with the same name is replaced.
    pub fn register(&mut self, entry: RendererEntry<B>) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            log::warn!("replacing renderer registration '{}'", entry.name);
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[RendererEntry<B>] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&RendererEntry<B>> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries supported by a device with `limits`, highest priority first.
    pub fn available(&self, limits: &DeviceLimits) -> Vec<&RendererEntry<B>> {
        let mut available: Vec<_> = self
            .entries
            .iter()
            .filter(|e| (e.is_available)(limits))
            .collect();
        available.sort_by(|a, b| b.priority.cmp(&a.priority));
        available
    }

    /// Instantiate the named renderer if the device supports it.
    pub fn create(&self, name: &str, limits: &DeviceLimits) -> Option<Box<dyn FrameRenderer<B>>> {
        let entry = self.find(name)?;
        if !(entry.is_available)(limits) {
            log::warn!("renderer '{}' is not supported by this device", name);
            return None;
        }
        log::info!("selected renderer '{}'", entry.name);
        Some((entry.create)())
    }

    /// Instantiate the highest priority renderer the device supports.
    pub fn create_best(&self, limits: &DeviceLimits) -> Option<Box<dyn FrameRenderer<B>>> {
        let entry = self.available(limits).into_iter().next()?;
        log::info!(
            "selected renderer '{}' (priority {})",
            entry.name,
            entry.priority
        );
        Some((entry.create)())
    }
}
