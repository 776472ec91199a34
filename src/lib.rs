//! Meshlet Renderer - per-frame command generation for a cluster-based renderer
//!
//! Turns a sorted list of draw items into GPU command buffers:
//! - **Recorder**: walks the draw list once, binding only what changes, in
//!   one of two strategies (direct indexed draws, or compute-culled meshlets
//!   consumed through indirect draws)
//! - **Cache**: the recorded secondary streams are reused until the
//!   framebuffer or pipelines change
//! - **Sequencer**: records and submits the per-frame primary buffer
//!   (uniform upload, barriers, render pass, statistics readback)
//! - **Renderer**: lifecycle and ownership of the command pool and buffers
//!
//! Two backends are provided:
//! - **Dummy**: journals every command, used for testing
//! - **Vulkan**: records through ash (native only, feature `vulkan-backend`)

pub mod arena;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod profiling;
pub mod recorder;
pub mod registry;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod sequencer;

pub use arena::{CommandArena, CommandStream, StreamSet};
pub use backend::{Command, CommandList, DeviceLimits, DummyBackend, GpuBackend};
pub use cache::ChangeTracker;
pub use config::{DrawStrategy, FrameConfig, RendererConfig, SceneData};
pub use error::{BackendError, RendererError, RendererResult};
pub use recorder::{CommandRecorder, RecordedStreams};
pub use registry::{RendererEntry, RendererRegistry};
pub use renderer::{FrameRenderer, LifecycleState, MeshletRenderer};
pub use resources::{
    ChangeTokens, CommonBuffers, DescriptorContainer, DescriptorSlot, DrawSetup, DrawSetups,
    ResourceSet, SharedResources,
};
pub use scene::{CullStats, DrawItem, DrawList, GeometryBinding, SceneBindings};
pub use sequencer::FrameSequencer;

#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub use backend::vulkan::VulkanBackend;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once after installing a logger.
pub fn init() {
    log::info!("RedLilium Meshlet v{} initialized", VERSION);
}
