//! Backend abstraction layer
//!
//! Provides the [`GpuBackend`] trait and the command types both backends consume.
//!
//! - `dummy`: no-op backend that journals every call, used by the tests
//! - `vulkan`: native Vulkan backend via ash

pub mod traits;
pub mod types;

pub mod dummy;

#[cfg(all(feature = "vulkan-backend", not(target_arch = "wasm32")))]
pub mod vulkan;

pub use traits::*;
pub use types::*;

pub use dummy::DummyBackend;
