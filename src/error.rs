//! Error types for the command-generation engine.
//!
//! Backend failures (object creation, submission, fence waits) are reported as
//! [`BackendError`]. Everything the renderer detects itself (bad draw items,
//! misaligned strides, lifecycle misuse) is a [`RendererError`].

use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create command pool: {0}")]
    CommandPoolCreationFailed(String),
    #[error("Failed to allocate command buffer: {0}")]
    CommandBufferAllocationFailed(String),
    #[error("Failed to begin command buffer: {0}")]
    BeginFailed(String),
    #[error("Failed to end command buffer: {0}")]
    EndFailed(String),
    #[error("Failed to submit command buffer: {0}")]
    SubmitFailed(String),
    #[error("Fence wait failed: {0}")]
    FenceWaitFailed(String),
    #[error("Command buffer is not recording: {0}")]
    NotRecording(String),
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by the recorder, the frame sequencer and the renderer lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid renderer state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("draw item {item} references geometry {geometry}, scene has {available}")]
    GeometryOutOfRange {
        item: usize,
        geometry: u32,
        available: usize,
    },

    #[error("draw item {item}: index offset {offset} is not a multiple of the index size {index_size}")]
    MisalignedIndexRange {
        item: usize,
        offset: u64,
        index_size: u64,
    },

    #[error("matrix {matrix} at stride {stride} does not fit a 32-bit dynamic offset")]
    MatrixOffsetOverflow { matrix: u32, stride: u64 },

    #[error("matrix stride {stride} is not a multiple of the device alignment {alignment}")]
    MisalignedMatrixStride { stride: u64, alignment: u64 },

    #[error("geometry {geometry}: {what} offset {offset} is not a multiple of {element_size}")]
    MisalignedGeometry {
        geometry: usize,
        what: &'static str,
        offset: u64,
        element_size: u64,
    },

    #[error("no descriptor set for slot {slot:?} (chunk {chunk:?})")]
    MissingDescriptorSet {
        slot: crate::resources::DescriptorSlot,
        chunk: Option<u32>,
    },

    #[error("culled output holds {capacity} commands, draw list needs {required}")]
    IndirectOutputTooSmall { capacity: u64, required: u64 },

    #[error("buffer update of {size} bytes exceeds the inline update limits")]
    UpdateTooLarge { size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type RendererResult<T> = Result<T, RendererError>;
