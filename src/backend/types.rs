//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Create a handle from a raw backend value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Get the raw backend value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a graphics or compute pipeline
    PipelineHandle
);
define_handle!(
    /// Handle to a pipeline layout (descriptor set layouts + push constant ranges)
    PipelineLayoutHandle
);
define_handle!(
    /// Handle to a descriptor set
    DescriptorSetHandle
);
define_handle!(
    /// Handle to a render pass object
    RenderPassHandle
);
define_handle!(
    /// Handle to a framebuffer
    FramebufferHandle
);
define_handle!(
    /// Handle to a command pool
    CommandPoolHandle
);
define_handle!(
    /// Handle to a primary or secondary command buffer
    CommandBufferHandle
);
define_handle!(
    /// Identifier of a queue submission, increasing with every submit
    SubmissionId
);

/// A byte range inside a buffer, the equivalent of a descriptor buffer info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub range: u64,
}

impl BufferRange {
    pub const fn new(buffer: BufferHandle, offset: u64, range: u64) -> Self {
        Self {
            buffer,
            offset,
            range,
        }
    }

    /// Offset in units of `element_size`.
    ///
    /// Callers validate alignment beforehand; the division truncates.
    pub fn element_offset(&self, element_size: u64) -> u64 {
        self.offset / element_size
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Pipeline bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

bitflags! {
    /// Pipeline stages used as barrier scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const DRAW_INDIRECT = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const GEOMETRY_SHADER = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const COMPUTE_SHADER = 1 << 4;
        const TRANSFER = 1 << 5;
    }
}

bitflags! {
    /// Memory access types used as barrier scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const SHADER_READ = 1 << 1;
        const SHADER_WRITE = 1 << 2;
        const TRANSFER_READ = 1 << 3;
        const TRANSFER_WRITE = 1 << 4;
    }
}

bitflags! {
    /// Shader stages a push constant range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const GEOMETRY = 1 << 1;
        const FRAGMENT = 1 << 2;
        const COMPUTE = 1 << 3;
    }
}

/// A global memory barrier between two pipeline scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_stages: PipelineStages,
    pub dst_access: AccessFlags,
}

impl MemoryBarrier {
    /// Transfer writes (buffer updates) made visible to shader reads in `dst_stages`.
    pub fn transfer_to_shader_read(dst_stages: PipelineStages) -> Self {
        Self {
            src_stages: PipelineStages::TRANSFER,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_stages,
            dst_access: AccessFlags::SHADER_READ,
        }
    }

    /// Compute shader writes made visible to indirect command reads.
    pub fn compute_to_indirect() -> Self {
        Self {
            src_stages: PipelineStages::COMPUTE_SHADER,
            src_access: AccessFlags::SHADER_WRITE,
            dst_stages: PipelineStages::DRAW_INDIRECT,
            dst_access: AccessFlags::INDIRECT_COMMAND_READ,
        }
    }

    /// Shader writes made visible to a following transfer read.
    pub fn shader_to_transfer_read(src_stages: PipelineStages) -> Self {
        Self {
            src_stages,
            src_access: AccessFlags::SHADER_WRITE,
            dst_stages: PipelineStages::TRANSFER,
            dst_access: AccessFlags::TRANSFER_READ,
        }
    }
}

/// 2D extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Clear values for the color and depth-stencil attachments of the scene pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.2, 0.2, 0.2, 0.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Layout of one indexed indirect draw, as consumed by `vkCmdDrawIndexedIndirect`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

const_assert_eq!(std::mem::size_of::<DrawIndexedIndirectCommand>(), 20);

impl DrawIndexedIndirectCommand {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` of zero or one leaves the value untouched.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(304, 1), 304);
    }

    #[test]
    fn test_index_format_size() {
        assert_eq!(IndexFormat::Uint16.size(), 2);
        assert_eq!(IndexFormat::Uint32.size(), 4);
    }

    #[test]
    fn test_element_offset() {
        let range = BufferRange::new(BufferHandle::from_raw(1), 64, 128);
        assert_eq!(range.element_offset(16), 4);
        assert_eq!(range.element_offset(4), 16);
    }

    #[test]
    fn test_barrier_presets() {
        let barrier = MemoryBarrier::compute_to_indirect();
        assert_eq!(barrier.src_stages, PipelineStages::COMPUTE_SHADER);
        assert_eq!(barrier.dst_access, AccessFlags::INDIRECT_COMMAND_READ);

        let barrier = MemoryBarrier::transfer_to_shader_read(
            PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER,
        );
        assert_eq!(barrier.src_access, AccessFlags::TRANSFER_WRITE);
        assert!(!barrier.dst_stages.contains(PipelineStages::GEOMETRY_SHADER));
    }
}
