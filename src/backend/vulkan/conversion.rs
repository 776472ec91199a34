//! Type conversions between backend-agnostic types and Vulkan types.

use ash::vk;

use crate::backend::traits::{CommandBufferLevel, DeviceLimits};
use crate::backend::types::{
    AccessFlags, ClearValues, Extent2d, IndexFormat, PipelineBindPoint, PipelineStages,
    ShaderStages,
};
use crate::error::BackendError;

/// Convert PipelineStages flags to Vulkan pipeline stage flags.
pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();

    if stages.contains(PipelineStages::DRAW_INDIRECT) {
        result |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if stages.contains(PipelineStages::VERTEX_SHADER) {
        result |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(PipelineStages::GEOMETRY_SHADER) {
        result |= vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::COMPUTE_SHADER) {
        result |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }

    result
}

/// Convert AccessFlags to Vulkan access flags.
pub fn convert_access(access: AccessFlags) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if access.contains(AccessFlags::INDIRECT_COMMAND_READ) {
        result |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if access.contains(AccessFlags::SHADER_READ) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessFlags::SHADER_WRITE) {
        result |= vk::AccessFlags::SHADER_WRITE;
    }
    if access.contains(AccessFlags::TRANSFER_READ) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }

    result
}

/// Convert ShaderStages to Vulkan shader stage flags.
pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();

    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::GEOMETRY) {
        result |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }

    result
}

pub fn convert_index_format(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

pub fn convert_bind_point(bind_point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

pub fn convert_level(level: CommandBufferLevel) -> vk::CommandBufferLevel {
    match level {
        CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
        CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
    }
}

pub fn convert_extent(extent: Extent2d) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

/// Color attachment 0 and depth-stencil attachment 1.
pub fn convert_clear_values(clear: &ClearValues) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear.color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: clear.depth,
                stencil: clear.stencil,
            },
        },
    ]
}

/// Device limits relevant to recording.
pub fn convert_limits(
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
) -> DeviceLimits {
    DeviceLimits {
        min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
        multi_draw_indirect: features.multi_draw_indirect == vk::TRUE,
    }
}

/// Map a Vulkan error to a backend error, `context` naming the failed call.
pub fn convert_error(result: vk::Result, context: impl FnOnce(String) -> BackendError) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => context(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_pipeline_stages() {
        let stages = PipelineStages::VERTEX_SHADER | PipelineStages::COMPUTE_SHADER;
        assert_eq!(
            convert_pipeline_stages(stages),
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(
            convert_pipeline_stages(PipelineStages::empty()),
            vk::PipelineStageFlags::empty()
        );
    }

    #[test]
    fn test_convert_access() {
        assert_eq!(
            convert_access(AccessFlags::SHADER_WRITE | AccessFlags::TRANSFER_READ),
            vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_READ
        );
    }

    #[test]
    fn test_convert_index_format() {
        assert_eq!(convert_index_format(IndexFormat::Uint16), vk::IndexType::UINT16);
        assert_eq!(convert_index_format(IndexFormat::Uint32), vk::IndexType::UINT32);
    }

    #[test]
    fn test_convert_error() {
        assert_eq!(
            convert_error(vk::Result::ERROR_DEVICE_LOST, BackendError::SubmitFailed),
            BackendError::DeviceLost
        );
        assert_eq!(
            convert_error(vk::Result::ERROR_INITIALIZATION_FAILED, BackendError::SubmitFailed),
            BackendError::SubmitFailed("ERROR_INITIALIZATION_FAILED".into())
        );
    }
}
