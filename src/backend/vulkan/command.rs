//! Vulkan command pool and buffer management.

use ash::vk;

use super::conversion::{convert_error, convert_level};
use crate::backend::traits::CommandBufferLevel;
use crate::error::{BackendError, BackendResult};

/// Create a command pool for graphics operations.
///
/// Buffers are reset individually: primaries on reuse, secondaries when
/// the streams are re-recorded.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> BackendResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| convert_error(e, BackendError::CommandPoolCreationFailed))?;

    Ok(pool)
}

/// Allocate a single command buffer from `pool`.
pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
    level: CommandBufferLevel,
) -> BackendResult<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(convert_level(level))
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| convert_error(e, BackendError::CommandBufferAllocationFailed))?;

    buffers.into_iter().next().ok_or_else(|| {
        BackendError::CommandBufferAllocationFailed("driver returned no command buffer".into())
    })
}

/// Begin a primary buffer that is submitted exactly once.
pub fn begin_one_time(device: &ash::Device, cmd: vk::CommandBuffer) -> BackendResult<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| convert_error(e, BackendError::BeginFailed))
}

/// Begin a secondary buffer executed inside `render_pass`.
///
/// The buffer is reused by consecutive frames, which may be in flight at
/// the same time.
pub fn begin_render_pass_continue(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
) -> BackendResult<()> {
    let inheritance = vk::CommandBufferInheritanceInfo::default()
        .render_pass(render_pass)
        .subpass(0)
        .framebuffer(framebuffer);
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                | vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
        )
        .inheritance_info(&inheritance);

    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| convert_error(e, BackendError::BeginFailed))
}

/// Create an unsignaled fence for one submission.
pub fn create_fence(device: &ash::Device) -> BackendResult<vk::Fence> {
    let fence_info = vk::FenceCreateInfo::default();
    unsafe { device.create_fence(&fence_info, None) }
        .map_err(|e| convert_error(e, BackendError::SubmitFailed))
}
