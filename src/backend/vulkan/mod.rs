//! Vulkan backend implementation using ash
//!
//! The backend does not create the device or any resource: the application
//! hands over an `ash::Device` and graphics queue, and imports the buffers,
//! pipelines, descriptor sets and render targets it created. Imported objects
//! are referred to by typed handles; the backend owns only the command pools,
//! command buffers and submission fences it creates itself.

mod command;
mod conversion;

pub use conversion::convert_limits;

use std::collections::HashMap;
use std::time::Duration;

use ash::vk;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{BackendError, BackendResult};
use conversion::*;

/// Vulkan objects behind a family of typed handles.
struct HandleMap<T> {
    next_id: u64,
    objects: HashMap<u64, T>,
}

impl<T: Copy> HandleMap<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            objects: HashMap::new(),
        }
    }

    fn insert(&mut self, object: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    fn get(&self, id: u64, kind: &str) -> BackendResult<T> {
        self.objects
            .get(&id)
            .copied()
            .ok_or_else(|| BackendError::UnknownHandle(format!("{} {}", kind, id)))
    }

    fn remove(&mut self, id: u64) -> Option<T> {
        self.objects.remove(&id)
    }

    fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.objects.drain().map(|(_, object)| object)
    }
}

/// Imported render pass and framebuffer of a render target.
#[derive(Clone, Copy)]
struct VkTarget {
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    limits: DeviceLimits,

    // Imported resources
    buffers: HandleMap<vk::Buffer>,
    pipelines: HandleMap<vk::Pipeline>,
    pipeline_layouts: HandleMap<vk::PipelineLayout>,
    descriptor_sets: HandleMap<vk::DescriptorSet>,
    render_passes: HandleMap<vk::RenderPass>,
    framebuffers: HandleMap<vk::Framebuffer>,

    // Owned objects
    command_pools: HandleMap<vk::CommandPool>,
    command_buffers: HandleMap<vk::CommandBuffer>,
    submissions: HandleMap<vk::Fence>,
}

impl VulkanBackend {
    /// Wrap an existing device and its graphics queue.
    pub fn new(
        device: ash::Device,
        graphics_queue: vk::Queue,
        graphics_queue_family: u32,
        limits: DeviceLimits,
    ) -> Self {
        log::info!(
            "Vulkan backend on queue family {} (uniform offset alignment {}, multi-draw-indirect {})",
            graphics_queue_family,
            limits.min_uniform_buffer_offset_alignment,
            limits.multi_draw_indirect
        );
        Self {
            device,
            graphics_queue,
            graphics_queue_family,
            limits,
            buffers: HandleMap::new(),
            pipelines: HandleMap::new(),
            pipeline_layouts: HandleMap::new(),
            descriptor_sets: HandleMap::new(),
            render_passes: HandleMap::new(),
            framebuffers: HandleMap::new(),
            command_pools: HandleMap::new(),
            command_buffers: HandleMap::new(),
            submissions: HandleMap::new(),
        }
    }

    /// Get the Vulkan device
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn import_buffer(&mut self, buffer: vk::Buffer) -> BufferHandle {
        BufferHandle::from_raw(self.buffers.insert(buffer))
    }

    pub fn import_pipeline(&mut self, pipeline: vk::Pipeline) -> PipelineHandle {
        PipelineHandle::from_raw(self.pipelines.insert(pipeline))
    }

    pub fn import_pipeline_layout(&mut self, layout: vk::PipelineLayout) -> PipelineLayoutHandle {
        PipelineLayoutHandle::from_raw(self.pipeline_layouts.insert(layout))
    }

    pub fn import_descriptor_set(&mut self, set: vk::DescriptorSet) -> DescriptorSetHandle {
        DescriptorSetHandle::from_raw(self.descriptor_sets.insert(set))
    }

    pub fn import_render_pass(&mut self, render_pass: vk::RenderPass) -> RenderPassHandle {
        RenderPassHandle::from_raw(self.render_passes.insert(render_pass))
    }

    pub fn import_framebuffer(&mut self, framebuffer: vk::Framebuffer) -> FramebufferHandle {
        FramebufferHandle::from_raw(self.framebuffers.insert(framebuffer))
    }

    /// Forget an imported framebuffer, e.g. after the application destroyed it on resize.
    pub fn release_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer.raw());
    }

    fn target(&self, render_pass: RenderPassHandle, framebuffer: FramebufferHandle) -> BackendResult<VkTarget> {
        Ok(VkTarget {
            render_pass: self.render_passes.get(render_pass.raw(), "render pass")?,
            framebuffer: self.framebuffers.get(framebuffer.raw(), "framebuffer")?,
        })
    }

    fn buffer(&self, buffer: BufferHandle) -> BackendResult<vk::Buffer> {
        self.buffers.get(buffer.raw(), "buffer")
    }

    fn layout(&self, layout: PipelineLayoutHandle) -> BackendResult<vk::PipelineLayout> {
        self.pipeline_layouts.get(layout.raw(), "pipeline layout")
    }

    fn fence(&self, submission: SubmissionId) -> BackendResult<vk::Fence> {
        self.submissions.get(submission.raw(), "submission")
    }

    fn release_fence(&mut self, submission: SubmissionId) {
        if let Some(fence) = self.submissions.remove(submission.raw()) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    /// Translate one command into `cmd_*` calls on `cmd`.
    fn record(&self, cmd: vk::CommandBuffer, command: &Command) -> BackendResult<()> {
        let device = &self.device;
        match command {
            Command::BindPipeline {
                bind_point,
                pipeline,
            } => {
                let pipeline = self.pipelines.get(pipeline.raw(), "pipeline")?;
                unsafe { device.cmd_bind_pipeline(cmd, convert_bind_point(*bind_point), pipeline) };
            }
            Command::BindDescriptorSet {
                bind_point,
                layout,
                slot,
                set,
                dynamic_offset,
            } => {
                let layout = self.layout(*layout)?;
                let set = self.descriptor_sets.get(set.raw(), "descriptor set")?;
                let dynamic_offsets: &[u32] = match dynamic_offset {
                    Some(offset) => std::slice::from_ref(offset),
                    None => &[],
                };
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        convert_bind_point(*bind_point),
                        layout,
                        *slot,
                        &[set],
                        dynamic_offsets,
                    )
                };
            }
            Command::BindVertexBuffers { buffers, offsets } => {
                let buffers = [self.buffer(buffers[0])?, self.buffer(buffers[1])?];
                unsafe { device.cmd_bind_vertex_buffers(cmd, 0, &buffers, offsets) };
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                let buffer = self.buffer(*buffer)?;
                unsafe {
                    device.cmd_bind_index_buffer(cmd, buffer, *offset, convert_index_format(*format))
                };
            }
            Command::SetViewportScissor { extent } => {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: convert_extent(*extent),
                };
                unsafe {
                    device.cmd_set_viewport(cmd, 0, &[viewport]);
                    device.cmd_set_scissor(cmd, 0, &[scissor]);
                }
            }
            Command::PushConstants {
                layout,
                stages,
                offset,
                values,
            } => {
                let layout = self.layout(*layout)?;
                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        layout,
                        convert_shader_stages(*stages),
                        *offset,
                        bytemuck::cast_slice(values),
                    )
                };
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance)
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                )
            },
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            } => {
                let buffer = self.buffer(*buffer)?;
                unsafe { device.cmd_draw_indexed_indirect(cmd, buffer, *offset, *draw_count, *stride) };
            }
            Command::Dispatch { x, y, z } => unsafe { device.cmd_dispatch(cmd, *x, *y, *z) },
            Command::PipelineBarrier(barrier) => {
                let memory_barrier = vk::MemoryBarrier::default()
                    .src_access_mask(convert_access(barrier.src_access))
                    .dst_access_mask(convert_access(barrier.dst_access));
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        convert_pipeline_stages(barrier.src_stages),
                        convert_pipeline_stages(barrier.dst_stages),
                        vk::DependencyFlags::empty(),
                        &[memory_barrier],
                        &[],
                        &[],
                    )
                };
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let buffer = self.buffer(*buffer)?;
                unsafe { device.cmd_update_buffer(cmd, buffer, *offset, data) };
            }
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe { device.cmd_copy_buffer(cmd, self.buffer(*src)?, self.buffer(*dst)?, &[region]) };
            }
            Command::BeginRenderPass { target, clear } => {
                let vk_target = self.target(target.render_pass, target.framebuffer)?;
                let clear_values = clear.as_ref().map(convert_clear_values);
                let render_area = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: convert_extent(target.extent),
                };
                let mut begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(vk_target.render_pass)
                    .framebuffer(vk_target.framebuffer)
                    .render_area(render_area);
                if let Some(clear_values) = clear_values.as_ref() {
                    begin_info = begin_info.clear_values(clear_values);
                }
                unsafe {
                    device.cmd_begin_render_pass(
                        cmd,
                        &begin_info,
                        vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
                    )
                };
            }
            Command::ExecuteCommands(secondaries) => {
                let secondaries = secondaries
                    .iter()
                    .map(|s| self.command_buffers.get(s.raw(), "command buffer"))
                    .collect::<BackendResult<Vec<_>>>()?;
                unsafe { device.cmd_execute_commands(cmd, &secondaries) };
            }
            Command::EndRenderPass => unsafe { device.cmd_end_render_pass(cmd) },
        }
        Ok(())
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle> {
        let pool = command::create_command_pool(&self.device, self.graphics_queue_family)?;
        Ok(CommandPoolHandle::from_raw(self.command_pools.insert(pool)))
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        match self.command_pools.remove(pool.raw()) {
            Some(pool) => unsafe { self.device.destroy_command_pool(pool, None) },
            None => log::warn!("destroying unknown command pool {:?}", pool),
        }
    }

    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        let pool = self.command_pools.get(pool.raw(), "command pool")?;
        let cmd = command::allocate_command_buffer(&self.device, pool, level)?;
        Ok(CommandBufferHandle::from_raw(self.command_buffers.insert(cmd)))
    }

    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let Ok(vk_pool) = self.command_pools.get(pool.raw(), "command pool") else {
            log::warn!("freeing command buffers of unknown pool {:?}", pool);
            return;
        };
        let vk_buffers: Vec<_> = buffers
            .iter()
            .filter_map(|cmd| self.command_buffers.remove(cmd.raw()))
            .collect();
        if !vk_buffers.is_empty() {
            unsafe { self.device.free_command_buffers(vk_pool, &vk_buffers) };
        }
    }

    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        let vk_cmd = self.command_buffers.get(cmd.raw(), "command buffer")?;
        match usage {
            CommandBufferUsage::OneTimeSubmit => command::begin_one_time(&self.device, vk_cmd),
            CommandBufferUsage::RenderPassContinue {
                render_pass,
                framebuffer,
            } => {
                let target = self.target(render_pass, framebuffer)?;
                command::begin_render_pass_continue(
                    &self.device,
                    vk_cmd,
                    target.render_pass,
                    target.framebuffer,
                )
            }
        }
    }

    fn encode(&mut self, cmd: CommandBufferHandle, command: &Command) -> BackendResult<()> {
        let vk_cmd = self.command_buffers.get(cmd.raw(), "command buffer")?;
        self.record(vk_cmd, command)
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let vk_cmd = self.command_buffers.get(cmd.raw(), "command buffer")?;
        unsafe { self.device.end_command_buffer(vk_cmd) }
            .map_err(|e| convert_error(e, BackendError::EndFailed))
    }

    fn submit(&mut self, cmd: CommandBufferHandle) -> BackendResult<SubmissionId> {
        let vk_cmd = self.command_buffers.get(cmd.raw(), "command buffer")?;
        let fence = command::create_fence(&self.device)?;

        let command_buffers = [vk_cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if let Err(e) = unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        } {
            unsafe { self.device.destroy_fence(fence, None) };
            return Err(convert_error(e, BackendError::SubmitFailed));
        }

        Ok(SubmissionId::from_raw(self.submissions.insert(fence)))
    }

    fn is_complete(&mut self, submission: SubmissionId) -> bool {
        let Ok(fence) = self.fence(submission) else {
            // Fences are released once observed complete.
            return true;
        };
        match unsafe { self.device.get_fence_status(fence) } {
            Ok(true) => {
                self.release_fence(submission);
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::error!("fence status of {:?} failed: {:?}", submission, e);
                false
            }
        }
    }

    fn wait(&mut self, submission: SubmissionId, timeout: Duration) -> BackendResult<()> {
        let Ok(fence) = self.fence(submission) else {
            return Ok(());
        };
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => {
                self.release_fence(submission);
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                log::warn!("{:?} still pending after {:?}", submission, timeout);
                Err(BackendError::FenceWaitFailed(format!(
                    "timed out after {:?}",
                    timeout
                )))
            }
            Err(e) => Err(convert_error(e, BackendError::FenceWaitFailed)),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for fence in self.submissions.drain() {
                self.device.destroy_fence(fence, None);
            }
            // Destroying a pool frees its buffers.
            self.command_buffers.drain().for_each(drop);
            for pool in self.command_pools.drain() {
                self.device.destroy_command_pool(pool, None);
            }
        }
    }
}
