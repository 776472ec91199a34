//! Core backend abstraction traits
//!
//! The recorder produces backend-agnostic [`Command`] lists; a [`GpuBackend`]
//! owns the actual command pools and buffers and encodes those lists into them.

use std::time::Duration;

use crate::backend::types::*;
use crate::error::BackendResult;

/// Level of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

/// How a command buffer is begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferUsage {
    /// Primary buffer recorded once and submitted once.
    OneTimeSubmit,
    /// Secondary buffer reused across frames, executed entirely inside the
    /// given render pass / framebuffer.
    RenderPassContinue {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
    },
}

/// Parameters of the scene render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent2d,
}

/// Device properties the recorder has to respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of dynamic uniform buffer offsets.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Whether `draw_count > 1` is supported for indirect draws.
    pub multi_draw_indirect: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            multi_draw_indirect: true,
        }
    }
}

/// A single recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    },
    BindDescriptorSet {
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        slot: u32,
        set: DescriptorSetHandle,
        dynamic_offset: Option<u32>,
    },
    /// Binds position and attribute streams to bindings 0 and 1.
    BindVertexBuffers {
        buffers: [BufferHandle; 2],
        offsets: [u64; 2],
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    /// Full-target viewport and scissor.
    SetViewportScissor { extent: Extent2d },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        values: [u32; 4],
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    PipelineBarrier(MemoryBarrier),
    /// Inline buffer update; the payload must be a multiple of 4 bytes and at most 64 KiB.
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// Begins the scene pass with secondary-buffer contents.
    BeginRenderPass {
        target: RenderTarget,
        clear: Option<ClearValues>,
    },
    ExecuteCommands(Vec<CommandBufferHandle>),
    EndRenderPass,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::BindDescriptorSet { .. } => "bind_descriptor_set",
            Command::BindVertexBuffers { .. } => "bind_vertex_buffers",
            Command::BindIndexBuffer { .. } => "bind_index_buffer",
            Command::SetViewportScissor { .. } => "set_viewport_scissor",
            Command::PushConstants { .. } => "push_constants",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::DrawIndexedIndirect { .. } => "draw_indexed_indirect",
            Command::Dispatch { .. } => "dispatch",
            Command::PipelineBarrier(_) => "pipeline_barrier",
            Command::UpdateBuffer { .. } => "update_buffer",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::ExecuteCommands(_) => "execute_commands",
            Command::EndRenderPass => "end_render_pass",
        }
    }
}

/// An ordered list of commands, recorded once and encoded into a command buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn append(&mut self, other: &CommandList) {
        self.commands.extend_from_slice(&other.commands);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of commands matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Index of the first command matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Command) -> bool) -> Option<usize> {
        self.commands.iter().position(predicate)
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Main GPU backend trait
///
/// Command pool, command buffer and submission management plus command encoding.
/// Object creation (buffers, pipelines, descriptor sets, render passes) belongs to
/// the surrounding application; the backend only consumes handles to them.
pub trait GpuBackend {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Device properties relevant to recording.
    fn limits(&self) -> DeviceLimits;

    /// Create a command pool on the graphics queue family.
    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle>;

    /// Destroy a command pool. All buffers allocated from it must be freed first.
    fn destroy_command_pool(&mut self, pool: CommandPoolHandle);

    /// Allocate a command buffer from `pool`.
    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle>;

    /// Return command buffers to `pool`.
    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);

    /// Begin recording.
    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()>;

    /// Encode a single command.
    fn encode(&mut self, cmd: CommandBufferHandle, command: &Command) -> BackendResult<()>;

    /// Encode every command of `list` in order.
    fn encode_list(&mut self, cmd: CommandBufferHandle, list: &CommandList) -> BackendResult<()> {
        for command in list {
            self.encode(cmd, command)?;
        }
        Ok(())
    }

    /// Finish recording.
    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    /// Submit a primary command buffer to the graphics queue.
    fn submit(&mut self, cmd: CommandBufferHandle) -> BackendResult<SubmissionId>;

    /// Non-blocking completion check.
    fn is_complete(&mut self, submission: SubmissionId) -> bool;

    /// Block until `submission` has finished executing or `timeout` elapsed.
    fn wait(&mut self, submission: SubmissionId, timeout: Duration) -> BackendResult<()>;
}
