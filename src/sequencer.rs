//! Per-frame primary command buffer
//!
//! Every frame gets a fresh primary buffer. It uploads the view uniforms and
//! statistics, replays the culling pass (culled strategy), executes the cached
//! secondary streams inside the scene render pass and finally copies the
//! statistics to the readback buffer.

use crate::arena::{CommandArena, StreamSet};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::cache::ChangeTracker;
use crate::config::{FrameConfig, RendererConfig};
use crate::error::{RendererError, RendererResult};
use crate::recorder::CommandRecorder;
use crate::resources::ResourceSet;
use crate::scene::{CullStats, DrawList};

/// Largest payload `vkCmdUpdateBuffer` accepts.
pub const MAX_INLINE_UPDATE: usize = 65536;

/// Inline buffer update, checked against the update size limits.
pub fn update_buffer(buffer: BufferHandle, data: &[u8]) -> RendererResult<Command> {
    if data.len() > MAX_INLINE_UPDATE || data.len() % 4 != 0 {
        return Err(RendererError::UpdateTooLarge { size: data.len() });
    }
    Ok(Command::UpdateBuffer {
        buffer,
        offset: 0,
        data: data.to_vec(),
    })
}

/// Shader stages that read the uploaded uniforms this frame.
pub fn uniform_consumers(meshlet_boxes: bool, culled: bool) -> PipelineStages {
    let mut stages = PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER;
    if meshlet_boxes {
        stages |= PipelineStages::GEOMETRY_SHADER;
    }
    if culled {
        stages |= PipelineStages::COMPUTE_SHADER;
    }
    stages
}

/// Build the primary command list for one frame.
pub fn record_primary(
    frame: &FrameConfig,
    resources: &ResourceSet,
    streams: &StreamSet,
    config: &RendererConfig,
) -> RendererResult<CommandList> {
    let culling = streams.culling.as_ref();
    let stages = uniform_consumers(frame.meshlet_boxes, culling.is_some());

    let mut list = CommandList::with_capacity(10 + culling.map_or(0, CommandList::len));
    list.push(update_buffer(
        resources.common.view,
        bytemuck::bytes_of(&frame.scene),
    )?);
    list.push(update_buffer(
        resources.common.stats,
        bytemuck::bytes_of(&frame.stats),
    )?);
    list.push(Command::PipelineBarrier(MemoryBarrier::transfer_to_shader_read(
        stages,
    )));

    if let Some(culling) = culling {
        list.append(culling);
    }

    let mut secondaries = vec![streams.geometry.buffer];
    if frame.meshlet_boxes {
        secondaries.push(streams.bbox.buffer);
    }
    list.push(Command::BeginRenderPass {
        target: resources.target,
        clear: Some(config.clear),
    });
    list.push(Command::ExecuteCommands(secondaries));
    list.push(Command::EndRenderPass);

    list.push(Command::PipelineBarrier(MemoryBarrier::shader_to_transfer_read(
        stages,
    )));
    list.push(Command::CopyBuffer {
        src: resources.common.stats,
        dst: resources.common.stats_readback,
        src_offset: 0,
        dst_offset: 0,
        size: std::mem::size_of::<CullStats>() as u64,
    });

    Ok(list)
}

/// Decides per frame whether the cached streams can be reused, then records
/// and submits the primary buffer.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    tracker: ChangeTracker,
    frame_index: u64,
    rebuilds: u64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Number of frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Number of times the streams were recorded.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Re-record the streams if the resources changed since the last recording.
    ///
    /// Returns whether a rebuild happened.
    pub fn ensure_streams<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        arena: &mut CommandArena,
        list: &DrawList,
        resources: &ResourceSet,
        config: &RendererConfig,
    ) -> RendererResult<bool> {
        let tokens = resources.tokens();
        if !self.tracker.is_stale_for(tokens) && arena.streams().is_some() {
            return Ok(false);
        }
        crate::profile_scope!("rebuild_streams");
        log::debug!(
            "rebuilding streams: framebuffer token {}, pipeline token {} (was {:?})",
            tokens.framebuffer,
            tokens.pipeline,
            self.tracker.recorded()
        );

        // Streams are single-buffered; nothing may still execute them.
        arena.wait_idle(backend, config.fence_timeout)?;
        arena.free_streams(backend);
        self.tracker.reset();

        let recorder = CommandRecorder::new(
            &resources.scene,
            backend.limits(),
            resources.target.extent,
            config.task_group_size,
        );
        let recorded = recorder.record_streams(list.items(), &resources.setups, config.strategy)?;
        crate::profile_plot!("geometry_commands", recorded.geometry.len());
        arena.install_streams(backend, recorded, &resources.target)?;

        self.tracker.record_tokens(tokens.framebuffer, tokens.pipeline);
        self.rebuilds += 1;
        Ok(true)
    }

    /// Record and submit one frame.
    pub fn submit_frame<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        arena: &mut CommandArena,
        list: &DrawList,
        resources: &ResourceSet,
        config: &RendererConfig,
        frame: &FrameConfig,
    ) -> RendererResult<SubmissionId> {
        crate::profile_scope!("Render");

        arena.retire(backend);
        self.ensure_streams(backend, arena, list, resources, config)?;
        let streams = arena.streams().ok_or(RendererError::InvalidState {
            expected: "recorded streams",
            found: "none",
        })?;
        let commands = record_primary(frame, resources, streams, config)?;

        let primary = arena.acquire_primary(backend)?;
        let encoded = backend
            .begin_command_buffer(primary, CommandBufferUsage::OneTimeSubmit)
            .and_then(|_| backend.encode_list(primary, &commands))
            .and_then(|_| backend.end_command_buffer(primary))
            .and_then(|_| backend.submit(primary));
        let submission = match encoded {
            Ok(submission) => submission,
            Err(err) => {
                arena.release_primary(backend, primary);
                return Err(err.into());
            }
        };
        arena.track(submission, primary);

        log::trace!(
            "frame {} submitted as {:?} ({} commands, {:?})",
            self.frame_index,
            submission,
            commands.len(),
            config.strategy
        );
        self.frame_index += 1;
        crate::frame_mark!();
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_buffer_limits() {
        let buffer = BufferHandle::from_raw(1);
        assert!(update_buffer(buffer, &[0u8; 320]).is_ok());
        assert!(update_buffer(buffer, &[0u8; MAX_INLINE_UPDATE]).is_ok());
        assert_eq!(
            update_buffer(buffer, &[0u8; 6]),
            Err(RendererError::UpdateTooLarge { size: 6 })
        );
        assert!(update_buffer(buffer, &vec![0u8; MAX_INLINE_UPDATE + 4]).is_err());
    }

    #[test]
    fn test_uniform_consumers() {
        let base = PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER;
        assert_eq!(uniform_consumers(false, false), base);
        assert_eq!(
            uniform_consumers(true, false),
            base | PipelineStages::GEOMETRY_SHADER
        );
        assert_eq!(
            uniform_consumers(false, true),
            base | PipelineStages::COMPUTE_SHADER
        );
    }
}
