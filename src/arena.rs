//! Ownership of the command pool and every command buffer allocated from it

use std::time::Duration;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RendererError, RendererResult};
use crate::recorder::RecordedStreams;

/// A recorded secondary command buffer and the commands it was recorded from.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStream {
    pub buffer: CommandBufferHandle,
    pub commands: CommandList,
}

/// The streams recorded for the current draw list and render target.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSet {
    pub geometry: CommandStream,
    pub bbox: CommandStream,
    /// Replayed inline in the primary buffer, so never encoded on its own.
    pub culling: Option<CommandList>,
}

/// A submitted primary buffer that may still be executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    submission: SubmissionId,
    buffer: CommandBufferHandle,
}

/// Command pool plus the buffers allocated from it.
///
/// Buffers are always returned to the pool before the pool is destroyed.
#[derive(Debug)]
pub struct CommandArena {
    pool: CommandPoolHandle,
    streams: Option<StreamSet>,
    in_flight: Vec<InFlight>,
}

impl CommandArena {
    pub fn new<B: GpuBackend>(backend: &mut B) -> RendererResult<Self> {
        let pool = backend.create_command_pool()?;
        log::debug!("{}: created command pool {:?}", backend.name(), pool);
        Ok(Self {
            pool,
            streams: None,
            in_flight: Vec::new(),
        })
    }

    pub fn pool(&self) -> CommandPoolHandle {
        self.pool
    }

    pub fn streams(&self) -> Option<&StreamSet> {
        self.streams.as_ref()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Encode freshly recorded streams into new secondary buffers.
    ///
    /// Previous streams must have been freed with [`free_streams`](Self::free_streams).
    pub fn install_streams<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        recorded: RecordedStreams,
        target: &RenderTarget,
    ) -> RendererResult<&StreamSet> {
        debug_assert!(self.streams.is_none(), "streams installed twice");
        let usage = CommandBufferUsage::RenderPassContinue {
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
        };

        let geometry = self.encode_secondary(backend, recorded.geometry, usage)?;
        let bbox = match self.encode_secondary(backend, recorded.bbox, usage) {
            Ok(bbox) => bbox,
            Err(err) => {
                backend.free_command_buffers(self.pool, &[geometry.buffer]);
                return Err(err);
            }
        };

        Ok(&*self.streams.insert(StreamSet {
            geometry,
            bbox,
            culling: recorded.culling,
        }))
    }

    fn encode_secondary<B: GpuBackend>(
        &self,
        backend: &mut B,
        commands: CommandList,
        usage: CommandBufferUsage,
    ) -> RendererResult<CommandStream> {
        let buffer = backend.allocate_command_buffer(self.pool, CommandBufferLevel::Secondary)?;
        let encoded = backend
            .begin_command_buffer(buffer, usage)
            .and_then(|_| backend.encode_list(buffer, &commands))
            .and_then(|_| backend.end_command_buffer(buffer));
        if let Err(err) = encoded {
            backend.free_command_buffers(self.pool, &[buffer]);
            return Err(err.into());
        }
        Ok(CommandStream { buffer, commands })
    }

    /// Free both secondary streams. Callers wait for in-flight work first.
    pub fn free_streams<B: GpuBackend>(&mut self, backend: &mut B) {
        if let Some(streams) = self.streams.take() {
            backend.free_command_buffers(self.pool, &[streams.geometry.buffer, streams.bbox.buffer]);
        }
    }

    /// Allocate a primary buffer for one frame.
    pub fn acquire_primary<B: GpuBackend>(&mut self, backend: &mut B) -> RendererResult<CommandBufferHandle> {
        Ok(backend.allocate_command_buffer(self.pool, CommandBufferLevel::Primary)?)
    }

    /// Return an unsubmitted primary buffer, e.g. after a recording error.
    pub fn release_primary<B: GpuBackend>(&mut self, backend: &mut B, buffer: CommandBufferHandle) {
        backend.free_command_buffers(self.pool, &[buffer]);
    }

    pub fn track(&mut self, submission: SubmissionId, buffer: CommandBufferHandle) {
        self.in_flight.push(InFlight { submission, buffer });
    }

    /// Free the primary buffers whose submissions have completed.
    pub fn retire<B: GpuBackend>(&mut self, backend: &mut B) {
        let mut done = Vec::new();
        self.in_flight.retain(|frame| {
            if backend.is_complete(frame.submission) {
                done.push(frame.buffer);
                false
            } else {
                true
            }
        });
        if !done.is_empty() {
            log::trace!("retiring {} primary buffers", done.len());
            backend.free_command_buffers(self.pool, &done);
        }
    }

    /// Wait for every outstanding submission, then retire them.
    pub fn wait_idle<B: GpuBackend>(&mut self, backend: &mut B, timeout: Duration) -> RendererResult<()> {
        for frame in &self.in_flight {
            if let Err(err) = backend.wait(frame.submission, timeout) {
                log::warn!("waiting on {:?} failed: {}", frame.submission, err);
                return Err(err.into());
            }
        }
        self.retire(backend);
        Ok(())
    }

    /// Wait for outstanding work and release everything: buffers first, then the pool.
    ///
    /// If the wait fails nothing is released and the arena is handed back, so
    /// the caller can retry once the GPU catches up.
    pub fn teardown<B: GpuBackend>(
        mut self,
        backend: &mut B,
        timeout: Duration,
    ) -> Result<(), (Self, RendererError)> {
        if let Err(err) = self.wait_idle(backend, timeout) {
            return Err((self, err));
        }
        self.free_streams(backend);
        backend.destroy_command_pool(self.pool);
        log::debug!("{}: destroyed command pool {:?}", backend.name(), self.pool);
        Ok(())
    }
}
