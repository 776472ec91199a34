//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It journals every
//! command buffer it hands out together with the commands encoded into it,
//! tracks submissions, and records usage violations a validation layer would
//! report (freeing in-flight buffers, destroying a pool with live buffers,
//! executing a secondary that was never finished).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{BackendError, BackendResult};

/// Recording state of a journaled command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
}

/// A command buffer as seen by the dummy backend.
#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub pool: CommandPoolHandle,
    pub level: CommandBufferLevel,
    pub usage: Option<CommandBufferUsage>,
    pub state: RecordingState,
    pub commands: CommandList,
}

/// A queue submission as seen by the dummy backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub id: SubmissionId,
    pub buffer: CommandBufferHandle,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    limits: DeviceLimits,
    next_id: u64,
    pools: BTreeSet<CommandPoolHandle>,
    buffers: BTreeMap<CommandBufferHandle, RecordedBuffer>,
    submissions: Vec<Submission>,
    pending: BTreeSet<SubmissionId>,
    auto_complete: bool,
    stuck: bool,
    allocations_left: Option<usize>,
    pools_created: usize,
    pools_destroyed: usize,
    buffers_freed: usize,
    violations: Vec<String>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Create a dummy backend reporting the given device limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_id: 1,
            pools: BTreeSet::new(),
            buffers: BTreeMap::new(),
            submissions: Vec::new(),
            pending: BTreeSet::new(),
            auto_complete: true,
            stuck: false,
            allocations_left: None,
            pools_created: 0,
            pools_destroyed: 0,
            buffers_freed: 0,
            violations: Vec::new(),
        }
    }

    /// Keep submissions pending until [`complete_all`](Self::complete_all) or
    /// [`wait`](GpuBackend::wait) is called.
    pub fn with_deferred_completion(mut self) -> Self {
        self.auto_complete = false;
        self
    }

    /// Keep submissions pending and let [`wait`](GpuBackend::wait) time out on
    /// them, as a hung device would. Only [`complete_all`](Self::complete_all)
    /// signals them.
    pub fn with_stuck_submissions(mut self) -> Self {
        self.auto_complete = false;
        self.stuck = true;
        self
    }

    /// Fail every command buffer allocation after `count` successful ones.
    pub fn with_allocation_budget(mut self, count: usize) -> Self {
        self.allocations_left = Some(count);
        self
    }

    /// Signal every pending submission.
    pub fn complete_all(&mut self) {
        self.pending.clear();
    }

    /// Get a journaled command buffer.
    pub fn buffer(&self, cmd: CommandBufferHandle) -> Option<&RecordedBuffer> {
        self.buffers.get(&cmd)
    }

    /// Commands encoded into `cmd`, empty if the buffer is unknown or freed.
    pub fn commands(&self, cmd: CommandBufferHandle) -> &[Command] {
        self.buffers
            .get(&cmd)
            .map(|b| b.commands.commands())
            .unwrap_or(&[])
    }

    /// All submissions in submission order.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// The most recently submitted primary buffer.
    pub fn last_submitted(&self) -> Option<CommandBufferHandle> {
        self.submissions.last().map(|s| s.buffer)
    }

    /// Number of command buffers currently allocated.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of command pools currently alive.
    pub fn live_pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    pub fn pools_destroyed(&self) -> usize {
        self.pools_destroyed
    }

    pub fn buffers_freed(&self) -> usize {
        self.buffers_freed
    }

    /// Usage errors a validation layer would have reported.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn violation(&mut self, message: String) {
        log::error!("DummyBackend: {}", message);
        self.violations.push(message);
    }

    fn is_in_flight(&self, cmd: CommandBufferHandle) -> bool {
        self.submissions
            .iter()
            .any(|s| self.pending.contains(&s.id) && self.references(s.buffer, cmd))
    }

    /// Whether `primary` is `cmd` or executes it as a secondary.
    fn references(&self, primary: CommandBufferHandle, cmd: CommandBufferHandle) -> bool {
        if primary == cmd {
            return true;
        }
        self.buffers.get(&primary).is_some_and(|b| {
            b.commands.iter().any(|c| match c {
                Command::ExecuteCommands(secondaries) => secondaries.contains(&cmd),
                _ => false,
            })
        })
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_pool(&mut self) -> BackendResult<CommandPoolHandle> {
        let pool = CommandPoolHandle::from_raw(self.next_handle());
        log::trace!("DummyBackend: creating command pool {:?}", pool);
        self.pools.insert(pool);
        self.pools_created += 1;
        Ok(pool)
    }

    fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        log::trace!("DummyBackend: destroying command pool {:?}", pool);
        if !self.pools.remove(&pool) {
            self.violation(format!("destroying unknown command pool {:?}", pool));
            return;
        }
        let live = self.buffers.values().filter(|b| b.pool == pool).count();
        if live > 0 {
            self.violation(format!(
                "command pool {:?} destroyed with {} live command buffers",
                pool, live
            ));
            self.buffers.retain(|_, b| b.pool != pool);
        }
        self.pools_destroyed += 1;
    }

    fn allocate_command_buffer(
        &mut self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        if !self.pools.contains(&pool) {
            return Err(BackendError::UnknownHandle(format!("{:?}", pool)));
        }
        if let Some(left) = self.allocations_left.as_mut() {
            if *left == 0 {
                return Err(BackendError::OutOfMemory);
            }
            *left -= 1;
        }

        let cmd = CommandBufferHandle::from_raw(self.next_handle());
        log::trace!("DummyBackend: allocating {:?} command buffer {:?}", level, cmd);
        self.buffers.insert(
            cmd,
            RecordedBuffer {
                pool,
                level,
                usage: None,
                state: RecordingState::Initial,
                commands: CommandList::new(),
            },
        );
        Ok(cmd)
    }

    fn free_command_buffers(&mut self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        for &cmd in buffers {
            if self.is_in_flight(cmd) {
                self.violation(format!(
                    "command buffer {:?} freed while a submission using it is pending",
                    cmd
                ));
            }
            match self.buffers.remove(&cmd) {
                Some(buffer) if buffer.pool == pool => self.buffers_freed += 1,
                Some(buffer) => {
                    self.violation(format!(
                        "command buffer {:?} freed through pool {:?}, allocated from {:?}",
                        cmd, pool, buffer.pool
                    ));
                    self.buffers_freed += 1;
                }
                None => self.violation(format!("freeing unknown command buffer {:?}", cmd)),
            }
        }
    }

    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        let buffer = self
            .buffers
            .get_mut(&cmd)
            .ok_or_else(|| BackendError::UnknownHandle(format!("{:?}", cmd)))?;
        if buffer.state == RecordingState::Recording {
            return Err(BackendError::BeginFailed(format!(
                "{:?} is already recording",
                cmd
            )));
        }
        buffer.usage = Some(usage);
        buffer.state = RecordingState::Recording;
        buffer.commands = CommandList::new();
        Ok(())
    }

    fn encode(&mut self, cmd: CommandBufferHandle, command: &Command) -> BackendResult<()> {
        if let Command::ExecuteCommands(secondaries) = command {
            for secondary in secondaries {
                let executable = self.buffers.get(secondary).is_some_and(|b| {
                    b.level == CommandBufferLevel::Secondary
                        && b.state == RecordingState::Executable
                });
                if !executable {
                    self.violation(format!(
                        "executing {:?} which is not an executable secondary buffer",
                        secondary
                    ));
                }
            }
        }

        let buffer = self
            .buffers
            .get_mut(&cmd)
            .ok_or_else(|| BackendError::UnknownHandle(format!("{:?}", cmd)))?;
        if buffer.state != RecordingState::Recording {
            return Err(BackendError::NotRecording(format!("{:?}", cmd)));
        }
        log::trace!("DummyBackend: {:?} <- {}", cmd, command.name());
        buffer.commands.push(command.clone());
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let buffer = self
            .buffers
            .get_mut(&cmd)
            .ok_or_else(|| BackendError::UnknownHandle(format!("{:?}", cmd)))?;
        if buffer.state != RecordingState::Recording {
            return Err(BackendError::EndFailed(format!("{:?} is not recording", cmd)));
        }
        buffer.state = RecordingState::Executable;
        Ok(())
    }

    fn submit(&mut self, cmd: CommandBufferHandle) -> BackendResult<SubmissionId> {
        let buffer = self
            .buffers
            .get(&cmd)
            .ok_or_else(|| BackendError::UnknownHandle(format!("{:?}", cmd)))?;
        if buffer.level != CommandBufferLevel::Primary
            || buffer.state != RecordingState::Executable
        {
            return Err(BackendError::SubmitFailed(format!(
                "{:?} is not an executable primary buffer",
                cmd
            )));
        }

        let id = SubmissionId::from_raw(self.next_handle());
        log::trace!("DummyBackend: submitting {:?} as {:?}", cmd, id);
        self.submissions.push(Submission { id, buffer: cmd });
        if !self.auto_complete {
            self.pending.insert(id);
        }
        Ok(id)
    }

    fn is_complete(&mut self, submission: SubmissionId) -> bool {
        !self.pending.contains(&submission)
    }

    fn wait(&mut self, submission: SubmissionId, timeout: Duration) -> BackendResult<()> {
        if self.stuck && self.pending.contains(&submission) {
            log::warn!("DummyBackend: {:?} still pending after {:?}", submission, timeout);
            return Err(BackendError::FenceWaitFailed(format!(
                "timed out after {:?}",
                timeout
            )));
        }
        self.pending.remove(&submission);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded_primary(backend: &mut DummyBackend) -> (CommandPoolHandle, CommandBufferHandle) {
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend
            .allocate_command_buffer(pool, CommandBufferLevel::Primary)
            .unwrap();
        backend
            .begin_command_buffer(cmd, CommandBufferUsage::OneTimeSubmit)
            .unwrap();
        backend
            .encode(cmd, &Command::Dispatch { x: 4, y: 1, z: 1 })
            .unwrap();
        backend.end_command_buffer(cmd).unwrap();
        (pool, cmd)
    }

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_journal_and_submit() {
        let mut backend = DummyBackend::new();
        let (_, cmd) = recorded_primary(&mut backend);

        assert_eq!(backend.commands(cmd), &[Command::Dispatch { x: 4, y: 1, z: 1 }]);
        let id = backend.submit(cmd).unwrap();
        assert!(backend.is_complete(id));
        assert_eq!(backend.last_submitted(), Some(cmd));
    }

    #[test]
    fn test_encode_requires_recording() {
        let mut backend = DummyBackend::new();
        let (_, cmd) = recorded_primary(&mut backend);
        let result = backend.encode(cmd, &Command::EndRenderPass);
        assert!(matches!(result, Err(BackendError::NotRecording(_))));
    }

    #[test]
    fn test_deferred_completion_flags_in_flight_free() {
        let mut backend = DummyBackend::new().with_deferred_completion();
        let (pool, cmd) = recorded_primary(&mut backend);
        let id = backend.submit(cmd).unwrap();
        assert!(!backend.is_complete(id));

        backend.free_command_buffers(pool, &[cmd]);
        assert_eq!(backend.violations().len(), 1);

        backend.wait(id, Duration::from_secs(1)).unwrap();
        assert!(backend.is_complete(id));
    }

    #[test]
    fn test_pool_destroyed_with_live_buffers() {
        let mut backend = DummyBackend::new();
        let (pool, _) = recorded_primary(&mut backend);
        backend.destroy_command_pool(pool);
        assert_eq!(backend.violations().len(), 1);
        assert_eq!(backend.live_pool_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_allocation_budget() {
        let mut backend = DummyBackend::new().with_allocation_budget(1);
        let pool = backend.create_command_pool().unwrap();
        assert!(backend
            .allocate_command_buffer(pool, CommandBufferLevel::Secondary)
            .is_ok());
        assert_eq!(
            backend.allocate_command_buffer(pool, CommandBufferLevel::Secondary),
            Err(BackendError::OutOfMemory)
        );
    }

    #[test]
    fn test_stuck_submission_times_out() {
        let mut backend = DummyBackend::new().with_stuck_submissions();
        let (_, cmd) = recorded_primary(&mut backend);
        let id = backend.submit(cmd).unwrap();

        assert!(matches!(
            backend.wait(id, Duration::from_millis(5)),
            Err(BackendError::FenceWaitFailed(_))
        ));
        assert!(!backend.is_complete(id));

        backend.complete_all();
        assert!(backend.wait(id, Duration::from_millis(5)).is_ok());
    }
}
