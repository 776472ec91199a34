//! Change tracking for cached command streams

use crate::resources::ChangeTokens;

/// Remembers the tokens the current streams were recorded against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    recorded: Option<ChangeTokens>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether streams recorded against the stored tokens are unusable with
    /// `framebuffer` and `pipeline`. Always true before the first recording.
    pub fn is_stale(&self, framebuffer: u64, pipeline: u64) -> bool {
        match self.recorded {
            Some(tokens) => tokens.framebuffer != framebuffer || tokens.pipeline != pipeline,
            None => true,
        }
    }

    pub fn is_stale_for(&self, tokens: ChangeTokens) -> bool {
        self.is_stale(tokens.framebuffer, tokens.pipeline)
    }

    pub fn record_tokens(&mut self, framebuffer: u64, pipeline: u64) {
        self.recorded = Some(ChangeTokens {
            framebuffer,
            pipeline,
        });
    }

    pub fn recorded(&self) -> Option<ChangeTokens> {
        self.recorded
    }

    /// Forget the stored tokens, e.g. after the streams were freed.
    pub fn reset(&mut self) {
        self.recorded = None;
    }
}
