//! Explicit flush control.

/// When buffered output is pushed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Push each segment as soon as it and all earlier segments are ready.
    #[default]
    EachSegment,
    /// Coalesce output and push at the end of the head and of the body.
    SectionBoundary,
}

/// Controller for managing flush behavior.
#[derive(Debug)]
pub struct FlushController {
    policy: FlushPolicy,
    pending_bytes: usize,
    /// Maximum bytes to buffer (0 = no cap).
    max_buffer: usize,
}

impl FlushController {
    /// Create a new flush controller with given policy.
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            pending_bytes: 0,
            max_buffer: 0,
        }
    }

    /// Cap buffered bytes; reaching the cap forces a flush.
    ///
    /// Under `EachSegment` a cap makes small segments coalesce until the cap
    /// or a section boundary is reached.
    pub fn with_max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = bytes;
        self
    }

    /// Record bytes added to buffer.
    pub fn add_bytes(&mut self, count: usize) {
        self.pending_bytes += count;
    }

    /// Check if a flush is due. `at_boundary` is true at the end of a section.
    pub fn should_flush(&self, at_boundary: bool) -> bool {
        if self.pending_bytes == 0 {
            return false;
        }
        let over_cap = self.max_buffer > 0 && self.pending_bytes >= self.max_buffer;
        match self.policy {
            FlushPolicy::EachSegment => self.max_buffer == 0 || over_cap || at_boundary,
            FlushPolicy::SectionBoundary => at_boundary || over_cap,
        }
    }

    /// Reset pending byte count after flush.
    pub fn reset(&mut self) {
        self.pending_bytes = 0;
    }

    /// Bytes buffered since the last flush.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Get current policy.
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }
}

impl Default for FlushController {
    fn default() -> Self {
        Self::new(FlushPolicy::default())
    }
}
