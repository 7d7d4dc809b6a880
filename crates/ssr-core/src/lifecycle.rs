//! Request lifecycle timing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Phases of a single page render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPhase {
    /// Async data dependencies are being resolved.
    Prefetch,
    /// The resolved tree is being turned into markup.
    Serialize,
}

impl RenderPhase {
    /// Mark name recorded when the phase starts.
    pub fn start_mark(&self) -> &'static str {
        match self {
            Self::Prefetch => "prefetch_start",
            Self::Serialize => "serialize_start",
        }
    }

    /// Mark name recorded when the phase ends.
    pub fn end_mark(&self) -> &'static str {
        match self {
            Self::Prefetch => "prefetch_end",
            Self::Serialize => "serialize_end",
        }
    }
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefetch => write!(f, "prefetch"),
            Self::Serialize => write!(f, "serialize"),
        }
    }
}

/// Timing context for observability.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: HashMap<String, Instant>,
}

impl TimingContext {
    /// Create a new timing context.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: HashMap::new(),
        }
    }

    /// Record a timing mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Mark the start of a render phase.
    pub fn mark_phase_start(&mut self, phase: RenderPhase) {
        self.mark(phase.start_mark());
    }

    /// Mark the end of a render phase.
    pub fn mark_phase_end(&mut self, phase: RenderPhase) {
        self.mark(phase.end_mark());
    }

    /// Duration of a completed phase.
    pub fn phase_duration(&self, phase: RenderPhase) -> Option<Duration> {
        self.between(phase.start_mark(), phase.end_mark())
    }

    /// Duration between two recorded marks.
    pub fn between(&self, from: &str, to: &str) -> Option<Duration> {
        let from = self.marks.get(from)?;
        let to = self.marks.get(to)?;
        Some(to.saturating_duration_since(*from))
    }

    /// Time from context creation to a mark.
    pub fn since_start(&self, mark: &str) -> Option<Duration> {
        self.marks
            .get(mark)
            .map(|t| t.saturating_duration_since(self.start))
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_duration_requires_both_marks() {
        let mut timing = TimingContext::new();
        timing.mark_phase_start(RenderPhase::Prefetch);
        assert!(timing.phase_duration(RenderPhase::Prefetch).is_none());

        timing.mark_phase_end(RenderPhase::Prefetch);
        assert!(timing.phase_duration(RenderPhase::Prefetch).is_some());
        assert!(timing.phase_duration(RenderPhase::Serialize).is_none());
    }

    #[test]
    fn test_since_start() {
        let mut timing = TimingContext::new();
        timing.mark("head_committed");
        assert!(timing.since_start("head_committed").is_some());
        assert!(timing.since_start("missing").is_none());
    }
}
