//! Cache and render counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters shared by every request handled by one service.
///
/// Constructed once by the owner of the page cache and handed out behind an
/// `Arc`; there is no global instance. Counters only ever grow.
#[derive(Debug, Default)]
pub struct SsrMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    renders: AtomicU64,
    degraded_renders: AtomicU64,
    slow_renders: AtomicU64,
    render_time_total_us: AtomicU64,
    render_time_max_us: AtomicU64,
    disconnects: AtomicU64,
}

impl SsrMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// An anonymous request was served from a stored or in-flight render.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// An anonymous request had to start a render.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A request skipped the cache.
    pub fn record_bypass(&self) {
        self.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// A render finished.
    pub fn record_render(&self, duration: Duration, degraded: bool, slow: bool) {
        let us = duration.as_micros().min(u64::MAX as u128) as u64;
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.render_time_total_us.fetch_add(us, Ordering::Relaxed);
        self.render_time_max_us.fetch_max(us, Ordering::Relaxed);
        if degraded {
            self.degraded_renders.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_renders.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The client went away while a response was being written.
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Cache bypasses so far.
    pub fn bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }

    /// Completed renders so far.
    pub fn renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    /// `hits / (hits + misses)`; bypasses do not count as attempts. Zero
    /// before the first attempt.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        let renders = self.renders();
        let total_us = self.render_time_total_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            hits,
            misses,
            bypasses: self.bypasses(),
            hit_rate: hit_rate(hits, misses),
            renders,
            degraded_renders: self.degraded_renders.load(Ordering::Relaxed),
            slow_renders: self.slow_renders.load(Ordering::Relaxed),
            render_time_avg_us: if renders == 0 { 0 } else { total_us / renders },
            render_time_max_us: self.render_time_max_us.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let attempts = hits + misses;
    if attempts == 0 {
        0.0
    } else {
        hits as f64 / attempts as f64
    }
}

/// Serializable view of [`SsrMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub hit_rate: f64,
    pub renders: u64,
    pub degraded_renders: u64,
    pub slow_renders: u64,
    pub render_time_avg_us: u64,
    pub render_time_max_us: u64,
    pub disconnects: u64,
}

impl MetricsSnapshot {
    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as human-readable summary.
    pub fn to_summary(&self) -> String {
        let lines = [
            format!(
                "Cache: {} hits, {} misses, {} bypasses (hit rate {:.1}%)",
                self.hits,
                self.misses,
                self.bypasses,
                self.hit_rate * 100.0
            ),
            format!(
                "Renders: {} total, {} degraded, {} slow",
                self.renders, self.degraded_renders, self.slow_renders
            ),
            format!(
                "Render time: avg {:.2}ms, max {:.2}ms",
                self.render_time_avg_us as f64 / 1000.0,
                self.render_time_max_us as f64 / 1000.0
            ),
            format!("Disconnects: {}", self.disconnects),
        ];
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        let metrics = SsrMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_ignores_bypasses() {
        let metrics = SsrMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_bypass();
        metrics.record_bypass();

        assert_eq!(metrics.hit_rate(), 0.75);
        assert_eq!(metrics.bypasses(), 2);
    }

    #[test]
    fn test_render_timings() {
        let metrics = SsrMetrics::new();
        metrics.record_render(Duration::from_millis(10), false, false);
        metrics.record_render(Duration::from_millis(30), true, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.renders, 2);
        assert_eq!(snapshot.degraded_renders, 1);
        assert_eq!(snapshot.slow_renders, 1);
        assert_eq!(snapshot.render_time_avg_us, 20_000);
        assert_eq!(snapshot.render_time_max_us, 30_000);
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = SsrMetrics::new();
        metrics.record_miss();
        let json = metrics.snapshot().to_json();

        assert!(json.contains("\"misses\":1"));
        assert!(json.contains("\"hit_rate\":0.0"));
    }

    #[test]
    fn test_summary_mentions_hit_rate() {
        let metrics = SsrMetrics::new();
        metrics.record_hit();
        metrics.record_miss();
        assert!(metrics.snapshot().to_summary().contains("hit rate 50.0%"));
    }
}
