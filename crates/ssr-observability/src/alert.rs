//! Slow-render alerting.

use std::time::Duration;

use serde::Serialize;
use ssr_core::RequestId;

/// Details of a render that exceeded the alert threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SlowRenderReport {
    /// Request ID for correlation.
    pub request_id: String,
    /// Request URL.
    pub url: String,
    /// Prefetch phase duration.
    pub prefetch: Duration,
    /// Serialization phase duration.
    pub serialize: Duration,
    /// Whole render duration.
    pub total: Duration,
    /// Configured threshold.
    pub threshold: Duration,
}

impl SlowRenderReport {
    /// Build a report.
    pub fn new(
        request_id: &RequestId,
        url: impl Into<String>,
        prefetch: Duration,
        serialize: Duration,
        threshold: Duration,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            url: url.into(),
            prefetch,
            serialize,
            total: prefetch + serialize,
            threshold,
        }
    }
}

/// Receiver for slow-render alerts.
///
/// Called inline from the render path, so implementations must return
/// quickly; anything that talks to the network should hand the report to a
/// background task.
pub trait SlowRenderAlert: Send + Sync {
    /// Raise an alert.
    fn alert(&self, report: &SlowRenderReport);
}

/// Alert sink that emits an `error`-level `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlert;

impl SlowRenderAlert for TracingAlert {
    fn alert(&self, report: &SlowRenderReport) {
        tracing::error!(
            request_id = %report.request_id,
            url = %report.url,
            prefetch_ms = report.prefetch.as_millis() as u64,
            render_ms = report.serialize.as_millis() as u64,
            total_ms = report.total.as_millis() as u64,
            threshold_ms = report.threshold.as_millis() as u64,
            "SSR time above threshold"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_total() {
        let report = SlowRenderReport::new(
            &RequestId::from_string("req-1"),
            "/posts/1",
            Duration::from_millis(2500),
            Duration::from_millis(700),
            Duration::from_secs(3),
        );

        assert_eq!(report.total, Duration::from_millis(3200));
        assert_eq!(report.request_id, "req-1");
    }
}
