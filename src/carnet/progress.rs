//! Progress reporting shared by both delivery transports.

use std::sync::atomic::{AtomicI16, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Share of the overall progress reserved for HTML rendering.
pub const HTML_PROGRESS_END: u8 = 85;
/// Highest value the PDF heartbeat may reach before the export returns.
pub const PDF_HEARTBEAT_CEILING: u8 = 97;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Html,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Started { total_users: usize },
    Progress { progress: u8, phase: Phase },
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: PipelineEvent);
}

/// Sink that discards everything.
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn emit(&self, _event: PipelineEvent) {}
}

/// Forwards only strictly increasing progress values to the inner sink.
pub struct MonotonicSink<'a> {
    inner: &'a dyn ProgressSink,
    last: AtomicI16,
}

impl<'a> MonotonicSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            last: AtomicI16::new(-1),
        }
    }

    pub fn last(&self) -> Option<u8> {
        let last = self.last.load(Ordering::Acquire);
        (last >= 0).then_some(last as u8)
    }
}

#[async_trait]
impl<'a> ProgressSink for MonotonicSink<'a> {
    async fn emit(&self, event: PipelineEvent) {
        let event = match event {
            PipelineEvent::Progress { progress, phase } => {
                let progress = progress.min(100);
                let previous = self.last.fetch_max(i16::from(progress), Ordering::AcqRel);
                if previous >= i16::from(progress) {
                    return;
                }
                PipelineEvent::Progress { progress, phase }
            }
            started => started,
        };
        self.inner.emit(event).await;
    }
}

/// Maps records processed onto a sub-range of the overall percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRange {
    pub start: u8,
    pub end: u8,
}

impl ProgressRange {
    pub fn new(start: u8, end: u8) -> Self {
        debug_assert!(start <= end && end <= 100);
        Self { start, end }
    }

    /// Floor-scaled, so `end` is reached only when `done == total`.
    pub fn scale(&self, done: usize, total: usize) -> u8 {
        if total == 0 || done >= total {
            return self.end;
        }
        let span = usize::from(self.end - self.start);
        self.start + (span * done / total) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<PipelineEvent>>);

    #[async_trait]
    impl ProgressSink for Recording {
        async fn emit(&self, event: PipelineEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_scale_reaches_end_only_when_done() {
        let range = ProgressRange::new(0, HTML_PROGRESS_END);
        assert_eq!(range.scale(0, 28), 0);
        assert_eq!(range.scale(27, 28), 81);
        assert_eq!(range.scale(28, 28), 85);
        assert!((0..28).all(|done| range.scale(done, 28) < 85));
    }

    #[test]
    fn test_scale_is_monotonic() {
        let range = ProgressRange::new(10, 60);
        let values: Vec<u8> = (0..=7).map(|done| range.scale(done, 7)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last(), Some(&60));
    }

    #[tokio::test]
    async fn test_monotonic_sink_drops_repeats_and_regressions() {
        let recording = Recording::default();
        let sink = MonotonicSink::new(&recording);

        for value in [0u8, 0, 10, 5, 10, 40, 120] {
            sink.emit(PipelineEvent::Progress {
                progress: value,
                phase: Phase::Html,
            })
            .await;
        }

        let seen: Vec<u8> = recording
            .0
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![0, 10, 40, 100]);
        assert_eq!(sink.last(), Some(100));
    }

    #[tokio::test]
    async fn test_monotonic_sink_passes_start_events() {
        let recording = Recording::default();
        let sink = MonotonicSink::new(&recording);
        sink.emit(PipelineEvent::Started { total_users: 3 }).await;
        assert_eq!(
            recording.0.lock().as_slice(),
            &[PipelineEvent::Started { total_users: 3 }]
        );
    }
}
