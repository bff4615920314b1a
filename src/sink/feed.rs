//! Latest-frame feed for dashboards and other slow readers

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::TelemetrySink;
use crate::stream::ThrottleExt;
use crate::types::UpdateRate;
use crate::TelemetryFrame;

/// A frame together with the skew observed when it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame: TelemetryFrame,
    pub skew_ms: u64,
}

/// Sink that publishes the most recent frame to any number of subscribers.
///
/// Subscribers see the latest value, not every value: a reader that falls
/// behind skips straight to the newest frame. Readers that need every frame
/// should implement [`TelemetrySink`] directly.
#[derive(Debug, Clone)]
pub struct TelemetryFeed {
    latest: Arc<watch::Sender<Option<Arc<FrameReport>>>>,
}

impl Default for TelemetryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFeed {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest: Arc::new(latest) }
    }

    /// Most recent frame, if any arrived yet
    pub fn latest(&self) -> Option<Arc<FrameReport>> {
        self.latest.borrow().clone()
    }

    /// Subscribe to frames at the given rate
    ///
    /// The stream yields the current frame immediately when one exists.
    /// It ends when every clone of the feed has been dropped.
    pub fn subscribe(&self, rate: UpdateRate) -> impl Stream<Item = Arc<FrameReport>> + 'static {
        let frames = WatchStream::new(self.latest.subscribe()).filter_map(|opt| async move { opt });

        match rate.throttle_interval() {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }
}

impl TelemetrySink for TelemetryFeed {
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64) {
        self.latest.send_replace(Some(Arc::new(FrameReport { frame, skew_ms })));
    }

    fn report_decode_error(&self, _length_observed: usize) {}

    fn report_command_error(&self, _detail: &str) {}
}
