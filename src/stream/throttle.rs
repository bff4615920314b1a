//! Latest-wins stream throttling

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Rate limiting for telemetry streams.
pub trait ThrottleExt: Stream + Sized {
    /// Yield at most one item per `period`.
    ///
    /// Items arriving within one period collapse into the most recent one.
    /// A period in which nothing arrived yields nothing; the stream only ends
    /// when the inner stream ends.
    fn throttle(self, period: Duration) -> Throttle<Self> {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S: Stream> {
        #[pin]
        inner: S,
        ticks: Interval,
        latest: Option<S::Item>,
        inner_done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(inner: S, period: Duration) -> Self {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { inner, ticks, latest: None, inner_done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Keep absorbing items between ticks so only the newest survives.
        while !*this.inner_done {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.latest = Some(item),
                Poll::Ready(None) => *this.inner_done = true,
                Poll::Pending => break,
            }
        }

        if *this.inner_done && this.latest.is_none() {
            return Poll::Ready(None);
        }
        if this.latest.is_none() {
            return Poll::Pending;
        }

        match this.ticks.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(this.latest.take()),
            Poll::Pending => Poll::Pending,
        }
    }
}
