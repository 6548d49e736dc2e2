//! Fixed-cadence stream pacing

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

/// Extension trait to add pacing to any Stream
pub trait PaceExt: Stream {
    /// Release items no closer together than `period`
    ///
    /// Unlike a throttle, nothing is dropped: every item is yielded in order.
    /// The first item (and the first item after an idle gap longer than
    /// `period`) is released immediately.
    fn paced(self, period: Duration) -> Paced<Self>
    where
        Self: Sized,
    {
        Paced::new(self, period)
    }
}

impl<T: Stream> PaceExt for T {}

pin_project! {
    /// A stream combinator that enforces a minimum gap between items
    pub struct Paced<S> {
        #[pin]
        stream: S,
        #[pin]
        delay: Sleep,
        period: Duration,
        armed: bool,
    }
}

impl<S: Stream> Paced<S> {
    /// Create a new paced stream
    pub fn new(stream: S, period: Duration) -> Self {
        Self { stream, delay: sleep(Duration::ZERO), period, armed: false }
    }

    /// Configured minimum gap
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl<S: Stream> Stream for Paced<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Previous release still inside its window
        if *this.armed {
            ready!(this.delay.as_mut().poll(cx));
            *this.armed = false;
        }

        match ready!(this.stream.as_mut().poll_next(cx)) {
            Some(item) => {
                this.delay.as_mut().reset(Instant::now() + *this.period);
                *this.armed = true;
                Poll::Ready(Some(item))
            }
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
