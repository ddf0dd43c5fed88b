// ── Observable state slots ──
//
// The channel keeps the latest command-status and presence as
// `watch`-backed slots. `SlotStream` is the consumer side.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Latest value of a slot, shared.
pub type Slot<T> = Option<Arc<T>>;

/// A subscription to one state slot.
///
/// Provides point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`.
pub struct SlotStream<T: Send + Sync + 'static> {
    receiver: watch::Receiver<Slot<T>>,
}

impl<T: Send + Sync + 'static> SlotStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Slot<T>>) -> Self {
        Self { receiver }
    }

    /// Current value (may be `None` after a device switch).
    pub fn latest(&self) -> Slot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new value.
    /// Returns `None` if the channel has been dropped.
    pub async fn changed(&mut self) -> Option<Slot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Convert into a `Stream`; yields the current value first.
    pub fn into_stream(self) -> SlotWatchStream<T> {
        SlotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct SlotWatchStream<T: Send + Sync + 'static> {
    inner: WatchStream<Slot<T>>,
}

impl<T: Send + Sync + 'static> Stream for SlotWatchStream<T> {
    type Item = Slot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
