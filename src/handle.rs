use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::util::lock_unpoisoned;

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, Error>>>>>;

// Settling and cancelling both take the sender out of the shared slot under
// its lock, so whichever happens first wins for good.
pub(crate) struct Settlement<T> {
    slot: Slot<T>,
}

impl<T> Clone for Settlement<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for Settlement<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Settlement")
            .field("open", &lock_unpoisoned(&self.slot).is_some())
            .finish()
    }
}

impl<T> Settlement<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<T, Error>>) {
        let (sender, receiver) = oneshot::channel();
        let settlement = Self {
            slot: Arc::new(Mutex::new(Some(sender))),
        };
        (settlement, receiver)
    }

    pub(crate) fn complete(&self, result: Result<T, Error>) {
        if let Some(sender) = lock_unpoisoned(&self.slot).take() {
            let _ = sender.send(result);
        }
    }

    pub(crate) fn abandon(&self) {
        lock_unpoisoned(&self.slot).take();
    }
}

/// Cancellable future for an operation driven by the attempt loop.
///
/// Resolves to `Some(result)` once the loop settles, or `None` when it was
/// cancelled first. Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct RetryHandle<T> {
    receiver: oneshot::Receiver<Result<T, Error>>,
    settlement: Settlement<T>,
    cancel: CancellationToken,
}

impl<T> RetryHandle<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<T, Error>>,
        settlement: Settlement<T>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            settlement,
            cancel,
        }
    }

    /// Idempotent. Once this returns the handle can no longer settle; after
    /// settlement it is a no-op.
    pub fn cancel(&self) {
        self.settlement.abandon();
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T> Future for RetryHandle<T> {
    type Output = Option<Result<T, Error>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.ok())
    }
}

impl<T> Drop for RetryHandle<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
