//! Frame-completion future.
//!
//! A [`SubmitFuture`] is handed out once per submitted frame. The device side
//! holds the matching [`SubmitSignal`] and completes it when the queue reports
//! the work as done.
//!
//! Devices whose completion callbacks only fire from inside a device poll
//! attach a driver with [`SubmitFuture::driven`]. The driver runs whenever
//! the future is polled while still pending.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;

type Driver = Arc<dyn Fn() + Send + Sync>;

/// Resolves once the submitted command buffer has finished on the device.
///
/// Clones share one completion. A dropped [`SubmitSignal`] also resolves the
/// future, since nothing is left that could complete it.
#[derive(Clone)]
pub struct SubmitFuture {
    done: Shared<oneshot::Receiver<()>>,
    driver: Option<Driver>,
}

/// Completion side of a [`SubmitFuture`].
#[derive(Debug)]
pub struct SubmitSignal {
    sender: oneshot::Sender<()>,
}

impl SubmitFuture {
    /// Create a pending future and the signal that completes it.
    pub fn pending() -> (Self, SubmitSignal) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                done: receiver.shared(),
                driver: None,
            },
            SubmitSignal { sender },
        )
    }

    /// Create an already-completed future.
    pub fn ready() -> Self {
        let (future, signal) = Self::pending();
        signal.complete();
        future
    }

    /// Run `driver` on every poll that finds the work unfinished.
    pub fn driven(mut self, driver: impl Fn() + Send + Sync + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    /// Check completion without running the driver.
    pub fn is_complete(&self) -> bool {
        self.done.clone().now_or_never().is_some()
    }
}

impl Future for SubmitFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Poll::Ready(_) = self.done.poll_unpin(cx) {
            return Poll::Ready(());
        }
        let Some(driver) = self.driver.clone() else {
            return Poll::Pending;
        };
        driver();
        self.done.poll_unpin(cx).map(|_| ())
    }
}

impl fmt::Debug for SubmitFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitFuture")
            .field("complete", &self.is_complete())
            .field("driven", &self.driver.is_some())
            .finish()
    }
}

impl SubmitSignal {
    /// Mark the work as done and wake the waiting task, if any.
    pub fn complete(self) {
        // The receiver may already be gone if nobody awaited the frame.
        let _ = self.sender.send(());
    }
}
