use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Single-shot signal: transitions irrevocably from un-fired to fired. Any
/// number of waiters, whether they arrive before or after the edge, observe it.
pub(crate) struct InvalidationLatch {
    fired: AtomicBool,
    notify: Notify,
}

impl InvalidationLatch {
    pub(crate) fn new() -> Self {
        InvalidationLatch {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Idempotent.
    pub(crate) fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        loop {
            if self.is_fired() {
                return;
            }
            // Register for the wakeup before the final flag check, so a fire
            // cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }
}
