use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A process-wide stop flag that every worker can wait on with a timeout.
///
/// Cloning is cheap and all clones observe the same flag. Setting the
/// signal is sticky; once set it never clears.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every pending waiter.
    pub fn set(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the signal is set or `timeout` elapses.
    ///
    /// Returns the state of the flag when the wait ends, so callers can
    /// use it both as an interruptible sleep and as a shutdown check.
    pub async fn wait(&self, timeout: Duration) -> bool {
        // The notified future must exist before the flag is checked,
        // otherwise a set() between check and wait would be lost.
        let notified = self.inner.notify.notified();

        if self.is_set() {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => self.is_set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn wait_times_out_when_unset() {
        let signal = StopSignal::new();
        let started = Instant::now();
        assert!(!signal.wait(Duration::from_millis(20)).await);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_set() {
        let signal = StopSignal::new();
        signal.set();
        let started = Instant::now();
        assert!(signal.wait(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn set_wakes_pending_waiter() {
        let signal = StopSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(10)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set();

        assert!(handle.await.unwrap());
    }
}
