//! Bounded channels connecting stages.
//!
//! A wire is a bounded single-producer single-consumer channel. Sends are
//! always non-blocking: when a wire is full the newest item is dropped at
//! the producer. For realtime edge pipelines stale data is worse than
//! missing data, so backpressure never stalls an upstream stage.
//!
//! Receivers work from both async tasks and plain threads, which is what
//! lets a host program drain a sink wire without holding a runtime handle.

use std::time::Duration;

/// Default buffer depth of a stage-to-stage wire.
pub const DEFAULT_WIRE_CAPACITY: usize = 2;

/// Outcome of a non-blocking send on a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The item was queued on the wire.
    Sent,
    /// The wire was full; the item was dropped.
    Full,
    /// The receiving side is gone; the item was dropped.
    Closed,
}

/// Create a bounded wire. Capacities below 1 are clamped to 1.
pub fn wire<P>(capacity: usize) -> (WireSender<P>, WireReceiver<P>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (WireSender { tx }, WireReceiver { rx })
}

pub struct WireSender<P> {
    tx: flume::Sender<P>,
}

impl<P> WireSender<P> {
    /// Non-blocking send with drop-newest semantics.
    pub fn try_send(&self, item: P) -> SendOutcome {
        match self.tx.try_send(item) {
            Ok(()) => SendOutcome::Sent,
            Err(flume::TrySendError::Full(_)) => SendOutcome::Full,
            Err(flume::TrySendError::Disconnected(_)) => SendOutcome::Closed,
        }
    }
}

impl<P> Clone for WireSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct WireReceiver<P> {
    rx: flume::Receiver<P>,
}

impl<P> WireReceiver<P> {
    /// Bounded receive. Returns `None` on timeout and on a closed wire;
    /// consumers treat both as "no data this tick".
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<P> {
        match tokio::time::timeout(timeout, self.rx.recv_async()).await {
            Ok(Ok(item)) => Some(item),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<P> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive for host threads running outside the runtime.
    pub fn recv_blocking(&self, timeout: Duration) -> Option<P> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discard everything currently queued. Returns the number of items
    /// thrown away.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}
