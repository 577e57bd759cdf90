//! One-shot readiness gate for chain-dependent operations.
//!
//! Until the node handshake completes every chain-dependent call suspends on
//! [`InitGate::wait`]. Address-watch requests issued before that point are
//! queued and handed back, in submission order, exactly once by
//! [`InitGate::open`]. After opening, the queue is gone and requests pass
//! straight through.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use zen_core::address::Address;

/// Readiness barrier plus the pre-readiness watch queue.
#[derive(Debug)]
pub struct InitGate {
    ready: watch::Sender<bool>,
    /// `None` once the gate has opened.
    pending: Mutex<Option<Vec<Address>>>,
}

impl InitGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self { ready, pending: Mutex::new(Some(Vec::new())) }
    }

    pub fn is_open(&self) -> bool {
        *self.ready.borrow()
    }

    /// Suspend until the gate opens. Returns immediately once open.
    pub async fn wait(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Queue `address` if the gate is still closed.
    ///
    /// Returns the address back when the gate is already open, in which case
    /// the caller must register it itself.
    pub fn queue_watch(&self, address: Address) -> Option<Address> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(queue) => {
                debug!(%address, queued = queue.len() + 1, "queued watch address until node is ready");
                queue.push(address);
                None
            }
            None => Some(address),
        }
    }

    /// Open the gate and take the queued watch requests.
    ///
    /// Only the first call returns the queue; later calls return an empty list.
    pub fn open(&self) -> Vec<Address> {
        let mut pending = self.pending.lock();
        let queued = pending.take().unwrap_or_default();
        self.ready.send_replace(true);
        queued
    }
}

impl Default for InitGate {
    fn default() -> Self {
        Self::new()
    }
}
