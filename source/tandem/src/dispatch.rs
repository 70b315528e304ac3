//! Deferred processing of peer notifications
//!
//! The inbound doorbell handler must not touch locks or completions, so it
//! does exactly one thing: [`Notify::notify`] wakes a queue. The actual
//! draining runs later, in task context, inside [`Dispatcher::run`].
//!
//! Frames within one ring reach their service's `dispatch` strictly in
//! commit order. No ordering is guaranteed between different services'
//! rings.

use alloc::sync::Arc;

use maitake_sync::WaitQueue;
use tracing::trace;

use crate::registry::Registry;

/// The inbound half of the peer notification mechanism.
///
/// Clone one of these into whatever context receives the peer's doorbell
/// (interrupt handler, signal handler, test harness) and call
/// [`Notify::notify`] from there. It only wakes the dispatcher task; all
/// work is deferred.
#[derive(Clone)]
pub struct Notify {
    wake: Arc<WaitQueue>,
}

impl Notify {
    /// Schedule a dispatcher sweep. Safe to call from interrupt context.
    pub fn notify(&self) {
        self.wake.wake();
    }
}

/// The deferred-processing loop: waits for a [`Notify`] and sweeps every
/// active service's inbound ring.
pub struct Dispatcher {
    registry: Arc<Registry>,
    wake: Arc<WaitQueue>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> (Self, Notify) {
        let wake = Arc::new(WaitQueue::new());
        let notify = Notify { wake: wake.clone() };
        (Self { registry, wake }, notify)
    }

    /// Run until the wait queue is closed. Spawn this on the executor after
    /// attaching the registry.
    pub async fn run(self) {
        loop {
            if self.wake.wait().await.is_err() {
                // Queue closed; the stack is going away.
                return;
            }
            self.tick().await;
        }
    }

    /// One full sweep, independent of notifications. Useful for poll-mode
    /// platforms and tests.
    #[tracing::instrument(name = "Dispatcher::tick", level = "trace", skip(self))]
    pub async fn tick(&self) {
        trace!("dispatching inbound frames");
        self.registry.drain_inbound().await;
    }
}
