//! Periodic scheduling, abstracted away from any particular runtime.
//!
//! A registration returns a [`CadenceSubscription`]; cancelling or dropping
//! it stops future callbacks. A callback may also return
//! `ControlFlow::Break(())` to unregister itself, which is how a callback
//! holding a `Weak` target lets go once the target is gone.

use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type TickCallback = Box<dyn FnMut() -> ControlFlow<()> + Send + 'static>;

#[derive(Debug)]
pub struct CadenceSubscription {
    token: CancellationToken,
}

impl CadenceSubscription {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CadenceSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub trait Cadence {
    fn every(&self, interval: Duration, callback: TickCallback) -> CadenceSubscription;
}

/// Wall-clock cadence on a tokio runtime. Late ticks are skipped, never
/// bunched up.
#[derive(Debug, Clone)]
pub struct TokioCadence {
    handle: tokio::runtime::Handle,
}

impl TokioCadence {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Panics outside a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Cadence for TokioCadence {
    fn every(&self, period: Duration, mut callback: TickCallback) -> CadenceSubscription {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        self.handle.spawn(async move {
            let mut cadence = interval_at(TokioInstant::now() + period, period);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = cadence.tick() => {
                        if callback().is_break() {
                            break;
                        }
                    }
                }
            }
            debug!("Cadence task exited");
        });

        CadenceSubscription::new(token)
    }
}

struct ManualEntry {
    interval: Duration,
    callback: TickCallback,
    token: CancellationToken,
}

/// Deterministic cadence for tests: nothing happens until `fire`.
#[derive(Clone, Default)]
pub struct ManualCadence {
    entries: Arc<Mutex<Vec<ManualEntry>>>,
}

impl ManualCadence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live callback once. Returns how many ran.
    pub fn fire(&self) -> usize {
        // Callbacks run outside the lock so they may register or cancel.
        let mut entries = std::mem::take(&mut *self.entries.lock());
        let mut fired = 0;

        entries.retain_mut(|entry| {
            if entry.token.is_cancelled() {
                return false;
            }
            fired += 1;
            (entry.callback)().is_continue() && !entry.token.is_cancelled()
        });

        let mut live = self.entries.lock();
        entries.append(&mut live);
        *live = entries;
        fired
    }

    pub fn active(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.token.is_cancelled()).count()
    }

    /// Interval of the most recent live registration.
    pub fn last_interval(&self) -> Option<Duration> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|e| !e.token.is_cancelled())
            .map(|e| e.interval)
    }
}

impl Cadence for ManualCadence {
    fn every(&self, interval: Duration, callback: TickCallback) -> CadenceSubscription {
        let token = CancellationToken::new();
        self.entries.lock().push(ManualEntry {
            interval,
            callback,
            token: token.clone(),
        });
        CadenceSubscription::new(token)
    }
}
