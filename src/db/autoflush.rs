use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::shared::Shared;
use crate::types::Result;

#[derive(Default)]
struct SignalState {
    cancelled: bool,
    last_write: Option<Instant>,
}

#[derive(Default)]
struct Signal {
    state: Mutex<SignalState>,
    wakeup: Condvar,
}

/// Background thread flushing a store once it has been idle for a while.
///
/// Every write resets the timer. [`AutoFlusher::stop`] cancels the thread and joins it.
pub(crate) struct AutoFlusher {
    signal: Arc<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AutoFlusher {
    /// No background thread; writes are only flushed by count or on demand.
    pub(crate) fn disabled() -> Self {
        Self {
            signal: Arc::new(Signal::default()),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn spawn(target: Weak<Shared>, timeout: Duration) -> Result<Self> {
        let signal = Arc::new(Signal::default());
        let worker_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("pagekv-autoflush".into())
            .spawn(move || run(worker_signal, target, timeout))?;
        debug!(timeout_ms = timeout.as_millis() as u64, "auto-flush thread started");
        Ok(Self {
            signal,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Records a write and restarts the idle timer.
    pub(crate) fn touch(&self) {
        let mut state = self.signal.state.lock();
        if state.cancelled {
            return;
        }
        state.last_write = Some(Instant::now());
        self.signal.wakeup.notify_one();
    }

    /// Cancels the thread and waits for it to finish.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.signal.state.lock();
            state.cancelled = true;
            self.signal.wakeup.notify_all();
        }
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // The last handle was dropped by the worker itself; it exits on its own.
            return;
        }
        if handle.join().is_err() {
            warn!("auto-flush thread panicked");
        } else {
            debug!("auto-flush thread stopped");
        }
    }
}

fn run(signal: Arc<Signal>, target: Weak<Shared>, timeout: Duration) {
    let mut state = signal.state.lock();
    while !state.cancelled {
        let Some(last_write) = state.last_write else {
            signal.wakeup.wait(&mut state);
            continue;
        };
        let deadline = last_write + timeout;
        let now = Instant::now();
        if now < deadline {
            signal.wakeup.wait_for(&mut state, deadline - now);
            continue;
        }
        state.last_write = None;
        MutexGuard::unlocked(&mut state, || {
            if let Some(shared) = target.upgrade() {
                shared.flush_idle();
            }
        });
    }
}
