use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::autoflush::AutoFlusher;
use super::config::StorageConfig;
use super::core::{Core, Identity};
use crate::primitives::pager::map_path;
use crate::types::{Result, StoreError};

/// How a wrapper wants its store opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OpenMode {
    Existing,
    New,
    OpenOrCreate,
}

/// Lock-guarded core shared by the typed wrappers and the auto-flush thread.
pub(crate) struct Shared {
    path: PathBuf,
    core: RwLock<Option<Core>>,
    flusher: AutoFlusher,
    flushing: AtomicBool,
}

/// Marks a flush in flight; cleared on drop.
struct Flight<'a>(&'a AtomicBool);

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    pub(crate) fn open(
        path: &Path,
        config: StorageConfig,
        identity: Identity,
        mode: OpenMode,
    ) -> Result<Arc<Self>> {
        let exists = path.exists() || map_path(path).exists();
        let core = match mode {
            OpenMode::Existing => Core::open(path, config, identity)?,
            OpenMode::New => Core::create(path, config, identity)?,
            OpenMode::OpenOrCreate if exists => Core::open(path, config, identity)?,
            OpenMode::OpenOrCreate => Core::create(path, config, identity)?,
        };
        let timeout = core.config().auto_flush_timeout_ms;
        let mut spawn_error = None;
        let shared = Arc::new_cyclic(|weak| {
            let flusher = if timeout == 0 {
                AutoFlusher::disabled()
            } else {
                match AutoFlusher::spawn(weak.clone(), Duration::from_millis(timeout)) {
                    Ok(flusher) => flusher,
                    Err(err) => {
                        spawn_error = Some(err);
                        AutoFlusher::disabled()
                    }
                }
            };
            Self {
                path: path.to_path_buf(),
                core: RwLock::new(Some(core)),
                flusher,
                flushing: AtomicBool::new(false),
            }
        });
        match spawn_error {
            Some(err) => Err(err),
            None => Ok(shared),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` under the shared lock.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Core) -> Result<T>) -> Result<T> {
        let guard = self.core.read();
        let core = guard.as_ref().ok_or(StoreError::NotOpen)?;
        f(core)
    }

    /// Runs `f` under the exclusive lock.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Core) -> Result<T>) -> Result<T> {
        let mut guard = self.core.write();
        let core = guard.as_mut().ok_or(StoreError::NotOpen)?;
        f(core)
    }

    /// Runs a data-changing `f` under the exclusive lock and restarts the idle timer.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut Core) -> Result<T>) -> Result<T> {
        let result = self.write(f);
        if result.is_ok() {
            self.flusher.touch();
        }
        result
    }

    /// Flush requested by a caller. Never skipped; the flag is only claimed when free.
    pub(crate) fn flush(&self) -> Result<()> {
        let _flight = self.claim_flight();
        self.write(Core::flush)
    }

    fn claim_flight(&self) -> Option<Flight<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Flight(&self.flushing))
    }

    /// Flush fired by the idle timer. Skipped while another flush is in flight.
    pub(crate) fn flush_idle(&self) {
        let Some(_flight) = self.claim_flight() else {
            trace!("flush already in flight");
            return;
        };
        let mut guard = self.core.write();
        let Some(core) = guard.as_mut() else {
            return;
        };
        if core.writes_since_flush() == 0 {
            return;
        }
        if let Err(err) = core.flush() {
            warn!(path = %self.path.display(), %err, "automatic flush failed");
        }
    }

    /// Stops the auto-flush thread, then flushes and releases the store.
    pub(crate) fn close(&self) -> Result<()> {
        self.flusher.stop();
        let core = self.core.write().take().ok_or(StoreError::NotOpen)?;
        core.close()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.core.read().is_some()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.flusher.stop();
        if let Some(core) = self.core.get_mut().take() {
            if let Err(err) = core.close() {
                warn!(path = %self.path.display(), %err, "failed to flush store on drop");
            }
        }
    }
}
