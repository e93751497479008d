//! Cross-process and same-process mutual exclusion for store transactions.
//!
//! Two layers:
//!
//! - [`DirLock`]: an advisory lock file created with `create_new` inside the
//!   store directory. Contenders retry with randomized exponential backoff;
//!   a lock older than the staleness timeout is presumed abandoned and
//!   force-acquired. That is a deliberate liveness/safety trade-off — a very
//!   slow legitimate holder can be preempted.
//! - [`TxnSlot`]: an explicit depth counter keyed by lock identity. The
//!   thread that owns the slot may re-enter (nested transactions run in
//!   place); other threads wait with the same bounded backoff.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, SystemTime};

use opentrade_types::{OpentradeError, Result};
use rand::Rng;

/// Retry/staleness parameters for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub retries: u32,
    pub factor: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// A lock file older than this is presumed abandoned.
    pub stale: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: 6,
            factor: 1.6,
            min_timeout: Duration::from_millis(40),
            max_timeout: Duration::from_millis(800),
            stale: Duration::from_secs(15),
        }
    }
}

impl LockOptions {
    /// Randomized backoff delay for the given attempt (0-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.min_timeout.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = base.min(self.max_timeout.as_millis() as f64);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_millis((capped * jitter) as u64)
    }
}

/// Held advisory lock on a store directory. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Path of the lock file guarding `dir`.
    #[must_use]
    pub fn lock_path(dir: &Path) -> PathBuf {
        dir.join("trade-store.lock")
    }

    /// Acquire the lock, retrying with backoff and breaking stale locks.
    pub fn acquire(dir: &Path, options: &LockOptions) -> Result<Self> {
        let path = Self::lock_path(dir);
        for attempt in 0..=options.retries {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path, options.stale) {
                        tracing::warn!(target: "opentrade::store", lock = %path.display(),
                            "breaking stale store lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if attempt == options.retries {
                        break;
                    }
                    thread::sleep(options.backoff(attempt));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(OpentradeError::Timeout {
            reason: format!("store lock busy: {}", path.display()),
        })
    }

    fn is_stale(path: &Path, stale: Duration) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > stale)
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Same-process transaction nesting state for one lock identity.
///
/// The depth lives here, in an explicit registry entry, rather than in
/// thread-local state: the owner is recorded, the count is inspectable, and
/// the behavior survives executors that migrate work across threads between
/// transactions.
#[derive(Debug, Default)]
pub struct TxnSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    owner: Option<ThreadId>,
    depth: usize,
}

impl TxnSlot {
    /// Enter the slot. Returns `true` when this is the outermost frame for
    /// the current thread (the caller must then take the real lock and
    /// snapshot). Re-entry from the owning thread nests; other threads wait
    /// with bounded backoff.
    pub fn enter(&self, options: &LockOptions) -> Result<bool> {
        let me = thread::current().id();
        for attempt in 0..=options.retries {
            {
                let mut state = self.state.lock().expect("slot poisoned");
                match state.owner {
                    None => {
                        state.owner = Some(me);
                        state.depth = 1;
                        return Ok(true);
                    }
                    Some(owner) if owner == me => {
                        state.depth += 1;
                        return Ok(false);
                    }
                    Some(_) => {}
                }
            }
            if attempt < options.retries {
                thread::sleep(options.backoff(attempt));
            }
        }
        Err(OpentradeError::Timeout {
            reason: "store transaction slot busy".to_string(),
        })
    }

    /// Leave the slot. Returns `true` when the outermost frame just exited.
    pub fn exit(&self) -> bool {
        let mut state = self.state.lock().expect("slot poisoned");
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            true
        } else {
            false
        }
    }

    /// Current nesting depth (diagnostics and tests).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().expect("slot poisoned").depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let options = LockOptions::default();
        {
            let _lock = DirLock::acquire(dir.path(), &options).unwrap();
            assert!(DirLock::lock_path(dir.path()).exists());
        }
        assert!(!DirLock::lock_path(dir.path()).exists());
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let options = LockOptions {
            retries: 1,
            min_timeout: Duration::from_millis(1),
            max_timeout: Duration::from_millis(2),
            ..LockOptions::default()
        };
        let _held = DirLock::acquire(dir.path(), &options).unwrap();
        let err = DirLock::acquire(dir.path(), &options).unwrap_err();
        assert!(matches!(err, OpentradeError::Timeout { .. }));
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let options = LockOptions {
            stale: Duration::from_millis(0),
            ..LockOptions::default()
        };
        // Plant an "abandoned" lock file, then acquire over it.
        std::fs::write(DirLock::lock_path(dir.path()), "12345").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let _lock = DirLock::acquire(dir.path(), &options).unwrap();
    }

    #[test]
    fn slot_nests_for_owner() {
        let slot = TxnSlot::default();
        let options = LockOptions::default();
        assert!(slot.enter(&options).unwrap(), "outer frame");
        assert!(!slot.enter(&options).unwrap(), "nested frame");
        assert_eq!(slot.depth(), 2);
        assert!(!slot.exit());
        assert!(slot.exit());
        assert_eq!(slot.depth(), 0);
    }

    #[test]
    fn slot_blocks_other_threads() {
        use std::sync::Arc;
        let slot = Arc::new(TxnSlot::default());
        let options = LockOptions {
            retries: 1,
            min_timeout: Duration::from_millis(1),
            max_timeout: Duration::from_millis(2),
            ..LockOptions::default()
        };
        slot.enter(&options).unwrap();
        let other = Arc::clone(&slot);
        let handle = std::thread::spawn(move || other.enter(&options));
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(OpentradeError::Timeout { .. })));
    }
}
