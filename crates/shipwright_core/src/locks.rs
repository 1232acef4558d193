//! Single-writer discipline per target tree.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of per-target locks shared by every orchestrator of a process.
///
/// Runs against the same target identity are serialized; distinct targets
/// proceed independently.
#[derive(Clone, Default)]
pub struct TargetLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `target`.
    pub async fn acquire(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        debug!("Waiting for target lock: {}", target);
        lock.lock_owned().await
    }

    /// True while some run holds `target`.
    pub fn is_locked(&self, target: &str) -> bool {
        self.locks
            .lock()
            .get(target)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
