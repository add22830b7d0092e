use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::{LockError, LockSession, Locker};
use crate::observability::metrics;

/// Process-local locker. Only safe with a single controller replica.
#[derive(Debug, Default)]
pub struct InMemoryLocker {
    held: Mutex<HashSet<String>>,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn obtain(&self, key: &str) -> Result<LockSession, LockError> {
        let mut held = self.held.lock().map_err(|e| LockError::Backend {
            key: key.to_string(),
            message: format!("lock table poisoned: {e}"),
        })?;

        if !held.insert(key.to_string()) {
            metrics::increment_lock_contention();
            return Err(LockError::AlreadyLocked(key.to_string()));
        }
        debug!(lock.key = %key, "Lock obtained");
        Ok(LockSession::new(key, key))
    }

    async fn release(&self, session: LockSession) {
        match self.held.lock() {
            Ok(mut held) => {
                held.remove(session.key());
                debug!(lock.key = %session.key(), "Lock released");
            }
            Err(e) => warn!(lock.key = %session.key(), "Cannot release lock: {}", e),
        }
    }
}
