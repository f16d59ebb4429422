//! Multi-descriptor acquisition
//!
//! Locks are taken one at a time in the order given (callers pass the
//! canonical order from `LockTable::get_all`), which rules out deadlock
//! between concurrent multi-descriptor requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use tenure_common::{BlockingMode, LockDescriptor, LockGroupBehavior, RequestId, Result};
use tracing::debug;

use super::async_lock::AsyncLock;
use super::result::LockOutcome;

/// Locks granted to one request and the descriptors it could not get.
#[derive(Debug, Default)]
pub struct Acquisition {
    pub acquired: Vec<Arc<AsyncLock>>,
    pub failed: BTreeSet<LockDescriptor>,
}

impl Acquisition {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.acquired.is_empty()
    }

    pub fn release(&self, request_id: RequestId) {
        for lock in &self.acquired {
            lock.unlock(request_id);
        }
    }
}

pub struct LockAcquirer;

impl LockAcquirer {
    /// Acquires `locks` for `request_id`.
    ///
    /// - `DoNotBlock`: a lock not granted immediately is cancelled and counted
    ///   as failed.
    /// - Blocking modes wait for each lock in turn; a lock cancelled through
    ///   `timeout` by someone else counts as failed.
    /// - `LockAllOrNone`: any failure releases the locks granted so far.
    ///
    /// A failed lock (leadership loss) aborts with that error. If the returned
    /// future is dropped before completion, every lock it touched is timed out.
    pub async fn acquire(
        request_id: RequestId,
        locks: Vec<Arc<AsyncLock>>,
        blocking_mode: BlockingMode,
        group_behavior: LockGroupBehavior,
    ) -> Result<Acquisition> {
        let mut guard = CancelOnDrop::new(request_id);
        let mut acquisition = Acquisition::default();

        for lock in locks {
            guard.touched.push(lock.clone());
            let result = lock.lock(request_id);

            let outcome = if blocking_mode == BlockingMode::DoNotBlock {
                if result.is_completed_successfully() {
                    LockOutcome::Completed
                } else {
                    lock.timeout(request_id);
                    LockOutcome::TimedOut
                }
            } else {
                result.wait().await
            };

            match outcome {
                LockOutcome::Completed => acquisition.acquired.push(lock),
                LockOutcome::TimedOut => {
                    acquisition.failed.insert(lock.descriptor().clone());
                    if group_behavior == LockGroupBehavior::LockAllOrNone {
                        break;
                    }
                }
                LockOutcome::Failed(error) => return Err(error),
            }
        }

        if group_behavior == LockGroupBehavior::LockAllOrNone && !acquisition.failed.is_empty() {
            acquisition.release(request_id);
            acquisition.acquired.clear();
        }

        debug!(
            %request_id,
            acquired = acquisition.acquired.len(),
            failed = acquisition.failed.len(),
            "Lock acquisition finished"
        );
        guard.disarm();
        Ok(acquisition)
    }
}

/// Times out every touched lock unless disarmed.
struct CancelOnDrop {
    request_id: RequestId,
    touched: Vec<Arc<AsyncLock>>,
    armed: bool,
}

impl CancelOnDrop {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            touched: Vec::new(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            for lock in &self.touched {
                lock.timeout(self.request_id);
            }
        }
    }
}
