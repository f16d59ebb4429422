//! Single-assignment outcome of a lock or wait call

use std::sync::Arc;

use parking_lot::Mutex;
use tenure_common::TenureError;
use tokio::sync::Notify;

/// Terminal state of an [`AsyncResult`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    /// Granted (for `lock`) or observed available (for `wait_until_available`)
    Completed,
    /// Cancelled through `AsyncLock::timeout`
    TimedOut,
    Failed(TenureError),
}

/// Pending-or-resolved result shared between the lock state machine and the
/// caller awaiting it. Resolved at most once; later resolutions are ignored.
#[derive(Clone)]
pub struct AsyncResult {
    inner: Arc<ResultCell>,
}

struct ResultCell {
    outcome: Mutex<Option<LockOutcome>>,
    notify: Notify,
}

impl AsyncResult {
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(ResultCell {
                outcome: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    pub fn completed() -> Self {
        let result = Self::pending();
        result.resolve(LockOutcome::Completed);
        result
    }

    pub(crate) fn complete(&self) -> bool {
        self.resolve(LockOutcome::Completed)
    }

    pub(crate) fn time_out(&self) -> bool {
        self.resolve(LockOutcome::TimedOut)
    }

    pub(crate) fn fail(&self, error: TenureError) -> bool {
        self.resolve(LockOutcome::Failed(error))
    }

    fn resolve(&self, outcome: LockOutcome) -> bool {
        {
            let mut slot = self.inner.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn outcome(&self) -> Option<LockOutcome> {
        self.inner.outcome.lock().clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }

    pub fn is_completed_successfully(&self) -> bool {
        matches!(*self.inner.outcome.lock(), Some(LockOutcome::Completed))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(*self.inner.outcome.lock(), Some(LockOutcome::TimedOut))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.outcome.lock(), Some(LockOutcome::Failed(_)))
    }

    /// Whether both handles refer to the same underlying result.
    pub fn same_as(&self, other: &AsyncResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Suspends until the result is resolved.
    pub async fn wait(&self) -> LockOutcome {
        loop {
            // Registered before the check so a concurrent resolve cannot be missed.
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("outcome", &self.outcome())
            .finish()
    }
}
