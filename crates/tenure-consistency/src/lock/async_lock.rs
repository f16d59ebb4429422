//! Per-descriptor exclusive lock state machine
//!
//! States are `Unlocked` and `Locked(holder)`. Every operation is keyed by a
//! `RequestId` and linearized by the lock's own mutex, so locks for different
//! descriptors never contend with each other. `unlock` and `timeout` are
//! idempotent and never fail.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tenure_common::{LockDescriptor, RequestId, TenureError};
use tracing::{debug, trace};

use super::result::AsyncResult;

pub struct AsyncLock {
    descriptor: LockDescriptor,
    state: Mutex<LockState>,
}

#[derive(Default)]
struct LockState {
    holder: Option<Holder>,
    /// FIFO by arrival. Empty whenever `holder` is `None`.
    queue: VecDeque<Waiter>,
}

struct Holder {
    request_id: RequestId,
    result: AsyncResult,
}

struct Waiter {
    request_id: RequestId,
    kind: WaitKind,
    result: AsyncResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitKind {
    Acquire,
    Available,
}

impl LockState {
    fn queued(&self, request_id: RequestId) -> Option<&Waiter> {
        self.queue.iter().find(|w| w.request_id == request_id)
    }

    fn queued_mut(&mut self, request_id: RequestId) -> Option<&mut Waiter> {
        self.queue.iter_mut().find(|w| w.request_id == request_id)
    }

    fn is_holder(&self, request_id: RequestId) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|h| h.request_id == request_id)
    }

    /// Clears the holder and walks the queue: availability waiters ahead of
    /// the first acquirer are completed, the first acquirer becomes holder.
    fn release(&mut self) -> Option<RequestId> {
        self.holder = None;
        while let Some(waiter) = self.queue.pop_front() {
            match waiter.kind {
                WaitKind::Available => {
                    waiter.result.complete();
                }
                WaitKind::Acquire => {
                    waiter.result.complete();
                    let promoted = waiter.request_id;
                    self.holder = Some(Holder {
                        request_id: promoted,
                        result: waiter.result,
                    });
                    return Some(promoted);
                }
            }
        }
        None
    }
}

impl AsyncLock {
    pub fn new(descriptor: LockDescriptor) -> Self {
        Self {
            descriptor,
            state: Mutex::new(LockState::default()),
        }
    }

    pub fn descriptor(&self) -> &LockDescriptor {
        &self.descriptor
    }

    /// Acquires the lock for `request_id`, queueing behind the current holder
    /// if needed. The result completes when the lock is granted. Repeating the
    /// call for a request that already holds or waits returns the same result.
    /// A request waiting for availability is upgraded to an acquirer in place.
    pub fn lock(&self, request_id: RequestId) -> AsyncResult {
        let mut state = self.state.lock();

        if state.holder.is_none() {
            let result = AsyncResult::completed();
            state.holder = Some(Holder {
                request_id,
                result: result.clone(),
            });
            trace!(descriptor = %self.descriptor, %request_id, "Lock granted immediately");
            return result;
        }

        if let Some(holder) = state
            .holder
            .as_ref()
            .filter(|h| h.request_id == request_id)
        {
            return holder.result.clone();
        }
        if let Some(waiter) = state.queued_mut(request_id) {
            if waiter.kind == WaitKind::Available {
                waiter.kind = WaitKind::Acquire;
                trace!(
                    descriptor = %self.descriptor,
                    %request_id,
                    "Availability waiter upgraded to acquirer"
                );
            }
            return waiter.result.clone();
        }

        let result = AsyncResult::pending();
        state.queue.push_back(Waiter {
            request_id,
            kind: WaitKind::Acquire,
            result: result.clone(),
        });
        trace!(
            descriptor = %self.descriptor,
            %request_id,
            position = state.queue.len(),
            "Lock request queued"
        );
        result
    }

    /// Completes once the lock becomes free (or immediately if it is free or
    /// held by `request_id`). Never grants the lock.
    pub fn wait_until_available(&self, request_id: RequestId) -> AsyncResult {
        let mut state = self.state.lock();

        if state.holder.is_none() || state.is_holder(request_id) {
            return AsyncResult::completed();
        }
        if let Some(waiter) = state.queued(request_id) {
            return waiter.result.clone();
        }

        let result = AsyncResult::pending();
        state.queue.push_back(Waiter {
            request_id,
            kind: WaitKind::Available,
            result: result.clone(),
        });
        result
    }

    /// Releases the lock if `request_id` holds it; otherwise does nothing.
    pub fn unlock(&self, request_id: RequestId) {
        let mut state = self.state.lock();
        if !state.is_holder(request_id) {
            return;
        }
        let promoted = state.release();
        debug!(
            descriptor = %self.descriptor,
            %request_id,
            promoted = ?promoted,
            "Lock released"
        );
    }

    /// Cancels `request_id`: a queued request is removed and resolved as timed
    /// out, a holder is released as by `unlock`. Unknown ids are ignored.
    pub fn timeout(&self, request_id: RequestId) {
        let mut state = self.state.lock();

        if state.is_holder(request_id) {
            let promoted = state.release();
            debug!(
                descriptor = %self.descriptor,
                %request_id,
                promoted = ?promoted,
                "Lock holder timed out"
            );
            return;
        }

        if let Some(position) = state
            .queue
            .iter()
            .position(|w| w.request_id == request_id)
            && let Some(waiter) = state.queue.remove(position)
        {
            waiter.result.time_out();
            trace!(descriptor = %self.descriptor, %request_id, "Queued request timed out");
        }
    }

    /// Abandons all state: the holder is dropped and every waiter is resolved
    /// with `error`. Used when the leadership term owning this lock ends.
    pub fn fail_all(&self, error: &TenureError) {
        let mut state = self.state.lock();
        state.holder = None;
        for waiter in state.queue.drain(..) {
            waiter.result.fail(error.clone());
        }
    }

    pub fn holder(&self) -> Option<RequestId> {
        self.state.lock().holder.as_ref().map(|h| h.request_id)
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// Queued request ids in promotion order.
    pub fn queued(&self) -> Vec<RequestId> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|w| w.request_id)
            .collect()
    }

    /// Unlocked with nobody waiting.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.holder.is_none() && state.queue.is_empty()
    }
}

impl std::fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLock")
            .field("descriptor", &self.descriptor)
            .field("holder", &self.holder())
            .field("queued", &self.queued().len())
            .finish()
    }
}
