//! Term-scoped lock table

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tenure_common::{LeadershipToken, LockDescriptor, TenureError};
use tracing::info;

use super::async_lock::AsyncLock;

/// Locks created lazily on first reference, valid for one leadership term.
pub struct LockTable {
    epoch: LeadershipToken,
    locks: DashMap<LockDescriptor, Arc<AsyncLock>>,
}

impl LockTable {
    pub fn new(epoch: LeadershipToken) -> Self {
        Self {
            epoch,
            locks: DashMap::new(),
        }
    }

    pub fn epoch(&self) -> &LeadershipToken {
        &self.epoch
    }

    pub fn get(&self, descriptor: &LockDescriptor) -> Arc<AsyncLock> {
        if let Some(lock) = self.locks.get(descriptor) {
            return lock.clone();
        }
        self.locks
            .entry(descriptor.clone())
            .or_insert_with(|| Arc::new(AsyncLock::new(descriptor.clone())))
            .clone()
    }

    /// Locks for `descriptors` in canonical order, the order every
    /// multi-descriptor request acquires in.
    pub fn get_all<'a>(
        &self,
        descriptors: impl IntoIterator<Item = &'a LockDescriptor>,
    ) -> Vec<Arc<AsyncLock>> {
        let ordered: BTreeSet<&LockDescriptor> = descriptors.into_iter().collect();
        ordered.into_iter().map(|d| self.get(d)).collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drops idle locks nobody references outside the table.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || !lock.is_idle());
        before.saturating_sub(self.locks.len())
    }

    /// Ends the term: every lock is abandoned and its waiters fail with
    /// `LeadershipLost`.
    pub fn invalidate(&self) {
        let error = TenureError::LeadershipLost;
        for entry in self.locks.iter() {
            entry.value().fail_all(&error);
        }
        let discarded = self.locks.len();
        self.locks.clear();
        info!(epoch = %self.epoch, discarded, "Lock table invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_common::RequestId;

    fn table() -> LockTable {
        LockTable::new(LeadershipToken {
            leader_id: "node-1".to_string(),
            round: 1,
        })
    }

    #[test]
    fn test_get_is_lazy_and_stable() {
        let table = table();
        assert!(table.is_empty());

        let d = LockDescriptor::from("a");
        let first = table.get(&d);
        let second = table.get(&d);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_all_is_canonically_ordered() {
        let table = table();
        let descriptors = [
            LockDescriptor::from("c"),
            LockDescriptor::from("a"),
            LockDescriptor::from("b"),
        ];
        let locks = table.get_all(descriptors.iter());
        let names: Vec<String> = locks.iter().map(|l| l.descriptor().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_prune_idle_keeps_referenced_and_held_locks() {
        let table = table();
        let held = table.get(&LockDescriptor::from("held"));
        held.lock(RequestId::new());
        drop(held);

        let referenced = table.get(&LockDescriptor::from("referenced"));
        table.get(&LockDescriptor::from("idle"));

        assert_eq!(table.prune_idle(), 1);
        assert_eq!(table.len(), 2);
        drop(referenced);
        assert_eq!(table.prune_idle(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalidate_fails_waiters() {
        let table = table();
        let lock = table.get(&LockDescriptor::from("a"));
        lock.lock(RequestId::new());
        let pending = lock.lock(RequestId::new());

        table.invalidate();
        assert!(pending.is_failed());
        assert!(table.is_empty());
    }
}
