//! Property-based tests for the per-descriptor lock state machine
//!
//! Random operation sequences from a handful of requests are applied both to
//! an `AsyncLock` and to a plain queue model; holder and queue must agree
//! after every step.

use std::collections::VecDeque;

use proptest::prelude::*;
use tenure_common::{LockDescriptor, RequestId};
use tenure_consistency::{AsyncLock, AsyncResult};

const CLIENTS: usize = 4;

#[derive(Clone, Copy, Debug)]
enum Op {
    Lock(usize),
    Unlock(usize),
    Timeout(usize),
    Wait(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..CLIENTS).prop_map(Op::Lock),
        2 => (0..CLIENTS).prop_map(Op::Unlock),
        1 => (0..CLIENTS).prop_map(Op::Timeout),
        1 => (0..CLIENTS).prop_map(Op::Wait),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Acquire,
    Available,
}

#[derive(Default)]
struct Model {
    holder: Option<usize>,
    queue: VecDeque<(usize, Kind)>,
}

impl Model {
    fn is_queued(&self, client: usize) -> bool {
        self.queue.iter().any(|(c, _)| *c == client)
    }

    fn release(&mut self) {
        self.holder = None;
        while let Some((client, kind)) = self.queue.pop_front() {
            if kind == Kind::Acquire {
                self.holder = Some(client);
                break;
            }
        }
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Lock(c) => {
                if self.holder.is_none() {
                    self.holder = Some(c);
                } else if let Some(entry) = self.queue.iter_mut().find(|(q, _)| *q == c) {
                    entry.1 = Kind::Acquire;
                } else if self.holder != Some(c) {
                    self.queue.push_back((c, Kind::Acquire));
                }
            }
            Op::Wait(c) => {
                if self.holder.is_some() && self.holder != Some(c) && !self.is_queued(c) {
                    self.queue.push_back((c, Kind::Available));
                }
            }
            Op::Unlock(c) => {
                if self.holder == Some(c) {
                    self.release();
                }
            }
            Op::Timeout(c) => {
                if self.holder == Some(c) {
                    self.release();
                } else {
                    self.queue.retain(|(q, _)| *q != c);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_lock_matches_fifo_model(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let lock = AsyncLock::new(LockDescriptor::from("resource"));
        let ids: Vec<RequestId> = (0..CLIENTS).map(|_| RequestId::new()).collect();
        let mut results: Vec<Option<AsyncResult>> = vec![None; CLIENTS];
        let mut model = Model::default();

        for op in ops {
            let queued_acquirer = match op {
                Op::Timeout(c) => model.queue.contains(&(c, Kind::Acquire)),
                _ => false,
            };

            match op {
                Op::Lock(c) => results[c] = Some(lock.lock(ids[c])),
                Op::Unlock(c) => lock.unlock(ids[c]),
                Op::Timeout(c) => lock.timeout(ids[c]),
                Op::Wait(c) => {
                    lock.wait_until_available(ids[c]);
                }
            }
            model.apply(op);

            if let Op::Timeout(c) = op
                && queued_acquirer
            {
                let result = results[c].as_ref().expect("queued request has a result");
                prop_assert!(result.is_timed_out());
            }

            prop_assert_eq!(lock.holder(), model.holder.map(|c| ids[c]));
            let expected_queue: Vec<RequestId> = model.queue.iter().map(|(c, _)| ids[*c]).collect();
            prop_assert_eq!(lock.queued(), expected_queue);

            if let Some(holder) = model.holder {
                let result = results[holder].as_ref().expect("holder has a result");
                prop_assert!(result.is_completed_successfully());
            }
            for (client, kind) in &model.queue {
                if *kind == Kind::Acquire {
                    let result = results[*client].as_ref().expect("queued request has a result");
                    prop_assert!(!result.is_done());
                }
            }
        }
    }

    #[test]
    fn test_release_empties_lock(ops in prop::collection::vec(op_strategy(), 1..32)) {
        let lock = AsyncLock::new(LockDescriptor::from("resource"));
        let ids: Vec<RequestId> = (0..CLIENTS).map(|_| RequestId::new()).collect();

        for op in ops {
            match op {
                Op::Lock(c) => {
                    lock.lock(ids[c]);
                }
                Op::Unlock(c) => lock.unlock(ids[c]),
                Op::Timeout(c) => lock.timeout(ids[c]),
                Op::Wait(c) => {
                    lock.wait_until_available(ids[c]);
                }
            }
        }

        // Timing out every request, repeatedly, always drains the lock.
        for _ in 0..2 {
            for id in &ids {
                lock.timeout(*id);
            }
        }
        prop_assert!(lock.is_idle());
    }
}
