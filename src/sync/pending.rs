use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::task::{MutationKind, TaskId, TaskNode};
use crate::model::tree::Subtree;

/// What a pending mutation needs to undo itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorState {
    /// The node before a field write
    Node(TaskNode),
    /// Everything a delete detached
    Subtree(Subtree),
    /// Nothing existed before (create)
    Absent,
}

/// A mutation applied locally and not yet answered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub seq: u64,
    pub target: TaskId,
    pub kind: MutationKind,
    pub prior: PriorState,
}

/// In-flight mutations by issuance order.
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: BTreeMap<u64, PendingMutation>,
}

impl PendingLedger {
    pub fn record(&mut self, mutation: PendingMutation) {
        self.entries.insert(mutation.seq, mutation);
    }

    pub fn resolve(&mut self, seq: u64) -> Option<PendingMutation> {
        self.entries.remove(&seq)
    }

    pub fn for_target(&self, id: TaskId) -> impl Iterator<Item = &PendingMutation> {
        self.entries.values().filter(move |m| m.target == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One FIFO lock per node id. tokio's mutex hands the lock to waiters in
/// the order they asked, which gives per-node issuance order.
#[derive(Debug, Default)]
pub struct NodeGates {
    gates: RefCell<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl NodeGates {
    pub fn gate(&self, id: TaskId) -> Arc<Mutex<()>> {
        self.gates.borrow_mut().entry(id).or_default().clone()
    }

    /// Take the gate for `id` without waiting. `None` if someone else holds
    /// or is queued on it.
    pub fn claim(&self, id: TaskId) -> Option<OwnedMutexGuard<()>> {
        self.gate(id).try_lock_owned().ok()
    }

    /// Drop gates nobody holds or waits on.
    pub fn prune(&self) {
        self.gates
            .borrow_mut()
            .retain(|_, gate| Arc::strong_count(gate) > 1);
    }

    pub fn len(&self) -> usize {
        self.gates.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ledger_resolves_by_seq() {
        let mut ledger = PendingLedger::default();
        for seq in 1..=3 {
            ledger.record(PendingMutation {
                seq,
                target: TaskId(if seq == 2 { 9 } else { 4 }),
                kind: MutationKind::StatusChange,
                prior: PriorState::Absent,
            });
        }
        assert_eq!(ledger.for_target(TaskId(4)).map(|m| m.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ledger.resolve(1).map(|m| m.seq), Some(1));
        assert_eq!(ledger.resolve(1), None);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn gates_are_pruned_when_idle() {
        let gates = NodeGates::default();
        let guard = gates.claim(TaskId(1)).unwrap();
        assert!(gates.claim(TaskId(1)).is_none());
        gates.prune();
        assert_eq!(gates.len(), 1);
        drop(guard);
        gates.prune();
        assert!(gates.is_empty());
    }
}
