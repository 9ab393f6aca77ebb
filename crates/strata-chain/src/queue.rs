use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use strata_types::Operation;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    ops: Vec<Operation>,
    hashes: HashSet<String>,
}

/// Operations accepted for a future block, in arrival order.
///
/// Producers append under a short write lock; the block builder works on a
/// [`snapshot`](Self::snapshot) and removes entries only once they are
/// committed or dropped.
#[derive(Default)]
pub struct OperationsQueue {
    state: RwLock<QueueState>,
}

impl OperationsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation. Returns `false` if its hash is already queued.
    pub fn push(&self, op: Operation) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.hashes.insert(op.hash.clone()) {
            return false;
        }
        debug!(op = %op.hash, queued = state.ops.len() + 1, "operation queued");
        state.ops.push(op);
        true
    }

    /// Copy of the queued operations in arrival order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ops
            .clone()
    }

    /// Remove the operations with the given hashes, returning them in queue
    /// order.
    pub fn remove<'a, I>(&self, hashes: I) -> Vec<Operation>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let targets: HashSet<&str> = hashes.into_iter().collect();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.ops)
            .into_iter()
            .partition(|op| targets.contains(op.hash.as_str()));
        state.ops = kept;
        for op in &removed {
            state.hashes.remove(&op.hash);
        }
        removed
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hashes
            .contains(hash)
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OperationsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationsQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(hash: &str) -> Operation {
        let mut op = Operation::new("t");
        op.hash = hash.to_string();
        op
    }

    #[test]
    fn keeps_arrival_order_and_rejects_duplicates() {
        let queue = OperationsQueue::new();
        assert!(queue.push(op("b")));
        assert!(queue.push(op("a")));
        assert!(!queue.push(op("b")));
        let hashes: Vec<_> = queue.snapshot().into_iter().map(|o| o.hash).collect();
        assert_eq!(hashes, ["b", "a"]);
    }

    #[test]
    fn remove_returns_removed_in_queue_order() {
        let queue = OperationsQueue::new();
        for h in ["a", "b", "c", "d"] {
            queue.push(op(h));
        }
        let removed = queue.remove(["d", "b", "zz"]);
        let removed: Vec<_> = removed.into_iter().map(|o| o.hash).collect();
        assert_eq!(removed, ["b", "d"]);
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains("b"));
        assert!(queue.push(op("b")));
    }

    #[test]
    fn snapshot_does_not_drain() {
        let queue = OperationsQueue::new();
        queue.push(op("a"));
        let _ = queue.snapshot();
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
    }
}
