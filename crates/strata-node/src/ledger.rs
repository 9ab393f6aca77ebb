//! Ledger object state.
//!
//! Objects created by executed operations are keyed by the creating
//! operation's type and the object's id. All writes go through a
//! [`StateTransaction`], which keeps an undo log: dropping the transaction
//! without [`commit`](StateTransaction::commit) restores the state exactly.

use std::collections::HashMap;

use strata_types::OpObject;

use crate::error::{NodeError, NodeResult};

/// `(operation type, object id)`.
pub type ObjectKey = (String, Vec<String>);

/// Objects applied by executed blocks.
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    objects: HashMap<ObjectKey, OpObject>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, op_type: &str, id: &[String]) -> Option<&OpObject> {
        self.objects.get(&key(op_type, id))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Open a transaction. Changes are undone unless committed.
    pub fn begin(&mut self) -> StateTransaction<'_> {
        StateTransaction {
            state: self,
            undo: Vec::new(),
        }
    }
}

enum Undo {
    Remove(ObjectKey),
    Restore(ObjectKey, OpObject),
}

/// A set of uncommitted changes to [`LedgerState`].
pub struct StateTransaction<'a> {
    state: &'a mut LedgerState,
    undo: Vec<Undo>,
}

impl StateTransaction<'_> {
    pub fn get(&self, op_type: &str, id: &[String]) -> Option<&OpObject> {
        self.state.get(op_type, id)
    }

    /// Insert a new object. Fails if the key is taken.
    pub fn create(&mut self, op_type: &str, object: OpObject) -> NodeResult<()> {
        let key = key(op_type, &object.id);
        if self.state.objects.contains_key(&key) {
            return Err(NodeError::ObjectExists {
                op_type: key.0,
                id: key.1,
            });
        }
        self.state.objects.insert(key.clone(), object);
        self.undo.push(Undo::Remove(key));
        Ok(())
    }

    /// Insert or replace an object.
    pub fn put(&mut self, op_type: &str, object: OpObject) {
        let key = key(op_type, &object.id);
        let undo = match self.state.objects.insert(key.clone(), object) {
            Some(previous) => Undo::Restore(key, previous),
            None => Undo::Remove(key),
        };
        self.undo.push(undo);
    }

    /// Remove an object. Fails if it does not exist.
    pub fn delete(&mut self, op_type: &str, id: &[String]) -> NodeResult<OpObject> {
        let key = key(op_type, id);
        let removed = self
            .state
            .objects
            .remove(&key)
            .ok_or_else(|| NodeError::ObjectMissing {
                op_type: op_type.to_string(),
                id: id.to_vec(),
            })?;
        self.undo.push(Undo::Restore(key, removed.clone()));
        Ok(removed)
    }

    /// Marker for [`rollback_to`](Self::rollback_to).
    pub fn savepoint(&self) -> usize {
        self.undo.len()
    }

    /// Undo every change made after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: usize) {
        while self.undo.len() > savepoint {
            match self.undo.pop() {
                Some(Undo::Remove(key)) => {
                    self.state.objects.remove(&key);
                }
                Some(Undo::Restore(key, object)) => {
                    self.state.objects.insert(key, object);
                }
                None => break,
            }
        }
    }

    /// Keep every change. Returns the number of writes.
    pub fn commit(mut self) -> usize {
        let writes = self.undo.len();
        self.undo.clear();
        writes
    }

    /// Undo every change.
    pub fn rollback(self) {}
}

impl Drop for StateTransaction<'_> {
    fn drop(&mut self) {
        self.rollback_to(0);
    }
}

fn key(op_type: &str, id: &[String]) -> ObjectKey {
    (op_type.to_string(), id.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str, value: i64) -> OpObject {
        OpObject::new([id]).with_field("value", value)
    }

    fn id(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn commit_keeps_changes() {
        let mut state = LedgerState::new();
        let mut tx = state.begin();
        tx.create("t", obj("a", 1)).unwrap();
        tx.create("t", obj("b", 2)).unwrap();
        assert_eq!(tx.commit(), 2);
        assert_eq!(state.len(), 2);
        assert!(state.get("t", &id("a")).is_some());
        assert!(state.get("other", &id("a")).is_none());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut state = LedgerState::new();
        {
            let mut tx = state.begin();
            tx.create("t", obj("keep", 1)).unwrap();
        }
        assert!(state.is_empty());

        let mut tx = state.begin();
        tx.create("t", obj("keep", 1)).unwrap();
        tx.commit();

        {
            let mut tx = state.begin();
            tx.put("t", obj("keep", 9));
            tx.delete("t", &id("keep")).unwrap();
            tx.create("t", obj("new", 3)).unwrap();
        }
        assert_eq!(state.len(), 1);
        let kept = state.get("t", &id("keep")).unwrap();
        assert_eq!(kept.fields["value"], 1);
    }

    #[test]
    fn savepoints_undo_partial_work() {
        let mut state = LedgerState::new();
        let mut tx = state.begin();
        tx.create("t", obj("a", 1)).unwrap();
        let sp = tx.savepoint();
        tx.create("t", obj("b", 2)).unwrap();
        tx.put("t", obj("a", 5));
        tx.rollback_to(sp);
        assert_eq!(tx.get("t", &id("a")).unwrap().fields["value"], 1);
        assert!(tx.get("t", &id("b")).is_none());
        tx.commit();
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn create_and_delete_enforce_existence() {
        let mut state = LedgerState::new();
        let mut tx = state.begin();
        tx.create("t", obj("a", 1)).unwrap();
        assert!(matches!(
            tx.create("t", obj("a", 2)),
            Err(NodeError::ObjectExists { .. })
        ));
        assert!(matches!(
            tx.delete("t", &id("zz")),
            Err(NodeError::ObjectMissing { .. })
        ));
        tx.rollback();
        assert!(state.is_empty());
    }
}
