use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::{BlockHeader, BlockRecord, OperationRecord, SuperblockAssignment};
use crate::traits::LedgerStore;

#[derive(Default)]
struct Tables {
    blocks: HashMap<String, BlockRecord>,
    operations: HashMap<String, OperationRecord>,
    next_sequence: u64,
}

/// In-memory, HashMap-based ledger store.
///
/// Intended for tests and embedding. Both tables sit behind one `RwLock`,
/// so every trait method is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of block rows.
    pub fn block_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.blocks.len())
    }

    /// Full block row, including ownership pointers.
    pub fn block(&self, hash: &str) -> StoreResult<Option<BlockRecord>> {
        Ok(self.read()?.blocks.get(hash).cloned())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_block(&self, record: BlockRecord) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.blocks.contains_key(&record.hash) {
            return Err(StoreError::Duplicate {
                table: "blocks",
                hash: record.hash,
            });
        }
        debug!(block = %record.hash, id = record.block_id, "stored block row");
        tables.blocks.insert(record.hash.clone(), record);
        Ok(())
    }

    fn block_headers(&self) -> StoreResult<Vec<BlockHeader>> {
        let tables = self.read()?;
        let mut headers: Vec<BlockHeader> = tables.blocks.values().map(BlockRecord::header).collect();
        headers.sort_by(|a, b| a.block_id.cmp(&b.block_id).then_with(|| a.hash.cmp(&b.hash)));
        Ok(headers)
    }

    fn block_body(&self, hash: &str) -> StoreResult<Option<String>> {
        Ok(self.read()?.blocks.get(hash).map(|r| r.body.clone()))
    }

    fn assign_superblock(&self, assignments: &[SuperblockAssignment]) -> StoreResult<()> {
        let mut tables = self.write()?;
        if let Some(missing) = assignments
            .iter()
            .find(|a| !tables.blocks.contains_key(&a.block_hash))
        {
            return Err(StoreError::NotFound {
                table: "blocks",
                hash: missing.block_hash.clone(),
            });
        }
        for a in assignments {
            if let Some(row) = tables.blocks.get_mut(&a.block_hash) {
                row.superblock = Some(a.superblock.clone());
                row.parent_superblock = Some(a.parent_superblock.clone());
            }
        }
        Ok(())
    }

    fn delete_block(&self, hash: &str) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if tables.blocks.remove(hash).is_none() {
            return Ok(false);
        }
        for op in tables.operations.values_mut() {
            op.blocks.retain(|b| b != hash);
        }
        debug!(block = %hash, "deleted block row");
        Ok(true)
    }

    fn upsert_operation(&self, hash: &str, body: &str) -> StoreResult<u64> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.operations.get(hash) {
            return Ok(existing.sequence_id);
        }
        let sequence_id = tables.next_sequence;
        tables.next_sequence += 1;
        tables.operations.insert(
            hash.to_string(),
            OperationRecord {
                sequence_id,
                hash: hash.to_string(),
                blocks: Vec::new(),
                body: body.to_string(),
            },
        );
        Ok(sequence_id)
    }

    fn attach_operation_to_block(&self, op_hash: &str, block_hash: &str) -> StoreResult<()> {
        let mut tables = self.write()?;
        let row = tables
            .operations
            .get_mut(op_hash)
            .ok_or_else(|| StoreError::NotFound {
                table: "operations",
                hash: op_hash.to_string(),
            })?;
        if !row.blocks.iter().any(|b| b == block_hash) {
            row.blocks.push(block_hash.to_string());
        }
        Ok(())
    }

    fn operation(&self, hash: &str) -> StoreResult<Option<OperationRecord>> {
        Ok(self.read()?.operations.get(hash).cloned())
    }

    fn unassigned_operations(&self) -> StoreResult<Vec<OperationRecord>> {
        let tables = self.read()?;
        let mut ops: Vec<OperationRecord> = tables
            .operations
            .values()
            .filter(|op| op.blocks.is_empty())
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.sequence_id);
        Ok(ops)
    }

    fn delete_unassigned_operation(&self, hash: &str) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let removable = tables
            .operations
            .get(hash)
            .is_some_and(|op| op.blocks.is_empty());
        if removable {
            tables.operations.remove(hash);
        }
        Ok(removable)
    }
}

impl std::fmt::Debug for InMemoryLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self
            .read()
            .map(|t| (t.blocks.len(), t.operations.len()))
            .unwrap_or_default();
        f.debug_struct("InMemoryLedgerStore")
            .field("blocks", &counts.0)
            .field("operations", &counts.1)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(hash: &str, parent: &str, id: i32) -> BlockRecord {
        BlockRecord::orphan(hash, parent, id, format!("{{\"hash\":\"{hash}\"}}"))
    }

    #[test]
    fn insert_and_read_block() {
        let store = InMemoryLedgerStore::new();
        store.insert_block(row("a", "", 0)).unwrap();
        assert_eq!(store.block_count().unwrap(), 1);
        assert_eq!(store.block_body("a").unwrap().unwrap(), "{\"hash\":\"a\"}");
        assert!(store.block_body("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_block_is_rejected() {
        let store = InMemoryLedgerStore::new();
        store.insert_block(row("a", "", 0)).unwrap();
        assert_eq!(
            store.insert_block(row("a", "", 0)),
            Err(StoreError::Duplicate {
                table: "blocks",
                hash: "a".into()
            })
        );
    }

    #[test]
    fn headers_are_ordered_by_id_then_hash() {
        let store = InMemoryLedgerStore::new();
        store.insert_block(row("z", "a", 1)).unwrap();
        store.insert_block(row("a", "", 0)).unwrap();
        store.insert_block(row("b", "a", 1)).unwrap();
        let order: Vec<_> = store
            .block_headers()
            .unwrap()
            .into_iter()
            .map(|h| h.hash)
            .collect();
        assert_eq!(order, ["a", "b", "z"]);
    }

    #[test]
    fn assignment_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        store.insert_block(row("a", "", 0)).unwrap();
        let assign = |hash: &str| SuperblockAssignment {
            block_hash: hash.into(),
            superblock: "sb".into(),
            parent_superblock: String::new(),
        };

        let err = store.assign_superblock(&[assign("a"), assign("ghost")]);
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
        assert_eq!(store.block("a").unwrap().unwrap().superblock, None);

        store.assign_superblock(&[assign("a")]).unwrap();
        let header = &store.block_headers().unwrap()[0];
        assert_eq!(header.superblock.as_deref(), Some("sb"));
    }

    #[test]
    fn operations_keep_sequence_and_block_list() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.upsert_operation("op1", "{}").unwrap(), 0);
        assert_eq!(store.upsert_operation("op2", "{}").unwrap(), 1);
        assert_eq!(store.upsert_operation("op1", "{}").unwrap(), 0);

        store.attach_operation_to_block("op1", "blk").unwrap();
        store.attach_operation_to_block("op1", "blk").unwrap();
        store.attach_operation_to_block("op1", "blk2").unwrap();
        assert_eq!(store.operation("op1").unwrap().unwrap().blocks, ["blk", "blk2"]);

        let pending: Vec<_> = store
            .unassigned_operations()
            .unwrap()
            .into_iter()
            .map(|o| o.hash)
            .collect();
        assert_eq!(pending, ["op2"]);

        assert!(!store.delete_unassigned_operation("op1").unwrap());
        assert!(store.delete_unassigned_operation("op2").unwrap());
        assert!(store.unassigned_operations().unwrap().is_empty());
    }

    #[test]
    fn insert_with_operations_links_rows() {
        let store = InMemoryLedgerStore::new();
        store
            .insert_block_with_operations(
                row("blk", "", 0),
                &[("op1".into(), "{}".into()), ("op2".into(), "{}".into())],
            )
            .unwrap();
        assert_eq!(store.operation("op2").unwrap().unwrap().blocks, ["blk"]);
        assert!(store.unassigned_operations().unwrap().is_empty());
    }

    #[test]
    fn deleted_block_releases_its_operations() {
        let store = InMemoryLedgerStore::new();
        store.upsert_operation("queued", "{}").unwrap();
        store
            .insert_block_with_operations(row("blk", "", 0), &[("queued".into(), "{}".into())])
            .unwrap();
        store.attach_operation_to_block("queued", "other").unwrap();
        store.upsert_operation("only", "{}").unwrap();
        store.attach_operation_to_block("only", "blk").unwrap();

        assert!(store.delete_block("blk").unwrap());
        assert!(!store.delete_block("blk").unwrap());
        assert_eq!(store.block_count().unwrap(), 0);
        assert_eq!(store.operation("queued").unwrap().unwrap().blocks, ["other"]);

        let pending: Vec<_> = store
            .unassigned_operations()
            .unwrap()
            .into_iter()
            .map(|o| o.hash)
            .collect();
        assert_eq!(pending, ["only"]);
        assert_eq!(store.operation("queued").unwrap().unwrap().sequence_id, 0);
    }

    #[test]
    fn attach_to_unknown_operation_fails() {
        let store = InMemoryLedgerStore::new();
        assert!(matches!(
            store.attach_operation_to_block("nope", "blk"),
            Err(StoreError::NotFound { table: "operations", .. })
        ));
    }
}
