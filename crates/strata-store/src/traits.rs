use crate::error::StoreResult;
use crate::record::{BlockHeader, BlockRecord, OperationRecord, SuperblockAssignment};

/// Persistent storage for blocks and operations.
///
/// All methods are synchronous and bounded. Implementations must be
/// `Send + Sync` so a single store can back the consensus manager and the
/// block manager at the same time.
pub trait LedgerStore: Send + Sync {
    /// Insert a new block row. Fails if the hash is already present.
    fn insert_block(&self, record: BlockRecord) -> StoreResult<()>;

    /// All block headers ordered by block id (ties by hash).
    fn block_headers(&self) -> StoreResult<Vec<BlockHeader>>;

    /// The serialized body of a block.
    fn block_body(&self, hash: &str) -> StoreResult<Option<String>>;

    /// Bulk-update the superblock ownership pointers of existing blocks.
    ///
    /// Either every assignment is applied or none is.
    fn assign_superblock(&self, assignments: &[SuperblockAssignment]) -> StoreResult<()>;

    /// Insert an operation row, or keep the existing one.
    ///
    /// Returns the row's sequence id.
    fn upsert_operation(&self, hash: &str, body: &str) -> StoreResult<u64>;

    /// Record that `block_hash` included the operation.
    fn attach_operation_to_block(&self, op_hash: &str, block_hash: &str) -> StoreResult<()>;

    /// Point lookup of an operation row.
    fn operation(&self, hash: &str) -> StoreResult<Option<OperationRecord>>;

    /// Operations not included in any block, in sequence order.
    fn unassigned_operations(&self) -> StoreResult<Vec<OperationRecord>>;

    /// Delete an operation row that no block includes.
    ///
    /// Returns `false` if the row is missing or already part of a block.
    fn delete_unassigned_operation(&self, hash: &str) -> StoreResult<bool>;

    /// Delete a block row and detach it from every operation that lists
    /// it. Operations left without a block become unassigned again.
    ///
    /// Returns `false` if the row is missing.
    fn delete_block(&self, hash: &str) -> StoreResult<bool>;

    /// Insert a block row and attach every listed operation to it.
    ///
    /// If any step fails the block row is deleted again before the error
    /// is returned.
    fn insert_block_with_operations(
        &self,
        record: BlockRecord,
        operations: &[(String, String)],
    ) -> StoreResult<()> {
        let block_hash = record.hash.clone();
        self.insert_block(record)?;
        let attached = operations.iter().try_for_each(|(op_hash, body)| {
            self.upsert_operation(op_hash, body)?;
            self.attach_operation_to_block(op_hash, &block_hash)
        });
        if let Err(e) = attached {
            self.delete_block(&block_hash)?;
            return Err(e);
        }
        Ok(())
    }
}
