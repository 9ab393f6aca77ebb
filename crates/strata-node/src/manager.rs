use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use strata_chain::{BlockChain, OperationsQueue};
use strata_consensus::ConsensusManager;
use strata_crypto::SigningKey;
use strata_rules::{sign_block, validate_block, validate_hash, validate_signatures};
use strata_store::LedgerStore;
use strata_types::{codec, Block, OpObject, Operation};
use strata_users::ActiveUsers;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::handlers::OperationsRegistry;
use crate::ledger::{LedgerState, StateTransaction};
use crate::state::BlockchainState;

/// The block production and replication state machine.
///
/// One block build or replication runs at a time. Readers take cheap
/// snapshots of the chain through [`chain`](Self::chain); a committed block
/// publishes a new snapshot by swapping one `Arc`.
pub struct BlockManager<S: LedgerStore> {
    config: NodeConfig,
    registry: OperationsRegistry,
    consensus: ConsensusManager<S>,
    signing_key: Option<SigningKey>,
    chain: RwLock<Arc<BlockChain>>,
    queue: OperationsQueue,
    /// Identities as of the last committed block.
    block_users: Arc<ActiveUsers>,
    /// Identities introduced by queued operations, over `block_users`.
    queue_users: Arc<ActiveUsers>,
    ledger: Mutex<LedgerState>,
    state: Mutex<BlockchainState>,
    production: Mutex<()>,
}

impl<S: LedgerStore> BlockManager<S> {
    /// Create a manager in the `INIT` state. Call [`init`](Self::init)
    /// before use.
    pub fn new(config: NodeConfig, registry: OperationsRegistry, store: Arc<S>) -> NodeResult<Self> {
        config.validate()?;
        let block_users = Arc::new(ActiveUsers::new());
        let queue_users = Arc::new(ActiveUsers::layered(Arc::clone(&block_users)));
        Ok(Self {
            consensus: ConsensusManager::new(store, config.compaction.clone()),
            config,
            registry,
            signing_key: None,
            chain: RwLock::new(Arc::new(BlockChain::new())),
            queue: OperationsQueue::new(),
            block_users,
            queue_users,
            ledger: Mutex::new(LedgerState::new()),
            state: Mutex::new(BlockchainState::Init),
            production: Mutex::new(()),
        })
    }

    /// Key used to sign locally produced blocks as `config.server_user`.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn state(&self) -> BlockchainState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the canonical chain.
    pub fn chain(&self) -> Arc<BlockChain> {
        Arc::clone(&self.chain.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn last_block(&self) -> Option<Arc<Block>> {
        self.chain().last_block().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued operations in arrival order.
    pub fn queued_operations(&self) -> Vec<Operation> {
        self.queue.snapshot()
    }

    /// The queue layer of the active-user index; reads fall through to the
    /// committed identities.
    pub fn users(&self) -> &Arc<ActiveUsers> {
        &self.queue_users
    }

    /// Identities as of the last committed block.
    pub fn block_users(&self) -> &Arc<ActiveUsers> {
        &self.block_users
    }

    pub fn ledger_object(&self, op_type: &str, id: &[String]) -> Option<OpObject> {
        self.lock_ledger().get(op_type, id).cloned()
    }

    pub fn ledger_len(&self) -> usize {
        self.lock_ledger().len()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperationsRegistry {
        &self.registry
    }

    pub fn consensus(&self) -> &ConsensusManager<S> {
        &self.consensus
    }

    fn lock_ledger(&self) -> MutexGuard<'_, LedgerState> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------

    fn transition(&self, from: BlockchainState, to: BlockchainState) -> NodeResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(NodeError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        debug_assert!(from.can_transition_to(to));
        *state = to;
        debug!(from = %from, to = %to, "state transition");
        Ok(())
    }

    fn set_state(&self, to: BlockchainState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = %*state, to = %to, "state transition");
        *state = to;
    }

    /// Stop accepting block builds and replications.
    pub fn pause(&self) -> NodeResult<()> {
        self.transition(BlockchainState::Ready, BlockchainState::Paused)
    }

    pub fn resume(&self) -> NodeResult<()> {
        self.transition(BlockchainState::Paused, BlockchainState::Ready)
    }

    /// Leave `FAILED` after the cause has been dealt with.
    ///
    /// A failed block leaves nothing behind in the store or in memory, so
    /// the node resumes from the last committed block.
    pub fn reset_failed(&self) -> NodeResult<()> {
        self.transition(BlockchainState::Failed, BlockchainState::Ready)?;
        info!("block manager reset after failure");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Startup
    // ---------------------------------------------------------------

    /// Reconcile the chain from the store, replay every block into ledger
    /// state and the user index, and requeue pending operations.
    pub fn init(&self) -> NodeResult<()> {
        let _production = self.production.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state();
        if state != BlockchainState::Init {
            return Err(NodeError::InvalidState {
                expected: BlockchainState::Init,
                actual: state,
            });
        }

        let loaded = self.consensus.load()?;
        if let Err(e) = self.replay(&loaded.chain) {
            self.block_users.clear();
            return Err(e);
        }
        let blocks = loaded.chain.len();
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(loaded.chain);

        let mut requeued = 0;
        for op in loaded.pending {
            match self.admit(&op) {
                Ok(()) => {
                    if self.queue.push(op) {
                        requeued += 1;
                    }
                }
                Err(e) => {
                    warn!(op = %op.hash, error = %e, "dropping stored operation");
                    self.consensus.remove_operation(&op.hash)?;
                }
            }
        }

        self.transition(BlockchainState::Init, BlockchainState::Ready)?;
        info!(blocks, requeued, "block manager ready");
        Ok(())
    }

    fn replay(&self, chain: &BlockChain) -> NodeResult<()> {
        let superblocks = chain.superblocks();
        let blocks = superblocks
            .iter()
            .flat_map(|sb| sb.blocks())
            .chain(chain.head());

        let mut ledger = self.lock_ledger();
        let mut tx = ledger.begin();
        for block in blocks {
            for op in &block.ops {
                self.registry.execute(op, &mut tx)?;
                self.block_users.add_auth_operation(op)?;
            }
        }
        let writes = tx.commit();
        debug!(writes, "replayed stored blocks");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Queue
    // ---------------------------------------------------------------

    /// Validate an operation against the queue layer, persist it and append
    /// it to the pending queue.
    pub fn add_operation(&self, op: Operation) -> NodeResult<()> {
        self.admit(&op)?;
        self.enqueue(op)
    }

    /// Persist and queue an admitted operation.
    ///
    /// Admission reads the chain without the production lock, so a block
    /// committed in between may already carry the operation. It is taken
    /// back out of the queue in that case.
    fn enqueue(&self, op: Operation) -> NodeResult<()> {
        if let Err(e) = self.consensus.insert_operation(&op) {
            self.queue_users.remove_auth_operation(&op);
            return Err(e.into());
        }
        let hash = op.hash.clone();
        self.queue.push(op);
        if !self.chain().contains_operation(&hash) {
            debug!(op = %hash, "operation accepted");
            return Ok(());
        }
        for op in self.queue.remove([hash.as_str()]) {
            self.queue_users.remove_auth_operation(&op);
        }
        Err(NodeError::DuplicateOperation(hash))
    }

    fn admit(&self, op: &Operation) -> NodeResult<()> {
        let size = encoded_size(op)?;
        if size > self.config.max_operation_size_bytes {
            return Err(NodeError::OperationTooLarge {
                op: op.hash.clone(),
                size,
                limit: self.config.max_operation_size_bytes,
            });
        }
        if self.queue.contains(&op.hash) || self.chain().contains_operation(&op.hash) {
            return Err(NodeError::DuplicateOperation(op.hash.clone()));
        }
        validate_hash(op)?;
        validate_signatures(&*self.queue_users, op)?;
        self.registry.prepare(op, &self.queue_users)?;
        self.queue_users.add_auth_operation(op)?;
        Ok(())
    }

    /// Remove queued operations by hash. Returns how many were removed.
    pub fn remove_queued_operations(&self, hashes: &[&str]) -> NodeResult<usize> {
        let removed = self.queue.remove(hashes.iter().copied());
        for op in &removed {
            self.queue_users.remove_auth_operation(op);
            self.consensus.remove_operation(&op.hash)?;
        }
        Ok(removed.len())
    }

    fn drop_operations(&self, dropped: &[Operation]) {
        if dropped.is_empty() {
            return;
        }
        let removed = self.queue.remove(dropped.iter().map(|op| op.hash.as_str()));
        for op in &removed {
            self.queue_users.remove_auth_operation(op);
            if let Err(e) = self.consensus.remove_operation(&op.hash) {
                warn!(op = %op.hash, error = %e, "failed to delete dropped operation");
            }
        }
    }

    // ---------------------------------------------------------------
    // Block production
    // ---------------------------------------------------------------

    /// Build, sign and commit a block from the pending queue.
    ///
    /// Returns `Ok(None)` when no operation qualified and empty blocks are
    /// not allowed. Preparation failures restore `READY`; execution
    /// failures leave the manager `FAILED`.
    pub fn create_block(&self) -> NodeResult<Option<Arc<Block>>> {
        let _production = self.production.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition(BlockchainState::Ready, BlockchainState::Preparing)?;

        let block = match self.prepare_block() {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!("no operations to build a block from");
                self.set_state(BlockchainState::Ready);
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "block preparation failed");
                self.set_state(BlockchainState::Ready);
                return Err(e);
            }
        };

        self.transition(BlockchainState::Preparing, BlockchainState::Executing)?;
        self.execute_and_commit(block).map(Some)
    }

    fn prepare_block(&self) -> NodeResult<Option<Block>> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| NodeError::NoProducer("no signing key".into()))?;
        if self.config.server_user.is_empty() {
            return Err(NodeError::NoProducer("server_user is not configured".into()));
        }

        let chain = self.chain();
        let prev = chain.last_block().cloned();
        let staging = ActiveUsers::layered(Arc::clone(&self.block_users));

        let mut accepted = Vec::new();
        let mut dropped = Vec::new();
        {
            let mut ledger = self.lock_ledger();
            let mut tx = ledger.begin();
            let mut block_bytes = 0;
            for op in self.queue.snapshot() {
                if accepted.len() >= self.config.max_block_operations {
                    break;
                }
                let size = match encoded_size(&op) {
                    Ok(size) if size <= self.config.max_operation_size_bytes => size,
                    Ok(size) => {
                        warn!(op = %op.hash, size, "dropping oversized operation");
                        dropped.push(op);
                        continue;
                    }
                    Err(e) => {
                        warn!(op = %op.hash, error = %e, "dropping unencodable operation");
                        dropped.push(op);
                        continue;
                    }
                };
                if block_bytes + size > self.config.max_block_size_bytes {
                    break;
                }

                let savepoint = tx.savepoint();
                match self.try_candidate(&chain, &staging, &mut tx, &op) {
                    Ok(()) => {
                        block_bytes += size;
                        accepted.push(op);
                    }
                    Err(e) => {
                        tx.rollback_to(savepoint);
                        warn!(op = %op.hash, error = %e, "dropping operation");
                        dropped.push(op);
                    }
                }
            }
            tx.rollback();
        }
        self.drop_operations(&dropped);

        if accepted.is_empty() && !self.config.allow_empty_blocks {
            return Ok(None);
        }

        let mut block = Block::prepare(accepted);
        sign_block(&mut block, prev.as_deref(), &self.config.server_user, key)?;
        validate_block(
            &*chain,
            &staging,
            &block,
            prev.as_deref(),
            self.config.allow_empty_blocks,
        )?;
        debug!(block = %block.hash, id = block.block_id, ops = block.ops.len(), "block sealed");
        Ok(Some(block))
    }

    /// Full acceptance check for one candidate, applied to the dry-run
    /// transaction and staging layer on success.
    fn try_candidate(
        &self,
        chain: &BlockChain,
        staging: &ActiveUsers,
        tx: &mut StateTransaction<'_>,
        op: &Operation,
    ) -> NodeResult<()> {
        if chain.contains_operation(&op.hash) {
            return Err(NodeError::DuplicateOperation(op.hash.clone()));
        }
        validate_hash(op)?;
        validate_signatures(staging, op)?;
        self.registry.prepare(op, staging)?;
        self.registry.execute(op, tx)?;
        staging.add_auth_operation(op)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Replication
    // ---------------------------------------------------------------

    /// Validate and commit a block produced elsewhere.
    ///
    /// Every operation must pass the same checks as a local candidate; one
    /// bad operation rejects the whole block and restores `READY`.
    pub fn replicate_block(&self, block: Block) -> NodeResult<Arc<Block>> {
        let _production = self.production.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition(BlockchainState::Ready, BlockchainState::Executing)?;

        if let Err(e) = self.validate_replicated(&block) {
            warn!(block = %block.hash, error = %e, "rejected replicated block");
            self.set_state(BlockchainState::Ready);
            return Err(e);
        }
        self.execute_and_commit(block)
    }

    fn validate_replicated(&self, block: &Block) -> NodeResult<()> {
        let chain = self.chain();
        let prev = chain.last_block().cloned();
        let staging = ActiveUsers::layered(Arc::clone(&self.block_users));

        for op in &block.ops {
            if chain.contains_operation(&op.hash) {
                return Err(NodeError::DuplicateOperation(op.hash.clone()));
            }
            let size = encoded_size(op)?;
            if size > self.config.max_operation_size_bytes {
                return Err(NodeError::OperationTooLarge {
                    op: op.hash.clone(),
                    size,
                    limit: self.config.max_operation_size_bytes,
                });
            }
            validate_hash(op)?;
            validate_signatures(&staging, op)?;
            self.registry.prepare(op, &staging)?;
            // Uniqueness is enforced when the block executes.
            if let Err(e) = staging.add_auth_operation(op) {
                debug!(op = %op.hash, error = %e, "auth operation left to execution");
            }
        }

        validate_block(
            &*chain,
            &staging,
            block,
            prev.as_deref(),
            self.config.allow_empty_blocks,
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------

    fn execute_and_commit(&self, block: Block) -> NodeResult<Arc<Block>> {
        let hash = block.hash.clone();
        match self.execute_block(block) {
            Ok(block) => {
                self.set_state(BlockchainState::Ready);
                info!(
                    block = %block.hash,
                    id = block.block_id,
                    ops = block.ops.len(),
                    "committed block"
                );
                Ok(block)
            }
            Err(e) => {
                error!(block = %hash, error = %e, "block execution failed");
                self.set_state(BlockchainState::Failed);
                Err(NodeError::Execution {
                    block: hash,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Execute every operation and publish the block.
    ///
    /// Every in-memory step that can fail runs before the first store
    /// write. If persisting the block or its superblock fails, the block row
    /// is deleted again and the user index is unwound, so a failed block
    /// leaves nothing behind. A failed compaction keeps the uncompacted
    /// chain.
    fn execute_block(&self, mut block: Block) -> NodeResult<Arc<Block>> {
        block.ops = std::mem::take(&mut block.ops)
            .into_iter()
            .map(Operation::frozen)
            .collect();

        let staging = ActiveUsers::layered(Arc::clone(&self.block_users));
        let mut ledger = self.lock_ledger();
        let mut tx = ledger.begin();
        for op in &block.ops {
            self.registry.execute(op, &mut tx)?;
            staging.add_auth_operation(op)?;
            debug!(op = %op.hash, kind = %op.op_type, "executed operation");
        }

        let block = Arc::new(block);
        let mut next = BlockChain::clone(&self.chain());
        next.append(Arc::clone(&block))?;
        let sealed = next.head().len() >= self.config.superblock_size;
        if sealed {
            next.seal_head()?;
        }

        if let Err(e) = staging.commit_into_parent() {
            self.unwind_block_users(&block);
            return Err(e.into());
        }
        if let Err(e) = self.persist_block(&block, &next, sealed) {
            self.unwind_block_users(&block);
            return Err(e);
        }
        match self.consensus.compact(&next) {
            Ok(Some(compacted)) => next = compacted,
            Ok(None) => {}
            Err(e) => warn!(block = %block.hash, error = %e, "compaction failed"),
        }

        tx.commit();
        drop(ledger);

        for op in self.queue.remove(block.operation_hashes()) {
            self.queue_users.remove_auth_operation(&op);
        }
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(block)
    }

    /// Store the block and, when it sealed the head, the new superblock.
    /// The block row is deleted again if the superblock cannot be saved.
    fn persist_block(&self, block: &Block, next: &BlockChain, sealed: bool) -> NodeResult<()> {
        self.consensus.insert_block(block)?;
        if !sealed {
            return Ok(());
        }
        if let Err(e) = self.consensus.save_main_chain(next) {
            if let Err(undo) = self.consensus.discard_block(&block.hash) {
                error!(block = %block.hash, error = %undo, "failed to discard unsaved block");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn unwind_block_users(&self, block: &Block) {
        for op in block.ops.iter().rev() {
            self.block_users.remove_auth_operation(op);
        }
    }
}

fn encoded_size(op: &Operation) -> NodeResult<usize> {
    Ok(codec::to_json(op)?.len())
}

impl<S: LedgerStore> std::fmt::Debug for BlockManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("state", &self.state())
            .field("blocks", &self.chain().len())
            .field("queued", &self.queue.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
