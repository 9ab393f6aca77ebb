use std::sync::{Arc, Mutex, MutexGuard};

use strata_chain::{BlockChain, Superblock};
use strata_rules::hash_block;
use strata_store::{BlockRecord, LedgerStore, SuperblockAssignment};
use strata_types::{codec, Block, EntityError, Operation};
use tracing::{debug, info};

use crate::compaction::{self, CompactionConfig};
use crate::error::{ConsensusError, ConsensusResult};
use crate::saved::SavedSuperblock;
use crate::tree::BlockTree;

/// What startup reconciliation recovered from the store.
#[derive(Debug, Default)]
pub struct LoadedLedger {
    /// Sealed superblocks plus the canonical orphan path as the head.
    pub chain: BlockChain,
    /// Operations not yet included in any block, in arrival order.
    pub pending: Vec<Operation>,
}

#[derive(Debug, Default)]
struct ConsensusState {
    tree: BlockTree,
    saved: Option<Arc<SavedSuperblock>>,
}

/// Keeps the ledger store and the in-memory chain consistent.
///
/// All methods serialize on one internal lock, so block insertion,
/// superblock persistence and compaction never interleave.
pub struct ConsensusManager<S: LedgerStore> {
    store: Arc<S>,
    config: CompactionConfig,
    state: Mutex<ConsensusState>,
}

impl<S: LedgerStore> ConsensusManager<S> {
    pub fn new(store: Arc<S>, config: CompactionConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(ConsensusState::default()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    fn lock(&self) -> ConsensusResult<MutexGuard<'_, ConsensusState>> {
        self.state.lock().map_err(|_| ConsensusError::LockPoisoned)
    }

    // ---------------------------------------------------------------
    // Startup
    // ---------------------------------------------------------------

    /// Rebuild the chain from the store.
    ///
    /// Picks the deepest orphan as the tip (smallest hash on ties), which
    /// must descend from the last sealed block. Sealed superblocks are
    /// replayed oldest first with linkage and hash checks, then the orphan
    /// path from the sealed tip becomes the head.
    pub fn load(&self) -> ConsensusResult<LoadedLedger> {
        let headers = self.store.block_headers()?;
        let tree = BlockTree::from_headers(&headers)?;
        let saved = SavedSuperblock::from_headers(&headers)?;

        let sealed_tip = saved.as_ref().and_then(|sb| sb.last_block());
        let head_path = match tree.select_tip() {
            Some(tip) => tree.path_to(&tip.hash, sealed_tip)?,
            None => Vec::new(),
        };

        let mut chain = BlockChain::new();
        if let Some(saved) = &saved {
            let mut levels: Vec<&SavedSuperblock> = saved.ancestry().collect();
            levels.reverse();
            for level in levels {
                for hash in &level.blocks {
                    chain.append(self.load_block(hash)?)?;
                }
                let sealed = chain.seal_head()?;
                let actual = sealed.map(|sb| sb.hash().to_string()).unwrap_or_default();
                if actual != level.hash {
                    return Err(ConsensusError::SuperblockMismatch {
                        durable: level.hash.clone(),
                        in_memory: actual,
                    });
                }
            }
        }
        for hash in &head_path {
            chain.append(self.load_block(hash)?)?;
        }

        let pending = self
            .store
            .unassigned_operations()?
            .iter()
            .map(|record| codec::from_json::<Operation>(&record.body))
            .collect::<Result<Vec<_>, EntityError>>()?;

        let (sizes, head) = chain.layout();
        info!(
            blocks = chain.len(),
            superblocks = sizes.len(),
            head,
            orphans = tree.orphans().count(),
            pending = pending.len(),
            "loaded ledger from store"
        );
        *self.lock()? = ConsensusState { tree, saved };
        Ok(LoadedLedger { chain, pending })
    }

    fn load_block(&self, hash: &str) -> ConsensusResult<Arc<Block>> {
        let body = self
            .store
            .block_body(hash)?
            .ok_or_else(|| ConsensusError::MissingBody(hash.to_string()))?;
        let block: Block = codec::from_json(&body)?;
        let computed = hash_block(&block)?;
        if block.hash != hash || computed != hash {
            return Err(ConsensusError::BodyHashMismatch {
                stored: hash.to_string(),
                decoded: computed,
            });
        }
        Ok(Arc::new(block))
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Persist a new block and its operations as an orphan row.
    pub fn insert_block(&self, block: &Block) -> ConsensusResult<()> {
        let body = codec::to_json(block)?;
        let ops = block
            .ops
            .iter()
            .map(|op| Ok((op.hash.clone(), codec::to_json(op)?)))
            .collect::<Result<Vec<_>, EntityError>>()?;

        let mut state = self.lock()?;
        state.tree.check_insert(&block.hash, &block.prev_block_hash)?;
        self.store.insert_block_with_operations(
            BlockRecord::orphan(&block.hash, &block.prev_block_hash, block.block_id, body),
            &ops,
        )?;
        state
            .tree
            .insert(&block.hash, &block.prev_block_hash, block.block_id, false)?;
        debug!(block = %block.hash, id = block.block_id, ops = ops.len(), "persisted block");
        Ok(())
    }

    /// Undo [`insert_block`](Self::insert_block) for a block that never
    /// committed. Its operations become unassigned again.
    ///
    /// Only the newest unsealed block can be discarded.
    pub fn discard_block(&self, hash: &str) -> ConsensusResult<()> {
        let mut state = self.lock()?;
        let discardable = state
            .tree
            .last()
            .is_some_and(|info| info.hash == hash && info.children.is_empty() && !info.sealed);
        if !discardable {
            return Err(ConsensusError::NotDiscardable(hash.to_string()));
        }
        self.store.delete_block(hash)?;
        state.tree.remove_last(hash);
        info!(block = %hash, "discarded uncommitted block");
        Ok(())
    }

    /// Persist a queued operation. Returns its sequence id.
    pub fn insert_operation(&self, op: &Operation) -> ConsensusResult<u64> {
        let body = codec::to_json(op)?;
        Ok(self.store.upsert_operation(&op.hash, &body)?)
    }

    /// Drop an operation no block includes.
    pub fn remove_operation(&self, hash: &str) -> ConsensusResult<bool> {
        Ok(self.store.delete_unassigned_operation(hash)?)
    }

    /// Persist every sealed superblock of `chain` not saved yet.
    ///
    /// The last block of each superblock records the parent superblock;
    /// the others get an empty placeholder. Returns the number saved.
    pub fn save_main_chain(&self, chain: &BlockChain) -> ConsensusResult<usize> {
        let mut state = self.lock()?;
        let Some(tip) = chain.sealed() else {
            return Ok(0);
        };
        let saved_hash = state.saved.as_ref().map(|sb| sb.hash.clone());

        let mut unsaved: Vec<&Superblock> = Vec::new();
        let mut found = saved_hash.is_none();
        for sb in tip.ancestry() {
            if Some(sb.hash()) == saved_hash.as_deref() {
                found = true;
                break;
            }
            unsaved.push(sb);
        }
        if !found {
            return Err(ConsensusError::SuperblockMismatch {
                durable: saved_hash.unwrap_or_default(),
                in_memory: tip.hash().to_string(),
            });
        }

        for sb in unsaved.iter().rev() {
            self.store.assign_superblock(&assignments(sb))?;
            let parent = state.saved.take();
            state.saved = Some(SavedSuperblock::mirror(sb, parent));
            for hash in sb.block_hashes() {
                state.tree.mark_sealed(hash);
            }
            debug!(superblock = %sb.hash(), blocks = sb.len(), "saved superblock");
        }
        Ok(unsaved.len())
    }

    // ---------------------------------------------------------------
    // Compaction
    // ---------------------------------------------------------------

    /// Merge adjacent superblocks of `chain` and persist the result.
    ///
    /// Returns the compacted chain, or `None` if nothing merged.
    pub fn compact(&self, chain: &BlockChain) -> ConsensusResult<Option<BlockChain>> {
        let mut state = self.lock()?;
        let (Some(sealed), Some(saved)) = (chain.sealed(), state.saved.clone()) else {
            return Ok(None);
        };
        let store = self.store.as_ref();
        let compacted = compaction::compact(sealed, &saved, &self.config, |merged| {
            store.assign_superblock(&assignments(merged))?;
            info!(
                superblock = %merged.hash(),
                blocks = merged.len(),
                depth = merged.depth(),
                "merged superblock with parent"
            );
            Ok(())
        })?;
        let Some((new_sealed, new_saved)) = compacted else {
            return Ok(None);
        };
        state.saved = Some(new_saved);
        Ok(Some(chain.with_sealed(Some(new_sealed))))
    }

    /// Durable superblock sizes, oldest first.
    pub fn saved_layout(&self) -> ConsensusResult<Vec<usize>> {
        let state = self.lock()?;
        let mut sizes: Vec<usize> = state
            .saved
            .iter()
            .flat_map(|sb| sb.ancestry().map(|s| s.blocks.len()).collect::<Vec<_>>())
            .collect();
        sizes.reverse();
        Ok(sizes)
    }

    /// Number of persisted blocks not owned by a sealed superblock.
    pub fn orphan_count(&self) -> ConsensusResult<usize> {
        Ok(self.lock()?.tree.orphans().count())
    }
}

/// Ownership pointers for every block of `sb`.
fn assignments(sb: &Superblock) -> Vec<SuperblockAssignment> {
    let parent = sb.parent().map(|p| p.hash().to_string()).unwrap_or_default();
    let last = sb.len().saturating_sub(1);
    sb.block_hashes()
        .enumerate()
        .map(|(i, hash)| SuperblockAssignment {
            block_hash: hash.to_string(),
            superblock: sb.hash().to_string(),
            parent_superblock: if i == last { parent.clone() } else { String::new() },
        })
        .collect()
}

impl<S: LedgerStore> std::fmt::Debug for ConsensusManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_crypto::SigningKey;
    use strata_rules::{sign_block, sign_operation};
    use strata_store::InMemoryLedgerStore;

    fn key() -> SigningKey {
        SigningKey::derive_from_seed(b"server")
    }

    fn note(text: &str) -> Operation {
        let mut op = Operation::new("test.note").with_field("text", text);
        sign_operation(&mut op, &[("server", &key())]).unwrap();
        op
    }

    fn make_block(prev: Option<&Block>, text: &str) -> Block {
        let mut block = Block::prepare(vec![note(text)]);
        sign_block(&mut block, prev, "server", &key()).unwrap();
        block
    }

    fn manager(store: &Arc<InMemoryLedgerStore>) -> ConsensusManager<InMemoryLedgerStore> {
        ConsensusManager::new(Arc::clone(store), CompactionConfig::default())
    }

    /// Append `n` blocks to `chain`, persisting each one.
    fn grow(cm: &ConsensusManager<InMemoryLedgerStore>, chain: &mut BlockChain, n: usize) {
        for _ in 0..n {
            let label = format!("block-{}", chain.len());
            let block = make_block(chain.last_block().map(|b| b.as_ref()), &label);
            cm.insert_block(&block).unwrap();
            chain.append(Arc::new(block)).unwrap();
        }
    }

    /// Grow a chain sealing every `size` blocks, saving each seal.
    fn sealed_chain(
        cm: &ConsensusManager<InMemoryLedgerStore>,
        superblocks: usize,
        size: usize,
    ) -> BlockChain {
        let mut chain = BlockChain::new();
        for _ in 0..superblocks {
            grow(cm, &mut chain, size);
            chain.seal_head().unwrap();
            cm.save_main_chain(&chain).unwrap();
        }
        chain
    }

    #[test]
    fn empty_store_loads_empty_chain() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let loaded = manager(&store).load().unwrap();
        assert!(loaded.chain.is_empty());
        assert!(loaded.pending.is_empty());
    }

    #[test]
    fn reload_restores_superblocks_head_and_pending() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let mut chain = sealed_chain(&cm, 2, 2);
        grow(&cm, &mut chain, 1);
        let queued = note("waiting");
        cm.insert_operation(&queued).unwrap();

        let loaded = manager(&store).load().unwrap();
        assert_eq!(loaded.chain.block_hashes(), chain.block_hashes());
        assert_eq!(loaded.chain.layout(), (vec![2, 2], 1));
        assert_eq!(loaded.pending, vec![queued]);
    }

    #[test]
    fn save_main_chain_only_writes_new_superblocks() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let mut chain = sealed_chain(&cm, 1, 2);
        assert_eq!(cm.save_main_chain(&chain).unwrap(), 0);

        grow(&cm, &mut chain, 1);
        chain.seal_head().unwrap();
        assert_eq!(cm.save_main_chain(&chain).unwrap(), 1);
        assert_eq!(cm.saved_layout().unwrap(), [2, 1]);

        let last = chain.last_block().unwrap();
        let row = store.block(&last.hash).unwrap().unwrap();
        let parent_sb = chain.superblocks()[0].hash().to_string();
        assert_eq!(row.parent_superblock, Some(parent_sb));
        let first = store.block(&chain.block_hashes()[0]).unwrap().unwrap();
        assert_eq!(first.parent_superblock.as_deref(), Some(""));
    }

    #[test]
    fn compaction_is_persisted_and_reloaded() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let chain = sealed_chain(&cm, 4, 1);
        assert_eq!(chain.layout(), (vec![1, 1, 1, 1], 0));

        let compacted = cm.compact(&chain).unwrap().unwrap();
        assert_eq!(compacted.layout(), (vec![3, 1], 0));
        assert_eq!(compacted.block_hashes(), chain.block_hashes());
        assert_eq!(cm.saved_layout().unwrap(), [3, 1]);
        assert!(cm.compact(&compacted).unwrap().is_none());

        let loaded = manager(&store).load().unwrap();
        assert_eq!(loaded.chain.layout(), (vec![3, 1], 0));
    }

    #[test]
    fn deepest_fork_becomes_head() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let chain = sealed_chain(&cm, 1, 1);
        let genesis: Block = (**chain.last_block().unwrap()).clone();

        let a1 = make_block(Some(&genesis), "fork-a-1");
        let a2 = make_block(Some(&a1), "fork-a-2");
        let b1 = make_block(Some(&genesis), "fork-b-1");
        for block in [&a1, &b1, &a2] {
            cm.insert_block(block).unwrap();
        }

        let reloaded = manager(&store);
        let loaded = reloaded.load().unwrap();
        let head: Vec<_> = loaded.chain.head().iter().map(|b| b.hash.clone()).collect();
        assert_eq!(head, [a1.hash.clone(), a2.hash.clone()]);
        assert_eq!(reloaded.orphan_count().unwrap(), 3);
    }

    #[test]
    fn tip_below_sealed_chain_is_fatal() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let chain = sealed_chain(&cm, 1, 2);
        let genesis = chain.find_block(&chain.block_hashes()[0]).unwrap().clone();

        let mut prev = (*genesis).clone();
        for i in 0..3 {
            let block = make_block(Some(&prev), &format!("stale-{i}"));
            cm.insert_block(&block).unwrap();
            prev = block;
        }

        assert!(matches!(
            manager(&store).load(),
            Err(ConsensusError::TipMissesSealedChain { .. })
        ));
    }

    #[test]
    fn block_with_unknown_parent_is_not_stored() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let genesis = make_block(None, "genesis");
        let orphan = make_block(Some(&genesis), "child");

        assert!(matches!(
            cm.insert_block(&orphan),
            Err(ConsensusError::MissingParent { .. })
        ));
        assert_eq!(store.block_count().unwrap(), 0);

        cm.insert_block(&genesis).unwrap();
        cm.insert_block(&orphan).unwrap();
        assert!(matches!(
            cm.insert_block(&orphan),
            Err(ConsensusError::DuplicateBlock(_))
        ));
        assert_eq!(cm.orphan_count().unwrap(), 2);
    }

    #[test]
    fn discarded_block_leaves_no_trace() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let chain = sealed_chain(&cm, 1, 1);
        let genesis: Block = (**chain.last_block().unwrap()).clone();
        let block = make_block(Some(&genesis), "uncommitted");
        cm.insert_operation(&block.ops[0]).unwrap();
        cm.insert_block(&block).unwrap();

        assert!(matches!(
            cm.discard_block(&genesis.hash),
            Err(ConsensusError::NotDiscardable(_))
        ));
        cm.discard_block(&block.hash).unwrap();
        assert_eq!(store.block_count().unwrap(), 1);
        assert_eq!(cm.orphan_count().unwrap(), 0);

        let loaded = manager(&store).load().unwrap();
        assert_eq!(loaded.chain.block_hashes(), chain.block_hashes());
        assert_eq!(loaded.pending, block.ops);

        cm.insert_block(&block).unwrap();
        assert_eq!(cm.orphan_count().unwrap(), 1);
    }

    #[test]
    fn pending_operations_can_be_dropped() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cm = manager(&store);
        let op = note("drop me");
        cm.insert_operation(&op).unwrap();
        assert!(cm.remove_operation(&op.hash).unwrap());
        assert!(!cm.remove_operation(&op.hash).unwrap());
        assert!(cm.load().unwrap().pending.is_empty());
    }
}
