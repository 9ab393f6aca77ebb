use std::collections::HashSet;
use std::sync::Arc;

use strata_chain::Superblock;
use strata_rules::superblock_hash;
use strata_store::BlockHeader;

use crate::error::{ConsensusError, ConsensusResult};

/// The durable view of one sealed superblock: its hash and the hashes of
/// its blocks, linked to its parent the same way the in-memory chain is.
///
/// Compaction walks this chain side by side with the in-memory superblocks
/// and refuses to touch a level where the two disagree.
#[derive(Debug, PartialEq, Eq)]
pub struct SavedSuperblock {
    pub hash: String,
    pub blocks: Vec<String>,
    pub parent: Option<Arc<SavedSuperblock>>,
}

impl SavedSuperblock {
    /// Mirror an in-memory superblock on top of `parent`.
    pub fn mirror(sb: &Superblock, parent: Option<Arc<SavedSuperblock>>) -> Arc<Self> {
        Arc::new(Self {
            hash: sb.hash().to_string(),
            blocks: sb.block_hashes().map(str::to_string).collect(),
            parent,
        })
    }

    /// Same superblock, relinked to a different parent.
    pub fn with_parent(&self, parent: Option<Arc<SavedSuperblock>>) -> Arc<Self> {
        Arc::new(Self {
            hash: self.hash.clone(),
            blocks: self.blocks.clone(),
            parent,
        })
    }

    pub fn last_block(&self) -> Option<&str> {
        self.blocks.last().map(String::as_str)
    }

    /// This superblock and its ancestors, newest first.
    pub fn ancestry(&self) -> impl Iterator<Item = &SavedSuperblock> {
        std::iter::successors(Some(self), |sb| sb.parent.as_deref())
    }

    /// Whether the in-memory superblock is the same superblock.
    pub fn matches(&self, sb: &Superblock) -> bool {
        self.hash == sb.hash() && self.blocks.len() == sb.len()
    }

    /// Rebuild the saved chain from block headers ordered by block id.
    ///
    /// Sealed blocks must form one linked run from genesis, each superblock
    /// must own a contiguous slice of it, and every superblock hash must
    /// match its block count and last block.
    pub fn from_headers(headers: &[BlockHeader]) -> ConsensusResult<Option<Arc<Self>>> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        let mut seen = HashSet::new();
        let mut prev_hash = "";

        for header in headers {
            let Some(owner) = header.superblock.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            if header.parent_hash != prev_hash {
                return Err(ConsensusError::InconsistentSuperblock {
                    superblock: owner.to_string(),
                    reason: format!(
                        "block {} follows {:?}, expected {:?}",
                        header.hash, header.parent_hash, prev_hash
                    ),
                });
            }
            prev_hash = &header.hash;

            match groups.last_mut() {
                Some((hash, blocks)) if *hash == owner => blocks.push(header.hash.clone()),
                _ => {
                    if !seen.insert(owner) {
                        return Err(ConsensusError::InconsistentSuperblock {
                            superblock: owner.to_string(),
                            reason: "blocks are not contiguous".into(),
                        });
                    }
                    groups.push((owner.to_string(), vec![header.hash.clone()]));
                }
            }
        }

        let mut tip: Option<Arc<Self>> = None;
        for (hash, blocks) in groups {
            let last = blocks.last().map(String::as_str).unwrap_or_default();
            let expected = superblock_hash(blocks.len(), last)?;
            if expected != hash {
                return Err(ConsensusError::InconsistentSuperblock {
                    superblock: hash,
                    reason: format!("hash of {} blocks ending at {last} is {expected}", blocks.len()),
                });
            }
            tip = Some(Arc::new(Self {
                hash,
                blocks,
                parent: tip,
            }));
        }
        Ok(tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_crypto::ContentHasher;

    fn block_hash(id: i32) -> String {
        ContentHasher::SHA256.hash(&id.to_be_bytes())
    }

    fn header(id: i32, superblock: Option<String>) -> BlockHeader {
        BlockHeader {
            hash: block_hash(id),
            parent_hash: if id == 0 { String::new() } else { block_hash(id - 1) },
            block_id: id,
            superblock,
        }
    }

    /// Headers for consecutive superblocks of the given sizes, then
    /// `orphans` unsealed blocks.
    fn headers(sizes: &[usize], orphans: usize) -> Vec<BlockHeader> {
        let mut out = Vec::new();
        let mut id = 0;
        for &size in sizes {
            let last = id + size as i32 - 1;
            let sb = superblock_hash(size, &block_hash(last)).unwrap();
            for _ in 0..size {
                out.push(header(id, Some(sb.clone())));
                id += 1;
            }
        }
        for _ in 0..orphans {
            out.push(header(id, None));
            id += 1;
        }
        out
    }

    #[test]
    fn rebuilds_superblock_chain() {
        let tip = SavedSuperblock::from_headers(&headers(&[3, 2], 1)).unwrap().unwrap();
        let sizes: Vec<_> = tip.ancestry().map(|sb| sb.blocks.len()).collect();
        assert_eq!(sizes, [2, 3]);
        assert_eq!(tip.last_block(), Some(block_hash(4).as_str()));
    }

    #[test]
    fn no_sealed_blocks_means_no_tip() {
        assert!(SavedSuperblock::from_headers(&headers(&[], 3)).unwrap().is_none());
    }

    #[test]
    fn wrong_superblock_hash_is_rejected() {
        let mut rows = headers(&[2], 0);
        for row in &mut rows {
            row.superblock = Some("sha256:00".into());
        }
        assert!(matches!(
            SavedSuperblock::from_headers(&rows),
            Err(ConsensusError::InconsistentSuperblock { .. })
        ));
    }

    #[test]
    fn gap_in_sealed_run_is_rejected() {
        let mut rows = headers(&[2, 2], 0);
        rows[1].superblock = None;
        assert!(matches!(
            SavedSuperblock::from_headers(&rows),
            Err(ConsensusError::InconsistentSuperblock { .. })
        ));
    }
}
