//! Superblock compaction.
//!
//! After each new block the sealed chain is scanned for adjacent pairs
//! worth folding together. A superblock `S` with parent `P` and grandparent
//! `G` merges with `P` when
//!
//! ```text
//! coefficient * (len(S) + len(P)) >= len(G)    or    len(S) > len(P)
//! ```
//!
//! The newest sealed superblock never merges with its parent. Deeper pairs
//! are tried first, one merge per pass, for at most `iterations` passes.
//! Each merge is persisted before the in-memory chain is rebuilt around it.
//! A failed write ends the run and keeps the merges persisted before it,
//! and a level where the durable and in-memory superblocks disagree is
//! logged and left untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_chain::Superblock;
use tracing::error;

use crate::error::ConsensusResult;
use crate::saved::SavedSuperblock;

/// Compaction tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Weight of the pair against the grandparent size.
    pub coefficient: f64,
    /// Maximum merges per block.
    pub iterations: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            coefficient: 0.5,
            iterations: 3,
        }
    }
}

impl CompactionConfig {
    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}

/// A compacted sealed tip with its matching durable view.
pub type CompactedTip = (Arc<Superblock>, Arc<SavedSuperblock>);

/// Whether `sb` should merge into its parent.
pub fn should_merge(sb: &Superblock, coefficient: f64) -> bool {
    let Some(parent) = sb.parent() else {
        return false;
    };
    let pair = (sb.len() + parent.len()) as f64;
    let by_weight = parent
        .parent()
        .is_some_and(|grandparent| coefficient * pair >= grandparent.len() as f64);
    by_weight || sb.len() > parent.len()
}

/// Run up to `config.iterations` merge passes over the sealed chain.
///
/// `persist` is called with each merged superblock (linked to its new
/// parent) before it becomes part of the returned chain. An error from
/// `persist` stops further passes; merges from earlier passes are still
/// returned. Returns `None` when nothing merged.
pub fn compact<F>(
    sealed: &Arc<Superblock>,
    saved: &Arc<SavedSuperblock>,
    config: &CompactionConfig,
    mut persist: F,
) -> ConsensusResult<Option<CompactedTip>>
where
    F: FnMut(&Superblock) -> ConsensusResult<()>,
{
    let mut current: Option<CompactedTip> = None;
    for _ in 0..config.iterations {
        let (rt, st) = match &current {
            Some((rt, st)) => (rt, st),
            None => (sealed, saved),
        };
        match compact_level(rt, st, true, config.coefficient, &mut persist) {
            Ok(Some(next)) => current = Some(next),
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to persist merged superblock, stopping compaction");
                break;
            }
        }
    }
    Ok(current)
}

fn compact_level<F>(
    rt: &Arc<Superblock>,
    saved: &Arc<SavedSuperblock>,
    is_tip: bool,
    coefficient: f64,
    persist: &mut F,
) -> ConsensusResult<Option<CompactedTip>>
where
    F: FnMut(&Superblock) -> ConsensusResult<()>,
{
    if !saved.matches(rt) {
        error!(
            in_memory = %rt.hash(),
            durable = %saved.hash,
            "superblock mismatch, skipping compaction at this level"
        );
        return Ok(None);
    }
    let (Some(parent), Some(saved_parent)) = (rt.parent(), saved.parent.as_ref()) else {
        return Ok(None);
    };

    if let Some((new_parent, new_saved_parent)) =
        compact_level(parent, saved_parent, false, coefficient, persist)?
    {
        return Ok(Some((
            rt.with_parent(Some(new_parent)),
            saved.with_parent(Some(new_saved_parent)),
        )));
    }

    if is_tip || !saved_parent.matches(parent) || !should_merge(rt, coefficient) {
        return Ok(None);
    }
    let Some(merged) = rt.merge_with_parent()? else {
        return Ok(None);
    };
    persist(&merged)?;
    let saved_merged = SavedSuperblock::mirror(&merged, saved_parent.parent.clone());
    Ok(Some((merged, saved_merged)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_crypto::ContentHasher;
    use strata_types::Block;

    fn block(id: i32) -> Arc<Block> {
        let mut b = Block::prepare(Vec::new());
        b.block_id = id;
        b.hash = ContentHasher::SHA256.hash(&id.to_be_bytes());
        Arc::new(b)
    }

    /// Sealed chain with the given sizes (oldest first) and its mirror.
    fn chain(sizes: &[usize]) -> (Arc<Superblock>, Arc<SavedSuperblock>) {
        let mut id = 0;
        let mut tip: Option<Arc<Superblock>> = None;
        let mut saved: Option<Arc<SavedSuperblock>> = None;
        for &size in sizes {
            let blocks = (0..size)
                .map(|_| {
                    id += 1;
                    block(id - 1)
                })
                .collect();
            let sb = Superblock::seal(blocks, tip.take()).unwrap();
            saved = Some(SavedSuperblock::mirror(&sb, saved.take()));
            tip = Some(sb);
        }
        (tip.unwrap(), saved.unwrap())
    }

    fn sizes(sb: &Superblock) -> Vec<usize> {
        let mut out: Vec<_> = sb.ancestry().map(Superblock::len).collect();
        out.reverse();
        out
    }

    fn all_hashes(sb: &Superblock) -> Vec<String> {
        let mut levels: Vec<Vec<String>> = sb
            .ancestry()
            .map(|s| s.block_hashes().map(str::to_string).collect())
            .collect();
        levels.reverse();
        levels.concat()
    }

    fn run(sizes_in: &[usize], config: &CompactionConfig) -> (Vec<usize>, usize) {
        let (rt, saved) = chain(sizes_in);
        let mut merges = 0;
        let result = compact(&rt, &saved, config, |_| {
            merges += 1;
            Ok(())
        })
        .unwrap();
        let out = result.map_or_else(|| sizes(&rt), |(rt, _)| sizes(&rt));
        (out, merges)
    }

    // ---------------------------------------------------------------
    // Merge rule
    // ---------------------------------------------------------------

    #[test]
    fn merge_rule_needs_a_parent() {
        let (rt, _) = chain(&[4]);
        assert!(!should_merge(&rt, 0.5));
    }

    #[test]
    fn larger_child_merges_without_grandparent() {
        let (rt, _) = chain(&[2, 3]);
        assert!(should_merge(&rt, 0.5));
        let (rt, _) = chain(&[3, 3]);
        assert!(!should_merge(&rt, 0.5));
    }

    #[test]
    fn weight_rule_compares_against_grandparent() {
        let (rt, _) = chain(&[4, 4, 4]);
        assert!(should_merge(&rt, 0.5));
        let (rt, _) = chain(&[12, 4, 4]);
        assert!(!should_merge(&rt, 0.5));
    }

    // ---------------------------------------------------------------
    // Passes
    // ---------------------------------------------------------------

    #[test]
    fn tip_pair_is_never_merged() {
        let config = CompactionConfig::default();
        assert_eq!(run(&[4, 4], &config), (vec![4, 4], 0));
        assert_eq!(run(&[4, 4, 4], &config), (vec![4, 4, 4], 0));
    }

    #[test]
    fn deeper_pairs_merge_first() {
        let config = CompactionConfig::default();
        assert_eq!(run(&[4, 4, 4, 4], &config), (vec![12, 4], 2));
        assert_eq!(run(&[12, 4, 4, 4, 4], &config), (vec![12, 12, 4], 2));
    }

    #[test]
    fn iterations_bound_merges() {
        let config = CompactionConfig::default().with_iterations(1);
        assert_eq!(run(&[4, 4, 4, 4], &config), (vec![4, 8, 4], 1));
        let config = CompactionConfig::default().with_iterations(0);
        assert_eq!(run(&[4, 4, 4, 4], &config), (vec![4, 4, 4, 4], 0));
    }

    #[test]
    fn durable_view_follows_merges() {
        let (rt, saved) = chain(&[4, 4, 4, 4]);
        let (new_rt, new_saved) = compact(&rt, &saved, &CompactionConfig::default(), |_| Ok(()))
            .unwrap()
            .unwrap();
        for (mem, durable) in new_rt.ancestry().zip(new_saved.ancestry()) {
            assert!(durable.matches(mem));
        }
        assert_eq!(new_saved.ancestry().count(), 2);
    }

    #[test]
    fn mismatched_level_is_skipped() {
        let (rt, _) = chain(&[4, 4, 4, 4]);
        let (_, other) = chain(&[4, 4, 4, 5]);
        let result = compact(&rt, &other, &CompactionConfig::default(), |_| Ok(())).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn persist_failure_keeps_earlier_merges() {
        let (rt, saved) = chain(&[4, 4, 4, 4]);
        let mut calls = 0;
        let (new_rt, new_saved) = compact(&rt, &saved, &CompactionConfig::default(), |_| {
            calls += 1;
            if calls > 1 {
                return Err(crate::ConsensusError::LockPoisoned);
            }
            Ok(())
        })
        .unwrap()
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(sizes(&new_rt), [4, 8, 4]);
        assert!(new_saved.ancestry().zip(new_rt.ancestry()).all(|(d, m)| d.matches(m)));

        let failed = compact(&rt, &saved, &CompactionConfig::default(), |_| {
            Err(crate::ConsensusError::LockPoisoned)
        });
        assert!(failed.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn compaction_preserves_blocks_and_tip(
            layout in prop::collection::vec(1usize..6, 1..10),
            iterations in 0usize..5,
        ) {
            let (rt, saved) = chain(&layout);
            let config = CompactionConfig::default().with_iterations(iterations);
            let result = compact(&rt, &saved, &config, |_| Ok(())).unwrap();
            if let Some((new_rt, _)) = result {
                prop_assert_eq!(all_hashes(&new_rt), all_hashes(&rt));
                prop_assert_eq!(new_rt.hash(), rt.hash());
                prop_assert_eq!(new_rt.depth(), rt.depth());
                prop_assert!(new_rt.ancestry().count() < rt.ancestry().count());
            }
        }
    }
}
