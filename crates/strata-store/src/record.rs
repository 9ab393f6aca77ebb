use serde::{Deserialize, Serialize};

/// A row of the `blocks` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    /// Empty for the genesis block.
    pub parent_hash: String,
    pub block_id: i32,
    /// Owning superblock; `None` while the block is an orphan.
    pub superblock: Option<String>,
    /// Parent of the owning superblock. Only the last block of a
    /// superblock carries it; the others hold an empty placeholder.
    pub parent_superblock: Option<String>,
    pub body: String,
}

impl BlockRecord {
    /// A freshly inserted, unassigned block row.
    pub fn orphan(
        hash: impl Into<String>,
        parent_hash: impl Into<String>,
        block_id: i32,
        body: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            parent_hash: parent_hash.into(),
            block_id,
            superblock: None,
            parent_superblock: None,
            body: body.into(),
        }
    }

    /// The row without its body.
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            block_id: self.block_id,
            superblock: self.superblock.clone(),
        }
    }
}

/// Body-less view of a block row used during startup reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub parent_hash: String,
    pub block_id: i32,
    pub superblock: Option<String>,
}

/// A row of the `operations` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Monotonic insertion sequence.
    pub sequence_id: u64,
    pub hash: String,
    /// Hashes of the blocks that included this operation, append-only.
    pub blocks: Vec<String>,
    pub body: String,
}

/// New ownership pointers for one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperblockAssignment {
    pub block_hash: String,
    pub superblock: String,
    pub parent_superblock: String,
}
