use serde::{Deserialize, Serialize};
use strata_consensus::CompactionConfig;

use crate::error::{NodeError, NodeResult};

const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Configuration of a ledger node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity that signs locally produced blocks (`nickname` or
    /// `nickname:site`). Empty on replicate-only nodes.
    pub server_user: String,
    /// Maximum operations per block.
    pub max_block_operations: usize,
    /// Ceiling on the summed serialized size of a block's operations.
    pub max_block_size_bytes: usize,
    /// Ceiling on a single serialized operation.
    pub max_operation_size_bytes: usize,
    /// Whether a block may be produced with no operations.
    pub allow_empty_blocks: bool,
    /// Head length at which blocks are sealed into a superblock.
    pub superblock_size: usize,
    pub compaction: CompactionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_user: String::new(),
            max_block_operations: 1000,
            max_block_size_bytes: DEFAULT_BLOCK_SIZE,
            max_operation_size_bytes: DEFAULT_BLOCK_SIZE / 2,
            allow_empty_blocks: false,
            superblock_size: 32,
            compaction: CompactionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> NodeResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> NodeResult<String> {
        toml::to_string(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn with_server_user(mut self, user: impl Into<String>) -> Self {
        self.server_user = user.into();
        self
    }

    pub fn with_superblock_size(mut self, size: usize) -> Self {
        self.superblock_size = size;
        self
    }

    pub fn with_allow_empty_blocks(mut self, allow: bool) -> Self {
        self.allow_empty_blocks = allow;
        self
    }

    pub fn with_max_block_operations(mut self, max: usize) -> Self {
        self.max_block_operations = max;
        self
    }

    /// Reject zero limits and an operation ceiling above the block ceiling.
    pub fn validate(&self) -> NodeResult<()> {
        let limits = [
            ("max_block_operations", self.max_block_operations),
            ("max_block_size_bytes", self.max_block_size_bytes),
            ("max_operation_size_bytes", self.max_operation_size_bytes),
            ("superblock_size", self.superblock_size),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(NodeError::Config(format!("{name} must be positive")));
        }
        if self.max_operation_size_bytes > self.max_block_size_bytes {
            return Err(NodeError::Config(format!(
                "max_operation_size_bytes ({}) exceeds max_block_size_bytes ({})",
                self.max_operation_size_bytes, self.max_block_size_bytes
            )));
        }
        let coefficient = self.compaction.coefficient;
        if !coefficient.is_finite() || coefficient < 0.0 {
            return Err(NodeError::Config(format!(
                "compaction coefficient {coefficient} must be a non-negative number"
            )));
        }
        Ok(())
    }
}
