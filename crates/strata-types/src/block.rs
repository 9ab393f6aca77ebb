use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::{OpSignature, Operation};

/// Header layout version written into every block.
pub const BLOCK_VERSION: i32 = 1;

/// A batch of operations with a header that commits to their content.
///
/// A block is built in a preparing state (`block_id == -1`, empty `hash`),
/// sealed exactly once by `strata_rules::sign_block`, and treated as
/// immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub version: i32,
    pub block_id: i32,
    #[serde(default)]
    pub prev_block_hash: String,
    #[serde(with = "date_format")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub merkle_tree_hash: String,
    #[serde(default)]
    pub sig_merkle_tree_hash: String,
    #[serde(default)]
    pub extra: i64,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub signed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<OpSignature>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub ops: Vec<Operation>,
}

impl Block {
    /// Start a new unsealed block around the given operations.
    ///
    /// The date is truncated to millisecond precision so that it survives
    /// the text encoding unchanged.
    pub fn prepare(ops: Vec<Operation>) -> Self {
        let now = Utc::now();
        let date = DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            version: BLOCK_VERSION,
            block_id: -1,
            prev_block_hash: String::new(),
            date,
            merkle_tree_hash: String::new(),
            sig_merkle_tree_hash: String::new(),
            extra: 0,
            details: String::new(),
            signed_by: String::new(),
            signature: None,
            hash: String::new(),
            ops,
        }
    }

    /// Whether the block has been hashed and signed.
    pub fn is_sealed(&self) -> bool {
        self.block_id >= 0 && !self.hash.is_empty()
    }

    /// Hashes of the contained operations in block order.
    pub fn operation_hashes(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| op.hash.as_str())
    }

    /// Short form of the block hash for log output.
    pub fn short_hash(&self) -> &str {
        let hex = self.hash.rsplit(':').next().unwrap_or_default();
        &hex[..hex.len().min(12)]
    }
}

mod date_format {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&text, FORMAT)
            .map(|d| d.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn prepared_block_is_unsealed() {
        let block = Block::prepare(vec![Operation::new("t")]);
        assert_eq!(block.version, BLOCK_VERSION);
        assert_eq!(block.block_id, -1);
        assert!(!block.is_sealed());
        assert_eq!(block.date.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn date_survives_text_encoding() {
        let mut block = Block::prepare(Vec::new());
        block.block_id = 0;
        block.hash = "sha256:abcdef0123456789".into();
        let text = codec::to_json(&block).unwrap();
        assert!(text.contains("+0000"));
        let back: Block = codec::from_json(&text).unwrap();
        assert_eq!(back.date.timestamp_millis(), block.date.timestamp_millis());
        assert_eq!(back, block);
        assert_eq!(back.short_hash(), "abcdef012345");
    }
}
