use sha2::{Digest, Sha256};

/// Algorithm-tagged SHA-256 content hasher.
///
/// Digests are rendered as `"<algo>:<hex>"`, e.g. `"sha256:9f86d0..."`.
/// Callers may prepend further tags (operation hashes carry a `json:`
/// message-type prefix); [`hash_bytes`] strips every tag when decoding.
pub struct ContentHasher {
    algo: &'static str,
}

impl ContentHasher {
    /// The only hasher the ledger uses.
    pub const SHA256: Self = Self { algo: "sha256" };

    /// Raw digest of a byte slice.
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    /// Raw digest of several byte slices fed in order.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    /// Digest of `data`, formatted with the algorithm tag.
    pub fn hash(&self, data: &[u8]) -> String {
        self.format(&self.digest(data))
    }

    /// Format already-computed digest bytes with the algorithm tag.
    pub fn format(&self, digest: &[u8]) -> String {
        format!("{}:{}", self.algo, hex::encode(digest))
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify(&self, data: &[u8], expected: &str) -> bool {
        self.hash(data) == expected
    }

    /// The algorithm tag used by this hasher.
    pub fn algo(&self) -> &str {
        self.algo
    }
}

/// Decode the hex digest that follows the last `:` of a formatted hash.
///
/// The empty string decodes to no bytes; it stands for "no hash", e.g. the
/// previous-block hash of a genesis block.
pub fn hash_bytes(hash: &str) -> Result<Vec<u8>, HashError> {
    if hash.is_empty() {
        return Ok(Vec::new());
    }
    let hex_part = hash.rsplit(':').next().unwrap_or(hash);
    hex::decode(hex_part).map_err(|e| HashError::InvalidHash {
        hash: hash.to_string(),
        reason: e.to_string(),
    })
}

/// Errors from hashing operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("malformed hash {hash:?}: {reason}")]
    InvalidHash { hash: String, reason: String },
}
