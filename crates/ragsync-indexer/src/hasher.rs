//! Content digests and node identifiers.

use crate::index::NodeId;
use sha2::{Digest, Sha256};

/// Hex length of a node identifier (128 bits).
const NODE_ID_LEN: usize = 32;

/// Compute the SHA-256 of raw bytes as lowercase hex.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Derive the identifier of the `seq`-th chunk of `path` at `content_hash`.
///
/// Identical inputs always re-derive the same id; a different hash never
/// reuses an old one.
pub fn node_id(path: &str, seq: usize, content_hash: &str) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(seq.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash.as_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(NODE_ID_LEN);
    id
}
