//! Hash partitioning support.
//!
//! A replicator may declare a partition method and column; when it does,
//! the partition value is computed at row-prepare time and joins the
//! remote key in the upsert conflict target. Partition assignment must
//! be stable across processes without coordination, so the hash is a
//! truncated cryptographic digest rather than anything seeded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a replicator table is physically partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
    /// Hash partitioning over a derived integer column.
    Hash,
}

/// A replicator's partitioning declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    /// The partition method.
    pub method: PartitionMethod,
    /// The column holding the computed partition value.
    pub column: String,
}

impl Partitioning {
    /// Declares hash partitioning over the named column.
    #[must_use]
    pub fn hash(column: impl Into<String>) -> Self {
        Self {
            method: PartitionMethod::Hash,
            column: column.into(),
        }
    }
}

/// Deterministically hashes a string to a signed 32-bit integer.
///
/// Takes the first four bytes of the SHA-256 digest as a big-endian
/// unsigned integer and rebalances it into signed range, so values
/// spread uniformly over the full `i32` domain.
#[must_use]
pub fn hash_to_i32(input: &str) -> i32 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest[..4]);
    let unsigned = u32::from_be_bytes(prefix);
    (i64::from(unsigned) - i64::from(u32::MAX) / 2 - 1) as i32
}
