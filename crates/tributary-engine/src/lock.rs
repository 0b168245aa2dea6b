//! Per-row mutual exclusion.
//!
//! Guards against two schedulers concurrently processing the same
//! external feed, e.g. a calendar sync triggered by both a webhook and
//! a cron sweep. The lock scope is one physical row (table plus remote
//! key), not the whole table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use tributary_core::schema_mod::TableRef;

/// Identity of one physical row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowIdentity {
    /// The row's table.
    pub table: TableRef,
    /// The row's remote key, rendered as text.
    pub remote_key: String,
}

/// Process-wide advisory locks keyed by row identity.
///
/// Lock entries are created on first use and pruned once nothing holds
/// them, so the map tracks only rows with in-flight work.
#[derive(Debug, Default)]
pub struct RowLocks {
    locks: Mutex<HashMap<RowIdentity, Arc<AsyncMutex<()>>>>,
}

impl RowLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding one row, creating it if needed.
    #[must_use]
    pub fn lock_for(&self, table: &TableRef, remote_key: &str) -> Arc<AsyncMutex<()>> {
        let identity = RowIdentity {
            table: table.clone(),
            remote_key: remote_key.to_string(),
        };
        let mut locks = self.locks.lock();
        // An entry whose only reference is the map itself has no
        // holders left; drop it rather than accumulate one per row
        // ever processed.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(identity)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Number of rows with a live lock entry.
    #[must_use]
    pub fn tracked_rows(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_row_shares_a_lock() {
        let locks = RowLocks::new();
        let table = TableRef::new("org_1", "cal_v1");
        let a = locks.lock_for(&table, "feed-1");
        let b = locks.lock_for(&table, "feed-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_different_rows_do_not_contend() {
        let locks = RowLocks::new();
        let table = TableRef::new("org_1", "cal_v1");
        let a = locks.lock_for(&table, "feed-1");
        let b = locks.lock_for(&table, "feed-2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_released_rows_are_pruned() {
        let locks = RowLocks::new();
        let table = TableRef::new("org_1", "cal_v1");
        for i in 0..100 {
            let _ = locks.lock_for(&table, &format!("feed-{i}"));
        }
        // Each acquire prunes the released entries before it; only the
        // row acquired here is still alive.
        let held = locks.lock_for(&table, "held");
        assert_eq!(locks.tracked_rows(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn test_lock_serializes_holders() {
        let locks = RowLocks::new();
        let table = TableRef::new("org_1", "cal_v1");
        let lock = locks.lock_for(&table, "feed-1");
        let guard = lock.lock().await;
        assert!(locks.lock_for(&table, "feed-1").try_lock().is_err());
        drop(guard);
        assert!(locks.lock_for(&table, "feed-1").try_lock().is_ok());
    }
}
