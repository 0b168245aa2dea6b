//! Storage backends.
//!
//! The engine talks to storage through [`StorageBackend`]: DDL batches
//! go through [`StorageBackend::apply`], rows through
//! [`StorageBackend::upsert`] as a structured [`UpsertPlan`]. The
//! Postgres backend renders plans to `INSERT ... ON CONFLICT` SQL; the
//! in-memory backend interprets the same semantics directly and backs
//! the engine's test suite.

/// In-memory backend
pub mod memory;

/// Postgres backend
pub mod postgres;

/// SQL rendering for upsert plans
pub mod sql_render;

use std::collections::BTreeMap;

use async_trait::async_trait;

use tributary_core::schema_mod::{SchemaModification, TableRef};
use tributary_core::types::{ColumnType, ColumnValue};

use crate::adapter::{UpdatePolicy, UpdatePredicate};
use crate::error::EngineResult;

pub use memory::MemoryBackend;
pub use postgres::{PostgresBackend, PostgresBackendConfig};

/// A prepared row: column name to typed value. Columns omitted from
/// the map (`skip_nil`) are left untouched on conflict rather than
/// written as NULL.
pub type Row = BTreeMap<String, ColumnValue>;

/// A structured conditional upsert for one or more rows of one table.
#[derive(Debug, Clone)]
pub struct UpsertPlan {
    /// Target table.
    pub table: TableRef,
    /// The unique external-identifier column.
    pub remote_key_column: String,
    /// Conflict target: the remote key, plus the partition column for
    /// partitioned tables.
    pub conflict_columns: Vec<String>,
    /// Rows to write. Bulk plans carry a whole page.
    pub rows: Vec<Row>,
    /// Columns whose conflict UPDATE keeps the stored value when the
    /// incoming one is NULL.
    pub coalesce_columns: Vec<String>,
    /// The predicate gating the conflict UPDATE.
    pub predicate: UpdatePredicate,
}

impl UpsertPlan {
    /// Merge policy for one column.
    #[must_use]
    pub fn policy(&self, column: &str) -> UpdatePolicy {
        if self.coalesce_columns.iter().any(|c| c == column) {
            UpdatePolicy::CoalesceExisting
        } else {
            UpdatePolicy::TakeIncoming
        }
    }
}

/// Per-row results of an upsert plan.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    /// One entry per plan row: `true` when the row was inserted or the
    /// predicate allowed the update, `false` on a silent no-op.
    pub changed: Vec<bool>,
}

impl UpsertOutcome {
    /// Returns `true` when any row changed.
    #[must_use]
    pub fn any_changed(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }
}

/// A physical column as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalColumn {
    /// Column name.
    pub name: String,
    /// Column type, when the backend can report one.
    pub column_type: Option<ColumnType>,
}

/// The contract between the engine and a relational store.
///
/// Implementations borrow connections per call rather than holding one
/// across page fetches, so concurrent backfillers do not contend on a
/// single connection.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Applies a DDL batch: transactional statements all-or-nothing,
    /// then non-transactional statements individually, then
    /// application-database statements.
    async fn apply(&self, modification: &SchemaModification) -> EngineResult<()>;

    /// Whether the table physically exists.
    async fn table_exists(&self, table: &TableRef) -> EngineResult<bool>;

    /// The table's physical columns.
    async fn table_columns(&self, table: &TableRef) -> EngineResult<Vec<PhysicalColumn>>;

    /// Names of the table's physical indexes.
    async fn table_indexes(&self, table: &TableRef) -> EngineResult<Vec<String>>;

    /// Executes a conditional upsert, reporting per-row change status.
    async fn upsert(&self, plan: &UpsertPlan) -> EngineResult<UpsertOutcome>;
}
