//! DDL batch modeling.
//!
//! A [`SchemaModification`] is a batch of DDL statements partitioned by
//! execution context: statements safe to run in one transaction,
//! statements that must run individually outside a transaction (e.g.,
//! concurrent index builds), and statements that must run against the
//! application-level database rather than a per-organization one.
//!
//! Each statement carries both its SQL text and a structured
//! [`DdlIntent`] so non-SQL backends can interpret the change without
//! parsing SQL. Modifications are built fresh per schema operation,
//! executed once, and discarded.

use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

/// A schema-qualified table reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Per-organization schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a table reference.
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Returns the quoted, schema-qualified name.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            crate::sql::quote_ident(&self.schema),
            crate::sql::quote_ident(&self.table)
        )
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Structured description of what a DDL statement does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlIntent {
    /// Create a table with the given ordered columns.
    CreateTable {
        /// The table to create.
        table: TableRef,
        /// Ordered (name, type) pairs, excluding the synthetic pk.
        columns: Vec<(String, ColumnType)>,
    },
    /// Add one column to an existing table.
    AddColumn {
        /// The table to alter.
        table: TableRef,
        /// The column name.
        name: String,
        /// The column type.
        column_type: ColumnType,
    },
    /// Create an index.
    CreateIndex {
        /// The indexed table.
        table: TableRef,
        /// Derived index name.
        name: String,
        /// Participating columns in order.
        columns: Vec<String>,
        /// Whether the build runs CONCURRENTLY (outside a transaction).
        concurrent: bool,
    },
    /// Create a sequence in the application database.
    CreateSequence {
        /// The sequence name.
        name: String,
    },
    /// A statement only SQL backends can interpret (column backfill
    /// UPDATEs, adapter-supplied helper statements).
    SqlOnly,
}

/// One DDL statement: SQL text plus its structured intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    /// The SQL text executed by SQL backends.
    pub sql: String,
    /// Structured intent interpreted by non-SQL backends.
    pub intent: DdlIntent,
}

impl DdlStatement {
    /// Creates a statement.
    #[must_use]
    pub fn new(sql: impl Into<String>, intent: DdlIntent) -> Self {
        Self {
            sql: sql.into(),
            intent,
        }
    }

    /// Creates a statement only SQL backends can interpret.
    #[must_use]
    pub fn sql_only(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            intent: DdlIntent::SqlOnly,
        }
    }
}

/// A batch of DDL statements partitioned by execution context.
#[derive(Debug, Clone, Default)]
pub struct SchemaModification {
    /// Statements executed inside one transaction, all-or-nothing.
    pub transaction_statements: Vec<DdlStatement>,

    /// Statements executed individually outside a transaction.
    /// Concurrent index builds cannot run inside a transaction.
    pub nontransaction_statements: Vec<DdlStatement>,

    /// Statements executed against the application database rather
    /// than the per-organization database.
    pub application_database_statements: Vec<DdlStatement>,
}

impl SchemaModification {
    /// Creates an empty modification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the modification contains no statements.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transaction_statements.is_empty()
            && self.nontransaction_statements.is_empty()
            && self.application_database_statements.is_empty()
    }

    /// Total statement count across all contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transaction_statements.len()
            + self.nontransaction_statements.len()
            + self.application_database_statements.len()
    }

    /// Returns `true` when empty (mirrors `len`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_qualified_quotes() {
        let t = TableRef::new("org_1", "acme_widget_v1_x1");
        assert_eq!(t.qualified(), "\"org_1\".\"acme_widget_v1_x1\"");
    }

    #[test]
    fn test_empty_modification_is_noop() {
        let m = SchemaModification::new();
        assert!(m.is_noop());
        assert!(m.is_empty());
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn test_len_counts_all_contexts() {
        let t = TableRef::new("s", "t");
        let mut m = SchemaModification::new();
        m.transaction_statements.push(DdlStatement::sql_only("SELECT 1"));
        m.nontransaction_statements.push(DdlStatement::new(
            "CREATE INDEX CONCURRENTLY i ON x (c)",
            DdlIntent::CreateIndex {
                table: t,
                name: "i".into(),
                columns: vec!["c".into()],
                concurrent: true,
            },
        ));
        m.application_database_statements
            .push(DdlStatement::new(
                "CREATE SEQUENCE s",
                DdlIntent::CreateSequence { name: "s".into() },
            ));
        assert_eq!(m.len(), 3);
        assert!(!m.is_noop());
    }
}
