//! SQL expression building for column backfills.
//!
//! When a column is added to a table that already has rows, existing
//! rows are populated by an UPDATE reading from the `data` (or
//! `enrichment`) JSON column at the configured path, applying the SQL
//! half of the column's converter, casting to the physical type, and
//! coalescing with the SQL half of the defaulter.

use crate::column::{Column, EACH_ITEM};
use crate::error::{SchemaError, SchemaResult};
use crate::types::ColumnType;

/// Double-quotes a SQL identifier, escaping embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Renders a jsonb path read as SQL text extraction.
///
/// Single-segment paths use `->>`, multi-segment paths use `#>>` with a
/// path array. The [`EACH_ITEM`] marker never appears in physical
/// storage paths and is skipped.
#[must_use]
pub fn json_path_expr(source_column: &str, segments: &[&str]) -> String {
    let source = quote_ident(source_column);
    let physical: Vec<&str> = segments.iter().copied().filter(|s| *s != EACH_ITEM).collect();
    match physical.as_slice() {
        [] => source,
        [single] => format!("{source} ->> '{}'", escape_literal(single)),
        many => {
            let path: Vec<String> = many.iter().map(|s| escape_literal(s)).collect();
            format!("{source} #>> '{{{}}}'", path.join(","))
        }
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

impl Column {
    /// Builds the SQL expression used to backfill this column from the
    /// stored JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Backfill`] when the converter's or
    /// defaulter's SQL half is explicitly unimplemented; the adapter
    /// must then supply a manual `backfill_expr`, or accept that the
    /// column cannot be added non-destructively.
    pub fn backfill_sql_expr(&self) -> SchemaResult<String> {
        let source_column = if self.from_enrichment { "enrichment" } else { "data" };
        let mut expr = json_path_expr(source_column, &self.data_key.segments());

        if let Some(converter) = &self.converter {
            expr = converter.to_sql(&expr).map_err(|source| SchemaError::Backfill {
                column: self.name.clone(),
                source,
            })?;
        }

        expr = format!("({expr})::{}", self.column_type.pg_type());

        if let Some(defaulter) = &self.defaulter {
            let default_sql = defaulter.to_sql().map_err(|source| SchemaError::Backfill {
                column: self.name.clone(),
                source,
            })?;
            expr = format!("coalesce({expr}, {default_sql})");
        }

        Ok(expr)
    }
}

/// Returns the cast target for a column, exposed for adapters writing
/// manual backfill expressions.
#[must_use]
pub fn cast_expr(expr: &str, ty: ColumnType) -> String {
    format!("({expr})::{}", ty.pg_type())
}
