//! Error types for column extraction, conversion, and schema operations.
//!
//! Provides [`ExtractError`] for the value-extraction pipeline,
//! [`ConvertError`] for converter/defaulter application, and
//! [`SchemaError`] for DDL derivation, plus convenience result aliases.

use thiserror::Error;

use crate::types::ColumnType;

/// Result alias for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors that can occur while extracting a column value from a payload.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A required key was missing from the payload. Names the offending
    /// key and the keys that were available at that level.
    #[error("no key '{key}' in payload (available: {})", available.join(", "))]
    MissingKey {
        /// The key that was not found.
        key: String,
        /// The keys present at the level where the lookup failed.
        available: Vec<String>,
    },

    /// A path segment landed on a non-container value.
    #[error("cannot descend into key '{key}': value is {found}, not an object or array")]
    NotAContainer {
        /// The key that could not be descended into.
        key: String,
        /// A short description of the value found instead.
        found: String,
    },

    /// The extracted value could not be coerced to the column's type.
    #[error("column '{column}' expects {expected}: {message}")]
    Coercion {
        /// The column being populated.
        column: String,
        /// The declared column type.
        expected: ColumnType,
        /// What went wrong.
        message: String,
    },

    /// A converter or defaulter failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Result alias for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors from converter and defaulter application.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter's or defaulter's SQL half is explicitly unimplemented.
    ///
    /// Columns carrying such a converter can never be added to a
    /// pre-existing table without a manual `backfill_expr`.
    #[error("converter '{name}' has no SQL equivalent; supply an explicit backfill expression")]
    SqlUnimplemented {
        /// The converter's name.
        name: String,
    },

    /// The in-process value transform failed.
    #[error("converter '{name}' failed: {message}")]
    Apply {
        /// The converter's name.
        name: String,
        /// What went wrong.
        message: String,
    },
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors from schema derivation and evolution.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A column backfill expression could not be built.
    #[error("cannot backfill column '{column}': {source}")]
    Backfill {
        /// The column that cannot be backfilled.
        column: String,
        /// The underlying conversion error.
        #[source]
        source: ConvertError,
    },

    /// A schema change other than an additive column was requested.
    /// Type changes, renames, and removals require adapter versioning.
    #[error("unsupported schema change: {0}")]
    UnsupportedChange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_names_available_keys() {
        let err = ExtractError::MissingKey {
            key: "updated_at".into(),
            available: vec!["id".into(), "created_at".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("updated_at"));
        assert!(msg.contains("id, created_at"));
    }

    #[test]
    fn test_sql_unimplemented_display() {
        let err = ConvertError::SqlUnimplemented {
            name: "sequence_fallback".into(),
        };
        assert!(err.to_string().contains("sequence_fallback"));
        assert!(err.to_string().contains("backfill expression"));
    }

    #[test]
    fn test_coercion_error_names_column_and_type() {
        let err = ExtractError::Coercion {
            column: "amount".into(),
            expected: ColumnType::Decimal,
            message: "not a number".into(),
        };
        assert!(err.to_string().contains("amount"));
        assert!(err.to_string().contains("numeric"));
    }

    #[test]
    fn test_backfill_error_wraps_convert() {
        let err = SchemaError::Backfill {
            column: "total".into(),
            source: ConvertError::SqlUnimplemented {
                name: "custom".into(),
            },
        };
        assert!(err.to_string().contains("total"));
    }
}
