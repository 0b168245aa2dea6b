//! # Tributary Core
//!
//! The column model and schema machinery of the Tributary replication
//! engine: declarative column specs, value extraction from raw JSON
//! payloads, isomorphic value/SQL converters, DDL batch modeling, and
//! partition hashing.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Column spec declarations
pub mod column;

/// Isomorphic converter and defaulter pairs
pub mod convert;

/// Error types for extraction, conversion, and schema operations
pub mod error;

/// Value extraction from resource/event/enrichment payloads
pub mod extract;

/// Integration context shared with adapters
pub mod integration;

/// JSON encoding with NUL sanitization
pub mod json;

/// Hash partitioning support
pub mod partition;

/// DDL batch modeling
pub mod schema_mod;

/// SQL expression building for column backfills
pub mod sql;

/// Column types and typed cell values
pub mod types;

pub use column::{Column, DataKey, EACH_ITEM};
pub use convert::{Converter, Defaulter, ValueContext};
pub use error::{ConvertError, ExtractError, SchemaError};
pub use integration::ServiceIntegration;
pub use partition::{PartitionMethod, Partitioning};
pub use schema_mod::{DdlIntent, DdlStatement, SchemaModification, TableRef};
pub use types::{ColumnType, ColumnValue};
