//! Column types and typed cell values.
//!
//! [`ColumnType`] is the fixed physical-type enum shared by every
//! replicator table; its variants must be reproduced exactly for
//! compatibility with already-provisioned tables. [`ColumnValue`] is the
//! typed cell representation rows carry between extraction and storage.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical column types supported by replicator tables.
///
/// The set is closed: adapters declare columns only in terms of these
/// variants, and the Postgres type name each maps to is part of the
/// storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Arbitrary text.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Bigint,
    /// Arbitrary-precision numeric.
    Decimal,
    /// Boolean.
    Boolean,
    /// Timestamp with time zone.
    Timestamp,
    /// Calendar date.
    Date,
    /// JSON document, persisted as pre-encoded text.
    Object,
    /// Array of text.
    TextArray,
    /// Array of 32-bit integers.
    IntegerArray,
    /// Array of 64-bit integers.
    BigintArray,
    /// UUID, used for synthesized compound-key columns.
    Uuid,
}

impl ColumnType {
    /// Returns the Postgres type name for this column type.
    #[must_use]
    pub fn pg_type(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bigint => "bigint",
            Self::Decimal => "numeric",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamptz",
            Self::Date => "date",
            Self::Object => "jsonb",
            Self::TextArray => "text[]",
            Self::IntegerArray => "integer[]",
            Self::BigintArray => "bigint[]",
            Self::Uuid => "uuid",
        }
    }

    /// Returns `true` for the array-typed variants.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::TextArray | Self::IntegerArray | Self::BigintArray)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_type())
    }
}

/// A typed cell value carried between extraction and storage.
///
/// Object values hold pre-encoded JSON text rather than a parsed
/// structure; the store persists JSON columns as encoded text to
/// sidestep driver encoding edge cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// Text value.
    Text(String),
    /// 32-bit integer value (widened to i64 in memory).
    Integer(i64),
    /// 64-bit integer value.
    Bigint(i64),
    /// Numeric value, kept as its canonical decimal string.
    Decimal(String),
    /// Boolean value.
    Boolean(bool),
    /// Timestamp value. Retains the payload's offset representation;
    /// equality and ordering compare instants.
    Timestamp(DateTime<FixedOffset>),
    /// Date value.
    Date(NaiveDate),
    /// Pre-encoded JSON text.
    Object(String),
    /// Text array.
    TextArray(Vec<String>),
    /// 32-bit integer array.
    IntegerArray(Vec<i64>),
    /// 64-bit integer array.
    BigintArray(Vec<i64>),
    /// UUID value.
    Uuid(Uuid),
}

impl ColumnValue {
    /// Returns `true` if the value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compares two values of the same variant for ordering.
    ///
    /// Used by the conditional-upsert predicate. Returns `None` for
    /// mixed variants, NULLs, and types without a meaningful order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) | (Self::Bigint(a), Self::Bigint(b)) => {
                Some(a.cmp(b))
            }
            (Self::Decimal(a), Self::Decimal(b)) => {
                let a: f64 = a.parse().ok()?;
                let b: f64 = b.parse().ok()?;
                a.partial_cmp(&b)
            }
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Renders the value as a literal suitable for embedding in SQL.
    ///
    /// String content is quote-escaped; timestamps and dates are cast
    /// explicitly so the statement round-trips through plain `EXECUTE`.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        fn quoted(s: &str) -> String {
            format!("'{}'", s.replace('\'', "''"))
        }
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(s) => quoted(s),
            Self::Integer(i) | Self::Bigint(i) => i.to_string(),
            Self::Decimal(d) => d.clone(),
            Self::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::Timestamp(ts) => format!("{}::timestamptz", quoted(&ts.to_rfc3339())),
            Self::Date(d) => format!("{}::date", quoted(&d.to_string())),
            Self::Object(json) => format!("{}::jsonb", quoted(json)),
            Self::TextArray(items) => {
                let body: Vec<String> = items.iter().map(|s| quoted(s)).collect();
                format!("ARRAY[{}]::text[]", body.join(", "))
            }
            Self::IntegerArray(items) => {
                let body: Vec<String> = items.iter().map(ToString::to_string).collect();
                format!("ARRAY[{}]::integer[]", body.join(", "))
            }
            Self::BigintArray(items) => {
                let body: Vec<String> = items.iter().map(ToString::to_string).collect();
                format!("ARRAY[{}]::bigint[]", body.join(", "))
            }
            Self::Uuid(u) => format!("{}::uuid", quoted(&u.to_string())),
        }
    }
}
