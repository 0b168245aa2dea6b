//! Declarative column specs.
//!
//! A [`Column`] describes one stored column of a replicator table: how
//! to extract, convert, default, and backfill its value from raw
//! resource/event/enrichment payloads. Columns are immutable once built;
//! construction uses the builder pattern.

use std::sync::Arc;

use crate::convert::{Converter, Defaulter};
use crate::types::ColumnType;

/// Path-segment marker resolving to the value currently being walked,
/// rather than descending into a key. Used by adapters whose remote key
/// is the payload item itself.
pub const EACH_ITEM: &str = "<item>";

/// Path into a JSON payload: a single key or an ordered key list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataKey {
    /// A single top-level key.
    Key(String),
    /// An ordered path of keys walked from the payload root. Segments
    /// that parse as integers index into arrays.
    Path(Vec<String>),
}

impl DataKey {
    /// Returns the path segments in walk order.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Self::Key(k) => vec![k.as_str()],
            Self::Path(p) => p.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for DataKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<Vec<&str>> for DataKey {
    fn from(path: Vec<&str>) -> Self {
        Self::Path(path.into_iter().map(str::to_string).collect())
    }
}

/// Declarative spec for one stored column.
#[derive(Clone)]
pub struct Column {
    /// Column name, unique per table.
    pub name: String,

    /// Physical type.
    pub column_type: ColumnType,

    /// Path into the resource payload.
    pub data_key: DataKey,

    /// Alternate path used only when an event envelope is present.
    /// Event extraction is never optional: event shapes are fixed by
    /// the API provider, so a malformed event is a hard failure.
    pub event_key: Option<DataKey>,

    /// Read from the enrichment payload instead of the resource.
    pub from_enrichment: bool,

    /// Tolerate a missing key anywhere in the path, yielding nil.
    pub optional: bool,

    /// Paired extraction-time and SQL-backfill transform.
    pub converter: Option<Arc<dyn Converter>>,

    /// Paired value supplied when extraction yields nil.
    pub defaulter: Option<Arc<dyn Defaulter>>,

    /// Declare a secondary index on this column.
    pub index: bool,

    /// Restrict the declared index to non-null values.
    pub index_not_null: bool,

    /// Omit the column from the written row when the extracted value is
    /// nil, so a conflicting UPDATE will not clobber stored data.
    pub skip_nil: bool,

    /// Arbitrary statements run before the backfill UPDATE when this
    /// column is added to an existing table (e.g., a helper function).
    pub backfill_statement: Option<String>,

    /// Explicit SQL expression for the backfill UPDATE, overriding the
    /// column's own derived expression.
    pub backfill_expr: Option<String>,
}

impl Column {
    /// Creates a column spec with the given name and type. The data key
    /// defaults to the column name.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            data_key: DataKey::Key(name.clone()),
            name,
            column_type,
            event_key: None,
            from_enrichment: false,
            optional: false,
            converter: None,
            defaulter: None,
            index: false,
            index_not_null: false,
            skip_nil: false,
            backfill_statement: None,
            backfill_expr: None,
        }
    }

    /// Sets the resource path.
    #[must_use]
    pub fn with_data_key(mut self, key: impl Into<DataKey>) -> Self {
        self.data_key = key.into();
        self
    }

    /// Sets the event-envelope path.
    #[must_use]
    pub fn with_event_key(mut self, key: impl Into<DataKey>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    /// Reads this column from the enrichment payload.
    #[must_use]
    pub fn from_enrichment(mut self) -> Self {
        self.from_enrichment = true;
        self
    }

    /// Tolerates missing keys, yielding nil.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Attaches a converter.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Attaches a defaulter.
    #[must_use]
    pub fn with_defaulter(mut self, defaulter: Arc<dyn Defaulter>) -> Self {
        self.defaulter = Some(defaulter);
        self
    }

    /// Declares a secondary index.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    /// Declares a partial index over non-null values.
    #[must_use]
    pub fn indexed_not_null(mut self) -> Self {
        self.index = true;
        self.index_not_null = true;
        self
    }

    /// Omits the column from written rows when its value is nil.
    #[must_use]
    pub fn skip_nil(mut self) -> Self {
        self.skip_nil = true;
        self
    }

    /// Sets pre-backfill statements.
    #[must_use]
    pub fn with_backfill_statement(mut self, sql: impl Into<String>) -> Self {
        self.backfill_statement = Some(sql.into());
        self
    }

    /// Sets an explicit backfill expression.
    #[must_use]
    pub fn with_backfill_expr(mut self, expr: impl Into<String>) -> Self {
        self.backfill_expr = Some(expr.into());
        self
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("data_key", &self.data_key)
            .field("event_key", &self.event_key)
            .field("from_enrichment", &self.from_enrichment)
            .field("optional", &self.optional)
            .field("index", &self.index)
            .field("skip_nil", &self.skip_nil)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_key_defaults_to_name() {
        let col = Column::new("updated_at", ColumnType::Timestamp);
        assert_eq!(col.data_key, DataKey::Key("updated_at".into()));
    }

    #[test]
    fn test_path_data_key_segments() {
        let col = Column::new("city", ColumnType::Text).with_data_key(vec!["address", "city"]);
        assert_eq!(col.data_key.segments(), vec!["address", "city"]);
    }

    #[test]
    fn test_builder_flags() {
        let col = Column::new("tag", ColumnType::Text)
            .optional()
            .skip_nil()
            .indexed_not_null();
        assert!(col.optional);
        assert!(col.skip_nil);
        assert!(col.index);
        assert!(col.index_not_null);
    }

    #[test]
    fn test_debug_omits_converters() {
        let col = Column::new("n", ColumnType::Integer);
        let s = format!("{col:?}");
        assert!(s.contains("\"n\""));
        assert!(s.contains(".."));
    }
}
