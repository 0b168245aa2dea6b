//! Isomorphic converter and defaulter pairs.
//!
//! Every [`Converter`] and [`Defaulter`] provides two halves: an
//! in-process value transform and an equivalent SQL expression used when
//! backfilling a column added after table creation. A converter whose
//! SQL half cannot be expressed returns
//! [`ConvertError::SqlUnimplemented`], which means the column can never
//! be added to a pre-existing table without a manual backfill expression.
//!
//! Stock implementations cover the common shapes; adapters with bespoke
//! transforms use [`FnConverter`] / [`FnDefaulter`] with closures.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::error::{ConvertError, ConvertResult};
use crate::integration::ServiceIntegration;

/// Full context handed to converters and defaulters.
#[derive(Debug, Clone, Copy)]
pub struct ValueContext<'a> {
    /// The canonical resource payload.
    pub resource: &'a JsonValue,
    /// The wrapping event payload, when the webhook delivered an event.
    pub event: Option<&'a JsonValue>,
    /// The enrichment payload, when one was fetched.
    pub enrichment: Option<&'a JsonValue>,
    /// The integration being written.
    pub integration: &'a ServiceIntegration,
}

/// A paired value transform and SQL expression transform.
pub trait Converter: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Transforms the (possibly defaulted) extracted value in process.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Apply`] when the value cannot be
    /// transformed; such errors propagate unchanged out of the upsert.
    fn apply(&self, value: JsonValue, ctx: &ValueContext<'_>) -> ConvertResult<JsonValue>;

    /// Rewrites a SQL expression to apply the equivalent transform.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::SqlUnimplemented`] when the transform has
    /// no pure-SQL equivalent.
    fn to_sql(&self, expr: &str) -> ConvertResult<String>;
}

/// A paired value supplier and SQL expression used when extraction
/// yields nil.
pub trait Defaulter: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Produces the default value.
    fn apply(&self, ctx: &ValueContext<'_>) -> JsonValue;

    /// Returns the SQL expression for the default.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::SqlUnimplemented`] when the default has
    /// no pure-SQL equivalent.
    fn to_sql(&self) -> ConvertResult<String>;
}

impl fmt::Debug for dyn Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Converter({})", self.name())
    }
}

impl fmt::Debug for dyn Defaulter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defaulter({})", self.name())
    }
}

// ── Stock converters ────────────────────────────────────────────────

/// Parses a string (or passes through a number) as an integer.
pub struct ToInteger;

impl Converter for ToInteger {
    fn name(&self) -> &str {
        "to_integer"
    }

    fn apply(&self, value: JsonValue, _ctx: &ValueContext<'_>) -> ConvertResult<JsonValue> {
        match value {
            JsonValue::Null => Ok(JsonValue::Null),
            JsonValue::Number(n) => Ok(JsonValue::Number(n)),
            JsonValue::String(s) => {
                let parsed: i64 = s.trim().parse().map_err(|_| ConvertError::Apply {
                    name: self.name().to_string(),
                    message: format!("'{s}' is not an integer"),
                })?;
                Ok(JsonValue::from(parsed))
            }
            other => Err(ConvertError::Apply {
                name: self.name().to_string(),
                message: format!("cannot convert {other} to integer"),
            }),
        }
    }

    fn to_sql(&self, expr: &str) -> ConvertResult<String> {
        Ok(format!("({expr})::bigint"))
    }
}

/// Interprets an integer (or integer string) as seconds since the Unix
/// epoch and produces an RFC 3339 timestamp string.
pub struct UnixTimestamp;

impl Converter for UnixTimestamp {
    fn name(&self) -> &str {
        "unix_timestamp"
    }

    fn apply(&self, value: JsonValue, _ctx: &ValueContext<'_>) -> ConvertResult<JsonValue> {
        let secs = match &value {
            JsonValue::Null => return Ok(JsonValue::Null),
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let secs = secs.ok_or_else(|| ConvertError::Apply {
            name: self.name().to_string(),
            message: format!("cannot interpret {value} as epoch seconds"),
        })?;
        let ts = chrono::DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
            ConvertError::Apply {
                name: self.name().to_string(),
                message: format!("epoch seconds {secs} out of range"),
            }
        })?;
        Ok(JsonValue::String(ts.to_rfc3339()))
    }

    fn to_sql(&self, expr: &str) -> ConvertResult<String> {
        Ok(format!("to_timestamp(({expr})::bigint)"))
    }
}

/// Splits a comma-separated string into a text array.
pub struct CommaSplit;

impl Converter for CommaSplit {
    fn name(&self) -> &str {
        "comma_split"
    }

    fn apply(&self, value: JsonValue, _ctx: &ValueContext<'_>) -> ConvertResult<JsonValue> {
        match value {
            JsonValue::Null => Ok(JsonValue::Null),
            JsonValue::String(s) => {
                let items: Vec<JsonValue> = s
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| JsonValue::String(p.to_string()))
                    .collect();
                Ok(JsonValue::Array(items))
            }
            already @ JsonValue::Array(_) => Ok(already),
            other => Err(ConvertError::Apply {
                name: self.name().to_string(),
                message: format!("cannot split {other}"),
            }),
        }
    }

    fn to_sql(&self, expr: &str) -> ConvertResult<String> {
        Ok(format!("string_to_array({expr}, ',')"))
    }
}

/// Builds a converter from closures.
///
/// When `sql` is `None`, the SQL half is explicitly unimplemented and
/// [`Converter::to_sql`] fails loudly.
pub struct FnConverter {
    name: String,
    apply: Arc<dyn Fn(JsonValue, &ValueContext<'_>) -> ConvertResult<JsonValue> + Send + Sync>,
    sql: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
}

impl FnConverter {
    /// Creates a converter with both halves.
    pub fn new(
        name: impl Into<String>,
        apply: impl Fn(JsonValue, &ValueContext<'_>) -> ConvertResult<JsonValue> + Send + Sync + 'static,
        sql: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
            sql: Some(Arc::new(sql)),
        }
    }

    /// Creates a converter whose SQL half is explicitly unimplemented.
    pub fn value_only(
        name: impl Into<String>,
        apply: impl Fn(JsonValue, &ValueContext<'_>) -> ConvertResult<JsonValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
            sql: None,
        }
    }
}

impl Converter for FnConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: JsonValue, ctx: &ValueContext<'_>) -> ConvertResult<JsonValue> {
        (self.apply)(value, ctx)
    }

    fn to_sql(&self, expr: &str) -> ConvertResult<String> {
        match &self.sql {
            Some(f) => Ok(f(expr)),
            None => Err(ConvertError::SqlUnimplemented {
                name: self.name.clone(),
            }),
        }
    }
}

// ── Stock defaulters ────────────────────────────────────────────────

/// Defaults to the current time.
pub struct NowDefaulter;

impl Defaulter for NowDefaulter {
    fn name(&self) -> &str {
        "now"
    }

    fn apply(&self, _ctx: &ValueContext<'_>) -> JsonValue {
        JsonValue::String(Utc::now().to_rfc3339())
    }

    fn to_sql(&self) -> ConvertResult<String> {
        Ok("now()".to_string())
    }
}

/// Defaults to a constant value with a matching SQL literal.
pub struct ConstDefaulter {
    value: JsonValue,
    sql: String,
}

impl ConstDefaulter {
    /// Creates a constant defaulter. `sql` must be the literal SQL
    /// rendering of `value`.
    #[must_use]
    pub fn new(value: JsonValue, sql: impl Into<String>) -> Self {
        Self {
            value,
            sql: sql.into(),
        }
    }
}

impl Defaulter for ConstDefaulter {
    fn name(&self) -> &str {
        "const"
    }

    fn apply(&self, _ctx: &ValueContext<'_>) -> JsonValue {
        self.value.clone()
    }

    fn to_sql(&self) -> ConvertResult<String> {
        Ok(self.sql.clone())
    }
}

/// Builds a defaulter from closures; `sql = None` marks the SQL half
/// explicitly unimplemented.
pub struct FnDefaulter {
    name: String,
    apply: Arc<dyn Fn(&ValueContext<'_>) -> JsonValue + Send + Sync>,
    sql: Option<String>,
}

impl FnDefaulter {
    /// Creates a defaulter from a closure and an optional SQL expression.
    pub fn new(
        name: impl Into<String>,
        apply: impl Fn(&ValueContext<'_>) -> JsonValue + Send + Sync + 'static,
        sql: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
            sql,
        }
    }
}

impl Defaulter for FnDefaulter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &ValueContext<'_>) -> JsonValue {
        (self.apply)(ctx)
    }

    fn to_sql(&self) -> ConvertResult<String> {
        self.sql
            .clone()
            .ok_or_else(|| ConvertError::SqlUnimplemented {
                name: self.name.clone(),
            })
    }
}
