//! Value extraction from resource/event/enrichment payloads.
//!
//! Implements the extraction pipeline for one [`Column`]: source
//! selection (enrichment → event → resource), the `dig` path walk,
//! defaulting, conversion, and coercion to the column's physical type.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::column::{Column, DataKey, EACH_ITEM};
use crate::convert::ValueContext;
use crate::error::{ExtractError, ExtractResult};
use crate::types::{ColumnType, ColumnValue};

/// Walks an ordered key path into a JSON payload.
///
/// At each step, a missing key short-circuits to `None` when `optional`
/// is set; otherwise it raises a descriptive error naming the offending
/// key and the keys available at that level. Segments that parse as
/// integers index into arrays; the [`EACH_ITEM`] marker resolves to the
/// value currently being walked.
pub fn dig<'a>(
    root: &'a JsonValue,
    segments: &[&str],
    optional: bool,
) -> ExtractResult<Option<&'a JsonValue>> {
    let mut current = root;
    for segment in segments {
        if *segment == EACH_ITEM {
            continue;
        }
        match current {
            JsonValue::Object(map) => match map.get(*segment) {
                Some(next) => current = next,
                None if optional => return Ok(None),
                None => {
                    return Err(ExtractError::MissingKey {
                        key: (*segment).to_string(),
                        available: map.keys().cloned().collect(),
                    })
                }
            },
            JsonValue::Array(items) => {
                let idx: Option<usize> = segment.parse().ok();
                match idx.and_then(|i| items.get(i)) {
                    Some(next) => current = next,
                    None if optional => return Ok(None),
                    None => {
                        return Err(ExtractError::MissingKey {
                            key: (*segment).to_string(),
                            available: vec![format!("array of {} items", items.len())],
                        })
                    }
                }
            }
            other => {
                if optional {
                    return Ok(None);
                }
                return Err(ExtractError::NotAContainer {
                    key: (*segment).to_string(),
                    found: json_kind(other).to_string(),
                });
            }
        }
    }
    Ok(Some(current))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Shifts a timestamp whose local year is 0000 to its UTC
/// representation.
///
/// The backing store cannot represent year-0000 timestamps in all
/// timezone offsets, so such values are re-expressed in UTC. All other
/// timestamps keep their original offset.
#[must_use]
pub fn normalize_zero_year(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    if ts.year() == 0 {
        ts.with_timezone(&Utc).fixed_offset()
    } else {
        ts
    }
}

impl Column {
    /// Produces the typed value for this column from the given payloads.
    ///
    /// Order: enrichment when `from_enrichment`; else the event envelope
    /// when present and an `event_key` is set (never optional); else the
    /// resource. A nil extraction is replaced by the defaulter, then the
    /// converter runs, then the value is coerced to the physical type.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] on missing required keys, converter
    /// failures, or type coercion failures. These are fatal and
    /// propagate out of the upsert pipeline.
    pub fn extracted_value(&self, ctx: &ValueContext<'_>) -> ExtractResult<ColumnValue> {
        let raw = if self.from_enrichment {
            match ctx.enrichment {
                Some(enrichment) => dig(enrichment, &self.data_key.segments(), self.optional)?,
                None if self.optional => None,
                None => {
                    return Err(ExtractError::MissingKey {
                        key: first_segment(&self.data_key),
                        available: vec!["no enrichment payload".to_string()],
                    })
                }
            }
        } else if let (Some(event), Some(event_key)) = (ctx.event, &self.event_key) {
            // Event shapes are fixed by the API provider; a malformed
            // event is a hard failure regardless of `optional`.
            dig(event, &event_key.segments(), false)?
        } else {
            dig(ctx.resource, &self.data_key.segments(), self.optional)?
        };

        let mut value = raw.cloned().unwrap_or(JsonValue::Null);
        if value.is_null() {
            if let Some(defaulter) = &self.defaulter {
                value = defaulter.apply(ctx);
            }
        }
        if let Some(converter) = &self.converter {
            value = converter.apply(value, ctx)?;
        }
        coerce(&self.name, value, self.column_type)
    }
}

fn first_segment(key: &DataKey) -> String {
    key.segments().first().map_or_else(String::new, |s| (*s).to_string())
}

/// Coerces a JSON value to a typed cell value for the given column type.
///
/// # Errors
///
/// Returns [`ExtractError::Coercion`] when the value does not fit the
/// declared type.
#[allow(clippy::too_many_lines)]
pub fn coerce(column: &str, value: JsonValue, ty: ColumnType) -> ExtractResult<ColumnValue> {
    let fail = |message: String| ExtractError::Coercion {
        column: column.to_string(),
        expected: ty,
        message,
    };

    if value.is_null() {
        return Ok(ColumnValue::Null);
    }

    match ty {
        ColumnType::Text => match value {
            JsonValue::String(s) => Ok(ColumnValue::Text(s)),
            JsonValue::Number(n) => Ok(ColumnValue::Text(n.to_string())),
            JsonValue::Bool(b) => Ok(ColumnValue::Text(b.to_string())),
            other => Err(fail(format!("cannot store {} as text", json_kind(&other)))),
        },
        ColumnType::Integer | ColumnType::Bigint => {
            let parsed = coerce_int(&value).ok_or_else(|| fail(format!("{value} is not an integer")))?;
            Ok(match ty {
                ColumnType::Integer => ColumnValue::Integer(parsed),
                _ => ColumnValue::Bigint(parsed),
            })
        }
        ColumnType::Decimal => match &value {
            JsonValue::Number(n) => Ok(ColumnValue::Decimal(n.to_string())),
            JsonValue::String(s) if s.trim().parse::<f64>().is_ok() => {
                Ok(ColumnValue::Decimal(s.trim().to_string()))
            }
            other => Err(fail(format!("{other} is not numeric"))),
        },
        ColumnType::Boolean => match &value {
            JsonValue::Bool(b) => Ok(ColumnValue::Boolean(*b)),
            JsonValue::String(s) if s == "true" => Ok(ColumnValue::Boolean(true)),
            JsonValue::String(s) if s == "false" => Ok(ColumnValue::Boolean(false)),
            other => Err(fail(format!("{other} is not a boolean"))),
        },
        ColumnType::Timestamp => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("{value} is not a timestamp string")))?;
            let parsed = parse_timestamp(s).ok_or_else(|| fail(format!("cannot parse '{s}'")))?;
            Ok(ColumnValue::Timestamp(normalize_zero_year(parsed)))
        }
        ColumnType::Date => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("{value} is not a date string")))?;
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.date_naive()))
                .ok_or_else(|| fail(format!("cannot parse '{s}'")))?;
            Ok(ColumnValue::Date(date))
        }
        ColumnType::Object => match value {
            JsonValue::String(s) => Ok(ColumnValue::Object(s)),
            other => Ok(ColumnValue::Object(other.to_string())),
        },
        ColumnType::TextArray => {
            let items = wrap_array(value);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    JsonValue::String(s) => out.push(s),
                    JsonValue::Number(n) => out.push(n.to_string()),
                    other => return Err(fail(format!("array item {other} is not text"))),
                }
            }
            Ok(ColumnValue::TextArray(out))
        }
        ColumnType::IntegerArray | ColumnType::BigintArray => {
            let items = wrap_array(value);
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                let parsed = coerce_int(item)
                    .ok_or_else(|| fail(format!("array item {item} is not an integer")))?;
                out.push(parsed);
            }
            Ok(match ty {
                ColumnType::IntegerArray => ColumnValue::IntegerArray(out),
                _ => ColumnValue::BigintArray(out),
            })
        }
        ColumnType::Uuid => {
            let s = value
                .as_str()
                .ok_or_else(|| fail(format!("{value} is not a uuid string")))?;
            let parsed: Uuid = s.parse().map_err(|_| fail(format!("cannot parse '{s}'")))?;
            Ok(ColumnValue::Uuid(parsed))
        }
    }
}

/// Wraps a scalar into a single-element array, so a payload carrying
/// one value where the API usually sends a list still coerces.
fn wrap_array(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        other => vec![other],
    }
}

fn coerce_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| DateTime::parse_from_rfc2822(s).ok())
        .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConstDefaulter, ToInteger};
    use crate::integration::ServiceIntegration;
    use serde_json::json;
    use std::sync::Arc;

    fn integration() -> ServiceIntegration {
        ServiceIntegration::new("svi_t", "test_v1", "org", "tbl")
    }

    fn ctx<'a>(
        resource: &'a JsonValue,
        event: Option<&'a JsonValue>,
        enrichment: Option<&'a JsonValue>,
        integration: &'a ServiceIntegration,
    ) -> ValueContext<'a> {
        ValueContext {
            resource,
            event,
            enrichment,
            integration,
        }
    }

    // ── dig ──

    #[test]
    fn test_dig_multi_segment_path() {
        let doc = json!({"a": {"b": {"c": 5}}});
        let got = dig(&doc, &["a", "b", "c"], false).unwrap();
        assert_eq!(got, Some(&json!(5)));
    }

    #[test]
    fn test_dig_missing_key_names_available() {
        let doc = json!({"id": 1, "name": "x"});
        let err = dig(&doc, &["updated"], false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'updated'"));
        assert!(msg.contains("id"));
        assert!(msg.contains("name"));
    }

    #[test]
    fn test_dig_optional_short_circuits_anywhere() {
        let doc = json!({"a": {"x": 1}});
        assert_eq!(dig(&doc, &["a", "b", "c"], true).unwrap(), None);
        assert_eq!(dig(&doc, &["missing", "b"], true).unwrap(), None);
    }

    #[test]
    fn test_dig_array_index() {
        let doc = json!({"items": [{"id": "first"}, {"id": "second"}]});
        let got = dig(&doc, &["items", "1", "id"], false).unwrap();
        assert_eq!(got, Some(&json!("second")));
    }

    #[test]
    fn test_dig_array_out_of_range() {
        let doc = json!([1, 2]);
        let err = dig(&doc, &["5"], false).unwrap_err();
        assert!(err.to_string().contains("array of 2 items"));
    }

    #[test]
    fn test_dig_each_item_marker_is_identity() {
        let doc = json!("bare-id");
        let got = dig(&doc, &[EACH_ITEM], false).unwrap();
        assert_eq!(got, Some(&json!("bare-id")));
    }

    #[test]
    fn test_dig_into_scalar_fails() {
        let doc = json!({"a": 3});
        let err = dig(&doc, &["a", "b"], false).unwrap_err();
        assert!(matches!(err, ExtractError::NotAContainer { .. }));
    }

    // ── extracted_value ──

    #[test]
    fn test_event_takes_precedence_over_resource() {
        let resource = json!({"status": "stale"});
        let event = json!({"object": {"status": "fresh"}});
        let sint = integration();
        let col = Column::new("status", ColumnType::Text)
            .with_event_key(vec!["object", "status"]);
        let got = col
            .extracted_value(&ctx(&resource, Some(&event), None, &sint))
            .unwrap();
        assert_eq!(got, ColumnValue::Text("fresh".into()));
    }

    #[test]
    fn test_event_extraction_is_never_optional() {
        let resource = json!({"status": "x"});
        let event = json!({"wrong_shape": true});
        let sint = integration();
        let col = Column::new("status", ColumnType::Text)
            .optional()
            .with_event_key(vec!["object", "status"]);
        let err = col
            .extracted_value(&ctx(&resource, Some(&event), None, &sint))
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingKey { .. }));
    }

    #[test]
    fn test_enrichment_source() {
        let resource = json!({});
        let enrichment = json!({"score": 9});
        let sint = integration();
        let col = Column::new("score", ColumnType::Integer).from_enrichment();
        let got = col
            .extracted_value(&ctx(&resource, None, Some(&enrichment), &sint))
            .unwrap();
        assert_eq!(got, ColumnValue::Integer(9));
    }

    #[test]
    fn test_missing_enrichment_fails_unless_optional() {
        let resource = json!({});
        let sint = integration();
        let col = Column::new("score", ColumnType::Integer).from_enrichment();
        assert!(col
            .extracted_value(&ctx(&resource, None, None, &sint))
            .is_err());

        let optional = Column::new("score", ColumnType::Integer)
            .from_enrichment()
            .optional();
        assert_eq!(
            optional
                .extracted_value(&ctx(&resource, None, None, &sint))
                .unwrap(),
            ColumnValue::Null
        );
    }

    #[test]
    fn test_defaulter_fills_nil_then_converter_runs() {
        let resource = json!({});
        let sint = integration();
        let col = Column::new("count", ColumnType::Integer)
            .optional()
            .with_defaulter(Arc::new(ConstDefaulter::new(json!("3"), "3")))
            .with_converter(Arc::new(ToInteger));
        let got = col.extracted_value(&ctx(&resource, None, None, &sint)).unwrap();
        assert_eq!(got, ColumnValue::Integer(3));
    }

    // ── coercion ──

    #[test]
    fn test_coerce_timestamp_preserves_offset() {
        let got = coerce("t", json!("2024-06-01T10:00:00+05:30"), ColumnType::Timestamp).unwrap();
        let ColumnValue::Timestamp(ts) = got else {
            panic!("expected timestamp")
        };
        assert_eq!(ts.offset().local_minus_utc(), 5 * 3600 + 1800);
    }

    #[test]
    fn test_coerce_zero_year_shifts_to_utc() {
        let got = coerce("t", json!("0000-01-01T00:00:00+08:00"), ColumnType::Timestamp).unwrap();
        let ColumnValue::Timestamp(ts) = got else {
            panic!("expected timestamp")
        };
        assert_eq!(ts.offset().local_minus_utc(), 0);
        assert_ne!(ts.year(), 0);
    }

    #[test]
    fn test_coerce_object_passes_strings_through() {
        let got = coerce("o", json!("{\"a\":1}"), ColumnType::Object).unwrap();
        assert_eq!(got, ColumnValue::Object("{\"a\":1}".into()));

        let got = coerce("o", json!({"a": 1}), ColumnType::Object).unwrap();
        assert_eq!(got, ColumnValue::Object("{\"a\":1}".into()));
    }

    #[test]
    fn test_coerce_arrays() {
        let got = coerce("a", json!(["x", "y"]), ColumnType::TextArray).unwrap();
        assert_eq!(got, ColumnValue::TextArray(vec!["x".into(), "y".into()]));

        let got = coerce("a", json!([1, "2"]), ColumnType::BigintArray).unwrap();
        assert_eq!(got, ColumnValue::BigintArray(vec![1, 2]));

        assert!(coerce("a", json!("nope"), ColumnType::IntegerArray).is_err());
    }

    #[test]
    fn test_coerce_scalar_wraps_into_array() {
        let got = coerce("a", json!("solo"), ColumnType::TextArray).unwrap();
        assert_eq!(got, ColumnValue::TextArray(vec!["solo".into()]));

        let got = coerce("a", json!(7), ColumnType::IntegerArray).unwrap();
        assert_eq!(got, ColumnValue::IntegerArray(vec![7]));
    }

    #[test]
    fn test_coerce_date_from_timestamp_string() {
        let got = coerce("d", json!("2024-06-01T10:00:00Z"), ColumnType::Date).unwrap();
        assert_eq!(
            got,
            ColumnValue::Date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        );
    }

    #[test]
    fn test_coerce_null_is_null() {
        assert_eq!(
            coerce("x", JsonValue::Null, ColumnType::Text).unwrap(),
            ColumnValue::Null
        );
    }
}
