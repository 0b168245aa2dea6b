//! Inbound webhook envelope.
//!
//! The engine is transport-agnostic: the HTTP layer hands over a parsed
//! body, the header map, the request path, and the method, and nothing
//! else. Header names are lowercased at construction so adapter lookups
//! are case-insensitive.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// A webhook request as seen by the engine.
#[derive(Debug, Clone)]
pub struct SyncEnvelope {
    /// Parsed request body. Form-encoded bodies arrive as a JSON
    /// object of string values; raw bodies as a JSON string.
    pub body: JsonValue,
    /// Request headers, keys lowercased.
    headers: BTreeMap<String, String>,
    /// Request path.
    pub path: String,
    /// HTTP method, uppercased.
    pub method: String,
}

impl SyncEnvelope {
    /// Creates an envelope from the raw request pieces.
    #[must_use]
    pub fn new(
        body: JsonValue,
        headers: impl IntoIterator<Item = (String, String)>,
        path: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            body,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            path: path.into(),
            method: method.into().to_ascii_uppercase(),
        }
    }

    /// Creates an envelope carrying only a body, for internal upserts
    /// that did not originate from an HTTP request.
    #[must_use]
    pub fn from_body(body: JsonValue) -> Self {
        Self::new(body, std::iter::empty(), "/", "POST")
    }

    /// Looks up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns all headers (lowercased keys, sorted).
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let env = SyncEnvelope::new(
            json!({}),
            vec![("X-Signature".to_string(), "abc".to_string())],
            "/v1/hook",
            "post",
        );
        assert_eq!(env.header("x-signature"), Some("abc"));
        assert_eq!(env.header("X-SIGNATURE"), Some("abc"));
        assert_eq!(env.header("missing"), None);
        assert_eq!(env.method, "POST");
    }

    #[test]
    fn test_from_body_defaults() {
        let env = SyncEnvelope::from_body(json!({"id": 1}));
        assert_eq!(env.path, "/");
        assert_eq!(env.method, "POST");
        assert!(env.headers().is_empty());
    }
}
