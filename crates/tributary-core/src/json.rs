//! JSON encoding with NUL sanitization.
//!
//! The backing JSON column type cannot store a literal NUL byte even
//! though the `\u0000` escape is valid JSON, so payloads are encoded
//! with unescaped NUL escapes stripped. The stripping is escape-aware:
//! an escaped NUL inside a JSON string that is itself a JSON-encoded
//! string value (`\\u0000`) must be preserved verbatim, since
//! over-stripping would corrupt valid string values.

use serde_json::Value as JsonValue;

/// Encodes a value to JSON text with unescaped NUL escapes removed.
#[must_use]
pub fn encode_sanitized(value: &JsonValue) -> String {
    strip_unescaped_nul(&value.to_string())
}

/// Removes every `\u0000` sequence whose leading backslash is itself
/// unescaped (preceded by an even number of backslashes).
#[must_use]
pub fn strip_unescaped_nul(encoded: &str) -> String {
    const NUL_ESCAPE: &str = "\\u0000";
    let mut out = String::with_capacity(encoded.len());
    let mut run = 0usize; // length of the current backslash run
    let mut iter = encoded.char_indices();
    while let Some((i, ch)) = iter.next() {
        if ch == '\\' && run % 2 == 0 && encoded[i..].starts_with(NUL_ESCAPE) {
            // Skip the remaining five characters of the escape.
            for _ in 0..NUL_ESCAPE.len() - 1 {
                iter.next();
            }
            run = 0;
            continue;
        }
        run = if ch == '\\' { run + 1 } else { 0 };
        out.push(ch);
    }
    out
}
