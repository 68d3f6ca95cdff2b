use alloc::string::{String, ToString};
use alloc::vec::Vec;
use heapless::FnvIndexMap;
use serde::{Deserialize, Serialize};

use crate::MAX_VALUE_FIELDS;

type FieldMap = FnvIndexMap<String, String, MAX_VALUE_FIELDS>;

/// A parsed message payload.
///
/// Either a scalar (the raw text, verbatim), a flat object whose fields are
/// kept as their raw scalar text, or an opaque byte buffer. Conversions never
/// fail: anything that does not look like a number reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    raw: String,
    fields: FieldMap,
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
}

impl Value {
    /// An empty value; every accessor returns its zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a text payload. Payloads wrapped in `{...}` are read as a flat
    /// object, anything else is kept as a scalar.
    pub fn parse(raw: &str) -> Self {
        let mut value = Self::scalar(raw);
        if let Some(body) = object_body(raw) {
            parse_fields(body, &mut value.fields);
        }
        value
    }

    /// Wrap raw text without looking inside it.
    pub fn scalar(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            ..Self::default()
        }
    }

    /// Wrap a binary payload. Only [`Value::as_bytes`] sees the data.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
            ..Self::default()
        }
    }

    pub fn as_int(&self) -> i64 {
        leading_int(&self.raw)
    }

    pub fn as_float(&self) -> f32 {
        self.as_double() as f32
    }

    pub fn as_double(&self) -> f64 {
        leading_float(&self.raw)
    }

    /// `"1"`, `"true"` and `"on"` (any case) are true; everything else is false.
    pub fn as_bool(&self) -> bool {
        let text = self.raw.trim();
        text == "1" || text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("on")
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Look up an object field. Missing keys and scalar values yield an
    /// empty value.
    pub fn get(&self, key: &str) -> Value {
        self.fields
            .get(key)
            .map_or_else(Value::new, |field| Value::scalar(field))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_object(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Length of the raw text payload.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.bytes.is_empty()
    }
}

impl From<&str> for Value {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn object_body(raw: &str) -> Option<&str> {
    if raw.len() >= 2 && raw.starts_with('{') && raw.ends_with('}') {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

/// Reads `"key":value` pairs until the body runs out or something is
/// malformed. Fields parsed before the failure point are kept, except when a
/// nested object or array shows up: that discards the whole map.
fn parse_fields(body: &str, fields: &mut FieldMap) {
    let mut start = 0;

    while start < body.len() {
        let Some(key_start) = find_from(body, '"', start) else { break };
        let Some(key_end) = find_from(body, '"', key_start + 1) else { break };
        let key = &body[key_start + 1..key_end];

        let Some(colon) = find_from(body, ':', key_end + 1) else { break };
        let value_start = skip_whitespace(body, colon + 1);

        let (field, value_end) = match body[value_start..].chars().next() {
            Some('"') => {
                let Some(close) = find_from(body, '"', value_start + 1) else { break };
                (&body[value_start + 1..close], close + 1)
            }
            Some('{' | '[') => {
                fields.clear();
                return;
            }
            _ => {
                let end = find_from(body, ',', value_start).unwrap_or(body.len());
                (&body[value_start..end], end)
            }
        };

        // Bounded map: a full table ends parsing like any other truncation.
        if fields.insert(key.to_string(), field.trim().to_string()).is_err() {
            break;
        }

        match find_from(body, ',', value_end) {
            Some(comma) => start = comma + 1,
            None => break,
        }
    }
}

fn find_from(text: &str, needle: char, from: usize) -> Option<usize> {
    text.get(from..)?.find(needle).map(|offset| from + offset)
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// `atol`-style: optional sign, then as many digits as present.
fn leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    // Accumulate towards the sign so i64::MIN is reachable.
    let mut result: i64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(byte - b'0');
        result = result.saturating_mul(10);
        result = if negative {
            result.saturating_sub(digit)
        } else {
            result.saturating_add(digit)
        };
    }
    result
}

/// `strtod`-style: parses the longest leading decimal literal.
fn leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    text[..end].parse().unwrap_or(0.0)
}
