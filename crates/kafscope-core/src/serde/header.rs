//! Record header value rendering.

use std::fmt;

/// Best-effort typed reading of a header value.
///
/// Candidates are tried in a fixed order: UTF-8 text, big-endian `i32`,
/// `i64`, `f32`, `f64`, then lowercase hex. Numeric readings require an
/// exact length, so a 4- or 8-byte value always resolves to the integer
/// reading of that width.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// Valid UTF-8.
    Text(String),
    /// Four bytes, big-endian.
    Int32(i32),
    /// Eight bytes, big-endian.
    Int64(i64),
    /// Anything else.
    Hex(String),
}

impl HeaderValue {
    /// Classifies raw header bytes.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return HeaderValue::Text(text.to_string());
        }
        if let Ok(b) = <[u8; 4]>::try_from(bytes) {
            return HeaderValue::Int32(i32::from_be_bytes(b));
        }
        if let Ok(b) = <[u8; 8]>::try_from(bytes) {
            return HeaderValue::Int64(i64::from_be_bytes(b));
        }
        // A float32 or float64 header is also exactly 4 or 8 bytes, so the
        // integer checks above always claim it first. There is no float case.
        HeaderValue::Hex(hex::encode(bytes))
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(s) | HeaderValue::Hex(s) => f.write_str(s),
            HeaderValue::Int32(v) => write!(f, "{v}"),
            HeaderValue::Int64(v) => write!(f, "{v}"),
        }
    }
}

/// Renders header bytes for display.
#[must_use]
pub fn render_header_value(bytes: &[u8]) -> String {
    HeaderValue::parse(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_round_trip() {
        assert_eq!(render_header_value(b"trace-123"), "trace-123");
        assert_eq!(render_header_value("héllo".as_bytes()), "héllo");
        assert_eq!(render_header_value(b""), "");
    }

    #[test]
    fn test_ascii_four_bytes_stay_text() {
        assert_eq!(
            HeaderValue::parse(b"abcd"),
            HeaderValue::Text("abcd".into())
        );
    }

    #[test]
    fn test_int32() {
        let bytes = (-2i32).to_be_bytes();
        assert_eq!(HeaderValue::parse(&bytes), HeaderValue::Int32(-2));
        assert_eq!(render_header_value(&bytes), "-2");
    }

    #[test]
    fn test_int64() {
        let bytes = (-1_700_000_000_000i64).to_be_bytes();
        assert_eq!(render_header_value(&bytes), "-1700000000000");
    }

    #[test]
    fn test_eight_bytes_prefer_integer_over_float() {
        let bytes = 1.5f64.to_be_bytes();
        assert!(matches!(HeaderValue::parse(&bytes), HeaderValue::Int64(_)));
    }

    #[test]
    fn test_hex_fallback() {
        assert_eq!(render_header_value(&[0xff, 0x00, 0xab]), "ff00ab");
    }

    #[test]
    fn test_deterministic() {
        let bytes = [0xde, 0xad, 0xbe, 0xef, 0x01];
        assert_eq!(render_header_value(&bytes), render_header_value(&bytes));
    }
}
