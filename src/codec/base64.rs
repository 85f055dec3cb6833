//! Base64 helpers for NekoLink payloads
//!
//! Links shared between clients arrive in every Base64 flavour: standard or
//! URL-safe, padded or not, sometimes wrapped across lines.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use tracing::trace;

/// Decodes Base64 content, trying the standard and URL-safe alphabets with and
/// without padding. Whitespace is removed before decoding.
pub fn decode_base64(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    trace!("Attempting Base64 decode of {} bytes", cleaned.len());

    if let Ok(decoded) = STANDARD.decode(&cleaned) {
        return Ok(decoded);
    }
    if let Ok(decoded) = URL_SAFE.decode(&cleaned) {
        trace!("Decoded using URL-safe Base64");
        return Ok(decoded);
    }
    if let Ok(decoded) = URL_SAFE_NO_PAD.decode(&cleaned) {
        trace!("Decoded using URL-safe Base64 without padding");
        return Ok(decoded);
    }

    let padded = add_base64_padding(&cleaned);
    if let Ok(decoded) = STANDARD.decode(&padded) {
        trace!("Decoded using standard Base64 with added padding");
        return Ok(decoded);
    }
    URL_SAFE.decode(&padded)
}

/// Encodes bytes with the standard, padded alphabet.
pub fn encode_base64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Pads a Base64 string to a multiple of four characters.
pub fn add_base64_padding(s: &str) -> String {
    let mut result = s.to_string();
    while !result.len().is_multiple_of(4) {
        result.push('=');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_standard() {
        let decoded = decode_base64("aGVsbG8gd29ybGQ=").unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn test_decode_base64_without_padding() {
        let decoded = decode_base64("aGVsbG8gd29ybGQ").unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn test_decode_base64_with_linebreaks() {
        let decoded = decode_base64("aGVs\nbG8g\nd29y\nbGQ=").unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn test_decode_base64_url_safe() {
        // 0xfb 0xff encodes to "+/8" in standard and "-_8" in URL-safe
        let decoded = decode_base64("-_8").unwrap();
        assert_eq!(decoded, vec![0xfb, 0xff]);
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(decode_base64("not valid base64!!!").is_err());
    }

    #[test]
    fn test_encode_decode_json_payload() {
        let payload = r#"{"addr":"1.2.3.4","port":443}"#;
        let encoded = encode_base64(payload);
        assert_eq!(decode_base64(&encoded).unwrap(), payload.as_bytes());
    }

    #[test]
    fn test_add_base64_padding() {
        assert_eq!(add_base64_padding("abcd"), "abcd");
        assert_eq!(add_base64_padding("abc"), "abc=");
        assert_eq!(add_base64_padding("ab"), "ab==");
        assert_eq!(add_base64_padding(""), "");
    }
}
