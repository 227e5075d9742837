//! Percent encoding of URI attribute values.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode, percent_encode};

use crate::error::Error;

/// Bytes that are left alone when building a `pkcs11:` URI.
///
/// These are the unreserved characters plus the sub-delimiters RFC 7512
/// allows inside a path attribute value.
const PK11_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'&');

/// Decodes `%HH` escapes in an attribute value.
///
/// Unlike the lenient decoder of the `percent-encoding` crate, a `%` that
/// is not followed by two hex digits is an error.
pub fn decode(value: &str) -> Result<Vec<u8>, Error> {
    let bytes = value.as_bytes();
    for (pos, _) in value.match_indices('%') {
        let valid = bytes
            .get(pos + 1..pos + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(Error::MalformedUri(format!(
                "invalid percent escape at offset {} in '{}'",
                pos, value
            )));
        }
    }
    Ok(percent_decode(bytes).collect())
}

/// Encodes a value for use as a path attribute of a `pkcs11:` URI.
pub fn encode(value: &[u8]) -> String {
    percent_encode(value, PK11_PATH).to_string()
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escapes() {
        assert_eq!(decode("My%20Key").unwrap(), b"My Key");
        assert_eq!(decode("%01%02%ff").unwrap(), vec![1, 2, 255]);
        assert_eq!(decode("plain").unwrap(), b"plain");
        assert_eq!(decode("").unwrap(), b"");
    }

    #[test]
    fn rejects_bad_escapes() {
        assert!(matches!(decode("%G1"), Err(Error::MalformedUri(_))));
        assert!(matches!(decode("abc%4"), Err(Error::MalformedUri(_))));
        assert!(matches!(decode("abc%"), Err(Error::MalformedUri(_))));
        assert!(matches!(decode("%%41"), Err(Error::MalformedUri(_))));
    }

    #[test]
    fn encodes_reserved_bytes() {
        assert_eq!(encode(b"My Key"), "My%20Key");
        assert_eq!(encode(b"a;b/c"), "a%3Bb%2Fc");
        assert_eq!(encode(&[0x01, 0xab]), "%01%AB");
        assert_eq!(encode(b"test-key_1.(v2)"), "test-key_1.(v2)");
    }
}
