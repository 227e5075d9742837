//! Fixed-width, space padded token descriptor fields.

use std::fmt;

use crate::constants::{TOKEN_LABEL_LEN, TOKEN_MODEL_LEN};


//------------ PaddedField ---------------------------------------------------

/// A byte string right-padded with spaces to exactly `N` bytes.
///
/// PKCS#11 reports token labels, manufacturer ids, models and serial
/// numbers as blank padded buffers of a fixed size. Values taken from a URI
/// are padded the same way so that the two can be compared byte for byte.
/// Two fields are equal only if all `N` bytes are equal, so `ABC` does not
/// match a token labelled `ABCD`.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PaddedField<const N: usize>([u8; N]);

/// The token label and manufacturer id.
pub type LabelField = PaddedField<TOKEN_LABEL_LEN>;

/// The token model and serial number.
pub type ModelField = PaddedField<TOKEN_MODEL_LEN>;

impl<const N: usize> PaddedField<N> {
    /// Pads `value` to the field width.
    ///
    /// Fails if the value is longer than the field.
    pub fn new(value: &[u8]) -> Result<Self, PaddedFieldError> {
        if value.len() > N {
            return Err(PaddedFieldError {
                width: N,
                len: value.len(),
            });
        }
        let mut buf = [b' '; N];
        buf[..value.len()].copy_from_slice(value);
        Ok(PaddedField(buf))
    }

    /// Returns the full padded content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the content without the trailing padding.
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .rposition(|&b| b != b' ')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        &self.0[..end]
    }
}

impl<const N: usize> TryFrom<&str> for PaddedField<N> {
    type Error = PaddedFieldError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}

impl<const N: usize> fmt::Display for PaddedField<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl<const N: usize> fmt::Debug for PaddedField<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PaddedField<{}>({:?})", N, self.to_string())
    }
}


//------------ PaddedFieldError ----------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PaddedFieldError {
    width: usize,
    len: usize,
}

impl fmt::Display for PaddedFieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "value of {} bytes does not fit a {} byte field",
            self.len, self.width
        )
    }
}

impl std::error::Error for PaddedFieldError {}


//============ Tests =========================================================
