//! Splitting a `pkcs11:` URI path into attribute segments.

use std::fmt;


//------------ Attribute -----------------------------------------------------

/// The URI attributes understood by the parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attribute {
    PinValue,
    PinSource,
    Object,
    Model,
    Serial,
    Token,
    Manufacturer,
    Id,
    Type,
    ModulePath,
    SlotId,
}

impl Attribute {
    const ALL: [Attribute; 11] = [
        Attribute::PinValue,
        Attribute::PinSource,
        Attribute::Object,
        Attribute::Model,
        Attribute::Serial,
        Attribute::Token,
        Attribute::Manufacturer,
        Attribute::Id,
        Attribute::Type,
        Attribute::ModulePath,
        Attribute::SlotId,
    ];

    /// Returns the attribute for a key, if it is one we know.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.key() == key)
    }

    pub fn key(self) -> &'static str {
        match self {
            Attribute::PinValue => "pin-value",
            Attribute::PinSource => "pin-source",
            Attribute::Object => "object",
            Attribute::Model => "model",
            Attribute::Serial => "serial",
            Attribute::Token => "token",
            Attribute::Manufacturer => "manufacturer",
            Attribute::Id => "id",
            Attribute::Type => "type",
            Attribute::ModulePath => "module-path",
            Attribute::SlotId => "slot-id",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.key())
    }
}


//------------ Segment -------------------------------------------------------

/// A single `key=value` segment of the URI path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment<'a> {
    /// The raw key, up to the first `=`.
    pub key: &'a str,

    /// The raw, still encoded value after the first `=`.
    ///
    /// This is `None` if the segment has no `=` at all.
    pub value: Option<&'a str>,
}

impl<'a> Segment<'a> {
    fn scan(raw: &'a str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Segment {
                key,
                value: Some(value),
            },
            None => Segment {
                key: raw,
                value: None,
            },
        }
    }

    /// Returns the recognized attribute and its value.
    ///
    /// Segments with an unknown key or without a value yield `None`.
    pub fn attribute(&self) -> Option<(Attribute, &'a str)> {
        let value = self.value?;
        Attribute::from_key(self.key).map(|attr| (attr, value))
    }
}


//------------ Segments ------------------------------------------------------

/// Iterator over the non-empty segments of a URI path.
///
/// Segments are separated by `;`. Nothing is trimmed, and a final segment
/// without a trailing separator is returned like any other.
#[derive(Clone, Debug)]
pub struct Segments<'a> {
    rest: Option<&'a str>,
}

impl<'a> Segments<'a> {
    pub fn new(path: &'a str) -> Self {
        Segments { rest: Some(path) }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = self.rest?;
            let raw = match rest.split_once(';') {
                Some((head, tail)) => {
                    self.rest = Some(tail);
                    head
                }
                None => {
                    self.rest = None;
                    rest
                }
            };
            if !raw.is_empty() {
                return Some(Segment::scan(raw));
            }
        }
    }
}


//============ Tests =========================================================
