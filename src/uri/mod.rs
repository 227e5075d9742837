//! Parsing `pkcs11:` URIs into selection criteria.
//!
//! A URI like `pkcs11:token=My%20Token;object=signing;type=private` names
//! an object on a token through a list of `key=value` attributes. Parsing
//! happens in three steps: the path is split into segments, each segment's
//! key is matched against the known attributes, and the value is decoded.
//! Unknown attributes are skipped. When an attribute appears more than
//! once, the first occurrence wins and later ones are not even decoded.
//!
//! For compatibility, input without the `pkcs11:` prefix is taken to be a
//! bare, percent-encoded object id.

use std::{env, path::PathBuf};

use log::trace;

use crate::{
    constants::{PKCS11_ENV_MODULE_PATH, PKCS11_SCHEME},
    error::Error,
    secret::Secret,
    token::{ObjectClass, ObjectFilter, SlotId},
};

pub use self::padded::{LabelField, ModelField, PaddedField, PaddedFieldError};

use self::segment::{Attribute, Segments};

pub mod escape;
mod padded;
mod segment;


//------------ ParseContext --------------------------------------------------

/// What a URI is being parsed for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseContext {
    /// Loading a single key, which needs an `id` or `object`.
    DirectKey,

    /// Listing or searching the objects of a token.
    Listing,
}


//------------ PinSource -----------------------------------------------------

/// Where to read a PIN from, as given by the `pin-source` attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PinSource {
    /// The first line of a local file.
    File(PathBuf),
}

impl PinSource {
    fn from_value(value: &str) -> Result<Self, Error> {
        match value.strip_prefix("file:") {
            Some(path) if !path.is_empty() => {
                Ok(PinSource::File(PathBuf::from(path)))
            }
            _ => Err(Error::MalformedUri(format!(
                "unsupported pin-source '{}', only 'file:' is supported",
                value
            ))),
        }
    }
}


//------------ SelectionCriteria ---------------------------------------------

/// The decoded content of a `pkcs11:` URI.
#[derive(Debug)]
pub struct SelectionCriteria {
    /// The object label (`object`).
    pub label: Option<Vec<u8>>,

    /// The object id (`id`).
    pub id: Option<Vec<u8>>,

    /// The object class (`type`).
    pub object_type: Option<ObjectClass>,

    pub slot_id: Option<SlotId>,
    pub token: Option<LabelField>,
    pub manufacturer: Option<LabelField>,
    pub model: Option<ModelField>,
    pub serial: Option<ModelField>,

    /// The path of the PKCS#11 module to load.
    pub module_path: PathBuf,

    /// A PIN given literally with `pin-value`.
    pub pin: Option<Secret>,

    pub pin_source: Option<PinSource>,
}

impl SelectionCriteria {
    /// Parses a URI.
    ///
    /// If the URI has no `module-path`, the path is taken from the
    /// `PKCS11_MODULE_PATH` environment variable.
    pub fn parse(uri: &str, context: ParseContext) -> Result<Self, Error> {
        Self::parse_with_fallback(uri, context, env_module_path())
    }

    /// Parses a URI with an explicit module path fallback.
    ///
    /// The fallback is used if the URI has no `module-path`. The
    /// environment is not consulted.
    pub fn parse_with_fallback(
        uri: &str,
        context: ParseContext,
        fallback: Option<PathBuf>,
    ) -> Result<Self, Error> {
        let draft = match uri.strip_prefix(PKCS11_SCHEME) {
            Some(path) => Draft::from_path(path)?,
            None => {
                trace!("PKCS#11: treating '{}' as a bare object id", uri);
                Draft {
                    id: Some(escape::decode(uri)?),
                    ..Default::default()
                }
            }
        };
        draft.finish(context, fallback)
    }

    /// Returns the object id if one was given and it is not empty.
    pub fn selector_id(&self) -> Option<&[u8]> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the object label if one was given and it is not empty.
    pub fn selector_label(&self) -> Option<&[u8]> {
        self.label.as_deref().filter(|label| !label.is_empty())
    }

    /// Returns whether the URI identifies objects by id or label.
    pub fn has_selector(&self) -> bool {
        self.selector_id().is_some() || self.selector_label().is_some()
    }

    /// Returns the object filter for a search.
    ///
    /// The class is taken from the `type` attribute.
    pub fn object_filter(&self) -> ObjectFilter {
        ObjectFilter {
            class: self.object_type,
            id: self.selector_id().map(Vec::from),
            label: self.selector_label().map(Vec::from),
        }
    }
}


//------------ Draft ---------------------------------------------------------

/// The attributes collected while scanning a URI.
#[derive(Default)]
struct Draft {
    label: Option<Vec<u8>>,
    id: Option<Vec<u8>>,
    object_type: Option<ObjectClass>,
    slot_id: Option<SlotId>,
    token: Option<LabelField>,
    manufacturer: Option<LabelField>,
    model: Option<ModelField>,
    serial: Option<ModelField>,
    module_path: Option<PathBuf>,
    pin: Option<Secret>,
    pin_source: Option<PinSource>,
}

impl Draft {
    fn from_path(path: &str) -> Result<Self, Error> {
        let mut draft = Draft::default();
        for segment in Segments::new(path) {
            match segment.attribute() {
                Some((attr, value)) => draft.apply(attr, value)?,
                None => {
                    trace!(
                        "PKCS#11: ignoring URI segment with key '{}'",
                        segment.key
                    );
                }
            }
        }
        Ok(draft)
    }

    fn apply(&mut self, attr: Attribute, value: &str) -> Result<(), Error> {
        match attr {
            Attribute::PinValue => set_once(&mut self.pin, attr, || {
                Ok(Secret::from(value))
            }),
            Attribute::PinSource => set_once(&mut self.pin_source, attr, || {
                PinSource::from_value(value)
            }),
            Attribute::Object => set_once(&mut self.label, attr, || {
                escape::decode(value)
            }),
            Attribute::Id => {
                set_once(&mut self.id, attr, || escape::decode(value))
            }
            Attribute::Model => {
                set_once(&mut self.model, attr, || padded(attr, value))
            }
            Attribute::Serial => {
                set_once(&mut self.serial, attr, || padded(attr, value))
            }
            Attribute::Token => {
                set_once(&mut self.token, attr, || padded(attr, value))
            }
            Attribute::Manufacturer => {
                set_once(&mut self.manufacturer, attr, || padded(attr, value))
            }
            Attribute::Type => set_once(&mut self.object_type, attr, || {
                ObjectClass::from_uri_type(value).ok_or_else(|| {
                    Error::MalformedUri(format!(
                        "unknown object type '{}'",
                        value
                    ))
                })
            }),
            Attribute::ModulePath => {
                set_once(&mut self.module_path, attr, || {
                    let path = escape::decode(value)?;
                    let path = String::from_utf8(path).map_err(|_| {
                        Error::malformed("module-path is not valid UTF-8")
                    })?;
                    Ok(PathBuf::from(path))
                })
            }
            Attribute::SlotId => set_once(&mut self.slot_id, attr, || {
                value.parse::<SlotId>().map_err(|_| {
                    Error::MalformedUri(format!("invalid slot-id '{}'", value))
                })
            }),
        }
    }

    fn finish(
        self,
        context: ParseContext,
        fallback: Option<PathBuf>,
    ) -> Result<SelectionCriteria, Error> {
        let empty = |value: &Option<Vec<u8>>| {
            value.as_ref().is_none_or(|value| value.is_empty())
        };
        if context == ParseContext::DirectKey
            && empty(&self.id)
            && empty(&self.label)
        {
            return Err(Error::MissingSelector);
        }

        let module_path = self
            .module_path
            .or(fallback)
            .ok_or(Error::MissingModulePath)?;

        Ok(SelectionCriteria {
            label: self.label,
            id: self.id,
            object_type: self.object_type,
            slot_id: self.slot_id,
            token: self.token,
            manufacturer: self.manufacturer,
            model: self.model,
            serial: self.serial,
            module_path,
            pin: self.pin,
            pin_source: self.pin_source,
        })
    }
}

/// Returns the module path from the environment, if set.
pub fn env_module_path() -> Option<PathBuf> {
    env::var_os(PKCS11_ENV_MODULE_PATH).map(PathBuf::from)
}

/// Sets `slot` to the result of `value` unless it already has a value.
fn set_once<T>(
    slot: &mut Option<T>,
    attr: Attribute,
    value: impl FnOnce() -> Result<T, Error>,
) -> Result<(), Error> {
    if slot.is_some() {
        trace!("PKCS#11: ignoring repeated URI attribute '{}'", attr);
        return Ok(());
    }
    *slot = Some(value()?);
    Ok(())
}

fn padded<const N: usize>(
    attr: Attribute,
    value: &str,
) -> Result<PaddedField<N>, Error> {
    let decoded = escape::decode(value)?;
    PaddedField::new(&decoded)
        .map_err(|err| Error::MalformedUri(format!("{}: {}", attr, err)))
}


//============ Tests =========================================================
