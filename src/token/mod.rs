//! Access to PKCS#11 token modules.
//!
//! The resolution logic in this crate never talks to a PKCS#11 library
//! directly. It goes through the three traits defined here instead: a
//! [`ModuleLoader`] turns a module path into an initialized
//! [`TokenModule`], the module lists its slots and opens sessions, and a
//! [`TokenSession`] logs in, searches for objects and reads them.
//!
//! Two implementations are provided. The [`cryptoki`] module loads real
//! PKCS#11 libraries and is available with the `hsm` feature. The
//! [`memory`] module keeps tokens in memory and is used for testing.

use std::{fmt, path::Path};

use openssl::{
    bn::BigNum,
    error::ErrorStack,
    pkey::{PKey, Public},
    rsa::Rsa,
    x509::X509,
};

use crate::{
    secret::Secret,
    uri::{LabelField, ModelField},
};

#[cfg(feature = "hsm")]
pub mod cryptoki;
pub mod memory;


/// The numeric identifier of a slot as reported by the module.
pub type SlotId = u64;


//------------ ModuleLoader --------------------------------------------------

/// Loads and initializes a PKCS#11 module.
pub trait ModuleLoader {
    type Module: TokenModule;

    /// Loads the module at `path` and initializes it.
    ///
    /// The module is finalized and unloaded when the returned value is
    /// dropped.
    fn load(&self, path: &Path) -> Result<Self::Module, ModuleError>;
}


//------------ TokenModule ---------------------------------------------------

/// An initialized PKCS#11 module.
pub trait TokenModule {
    type Session: TokenSession;

    /// Returns the slots that currently hold a token, in module order.
    fn slots(&self) -> Result<Vec<SlotDescriptor>, ModuleError>;

    /// Opens a read-only session on the given slot.
    fn open_session(&self, slot: SlotId) -> Result<Self::Session, ModuleError>;
}


//------------ TokenSession --------------------------------------------------

/// An open session with a token.
///
/// Dropping the value closes the session. Implementations must not expose
/// any other way of closing it so that a session is closed exactly once.
pub trait TokenSession {
    /// The type of an object handle within this session.
    type Handle: Copy + fmt::Debug;

    /// Logs in as the normal user.
    fn login(&mut self, pin: &Secret) -> Result<(), ModuleError>;

    /// Returns the handles of all objects matching the filter.
    fn find_objects(
        &mut self,
        filter: &ObjectFilter,
    ) -> Result<Vec<Self::Handle>, ModuleError>;

    /// Reads the class, id and label of an object.
    fn object_info(
        &mut self,
        handle: Self::Handle,
    ) -> Result<ObjectInfo<Self::Handle>, ModuleError>;

    /// Converts an object into a certificate or key.
    fn materialize(
        &mut self,
        object: &ObjectInfo<Self::Handle>,
    ) -> Result<Material, ModuleError>;
}


//------------ SlotDescriptor ------------------------------------------------

/// The identifying fields of the token present in a slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotDescriptor {
    pub id: SlotId,
    pub token: LabelField,
    pub manufacturer: LabelField,
    pub model: ModelField,
    pub serial: ModelField,
}


//------------ ObjectClass ---------------------------------------------------

/// The kinds of token objects this crate deals with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectClass {
    Certificate,
    PublicKey,
    PrivateKey,
}

impl ObjectClass {
    /// Returns the class for the value of a URI `type` attribute.
    pub fn from_uri_type(value: &str) -> Option<Self> {
        match value {
            "cert" => Some(ObjectClass::Certificate),
            "public" => Some(ObjectClass::PublicKey),
            "private" => Some(ObjectClass::PrivateKey),
            _ => None,
        }
    }

    /// Returns the value of the URI `type` attribute for this class.
    pub fn uri_type(self) -> &'static str {
        match self {
            ObjectClass::Certificate => "cert",
            ObjectClass::PublicKey => "public",
            ObjectClass::PrivateKey => "private",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectClass::Certificate => write!(f, "Certificate"),
            ObjectClass::PublicKey => write!(f, "Public key"),
            ObjectClass::PrivateKey => write!(f, "Private key"),
        }
    }
}


//------------ ObjectFilter --------------------------------------------------

/// The attributes an object search has to match.
///
/// Absent fields match any object.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectFilter {
    pub class: Option<ObjectClass>,
    pub id: Option<Vec<u8>>,
    pub label: Option<Vec<u8>>,
}

impl ObjectFilter {
    pub fn with_class(mut self, class: ObjectClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Returns whether an object with the given attributes matches.
    pub fn matches(
        &self,
        class: Option<ObjectClass>,
        id: &[u8],
        label: &[u8],
    ) -> bool {
        self.class.is_none_or(|wanted| class == Some(wanted))
            && self.id.as_deref().is_none_or(|wanted| wanted == id)
            && self.label.as_deref().is_none_or(|wanted| wanted == label)
    }
}

impl fmt::Display for ObjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.class {
            Some(class) => write!(f, "{}", class)?,
            None => write!(f, "any object")?,
        }
        if let Some(label) = self.label.as_ref() {
            write!(f, " \"{}\"", String::from_utf8_lossy(label))?;
        }
        if let Some(id) = self.id.as_ref() {
            write!(f, " with id {}", hex::encode(id))?;
        }
        Ok(())
    }
}


//------------ ObjectInfo ----------------------------------------------------

/// An object found on a token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectInfo<H> {
    pub handle: H,

    /// The class of the object or `None` for classes we don't handle.
    pub class: Option<ObjectClass>,

    pub id: Vec<u8>,
    pub label: Vec<u8>,
}


//------------ Material ------------------------------------------------------

/// A token object converted into something the host can use.
#[derive(Clone, Debug)]
pub enum Material {
    Certificate(X509),
    Key(TokenKey),
}


//------------ TokenKey ------------------------------------------------------

/// A public or private key living on a token.
///
/// Private key material never leaves the token. What is available here is
/// the information identifying the key plus its public half, if the token
/// reveals it.
#[derive(Clone, Debug)]
pub struct TokenKey {
    class: ObjectClass,
    id: Vec<u8>,
    label: Vec<u8>,
    material: KeyMaterial,
}

impl TokenKey {
    pub fn new(
        class: ObjectClass,
        id: Vec<u8>,
        label: Vec<u8>,
        material: KeyMaterial,
    ) -> Self {
        TokenKey {
            class,
            id,
            label,
            material,
        }
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn label(&self) -> &[u8] {
        &self.label
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Returns the public key if it can be used with OpenSSL.
    pub fn public_key(&self) -> Option<&PKey<Public>> {
        match &self.material {
            KeyMaterial::Rsa(key) => Some(key),
            _ => None,
        }
    }
}


//------------ KeyMaterial ---------------------------------------------------

/// The public part of a token key.
#[derive(Clone, Debug)]
pub enum KeyMaterial {
    /// An RSA key rebuilt from its modulus and public exponent.
    Rsa(PKey<Public>),

    /// An EC key as the DER encoded parameters and the encoded point.
    Ec { params: Vec<u8>, point: Vec<u8> },

    /// The token does not reveal public components for this key.
    Unavailable,
}

impl KeyMaterial {
    /// Creates RSA key material from big-endian modulus and exponent.
    pub fn rsa_from_parts(
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<Self, ErrorStack> {
        let rsa = Rsa::from_public_components(
            BigNum::from_slice(modulus)?,
            BigNum::from_slice(exponent)?,
        )?;
        Ok(KeyMaterial::Rsa(PKey::from_rsa(rsa)?))
    }

    pub fn key_type(&self) -> &'static str {
        match self {
            KeyMaterial::Rsa(_) => "RSA",
            KeyMaterial::Ec { .. } => "EC",
            KeyMaterial::Unavailable => "unknown",
        }
    }
}


//------------ ModuleError ---------------------------------------------------

/// An error reported by a token module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleError {
    message: String,
}

impl ModuleError {
    pub fn new(message: impl fmt::Display) -> Self {
        ModuleError {
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl std::error::Error for ModuleError {}

impl From<ErrorStack> for ModuleError {
    fn from(e: ErrorStack) -> Self {
        ModuleError::new(format!("OpenSsl Error: {}", e))
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openssl_failure_becomes_token_error() {
        let err: ModuleError = X509::from_der(b"not a certificate")
            .map(|_| ())
            .unwrap_err()
            .into();
        let err = crate::error::Error::token(err);
        assert!(matches!(err, crate::error::Error::Token(_)));
        assert!(err.to_string().starts_with("PKCS#11 error: OpenSsl Error:"));
    }

    #[test]
    fn filter_display_shows_no_secrets() {
        let filter = ObjectFilter {
            class: Some(ObjectClass::PrivateKey),
            id: Some(vec![0xde, 0xad]),
            label: Some(b"signing".to_vec()),
        };
        assert_eq!(filter.to_string(), "Private key \"signing\" with id dead");
        assert_eq!(ObjectFilter::default().to_string(), "any object");
    }

    #[test]
    fn filter_matches_only_present_fields() {
        let any = ObjectFilter::default();
        assert!(any.matches(None, b"", b""));
        assert!(any.matches(Some(ObjectClass::PrivateKey), b"\x01", b"k"));

        let filter = ObjectFilter {
            class: Some(ObjectClass::PrivateKey),
            id: Some(vec![1]),
            label: None,
        };
        assert!(filter.matches(Some(ObjectClass::PrivateKey), b"\x01", b"x"));
        assert!(!filter.matches(Some(ObjectClass::PublicKey), b"\x01", b"x"));
        assert!(!filter.matches(None, b"\x01", b"x"));
        assert!(!filter.matches(Some(ObjectClass::PrivateKey), b"\x02", b"x"));
    }

    #[test]
    fn uri_types() {
        for class in [
            ObjectClass::Certificate,
            ObjectClass::PublicKey,
            ObjectClass::PrivateKey,
        ] {
            assert_eq!(ObjectClass::from_uri_type(class.uri_type()), Some(class));
        }
        assert_eq!(ObjectClass::from_uri_type("secret-key"), None);
    }

    #[test]
    fn rsa_material_from_parts() {
        let rsa = Rsa::generate(1024).unwrap();
        let material = KeyMaterial::rsa_from_parts(
            &rsa.n().to_vec(),
            &rsa.e().to_vec(),
        )
        .unwrap();
        match material {
            KeyMaterial::Rsa(key) => {
                assert_eq!(key.rsa().unwrap().n().to_vec(), rsa.n().to_vec())
            }
            _ => panic!("expected RSA material"),
        }
    }
}
