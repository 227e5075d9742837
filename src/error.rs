//! The error type for resolving objects.

use std::fmt;

use crate::token::ModuleError;


//------------ Error ---------------------------------------------------------

/// Everything that can go wrong while resolving a `pkcs11:` URI.
///
/// Variants carrying a string hold a trace message describing the
/// underlying cause. None of them ever contain secret material.
#[derive(Debug)]
pub enum Error {
    /// The URI could not be parsed.
    MalformedUri(String),

    /// A key was requested but the URI has neither `id` nor `object`.
    MissingSelector,

    /// No module path in the URI, the engine or the environment.
    MissingModulePath,

    /// A PIN was needed but could not be obtained.
    SecretUnavailable(String),

    /// The PKCS#11 module could not be loaded or initialized.
    ModuleInitFailed(String),

    /// No slot holds a token matching the URI.
    NoMatchingSlot,

    /// A session could not be opened on the selected slot.
    SessionOpenFailed(String),

    /// Logging in to the token was refused.
    AuthenticationFailed(String),

    /// The search did not find a matching object.
    NoSuchKey,

    /// No certificate on the token is usable for client authentication.
    NoSuitableCertificate,

    /// The token module failed while searching or reading an object.
    ///
    /// This includes token data that cannot be converted into a
    /// certificate or key.
    Token(String),
}

impl Error {
    pub fn malformed(msg: impl fmt::Display) -> Self {
        Error::MalformedUri(msg.to_string())
    }

    pub fn token(err: ModuleError) -> Self {
        Error::Token(err.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedUri(e) => write!(f, "Malformed PKCS#11 URI: {}", e),
            Error::MissingSelector => {
                write!(f, "PKCS#11 URI identifies neither an id nor an object")
            }
            Error::MissingModulePath => {
                write!(f, "No PKCS#11 module path configured")
            }
            Error::SecretUnavailable(e) => write!(f, "PIN unavailable: {}", e),
            Error::ModuleInitFailed(e) => {
                write!(f, "Cannot initialize PKCS#11 module: {}", e)
            }
            Error::NoMatchingSlot => {
                write!(f, "No PKCS#11 slot matches the requested token")
            }
            Error::SessionOpenFailed(e) => {
                write!(f, "Cannot open PKCS#11 session: {}", e)
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "PKCS#11 login failed: {}", e)
            }
            Error::NoSuchKey => write!(f, "Could not find object on token"),
            Error::NoSuitableCertificate => {
                write!(f, "No certificate suitable for client authentication")
            }
            Error::Token(e) => write!(f, "PKCS#11 error: {}", e),
        }
    }
}

impl std::error::Error for Error {}


//============ Tests =========================================================
