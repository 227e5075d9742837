//! Resolving `pkcs11:` URIs to certificates and keys on PKCS#11 tokens.
//!
//! The entry point is the [`Engine`][engine::Engine]. It parses a URI,
//! obtains a PIN if one is needed, finds the token, opens a session and
//! searches for the object the URI names. Keys, certificates and
//! certificates suitable for TLS client authentication can be loaded this
//! way, and the objects of a token can be listed through a
//! [`Store`][store::Store].

pub mod certs;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ext_serde;
pub mod locator;
pub mod search;
pub mod secret;
pub mod session;
pub mod store;
pub mod token;
pub mod uri;

#[cfg(test)]
pub mod test;
