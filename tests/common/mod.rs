#![allow(dead_code)] // Different tests use different parts.

use std::{cell::Cell, io};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    x509::{
        X509, X509Builder, X509Name, X509NameBuilder,
        extension::{ExtendedKeyUsage, KeyUsage},
    },
};
use p11store::{
    engine::Engine,
    secret::{PinPrompt, Secret},
    token::{
        KeyMaterial,
        memory::{MemoryLoader, MemoryObject, MemoryToken},
    },
};

pub const MODULE: &str = "/usr/lib/pkcs11/memory.so";
pub const PIN: &str = "1234";


//------------ Certificates --------------------------------------------------

/// The intended use of a test certificate.
#[derive(Clone, Copy, Debug)]
pub enum Usage {
    /// No key usage extensions at all.
    Any,

    /// Extended key usage with client auth.
    Client,

    /// Extended key usage with server auth only.
    Server,

    /// Key usage restricted to certificate signing.
    CertSign,
}

pub fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    builder.build()
}

pub fn cert(subject: &str, issuer: &str, usage: Usage) -> X509 {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name(subject)).unwrap();
    builder.set_issuer_name(&name(issuer)).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    match usage {
        Usage::Any => {}
        Usage::Client => builder
            .append_extension(
                ExtendedKeyUsage::new().client_auth().build().unwrap(),
            )
            .unwrap(),
        Usage::Server => builder
            .append_extension(
                ExtendedKeyUsage::new().server_auth().build().unwrap(),
            )
            .unwrap(),
        Usage::CertSign => builder
            .append_extension(
                KeyUsage::new().critical().key_cert_sign().build().unwrap(),
            )
            .unwrap(),
    }
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build()
}


//------------ Tokens --------------------------------------------------------

/// Adds a certificate and matching key pair to a token.
pub fn with_identity(
    token: MemoryToken,
    id: &[u8],
    label: &str,
    cert: X509,
) -> MemoryToken {
    token
        .with_object(MemoryObject::certificate(id, label, cert))
        .with_object(MemoryObject::public_key(
            id,
            label,
            KeyMaterial::Unavailable,
        ))
        .with_object(MemoryObject::private_key(
            id,
            label,
            KeyMaterial::Unavailable,
        ))
}

/// Creates an engine for the loader with the module path set.
pub fn engine(loader: MemoryLoader) -> Engine<MemoryLoader> {
    let engine = Engine::new(loader);
    engine.set_module_path(MODULE);
    engine
}


//------------ TestPrompt ----------------------------------------------------

/// A prompt answering with a fixed PIN that counts how often it was asked.
pub struct TestPrompt {
    answer: Option<&'static str>,
    calls: Cell<usize>,
}

impl TestPrompt {
    pub fn answering(pin: &'static str) -> Self {
        TestPrompt {
            answer: Some(pin),
            calls: Cell::new(0),
        }
    }

    pub fn cancelling() -> Self {
        TestPrompt {
            answer: None,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl PinPrompt for TestPrompt {
    fn prompt_pin(&self, _prompt: &str) -> Result<Option<Secret>, io::Error> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.answer.map(Secret::from))
    }
}
