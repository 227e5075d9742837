//! Listing the objects of a token.
//!
//! A [`Store`] is what the engine hands out for a URI that names a token
//! rather than a single object. It walks the objects of the token one
//! [`load`][Store::load] at a time, either producing their names or the
//! objects themselves. See [`Engine::open_store`] for how a store is
//! opened.
//!
//! [`Engine::open_store`]: crate::engine::Engine::open_store

use std::{fmt, sync::MutexGuard};

use log::{debug, trace};
use openssl::x509::X509;

use crate::{
    engine::EngineState,
    error::Error,
    search::{ObjectSearch, SearchMode},
    token::{Material, ObjectClass, TokenKey, TokenModule, TokenSession},
};


//------------ StoreInfo -----------------------------------------------------

/// An item produced by a store.
#[derive(Clone, Debug)]
pub enum StoreInfo {
    /// The name and description of an object.
    ///
    /// The name is a `pkcs11:` URI that can be used to load the object.
    Name { name: String, description: String },

    Certificate(X509),
    PublicKey(TokenKey),
    PrivateKey(TokenKey),
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreInfo::Name { name, description } => {
                write!(f, "{}: {}", name, description)
            }
            StoreInfo::Certificate(cert) => {
                write!(f, "Certificate ")?;
                match cert.subject_name().entries().next() {
                    Some(entry) => match entry.data().to_string() {
                        Ok(value) => write!(f, "\"{}\"", value),
                        Err(_) => write!(f, "<unprintable subject>"),
                    },
                    None => write!(f, "<empty subject>"),
                }
            }
            StoreInfo::PublicKey(key) | StoreInfo::PrivateKey(key) => write!(
                f,
                "{} {} \"{}\" with id {}",
                key.material().key_type(),
                key.class(),
                String::from_utf8_lossy(key.label()),
                hex::encode(key.id())
            ),
        }
    }
}


//------------ Store ---------------------------------------------------------

/// An open listing of a token's objects.
///
/// The store keeps its session open and the engine locked until it is
/// closed or dropped.
pub struct Store<'e, M: TokenModule> {
    // Fields are dropped in order: the search before the session before
    // the module before the engine lock is released.
    search: ObjectSearch<<M::Session as TokenSession>::Handle>,
    session: M::Session,
    _module: M,
    _engine: MutexGuard<'e, EngineState>,

    /// Whether the last call to `load` failed.
    failed: bool,
}

impl<'e, M: TokenModule> Store<'e, M> {
    pub(crate) fn new(
        engine: MutexGuard<'e, EngineState>,
        module: M,
        session: M::Session,
        search: ObjectSearch<<M::Session as TokenSession>::Handle>,
    ) -> Self {
        Store {
            search,
            session,
            _module: module,
            _engine: engine,
            failed: false,
        }
    }

    pub fn mode(&self) -> SearchMode {
        self.search.mode()
    }

    /// Returns the next item or `None` if the store is exhausted.
    pub fn load(&mut self) -> Result<Option<StoreInfo>, Error> {
        let res = self.next_info();
        self.failed = res.is_err();
        res
    }

    /// Returns whether all items have been loaded.
    pub fn eof(&self) -> bool {
        self.search.is_exhausted()
    }

    /// Returns whether the last call to `load` failed.
    pub fn error(&self) -> bool {
        self.failed
    }

    /// Closes the store and its session.
    pub fn close(self) {
        debug!("PKCS#11: closing store");
    }

    fn next_info(&mut self) -> Result<Option<StoreInfo>, Error> {
        if self.search.mode() == SearchMode::Names {
            return Ok(self.search.next_name(&mut self.session)?.map(|entry| {
                StoreInfo::Name {
                    name: entry.name,
                    description: entry.description,
                }
            }));
        }

        let Some((object, class)) =
            self.search.next_object(&mut self.session)?
        else {
            return Ok(None);
        };
        trace!("PKCS#11: loading {} {:?}", class, object.handle);
        let material =
            self.session.materialize(&object).map_err(Error::token)?;
        match (class, material) {
            (ObjectClass::Certificate, Material::Certificate(cert)) => {
                Ok(Some(StoreInfo::Certificate(cert)))
            }
            (ObjectClass::PublicKey, Material::Key(key)) => {
                Ok(Some(StoreInfo::PublicKey(key)))
            }
            (ObjectClass::PrivateKey, Material::Key(key)) => {
                Ok(Some(StoreInfo::PrivateKey(key)))
            }
            (class, _) => Err(Error::Token(format!(
                "object {:?} does not hold a {}",
                object.handle, class
            ))),
        }
    }
}

impl<M: TokenModule> Iterator for Store<'_, M> {
    type Item = Result<StoreInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.load().transpose()
    }
}

impl<M: TokenModule> fmt::Debug for Store<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Store")
            .field("mode", &self.search.mode())
            .field("eof", &self.eof())
            .field("failed", &self.failed)
            .finish()
    }
}


//============ Tests =========================================================
