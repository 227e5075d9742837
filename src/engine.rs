//! The engine resolving `pkcs11:` URIs.
//!
//! An [`Engine`] is the context through which a host loads keys and
//! certificates from PKCS#11 tokens. It holds the configuration that is
//! applied before a URI is looked at, i.e., a module path to use when the
//! URI doesn't name one and a PIN to use when the URI doesn't provide one.
//! These are set through the named controls in [`CONTROLS`] or from a
//! [`Config`].
//!
//! Every operation loads the module, finds the slot, opens a session and
//! releases all of it again before returning. Operations on the same
//! engine are serialized through a single lock. An open [`Store`] holds
//! that lock until it is closed.

use std::{
    fmt,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::{debug, info};
use openssl::x509::{X509, X509Name};
use secrecy::ExposeSecret;

use crate::{
    certs::{issuer_matches, permits_client_auth},
    config::Config,
    constants::{ENGINE_ID, ENGINE_NAME, PKCS11_SCHEME},
    error::Error,
    locator::{load_module, locate_slot},
    search::{ObjectSearch, SearchMode},
    secret::{PinPrompt, Secret, SecretRequirement, resolve_secret},
    session::open_session,
    store::Store,
    token::{
        Material, ModuleLoader, ObjectClass, ObjectFilter, TokenKey,
        TokenSession,
    },
    uri::{ParseContext, SelectionCriteria, env_module_path},
};

#[cfg(feature = "hsm")]
use crate::token::cryptoki::CryptokiLoader;


//------------ Engine --------------------------------------------------------

/// An engine using real PKCS#11 modules.
#[cfg(feature = "hsm")]
pub type Pkcs11Engine = Engine<CryptokiLoader>;

/// The context for resolving `pkcs11:` URIs.
pub struct Engine<L> {
    loader: L,
    state: Mutex<EngineState>,
}

/// The settings of an engine applied before parsing a URI.
#[derive(Debug, Default)]
pub struct EngineState {
    module_path: Option<PathBuf>,
    pin: Option<Secret>,
}

impl EngineState {
    /// Returns the module path to use if the URI has none.
    fn module_fallback(&self) -> Option<PathBuf> {
        self.module_path.clone().or_else(env_module_path)
    }

    fn parse(
        &self,
        uri: &str,
        context: ParseContext,
    ) -> Result<SelectionCriteria, Error> {
        SelectionCriteria::parse_with_fallback(
            uri,
            context,
            self.module_fallback(),
        )
    }
}

impl<L: ModuleLoader> Engine<L> {
    pub fn new(loader: L) -> Self {
        Engine {
            loader,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Creates an engine with the module path and PIN from the config.
    pub fn from_config(loader: L, config: &Config) -> Self {
        let engine = Self::new(loader);
        if let Some(path) = config.module_path.as_ref() {
            engine.set_module_path(path.clone());
        }
        if let Some(pin) = config.pin.as_ref() {
            engine.set_pin(Secret::from(pin.expose_secret().as_str()));
        }
        engine
    }

    pub fn id(&self) -> &'static str {
        ENGINE_ID
    }

    pub fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    /// Returns whether the engine handles the given identifier.
    pub fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(PKCS11_SCHEME)
    }

    pub fn set_module_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!("PKCS#11: module path set to '{}'", path.display());
        self.lock().module_path = Some(path);
    }

    pub fn set_pin(&self, pin: Secret) {
        debug!("PKCS#11: PIN set");
        self.lock().pin = Some(pin);
    }

    /// Applies a control.
    ///
    /// Returns the certificate loaded by a [`Control::LoadCertificate`].
    pub fn control(&self, control: Control) -> Result<Option<X509>, Error> {
        match control {
            Control::ModulePath(path) => {
                self.set_module_path(path);
                Ok(None)
            }
            Control::Pin(pin) => {
                self.set_pin(pin);
                Ok(None)
            }
            Control::LoadCertificate(uri) => {
                self.load_certificate(&uri).map(Some)
            }
        }
    }

    /// Loads the private key identified by `uri`.
    ///
    /// The URI must identify the key through its id or label. Login is
    /// required, so the user is prompted if no PIN is available otherwise.
    pub fn load_private_key(
        &self,
        uri: &str,
        prompt: &dyn PinPrompt,
    ) -> Result<TokenKey, Error> {
        self.load_key(
            uri,
            ObjectClass::PrivateKey,
            SecretRequirement::Required,
            prompt,
        )
    }

    /// Loads the public key identified by `uri`.
    ///
    /// The session is only logged in if a PIN is available without
    /// prompting.
    pub fn load_public_key(
        &self,
        uri: &str,
        prompt: &dyn PinPrompt,
    ) -> Result<TokenKey, Error> {
        self.load_key(
            uri,
            ObjectClass::PublicKey,
            SecretRequirement::IfAvailable,
            prompt,
        )
    }

    fn load_key(
        &self,
        uri: &str,
        class: ObjectClass,
        requirement: SecretRequirement,
        prompt: &dyn PinPrompt,
    ) -> Result<TokenKey, Error> {
        let state = self.lock();
        let mut criteria = state.parse(uri, ParseContext::DirectKey)?;
        criteria.object_type = Some(class);
        let filter = criteria.object_filter();
        debug!("PKCS#11: loading {}", filter);

        let pin =
            resolve_secret(&criteria, state.pin.as_ref(), requirement, prompt)?;
        let module = load_module(&self.loader, &criteria.module_path)?;
        let slot = locate_slot(&module, &criteria)?;
        let mut session = open_session(&module, slot, pin.as_ref())?;

        let mut search =
            ObjectSearch::start(&mut session, &filter, SearchMode::Lookup)?;
        let Some((object, _)) = search.next_object(&mut session)? else {
            debug!("PKCS#11: no match for {}", filter);
            return Err(Error::NoSuchKey);
        };
        match session.materialize(&object).map_err(Error::token)? {
            Material::Key(key) => {
                info!(
                    "PKCS#11: loaded {} {} with id {}",
                    key.material().key_type(),
                    class,
                    hex::encode(key.id())
                );
                Ok(key)
            }
            Material::Certificate(_) => Err(Error::Token(format!(
                "object {:?} is not a key",
                object.handle
            ))),
        }
    }

    /// Loads the first certificate matching `uri`.
    ///
    /// The URI needn't identify the certificate. Without `id` or `object`
    /// the first certificate of the token is returned. No login happens.
    pub fn load_certificate(&self, uri: &str) -> Result<X509, Error> {
        let state = self.lock();
        let mut criteria = state.parse(uri, ParseContext::Listing)?;
        criteria.object_type = Some(ObjectClass::Certificate);
        let filter = criteria.object_filter();
        debug!("PKCS#11: loading {}", filter);

        let module = load_module(&self.loader, &criteria.module_path)?;
        let slot = locate_slot(&module, &criteria)?;
        let mut session = open_session(&module, slot, None)?;

        let mut search =
            ObjectSearch::start(&mut session, &filter, SearchMode::Lookup)?;
        match search.next_cert(&mut session)? {
            Some(found) => Ok(found.cert),
            None => Err(Error::NoSuchKey),
        }
    }

    /// Selects a certificate and key for TLS client authentication.
    ///
    /// The certificates of the first token are tried in order. The first
    /// one issued by one of `issuers` and usable for client authentication
    /// is returned together with the private key of the same id. An empty
    /// list of issuers accepts any issuer.
    pub fn select_client_certificate(
        &self,
        issuers: &[X509Name],
        prompt: &dyn PinPrompt,
    ) -> Result<(X509, TokenKey), Error> {
        let state = self.lock();
        let criteria = state.parse(PKCS11_SCHEME, ParseContext::Listing)?;
        debug!(
            "PKCS#11: selecting client certificate for {} issuer(s)",
            issuers.len()
        );

        let pin = resolve_secret(
            &criteria,
            state.pin.as_ref(),
            SecretRequirement::Required,
            prompt,
        )?;
        let module = load_module(&self.loader, &criteria.module_path)?;
        let slot = locate_slot(&module, &criteria)?;
        let mut session = open_session(&module, slot, pin.as_ref())?;

        let filter = criteria.object_filter().with_class(ObjectClass::Certificate);
        let mut certs =
            ObjectSearch::start(&mut session, &filter, SearchMode::Lookup)?;
        let found = loop {
            let Some(found) = certs.next_cert(&mut session)? else {
                debug!("PKCS#11: no suitable client certificate");
                return Err(Error::NoSuitableCertificate);
            };
            if !issuer_matches(issuers, &found.cert) {
                debug!("PKCS#11: skipping certificate of other issuer");
            } else if !permits_client_auth(&found.cert) {
                debug!("PKCS#11: skipping certificate not for client auth");
            } else {
                break found;
            }
        };

        // An empty id selects keys with an empty id, not any key.
        let filter = ObjectFilter {
            class: Some(ObjectClass::PrivateKey),
            id: Some(found.id.clone()),
            label: None,
        };
        let mut keys =
            ObjectSearch::start(&mut session, &filter, SearchMode::Lookup)?;
        let Some((object, _)) = keys.next_object(&mut session)? else {
            debug!(
                "PKCS#11: no private key with id {}",
                hex::encode(&found.id)
            );
            return Err(Error::NoSuchKey);
        };
        match session.materialize(&object).map_err(Error::token)? {
            Material::Key(key) => {
                info!(
                    "PKCS#11: selected client certificate with id {}",
                    hex::encode(&found.id)
                );
                Ok((found.cert, key))
            }
            Material::Certificate(_) => Err(Error::Token(format!(
                "object {:?} is not a key",
                object.handle
            ))),
        }
    }

    /// Opens a store listing the objects matching `uri`.
    ///
    /// If the URI has neither `id` nor `object`, the store produces the
    /// names of the objects. Otherwise it produces the objects themselves.
    /// A PIN is only asked for when listing private keys. For listings
    /// without a `type`, login happens if a PIN is available without
    /// prompting.
    ///
    /// The store holds the engine's lock until it is closed or dropped.
    /// Other threads using the engine wait for that. Calling any other
    /// method of the engine on the thread owning the store before
    /// closing it never returns.
    pub fn open_store(
        &self,
        uri: &str,
        prompt: &dyn PinPrompt,
    ) -> Result<Store<'_, L::Module>, Error> {
        let state = self.lock();
        let criteria = state.parse(uri, ParseContext::Listing)?;
        let requirement = match criteria.object_type {
            Some(ObjectClass::PrivateKey) => SecretRequirement::Required,
            Some(_) => SecretRequirement::NotNeeded,
            None => SecretRequirement::IfAvailable,
        };
        let filter = criteria.object_filter();
        debug!("PKCS#11: opening store for {}", filter);

        let pin =
            resolve_secret(&criteria, state.pin.as_ref(), requirement, prompt)?;
        let module = load_module(&self.loader, &criteria.module_path)?;
        let slot = locate_slot(&module, &criteria)?;
        let mut session = open_session(&module, slot, pin.as_ref())?;
        let search = ObjectSearch::start(
            &mut session,
            &filter,
            SearchMode::for_listing(&criteria),
        )?;
        Ok(Store::new(state, module, session, search))
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L> fmt::Debug for Engine<L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Engine").field("id", &ENGINE_ID).finish()
    }
}


//------------ Control -------------------------------------------------------

/// A named setting of the engine.
#[derive(Debug)]
pub enum Control {
    /// Sets the module path used when a URI has none.
    ModulePath(PathBuf),

    /// Sets the PIN used when a URI provides none.
    Pin(Secret),

    /// Loads a certificate by URI.
    LoadCertificate(String),
}

impl Control {
    /// Creates a control from its name and string value.
    ///
    /// Returns `None` if there is no control by that name.
    pub fn from_name(name: &str, value: &str) -> Option<Self> {
        match name {
            "MODULE_PATH" => Some(Control::ModulePath(value.into())),
            "PIN" => Some(Control::Pin(Secret::from(value))),
            "LOAD_CERT_CTRL" => Some(Control::LoadCertificate(value.into())),
            _ => None,
        }
    }
}

/// The kind of input a control takes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlInput {
    String,
}

/// The description of a control.
#[derive(Clone, Copy, Debug)]
pub struct ControlInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub input: ControlInput,
}

/// All controls supported by the engine.
pub const CONTROLS: &[ControlInfo] = &[
    ControlInfo {
        name: "MODULE_PATH",
        description: "Specifies the path to the PKCS#11 module shared library",
        input: ControlInput::String,
    },
    ControlInfo {
        name: "PIN",
        description: "Specifies the PIN to log in to the token",
        input: ControlInput::String,
    },
    ControlInfo {
        name: "LOAD_CERT_CTRL",
        description: "Get the certificate from the card",
        input: ControlInput::String,
    },
];


//============ Tests =========================================================
