//! A token module keeping its tokens in memory.
//!
//! This is used for testing the resolution logic without a PKCS#11
//! library. The module counts loads, sessions and logins so tests can
//! check that every session is closed exactly once.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use openssl::x509::X509;

use crate::{
    secret::Secret,
    token::{
        KeyMaterial, Material, ModuleError, ModuleLoader, ObjectClass,
        ObjectFilter, ObjectInfo, SlotDescriptor, SlotId, TokenKey,
        TokenModule, TokenSession,
    },
};


//------------ MemoryLoader --------------------------------------------------

/// Provides a memory module when asked for a particular module path.
#[derive(Clone, Debug)]
pub struct MemoryLoader {
    path: PathBuf,
    tokens: Arc<Vec<MemoryToken>>,
    stats: Arc<MemoryStats>,
}

impl MemoryLoader {
    /// Creates a loader for a module at `path` without any tokens.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MemoryLoader {
            path: path.into(),
            tokens: Arc::new(Vec::new()),
            stats: Arc::new(MemoryStats::default()),
        }
    }

    /// Adds a token.
    ///
    /// Tokens are reported in the order they were added.
    pub fn with_token(mut self, token: MemoryToken) -> Self {
        Arc::make_mut(&mut self.tokens).push(token);
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }
}

impl ModuleLoader for MemoryLoader {
    type Module = MemoryModule;

    fn load(&self, path: &Path) -> Result<MemoryModule, ModuleError> {
        if path != self.path {
            return Err(ModuleError::new(format!(
                "cannot load module '{}'",
                path.display()
            )));
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryModule {
            tokens: self.tokens.clone(),
            stats: self.stats.clone(),
        })
    }
}


//------------ MemoryStats ---------------------------------------------------

/// Counters for the calls made to a memory module.
#[derive(Debug, Default)]
pub struct MemoryStats {
    loads: AtomicUsize,
    finalizes: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    logins: AtomicUsize,
    failed_logins: AtomicUsize,
}

impl MemoryStats {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn finalizes(&self) -> usize {
        self.finalizes.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    /// Returns the number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.sessions_opened() - self.sessions_closed()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn failed_logins(&self) -> usize {
        self.failed_logins.load(Ordering::SeqCst)
    }
}


//------------ MemoryToken ---------------------------------------------------

/// A token in a slot of a memory module.
#[derive(Clone, Debug)]
pub struct MemoryToken {
    slot: SlotId,
    label: String,
    manufacturer: String,
    model: String,
    serial: String,
    user_pin: Option<String>,
    objects: Vec<MemoryObject>,
}

impl MemoryToken {
    pub fn new(slot: SlotId, label: &str) -> Self {
        MemoryToken {
            slot,
            label: label.to_string(),
            manufacturer: "NLnet Labs".to_string(),
            model: "Memory Token".to_string(),
            serial: format!("{:016}", slot),
            user_pin: None,
            objects: Vec::new(),
        }
    }

    pub fn manufacturer(mut self, manufacturer: &str) -> Self {
        self.manufacturer = manufacturer.to_string();
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    /// Requires this PIN for logging in.
    ///
    /// Without a user PIN any login succeeds.
    pub fn user_pin(mut self, pin: &str) -> Self {
        self.user_pin = Some(pin.to_string());
        self
    }

    pub fn with_object(mut self, object: MemoryObject) -> Self {
        self.objects.push(object);
        self
    }

    fn descriptor(&self) -> Result<SlotDescriptor, ModuleError> {
        let field_error = |err| {
            ModuleError::new(format!("token in slot {}: {}", self.slot, err))
        };
        Ok(SlotDescriptor {
            id: self.slot,
            token: self.label.as_str().try_into().map_err(field_error)?,
            manufacturer: self
                .manufacturer
                .as_str()
                .try_into()
                .map_err(field_error)?,
            model: self.model.as_str().try_into().map_err(field_error)?,
            serial: self.serial.as_str().try_into().map_err(field_error)?,
        })
    }
}


//------------ MemoryObject --------------------------------------------------

/// An object stored on a memory token.
#[derive(Clone, Debug)]
pub struct MemoryObject {
    class: Option<ObjectClass>,
    id: Vec<u8>,
    label: Vec<u8>,
    private: bool,
    content: Option<Material>,
}

impl MemoryObject {
    pub fn certificate(id: &[u8], label: &str, cert: X509) -> Self {
        MemoryObject {
            class: Some(ObjectClass::Certificate),
            id: id.to_vec(),
            label: label.as_bytes().to_vec(),
            private: false,
            content: Some(Material::Certificate(cert)),
        }
    }

    pub fn public_key(id: &[u8], label: &str, material: KeyMaterial) -> Self {
        Self::key(ObjectClass::PublicKey, id, label, material, false)
    }

    /// Creates a private key, which is only visible after login.
    pub fn private_key(id: &[u8], label: &str, material: KeyMaterial) -> Self {
        Self::key(ObjectClass::PrivateKey, id, label, material, true)
    }

    /// Creates an object of a class not handled by this crate.
    pub fn data(id: &[u8], label: &str) -> Self {
        MemoryObject {
            class: None,
            id: id.to_vec(),
            label: label.as_bytes().to_vec(),
            private: false,
            content: None,
        }
    }

    /// Removes the content so that reading the object fails.
    pub fn unreadable(mut self) -> Self {
        self.content = None;
        self
    }

    /// Changes whether the object requires login to be seen.
    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    fn key(
        class: ObjectClass,
        id: &[u8],
        label: &str,
        material: KeyMaterial,
        private: bool,
    ) -> Self {
        let key = TokenKey::new(
            class,
            id.to_vec(),
            label.as_bytes().to_vec(),
            material,
        );
        MemoryObject {
            class: Some(class),
            id: id.to_vec(),
            label: label.as_bytes().to_vec(),
            private,
            content: Some(Material::Key(key)),
        }
    }
}


//------------ MemoryModule --------------------------------------------------

#[derive(Debug)]
pub struct MemoryModule {
    tokens: Arc<Vec<MemoryToken>>,
    stats: Arc<MemoryStats>,
}

impl TokenModule for MemoryModule {
    type Session = MemorySession;

    fn slots(&self) -> Result<Vec<SlotDescriptor>, ModuleError> {
        self.tokens.iter().map(MemoryToken::descriptor).collect()
    }

    fn open_session(&self, slot: SlotId) -> Result<MemorySession, ModuleError> {
        let token = self
            .tokens
            .iter()
            .position(|token| token.slot == slot)
            .ok_or_else(|| ModuleError::new("CKR_SLOT_ID_INVALID"))?;
        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            tokens: self.tokens.clone(),
            stats: self.stats.clone(),
            token,
            logged_in: false,
        })
    }
}

impl Drop for MemoryModule {
    fn drop(&mut self) {
        self.stats.finalizes.fetch_add(1, Ordering::SeqCst);
    }
}


//------------ MemorySession -------------------------------------------------

#[derive(Debug)]
pub struct MemorySession {
    tokens: Arc<Vec<MemoryToken>>,
    stats: Arc<MemoryStats>,
    token: usize,
    logged_in: bool,
}

impl MemorySession {
    fn token(&self) -> &MemoryToken {
        &self.tokens[self.token]
    }

    fn object(&self, handle: usize) -> Result<&MemoryObject, ModuleError> {
        self.token()
            .objects
            .get(handle)
            .filter(|object| self.logged_in || !object.private)
            .ok_or_else(|| ModuleError::new("CKR_OBJECT_HANDLE_INVALID"))
    }
}

impl TokenSession for MemorySession {
    type Handle = usize;

    fn login(&mut self, pin: &Secret) -> Result<(), ModuleError> {
        let accepted = match self.token().user_pin.as_ref() {
            Some(user_pin) => user_pin.as_bytes() == pin.expose(),
            None => true,
        };
        if !accepted {
            self.stats.failed_logins.fetch_add(1, Ordering::SeqCst);
            return Err(ModuleError::new("CKR_PIN_INCORRECT"));
        }
        self.stats.logins.fetch_add(1, Ordering::SeqCst);
        self.logged_in = true;
        Ok(())
    }

    fn find_objects(
        &mut self,
        filter: &ObjectFilter,
    ) -> Result<Vec<usize>, ModuleError> {
        Ok(self
            .token()
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| self.logged_in || !object.private)
            .filter(|(_, object)| {
                filter.matches(object.class, &object.id, &object.label)
            })
            .map(|(handle, _)| handle)
            .collect())
    }

    fn object_info(
        &mut self,
        handle: usize,
    ) -> Result<ObjectInfo<usize>, ModuleError> {
        let object = self.object(handle)?;
        Ok(ObjectInfo {
            handle,
            class: object.class,
            id: object.id.clone(),
            label: object.label.clone(),
        })
    }

    fn materialize(
        &mut self,
        object: &ObjectInfo<usize>,
    ) -> Result<Material, ModuleError> {
        self.object(object.handle)?
            .content
            .clone()
            .ok_or_else(|| ModuleError::new("CKR_ATTRIBUTE_SENSITIVE"))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.stats.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> MemoryLoader {
        MemoryLoader::new("/mem.so").with_token(
            MemoryToken::new(3, "token")
                .user_pin("1234")
                .with_object(MemoryObject::public_key(
                    b"\x01",
                    "key",
                    KeyMaterial::Unavailable,
                ))
                .with_object(MemoryObject::private_key(
                    b"\x01",
                    "key",
                    KeyMaterial::Unavailable,
                )),
        )
    }

    #[test]
    fn load_requires_matching_path() {
        let loader = loader();
        assert!(loader.load(Path::new("/other.so")).is_err());
        assert_eq!(loader.stats().loads(), 0);

        let module = loader.load(Path::new("/mem.so")).unwrap();
        assert_eq!(loader.stats().loads(), 1);
        drop(module);
        assert_eq!(loader.stats().finalizes(), 1);
    }

    #[test]
    fn private_objects_need_login() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        let mut session = module.open_session(3).unwrap();

        let all = ObjectFilter::default();
        assert_eq!(session.find_objects(&all).unwrap(), vec![0]);
        assert!(session.object_info(1).is_err());

        assert!(session.login(&Secret::from("0000")).is_err());
        session.login(&Secret::from("1234")).unwrap();
        assert_eq!(session.find_objects(&all).unwrap(), vec![0, 1]);

        drop(session);
        assert_eq!(loader.stats().sessions_opened(), 1);
        assert_eq!(loader.stats().sessions_closed(), 1);
        assert_eq!(loader.stats().failed_logins(), 1);
        assert_eq!(loader.stats().logins(), 1);
    }

    #[test]
    fn unknown_slot() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        assert!(module.open_session(4).is_err());
        assert_eq!(loader.stats().sessions_opened(), 0);
    }
}
