//! Token modules loaded from PKCS#11 libraries.

use std::path::Path;

use cryptoki::{
    context::{CInitializeArgs, Pkcs11},
    object::{
        Attribute, AttributeType, KeyType, ObjectClass as CkObjectClass,
        ObjectHandle,
    },
    session::{Session, UserType},
    slot::Slot,
    types::AuthPin,
};
use log::{debug, trace};
use openssl::x509::X509;

use crate::{
    secret::Secret,
    token::{
        KeyMaterial, Material, ModuleError, ModuleLoader, ObjectClass,
        ObjectFilter, ObjectInfo, SlotDescriptor, SlotId, TokenKey,
        TokenModule, TokenSession,
    },
    uri::PaddedField,
};


//------------ CryptokiLoader ------------------------------------------------

/// Loads PKCS#11 libraries through `cryptoki`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryptokiLoader;

impl ModuleLoader for CryptokiLoader {
    type Module = CryptokiModule;

    fn load(&self, path: &Path) -> Result<CryptokiModule, ModuleError> {
        let pkcs11 = Pkcs11::new(path).map_err(ModuleError::new)?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(ModuleError::new)?;
        debug!("PKCS#11: initialized '{}'", path.display());
        Ok(CryptokiModule { pkcs11 })
    }
}


//------------ CryptokiModule ------------------------------------------------

/// An initialized PKCS#11 library.
///
/// The library is finalized when the last of the module and its sessions
/// is dropped.
pub struct CryptokiModule {
    pkcs11: Pkcs11,
}

impl CryptokiModule {
    fn find_slot(&self, id: SlotId) -> Result<Slot, ModuleError> {
        self.pkcs11
            .get_slots_with_token()
            .map_err(ModuleError::new)?
            .into_iter()
            .find(|slot| slot.id() == id)
            .ok_or_else(|| ModuleError::new(format!("no token in slot {}", id)))
    }
}

impl TokenModule for CryptokiModule {
    type Session = CryptokiSession;

    fn slots(&self) -> Result<Vec<SlotDescriptor>, ModuleError> {
        let slots =
            self.pkcs11.get_slots_with_token().map_err(ModuleError::new)?;
        let mut res = Vec::with_capacity(slots.len());
        for slot in slots {
            let info =
                self.pkcs11.get_token_info(slot).map_err(ModuleError::new)?;
            res.push(SlotDescriptor {
                id: slot.id(),
                token: padded(info.label())?,
                manufacturer: padded(info.manufacturer_id())?,
                model: padded(info.model())?,
                serial: padded(info.serial_number())?,
            });
        }
        Ok(res)
    }

    fn open_session(
        &self,
        slot: SlotId,
    ) -> Result<CryptokiSession, ModuleError> {
        let slot = self.find_slot(slot)?;
        let session =
            self.pkcs11.open_ro_session(slot).map_err(ModuleError::new)?;
        Ok(CryptokiSession { session })
    }
}


//------------ CryptokiSession -----------------------------------------------

/// A read-only session, closed when dropped.
pub struct CryptokiSession {
    session: Session,
}

impl CryptokiSession {
    fn attributes(
        &self,
        handle: ObjectHandle,
        types: &[AttributeType],
    ) -> Result<Vec<Attribute>, ModuleError> {
        self.session
            .get_attributes(handle, types)
            .map_err(ModuleError::new)
    }

    fn certificate(&self, handle: ObjectHandle) -> Result<X509, ModuleError> {
        let value = self
            .attributes(handle, &[AttributeType::Value])?
            .into_iter()
            .find_map(|attr| match attr {
                Attribute::Value(value) => Some(value),
                _ => None,
            })
            .ok_or_else(|| {
                ModuleError::new("certificate has no readable value")
            })?;
        Ok(X509::from_der(&value)?)
    }

    fn key_material(
        &self,
        handle: ObjectHandle,
    ) -> Result<KeyMaterial, ModuleError> {
        let mut key_type = None;
        let mut modulus = None;
        let mut exponent = None;
        let mut params = None;
        let mut point = None;
        for attr in self.attributes(
            handle,
            &[
                AttributeType::KeyType,
                AttributeType::Modulus,
                AttributeType::PublicExponent,
                AttributeType::EcParams,
                AttributeType::EcPoint,
            ],
        )? {
            match attr {
                Attribute::KeyType(value) => key_type = Some(value),
                Attribute::Modulus(value) => modulus = Some(value),
                Attribute::PublicExponent(value) => exponent = Some(value),
                Attribute::EcParams(value) => params = Some(value),
                Attribute::EcPoint(value) => point = Some(value),
                _ => {}
            }
        }

        if key_type == Some(KeyType::RSA) {
            if let (Some(modulus), Some(exponent)) = (modulus, exponent) {
                return Ok(KeyMaterial::rsa_from_parts(&modulus, &exponent)?);
            }
        } else if key_type == Some(KeyType::EC) {
            if let (Some(params), Some(point)) = (params, point) {
                return Ok(KeyMaterial::Ec { params, point });
            }
        }
        trace!("PKCS#11: no public material for key of type {:?}", key_type);
        Ok(KeyMaterial::Unavailable)
    }
}

impl TokenSession for CryptokiSession {
    type Handle = ObjectHandle;

    fn login(&mut self, pin: &Secret) -> Result<(), ModuleError> {
        let pin = String::from_utf8(pin.expose().to_vec())
            .map_err(|_| ModuleError::new("PIN is not valid UTF-8"))?;
        self.session
            .login(UserType::User, Some(&AuthPin::new(pin.into())))
            .map_err(ModuleError::new)
    }

    fn find_objects(
        &mut self,
        filter: &ObjectFilter,
    ) -> Result<Vec<ObjectHandle>, ModuleError> {
        let mut template = Vec::new();
        if let Some(class) = filter.class {
            template.push(Attribute::Class(ck_class(class)));
        }
        if let Some(id) = filter.id.as_ref() {
            template.push(Attribute::Id(id.clone()));
        }
        if let Some(label) = filter.label.as_ref() {
            template.push(Attribute::Label(label.clone()));
        }
        self.session
            .find_objects(&template)
            .map_err(ModuleError::new)
    }

    fn object_info(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<ObjectInfo<ObjectHandle>, ModuleError> {
        let mut info = ObjectInfo {
            handle,
            class: None,
            id: Vec::new(),
            label: Vec::new(),
        };
        for attr in self.attributes(
            handle,
            &[AttributeType::Class, AttributeType::Id, AttributeType::Label],
        )? {
            match attr {
                Attribute::Class(class) => info.class = from_ck_class(class),
                Attribute::Id(id) => info.id = id,
                Attribute::Label(label) => info.label = label,
                _ => {}
            }
        }
        Ok(info)
    }

    fn materialize(
        &mut self,
        object: &ObjectInfo<ObjectHandle>,
    ) -> Result<Material, ModuleError> {
        let class = object.class.ok_or_else(|| {
            ModuleError::new(format!(
                "object {:?} is of an unsupported class",
                object.handle
            ))
        })?;
        match class {
            ObjectClass::Certificate => {
                self.certificate(object.handle).map(Material::Certificate)
            }
            ObjectClass::PublicKey | ObjectClass::PrivateKey => {
                let material = self.key_material(object.handle)?;
                Ok(Material::Key(TokenKey::new(
                    class,
                    object.id.clone(),
                    object.label.clone(),
                    material,
                )))
            }
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Pads a token info field, which cryptoki hands out trimmed.
fn padded<const N: usize>(value: &str) -> Result<PaddedField<N>, ModuleError> {
    PaddedField::new(value.as_bytes()).map_err(ModuleError::new)
}

fn ck_class(class: ObjectClass) -> CkObjectClass {
    match class {
        ObjectClass::Certificate => CkObjectClass::CERTIFICATE,
        ObjectClass::PublicKey => CkObjectClass::PUBLIC_KEY,
        ObjectClass::PrivateKey => CkObjectClass::PRIVATE_KEY,
    }
}

fn from_ck_class(class: CkObjectClass) -> Option<ObjectClass> {
    if class == CkObjectClass::CERTIFICATE {
        Some(ObjectClass::Certificate)
    } else if class == CkObjectClass::PUBLIC_KEY {
        Some(ObjectClass::PublicKey)
    } else if class == CkObjectClass::PRIVATE_KEY {
        Some(ObjectClass::PrivateKey)
    } else {
        None
    }
}


//============ Tests =========================================================
