//! Iterating over the objects on a token.

use std::{collections::VecDeque, fmt};

use log::{debug, trace};
use openssl::x509::X509;

use crate::{
    constants::PKCS11_SCHEME,
    error::Error,
    token::{Material, ObjectClass, ObjectFilter, ObjectInfo, TokenSession},
    uri::{SelectionCriteria, escape},
};


//------------ SearchMode ----------------------------------------------------

/// What a search produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchMode {
    /// Names and descriptions of objects.
    Names,

    /// The objects themselves.
    Lookup,
}

impl SearchMode {
    /// Returns the mode for listing the objects matching the criteria.
    ///
    /// Names are listed only if the criteria select neither id nor label.
    pub fn for_listing(criteria: &SelectionCriteria) -> Self {
        if criteria.has_selector() {
            SearchMode::Lookup
        } else {
            SearchMode::Names
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SearchMode::Names => write!(f, "name listing"),
            SearchMode::Lookup => write!(f, "object lookup"),
        }
    }
}


//------------ NameEntry -----------------------------------------------------

/// The name and description of an object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NameEntry {
    /// A `pkcs11:` URI identifying the object.
    pub name: String,

    pub description: String,
}

impl NameEntry {
    /// Creates the entry for an object of a known class.
    pub fn for_object<H>(object: &ObjectInfo<H>, class: ObjectClass) -> Self {
        let mut name = String::from(PKCS11_SCHEME);
        if !object.label.is_empty() {
            name.push_str("object=");
            name.push_str(&escape::encode(&object.label));
            name.push(';');
        }
        if !object.id.is_empty() {
            name.push_str("id=");
            name.push_str(&escape::encode(&object.id));
            name.push(';');
        }
        name.push_str("type=");
        name.push_str(class.uri_type());

        let description = if !object.label.is_empty() {
            format!("{} \"{}\"", class, String::from_utf8_lossy(&object.label))
        } else if !object.id.is_empty() {
            format!("{} with id {}", class, hex::encode(&object.id))
        } else {
            class.to_string()
        };

        NameEntry { name, description }
    }
}


//------------ CertMatch -----------------------------------------------------

/// A certificate found by [`ObjectSearch::next_cert`].
#[derive(Clone, Debug)]
pub struct CertMatch {
    pub cert: X509,

    /// The id of the certificate object.
    ///
    /// The private key belonging to the certificate has the same id.
    pub id: Vec<u8>,
}


//------------ ObjectSearch --------------------------------------------------

/// A forward-only search over the objects of a session.
///
/// The search is started with the set of objects matching a filter. Each
/// call to one of the `next` methods looks at the next object. Objects of
/// classes this crate doesn't handle are skipped. Once the objects have
/// run out, or reading one of them failed, the search is exhausted and all
/// further calls return `Ok(None)`.
#[derive(Debug)]
pub struct ObjectSearch<H> {
    mode: SearchMode,
    pending: VecDeque<H>,
    exhausted: bool,
    last_error: Option<String>,

    /// The object most recently returned.
    current: Option<ObjectInfo<H>>,
}

impl<H: Copy + fmt::Debug> ObjectSearch<H> {
    /// Starts a search for the objects matching `filter`.
    pub fn start<S>(
        session: &mut S,
        filter: &ObjectFilter,
        mode: SearchMode,
    ) -> Result<Self, Error>
    where
        S: TokenSession<Handle = H>,
    {
        let handles = session.find_objects(filter).map_err(Error::token)?;
        debug!(
            "PKCS#11: {} search found {} object(s) for {}",
            mode,
            handles.len(),
            filter
        );
        Ok(ObjectSearch {
            mode,
            pending: handles.into(),
            exhausted: false,
            last_error: None,
            current: None,
        })
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Returns the message of the error that ended the search, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the object most recently returned.
    pub fn current(&self) -> Option<&ObjectInfo<H>> {
        self.current.as_ref()
    }

    /// Returns the name of the next object.
    pub fn next_name<S>(
        &mut self,
        session: &mut S,
    ) -> Result<Option<NameEntry>, Error>
    where
        S: TokenSession<Handle = H>,
    {
        self.check_mode(SearchMode::Names)?;
        Ok(self
            .advance(session, None)?
            .map(|(object, class)| NameEntry::for_object(&object, class)))
    }

    /// Returns the next object and its class.
    pub fn next_object<S>(
        &mut self,
        session: &mut S,
    ) -> Result<Option<(ObjectInfo<H>, ObjectClass)>, Error>
    where
        S: TokenSession<Handle = H>,
    {
        self.check_mode(SearchMode::Lookup)?;
        self.advance(session, None)
    }

    /// Returns the next certificate and its id.
    ///
    /// Objects of other classes are skipped.
    pub fn next_cert<S>(
        &mut self,
        session: &mut S,
    ) -> Result<Option<CertMatch>, Error>
    where
        S: TokenSession<Handle = H>,
    {
        self.check_mode(SearchMode::Lookup)?;
        let Some((object, _)) =
            self.advance(session, Some(ObjectClass::Certificate))?
        else {
            return Ok(None);
        };
        match session.materialize(&object) {
            Ok(Material::Certificate(cert)) => Ok(Some(CertMatch {
                cert,
                id: object.id,
            })),
            Ok(Material::Key(_)) => Err(self.fail(Error::Token(format!(
                "object {:?} is not a certificate",
                object.handle
            )))),
            Err(err) => Err(self.fail(Error::token(err))),
        }
    }

    fn check_mode(&self, mode: SearchMode) -> Result<(), Error> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(Error::Token(format!(
                "{} requested from a search in {} mode",
                mode, self.mode
            )))
        }
    }

    /// Moves to the next object of a handled class.
    fn advance<S>(
        &mut self,
        session: &mut S,
        wanted: Option<ObjectClass>,
    ) -> Result<Option<(ObjectInfo<H>, ObjectClass)>, Error>
    where
        S: TokenSession<Handle = H>,
    {
        while !self.exhausted {
            let Some(handle) = self.pending.pop_front() else {
                trace!("PKCS#11: search exhausted");
                self.exhausted = true;
                self.current = None;
                break;
            };
            let object = match session.object_info(handle) {
                Ok(object) => object,
                Err(err) => return Err(self.fail(Error::token(err))),
            };
            match object.class {
                Some(class) if wanted.is_none_or(|wanted| wanted == class) => {
                    trace!("PKCS#11: found {} {:?}", class, handle);
                    self.current = Some(object.clone());
                    return Ok(Some((object, class)));
                }
                _ => {
                    trace!("PKCS#11: skipping object {:?}", handle);
                }
            }
        }
        Ok(None)
    }

    /// Ends the search because of an error.
    fn fail(&mut self, err: Error) -> Error {
        debug!("PKCS#11: search failed: {}", err);
        self.exhausted = true;
        self.current = None;
        self.pending.clear();
        self.last_error = Some(err.to_string());
        err
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::{
        test,
        token::{
            KeyMaterial, ModuleLoader, TokenModule,
            memory::{MemoryLoader, MemoryObject, MemoryToken},
        },
    };

    use super::*;

    fn loader() -> MemoryLoader {
        MemoryLoader::new("/mem.so").with_token(
            MemoryToken::new(0, "token")
                .with_object(MemoryObject::data(b"d", "data"))
                .with_object(MemoryObject::certificate(
                    b"\x01",
                    "client",
                    test::self_signed_cert("client"),
                ))
                .with_object(MemoryObject::public_key(
                    b"\x01",
                    "client",
                    KeyMaterial::Unavailable,
                ))
                .with_object(MemoryObject::public_key(
                    b"",
                    "",
                    KeyMaterial::Unavailable,
                ))
                .with_object(
                    MemoryObject::certificate(
                        b"\x02",
                        "broken",
                        test::self_signed_cert("broken"),
                    )
                    .unreadable(),
                ),
        )
    }

    #[test]
    fn names_until_exhausted() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        let mut session = module.open_session(0).unwrap();
        let mut search = ObjectSearch::start(
            &mut session,
            &ObjectFilter::default(),
            SearchMode::Names,
        )
        .unwrap();

        let first = search.next_name(&mut session).unwrap().unwrap();
        assert_eq!(first.name, "pkcs11:object=client;id=%01;type=cert");
        assert_eq!(first.description, "Certificate \"client\"");

        let second = search.next_name(&mut session).unwrap().unwrap();
        assert_eq!(second.name, "pkcs11:object=client;id=%01;type=public");
        assert_eq!(second.description, "Public key \"client\"");

        let third = search.next_name(&mut session).unwrap().unwrap();
        assert_eq!(third.name, "pkcs11:type=public");
        assert_eq!(third.description, "Public key");

        let fourth = search.next_name(&mut session).unwrap().unwrap();
        assert_eq!(fourth.name, "pkcs11:object=broken;id=%02;type=cert");
        assert!(!search.is_exhausted());

        for _ in 0..3 {
            assert!(search.next_name(&mut session).unwrap().is_none());
            assert!(search.is_exhausted());
            assert!(search.last_error().is_none());
        }
    }

    #[test]
    fn lookup_classifies_objects() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        let mut session = module.open_session(0).unwrap();
        let filter = ObjectFilter {
            id: Some(vec![1]),
            ..Default::default()
        };
        let mut search =
            ObjectSearch::start(&mut session, &filter, SearchMode::Lookup)
                .unwrap();

        let (object, class) = search.next_object(&mut session).unwrap().unwrap();
        assert_eq!(class, ObjectClass::Certificate);
        assert_eq!(object.label, b"client");
        assert_eq!(search.current().map(|c| c.handle), Some(object.handle));

        let (_, class) = search.next_object(&mut session).unwrap().unwrap();
        assert_eq!(class, ObjectClass::PublicKey);

        assert!(search.next_object(&mut session).unwrap().is_none());
        assert!(search.current().is_none());
        assert!(search.next_object(&mut session).unwrap().is_none());
    }

    #[test]
    fn next_cert_skips_other_classes_and_stops_on_error() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        let mut session = module.open_session(0).unwrap();
        let mut search = ObjectSearch::start(
            &mut session,
            &ObjectFilter::default(),
            SearchMode::Lookup,
        )
        .unwrap();

        let found = search.next_cert(&mut session).unwrap().unwrap();
        assert_eq!(found.id, vec![1]);

        assert!(matches!(
            search.next_cert(&mut session),
            Err(Error::Token(_))
        ));
        assert!(search.is_exhausted());
        assert!(search.last_error().is_some());
        assert!(search.next_cert(&mut session).unwrap().is_none());
    }

    #[test]
    fn modes_are_exclusive() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        let mut session = module.open_session(0).unwrap();
        let mut search = ObjectSearch::start(
            &mut session,
            &ObjectFilter::default(),
            SearchMode::Names,
        )
        .unwrap();
        assert!(search.next_object(&mut session).is_err());
        assert!(search.next_cert(&mut session).is_err());
        assert!(!search.is_exhausted());
        assert!(search.next_name(&mut session).unwrap().is_some());
    }

    #[test]
    fn listing_mode_follows_selector() {
        let criteria = |uri| {
            SelectionCriteria::parse_with_fallback(
                uri,
                crate::uri::ParseContext::Listing,
                Some("/mem.so".into()),
            )
            .unwrap()
        };
        assert_eq!(SearchMode::for_listing(&criteria("pkcs11:")), SearchMode::Names);
        assert_eq!(
            SearchMode::for_listing(&criteria("pkcs11:type=cert")),
            SearchMode::Names
        );
        assert_eq!(
            SearchMode::for_listing(&criteria("pkcs11:object=x")),
            SearchMode::Lookup
        );
    }
}
