//! Opening and authenticating sessions.
//!
//! Sessions are owned values that close themselves when dropped. The
//! functions here take care that a session is never handed out half set
//! up: if logging in fails, the session is dropped, and thus closed,
//! before the error is returned.

use log::{debug, warn};

use crate::{
    error::Error,
    secret::Secret,
    token::{SlotId, TokenModule, TokenSession},
};

/// Opens a session on a slot and logs in if a PIN is given.
pub fn open_session<M: TokenModule>(
    module: &M,
    slot: SlotId,
    pin: Option<&Secret>,
) -> Result<M::Session, Error> {
    let session = module.open_session(slot).map_err(|err| {
        warn!("PKCS#11: cannot open session on slot {}: {}", slot, err);
        Error::SessionOpenFailed(format!("slot {}: {}", slot, err))
    })?;
    debug!("PKCS#11: opened session on slot {}", slot);

    match pin {
        Some(pin) => login(session, pin),
        None => Ok(session),
    }
}

/// Logs in to a session, consuming it on failure.
pub fn login<S: TokenSession>(mut session: S, pin: &Secret) -> Result<S, Error> {
    match session.login(pin) {
        Ok(()) => {
            debug!("PKCS#11: logged in");
            Ok(session)
        }
        Err(err) => {
            drop(session);
            warn!("PKCS#11: login failed: {}", err);
            Err(Error::AuthenticationFailed(err.to_string()))
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::token::{
        ModuleLoader, ObjectFilter,
        memory::{MemoryLoader, MemoryObject, MemoryToken},
        KeyMaterial,
    };

    use super::*;

    fn loader() -> MemoryLoader {
        MemoryLoader::new("/mem.so").with_token(
            MemoryToken::new(0, "token").user_pin("1234").with_object(
                MemoryObject::private_key(b"1", "k", KeyMaterial::Unavailable),
            ),
        )
    }

    #[test]
    fn failed_login_closes_session() {
        let loader = loader();
        let stats = loader.stats();
        let module = loader.load(Path::new("/mem.so")).unwrap();

        let res = open_session(&module, 0, Some(&Secret::from("9999")));
        assert!(matches!(res, Err(Error::AuthenticationFailed(_))));
        assert_eq!(stats.sessions_opened(), 1);
        assert_eq!(stats.sessions_closed(), 1);
    }

    #[test]
    fn login_makes_private_objects_visible() {
        let loader = loader();
        let stats = loader.stats();
        let module = loader.load(Path::new("/mem.so")).unwrap();

        let mut session =
            open_session(&module, 0, Some(&Secret::from("1234"))).unwrap();
        assert_eq!(
            session.find_objects(&ObjectFilter::default()).unwrap().len(),
            1
        );
        assert_eq!(stats.open_sessions(), 1);
        drop(session);
        assert_eq!(stats.open_sessions(), 0);
    }

    #[test]
    fn open_failure() {
        let loader = loader();
        let module = loader.load(Path::new("/mem.so")).unwrap();
        assert!(matches!(
            open_session(&module, 7, None),
            Err(Error::SessionOpenFailed(_))
        ));
    }
}
