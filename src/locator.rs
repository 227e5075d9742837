//! Loading the module and finding the slot a URI refers to.

use std::path::Path;

use log::{debug, info, trace};

use crate::{
    error::Error,
    token::{ModuleLoader, SlotDescriptor, SlotId, TokenModule},
    uri::SelectionCriteria,
};

/// Loads and initializes the module at `path`.
pub fn load_module<L: ModuleLoader>(
    loader: &L,
    path: &Path,
) -> Result<L::Module, Error> {
    debug!("PKCS#11: loading module '{}'", path.display());
    loader.load(path).map_err(|err| {
        Error::ModuleInitFailed(format!("'{}': {}", path.display(), err))
    })
}

/// Selects the slot matching the criteria.
///
/// An explicit `slot-id` selects that slot, provided it holds a token.
/// Otherwise the first slot whose token matches all token attributes given
/// in the criteria is selected. Token attributes missing from the criteria
/// match any token.
pub fn locate_slot<M: TokenModule>(
    module: &M,
    criteria: &SelectionCriteria,
) -> Result<SlotId, Error> {
    let slots = module.slots().map_err(|err| {
        Error::Token(format!("cannot enumerate slots: {}", err))
    })?;
    trace!("PKCS#11: module reports {} slot(s) with a token", slots.len());

    let found = match criteria.slot_id {
        Some(slot_id) => slots.iter().find(|slot| slot.id == slot_id),
        None => slots.iter().find(|slot| token_matches(slot, criteria)),
    };

    match found {
        Some(slot) => {
            info!(
                "PKCS#11: using token '{}' (model: {}, vendor: {}) in slot {}",
                slot.token, slot.model, slot.manufacturer, slot.id
            );
            Ok(slot.id)
        }
        None => {
            debug!("PKCS#11: no slot matches the URI");
            Err(Error::NoMatchingSlot)
        }
    }
}

/// Returns whether the token in a slot matches the criteria.
pub fn token_matches(
    slot: &SlotDescriptor,
    criteria: &SelectionCriteria,
) -> bool {
    criteria.token.is_none_or(|token| token == slot.token)
        && criteria
            .manufacturer
            .is_none_or(|manufacturer| manufacturer == slot.manufacturer)
        && criteria.model.is_none_or(|model| model == slot.model)
        && criteria.serial.is_none_or(|serial| serial == slot.serial)
}


//============ Tests =========================================================
