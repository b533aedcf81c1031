//! A confirmation flag cleared by any other change.

use crate::model::{Model, Observable};
use crate::traits::{Change, TraitError};

/// Name of the confirmation trait.
pub const CONFIRMED: &str = "confirmed";

/// Models whose settings must be explicitly confirmed.
///
/// The class must include [`Mixin::Confirmable`](crate::Mixin::Confirmable).
/// Any change to another trait clears the flag before user observers of that
/// change run.
pub trait Confirmable: Observable {
    /// Whether the current settings are confirmed.
    fn confirmed(&self) -> bool {
        self.model().declared(CONFIRMED)
    }

    /// Confirms the current settings.
    fn confirm(&self) -> Result<(), TraitError> {
        self.model().set(CONFIRMED, true)?;
        Ok(())
    }
}

impl Confirmable for Model {}

/// Clears the confirmation flag after a change to any other trait.
pub(crate) fn unconfirm_on_change(model: &Model, change: &Change) -> Result<(), TraitError> {
    if change.name != CONFIRMED && model.get(CONFIRMED)?.as_bool() == Some(true) {
        model.set(CONFIRMED, false)?;
    }
    Ok(())
}
