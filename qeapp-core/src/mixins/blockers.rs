//! Explicit, on-demand validation blockers.

use crate::model::Observable;
use crate::traits::TraitError;

/// Name of the trait holding the active blocker reasons.
pub const BLOCKERS: &str = "blockers";
/// Name of the trait holding the formatted blocker messages.
pub const BLOCKER_MESSAGES: &str = "blocker_messages";

/// Models that can block an action until their state is valid.
///
/// The class must include [`Mixin::HasBlockers`](crate::Mixin::HasBlockers).
/// Blockers are only recomputed by [`HasBlockers::update_blockers`]; callers
/// invoke it after changes that may affect them.
pub trait HasBlockers: Observable {
    /// Computes the ordered list of reasons currently blocking the model.
    fn check_blockers(&self) -> Vec<String>;

    /// Turns a blocker reason into a display message.
    fn format_blocker(&self, blocker: &str) -> String {
        blocker.to_owned()
    }

    /// Replaces the blockers with the result of [`HasBlockers::check_blockers`].
    fn update_blockers(&self) -> Result<(), TraitError> {
        let blockers = self.check_blockers();
        self.model().set(BLOCKERS, blockers)?;
        Ok(())
    }

    /// Replaces the blocker messages with the formatted current blockers.
    fn update_blocker_messages(&self) -> Result<(), TraitError> {
        let messages: Vec<String> = self
            .blockers()
            .iter()
            .map(|blocker| self.format_blocker(blocker))
            .collect();
        self.model().set(BLOCKER_MESSAGES, messages)?;
        Ok(())
    }

    /// The active blocker reasons.
    fn blockers(&self) -> Vec<String> {
        self.model().declared(BLOCKERS)
    }

    /// The formatted blocker messages.
    fn blocker_messages(&self) -> Vec<String> {
        self.model().declared(BLOCKER_MESSAGES)
    }

    /// Whether any blocker is active.
    fn is_blocked(&self) -> bool {
        !self.blockers().is_empty()
    }
}
