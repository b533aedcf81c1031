//! Plain, serializable snapshots of model state.
//!
//! A model state is a [`ValueMap`] holding only plain data: the values of the
//! model's persistable traits plus whatever nested states the concrete model
//! adds (such as the states of registered children). Applying a state is a
//! partial update: keys absent from the state leave the model untouched.

use thiserror::Error;
use tracing::warn;

use crate::mixins::RegistryError;
use crate::model::Model;
use crate::traits::TraitError;
use crate::utils::shallow_copy_nested_dict;
use crate::value::{Value, ValueMap};

/// Errors raised when applying a model state.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum StateError {
    /// A value was rejected by a trait.
    #[error(transparent)]
    Trait(#[from] TraitError),
    /// A nested state addressed the model registry incorrectly.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A state entry has the wrong shape.
    #[error("state entry '{key}' must be {expected}, got {got}")]
    Shape {
        /// The offending key.
        key: String,
        /// The expected shape.
        expected: &'static str,
        /// The type found.
        got: &'static str,
    },
}

impl StateError {
    /// A shape error for `key`, which held `value`.
    pub fn shape(key: impl Into<String>, expected: &'static str, value: &Value) -> Self {
        Self::Shape {
            key: key.into(),
            expected,
            got: value.type_name(),
        }
    }
}

/// Models that can be captured as, and restored from, a plain state.
///
/// Implementations must satisfy the round-trip law: applying the state of one
/// model to a fresh instance yields an instance reporting the same state.
pub trait ModelState {
    /// A plain snapshot of the model.
    fn get_model_state(&self) -> ValueMap;

    /// Applies a (possibly partial) snapshot to the model.
    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError>;
}

impl ModelState for Model {
    fn get_model_state(&self) -> ValueMap {
        persistable_state(self)
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        for key in apply_persistable_state(self, state)? {
            warn!(model = self.class().name(), %key, "ignoring unknown state key");
        }
        Ok(())
    }
}

/// The values of every persistable trait of `model`, in declaration order.
///
/// Nested dictionaries are copied while lists are shared with the model,
/// see [`shallow_copy_nested_dict`]. Traits holding live objects are skipped.
pub fn persistable_state(model: &Model) -> ValueMap {
    let state: ValueMap = model
        .class()
        .traits()
        .filter(|spec| spec.is_persistent())
        .filter_map(|spec| {
            let value = model.get(spec.name()).ok()?;
            (!matches!(value, Value::Object(_))).then(|| (spec.name().to_string(), value))
        })
        .collect();
    shallow_copy_nested_dict(&state)
}

/// Writes every entry of `state` naming a persistable trait of `model`.
///
/// Returns the keys that were not consumed, in order, so that callers can
/// handle their own nested entries.
pub fn apply_persistable_state<'a>(
    model: &Model,
    state: &'a ValueMap,
) -> Result<Vec<&'a str>, TraitError> {
    let mut unconsumed = Vec::new();
    for (key, value) in state {
        match model.class().get_trait(key) {
            Some(spec) if spec.is_persistent() => {
                model.set(key, value.clone())?;
            }
            _ => unconsumed.push(key.as_str()),
        }
    }
    Ok(unconsumed)
}
