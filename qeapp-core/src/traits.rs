//! Declarations of observable model attributes ("traits") and their
//! validation rules.

use std::any::TypeId;

use itertools::Itertools;
use smol_str::SmolStr;
use thiserror::Error;

use crate::value::{Object, ObjectValue, Value};

/// The name of a trait.
pub type TraitName = SmolStr;

/// The domain of values accepted by a trait.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum TraitKind {
    /// Any value.
    Any,
    /// A boolean.
    Bool,
    /// An integer within optional inclusive bounds.
    Int {
        /// Lower bound.
        min: Option<i64>,
        /// Upper bound.
        max: Option<i64>,
    },
    /// A float within optional inclusive bounds. Integers are accepted and widened.
    Float {
        /// Lower bound.
        min: Option<f64>,
        /// Upper bound.
        max: Option<f64>,
    },
    /// A string.
    Unicode,
    /// A string taken from a fixed set of choices.
    Enum(Vec<SmolStr>),
    /// A list.
    List,
    /// A dictionary.
    Dict,
    /// An opaque object of a single concrete type.
    Instance {
        /// Identity of the accepted type.
        type_id: TypeId,
        /// Name of the accepted type, for error messages.
        type_name: &'static str,
    },
}

impl TraitKind {
    /// An instance trait accepting objects of type `T`.
    pub fn instance<T: ObjectValue>() -> Self {
        TraitKind::Instance {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns `true` if both kinds accept the same shape of value, ignoring bounds.
    pub fn same_shape(&self, other: &TraitKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn describe(&self) -> String {
        match self {
            TraitKind::Any => "any value".into(),
            TraitKind::Bool => "a bool".into(),
            TraitKind::Int { .. } => "an int".into(),
            TraitKind::Float { .. } => "a float".into(),
            TraitKind::Unicode => "a str".into(),
            TraitKind::Enum(choices) => format!("one of [{}]", choices.iter().join(", ")),
            TraitKind::List => "a list".into(),
            TraitKind::Dict => "a dict".into(),
            TraitKind::Instance { type_name, .. } => format!("an instance of {type_name}"),
        }
    }
}

/// The declaration of a single trait: its name, domain and default.
#[derive(Clone, Debug, PartialEq)]
pub struct TraitSpec {
    name: TraitName,
    kind: TraitKind,
    default: Value,
    allow_none: bool,
    persist: bool,
}

impl TraitSpec {
    /// Declares a trait.
    ///
    /// The default must satisfy the kind; [`ModelClassBuilder::build`]
    /// rejects classes declaring a default that does not.
    ///
    /// [`ModelClassBuilder::build`]: crate::class::ModelClassBuilder::build
    pub fn new(name: impl Into<TraitName>, kind: TraitKind, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            default: default.into(),
            allow_none: false,
            persist: false,
        }
    }

    /// A trait accepting any value.
    pub fn any(name: impl Into<TraitName>, default: impl Into<Value>) -> Self {
        Self::new(name, TraitKind::Any, default).allow_none()
    }

    /// A boolean trait.
    pub fn bool(name: impl Into<TraitName>, default: bool) -> Self {
        Self::new(name, TraitKind::Bool, default)
    }

    /// An unbounded integer trait.
    pub fn int(name: impl Into<TraitName>, default: i64) -> Self {
        Self::new(name, TraitKind::Int { min: None, max: None }, default)
    }

    /// An unbounded float trait.
    pub fn float(name: impl Into<TraitName>, default: f64) -> Self {
        Self::new(name, TraitKind::Float { min: None, max: None }, default)
    }

    /// A string trait.
    pub fn unicode(name: impl Into<TraitName>, default: impl Into<String>) -> Self {
        Self::new(name, TraitKind::Unicode, default.into())
    }

    /// An optional string trait defaulting to `None`.
    pub fn optional_unicode(name: impl Into<TraitName>) -> Self {
        Self::new(name, TraitKind::Unicode, Value::None).allow_none()
    }

    /// A string trait restricted to `choices`.
    pub fn enumeration(
        name: impl Into<TraitName>,
        choices: impl IntoIterator<Item = impl Into<SmolStr>>,
        default: impl Into<String>,
    ) -> Self {
        let choices = choices.into_iter().map_into().collect();
        Self::new(name, TraitKind::Enum(choices), default.into())
    }

    /// A list trait defaulting to an empty list.
    pub fn list(name: impl Into<TraitName>) -> Self {
        Self::new(name, TraitKind::List, Value::list(Vec::<Value>::new()))
    }

    /// A dictionary trait defaulting to an empty dictionary.
    pub fn dict(name: impl Into<TraitName>) -> Self {
        Self::new(name, TraitKind::Dict, Value::Dict(Default::default()))
    }

    /// An instance trait holding objects of type `T`, defaulting to `None`.
    pub fn instance<T: ObjectValue>(name: impl Into<TraitName>) -> Self {
        Self::new(name, TraitKind::instance::<T>(), Value::None).allow_none()
    }

    /// Sets an inclusive lower bound on a numeric trait.
    pub fn with_min(mut self, min: impl Into<Value>) -> Self {
        let min = min.into();
        match &mut self.kind {
            TraitKind::Int { min: m, .. } => *m = min.as_int(),
            TraitKind::Float { min: m, .. } => *m = min.as_float(),
            _ => {}
        }
        self
    }

    /// Sets an inclusive upper bound on a numeric trait.
    pub fn with_max(mut self, max: impl Into<Value>) -> Self {
        let max = max.into();
        match &mut self.kind {
            TraitKind::Int { max: m, .. } => *m = max.as_int(),
            TraitKind::Float { max: m, .. } => *m = max.as_float(),
            _ => {}
        }
        self
    }

    /// Lets the trait hold `None`.
    pub fn allow_none(mut self) -> Self {
        self.allow_none = true;
        self
    }

    /// Marks the trait as part of the model state.
    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    /// The trait name.
    pub fn name(&self) -> &TraitName {
        &self.name
    }

    /// The trait domain.
    pub fn kind(&self) -> &TraitKind {
        &self.kind
    }

    /// The value a new model starts with.
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether the trait is included in the model state.
    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    /// Whether the trait accepts `None`.
    pub fn allows_none(&self) -> bool {
        self.allow_none
    }

    /// Validates the default against the kind, storing it as validated.
    pub(crate) fn checked(mut self, owner: &str) -> Result<Self, TraitError> {
        let default = std::mem::take(&mut self.default);
        self.default = self.validate(owner, default)?;
        Ok(self)
    }

    /// Checks `value` against the trait domain, returning the value to store.
    ///
    /// Integers written to a float trait are widened. Nothing is ever clamped.
    pub fn validate(&self, owner: &str, value: Value) -> Result<Value, TraitError> {
        let mismatch = |value: &Value| TraitError::TypeMismatch {
            class: owner.into(),
            name: self.name.clone(),
            expected: self.kind.describe(),
            got: value.type_name(),
        };
        let out_of_bounds = |value: &Value, bound: String| TraitError::OutOfBounds {
            class: owner.into(),
            name: self.name.clone(),
            value: value.to_string(),
            bound,
        };

        if value.is_none() {
            return if self.allow_none {
                Ok(value)
            } else {
                Err(TraitError::NoneNotAllowed {
                    class: owner.into(),
                    name: self.name.clone(),
                })
            };
        }

        match (&self.kind, &value) {
            (TraitKind::Any, _)
            | (TraitKind::Bool, Value::Bool(_))
            | (TraitKind::Unicode, Value::Str(_))
            | (TraitKind::List, Value::List(_))
            | (TraitKind::Dict, Value::Dict(_)) => Ok(value),
            (TraitKind::Int { min, max }, Value::Int(i)) => {
                if let Some(min) = min.filter(|min| i < min) {
                    return Err(out_of_bounds(&value, format!(">= {min}")));
                }
                if let Some(max) = max.filter(|max| i > max) {
                    return Err(out_of_bounds(&value, format!("<= {max}")));
                }
                Ok(value)
            }
            (TraitKind::Float { min, max }, Value::Int(_) | Value::Float(_)) => {
                let x = value.as_float().unwrap_or_default();
                if let Some(min) = min.filter(|min| x < *min) {
                    return Err(out_of_bounds(&value, format!(">= {min}")));
                }
                if let Some(max) = max.filter(|max| x > *max) {
                    return Err(out_of_bounds(&value, format!("<= {max}")));
                }
                Ok(Value::Float(x))
            }
            (TraitKind::Enum(choices), Value::Str(s)) => {
                if choices.iter().any(|c| c == s) {
                    Ok(value)
                } else {
                    Err(TraitError::InvalidChoice {
                        class: owner.into(),
                        name: self.name.clone(),
                        value: s.clone(),
                        choices: choices.clone(),
                    })
                }
            }
            (TraitKind::Instance { type_id, .. }, Value::Object(obj))
                if obj.object_type_id() == *type_id =>
            {
                Ok(value)
            }
            _ => Err(mismatch(&value)),
        }
    }
}

/// A notification that a trait changed value.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    /// The trait that changed.
    pub name: TraitName,
    /// The value before the write.
    pub old: Value,
    /// The value after the write.
    pub new: Value,
}

impl Change {
    /// The new value as an object, if it is one.
    pub fn new_object(&self) -> Option<&Object> {
        self.new.as_object()
    }
}

/// Errors raised when reading, writing or observing traits.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum TraitError {
    /// The model class declares no such trait.
    #[error("{class} has no trait named '{name}'")]
    UnknownTrait {
        /// Model class name.
        class: SmolStr,
        /// Requested trait.
        name: TraitName,
    },
    /// The value has the wrong type for the trait.
    #[error("the '{name}' trait of {class} expected {expected}, got {got}")]
    TypeMismatch {
        /// Model class name.
        class: SmolStr,
        /// Written trait.
        name: TraitName,
        /// Description of the accepted domain.
        expected: String,
        /// Type of the rejected value.
        got: &'static str,
    },
    /// A numeric value lies outside the trait bounds.
    #[error("the '{name}' trait of {class} must be {bound}, got {value}")]
    OutOfBounds {
        /// Model class name.
        class: SmolStr,
        /// Written trait.
        name: TraitName,
        /// The rejected value.
        value: String,
        /// The violated bound.
        bound: String,
    },
    /// A string is not among the allowed choices.
    #[error("the '{name}' trait of {class} must be one of {choices:?}, got {value:?}")]
    InvalidChoice {
        /// Model class name.
        class: SmolStr,
        /// Written trait.
        name: TraitName,
        /// The rejected value.
        value: String,
        /// The allowed values.
        choices: Vec<SmolStr>,
    },
    /// `None` written to a trait that does not allow it.
    #[error("the '{name}' trait of {class} does not accept None")]
    NoneNotAllowed {
        /// Model class name.
        class: SmolStr,
        /// Written trait.
        name: TraitName,
    },
    /// Change notifications nested too deeply, indicating an observer cycle.
    #[error("observer chain exceeded {limit} nested notifications while writing '{name}'")]
    NotificationCycle {
        /// The trait whose write overflowed.
        name: TraitName,
        /// The nesting limit.
        limit: usize,
    },
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::below(0, false)]
    #[case::at_min(1, true)]
    #[case::inside(4, true)]
    #[case::at_max(8, true)]
    #[case::above(9, false)]
    fn bounded_int(#[case] value: i64, #[case] ok: bool) {
        let spec = TraitSpec::int("npool", 1).with_min(1).with_max(8);
        assert_eq!(spec.validate("Model", value.into()).is_ok(), ok);
    }

    #[test]
    fn float_widens_ints_and_never_clamps() {
        let spec = TraitSpec::float("value", 0.0).with_min(0.0).with_max(1.0);
        assert_eq!(spec.validate("ProgressBar", 1.into()), Ok(Value::Float(1.0)));
        assert!(matches!(
            spec.validate("ProgressBar", 1.2.into()),
            Err(TraitError::OutOfBounds { .. })
        ));
        assert!(matches!(
            spec.validate("ProgressBar", (-0.1).into()),
            Err(TraitError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn none_requires_opt_in() {
        let err = TraitSpec::unicode("title", "")
            .validate("Panel", Value::None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "the 'title' trait of Panel does not accept None"
        );
        assert_eq!(
            TraitSpec::optional_unicode("selected").validate("Code", Value::None),
            Ok(Value::None)
        );
    }

    #[test]
    fn enumeration_checks_choices() {
        let spec = TraitSpec::enumeration("protocol", ["fast", "balanced"], "balanced");
        assert!(spec.validate("Workchain", "fast".into()).is_ok());
        assert!(matches!(
            spec.validate("Workchain", "slow".into()),
            Err(TraitError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn instances_are_checked_by_concrete_type() {
        #[derive(Debug)]
        struct Other;
        impl ObjectValue for Other {}

        let spec = TraitSpec::instance::<crate::StructureData>("input_structure");
        let structure = Object::new(crate::StructureData::new([[1.0, 0.0, 0.0]; 3]));
        assert!(spec.validate("Dummy", structure.into()).is_ok());
        assert!(matches!(
            spec.validate("Dummy", Object::new(Other).into()),
            Err(TraitError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn type_mismatch_names_the_domain() {
        let err = TraitSpec::bool("include", false)
            .validate("Settings", 1.into())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "the 'include' trait of Settings expected a bool, got int"
        );
    }
}
