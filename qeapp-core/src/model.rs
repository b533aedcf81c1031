//! The observable model handle.
//!
//! A [`Model`] is a cheap-to-clone, reference-counted handle: clones address
//! the same instance and compare equal under [`Model::ptr_eq`]. Every trait
//! write funnels through [`Model::set`], which validates the value, skips
//! writes that do not change it, and then synchronously notifies, in order:
//!
//! 1. the behaviour of the class's mixins (e.g. clearing `confirmed`),
//! 2. every observer registered for the trait, in registration order.
//!
//! Observers may themselves write traits. Nested notifications are bounded by
//! [`MAX_NOTIFICATION_DEPTH`] so that an accidental observer cycle surfaces as a
//! [`TraitError::NotificationCycle`] instead of overflowing the stack.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::trace;

use crate::class::{Mixin, ModelClass};
use crate::mixins::confirmable;
use crate::traits::{Change, TraitError, TraitName, TraitSpec};
use crate::value::{FromValue, Value};

/// Maximum nesting of change notifications on one thread.
pub const MAX_NOTIFICATION_DEPTH: usize = 64;

thread_local! {
    static NOTIFICATION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// An object exposing an observable [`Model`].
///
/// Concrete models are thin handles around a [`Model`]; the mixin traits in
/// [`crate::mixins`] are implemented on top of this accessor.
pub trait Observable {
    /// The underlying observable model.
    fn model(&self) -> &Model;
}

impl Observable for Model {
    fn model(&self) -> &Model {
        self
    }
}

/// A callback invoked after a trait changes.
pub type Observer = Rc<dyn Fn(&Change) -> Result<(), TraitError>>;

/// Identifies a registered observer, see [`Model::unobserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// The traits an observer is interested in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Names {
    /// Every trait of the model.
    All,
    /// Only the listed traits.
    Some(Vec<TraitName>),
}

impl Names {
    fn matches(&self, name: &str) -> bool {
        match self {
            Names::All => true,
            Names::Some(names) => names.iter().any(|n| n == name),
        }
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Names::Some(vec![name.into()])
    }
}

impl<const N: usize> From<[&str; N]> for Names {
    fn from(names: [&str; N]) -> Self {
        Names::Some(names.iter().map(|&n| n.into()).collect())
    }
}

struct ObserverEntry {
    id: ObserverId,
    names: Names,
    callback: Observer,
}

struct ModelData {
    class: Rc<ModelClass>,
    values: RefCell<IndexMap<TraitName, Value>>,
    observers: RefCell<Vec<ObserverEntry>>,
    next_observer: Cell<u64>,
}

/// A handle to an instance of a [`ModelClass`].
#[derive(Clone)]
pub struct Model(Rc<ModelData>);

/// A non-owning reference to a [`Model`], used by observers to avoid cycles.
#[derive(Clone)]
pub struct WeakModel(Weak<ModelData>);

impl WeakModel {
    /// Recovers the model if it is still alive.
    pub fn upgrade(&self) -> Option<Model> {
        self.0.upgrade().map(Model)
    }
}

impl Model {
    /// Instantiates `class` with every trait at its default value.
    pub fn new(class: Rc<ModelClass>) -> Self {
        let values = class
            .traits()
            .map(|spec| (spec.name().clone(), spec.default_value().clone()))
            .collect();
        Model(Rc::new(ModelData {
            class,
            values: RefCell::new(values),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
        }))
    }

    /// The class the model was instantiated from.
    pub fn class(&self) -> &ModelClass {
        &self.0.class
    }

    /// A shared handle to the model's class.
    pub fn class_rc(&self) -> &Rc<ModelClass> {
        &self.0.class
    }

    /// Returns `true` if both handles address the same instance.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A weak handle to the model.
    pub fn downgrade(&self) -> WeakModel {
        WeakModel(Rc::downgrade(&self.0))
    }

    /// Returns `true` if the class declares `name`.
    pub fn has_trait(&self, name: &str) -> bool {
        self.0.class.get_trait(name).is_some()
    }

    /// The names of all traits, in declaration order.
    pub fn trait_names(&self) -> Vec<TraitName> {
        self.0.values.borrow().keys().cloned().collect()
    }

    fn spec(&self, name: &str) -> Result<&TraitSpec, TraitError> {
        self.0
            .class
            .get_trait(name)
            .ok_or_else(|| TraitError::UnknownTrait {
                class: self.0.class.name().into(),
                name: name.into(),
            })
    }

    /// Reads the current value of a trait.
    pub fn get(&self, name: &str) -> Result<Value, TraitError> {
        self.0
            .values
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| TraitError::UnknownTrait {
                class: self.0.class.name().into(),
                name: name.into(),
            })
    }

    /// Reads a trait as a concrete type.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, TraitError> {
        let value = self.get(name)?;
        T::from_value(&value).ok_or_else(|| TraitError::TypeMismatch {
            class: self.0.class.name().into(),
            name: name.into(),
            expected: std::any::type_name::<T>().to_owned(),
            got: value.type_name(),
        })
    }

    /// Reads a trait the class is known to declare.
    ///
    /// # Panics
    ///
    /// If the trait is undeclared or holds a value of another type. Concrete
    /// models use this for their own declared traits only.
    #[track_caller]
    pub fn declared<T: FromValue>(&self, name: &str) -> T {
        match self.get_as(name) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    /// Writes a trait, notifying observers if the value changed.
    ///
    /// Returns whether the stored value changed. Validation errors are raised
    /// before anything is modified; errors raised by observers are propagated
    /// after the value has been stored.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<bool, TraitError> {
        let spec = self.spec(name)?;
        let value = spec.validate(self.0.class.name(), value.into())?;
        let name = spec.name().clone();

        let old = {
            let mut values = self.0.values.borrow_mut();
            let slot = values.entry(name.clone()).or_default();
            if *slot == value {
                return Ok(false);
            }
            std::mem::replace(slot, value.clone())
        };
        trace!(model = self.0.class.name(), %name, old = %old, new = %value, "trait changed");

        self.notify(Change {
            name,
            old,
            new: value,
        })?;
        Ok(true)
    }

    /// Restores a trait to its declared default.
    pub fn reset(&self, name: &str) -> Result<bool, TraitError> {
        let default = self.spec(name)?.default_value().clone();
        self.set(name, default)
    }

    fn notify(&self, change: Change) -> Result<(), TraitError> {
        let _guard = DepthGuard::enter(&change.name)?;

        if self.0.class.has_mixin(Mixin::Confirmable) {
            confirmable::unconfirm_on_change(self, &change)?;
        }

        let observers: Vec<Observer> = self
            .0
            .observers
            .borrow()
            .iter()
            .filter(|entry| entry.names.matches(&change.name))
            .map(|entry| entry.callback.clone())
            .collect();
        for observer in observers {
            observer(&change)?;
        }
        Ok(())
    }

    /// Registers `callback` for changes of `names`.
    ///
    /// Every listed trait must already be declared.
    pub fn observe(
        &self,
        names: impl Into<Names>,
        callback: impl Fn(&Change) -> Result<(), TraitError> + 'static,
    ) -> Result<ObserverId, TraitError> {
        let names = names.into();
        if let Names::Some(list) = &names {
            for name in list {
                self.spec(name)?;
            }
        }
        let id = ObserverId(self.0.next_observer.get());
        self.0.next_observer.set(id.0 + 1);
        self.0.observers.borrow_mut().push(ObserverEntry {
            id,
            names,
            callback: Rc::new(callback),
        });
        Ok(id)
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.0.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|entry| entry.id != id);
        observers.len() != before
    }

    /// The number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.0.observers.borrow().len()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.0.values.borrow();
        f.debug_struct(self.0.class.name())
            .field("traits", &*values)
            .finish()
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter(name: &SmolStr) -> Result<Self, TraitError> {
        NOTIFICATION_DEPTH.with(|depth| {
            if depth.get() >= MAX_NOTIFICATION_DEPTH {
                return Err(TraitError::NotificationCycle {
                    name: name.clone(),
                    limit: MAX_NOTIFICATION_DEPTH,
                });
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        NOTIFICATION_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use crate::traits::TraitSpec;

    fn counter_model() -> Model {
        let class = ModelClass::builder("Counter")
            .add_trait(TraitSpec::int("x", 0))
            .add_trait(TraitSpec::int("y", 0))
            .build()
            .unwrap();
        Model::new(class)
    }

    #[test]
    fn writes_notify_in_registration_order() {
        let model = counter_model();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = log.clone();
            model
                .observe("x", move |change| {
                    log.borrow_mut().push((tag, change.new.clone()));
                    Ok(())
                })
                .unwrap();
        }

        assert!(model.set("x", 3).unwrap());
        assert_eq!(
            *log.borrow(),
            [("first", Value::Int(3)), ("second", Value::Int(3))]
        );
    }

    #[test]
    fn same_value_write_is_silent() {
        let model = counter_model();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        model
            .observe(Names::All, move |_| {
                h.set(h.get() + 1);
                Ok(())
            })
            .unwrap();

        assert!(!model.set("x", 0).unwrap());
        assert_eq!(hits.get(), 0);
        assert!(model.set("y", 1).unwrap());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn undeclared_traits_cannot_be_observed_or_written() {
        let model = counter_model();
        assert!(matches!(
            model.observe("z", |_| Ok(())),
            Err(TraitError::UnknownTrait { .. })
        ));
        assert!(matches!(
            model.set("z", 1),
            Err(TraitError::UnknownTrait { .. })
        ));
    }

    #[test]
    fn reentrant_writes_propagate_synchronously() {
        let model = counter_model();
        let weak = model.downgrade();
        model
            .observe("x", move |change| {
                let model = weak.upgrade().expect("model alive");
                model.set("y", change.new.as_int().unwrap() * 2)?;
                Ok(())
            })
            .unwrap();

        model.set("x", 4).unwrap();
        assert_eq!(model.declared::<i64>("y"), 8);
    }

    #[test]
    fn observer_cycles_are_reported() {
        let model = counter_model();
        let weak = model.downgrade();
        model
            .observe("x", move |change| {
                let model = weak.upgrade().expect("model alive");
                model.set("x", change.new.as_int().unwrap() + 1)?;
                Ok(())
            })
            .unwrap();

        let err = model.set("x", 1).unwrap_err();
        assert_eq!(
            err,
            TraitError::NotificationCycle {
                name: "x".into(),
                limit: MAX_NOTIFICATION_DEPTH
            }
        );
        // The depth counter unwinds completely.
        assert!(NOTIFICATION_DEPTH.with(Cell::get) == 0);
    }

    #[test]
    fn unobserve_stops_notifications() {
        let model = counter_model();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let id = model
            .observe("x", move |_| {
                h.set(h.get() + 1);
                Ok(())
            })
            .unwrap();
        model.set("x", 1).unwrap();
        assert!(model.unobserve(id));
        model.set("x", 2).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(!model.unobserve(id));
    }

    #[test]
    fn clones_share_identity() {
        let model = counter_model();
        let other = model.clone();
        other.set("x", 5).unwrap();
        assert!(model.ptr_eq(&other));
        assert_eq!(model.get("x").unwrap(), Value::Int(5));
        assert!(!model.ptr_eq(&counter_model()));
    }
}
