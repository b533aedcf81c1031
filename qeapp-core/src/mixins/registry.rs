//! A registry of named child models.
//!
//! Registering a child links each of its declared dependencies one way from
//! the parent (or, for a dotted `sibling.trait` dependency, from an already
//! registered sibling) to the child's trait of the same name. The child takes
//! the current value immediately and follows every later change.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::link::{Link, dlink};
use crate::model::{Model, Observable};
use crate::state::{ModelState, StateError};
use crate::traits::TraitError;
use crate::value::{Value, ValueMap};

/// Errors raised by a [`HasModels`] registry.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum RegistryError {
    /// A model is already registered under the key.
    #[error("a model is already registered under '{0}'")]
    DuplicateKey(SmolStr),
    /// No model is registered under the key.
    #[error("no model registered under '{0}'")]
    KeyNotFound(SmolStr),
    /// Linking a dependency failed.
    #[error(transparent)]
    Trait(#[from] TraitError),
}

struct Entry<T> {
    model: T,
    links: Vec<Link>,
}

/// The child models of a [`HasModels`] parent, in registration order.
///
/// Clones share the same registry.
pub struct ModelRegistry<T> {
    entries: Rc<RefCell<IndexMap<SmolStr, Entry<T>>>>,
}

impl<T> Default for ModelRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Rc::default(),
        }
    }
}

impl<T> Clone for ModelRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> fmt::Debug for ModelRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.borrow().keys())
            .finish()
    }
}

/// A non-owning handle to a [`ModelRegistry`], for observers installed on
/// the registered children.
pub struct WeakModelRegistry<T> {
    entries: Weak<RefCell<IndexMap<SmolStr, Entry<T>>>>,
}

impl<T> Clone for WeakModelRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> WeakModelRegistry<T> {
    /// The registry, if it is still alive.
    pub fn upgrade(&self) -> Option<ModelRegistry<T>> {
        self.entries.upgrade().map(|entries| ModelRegistry { entries })
    }
}

impl<T: Clone> ModelRegistry<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A non-owning handle to the registry.
    pub fn downgrade(&self) -> WeakModelRegistry<T> {
        WeakModelRegistry {
            entries: Rc::downgrade(&self.entries),
        }
    }

    /// Whether a model is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// The model registered under `key`.
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.borrow().get(key).map(|e| e.model.clone())
    }

    /// The registration keys, in order.
    pub fn keys(&self) -> Vec<SmolStr> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// The registered models with their keys, in order.
    pub fn models(&self) -> Vec<(SmolStr, T)> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, e)| (key.clone(), e.model.clone()))
            .collect()
    }

    /// The number of registered models.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// The dependency links established for the model under `key`.
    pub fn links(&self, key: &str) -> Vec<Link> {
        self.entries
            .borrow()
            .get(key)
            .map(|e| e.links.clone())
            .unwrap_or_default()
    }

    /// Unregisters the model under `key`, removing its dependency links.
    pub fn remove(&self, key: &str) -> Option<T> {
        let entry = self.entries.borrow_mut().shift_remove(key)?;
        entry.links.iter().for_each(Link::unlink);
        Some(entry.model)
    }

    fn insert(&self, key: SmolStr, model: T, links: Vec<Link>) {
        self.entries
            .borrow_mut()
            .insert(key, Entry { model, links });
    }
}

/// Models owning a registry of child models of type `T`.
///
/// The class should include [`Mixin::HasModels`](crate::Mixin::HasModels).
/// Keys are unique: registering under a taken key is an error, and a key
/// addresses the same child for the lifetime of the parent.
pub trait HasModels<T>: Observable
where
    T: Observable + Clone,
{
    /// The key nesting the children's states in the parent's model state.
    const MODELS_STATE_KEY: &'static str = "models";

    /// The registry of child models.
    fn registry(&self) -> &ModelRegistry<T>;

    /// Called after `model` has been registered and linked. If it fails, the
    /// model is unregistered and unlinked again before the error is returned.
    fn on_model_added(&self, _key: &str, _model: &T) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Registers `model` under `key` and links its dependencies.
    fn add_model(&self, key: impl Into<SmolStr>, model: T) -> Result<(), RegistryError>
    where
        Self: Sized,
    {
        let key = key.into();
        if self.registry().contains(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        let links = link_dependencies(self, model.model())?;
        debug!(
            parent = self.model().class().name(),
            %key,
            links = links.len(),
            "registered model"
        );
        self.registry().insert(key.clone(), model.clone(), links);
        if let Err(e) = self.on_model_added(&key, &model) {
            warn!(
                parent = self.model().class().name(),
                %key,
                error = %e,
                "unregistering model"
            );
            self.registry().remove(&key);
            return Err(e);
        }
        Ok(())
    }

    /// Registers several models, in order.
    fn add_models<K: Into<SmolStr>>(
        &self,
        models: impl IntoIterator<Item = (K, T)>,
    ) -> Result<(), RegistryError>
    where
        Self: Sized,
    {
        for (key, model) in models {
            self.add_model(key, model)?;
        }
        Ok(())
    }

    /// Whether a model is registered under `key`.
    fn has_model(&self, key: &str) -> bool {
        self.registry().contains(key)
    }

    /// The model registered under `key`.
    fn get_model(&self, key: &str) -> Result<T, RegistryError> {
        self.registry()
            .get(key)
            .ok_or_else(|| RegistryError::KeyNotFound(key.into()))
    }

    /// The registered models with their keys, in registration order.
    fn get_models(&self) -> Vec<(SmolStr, T)> {
        self.registry().models()
    }

    /// The states of every registered model, keyed by registration key.
    fn models_state(&self) -> ValueMap
    where
        T: ModelState,
    {
        self.get_models()
            .into_iter()
            .map(|(key, model)| (key.to_string(), Value::Dict(model.get_model_state())))
            .collect()
    }

    /// Applies child states to the models registered under the same keys.
    ///
    /// States for unregistered keys are ignored.
    fn set_models_state(&self, state: &ValueMap) -> Result<(), StateError>
    where
        T: ModelState,
    {
        for (key, child_state) in state {
            let Some(model) = self.registry().get(key) else {
                warn!(
                    parent = self.model().class().name(),
                    key, "ignoring state of unregistered model"
                );
                continue;
            };
            let child_state = child_state
                .as_dict()
                .ok_or_else(|| StateError::shape(key, "a dict", child_state))?;
            model.set_model_state(child_state)?;
        }
        Ok(())
    }
}

fn link_dependencies<P, T>(parent: &P, child: &Model) -> Result<Vec<Link>, RegistryError>
where
    P: HasModels<T> + ?Sized,
    T: Observable + Clone,
{
    let mut links = Vec::new();
    for dependency in child.class().dependencies() {
        match link_dependency(parent, child, dependency) {
            Ok(Some(link)) => links.push(link),
            Ok(None) => {}
            Err(e) => {
                links.iter().for_each(Link::unlink);
                return Err(e);
            }
        }
    }
    Ok(links)
}

fn link_dependency<P, T>(
    parent: &P,
    child: &Model,
    dependency: &SmolStr,
) -> Result<Option<Link>, RegistryError>
where
    P: HasModels<T> + ?Sized,
    T: Observable + Clone,
{
    let (source, name) = match dependency.rsplit_once('.') {
        Some((sibling, name)) => (parent.get_model(sibling)?.model().clone(), name),
        None => (parent.model().clone(), dependency.as_str()),
    };
    if !source.has_trait(name) {
        debug!(
            source = source.class().name(),
            %dependency,
            "dependency not declared by source, not linking"
        );
        return Ok(None);
    }
    Ok(Some(dlink((&source, name), (child, name))?))
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::class::{Mixin, ModelClass};
    use crate::traits::TraitSpec;

    #[derive(Clone)]
    struct Child(Model);

    impl Observable for Child {
        fn model(&self) -> &Model {
            &self.0
        }
    }

    impl ModelState for Child {
        fn get_model_state(&self) -> ValueMap {
            self.0.get_model_state()
        }

        fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
            self.0.set_model_state(state)
        }
    }

    fn child(dependencies: &[&str]) -> Child {
        let class = ModelClass::builder("Child")
            .add_trait(TraitSpec::int("b", 0).persistent())
            .add_trait(TraitSpec::int("a", 0).persistent())
            .dependencies(dependencies.iter().copied())
            .build()
            .unwrap();
        Child(Model::new(class))
    }

    struct Parent {
        model: Model,
        registry: ModelRegistry<Child>,
        added: RefCell<Vec<String>>,
        rejects: Option<&'static str>,
    }

    impl Observable for Parent {
        fn model(&self) -> &Model {
            &self.model
        }
    }

    impl HasModels<Child> for Parent {
        const MODELS_STATE_KEY: &'static str = "children";

        fn registry(&self) -> &ModelRegistry<Child> {
            &self.registry
        }

        fn on_model_added(&self, key: &str, _model: &Child) -> Result<(), RegistryError> {
            if self.rejects == Some(key) {
                return Err(RegistryError::KeyNotFound(key.into()));
            }
            self.added.borrow_mut().push(key.to_owned());
            Ok(())
        }
    }

    #[fixture]
    fn parent() -> Parent {
        new_parent()
    }

    fn new_parent() -> Parent {
        let class = ModelClass::builder("Parent")
            .mixin(Mixin::HasModels)
            .add_trait(TraitSpec::int("b", 5))
            .build()
            .unwrap();
        Parent {
            model: Model::new(class),
            registry: ModelRegistry::new(),
            added: RefCell::default(),
            rejects: None,
        }
    }

    #[rstest]
    fn registration_and_lookup(parent: Parent) {
        assert!(!parent.has_model("child"));
        let c = child(&["b"]);
        parent.add_model("child", c.clone()).unwrap();
        assert!(parent.has_model("child"));
        assert!(parent.get_model("child").unwrap().0.ptr_eq(&c.0));

        let (c1, c2) = (child(&[]), child(&[]));
        parent
            .add_models([("child1", c1.clone()), ("child2", c2.clone())])
            .unwrap();
        assert!(parent.get_model("child1").unwrap().0.ptr_eq(&c1.0));
        assert!(parent.get_model("child2").unwrap().0.ptr_eq(&c2.0));
        assert_eq!(parent.registry().keys(), ["child", "child1", "child2"]);
        assert_eq!(*parent.added.borrow(), ["child", "child1", "child2"]);

        assert_eq!(
            parent.get_model("nonexistent").err(),
            Some(RegistryError::KeyNotFound("nonexistent".into()))
        );
    }

    #[rstest]
    fn duplicate_keys_are_rejected(parent: Parent) {
        let first = child(&[]);
        parent.add_model("child", first.clone()).unwrap();
        assert_eq!(
            parent.add_model("child", child(&[])).err(),
            Some(RegistryError::DuplicateKey("child".into()))
        );
        assert!(parent.get_model("child").unwrap().0.ptr_eq(&first.0));
    }

    #[rstest]
    fn dependencies_follow_the_parent(parent: Parent) {
        let c = child(&["b"]);
        parent.add_model("child", c.clone()).unwrap();
        assert_eq!(c.0.declared::<i64>("b"), 5);
        parent.model.set("b", 7).unwrap();
        assert_eq!(c.0.declared::<i64>("b"), 7);
        assert_eq!(parent.registry().links("child").len(), 1);
    }

    #[test]
    fn failed_hook_unregisters_and_unlinks() {
        let parent = Parent {
            rejects: Some("rejected"),
            ..new_parent()
        };
        let c = child(&["b"]);
        assert_eq!(
            parent.add_model("rejected", c.clone()).err(),
            Some(RegistryError::KeyNotFound("rejected".into()))
        );
        assert!(!parent.has_model("rejected"));
        assert!(parent.registry().links("rejected").is_empty());

        assert_eq!(c.0.declared::<i64>("b"), 5);
        parent.model.set("b", 9).unwrap();
        assert_eq!(c.0.declared::<i64>("b"), 5);

        parent.add_model("accepted", c.clone()).unwrap();
        assert_eq!(c.0.declared::<i64>("b"), 9);
        assert_eq!(parent.registry().remove("accepted").map(|m| m.0.ptr_eq(&c.0)), Some(true));
        parent.model.set("b", 1).unwrap();
        assert_eq!(c.0.declared::<i64>("b"), 9);
    }

    #[rstest]
    fn dotted_dependencies_follow_a_sibling(parent: Parent) {
        let source = child(&[]);
        source.0.set("a", 3).unwrap();
        parent.add_model("source", source.clone()).unwrap();

        let follower = child(&["source.a"]);
        parent.add_model("follower", follower.clone()).unwrap();
        assert_eq!(follower.0.declared::<i64>("a"), 3);
        source.0.set("a", 4).unwrap();
        assert_eq!(follower.0.declared::<i64>("a"), 4);

        assert_eq!(
            parent.add_model("orphan", child(&["missing.a"])).err(),
            Some(RegistryError::KeyNotFound("missing".into()))
        );
        assert!(!parent.has_model("orphan"));
    }

    #[rstest]
    fn models_state_round_trips(parent: Parent) {
        let c = child(&[]);
        c.0.set("a", 2).unwrap();
        parent.add_model("child", c).unwrap();
        let state = parent.models_state();
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({"child": {"b": 0, "a": 2}})
        );

        let other = parent_with_child();
        other.set_models_state(&state).unwrap();
        assert_eq!(other.models_state(), state);
    }

    #[rstest]
    fn weak_registry_does_not_keep_models_alive(parent: Parent) {
        parent.add_model("child", child(&[])).unwrap();
        let weak = parent.registry().downgrade();
        assert_eq!(weak.upgrade().map(|r| r.len()), Some(1));
        drop(parent);
        assert!(weak.upgrade().is_none());
    }

    fn parent_with_child() -> Parent {
        let p = new_parent();
        p.add_model("child", child(&[])).unwrap();
        p
    }
}
