//! Lazy resolution of a workflow process from its UUID.
//!
//! The process node, and its input and output namespaces, are only fetched
//! from the store on first access. The first resolution registers an observer
//! on the UUID trait, and every later change of the UUID drops the cached
//! node, so that reassigning a previous UUID goes back to the store.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use derive_more::Display;
use thiserror::Error;
use tracing::debug;

use crate::model::{Model, Observable};
use crate::store::{Namespace, ProcessNode, ProcessStore, StoreError};
use crate::traits::TraitError;
use crate::value::FromValue;

/// Name of the trait holding the process UUID.
pub const PROCESS_UUID: &str = "process_uuid";
/// Name of the counter bumped to request a refresh of process views.
pub const MONITOR_COUNTER: &str = "monitor_counter";

/// Errors raised when resolving a process.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ProcessError {
    /// No process UUID is set.
    #[error("no process UUID is set")]
    Unset,
    /// The UUID does not resolve in the store.
    #[error("process '{uuid}' could not be resolved")]
    NotFound {
        /// The unresolved UUID.
        uuid: String,
        /// The store error.
        #[source]
        source: StoreError,
    },
    /// The model does not hold a valid process UUID.
    #[error(transparent)]
    Trait(#[from] TraitError),
}

/// Where a [`HasProcess`] model stands in resolving its process.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ResolutionState {
    /// No UUID is set.
    Unset,
    /// A UUID is set but its node has not been fetched.
    Unresolved,
    /// The node for the current UUID is cached.
    Resolved,
}

struct Resolved {
    uuid: String,
    node: Rc<dyn ProcessNode>,
    inputs: OnceCell<Rc<Namespace>>,
    outputs: OnceCell<Rc<Namespace>>,
}

/// The store handle and the cached resolution of a [`HasProcess`] model.
#[derive(Clone)]
pub struct ProcessCache {
    store: Rc<dyn ProcessStore>,
    cached: Rc<RefCell<Option<Rc<Resolved>>>>,
    tracking: Rc<Cell<bool>>,
}

impl ProcessCache {
    /// An empty cache resolving through `store`.
    pub fn new(store: Rc<dyn ProcessStore>) -> Self {
        Self {
            store,
            cached: Rc::default(),
            tracking: Rc::default(),
        }
    }

    /// The store processes are resolved through.
    pub fn store(&self) -> &Rc<dyn ProcessStore> {
        &self.store
    }

    /// Drops the cached resolution.
    pub fn invalidate(&self) {
        self.cached.replace(None);
    }

    /// Drops the cached resolution whenever the UUID of `model` changes.
    ///
    /// Resolution attaches the cache on first use. Models whose own UUID
    /// observers resolve the process attach it beforehand, so that the cache
    /// is cleared before those observers run.
    pub fn attach(&self, model: &Model) -> Result<(), TraitError> {
        if self.tracking.get() {
            return Ok(());
        }
        let cached = self.cached.clone();
        model.observe(PROCESS_UUID, move |_| {
            cached.replace(None);
            Ok(())
        })?;
        self.tracking.set(true);
        Ok(())
    }

    fn resolve(&self, model: &Model, uuid: &str) -> Result<Rc<Resolved>, ProcessError> {
        self.attach(model)?;
        if let Some(cached) = self.cached.borrow().as_ref().filter(|c| c.uuid == uuid) {
            return Ok(cached.clone());
        }
        self.invalidate();
        let node = self
            .store
            .get_node_by_uuid(uuid)
            .map_err(|source| ProcessError::NotFound {
                uuid: uuid.to_owned(),
                source,
            })?;
        debug!(uuid, label = node.process_label(), "resolved process node");
        let resolved = Rc::new(Resolved {
            uuid: uuid.to_owned(),
            node,
            inputs: OnceCell::new(),
            outputs: OnceCell::new(),
        });
        self.cached.replace(Some(resolved.clone()));
        Ok(resolved)
    }

    fn is_resolved(&self, uuid: &str) -> bool {
        self.cached
            .borrow()
            .as_ref()
            .is_some_and(|cached| cached.uuid == uuid)
    }
}

impl fmt::Debug for ProcessCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.cached.borrow();
        f.debug_struct("ProcessCache")
            .field("resolved", &cached.as_ref().map(|c| c.uuid.as_str()))
            .finish_non_exhaustive()
    }
}

/// Models tracking a workflow process.
///
/// The class must include [`Mixin::HasProcess`](crate::Mixin::HasProcess).
pub trait HasProcess: Observable {
    /// The cache backing process resolution.
    fn process_cache(&self) -> &ProcessCache;

    /// The process UUID, if one is set.
    fn process_uuid(&self) -> Option<String> {
        self.model()
            .declared::<Option<String>>(PROCESS_UUID)
            .filter(|uuid| !uuid.is_empty())
    }

    /// Sets or clears the process UUID.
    fn set_process_uuid(&self, uuid: Option<&str>) -> Result<(), TraitError> {
        self.model().set(PROCESS_UUID, uuid)?;
        Ok(())
    }

    /// Whether a process UUID is set. The UUID may not resolve.
    fn has_process(&self) -> bool {
        self.process_uuid().is_some()
    }

    /// Where the model stands in resolving its process.
    fn resolution_state(&self) -> ResolutionState {
        match self.process_uuid() {
            None => ResolutionState::Unset,
            Some(uuid) if self.process_cache().is_resolved(&uuid) => ResolutionState::Resolved,
            Some(_) => ResolutionState::Unresolved,
        }
    }

    /// Resolves the process node, fetching it from the store if needed.
    fn fetch_process_node(&self) -> Result<Rc<dyn ProcessNode>, ProcessError> {
        let uuid = self.process_uuid().ok_or(ProcessError::Unset)?;
        Ok(self.process_cache().resolve(self.model(), &uuid)?.node.clone())
    }

    /// The process inputs, fetched on first access.
    fn inputs(&self) -> Result<Rc<Namespace>, ProcessError> {
        let uuid = self.process_uuid().ok_or(ProcessError::Unset)?;
        let resolved = self.process_cache().resolve(self.model(), &uuid)?;
        Ok(resolved
            .inputs
            .get_or_init(|| Rc::new(resolved.node.inputs()))
            .clone())
    }

    /// The process outputs, fetched on first access.
    fn outputs(&self) -> Result<Rc<Namespace>, ProcessError> {
        let uuid = self.process_uuid().ok_or(ProcessError::Unset)?;
        let resolved = self.process_cache().resolve(self.model(), &uuid)?;
        Ok(resolved
            .outputs
            .get_or_init(|| Rc::new(resolved.node.outputs()))
            .clone())
    }

    /// The properties requested from the process, read from its
    /// `properties` input.
    fn properties(&self) -> Result<Vec<String>, ProcessError> {
        let inputs = self.inputs()?;
        Ok(inputs
            .get("properties")
            .and_then(Vec::<String>::from_value)
            .unwrap_or_default())
    }

    /// Asks observers of the process views to refresh.
    fn bump_monitor_counter(&self) -> Result<(), TraitError> {
        let counter: i64 = self.model().declared(MONITOR_COUNTER);
        self.model().set(MONITOR_COUNTER, counter + 1)?;
        Ok(())
    }
}
