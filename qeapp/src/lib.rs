//! Model layer of the Quantum ESPRESSO AiiDAlab app.
//!
//! The app is organised as panels, each backed by an observable model. A
//! model is a set of named, validated attributes ("traits") that notify
//! observers synchronously on every change. Model classes are composed from
//! reusable mixins:
//!
//! - [`Confirmable`](mixins::Confirmable): a confirmation flag that any other
//!   change clears;
//! - [`HasBlockers`](mixins::HasBlockers): reasons blocking submission,
//!   recomputed on demand;
//! - [`HasModels`](mixins::HasModels): named child models linked to their
//!   parent through declared dependencies;
//! - [`HasProcess`](mixins::HasProcess): a workflow process resolved lazily
//!   from its UUID;
//! - [`HasInputStructure`](mixins::HasInputStructure): flags derived from the
//!   input structure.
//!
//! Model state serializes to plain nested dictionaries through
//! [`ModelState`], which is how the app stores and restores its panels.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use qeapp::mixins::{Confirmable, HasModels};
//! use qeapp::store::{ComputerRecord, MemoryStore};
//! use qeapp::{AppConfig, ModelState, PwCodeModel, ResourceSettingsModel};
//!
//! let store = Rc::new(MemoryStore::new());
//! let computer = Rc::new(ComputerRecord::new("localhost", "core.direct"));
//! store.add_code("pw", "quantumespresso.pw", "aiida@localhost", computer);
//!
//! let resources = ResourceSettingsModel::new(Rc::new(AppConfig::default()));
//! let pw = PwCodeModel::new(store.clone());
//! resources.add_model("quantumespresso__pw", pw.clone().into()).unwrap();
//! pw.activate().unwrap();
//!
//! resources.confirm().unwrap();
//! assert!(resources.confirmed());
//!
//! let restored = ResourceSettingsModel::new(Rc::new(AppConfig::default()));
//! let restored_pw = PwCodeModel::new(store);
//! restored.add_model("quantumespresso__pw", restored_pw.clone().into()).unwrap();
//! restored_pw.activate().unwrap();
//! restored.set_model_state(&resources.get_model_state()).unwrap();
//! assert_eq!(restored.get_model_state(), resources.get_model_state());
//! ```

// These modules are re-exported as-is.
pub use qeapp_core::{class, link, mixins, model, state, store, structure, traits, utils, value};
pub use qeapp_models::{calculation, code, config, panel, resources, results, settings};

// Top-level re-exports for convenience.
pub use qeapp_core::{
    Mixin, Model, ModelClass, ModelState, Observable, StateError, StructureData, TraitError,
    TraitSpec, Value, ValueMap, dlink,
};
pub use qeapp_models::{
    AppConfig, CodeModel, ConfigurationSettingsModel, PanelModel, PluginResourceSettingsModel,
    PwCodeModel, ResourceSettingsModel, ResultsModel, SettingsModel,
};
