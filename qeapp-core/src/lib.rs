//! Observable models and behavioural mixins for the Quantum ESPRESSO app.
//!
//! A model is a bag of named, typed, observable attributes ("traits"). Its
//! class is composed with [`ModelClass::builder`] from an ordered list of
//! [`Mixin`]s, which contribute traits and behaviour:
//!
//! - [`Confirmable`](mixins::Confirmable): a `confirmed` flag cleared by any
//!   other change,
//! - [`HasBlockers`](mixins::HasBlockers): explicit, on-demand validation
//!   reasons,
//! - [`HasModels`](mixins::HasModels): a registry of child models linked to
//!   their parent through declared dependencies,
//! - [`HasProcess`](mixins::HasProcess): lazy, cached resolution of a workflow
//!   process node from its UUID,
//! - [`HasInputStructure`](mixins::HasInputStructure): flags derived from an
//!   attached [`StructureData`].
//!
//! Every write goes through [`Model::set`], which validates, detects changes
//! and synchronously notifies observers. Persistable traits and registered
//! children serialize to a plain [`Value`] through [`ModelState`].
//!
//! ## Usage
//!
//! ```
//! use qeapp_core::{Mixin, Model, ModelClass, TraitSpec};
//! use qeapp_core::mixins::Confirmable;
//!
//! let class = ModelClass::builder("Dummy")
//!     .mixin(Mixin::Confirmable)
//!     .add_trait(TraitSpec::int("x", 0))
//!     .build()
//!     .unwrap();
//! let model = Model::new(class);
//!
//! model.confirm().unwrap();
//! assert!(model.confirmed());
//! model.set("x", 1).unwrap();
//! assert!(!model.confirmed());
//! ```

pub mod class;
pub mod link;
pub mod mixins;
pub mod model;
pub mod state;
pub mod store;
pub mod structure;
pub mod traits;
pub mod utils;
pub mod value;

pub use class::{Base, CompositionError, Mixin, ModelClass, ModelClassBuilder};
pub use link::{Link, dlink, link};
pub use model::{Model, Names, Observable, ObserverId, WeakModel};
pub use state::{ModelState, StateError};
pub use structure::{Site, StructureData};
pub use traits::{Change, TraitError, TraitKind, TraitName, TraitSpec};
pub use value::{FromValue, Object, ObjectValue, Value, ValueMap};
