//! Behavioural mixins.
//!
//! Each mixin pairs a [`Mixin`](crate::Mixin) tag, which contributes the
//! mixin's traits to a [`ModelClass`](crate::ModelClass), with a Rust trait
//! implemented by the concrete model handle to expose the behaviour.

pub mod blockers;
pub mod confirmable;
pub mod process;
pub mod registry;
pub mod structure;

pub use blockers::HasBlockers;
pub use confirmable::Confirmable;
pub use process::{HasProcess, ProcessCache, ProcessError, ResolutionState};
pub use registry::{HasModels, ModelRegistry, RegistryError, WeakModelRegistry};
pub use structure::HasInputStructure;
