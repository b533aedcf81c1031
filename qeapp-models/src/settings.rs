//! Settings panel models.

use std::cell::RefCell;
use std::rc::Rc;

use qeapp_core::mixins::Confirmable;
use qeapp_core::{
    Mixin, Model, ModelClass, ModelState, Observable, StateError, TraitError, TraitSpec, Value,
    ValueMap,
};
use tracing::debug;

use crate::panel::{Panel, panel_class};

/// Name of the trait telling whether the panel is part of the workflow.
pub const INCLUDE: &str = "include";
/// Name of the trait telling whether the settings were loaded from a process.
pub const LOADED_FROM_PROCESS: &str = "loaded_from_process";

thread_local! {
    static SETTINGS: Rc<ModelClass> = ModelClass::builder("SettingsModel")
        .extends(&panel_class())
        .add_trait(TraitSpec::bool(INCLUDE, false))
        .add_trait(TraitSpec::bool(LOADED_FROM_PROCESS, false))
        .build()
        .expect("SettingsModel is well formed");

    static CONFIGURATION: Rc<ModelClass> = ModelClass::builder("ConfigurationSettingsModel")
        .extends(&settings_class())
        .mixin(Mixin::Confirmable)
        .build()
        .expect("ConfigurationSettingsModel is well formed");
}

/// The class of [`SettingsModel`].
pub fn settings_class() -> Rc<ModelClass> {
    SETTINGS.with(Rc::clone)
}

/// The class of [`ConfigurationSettingsModel`].
pub fn configuration_settings_class() -> Rc<ModelClass> {
    CONFIGURATION.with(Rc::clone)
}

/// Behaviour shared by settings panel models.
pub trait Settings: Panel {
    /// Whether the panel is part of the workflow.
    fn include(&self) -> bool {
        self.model().declared(INCLUDE)
    }

    /// Includes or excludes the panel.
    fn set_include(&self, include: bool) -> Result<(), TraitError> {
        self.model().set(INCLUDE, include)?;
        Ok(())
    }

    /// Whether the settings were loaded from a previous process.
    fn loaded_from_process(&self) -> bool {
        self.model().declared(LOADED_FROM_PROCESS)
    }

    /// Refreshes derived settings. `specific` optionally narrows what to
    /// refresh.
    fn update(&self, _specific: &str) -> Result<(), TraitError> {
        Ok(())
    }
}

/// A plain settings model.
#[derive(Clone, Debug)]
pub struct SettingsModel {
    model: Model,
}

impl SettingsModel {
    /// A new settings model.
    pub fn new() -> Self {
        Self {
            model: Model::new(settings_class()),
        }
    }
}

impl Default for SettingsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for SettingsModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl Panel for SettingsModel {}
impl Settings for SettingsModel {}

impl ModelState for SettingsModel {
    fn get_model_state(&self) -> ValueMap {
        self.model.get_model_state()
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        self.model.set_model_state(state)
    }
}

/// A confirmable settings model with per-instance defaults.
#[derive(Clone, Debug)]
pub struct ConfigurationSettingsModel {
    model: Model,
    defaults: Rc<RefCell<ValueMap>>,
}

impl ConfigurationSettingsModel {
    /// A new configuration settings model.
    pub fn new() -> Self {
        Self::from_class(configuration_settings_class())
    }

    /// A configuration settings model of a class extending
    /// [`configuration_settings_class`].
    pub fn from_class(class: Rc<ModelClass>) -> Self {
        debug_assert!(class.has_mixin(Mixin::Confirmable));
        Self {
            model: Model::new(class),
            defaults: Rc::default(),
        }
    }

    /// The instance defaults overriding the class defaults.
    pub fn defaults(&self) -> ValueMap {
        self.defaults.borrow().clone()
    }

    /// Overrides the default of `name` for this instance.
    pub fn set_default(&self, name: &str, value: impl Into<Value>) -> Result<(), TraitError> {
        let class = self.model.class();
        let spec = class.get_trait(name).ok_or_else(|| TraitError::UnknownTrait {
            class: class.name().into(),
            name: name.into(),
        })?;
        let value = spec.validate(class.name(), value.into())?;
        self.defaults.borrow_mut().insert(name.to_owned(), value);
        Ok(())
    }

    /// The default of `name`: the instance default if set, else the class
    /// default.
    pub fn get_default(&self, name: &str) -> Result<Value, TraitError> {
        if let Some(value) = self.defaults.borrow().get(name) {
            return Ok(value.clone());
        }
        let class = self.model.class();
        class
            .get_trait(name)
            .map(|spec| spec.default_value().clone())
            .ok_or_else(|| TraitError::UnknownTrait {
                class: class.name().into(),
                name: name.into(),
            })
    }

    /// Restores every persistable trait to its default.
    pub fn reset(&self) -> Result<(), TraitError> {
        let names: Vec<_> = self
            .model
            .class()
            .traits()
            .filter(|spec| spec.is_persistent())
            .map(|spec| spec.name().clone())
            .collect();
        debug!(model = self.model.class().name(), traits = names.len(), "resetting settings");
        for name in names {
            self.model.set(&name, self.get_default(&name)?)?;
        }
        Ok(())
    }
}

impl Default for ConfigurationSettingsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for ConfigurationSettingsModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl Panel for ConfigurationSettingsModel {}
impl Settings for ConfigurationSettingsModel {}
impl Confirmable for ConfigurationSettingsModel {}

impl ModelState for ConfigurationSettingsModel {
    fn get_model_state(&self) -> ValueMap {
        self.model.get_model_state()
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        self.model.set_model_state(state)
    }
}
