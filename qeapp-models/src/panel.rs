//! The base model of every app panel.

use std::rc::Rc;

use qeapp_core::{Model, ModelClass, ModelState, Observable, StateError, TraitSpec, ValueMap};

/// Name of the panel title trait.
pub const TITLE: &str = "title";
/// Name of the panel identifier trait.
pub const IDENTIFIER: &str = "identifier";

thread_local! {
    static CLASS: Rc<ModelClass> = ModelClass::builder("PanelModel")
        .add_trait(TraitSpec::unicode(TITLE, "Panel"))
        .add_trait(TraitSpec::unicode(IDENTIFIER, "panel"))
        .build()
        .expect("PanelModel is well formed");
}

/// The class of [`PanelModel`], which other panel classes extend.
pub fn panel_class() -> Rc<ModelClass> {
    CLASS.with(Rc::clone)
}

/// Accessors shared by every panel model.
pub trait Panel: Observable {
    /// The panel title.
    fn title(&self) -> String {
        self.model().declared(TITLE)
    }

    /// The identifier the panel is registered under.
    fn identifier(&self) -> String {
        self.model().declared(IDENTIFIER)
    }
}

/// A plain panel model.
#[derive(Clone, Debug)]
pub struct PanelModel {
    model: Model,
}

impl PanelModel {
    /// A new panel model.
    pub fn new() -> Self {
        Self {
            model: Model::new(panel_class()),
        }
    }
}

impl Default for PanelModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for PanelModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl Panel for PanelModel {}

impl ModelState for PanelModel {
    fn get_model_state(&self) -> ValueMap {
        self.model.get_model_state()
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        self.model.set_model_state(state)
    }
}
