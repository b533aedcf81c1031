//! Results panel models.

use std::rc::Rc;

use qeapp_core::mixins::process::PROCESS_UUID;
use qeapp_core::mixins::{HasProcess, ProcessCache, ProcessError};
use qeapp_core::store::{ProcessNode, ProcessStore};
use qeapp_core::{
    Mixin, Model, ModelClass, ModelState, Observable, StateError, TraitError, TraitSpec, ValueMap,
};
use tracing::{debug, warn};

use crate::panel::{IDENTIFIER, Panel, panel_class};
use crate::settings::INCLUDE;

/// Name of the trait telling whether the results render without user action.
pub const AUTO_RENDER: &str = "auto_render";
/// Name of the trait holding the process status message.
pub const PROCESS_STATUS_NOTIFICATION: &str = "process_status_notification";
/// Name of the trait holding the label of the process producing the results.
pub const THIS_PROCESS_LABEL: &str = "this_process_label";

thread_local! {
    static CLASS: Rc<ModelClass> = ModelClass::builder("ResultsModel")
        .extends(&panel_class())
        .mixin(Mixin::HasProcess)
        .add_trait(TraitSpec::bool(INCLUDE, false))
        .add_trait(TraitSpec::bool(AUTO_RENDER, false))
        .add_trait(TraitSpec::unicode(PROCESS_STATUS_NOTIFICATION, ""))
        .add_trait(TraitSpec::unicode(THIS_PROCESS_LABEL, ""))
        .build()
        .expect("ResultsModel is well formed");
}

/// The class of [`ResultsModel`].
pub fn results_class() -> Rc<ModelClass> {
    CLASS.with(Rc::clone)
}

/// The results of one part of a workflow.
///
/// The panel is included when its identifier is among the properties the
/// process was asked to compute.
#[derive(Clone, Debug)]
pub struct ResultsModel {
    model: Model,
    cache: ProcessCache,
}

impl ResultsModel {
    /// A results model resolving processes through `store`.
    pub fn new(store: Rc<dyn ProcessStore>) -> Self {
        Self::from_class(store, results_class())
    }

    /// A results model of a class extending [`results_class`].
    pub fn from_class(store: Rc<dyn ProcessStore>, class: Rc<ModelClass>) -> Self {
        debug_assert!(class.has_mixin(Mixin::HasProcess));
        let results = Self {
            model: Model::new(class),
            cache: ProcessCache::new(store),
        };
        results
            .cache
            .attach(&results.model)
            .expect("ResultsModel declares process_uuid");
        let weak = results.model.downgrade();
        let cache = results.cache.clone();
        results
            .model
            .observe([PROCESS_UUID, IDENTIFIER], move |_| match weak.upgrade() {
                Some(model) => ResultsModel {
                    model,
                    cache: cache.clone(),
                }
                .update_include(),
                None => Ok(()),
            })
            .expect("ResultsModel declares its traits");
        results
    }

    /// Whether the panel is part of the workflow.
    pub fn include(&self) -> bool {
        self.model.declared(INCLUDE)
    }

    /// Whether the results render without user action.
    pub fn auto_render(&self) -> bool {
        self.model.declared(AUTO_RENDER)
    }

    /// The process status message.
    pub fn process_status_notification(&self) -> String {
        self.model.declared(PROCESS_STATUS_NOTIFICATION)
    }

    /// The label of the process producing the results. Empty for the root
    /// process.
    pub fn this_process_label(&self) -> String {
        self.model.declared(THIS_PROCESS_LABEL)
    }

    /// Sets the label of the process producing the results.
    pub fn set_this_process_label(&self, label: &str) -> Result<(), TraitError> {
        self.model.set(THIS_PROCESS_LABEL, label)?;
        Ok(())
    }

    /// Whether the process producing the results finished successfully.
    pub fn has_results(&self) -> Result<bool, ProcessError> {
        let root = self.fetch_process_node()?;
        let label = self.this_process_label();
        if label.is_empty() {
            return Ok(root.is_finished_ok());
        }
        Ok(find_called(&root, &label).is_some_and(|node| node.is_finished_ok()))
    }

    /// Refreshes `auto_render` and the status message from the process.
    pub fn update(&self) -> Result<(), ProcessError> {
        let has_results = self.has_results()?;
        let notification = if has_results {
            String::new()
        } else {
            format!("The {} results are not available yet", self.identifier())
        };
        self.model.set(AUTO_RENDER, has_results)?;
        self.model.set(PROCESS_STATUS_NOTIFICATION, notification)?;
        Ok(())
    }

    fn update_include(&self) -> Result<(), TraitError> {
        let identifier = self.identifier();
        let include = match self.properties() {
            Ok(properties) => properties.contains(&identifier),
            Err(ProcessError::Unset) => false,
            Err(ProcessError::Trait(e)) => return Err(e),
            Err(e) => {
                warn!(%identifier, error = %e, "could not read the process properties");
                false
            }
        };
        debug!(%identifier, include, "updated results inclusion");
        self.model.set(INCLUDE, include)?;
        Ok(())
    }
}

/// The first process called by `node`, at any depth, with the given label.
fn find_called(node: &Rc<dyn ProcessNode>, label: &str) -> Option<Rc<dyn ProcessNode>> {
    node.called().into_iter().find_map(|child| {
        if child.process_label() == label {
            Some(child)
        } else {
            find_called(&child, label)
        }
    })
}

impl Observable for ResultsModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl Panel for ResultsModel {}

impl HasProcess for ResultsModel {
    fn process_cache(&self) -> &ProcessCache {
        &self.cache
    }
}

impl ModelState for ResultsModel {
    fn get_model_state(&self) -> ValueMap {
        self.model.get_model_state()
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        self.model.set_model_state(state)
    }
}

#[cfg(test)]
mod test {
    use qeapp_core::Value;
    use qeapp_core::store::{MemoryStore, ProcessRecord};
    use rstest::{fixture, rstest};

    use super::*;

    struct Setup {
        store: Rc<MemoryStore>,
        model: ResultsModel,
    }

    #[fixture]
    fn setup() -> Setup {
        let store = Rc::new(MemoryStore::new());
        let model = ResultsModel::new(store.clone());
        Setup { store, model }
    }

    fn workchain(store: &MemoryStore, finished_ok: bool) -> Rc<ProcessRecord> {
        let relax = ProcessRecord::new("PwRelaxWorkChain").with_finished_ok(finished_ok);
        store.add_process(
            ProcessRecord::new("QeAppWorkChain")
                .with_input("properties", Value::list(["relax", "bands"]))
                .with_finished_ok(true)
                .with_called(Rc::new(relax)),
        )
    }

    #[rstest]
    fn include_tracks_properties(setup: Setup) {
        let Setup { store, model } = setup;
        let node = workchain(&store, true);
        model.set_process_uuid(Some(node.uuid())).unwrap();
        assert!(!model.include());

        model.model().set(IDENTIFIER, "relax").unwrap();
        assert!(model.include());
        model.model().set(IDENTIFIER, "pdos").unwrap();
        assert!(!model.include());
    }

    #[rstest]
    fn unresolvable_process_excludes(setup: Setup) {
        let model = setup.model;
        model.model().set(IDENTIFIER, "relax").unwrap();
        model.set_process_uuid(Some("missing")).unwrap();
        assert!(!model.include());
        assert!(matches!(model.update(), Err(ProcessError::NotFound { .. })));
    }

    #[rstest]
    #[case::root("", true, true)]
    #[case::child_ok("PwRelaxWorkChain", true, true)]
    #[case::child_failed("PwRelaxWorkChain", false, false)]
    #[case::missing_child("PwBandsWorkChain", true, false)]
    fn auto_render_follows_results(
        setup: Setup,
        #[case] label: &str,
        #[case] child_ok: bool,
        #[case] expected: bool,
    ) {
        let Setup { store, model } = setup;
        let node = workchain(&store, child_ok);
        model.model().set(IDENTIFIER, "relax").unwrap();
        model.set_process_uuid(Some(node.uuid())).unwrap();
        model.set_this_process_label(label).unwrap();

        model.update().unwrap();
        assert_eq!(model.has_results().unwrap(), expected);
        assert_eq!(model.auto_render(), expected);
        assert_eq!(model.process_status_notification().is_empty(), expected);
    }
}
