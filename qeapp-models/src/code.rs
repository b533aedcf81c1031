//! Models of the codes a workflow runs and the resources they request.
//!
//! A [`CodeModel`] offers the installed codes matching its calculation plugin,
//! tracks the selected one, and holds the requested resources. Its state uses
//! the keys `code`, `nodes`, `cpus`, `ntasks_per_node`, `cpus_per_task` and
//! `max_wallclock_seconds`; a `pw.x` model ([`PwCodeModel`]) adds
//! `parallelization`.

use std::ops::Deref;
use std::rc::Rc;

use qeapp_core::store::{CodeQuery, CodeRecord, CodeStore};
use qeapp_core::{
    Model, ModelClass, ModelState, Observable, StateError, TraitError, TraitSpec, Value, ValueMap,
};
use tracing::{debug, warn};

use crate::config::ResourceDefaults;

/// Name of the trait listing the offered codes as `[label, uuid]` pairs.
pub const OPTIONS: &str = "options";
/// Name of the trait holding the UUID of the selected code.
pub const SELECTED: &str = "selected";
/// Name of the number-of-machines trait.
pub const NUM_NODES: &str = "num_nodes";
/// Name of the number-of-CPUs trait.
pub const NUM_CPUS: &str = "num_cpus";
/// Name of the MPI-tasks-per-machine trait.
pub const NTASKS_PER_NODE: &str = "ntasks_per_node";
/// Name of the CPUs-per-task trait.
pub const CPUS_PER_TASK: &str = "cpus_per_task";
/// Name of the wall-clock limit trait.
pub const MAX_WALLCLOCK_SECONDS: &str = "max_wallclock_seconds";
/// Name of the trait telling whether the resources were overridden locally.
pub const OVERRIDE: &str = "override";
/// Name of the trait telling whether the code is used by the workflow.
pub const IS_ACTIVE: &str = "is_active";
/// Name of the trait telling whether a view renders the code.
pub const IS_RENDERED: &str = "is_rendered";
/// Name of the trait allowing hidden codes among the options.
pub const ALLOW_HIDDEN_CODES: &str = "allow_hidden_codes";
/// Name of the trait allowing codes on disabled computers among the options.
pub const ALLOW_DISABLED_COMPUTERS: &str = "allow_disabled_computers";
/// Name of the trait enabling explicit `pw.x` parallelization.
pub const PARALLELIZATION_OVERRIDE: &str = "parallelization_override";
/// Name of the `pw.x` pool count trait.
pub const NPOOL: &str = "npool";

const PARALLELIZATION: &str = "parallelization";

thread_local! {
    static CODE: Rc<ModelClass> = ModelClass::builder("CodeModel")
        .add_traits([
            TraitSpec::list(OPTIONS),
            TraitSpec::optional_unicode(SELECTED),
            TraitSpec::int(NUM_NODES, 1).with_min(1),
            TraitSpec::int(NUM_CPUS, 1).with_min(1),
            TraitSpec::int(NTASKS_PER_NODE, 1).with_min(1),
            TraitSpec::int(CPUS_PER_TASK, 1).with_min(1),
            TraitSpec::int(MAX_WALLCLOCK_SECONDS, 12 * 3600).with_min(1),
            TraitSpec::bool(OVERRIDE, false),
            TraitSpec::bool(IS_ACTIVE, false),
            TraitSpec::bool(IS_RENDERED, false),
            TraitSpec::bool(ALLOW_HIDDEN_CODES, false),
            TraitSpec::bool(ALLOW_DISABLED_COMPUTERS, false),
        ])
        .build()
        .expect("CodeModel is well formed");

    static PW_CODE: Rc<ModelClass> = ModelClass::builder("PwCodeModel")
        .extends(&code_class())
        .add_trait(TraitSpec::bool(PARALLELIZATION_OVERRIDE, false))
        .add_trait(TraitSpec::int(NPOOL, 1).with_min(1))
        .build()
        .expect("PwCodeModel is well formed");
}

/// The class of [`CodeModel`].
pub fn code_class() -> Rc<ModelClass> {
    CODE.with(Rc::clone)
}

/// The class of [`PwCodeModel`].
pub fn pw_code_class() -> Rc<ModelClass> {
    PW_CODE.with(Rc::clone)
}

/// Describes the code a [`CodeModel`] selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeInfo {
    /// Short name, e.g. `pw.x`.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// The calculation plugin the code must run, e.g. `quantumespresso.pw`.
    pub default_calc_job_plugin: String,
}

impl CodeInfo {
    /// Describes a code.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        default_calc_job_plugin: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_calc_job_plugin: default_calc_job_plugin.into(),
        }
    }
}

/// The flavour of a [`CodeModel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// Any code.
    Generic,
    /// `pw.x`, with explicit parallelization.
    Pw,
}

/// A code selection with its requested resources.
///
/// Clones share the same model.
#[derive(Clone)]
pub struct CodeModel {
    model: Model,
    store: Rc<dyn CodeStore>,
    info: Rc<CodeInfo>,
    kind: CodeKind,
}

impl CodeModel {
    /// A generic code model.
    pub fn new(store: Rc<dyn CodeStore>, info: CodeInfo) -> Self {
        Self::with_kind(store, info, CodeKind::Generic, code_class())
    }

    fn with_kind(
        store: Rc<dyn CodeStore>,
        info: CodeInfo,
        kind: CodeKind,
        class: Rc<ModelClass>,
    ) -> Self {
        let model = Model::new(class);
        let weak = model.downgrade();
        model
            .observe(NUM_CPUS, move |change| {
                let Some(model) = weak.upgrade() else {
                    return Ok(());
                };
                model.set(NTASKS_PER_NODE, change.new.clone())?;
                Ok(())
            })
            .expect("CodeModel declares num_cpus");
        Self {
            model,
            store,
            info: Rc::new(info),
            kind,
        }
    }

    /// Applies default resources.
    pub fn with_resources(self, defaults: &ResourceDefaults) -> Result<Self, TraitError> {
        self.model.set(NUM_NODES, defaults.nodes)?;
        self.model.set(NTASKS_PER_NODE, defaults.ntasks_per_node)?;
        self.model.set(CPUS_PER_TASK, defaults.cpus_per_task)?;
        self.model
            .set(MAX_WALLCLOCK_SECONDS, defaults.max_wallclock_seconds)?;
        Ok(self)
    }

    /// Returns `true` if both handles address the same model.
    pub fn ptr_eq(&self, other: &CodeModel) -> bool {
        self.model.ptr_eq(&other.model)
    }

    /// The code description.
    pub fn info(&self) -> &CodeInfo {
        &self.info
    }

    /// The short code name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The calculation plugin the code runs.
    pub fn default_calc_job_plugin(&self) -> &str {
        &self.info.default_calc_job_plugin
    }

    /// The flavour of the model.
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    /// The offered codes, as `(label, uuid)` pairs.
    pub fn options(&self) -> Vec<(String, String)> {
        self.model
            .declared::<Vec<Value>>(OPTIONS)
            .iter()
            .filter_map(|option| match option.as_list()? {
                [label, uuid] => Some((label.as_str()?.to_owned(), uuid.as_str()?.to_owned())),
                _ => None,
            })
            .collect()
    }

    /// The UUID of the first offered code.
    pub fn first_option(&self) -> Option<String> {
        self.options().into_iter().next().map(|(_, uuid)| uuid)
    }

    /// The UUID of the selected code.
    pub fn selected(&self) -> Option<String> {
        self.model.declared(SELECTED)
    }

    /// Selects a code by UUID, or clears the selection.
    pub fn set_selected(&self, uuid: Option<&str>) -> Result<(), TraitError> {
        self.model.set(SELECTED, uuid)?;
        Ok(())
    }

    /// The selected code.
    pub fn code(&self) -> Option<Rc<CodeRecord>> {
        let uuid = self.selected()?;
        self.store.load_code(&uuid).ok()
    }

    /// Number of machines.
    pub fn num_nodes(&self) -> i64 {
        self.model.declared(NUM_NODES)
    }

    /// Number of CPUs.
    pub fn num_cpus(&self) -> i64 {
        self.model.declared(NUM_CPUS)
    }

    /// Number of MPI tasks per machine.
    pub fn ntasks_per_node(&self) -> i64 {
        self.model.declared(NTASKS_PER_NODE)
    }

    /// Number of CPUs per MPI task.
    pub fn cpus_per_task(&self) -> i64 {
        self.model.declared(CPUS_PER_TASK)
    }

    /// Wall-clock limit, in seconds.
    pub fn max_wallclock_seconds(&self) -> i64 {
        self.model.declared(MAX_WALLCLOCK_SECONDS)
    }

    /// Whether the code is used by the workflow.
    pub fn is_active(&self) -> bool {
        self.model.declared(IS_ACTIVE)
    }

    /// Whether a view renders the code.
    pub fn is_rendered(&self) -> bool {
        self.model.declared(IS_RENDERED)
    }

    /// Marks the code as used by the workflow.
    pub fn activate(&self) -> Result<(), TraitError> {
        self.model.set(IS_ACTIVE, true)?;
        Ok(())
    }

    /// Marks the code as unused.
    pub fn deactivate(&self) -> Result<(), TraitError> {
        self.model.set(IS_ACTIVE, false)?;
        Ok(())
    }

    /// Whether the code is active and a code is selected.
    pub fn is_ready(&self) -> bool {
        self.is_active() && self.selected().is_some()
    }

    /// Loads the options of `user_email` if none are loaded yet, and selects
    /// the first option if nothing valid is selected.
    pub fn update(&self, user_email: &str) -> Result<(), TraitError> {
        self.load_options(user_email, false)
    }

    /// Reloads the options of `user_email`, then selects as [`Self::update`].
    pub fn refresh(&self, user_email: &str) -> Result<(), TraitError> {
        self.load_options(user_email, true)
    }

    fn load_options(&self, user_email: &str, reload: bool) -> Result<(), TraitError> {
        if reload || self.options().is_empty() {
            let query = CodeQuery {
                default_calc_job_plugin: &self.info.default_calc_job_plugin,
                user_email,
                include_hidden: self.model.declared(ALLOW_HIDDEN_CODES),
                include_disabled: self.model.declared(ALLOW_DISABLED_COMPUTERS),
            };
            let options: Vec<Value> = self
                .store
                .find_codes(&query)
                .iter()
                .map(|code| Value::list([code.full_label(), code.uuid.clone()]))
                .collect();
            debug!(
                code = %self.info.name,
                user_email,
                options = options.len(),
                "loaded code options"
            );
            self.model.set(OPTIONS, options)?;
        }
        let options = self.options();
        let valid = self
            .selected()
            .is_some_and(|uuid| options.iter().any(|(_, option)| *option == uuid));
        if !valid {
            self.set_selected(self.first_option().as_deref())?;
        }
        Ok(())
    }

    /// Resolves a UUID or `label@computer` to the UUID of a known code.
    pub fn resolve_code(&self, identifier: &str) -> Option<String> {
        if self.options().iter().any(|(_, uuid)| uuid == identifier) {
            return Some(identifier.to_owned());
        }
        match self.store.load_code(identifier) {
            Ok(code) => Some(code.uuid.clone()),
            Err(e) => {
                warn!(code = %self.info.name, identifier, error = %e, "could not resolve code");
                None
            }
        }
    }

    fn parallelization_state(&self) -> Value {
        let overridden: bool = self.model.declared(PARALLELIZATION_OVERRIDE);
        if overridden {
            Value::dict([(NPOOL, self.model.declared::<i64>(NPOOL))])
        } else {
            Value::dict(Vec::<(&str, Value)>::new())
        }
    }

    fn set_parallelization_state(&self, state: &ValueMap) -> Result<(), TraitError> {
        match state.get(NPOOL) {
            Some(npool) => {
                self.model.set(PARALLELIZATION_OVERRIDE, true)?;
                self.model.set(NPOOL, npool.clone())?;
            }
            None => {
                self.model.set(PARALLELIZATION_OVERRIDE, false)?;
            }
        }
        Ok(())
    }
}

const STATE_KEYS: [(&str, &str); 5] = [
    ("nodes", NUM_NODES),
    ("cpus", NUM_CPUS),
    ("ntasks_per_node", NTASKS_PER_NODE),
    ("cpus_per_task", CPUS_PER_TASK),
    ("max_wallclock_seconds", MAX_WALLCLOCK_SECONDS),
];

impl ModelState for CodeModel {
    fn get_model_state(&self) -> ValueMap {
        let mut state = ValueMap::new();
        state.insert("code".into(), self.selected().into());
        for (key, name) in STATE_KEYS {
            state.insert(key.into(), self.model.get(name).unwrap_or_default());
        }
        if self.kind == CodeKind::Pw {
            state.insert(PARALLELIZATION.into(), self.parallelization_state());
        }
        state
    }

    /// Applies a code state. `cpus` is applied before `ntasks_per_node`, as
    /// a change of the CPU count also resets the tasks per machine.
    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        if let Some(code) = state.get("code") {
            let selected = match code {
                Value::None => None,
                Value::Str(identifier) => self.resolve_code(identifier),
                other => return Err(StateError::shape("code", "a str or None", other)),
            };
            self.set_selected(selected.as_deref())?;
        }
        for (key, name) in STATE_KEYS {
            if let Some(value) = state.get(key) {
                self.model.set(name, value.clone())?;
            }
        }
        if let Some(parallelization) = state.get(PARALLELIZATION) {
            if self.kind == CodeKind::Pw {
                let parallelization = parallelization.as_dict().ok_or_else(|| {
                    StateError::shape(PARALLELIZATION, "a dict", parallelization)
                })?;
                self.set_parallelization_state(parallelization)?;
            }
        }
        let known = |key: &str| {
            key == "code" || key == PARALLELIZATION || STATE_KEYS.iter().any(|(k, _)| *k == key)
        };
        for key in state.keys().filter(|key| !known(key)) {
            warn!(code = %self.info.name, %key, "ignoring unknown state key");
        }
        Ok(())
    }
}

impl Observable for CodeModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl std::fmt::Debug for CodeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeModel")
            .field("info", &self.info)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// A `pw.x` code model, with explicit pool parallelization.
#[derive(Clone, Debug)]
pub struct PwCodeModel(CodeModel);

impl PwCodeModel {
    /// A `pw.x` model named `pw.x`.
    pub fn new(store: Rc<dyn CodeStore>) -> Self {
        Self::with_name(store, "pw.x")
    }

    /// A `pw.x` model with a custom name.
    pub fn with_name(store: Rc<dyn CodeStore>, name: impl Into<String>) -> Self {
        let name = name.into();
        let info = CodeInfo::new(name.clone(), name, "quantumespresso.pw");
        Self(CodeModel::with_kind(store, info, CodeKind::Pw, pw_code_class()))
    }

    /// Whether explicit parallelization is enabled.
    pub fn parallelization_override(&self) -> bool {
        self.0.model.declared(PARALLELIZATION_OVERRIDE)
    }

    /// The number of pools.
    pub fn npool(&self) -> i64 {
        self.0.model.declared(NPOOL)
    }

    /// Enables explicit parallelization with `npool` pools, or disables it.
    pub fn set_npool(&self, npool: Option<i64>) -> Result<(), TraitError> {
        match npool {
            Some(npool) => {
                self.0.model.set(NPOOL, npool)?;
                self.0.model.set(PARALLELIZATION_OVERRIDE, true)?;
            }
            None => {
                self.0.model.set(PARALLELIZATION_OVERRIDE, false)?;
            }
        }
        Ok(())
    }
}

impl Deref for PwCodeModel {
    type Target = CodeModel;

    fn deref(&self) -> &CodeModel {
        &self.0
    }
}

impl From<PwCodeModel> for CodeModel {
    fn from(model: PwCodeModel) -> Self {
        model.0
    }
}

impl Observable for PwCodeModel {
    fn model(&self) -> &Model {
        &self.0.model
    }
}

impl ModelState for PwCodeModel {
    fn get_model_state(&self) -> ValueMap {
        self.0.get_model_state()
    }

    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        self.0.set_model_state(state)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;
    use qeapp_core::store::{ComputerRecord, MemoryStore};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::config::DEFAULT_USER_EMAIL;

    struct Setup {
        store: Rc<MemoryStore>,
        pw_code: Rc<CodeRecord>,
    }

    #[fixture]
    fn setup() -> Setup {
        let store = Rc::new(MemoryStore::new());
        let localhost = Rc::new(ComputerRecord::new("localhost", "core.direct"));
        let pw_code = store.add_code("pw", "quantumespresso.pw", DEFAULT_USER_EMAIL, localhost);
        Setup { store, pw_code }
    }

    fn state(entries: serde_json::Value) -> ValueMap {
        serde_json::from_value(entries).unwrap()
    }

    #[rstest]
    fn code_model(setup: Setup) {
        let Setup { store, pw_code } = setup;
        let model = CodeModel::new(
            store,
            CodeInfo::new("pw", "Quantum ESPRESSO pw.x", "quantumespresso.pw"),
        );
        assert!(model.options().is_empty());
        assert_eq!(model.selected(), None);

        model.update(DEFAULT_USER_EMAIL).unwrap();
        assert_eq!(model.options(), [("pw@localhost".to_owned(), pw_code.uuid.clone())]);
        assert_eq!(model.first_option(), Some(pw_code.uuid.clone()));
        assert_eq!(model.selected(), Some(pw_code.uuid.clone()));

        let snapshot = model.get_model_state();
        assert_eq!(snapshot["code"], Value::from(pw_code.uuid.as_str()));
        assert_eq!(snapshot["nodes"], Value::Int(1));
        assert_eq!(snapshot["cpus"], Value::Int(1));
        assert!(!snapshot.contains_key("parallelization"));

        model
            .set_model_state(&state(serde_json::json!({"code": "does-not-exist", "nodes": 2, "cpus": 3})))
            .unwrap();
        assert_eq!(model.selected(), None);
        assert_eq!(model.num_nodes(), 2);
        assert_eq!(model.num_cpus(), 3);
    }

    #[rstest]
    fn pw_code_model(setup: Setup) {
        let model = PwCodeModel::new(setup.store);
        model.update(DEFAULT_USER_EMAIL).unwrap();
        assert_eq!(model.get_model_state()["parallelization"], Value::dict(Vec::<(&str, Value)>::new()));

        model.set_npool(Some(4)).unwrap();
        assert_eq!(model.get_model_state()["parallelization"], Value::dict([("npool", 4)]));

        model
            .set_model_state(&state(serde_json::json!({"parallelization": {"npool": 8}})))
            .unwrap();
        assert!(model.parallelization_override());
        assert_eq!(model.npool(), 8);

        model
            .set_model_state(&state(serde_json::json!({"parallelization": {}})))
            .unwrap();
        assert!(!model.parallelization_override());
    }

    #[rstest]
    fn num_cpus_drives_ntasks_per_node(setup: Setup) {
        let model = PwCodeModel::with_name(setup.store, "pw");
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        model
            .model()
            .observe([NUM_CPUS, NTASKS_PER_NODE, NUM_NODES], move |_| {
                h.set(h.get() + 1);
                Ok(())
            })
            .unwrap();
        model.model().set(NUM_NODES, 2).unwrap();
        assert_eq!(hits.get(), 1);
        model.model().set(NUM_CPUS, 4).unwrap();
        assert_eq!(hits.get(), 3);
        assert_eq!(model.ntasks_per_node(), 4);
    }

    #[rstest]
    fn selection_follows_options(setup: Setup) {
        let Setup { store, pw_code } = setup;
        let model = PwCodeModel::new(store.clone());
        model.update(DEFAULT_USER_EMAIL).unwrap();
        model.set_selected(None).unwrap();
        model.update(DEFAULT_USER_EMAIL).unwrap();
        assert_eq!(model.selected(), Some(pw_code.uuid.clone()));

        store.set_code_hidden(&pw_code.uuid, true).unwrap();
        model.refresh(DEFAULT_USER_EMAIL).unwrap();
        assert!(model.options().is_empty());
        assert_eq!(model.selected(), None);

        model.model().set(ALLOW_HIDDEN_CODES, true).unwrap();
        model.refresh(DEFAULT_USER_EMAIL).unwrap();
        assert_eq!(model.selected(), Some(pw_code.uuid.clone()));
        assert_eq!(model.code().map(|code| code.label.clone()), Some("pw".into()));
    }

    #[rstest]
    fn readiness(setup: Setup) {
        let model = CodeModel::new(
            setup.store,
            CodeInfo::new("dos", "dos.x", "quantumespresso.dos"),
        );
        model.update(DEFAULT_USER_EMAIL).unwrap();
        assert!(model.options().is_empty());
        model.activate().unwrap();
        assert!(!model.is_ready());
        model.deactivate().unwrap();
        assert!(!model.is_active());
    }

    #[rstest]
    fn codes_resolve_by_full_label(setup: Setup) {
        let Setup { store, pw_code } = setup;
        let model = PwCodeModel::new(store);
        model
            .set_model_state(&state(serde_json::json!({"code": "pw@localhost"})))
            .unwrap();
        assert_eq!(model.selected(), Some(pw_code.uuid.clone()));
    }

    #[rstest]
    fn invalid_resources_are_rejected(setup: Setup) {
        let model = PwCodeModel::new(setup.store);
        let err = model
            .set_model_state(&state(serde_json::json!({"nodes": 0})))
            .unwrap_err();
        assert!(matches!(err, StateError::Trait(TraitError::OutOfBounds { .. })));
        assert!(matches!(
            model.set_model_state(&state(serde_json::json!({"code": 3}))),
            Err(StateError::Shape { .. })
        ));
    }

    #[rstest]
    fn resource_defaults(setup: Setup) {
        let defaults = ResourceDefaults {
            nodes: 2,
            ntasks_per_node: 8,
            ..Default::default()
        };
        let model = CodeModel::from(PwCodeModel::new(setup.store))
            .with_resources(&defaults)
            .unwrap();
        assert_eq!(model.num_nodes(), 2);
        assert_eq!(model.ntasks_per_node(), 8);
        assert_eq!(model.max_wallclock_seconds(), 43200);
    }
}
