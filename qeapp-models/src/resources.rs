//! Computational resource settings.
//!
//! [`ResourceSettingsModel`] owns the [`CodeModel`]s of a workflow and
//! publishes their states in its `global_codes` trait, keyed by calculation
//! plugin with dots replaced by `__` (`quantumespresso__pw`).
//! [`PluginResourceSettingsModel`] follows those global states for its own
//! codes unless its `override` flag is set.

use std::rc::Rc;

use itertools::Itertools;
use qeapp_core::mixins::{
    Confirmable, HasBlockers, HasModels, ModelRegistry, RegistryError, WeakModelRegistry,
};
use qeapp_core::{
    Link, Mixin, Model, ModelClass, ModelState, Names, Observable, StateError, TraitError, TraitSpec,
    Value, ValueMap, WeakModel, dlink,
};
use tracing::{debug, warn};

use crate::code::CodeModel;
use crate::config::AppConfig;
use crate::panel::Panel;
use crate::settings::{Settings, settings_class};

/// Name of the trait publishing the code states, keyed by plugin.
pub const GLOBAL_CODES: &str = "global_codes";
/// Name of the trait holding resource warnings.
pub const WARNING_MESSAGES: &str = "warning_messages";
/// Name of the trait detaching plugin codes from the global ones.
pub const OVERRIDE: &str = "override";

const CODES_STATE_KEY: &str = "codes";

thread_local! {
    static RESOURCES: Rc<ModelClass> = ModelClass::builder("ResourceSettingsModel")
        .extends(&settings_class())
        .mixin(Mixin::HasModels)
        .mixin(Mixin::HasBlockers)
        .mixin(Mixin::Confirmable)
        .add_trait(TraitSpec::dict(GLOBAL_CODES))
        .add_trait(TraitSpec::unicode(WARNING_MESSAGES, ""))
        .build()
        .expect("ResourceSettingsModel is well formed");

    static PLUGIN_RESOURCES: Rc<ModelClass> = ModelClass::builder("PluginResourceSettingsModel")
        .extends(&resource_settings_class())
        .add_trait(TraitSpec::bool(OVERRIDE, false))
        .dependencies([GLOBAL_CODES])
        .build()
        .expect("PluginResourceSettingsModel is well formed");
}

/// The class of [`ResourceSettingsModel`].
pub fn resource_settings_class() -> Rc<ModelClass> {
    RESOURCES.with(Rc::clone)
}

/// The class of [`PluginResourceSettingsModel`].
pub fn plugin_resource_settings_class() -> Rc<ModelClass> {
    PLUGIN_RESOURCES.with(Rc::clone)
}

/// The `global_codes` key of a calculation plugin.
pub fn global_code_key(plugin: &str) -> String {
    plugin.replace('.', "__")
}

/// Settings owning the codes of a workflow.
///
/// Clones share the same model and registry.
#[derive(Clone, Debug)]
pub struct ResourceSettingsModel {
    model: Model,
    registry: ModelRegistry<CodeModel>,
    config: Rc<AppConfig>,
    publishes: bool,
}

struct WeakResources {
    model: WeakModel,
    registry: WeakModelRegistry<CodeModel>,
    config: Rc<AppConfig>,
    publishes: bool,
}

impl WeakResources {
    fn upgrade(&self) -> Option<ResourceSettingsModel> {
        Some(ResourceSettingsModel {
            model: self.model.upgrade()?,
            registry: self.registry.upgrade()?,
            config: self.config.clone(),
            publishes: self.publishes,
        })
    }
}

impl ResourceSettingsModel {
    /// A model using the codes and defaults of `config`.
    pub fn new(config: Rc<AppConfig>) -> Self {
        Self::from_class(config, resource_settings_class(), true)
    }

    fn from_class(config: Rc<AppConfig>, class: Rc<ModelClass>, publishes: bool) -> Self {
        Self {
            model: Model::new(class),
            registry: ModelRegistry::new(),
            config,
            publishes,
        }
    }

    fn downgrade(&self) -> WeakResources {
        WeakResources {
            model: self.model.downgrade(),
            registry: self.registry.downgrade(),
            config: self.config.clone(),
            publishes: self.publishes,
        }
    }

    /// The application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The email of the user whose codes are offered.
    pub fn default_user_email(&self) -> &str {
        &self.config.default_user_email
    }

    /// The published code states, keyed by [`global_code_key`].
    pub fn global_codes(&self) -> ValueMap {
        self.model.declared(GLOBAL_CODES)
    }

    /// The current resource warnings, one per line.
    pub fn warning_messages(&self) -> String {
        self.model.declared(WARNING_MESSAGES)
    }

    /// Reloads the options of every code.
    pub fn refresh_codes(&self) -> Result<(), TraitError> {
        for (_, code) in self.get_models() {
            code.refresh(self.default_user_email())?;
        }
        Ok(())
    }

    /// Recomputes the resource warnings of the active codes.
    ///
    /// A code requesting more CPUs than its computer runs MPI processes per
    /// machine is reported.
    pub fn check_resources(&self) -> Result<(), TraitError> {
        let messages = self
            .get_models()
            .into_iter()
            .filter(|(_, code)| code.is_active())
            .filter_map(|(_, code)| {
                let record = code.code()?;
                let mpiprocs = record.computer.default_mpiprocs_per_machine?;
                (code.num_cpus() > i64::from(mpiprocs)).then(|| {
                    format!(
                        "The selected code {} requests {} CPUs, but the computer {} runs {} MPI \
                         processes per machine.",
                        record.full_label(),
                        code.num_cpus(),
                        record.computer.label,
                        mpiprocs
                    )
                })
            })
            .join("\n");
        self.model.set(WARNING_MESSAGES, messages)?;
        Ok(())
    }

    fn publish_global_codes(&self) -> Result<(), TraitError> {
        if !self.publishes {
            return Ok(());
        }
        let codes: ValueMap = self
            .get_models()
            .into_iter()
            .map(|(_, code)| {
                (
                    global_code_key(code.default_calc_job_plugin()),
                    Value::Dict(code.get_model_state()),
                )
            })
            .collect();
        self.model.set(GLOBAL_CODES, codes)?;
        Ok(())
    }

    fn on_code_change(&self) -> Result<(), TraitError> {
        self.publish_global_codes()?;
        self.check_resources()
    }

    fn split_state<'a>(state: &'a ValueMap) -> (Option<&'a Value>, ValueMap) {
        let rest = state
            .iter()
            .filter(|(key, _)| key.as_str() != CODES_STATE_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        (state.get(CODES_STATE_KEY), rest)
    }
}

impl Observable for ResourceSettingsModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

impl Panel for ResourceSettingsModel {}
impl Settings for ResourceSettingsModel {}
impl Confirmable for ResourceSettingsModel {}

impl HasBlockers for ResourceSettingsModel {
    fn check_blockers(&self) -> Vec<String> {
        self.get_models()
            .into_iter()
            .filter(|(_, code)| code.is_active() && code.selected().is_none())
            .map(|(_, code)| format!("No {} code selected", code.name()))
            .collect()
    }
}

impl HasModels<CodeModel> for ResourceSettingsModel {
    const MODELS_STATE_KEY: &'static str = CODES_STATE_KEY;

    fn registry(&self) -> &ModelRegistry<CodeModel> {
        &self.registry
    }

    /// Loads the options of the new code, selects the configured default
    /// code of its plugin, and starts tracking its changes.
    fn on_model_added(&self, key: &str, code: &CodeModel) -> Result<(), RegistryError> {
        code.update(self.default_user_email())?;
        if let Some(default) = self.config.default_code(code.default_calc_job_plugin()) {
            match code.resolve_code(default) {
                Some(uuid) => code.set_selected(Some(&uuid))?,
                None => warn!(%key, default, "configured default code is not installed"),
            }
        }
        let weak = self.downgrade();
        let observer = code.model().observe(Names::All, move |_| match weak.upgrade() {
            Some(resources) => resources.on_code_change(),
            None => Ok(()),
        })?;
        debug!(%key, code = code.name(), "tracking code");
        if let Err(e) = self.on_code_change() {
            code.model().unobserve(observer);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ModelState for ResourceSettingsModel {
    /// The persistable traits, and under `codes` the states of the codes
    /// that are ready to run.
    fn get_model_state(&self) -> ValueMap {
        let mut state = self.model.get_model_state();
        let codes: ValueMap = self
            .get_models()
            .into_iter()
            .filter(|(_, code)| code.is_ready())
            .map(|(key, code)| (key.to_string(), Value::Dict(code.get_model_state())))
            .collect();
        state.insert(CODES_STATE_KEY.into(), Value::Dict(codes));
        state
    }

    /// Applies the persistable traits and the code states. Every registered
    /// code named under `codes` is activated, since only ready codes are
    /// saved.
    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        let (codes, rest) = Self::split_state(state);
        if let Some(codes) = codes {
            let codes = codes
                .as_dict()
                .ok_or_else(|| StateError::shape(CODES_STATE_KEY, "a dict", codes))?;
            self.set_models_state(codes)?;
            for key in codes.keys() {
                if let Some(code) = self.registry.get(key) {
                    code.activate()?;
                }
            }
        }
        self.model.set_model_state(&rest)
    }
}

/// Resource settings of a plugin, following the global code states unless
/// overridden.
#[derive(Clone, Debug)]
pub struct PluginResourceSettingsModel {
    inner: ResourceSettingsModel,
}

impl PluginResourceSettingsModel {
    /// A plugin model using the codes and defaults of `config`.
    pub fn new(config: Rc<AppConfig>) -> Self {
        let inner =
            ResourceSettingsModel::from_class(config, plugin_resource_settings_class(), false);
        let weak = inner.downgrade();
        inner
            .model
            .observe([GLOBAL_CODES, OVERRIDE], move |change| {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                if change.name == OVERRIDE && change.new == Value::Bool(true) {
                    return Ok(());
                }
                PluginResourceSettingsModel { inner }.apply_global_codes()
            })
            .expect("PluginResourceSettingsModel declares its traits");
        Self { inner }
    }

    /// Follows the `global_codes` of `global`.
    pub fn follow(&self, global: &ResourceSettingsModel) -> Result<Link, TraitError> {
        dlink((global.model(), GLOBAL_CODES), (self.model(), GLOBAL_CODES))
    }

    /// Whether the plugin codes are detached from the global ones.
    pub fn is_overridden(&self) -> bool {
        self.inner.model.declared(OVERRIDE)
    }

    /// Detaches the plugin codes from the global ones, or reattaches them.
    pub fn set_override(&self, value: bool) -> Result<(), TraitError> {
        self.inner.model.set(OVERRIDE, value)?;
        Ok(())
    }

    /// The resource settings shared with [`ResourceSettingsModel`].
    pub fn resources(&self) -> &ResourceSettingsModel {
        &self.inner
    }

    /// Applies the global state of each code's plugin, unless overridden.
    fn apply_global_codes(&self) -> Result<(), TraitError> {
        if self.is_overridden() {
            return Ok(());
        }
        let global = self.inner.global_codes();
        for (key, code) in self.get_models() {
            let plugin_key = global_code_key(code.default_calc_job_plugin());
            let Some(state) = global.get(&plugin_key).and_then(Value::as_dict) else {
                continue;
            };
            debug!(%key, %plugin_key, "applying global code state");
            match code.set_model_state(state) {
                Ok(()) => {}
                Err(StateError::Trait(e)) => return Err(e),
                Err(e) => warn!(%key, error = %e, "could not apply global code state"),
            }
        }
        Ok(())
    }
}

impl Observable for PluginResourceSettingsModel {
    fn model(&self) -> &Model {
        &self.inner.model
    }
}

impl Panel for PluginResourceSettingsModel {}
impl Settings for PluginResourceSettingsModel {}
impl Confirmable for PluginResourceSettingsModel {}

impl HasBlockers for PluginResourceSettingsModel {
    fn check_blockers(&self) -> Vec<String> {
        self.inner.check_blockers()
    }
}

impl HasModels<CodeModel> for PluginResourceSettingsModel {
    const MODELS_STATE_KEY: &'static str = CODES_STATE_KEY;

    fn registry(&self) -> &ModelRegistry<CodeModel> {
        &self.inner.registry
    }

    fn on_model_added(&self, key: &str, code: &CodeModel) -> Result<(), RegistryError> {
        self.inner.on_model_added(key, code)?;
        self.apply_global_codes()?;
        Ok(())
    }
}

impl ModelState for PluginResourceSettingsModel {
    fn get_model_state(&self) -> ValueMap {
        let mut state = ValueMap::new();
        state.insert(OVERRIDE.into(), self.is_overridden().into());
        state.extend(self.inner.get_model_state());
        state
    }

    /// Applies `override` first, so that the code states are not replaced by
    /// the global ones afterwards.
    fn set_model_state(&self, state: &ValueMap) -> Result<(), StateError> {
        if let Some(value) = state.get(OVERRIDE) {
            self.inner.model.set(OVERRIDE, value.clone())?;
        }
        let rest: ValueMap = state
            .iter()
            .filter(|(key, _)| key.as_str() != OVERRIDE)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.inner.set_model_state(&rest)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use qeapp_core::store::{CodeRecord, ComputerRecord, MemoryStore};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::code::{CodeInfo, NUM_CPUS, NUM_NODES, PwCodeModel};
    use crate::config::DEFAULT_USER_EMAIL;

    struct Setup {
        store: Rc<MemoryStore>,
        pw_code: Rc<CodeRecord>,
    }

    #[fixture]
    fn setup() -> Setup {
        let store = Rc::new(MemoryStore::new());
        let localhost = Rc::new(ComputerRecord::new("localhost", "core.direct").with_mpiprocs_per_machine(2));
        let pw_code = store.add_code("pw", "quantumespresso.pw", DEFAULT_USER_EMAIL, localhost);
        Setup { store, pw_code }
    }

    fn pw(store: &Rc<MemoryStore>) -> CodeModel {
        PwCodeModel::new(store.clone()).into()
    }

    #[rstest]
    fn codes_are_loaded_when_added(setup: Setup) {
        let Setup { store, pw_code } = setup;
        let model = ResourceSettingsModel::new(Rc::default());
        let code = pw(&store);
        model.add_model("quantumespresso__pw", code.clone()).unwrap();
        assert_eq!(code.selected(), Some(pw_code.uuid.clone()));

        code.set_selected(None).unwrap();
        model.refresh_codes().unwrap();
        assert_eq!(code.selected(), Some(pw_code.uuid.clone()));
        assert!(model.get_model("quantumespresso__pw").unwrap().ptr_eq(&code));
    }

    #[rstest]
    fn configured_default_code_is_selected(setup: Setup) {
        let Setup { store, .. } = setup;
        let localhost = Rc::new(ComputerRecord::new("remote", "core.slurm"));
        let preferred = store.add_code("pw-7.4", "quantumespresso.pw", DEFAULT_USER_EMAIL, localhost);
        let mut config = AppConfig::default();
        config
            .default_codes
            .insert("quantumespresso.pw".into(), "pw-7.4@remote".into());

        let model = ResourceSettingsModel::new(Rc::new(config));
        let code = pw(&store);
        model.add_model("quantumespresso__pw", code.clone()).unwrap();
        assert_eq!(code.selected(), Some(preferred.uuid.clone()));
    }

    #[rstest]
    fn state_holds_ready_codes(setup: Setup) {
        let Setup { store, pw_code } = setup;
        let model = ResourceSettingsModel::new(Rc::default());
        let code = pw(&store);
        let dos = CodeModel::new(store.clone(), CodeInfo::new("dos", "dos.x", "quantumespresso.dos"));
        model
            .add_models([("quantumespresso__pw", code.clone()), ("quantumespresso__dos", dos)])
            .unwrap();
        assert_eq!(model.get_model_state()[CODES_STATE_KEY], Value::Dict(ValueMap::new()));

        code.activate().unwrap();
        let state = model.get_model_state();
        let codes = state[CODES_STATE_KEY].as_dict().unwrap();
        assert_eq!(codes.keys().collect_vec(), ["quantumespresso__pw"]);
        assert_eq!(codes["quantumespresso__pw"].as_dict().unwrap()["code"], Value::from(pw_code.uuid.as_str()));

        let other = ResourceSettingsModel::new(Rc::default());
        let other_code = pw(&store);
        other.add_model("quantumespresso__pw", other_code.clone()).unwrap();
        other_code.model().set(NUM_NODES, 3).unwrap();
        code.model().set(NUM_NODES, 2).unwrap();
        other.set_model_state(&model.get_model_state()).unwrap();
        assert_eq!(other_code.num_nodes(), 2);
    }

    #[rstest]
    fn state_round_trips_into_fresh_models(setup: Setup) {
        let model = ResourceSettingsModel::new(Rc::default());
        let code = pw(&setup.store);
        model.add_model("quantumespresso__pw", code.clone()).unwrap();
        code.activate().unwrap();
        code.model().set(NUM_CPUS, 4).unwrap();

        let fresh = ResourceSettingsModel::new(Rc::default());
        let fresh_code = pw(&setup.store);
        fresh.add_model("quantumespresso__pw", fresh_code.clone()).unwrap();
        assert!(!fresh_code.is_active());

        let state = model.get_model_state();
        fresh.set_model_state(&state).unwrap();
        assert!(fresh_code.is_active());
        assert_eq!(fresh.get_model_state(), state);
        assert_eq!(fresh.global_codes(), model.global_codes());
    }

    #[rstest]
    fn plugin_state_round_trips_into_fresh_models(setup: Setup) {
        let plugin = PluginResourceSettingsModel::new(Rc::default());
        let code = pw(&setup.store);
        plugin.add_model("quantumespresso__pw", code.clone()).unwrap();
        code.activate().unwrap();
        plugin.set_override(true).unwrap();
        code.model().set(NUM_NODES, 3).unwrap();

        let fresh = PluginResourceSettingsModel::new(Rc::default());
        let fresh_code = pw(&setup.store);
        fresh.add_model("quantumespresso__pw", fresh_code.clone()).unwrap();

        let state = plugin.get_model_state();
        fresh.set_model_state(&state).unwrap();
        assert_eq!(fresh.get_model_state(), state);
        assert_eq!(fresh_code.num_nodes(), 3);
    }

    #[rstest]
    fn global_codes_are_published(setup: Setup) {
        let model = ResourceSettingsModel::new(Rc::default());
        let code = pw(&setup.store);
        model.add_model("quantumespresso__pw", code.clone()).unwrap();
        code.model().set(NUM_NODES, 4).unwrap();
        let global = model.global_codes();
        assert_eq!(global.keys().collect_vec(), ["quantumespresso__pw"]);
        assert_eq!(global["quantumespresso__pw"].as_dict().unwrap()["nodes"], Value::Int(4));
    }

    #[rstest]
    fn blockers_report_missing_codes(setup: Setup) {
        let model = ResourceSettingsModel::new(Rc::default());
        let dos = CodeModel::new(setup.store, CodeInfo::new("dos", "dos.x", "quantumespresso.dos"));
        model.add_model("quantumespresso__dos", dos.clone()).unwrap();
        model.update_blockers().unwrap();
        assert!(!model.is_blocked());

        dos.activate().unwrap();
        model.update_blockers().unwrap();
        assert_eq!(model.blockers(), ["No dos code selected"]);
    }

    #[rstest]
    fn oversubscription_warns(setup: Setup) {
        let model = ResourceSettingsModel::new(Rc::default());
        let code = pw(&setup.store);
        model.add_model("quantumespresso__pw", code.clone()).unwrap();
        code.activate().unwrap();
        code.model().set(NUM_CPUS, 2).unwrap();
        assert_eq!(model.warning_messages(), "");
        code.model().set(NUM_CPUS, 4).unwrap();
        assert!(model.warning_messages().contains("requests 4 CPUs"));
    }

    #[rstest]
    fn plugin_codes_follow_global_codes(setup: Setup) {
        let global = ResourceSettingsModel::new(Rc::default());
        let global_pw = pw(&setup.store);
        global.add_model("quantumespresso__pw", global_pw.clone()).unwrap();

        let plugin = PluginResourceSettingsModel::new(Rc::default());
        let _link = plugin.follow(&global).unwrap();
        let plugin_pw = pw(&setup.store);
        global_pw.model().set(NUM_NODES, 2).unwrap();
        plugin.add_model("quantumespresso__pw", plugin_pw.clone()).unwrap();
        assert_eq!(plugin_pw.num_nodes(), 2);

        global_pw.model().set(NUM_NODES, 3).unwrap();
        assert_eq!(plugin_pw.num_nodes(), 3);

        plugin.set_override(true).unwrap();
        global_pw.model().set(NUM_NODES, 5).unwrap();
        assert_eq!(plugin_pw.num_nodes(), 3);

        plugin.set_override(false).unwrap();
        assert_eq!(plugin_pw.num_nodes(), 5);
    }

    #[rstest]
    fn plugin_state_applies_override_first(setup: Setup) {
        let global = ResourceSettingsModel::new(Rc::default());
        let global_pw = pw(&setup.store);
        global.add_model("quantumespresso__pw", global_pw.clone()).unwrap();

        let plugin = PluginResourceSettingsModel::new(Rc::default());
        let _link = plugin.follow(&global).unwrap();
        let plugin_pw = pw(&setup.store);
        plugin.add_model("quantumespresso__pw", plugin_pw.clone()).unwrap();
        plugin_pw.activate().unwrap();

        let state: ValueMap = serde_json::from_value(serde_json::json!({
            "override": true,
            "codes": {"quantumespresso__pw": {"nodes": 7}},
        }))
        .unwrap();
        plugin.set_model_state(&state).unwrap();
        assert!(plugin.is_overridden());
        assert_eq!(plugin_pw.num_nodes(), 7);

        global_pw.model().set(NUM_NODES, 2).unwrap();
        assert_eq!(plugin_pw.num_nodes(), 7);
        assert_eq!(plugin.get_model_state()[OVERRIDE], Value::Bool(true));
    }
}
