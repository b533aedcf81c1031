//! Concrete models of the Quantum ESPRESSO app.
//!
//! The models compose the mixins of [`qeapp_core`] into the panels of the
//! app: settings, the codes and computational resources of a workflow, and
//! the results of a finished process. Their defaults come from an
//! [`AppConfig`].
//!
//! ## Usage
//!
//! ```
//! use std::rc::Rc;
//!
//! use qeapp_core::mixins::HasModels;
//! use qeapp_core::store::{ComputerRecord, MemoryStore};
//! use qeapp_models::{AppConfig, PwCodeModel, ResourceSettingsModel};
//!
//! let store = Rc::new(MemoryStore::new());
//! let computer = Rc::new(ComputerRecord::new("localhost", "core.direct"));
//! let installed = store.add_code("pw", "quantumespresso.pw", "aiida@localhost", computer);
//!
//! let resources = ResourceSettingsModel::new(Rc::new(AppConfig::default()));
//! let pw = PwCodeModel::new(store);
//! resources.add_model("quantumespresso__pw", pw.clone().into()).unwrap();
//! assert_eq!(pw.selected(), Some(installed.uuid.clone()));
//! ```

pub mod calculation;
pub mod code;
pub mod config;
pub mod panel;
pub mod resources;
pub mod results;
pub mod settings;

pub use calculation::{
    CalculationError, CodeParameters, ComponentInputs, enable_pencil_decomposition,
    set_component_resources,
};
pub use code::{CodeInfo, CodeKind, CodeModel, PwCodeModel};
pub use config::{AppConfig, ConfigError, DEFAULT_USER_EMAIL, ResourceDefaults};
pub use panel::{Panel, PanelModel};
pub use resources::{PluginResourceSettingsModel, ResourceSettingsModel};
pub use results::ResultsModel;
pub use settings::{ConfigurationSettingsModel, Settings, SettingsModel};
