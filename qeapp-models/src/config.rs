//! Application configuration.
//!
//! The configuration holds the defaults the resource models start from: the
//! user owning the codes, the code preferred for each calculation plugin, and
//! the default computational resources. It is normally loaded from a YAML
//! file:
//!
//! ```yaml
//! default_user_email: aiida@localhost
//! default_codes:
//!   quantumespresso.pw: pw-7.4@localhost
//! resources:
//!   nodes: 1
//!   ntasks_per_node: 1
//!   cpus_per_task: 1
//!   max_wallclock_seconds: 43200
//! ```

use std::fs::File;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The email of the default user of a fresh profile.
pub const DEFAULT_USER_EMAIL: &str = "aiida@localhost";

/// Default computational resources of a code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDefaults {
    /// Number of machines.
    pub nodes: i64,
    /// Number of MPI tasks per machine.
    pub ntasks_per_node: i64,
    /// Number of CPUs per MPI task.
    pub cpus_per_task: i64,
    /// Wall-clock limit, in seconds.
    pub max_wallclock_seconds: i64,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            nodes: 1,
            ntasks_per_node: 1,
            cpus_per_task: 1,
            max_wallclock_seconds: 12 * 3600,
        }
    }
}

/// The application configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The email of the user whose codes are offered.
    pub default_user_email: String,
    /// The preferred code (UUID or `label@computer`) per calculation plugin.
    pub default_codes: IndexMap<String, String>,
    /// Default resources of every code.
    pub resources: ResourceDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_user_email: DEFAULT_USER_EMAIL.to_owned(),
            default_codes: IndexMap::new(),
            resources: ResourceDefaults::default(),
        }
    }
}

impl AppConfig {
    /// Parses a YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_reader(file)?)
        } else {
            Ok(serde_yaml::from_reader(file)?)
        }
    }

    /// The preferred code for `plugin`, if configured.
    pub fn default_code(&self, plugin: &str) -> Option<&str> {
        self.default_codes.get(plugin).map(String::as_str)
    }
}

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Could not read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The YAML configuration is malformed.
    #[error("Error while parsing the configuration yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The JSON configuration is malformed.
    #[error("Error while parsing the configuration json: {0}")]
    Json(#[from] serde_json::Error),
}
