//! Translation of code states into calculation inputs.
//!
//! A [`CodeParameters`] is read from the state of a [`CodeModel`], and
//! [`set_component_resources`] writes it into the metadata of a calculation
//! component:
//!
//! ```
//! use std::rc::Rc;
//!
//! use qeapp_core::store::{CodeRecord, ComputerRecord};
//! use qeapp_models::calculation::{CodeParameters, ComponentInputs, set_component_resources};
//!
//! let computer = Rc::new(ComputerRecord::new("localhost", "core.direct"));
//! let code = Rc::new(CodeRecord {
//!     uuid: "0000".into(),
//!     label: "pw".into(),
//!     default_calc_job_plugin: "quantumespresso.pw".into(),
//!     user_email: "aiida@localhost".into(),
//!     hidden: false,
//!     computer,
//! });
//! let mut component = ComponentInputs::default();
//! set_component_resources(&mut component, &CodeParameters::new(code, 2, 4, 1, 600)).unwrap();
//! assert_eq!(component.metadata.options.resources.num_machines, Some(2));
//! ```

use std::rc::Rc;

use qeapp_core::store::{CodeRecord, CodeStore, StoreError};
use qeapp_core::{ModelState, Value, ValueMap};
use serde::Serialize;
use thiserror::Error;

use crate::code::CodeModel;

/// Scheduler plugins running every task of a job in one allocation of CPUs.
const CPU_COUNT_SCHEDULERS: [&str; 1] = ["hyperqueue"];

/// Errors raised when reading code parameters or deriving resources from them.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum CalculationError {
    /// A required entry is missing or has the wrong type.
    #[error("code parameters need '{key}' as {expected}")]
    InvalidEntry {
        /// The offending key.
        key: &'static str,
        /// The expected type.
        expected: &'static str,
    },
    /// The selected code could not be loaded.
    #[error(transparent)]
    Code(#[from] StoreError),
    /// The total CPU count does not fit in an `i64`.
    #[error(
        "{nodes} nodes x {ntasks_per_node} tasks x {cpus_per_task} CPUs exceeds the supported CPU count"
    )]
    TooManyCpus {
        /// Number of machines.
        nodes: i64,
        /// Number of MPI tasks per machine.
        ntasks_per_node: i64,
        /// Number of CPUs per MPI task.
        cpus_per_task: i64,
    },
}

/// The code and resources of one calculation.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeParameters {
    /// The code to run.
    pub code: Rc<CodeRecord>,
    /// Number of machines.
    pub nodes: i64,
    /// Number of MPI tasks per machine.
    pub ntasks_per_node: i64,
    /// Number of CPUs per MPI task.
    pub cpus_per_task: i64,
    /// Wall-clock limit, in seconds.
    pub max_wallclock_seconds: i64,
    /// Explicit `pw.x` parallelization, e.g. `{"npool": 4}`.
    pub parallelization: Option<ValueMap>,
}

impl CodeParameters {
    /// Parameters without explicit parallelization.
    pub fn new(
        code: Rc<CodeRecord>,
        nodes: i64,
        ntasks_per_node: i64,
        cpus_per_task: i64,
        max_wallclock_seconds: i64,
    ) -> Self {
        Self {
            code,
            nodes,
            ntasks_per_node,
            cpus_per_task,
            max_wallclock_seconds,
            parallelization: None,
        }
    }

    /// Reads the parameters from a code state, loading the code from
    /// `store`. An empty `parallelization` counts as none.
    pub fn from_state(state: &ValueMap, store: &dyn CodeStore) -> Result<Self, CalculationError> {
        let uuid = state
            .get("code")
            .and_then(Value::as_str)
            .ok_or(CalculationError::InvalidEntry {
                key: "code",
                expected: "a str",
            })?;
        let int = |key: &'static str| {
            state
                .get(key)
                .and_then(Value::as_int)
                .ok_or(CalculationError::InvalidEntry {
                    key,
                    expected: "an int",
                })
        };
        let parallelization = match state.get("parallelization") {
            None | Some(Value::None) => None,
            Some(Value::Dict(dict)) => Some(dict.clone()).filter(|dict| !dict.is_empty()),
            Some(_) => {
                return Err(CalculationError::InvalidEntry {
                    key: "parallelization",
                    expected: "a dict",
                });
            }
        };
        Ok(Self {
            code: store.load_code(uuid)?,
            nodes: int("nodes")?,
            ntasks_per_node: int("ntasks_per_node")?,
            cpus_per_task: int("cpus_per_task")?,
            max_wallclock_seconds: int("max_wallclock_seconds")?,
            parallelization,
        })
    }

    /// Reads the parameters of a code model.
    pub fn from_model(model: &CodeModel, store: &dyn CodeStore) -> Result<Self, CalculationError> {
        Self::from_state(&model.get_model_state(), store)
    }
}

/// Scheduler resources of a calculation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    /// Number of machines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_machines: Option<i64>,
    /// Number of MPI processes per machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_mpiprocs_per_machine: Option<i64>,
    /// Number of cores per MPI process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cores_per_mpiproc: Option<i64>,
    /// Total number of CPUs, for schedulers allocating CPUs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<i64>,
}

/// Scheduler options of a calculation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Options {
    /// Requested resources.
    pub resources: Resources,
    /// Wall-clock limit, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wallclock_seconds: Option<i64>,
}

/// Metadata of a calculation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Scheduler options.
    pub options: Options,
}

/// The inputs of one calculation component of a workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ComponentInputs {
    /// Calculation metadata.
    pub metadata: Metadata,
    /// Explicit parallelization flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelization: Option<ValueMap>,
    /// Extra code settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<ValueMap>,
}

/// Writes the resources, wall-clock limit and parallelization of `params`
/// into `component`.
///
/// Schedulers that only allocate CPUs (HyperQueue) receive the total CPU
/// count; the others receive machines, processes per machine and cores per
/// process. `component` is left untouched if the total CPU count overflows.
pub fn set_component_resources(
    component: &mut ComponentInputs,
    params: &CodeParameters,
) -> Result<(), CalculationError> {
    let scheduler = params.code.computer.scheduler_type.as_str();
    let resources = &mut component.metadata.options.resources;
    if CPU_COUNT_SCHEDULERS.iter().any(|s| scheduler.contains(s)) {
        let num_cpus = params
            .nodes
            .checked_mul(params.ntasks_per_node)
            .and_then(|n| n.checked_mul(params.cpus_per_task))
            .ok_or(CalculationError::TooManyCpus {
                nodes: params.nodes,
                ntasks_per_node: params.ntasks_per_node,
                cpus_per_task: params.cpus_per_task,
            })?;
        *resources = Resources {
            num_cpus: Some(num_cpus),
            ..Resources::default()
        };
    } else {
        *resources = Resources {
            num_machines: Some(params.nodes),
            num_mpiprocs_per_machine: Some(params.ntasks_per_node),
            num_cores_per_mpiproc: Some(params.cpus_per_task),
            num_cpus: None,
        };
    }
    component.metadata.options.max_wallclock_seconds = Some(params.max_wallclock_seconds);
    if let Some(parallelization) = &params.parallelization {
        component.parallelization = Some(parallelization.clone());
    }
    Ok(())
}

/// Runs `pw.x` with pencil decomposition of the FFTs.
pub fn enable_pencil_decomposition(component: &mut ComponentInputs) {
    component
        .settings
        .get_or_insert_with(ValueMap::new)
        .insert("CMDLINE".into(), Value::list(["-pd", ".true."]));
}
