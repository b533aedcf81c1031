//! Interfaces to the workflow store, and an in-memory implementation.
//!
//! The models never talk to a database directly. Processes are resolved
//! through a [`ProcessStore`] and codes through a [`CodeStore`]. The
//! [`MemoryStore`] implements both and backs the tests.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::value::Value;

/// Errors raised by a store.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
    /// No process has the requested UUID.
    #[error("no process with UUID '{uuid}'")]
    ProcessNotFound {
        /// The requested UUID.
        uuid: String,
    },
    /// No code matches the identifier.
    #[error("no code matches '{identifier}'")]
    CodeNotFound {
        /// A UUID or `label@computer`.
        identifier: String,
    },
    /// Several codes match the identifier.
    #[error("{count} codes match '{identifier}'")]
    AmbiguousCode {
        /// A UUID or `label@computer`.
        identifier: String,
        /// How many codes matched.
        count: usize,
    },
}

/// The named inputs or outputs of a process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Namespace(IndexMap<String, Value>);

impl Namespace {
    /// An empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Looks up an entry.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether the namespace has an entry called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// The entry names, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The entries, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A stored workflow process.
pub trait ProcessNode: fmt::Debug {
    /// The process UUID.
    fn uuid(&self) -> &str;
    /// The label of the process class, e.g. `PwRelaxWorkChain`.
    fn process_label(&self) -> &str;
    /// Fetches the process inputs.
    fn inputs(&self) -> Namespace;
    /// Fetches the process outputs.
    fn outputs(&self) -> Namespace;
    /// Whether the process terminated successfully.
    fn is_finished_ok(&self) -> bool;
    /// The processes called by this one.
    fn called(&self) -> Vec<Rc<dyn ProcessNode>>;
    /// The creation time.
    fn ctime(&self) -> DateTime<Utc>;
}

/// Resolves process nodes.
pub trait ProcessStore {
    /// Looks a process up by UUID.
    fn get_node_by_uuid(&self, uuid: &str) -> Result<Rc<dyn ProcessNode>, StoreError>;
}

/// A computer codes run on.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputerRecord {
    /// The computer label.
    pub label: String,
    /// The scheduler plugin, e.g. `core.direct` or `hyperqueue`.
    pub scheduler_type: String,
    /// Whether the computer is enabled for the default user.
    pub enabled: bool,
    /// The default number of MPI processes per machine, if configured.
    pub default_mpiprocs_per_machine: Option<u32>,
}

impl ComputerRecord {
    /// An enabled computer.
    pub fn new(label: impl Into<String>, scheduler_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scheduler_type: scheduler_type.into(),
            enabled: true,
            default_mpiprocs_per_machine: None,
        }
    }

    /// Sets the default number of MPI processes per machine.
    pub fn with_mpiprocs_per_machine(mut self, mpiprocs: u32) -> Self {
        self.default_mpiprocs_per_machine = Some(mpiprocs);
        self
    }
}

/// An installed code.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeRecord {
    /// The code UUID.
    pub uuid: String,
    /// The code label.
    pub label: String,
    /// The calculation plugin the code runs, e.g. `quantumespresso.pw`.
    pub default_calc_job_plugin: String,
    /// The email of the user owning the code.
    pub user_email: String,
    /// Whether the code is hidden from selection.
    pub hidden: bool,
    /// The computer the code is installed on.
    pub computer: Rc<ComputerRecord>,
}

impl CodeRecord {
    /// The `label@computer` identifier.
    pub fn full_label(&self) -> String {
        format!("{}@{}", self.label, self.computer.label)
    }
}

/// Criteria for listing codes.
#[derive(Clone, Debug, PartialEq)]
pub struct CodeQuery<'a> {
    /// The calculation plugin the codes must run.
    pub default_calc_job_plugin: &'a str,
    /// The email of the user owning the codes.
    pub user_email: &'a str,
    /// Include hidden codes.
    pub include_hidden: bool,
    /// Include codes on disabled computers.
    pub include_disabled: bool,
}

impl CodeQuery<'_> {
    fn matches(&self, code: &CodeRecord) -> bool {
        code.default_calc_job_plugin == self.default_calc_job_plugin
            && code.user_email == self.user_email
            && (self.include_hidden || !code.hidden)
            && (self.include_disabled || code.computer.enabled)
    }
}

/// Resolves installed codes.
pub trait CodeStore {
    /// Lists the codes matching `query`, in installation order.
    fn find_codes(&self, query: &CodeQuery<'_>) -> Vec<Rc<CodeRecord>>;

    /// Loads a code by UUID or `label@computer`.
    fn load_code(&self, identifier: &str) -> Result<Rc<CodeRecord>, StoreError>;
}

/// A process kept in a [`MemoryStore`].
#[derive(Debug)]
pub struct ProcessRecord {
    uuid: String,
    process_label: String,
    inputs: Namespace,
    outputs: Namespace,
    finished_ok: bool,
    called: Vec<Rc<ProcessRecord>>,
    ctime: DateTime<Utc>,
    fetches: Cell<usize>,
}

impl ProcessRecord {
    /// A new, successfully finished process with a fresh UUID.
    pub fn new(process_label: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            process_label: process_label.into(),
            inputs: Namespace::new(),
            outputs: Namespace::new(),
            finished_ok: true,
            called: Vec::new(),
            ctime: Utc::now(),
            fetches: Cell::new(0),
        }
    }

    /// Adds an input.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name, value);
        self
    }

    /// Adds an output.
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name, value);
        self
    }

    /// Sets whether the process finished successfully.
    pub fn with_finished_ok(mut self, finished_ok: bool) -> Self {
        self.finished_ok = finished_ok;
        self
    }

    /// Adds a called process.
    pub fn with_called(mut self, child: Rc<ProcessRecord>) -> Self {
        self.called.push(child);
        self
    }

    /// Sets the creation time.
    pub fn with_ctime(mut self, ctime: DateTime<Utc>) -> Self {
        self.ctime = ctime;
        self
    }

    /// How many times the inputs or outputs were fetched.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }
}

impl ProcessNode for ProcessRecord {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn process_label(&self) -> &str {
        &self.process_label
    }

    fn inputs(&self) -> Namespace {
        self.fetches.set(self.fetches.get() + 1);
        self.inputs.clone()
    }

    fn outputs(&self) -> Namespace {
        self.fetches.set(self.fetches.get() + 1);
        self.outputs.clone()
    }

    fn is_finished_ok(&self) -> bool {
        self.finished_ok
    }

    fn called(&self) -> Vec<Rc<dyn ProcessNode>> {
        self.called
            .iter()
            .map(|child| child.clone() as Rc<dyn ProcessNode>)
            .collect()
    }

    fn ctime(&self) -> DateTime<Utc> {
        self.ctime
    }
}

/// An in-memory process and code store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    processes: RefCell<IndexMap<String, Rc<ProcessRecord>>>,
    codes: RefCell<Vec<Rc<CodeRecord>>>,
    lookups: Cell<usize>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a process, along with every process it called.
    pub fn add_process(&self, record: ProcessRecord) -> Rc<ProcessRecord> {
        let record = Rc::new(record);
        self.insert_process(&record);
        record
    }

    fn insert_process(&self, record: &Rc<ProcessRecord>) {
        for child in &record.called {
            self.insert_process(child);
        }
        debug!(uuid = %record.uuid, label = %record.process_label, "stored process");
        self.processes
            .borrow_mut()
            .insert(record.uuid.clone(), record.clone());
    }

    /// Installs a code on `computer` for the user `user_email`.
    pub fn add_code(
        &self,
        label: impl Into<String>,
        default_calc_job_plugin: impl Into<String>,
        user_email: impl Into<String>,
        computer: Rc<ComputerRecord>,
    ) -> Rc<CodeRecord> {
        let code = Rc::new(CodeRecord {
            uuid: Uuid::new_v4().to_string(),
            label: label.into(),
            default_calc_job_plugin: default_calc_job_plugin.into(),
            user_email: user_email.into(),
            hidden: false,
            computer,
        });
        debug!(code = %code.full_label(), uuid = %code.uuid, "installed code");
        self.codes.borrow_mut().push(code.clone());
        code
    }

    /// Hides or unhides a code.
    pub fn set_code_hidden(&self, uuid: &str, hidden: bool) -> Result<(), StoreError> {
        let mut codes = self.codes.borrow_mut();
        let code = codes
            .iter_mut()
            .find(|code| code.uuid == uuid)
            .ok_or_else(|| StoreError::CodeNotFound {
                identifier: uuid.to_owned(),
            })?;
        Rc::make_mut(code).hidden = hidden;
        Ok(())
    }

    /// How many process lookups were served.
    pub fn lookup_count(&self) -> usize {
        self.lookups.get()
    }
}

impl ProcessStore for MemoryStore {
    fn get_node_by_uuid(&self, uuid: &str) -> Result<Rc<dyn ProcessNode>, StoreError> {
        self.lookups.set(self.lookups.get() + 1);
        self.processes
            .borrow()
            .get(uuid)
            .map(|record| record.clone() as Rc<dyn ProcessNode>)
            .ok_or_else(|| StoreError::ProcessNotFound {
                uuid: uuid.to_owned(),
            })
    }
}

impl CodeStore for MemoryStore {
    fn find_codes(&self, query: &CodeQuery<'_>) -> Vec<Rc<CodeRecord>> {
        self.codes
            .borrow()
            .iter()
            .filter(|code| query.matches(code))
            .cloned()
            .collect()
    }

    fn load_code(&self, identifier: &str) -> Result<Rc<CodeRecord>, StoreError> {
        let codes = self.codes.borrow();
        let matches = codes
            .iter()
            .filter(|code| code.uuid == identifier || code.full_label() == identifier)
            .collect_vec();
        match matches.as_slice() {
            [code] => Ok(Rc::clone(code)),
            [] => Err(StoreError::CodeNotFound {
                identifier: identifier.to_owned(),
            }),
            _ => Err(StoreError::AmbiguousCode {
                identifier: identifier.to_owned(),
                count: matches.len(),
            }),
        }
    }
}
