//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::rc::Rc;

use qeapp::config::DEFAULT_USER_EMAIL;
use qeapp::store::{CodeRecord, ComputerRecord, MemoryStore, ProcessRecord};
use qeapp::structure::Site;
use qeapp::value::Object;
use qeapp::{StructureData, Value};
use rstest::fixture;

/// Predefined structures.
#[derive(Clone, Copy, Debug)]
pub enum Preset {
    Silicon,
    Silica,
    Water,
}

/// Builds a structure from a preset, optionally overriding its sites.
pub fn generate_structure_data(
    preset: Preset,
    pbc: [bool; 3],
    sites: Option<Vec<(&str, &str, [f64; 3])>>,
) -> Rc<StructureData> {
    let (cell, default_sites) = match preset {
        Preset::Silicon => (
            [[3.84737, 0.0, 0.0], [1.923685, 3.33192, 0.0], [1.923685, 1.11064, 3.141364]],
            vec![
                ("Si", "Si", [0.0, 0.0, 0.0]),
                ("Si", "Si", [1.923685, 1.11064, 0.785341]),
            ],
        ),
        Preset::Silica => (
            [[4.18, 0.0, 0.0], [0.0, 4.18, 0.0], [0.0, 0.0, 2.66]],
            vec![
                ("Si", "Si", [0.0, 0.0, 0.0]),
                ("Si", "Si", [2.09, 2.09, 1.33]),
                ("O", "O", [-1.28, -1.28, 0.0]),
                ("O", "O", [1.28, 1.28, 0.0]),
                ("O", "O", [-3.37, 0.81, 1.33]),
                ("O", "O", [0.81, -3.37, 1.33]),
            ],
        ),
        Preset::Water => (
            [[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]],
            vec![
                ("H", "H", [0.0, 0.0, 0.0]),
                ("O", "O", [0.0, 0.0, 0.975]),
                ("H", "H", [0.0, 0.939, 1.2]),
            ],
        ),
    };
    let structure = StructureData::new(cell);
    structure.set_pbc(pbc);
    for (kind_name, symbol, position) in sites.unwrap_or(default_sites) {
        structure.append_atom(Site::new(kind_name, symbol, position));
    }
    Rc::new(structure)
}

#[fixture]
pub fn silicon() -> Rc<StructureData> {
    generate_structure_data(Preset::Silicon, [true; 3], None)
}

#[fixture]
pub fn store() -> Rc<MemoryStore> {
    Rc::new(MemoryStore::new())
}

/// Stores a finished workchain that relaxed silicon.
pub fn mock_workchain_node(store: &MemoryStore) -> Rc<ProcessRecord> {
    let structure = Object::from_rc(generate_structure_data(Preset::Silicon, [true; 3], None));
    store.add_process(
        ProcessRecord::new("MockWorkChain")
            .with_input("properties", Value::list(["relax"]))
            .with_output("structure", structure),
    )
}

/// Installs `pw` on `localhost` for the default user.
pub fn pw_code(store: &MemoryStore) -> Rc<CodeRecord> {
    let localhost = Rc::new(ComputerRecord::new("localhost", "core.direct"));
    store.add_code("pw", "quantumespresso.pw", DEFAULT_USER_EMAIL, localhost)
}
