//! Atomic structures attached to models.
//!
//! [`StructureData`] stands in for the store's structure node. It is shared
//! through an [`Object`](crate::Object) handle, so in-place edits (for instance
//! to the periodic boundary flags) are visible to every model holding it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use crate::value::ObjectValue;

/// A cartesian position, in Ångström.
pub type Position = [f64; 3];

/// A site of a structure.
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    /// The kind label, e.g. `Si1` for a tagged silicon.
    pub kind_name: String,
    /// The chemical symbol.
    pub symbol: String,
    /// The site position.
    pub position: Position,
}

impl Site {
    /// A new site.
    pub fn new(kind_name: impl Into<String>, symbol: impl Into<String>, position: Position) -> Self {
        Self {
            kind_name: kind_name.into(),
            symbol: symbol.into(),
            position,
        }
    }

    /// Whether the kind label differs from the chemical symbol.
    pub fn is_tagged(&self) -> bool {
        self.kind_name != self.symbol
    }
}

/// A periodic atomic structure.
#[derive(Debug, Default)]
pub struct StructureData {
    cell: [[f64; 3]; 3],
    pbc: Cell<[bool; 3]>,
    sites: RefCell<Vec<Site>>,
}

impl ObjectValue for StructureData {}

impl StructureData {
    /// An empty, fully periodic structure with the given cell.
    pub fn new(cell: [[f64; 3]; 3]) -> Self {
        Self {
            cell,
            pbc: Cell::new([true; 3]),
            sites: RefCell::default(),
        }
    }

    /// The cell vectors.
    pub fn cell(&self) -> [[f64; 3]; 3] {
        self.cell
    }

    /// The periodic boundary flags along each cell vector.
    pub fn pbc(&self) -> [bool; 3] {
        self.pbc.get()
    }

    /// Replaces the periodic boundary flags.
    pub fn set_pbc(&self, pbc: [bool; 3]) {
        self.pbc.set(pbc);
    }

    /// Appends a site.
    pub fn append_atom(&self, site: Site) {
        self.sites.borrow_mut().push(site);
    }

    /// A copy of the sites, in order.
    pub fn sites(&self) -> Vec<Site> {
        self.sites.borrow().clone()
    }

    /// The number of sites.
    pub fn num_sites(&self) -> usize {
        self.sites.borrow().len()
    }

    /// The distinct kind labels, in order of first appearance.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = Vec::new();
        for site in self.sites.borrow().iter() {
            if !kinds.contains(&site.kind_name) {
                kinds.push(site.kind_name.clone());
            }
        }
        kinds
    }

    /// The set of chemical symbols.
    pub fn symbols_set(&self) -> BTreeSet<String> {
        self.sites
            .borrow()
            .iter()
            .map(|site| site.symbol.clone())
            .collect()
    }

    /// Whether any site's kind label differs from its symbol.
    pub fn has_tags(&self) -> bool {
        self.sites.borrow().iter().any(Site::is_tagged)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn silica() -> StructureData {
        let structure = StructureData::new([[4.18, 0.0, 0.0], [0.0, 4.18, 0.0], [0.0, 0.0, 2.66]]);
        structure.append_atom(Site::new("Si", "Si", [0.0, 0.0, 0.0]));
        structure.append_atom(Site::new("O1", "O", [0.81, 3.37, 1.33]));
        structure.append_atom(Site::new("O2", "O", [1.28, 1.28, 0.0]));
        structure.append_atom(Site::new("O1", "O", [2.9, 2.9, 0.0]));
        structure
    }

    #[test]
    fn kinds_and_symbols() {
        let structure = silica();
        assert_eq!(structure.num_sites(), 4);
        assert_eq!(structure.kinds(), ["Si", "O1", "O2"]);
        assert_eq!(
            structure.symbols_set().into_iter().collect::<Vec<_>>(),
            ["O", "Si"]
        );
        assert!(structure.has_tags());
    }

    #[test]
    fn pbc_is_mutable_in_place() {
        let structure = silica();
        assert_eq!(structure.pbc(), [true; 3]);
        structure.set_pbc([true, true, false]);
        assert_eq!(structure.pbc(), [true, true, false]);
    }
}
