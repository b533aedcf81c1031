//! Flags derived from an attached input structure.

use std::rc::Rc;

use crate::model::{Model, Observable};
use crate::structure::StructureData;
use crate::traits::TraitError;
use crate::value::Object;

/// Name of the trait holding the input structure.
pub const INPUT_STRUCTURE: &str = "input_structure";

/// Models that operate on an input structure.
///
/// The class must include
/// [`Mixin::HasInputStructure`](crate::Mixin::HasInputStructure). The derived
/// flags are computed from the currently attached structure on every read, so
/// they follow both replacement of the structure and in-place edits to it.
pub trait HasInputStructure: Observable {
    /// The attached structure.
    fn input_structure(&self) -> Option<Rc<StructureData>> {
        self.model()
            .declared::<Option<Object>>(INPUT_STRUCTURE)
            .and_then(|object| object.downcast_rc())
    }

    /// Attaches or detaches a structure.
    fn set_input_structure(&self, structure: Option<Rc<StructureData>>) -> Result<(), TraitError> {
        self.model()
            .set(INPUT_STRUCTURE, structure.map(Object::from_rc))?;
        Ok(())
    }

    /// Whether a structure is attached.
    fn has_structure(&self) -> bool {
        self.input_structure().is_some()
    }

    /// Whether the attached structure is periodic along any axis.
    fn has_pbc(&self) -> bool {
        self.input_structure()
            .is_some_and(|structure| structure.pbc().iter().any(|&p| p))
    }

    /// Whether any site of the attached structure carries a tag.
    fn has_tags(&self) -> bool {
        self.input_structure()
            .is_some_and(|structure| structure.has_tags())
    }
}

impl HasInputStructure for Model {}
