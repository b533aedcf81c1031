//! Model classes: the composition of mixins and trait declarations that a
//! [`Model`](crate::Model) is instantiated from.
//!
//! A class is assembled with a [`ModelClassBuilder`]. Whatever order the bases
//! are declared in, the observable root [`Base::HasTraits`] is removed from the
//! declared list and appended exactly once at the end of the resolution order,
//! while the relative order of the mixins is preserved:
//!
//! ```
//! # use qeapp_core::class::{Base, Mixin, ModelClass};
//! let class = ModelClass::builder("Dummy")
//!     .base(Base::HasTraits)
//!     .mixin(Mixin::HasBlockers)
//!     .mixin(Mixin::Confirmable)
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     class.mro(),
//!     [
//!         Base::Mixin(Mixin::HasBlockers),
//!         Base::Mixin(Mixin::Confirmable),
//!         Base::HasTraits
//!     ]
//! );
//! ```

use std::rc::Rc;

use derive_more::Display;
use indexmap::IndexMap;
use itertools::Itertools;
use smol_str::SmolStr;
use strum::{EnumIter, IntoStaticStr};
use thiserror::Error;

use crate::mixins::{blockers, confirmable, process, structure};
use crate::traits::{TraitError, TraitName, TraitSpec};

/// A reusable behaviour contributing traits to a model class.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[non_exhaustive]
pub enum Mixin {
    /// A `confirmed` flag cleared by any other change.
    Confirmable,
    /// A list of reasons blocking an action.
    HasBlockers,
    /// A registry of named child models.
    HasModels,
    /// A lazily resolved handle to a workflow process.
    HasProcess,
    /// An attached input structure.
    HasInputStructure,
}

impl Mixin {
    /// The traits the mixin declares on every class it is part of.
    pub fn traits(&self) -> Vec<TraitSpec> {
        match self {
            Mixin::Confirmable => vec![TraitSpec::bool(confirmable::CONFIRMED, false)],
            Mixin::HasBlockers => vec![
                TraitSpec::list(blockers::BLOCKERS),
                TraitSpec::list(blockers::BLOCKER_MESSAGES),
            ],
            Mixin::HasModels => vec![],
            Mixin::HasProcess => vec![
                TraitSpec::optional_unicode(process::PROCESS_UUID),
                TraitSpec::int(process::MONITOR_COUNTER, 0),
            ],
            Mixin::HasInputStructure => {
                vec![TraitSpec::instance::<crate::StructureData>(
                    structure::INPUT_STRUCTURE,
                )]
            }
        }
    }
}

/// An entry in a class's ancestor resolution order.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Base {
    /// A behavioural mixin.
    #[display("{_0}")]
    Mixin(Mixin),
    /// The observable root, always last.
    HasTraits,
}

impl From<Mixin> for Base {
    fn from(mixin: Mixin) -> Self {
        Base::Mixin(mixin)
    }
}

/// Errors detected while composing a model class.
///
/// These indicate a programming error in the class definition.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum CompositionError {
    /// A mixin was listed twice among the declared bases.
    #[error("{class} declares the {mixin} mixin more than once")]
    DuplicateMixin {
        /// Class being built.
        class: SmolStr,
        /// The repeated mixin.
        mixin: Mixin,
    },
    /// Two bases declare the same trait with incompatible kinds.
    #[error("{class} inherits conflicting declarations of '{name}' from {first} and {second}")]
    ConflictingTrait {
        /// Class being built.
        class: SmolStr,
        /// The conflicting trait.
        name: TraitName,
        /// Owner of the first declaration.
        first: SmolStr,
        /// Owner of the second declaration.
        second: SmolStr,
    },
    /// A declared default does not satisfy its own trait.
    #[error("{class} declares an invalid default for '{name}'")]
    InvalidDefault {
        /// Class being built.
        class: SmolStr,
        /// The trait with the invalid default.
        name: TraitName,
        /// Why the default was rejected.
        #[source]
        source: TraitError,
    },
    /// A dependency names a trait the class does not declare.
    #[error("{class} depends on '{dependency}' but declares no trait '{name}'")]
    UnknownDependency {
        /// Class being built.
        class: SmolStr,
        /// The full dependency path.
        dependency: SmolStr,
        /// The missing trait.
        name: TraitName,
    },
}

/// A composed model class.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelClass {
    name: SmolStr,
    mro: Vec<Base>,
    traits: IndexMap<TraitName, TraitSpec>,
    dependencies: Vec<SmolStr>,
}

impl ModelClass {
    /// Starts building a class called `name`.
    pub fn builder(name: impl Into<SmolStr>) -> ModelClassBuilder {
        ModelClassBuilder {
            name: name.into(),
            parent: None,
            bases: Vec::new(),
            traits: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved ancestor order. [`Base::HasTraits`] is always the last entry.
    pub fn mro(&self) -> &[Base] {
        &self.mro
    }

    /// The mixins of the class, in resolution order.
    pub fn mixins(&self) -> impl Iterator<Item = Mixin> + '_ {
        self.mro.iter().filter_map(|base| match base {
            Base::Mixin(m) => Some(*m),
            Base::HasTraits => None,
        })
    }

    /// Returns `true` if `mixin` is part of the class.
    pub fn has_mixin(&self, mixin: Mixin) -> bool {
        self.mro.contains(&Base::Mixin(mixin))
    }

    /// All trait declarations, mixin traits first.
    pub fn traits(&self) -> impl Iterator<Item = &TraitSpec> {
        self.traits.values()
    }

    /// Looks up a trait declaration.
    pub fn get_trait(&self, name: &str) -> Option<&TraitSpec> {
        self.traits.get(name)
    }

    /// Traits that a parent model propagates into instances of this class
    /// when they are registered as children.
    ///
    /// Entries are either a plain trait name, linked from the parent, or
    /// `"sibling.trait"`, linked from the sibling registered under `sibling`.
    pub fn dependencies(&self) -> &[SmolStr] {
        &self.dependencies
    }
}

/// Builder for [`ModelClass`].
#[derive(Clone, Debug)]
#[must_use]
pub struct ModelClassBuilder {
    name: SmolStr,
    parent: Option<Rc<ModelClass>>,
    bases: Vec<Base>,
    traits: Vec<TraitSpec>,
    dependencies: Vec<SmolStr>,
}

impl ModelClassBuilder {
    /// Inherits the bases, traits and dependencies of `parent`.
    pub fn extends(mut self, parent: &Rc<ModelClass>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Appends a declared base.
    pub fn base(mut self, base: impl Into<Base>) -> Self {
        self.bases.push(base.into());
        self
    }

    /// Appends a mixin to the declared bases.
    pub fn mixin(self, mixin: Mixin) -> Self {
        self.base(mixin)
    }

    /// Declares a trait. Redeclaring an inherited trait of the same kind
    /// overrides its default.
    pub fn add_trait(mut self, spec: TraitSpec) -> Self {
        self.traits.push(spec);
        self
    }

    /// Declares several traits.
    pub fn add_traits(mut self, specs: impl IntoIterator<Item = TraitSpec>) -> Self {
        self.traits.extend(specs);
        self
    }

    /// Declares dependencies, see [`ModelClass::dependencies`].
    pub fn dependencies(
        mut self,
        deps: impl IntoIterator<Item = impl Into<SmolStr>>,
    ) -> Self {
        self.dependencies.extend(deps.into_iter().map_into());
        self
    }

    /// Resolves the ancestor order and merges trait declarations.
    pub fn build(self) -> Result<Rc<ModelClass>, CompositionError> {
        let class = self.name;

        let mut declared = Vec::new();
        for base in self.bases {
            let Base::Mixin(mixin) = base else {
                continue;
            };
            if declared.contains(&mixin) {
                return Err(CompositionError::DuplicateMixin { class, mixin });
            }
            declared.push(mixin);
        }

        let inherited = self.parent.iter().flat_map(|p| p.mixins());
        let mixins: Vec<Mixin> = inherited.chain(declared).unique().collect();
        let mro = mixins
            .iter()
            .copied()
            .map(Base::Mixin)
            .chain([Base::HasTraits])
            .collect_vec();

        let mut traits: IndexMap<TraitName, (SmolStr, TraitSpec)> = IndexMap::new();
        if let Some(parent) = &self.parent {
            for spec in parent.traits() {
                traits.insert(spec.name().clone(), (parent.name.clone(), spec.clone()));
            }
        }
        for mixin in &mixins {
            let owner: &'static str = mixin.into();
            for spec in mixin.traits() {
                match traits.get(spec.name()) {
                    Some((first, existing)) if !existing.kind().same_shape(spec.kind()) => {
                        return Err(CompositionError::ConflictingTrait {
                            class,
                            name: spec.name().clone(),
                            first: first.clone(),
                            second: owner.into(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        traits.insert(spec.name().clone(), (owner.into(), spec));
                    }
                }
            }
        }
        for spec in self.traits {
            if let Some((first, existing)) = traits.get(spec.name()) {
                if !existing.kind().same_shape(spec.kind()) {
                    return Err(CompositionError::ConflictingTrait {
                        class: class.clone(),
                        name: spec.name().clone(),
                        first: first.clone(),
                        second: class,
                    });
                }
            }
            traits.insert(spec.name().clone(), (class.clone(), spec));
        }

        let mut dependencies = self
            .parent
            .as_ref()
            .map(|p| p.dependencies.clone())
            .unwrap_or_default();
        for dep in self.dependencies {
            let name = dep.rsplit_once('.').map_or(dep.as_str(), |(_, name)| name);
            if !traits.contains_key(name) {
                return Err(CompositionError::UnknownDependency {
                    class,
                    name: name.into(),
                    dependency: dep,
                });
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        let traits = traits
            .into_iter()
            .map(|(name, (_, spec))| match spec.checked(&class) {
                Ok(spec) => Ok((name, spec)),
                Err(source) => Err(CompositionError::InvalidDefault {
                    class: class.clone(),
                    name,
                    source,
                }),
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;

        Ok(Rc::new(ModelClass {
            name: class,
            mro,
            traits,
            dependencies,
        }))
    }
}
