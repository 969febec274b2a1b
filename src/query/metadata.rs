//! Schema view bridging class and association names to model identifiers.
//!
//! The planner navigates the metamodel, not the data: it needs class lookup by
//! name, subclass and superclass closures, and the associations a class takes
//! part in. [`SchemaView`] is that seam; [`InMemorySchema`] is the provider used
//! by tests, fixtures and the command-line front end.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a class in the schema view.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// Identifier of an association in the schema view.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct AssocId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregation kind of an association end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Plain reference.
    #[default]
    None,
    /// Shared aggregation.
    Shared,
    /// Composite (owning) aggregation.
    Composite,
}

/// One end of an association.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationEnd {
    /// End name, used by `origin end` / `destination end` filters.
    pub name: String,
    /// Declared type of the end.
    pub class: ClassId,
    /// Aggregation kind of the end.
    pub aggregation: Aggregation,
}

/// A binary association. It is an edge of the model graph from the class of
/// end 0 to the class of end 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Association {
    /// Identifier of the association.
    pub id: AssocId,
    /// Association name.
    pub name: String,
    /// Both ends, in declaration order.
    pub ends: [AssociationEnd; 2],
}

impl Association {
    /// Returns the end at `ordinal` (0 or 1).
    pub fn end(&self, ordinal: usize) -> &AssociationEnd {
        &self.ends[ordinal & 1]
    }

    /// True when either end is composite.
    pub fn is_composite(&self) -> bool {
        self.ends
            .iter()
            .any(|end| end.aggregation == Aggregation::Composite)
    }
}

/// Read-only view of the metamodel consumed by the planner and executor.
pub trait SchemaView {
    /// Resolves a class name to its identifier.
    fn class_by_name(&self, name: &str) -> Option<ClassId>;
    /// Resolves a class identifier back to its name.
    fn class_name(&self, class: ClassId) -> Option<&str>;
    /// All strict superclasses of `class`, transitively.
    fn superclasses(&self, class: ClassId) -> BTreeSet<ClassId>;
    /// All strict subclasses of `class`, transitively.
    fn subclasses(&self, class: ClassId) -> BTreeSet<ClassId>;
    /// Looks up an association by identifier.
    fn association(&self, assoc: AssocId) -> Option<&Association>;
    /// Associations whose end 0 type is `class` or one of its superclasses.
    fn outgoing_associations(&self, class: ClassId) -> Vec<AssocId>;
    /// Associations whose end 1 type is `class` or one of its superclasses.
    fn incoming_associations(&self, class: ClassId) -> Vec<AssocId>;
    /// Whether `attribute` is declared on `class` or inherited by it.
    fn has_attribute(&self, class: ClassId, attribute: &str) -> bool;

    /// Display name for a class, falling back to its numeric identifier.
    fn display_class(&self, class: ClassId) -> String {
        self.class_name(class)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("#{class}"))
    }
}

/// Errors raised while assembling an [`InMemorySchema`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A class was defined twice.
    #[error("class {0} already defined")]
    DuplicateClass(String),
    /// A superclass or association end referenced an undefined class.
    #[error("class {0} is not defined")]
    UndefinedClass(String),
}

/// Description of an association end used when defining associations.
#[derive(Clone, Debug)]
pub struct EndSpec<'a> {
    /// End name.
    pub name: &'a str,
    /// Name of the end's declared type.
    pub class: &'a str,
    /// Aggregation kind.
    pub aggregation: Aggregation,
}

impl<'a> EndSpec<'a> {
    /// Creates a non-aggregating end.
    pub fn new(name: &'a str, class: &'a str) -> Self {
        Self {
            name,
            class,
            aggregation: Aggregation::None,
        }
    }

    /// Creates a composite end.
    pub fn composite(name: &'a str, class: &'a str) -> Self {
        Self {
            name,
            class,
            aggregation: Aggregation::Composite,
        }
    }
}

#[derive(Clone, Debug)]
struct ClassDef {
    name: String,
    superclasses: Vec<ClassId>,
    subclasses: Vec<ClassId>,
    attributes: BTreeSet<String>,
}

/// In-memory schema view used for tests, fixtures, and prototyping.
#[derive(Clone, Debug, Default)]
pub struct InMemorySchema {
    classes: Vec<ClassDef>,
    by_name: FxHashMap<String, ClassId>,
    associations: Vec<Association>,
}

impl InMemorySchema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a class. Superclasses must already be defined.
    pub fn add_class(
        &mut self,
        name: &str,
        superclasses: &[&str],
        attributes: &[&str],
    ) -> Result<ClassId, SchemaError> {
        if self.by_name.contains_key(name) {
            return Err(SchemaError::DuplicateClass(name.to_owned()));
        }
        let supers = superclasses
            .iter()
            .map(|sup| self.require_class(sup))
            .collect::<Result<Vec<_>, _>>()?;
        let id = ClassId(self.classes.len() as u32);
        for sup in &supers {
            self.classes[sup.0 as usize].subclasses.push(id);
        }
        self.classes.push(ClassDef {
            name: name.to_owned(),
            superclasses: supers,
            subclasses: Vec::new(),
            attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
        });
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Defines an association between two already-defined classes.
    pub fn add_association(
        &mut self,
        name: &str,
        ends: [EndSpec<'_>; 2],
    ) -> Result<AssocId, SchemaError> {
        let [first, second] = ends;
        let id = AssocId(self.associations.len() as u32);
        let first = AssociationEnd {
            name: first.name.to_owned(),
            class: self.require_class(first.class)?,
            aggregation: first.aggregation,
        };
        let second = AssociationEnd {
            name: second.name.to_owned(),
            class: self.require_class(second.class)?,
            aggregation: second.aggregation,
        };
        self.associations.push(Association {
            id,
            name: name.to_owned(),
            ends: [first, second],
        });
        Ok(id)
    }

    /// Resolves an association name to the identifiers carrying it.
    pub fn associations_named(&self, name: &str) -> Vec<AssocId> {
        self.associations
            .iter()
            .filter(|assoc| assoc.name == name)
            .map(|assoc| assoc.id)
            .collect()
    }

    /// Number of classes defined so far.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn require_class(&self, name: &str) -> Result<ClassId, SchemaError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UndefinedClass(name.to_owned()))
    }

    fn class(&self, class: ClassId) -> Option<&ClassDef> {
        self.classes.get(class.0 as usize)
    }

    fn closure(&self, class: ClassId, next: impl Fn(&ClassDef) -> &[ClassId]) -> BTreeSet<ClassId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            let Some(def) = self.class(current) else {
                continue;
            };
            for &neighbor in next(def) {
                if seen.insert(neighbor) {
                    stack.push(neighbor);
                }
            }
        }
        seen
    }

    fn associations_at_end(&self, class: ClassId, ordinal: usize) -> Vec<AssocId> {
        let mut lineage = self.superclasses(class);
        lineage.insert(class);
        self.associations
            .iter()
            .filter(|assoc| lineage.contains(&assoc.end(ordinal).class))
            .map(|assoc| assoc.id)
            .collect()
    }
}

impl SchemaView for InMemorySchema {
    fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    fn class_name(&self, class: ClassId) -> Option<&str> {
        self.class(class).map(|def| def.name.as_str())
    }

    fn superclasses(&self, class: ClassId) -> BTreeSet<ClassId> {
        self.closure(class, |def| def.superclasses.as_slice())
    }

    fn subclasses(&self, class: ClassId) -> BTreeSet<ClassId> {
        self.closure(class, |def| def.subclasses.as_slice())
    }

    fn association(&self, assoc: AssocId) -> Option<&Association> {
        self.associations.get(assoc.0 as usize)
    }

    fn outgoing_associations(&self, class: ClassId) -> Vec<AssocId> {
        self.associations_at_end(class, 0)
    }

    fn incoming_associations(&self, class: ClassId) -> Vec<AssocId> {
        self.associations_at_end(class, 1)
    }

    fn has_attribute(&self, class: ClassId, attribute: &str) -> bool {
        let mut lineage = self.superclasses(class);
        lineage.insert(class);
        lineage.into_iter().any(|id| {
            self.class(id)
                .is_some_and(|def| def.attributes.contains(attribute))
        })
    }
}
