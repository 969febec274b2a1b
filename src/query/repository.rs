//! Live object access used by the executor.
//!
//! The executor never sees storage: it scans class extents, dereferences
//! identity strings, checks runtime types, reads attributes and navigates
//! associations through [`Repository`]. Subquery filters go through
//! [`SqlConnection`].

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::metadata::{AssocId, ClassId, InMemorySchema, SchemaView};
use crate::query::value::Value;

/// Opaque handle to a repository object.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ObjectRef(pub u64);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by an external collaborator (repository or SQL engine).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExternalError {
    message: String,
}

impl ExternalError {
    /// Wraps a failure message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The wrapped message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Object repository queried by the executor.
pub trait Repository {
    /// All instances of `class`, including instances of its subclasses.
    fn all_of_type(&self, class: ClassId) -> Result<Vec<ObjectRef>, ExternalError>;
    /// Dereferences an identity string.
    fn object_by_id(&self, id: &str) -> Result<Option<ObjectRef>, ExternalError>;
    /// Identity string of an object.
    fn object_id(&self, obj: ObjectRef) -> Result<String, ExternalError>;
    /// Runtime type check; true when the object's class is `class` or a subclass.
    fn is_instance_of(&self, obj: ObjectRef, class: ClassId) -> Result<bool, ExternalError>;
    /// Attribute value, [`Value::Null`] when unset.
    fn attribute_value(&self, obj: ObjectRef, attribute: &str) -> Result<Value, ExternalError>;
    /// Objects linked to `obj` through `assoc`, where `obj` plays `origin_end`.
    fn navigate(
        &self,
        assoc: AssocId,
        origin_end: usize,
        obj: ObjectRef,
    ) -> Result<Vec<ObjectRef>, ExternalError>;
}

/// Connection able to run single-column SQL queries for subquery filters.
pub trait SqlConnection {
    /// Runs `sql` and returns the first column of every row as a string.
    fn query_single_column(&self, sql: &str) -> Result<Vec<String>, ExternalError>;
}

#[derive(Clone, Debug)]
struct ObjectRecord {
    id: String,
    class: ClassId,
    attributes: FxHashMap<String, Value>,
}

/// In-memory repository over an [`InMemorySchema`].
#[derive(Clone, Debug)]
pub struct InMemoryRepository {
    schema: Arc<InMemorySchema>,
    objects: Vec<ObjectRecord>,
    by_id: FxHashMap<String, ObjectRef>,
    links: FxHashMap<(AssocId, usize, ObjectRef), Vec<ObjectRef>>,
}

impl InMemoryRepository {
    /// Creates an empty repository for `schema`.
    pub fn new(schema: Arc<InMemorySchema>) -> Self {
        Self {
            schema,
            objects: Vec::new(),
            by_id: FxHashMap::default(),
            links: FxHashMap::default(),
        }
    }

    /// The schema this repository was created for.
    pub fn schema(&self) -> &Arc<InMemorySchema> {
        &self.schema
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Creates an object of class `class_name` with identity `id`.
    pub fn add_object(&mut self, id: &str, class_name: &str) -> Result<ObjectRef, ExternalError> {
        if self.by_id.contains_key(id) {
            return Err(ExternalError::new(format!("object {id} already exists")));
        }
        let class = self
            .schema
            .class_by_name(class_name)
            .ok_or_else(|| ExternalError::new(format!("unknown class {class_name}")))?;
        let obj = ObjectRef(self.objects.len() as u64);
        self.objects.push(ObjectRecord {
            id: id.to_owned(),
            class,
            attributes: FxHashMap::default(),
        });
        self.by_id.insert(id.to_owned(), obj);
        Ok(obj)
    }

    /// Sets an attribute value on an existing object.
    pub fn set_attribute(
        &mut self,
        obj: ObjectRef,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), ExternalError> {
        let record = self
            .objects
            .get_mut(obj.0 as usize)
            .ok_or_else(|| ExternalError::new(format!("no object {obj}")))?;
        record.attributes.insert(attribute.to_owned(), value.into());
        Ok(())
    }

    /// Links `ends[0]` and `ends[1]` through `assoc`.
    pub fn link(&mut self, assoc: AssocId, ends: [ObjectRef; 2]) -> Result<(), ExternalError> {
        let association = self
            .schema
            .association(assoc)
            .ok_or_else(|| ExternalError::new(format!("unknown association {assoc}")))?;
        for (ordinal, obj) in ends.iter().enumerate() {
            if !self.is_instance_of(*obj, association.end(ordinal).class)? {
                return Err(ExternalError::new(format!(
                    "object {} cannot play end {} of {}",
                    self.object_id(*obj)?,
                    association.end(ordinal).name,
                    association.name
                )));
            }
        }
        let [first, second] = ends;
        self.links.entry((assoc, 0, first)).or_default().push(second);
        self.links.entry((assoc, 1, second)).or_default().push(first);
        Ok(())
    }

    /// Links two objects through the first association named `name` whose end
    /// types accept them.
    pub fn link_named(&mut self, name: &str, ends: [ObjectRef; 2]) -> Result<(), ExternalError> {
        for assoc in self.schema.associations_named(name) {
            let Some(association) = self.schema.association(assoc) else {
                continue;
            };
            if self.is_instance_of(ends[0], association.end(0).class)?
                && self.is_instance_of(ends[1], association.end(1).class)?
            {
                return self.link(assoc, ends);
            }
        }
        Err(ExternalError::new(format!(
            "no association {name} accepts {} -> {}",
            self.object_id(ends[0])?,
            self.object_id(ends[1])?
        )))
    }

    fn record(&self, obj: ObjectRef) -> Result<&ObjectRecord, ExternalError> {
        self.objects
            .get(obj.0 as usize)
            .ok_or_else(|| ExternalError::new(format!("no object {obj}")))
    }
}

impl Repository for InMemoryRepository {
    fn all_of_type(&self, class: ClassId) -> Result<Vec<ObjectRef>, ExternalError> {
        let mut accepted = self.schema.subclasses(class);
        accepted.insert(class);
        Ok(self
            .objects
            .iter()
            .enumerate()
            .filter(|(_, record)| accepted.contains(&record.class))
            .map(|(idx, _)| ObjectRef(idx as u64))
            .collect())
    }

    fn object_by_id(&self, id: &str) -> Result<Option<ObjectRef>, ExternalError> {
        Ok(self.by_id.get(id).copied())
    }

    fn object_id(&self, obj: ObjectRef) -> Result<String, ExternalError> {
        self.record(obj).map(|record| record.id.clone())
    }

    fn is_instance_of(&self, obj: ObjectRef, class: ClassId) -> Result<bool, ExternalError> {
        let actual = self.record(obj)?.class;
        Ok(actual == class || self.schema.superclasses(actual).contains(&class))
    }

    fn attribute_value(&self, obj: ObjectRef, attribute: &str) -> Result<Value, ExternalError> {
        Ok(self
            .record(obj)?
            .attributes
            .get(attribute)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn navigate(
        &self,
        assoc: AssocId,
        origin_end: usize,
        obj: ObjectRef,
    ) -> Result<Vec<ObjectRef>, ExternalError> {
        Ok(self
            .links
            .get(&(assoc, origin_end, obj))
            .cloned()
            .unwrap_or_default())
    }
}
