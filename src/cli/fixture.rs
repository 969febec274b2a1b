//! JSON model dumps and query files for the command-line front end.
//!
//! A model dump carries the metamodel (classes and associations) together with
//! the repository contents (objects and links) so a query can be planned and
//! run without a live repository:
//!
//! ```json
//! {
//!   "classes": [{"name": "Folder", "attributes": ["name"]}],
//!   "associations": [{"name": "Contains", "ends": [
//!       {"name": "parent", "class": "Folder", "aggregation": "composite"},
//!       {"name": "child", "class": "Folder"}]}],
//!   "objects": [{"id": "F1", "class": "Folder", "attributes": {"name": "root"}}],
//!   "links": [{"association": "Contains", "ends": ["F1", "F2"]}]
//! }
//! ```
//!
//! Attribute values are JSON scalars, or `{"ref": "<id>"}` for references.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::query::ast::Query;
use crate::query::metadata::{Aggregation, EndSpec, InMemorySchema, SchemaError};
use crate::query::repository::{ExternalError, InMemoryRepository, ObjectRef, Repository};
use crate::query::value::Value;

/// Errors raised while loading fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid JSON for the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying JSON failure.
        source: serde_json::Error,
    },
    /// The metamodel section is inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The repository section is inconsistent.
    #[error(transparent)]
    Repository(#[from] ExternalError),
    /// An attribute value is neither a scalar nor a reference.
    #[error("object {object}: attribute {attribute} must be a scalar or {{\"ref\": id}}")]
    UnsupportedValue {
        /// Object identity.
        object: String,
        /// Attribute name.
        attribute: String,
    },
    /// A reference names an object the dump does not define.
    #[error("object {object}: attribute {attribute} references unknown object {target}")]
    DanglingReference {
        /// Object identity.
        object: String,
        /// Attribute name.
        attribute: String,
        /// Referenced identity.
        target: String,
    },
}

/// Schema and repository built from a model dump.
#[derive(Clone, Debug)]
pub struct LoadedModel {
    /// Metamodel.
    pub schema: Arc<InMemorySchema>,
    /// Objects and links.
    pub repository: Arc<InMemoryRepository>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelDump {
    #[serde(default)]
    classes: Vec<ClassDump>,
    #[serde(default)]
    associations: Vec<AssociationDump>,
    #[serde(default)]
    objects: Vec<ObjectDump>,
    #[serde(default)]
    links: Vec<LinkDump>,
}

#[derive(Debug, Deserialize)]
struct ClassDump {
    name: String,
    #[serde(default)]
    superclasses: Vec<String>,
    #[serde(default)]
    attributes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssociationDump {
    name: String,
    ends: [EndDump; 2],
}

#[derive(Debug, Deserialize)]
struct EndDump {
    name: String,
    class: String,
    #[serde(default)]
    aggregation: Aggregation,
}

#[derive(Debug, Deserialize)]
struct ObjectDump {
    id: String,
    class: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeDump>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AttributeDump {
    Ref {
        #[serde(rename = "ref")]
        target: String,
    },
    Scalar(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct LinkDump {
    association: String,
    ends: [String; 2],
}

/// Reads a model dump from `path`.
pub fn load_model(path: &Path) -> Result<LoadedModel, FixtureError> {
    let contents = read(path)?;
    let dump: ModelDump =
        serde_json::from_str(&contents).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    build_model(dump)
}

/// Parses a model dump held in memory.
pub fn parse_model(json: &str) -> Result<LoadedModel, FixtureError> {
    let dump: ModelDump = serde_json::from_str(json).map_err(|source| FixtureError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;
    build_model(dump)
}

/// Reads a query AST from `path`.
pub fn load_query(path: &Path) -> Result<Query, FixtureError> {
    let contents = read(path)?;
    serde_json::from_str(&contents).map_err(|source| FixtureError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, FixtureError> {
    fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn build_model(dump: ModelDump) -> Result<LoadedModel, FixtureError> {
    let mut schema = InMemorySchema::new();
    for class in &dump.classes {
        let supers: Vec<&str> = class.superclasses.iter().map(String::as_str).collect();
        let attrs: Vec<&str> = class.attributes.iter().map(String::as_str).collect();
        schema.add_class(&class.name, &supers, &attrs)?;
    }
    for assoc in &dump.associations {
        let [first, second] = &assoc.ends;
        schema.add_association(&assoc.name, [end_spec(first), end_spec(second)])?;
    }

    let mut repository = InMemoryRepository::new(Arc::new(schema));
    let mut created: Vec<ObjectRef> = Vec::with_capacity(dump.objects.len());
    for object in &dump.objects {
        created.push(repository.add_object(&object.id, &object.class)?);
    }
    // References may point forward, so attributes go in once every object exists.
    for (object, obj) in dump.objects.iter().zip(created) {
        for (attribute, raw) in &object.attributes {
            let value = match raw {
                AttributeDump::Ref { target } => {
                    let resolved = repository.object_by_id(target)?.ok_or_else(|| {
                        FixtureError::DanglingReference {
                            object: object.id.clone(),
                            attribute: attribute.clone(),
                            target: target.clone(),
                        }
                    })?;
                    Value::Object(resolved)
                }
                AttributeDump::Scalar(json) => scalar(json).ok_or_else(|| {
                    FixtureError::UnsupportedValue {
                        object: object.id.clone(),
                        attribute: attribute.clone(),
                    }
                })?,
            };
            repository.set_attribute(obj, attribute, value)?;
        }
    }
    for link in &dump.links {
        let [first, second] = &link.ends;
        let ends = [lookup(&repository, first)?, lookup(&repository, second)?];
        repository.link_named(&link.association, ends)?;
    }

    Ok(LoadedModel {
        schema: Arc::clone(repository.schema()),
        repository: Arc::new(repository),
    })
}

fn end_spec(end: &EndDump) -> EndSpec<'_> {
    EndSpec {
        name: &end.name,
        class: &end.class,
        aggregation: end.aggregation,
    }
}

fn lookup(repository: &InMemoryRepository, id: &str) -> Result<ObjectRef, FixtureError> {
    repository
        .object_by_id(id)?
        .ok_or_else(|| ExternalError::new(format!("link references unknown object {id}")).into())
}

fn scalar(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}
