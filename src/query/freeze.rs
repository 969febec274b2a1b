//! Class-set freezing for plan vertices.
//!
//! A vertex collects candidate classes while edges are wired into it. Freezing
//! turns that raw set into the minimal set that covers exactly the objects the
//! vertex can produce:
//!
//! 1. expand every candidate to itself plus all of its subclasses;
//! 2. drop classes on which some attribute filter cannot be evaluated;
//! 3. drop classes whose strict superclass survived step 2, since scanning the
//!    superclass already yields their instances.
//!
//! The identity attribute applies to every class.

use std::collections::BTreeSet;

use crate::query::ast::AttributeFilter;
use crate::query::metadata::{ClassId, SchemaView};

/// Runs all three phases.
pub fn freeze(
    raw: &BTreeSet<ClassId>,
    filters: &[&AttributeFilter],
    schema: &dyn SchemaView,
    identity_attribute: &str,
) -> BTreeSet<ClassId> {
    let expanded = expand(raw, schema);
    let applicable = prune_inapplicable(&expanded, filters, schema, identity_attribute);
    subsume(&applicable, schema)
}

/// Adds every subclass of every member.
pub fn expand(raw: &BTreeSet<ClassId>, schema: &dyn SchemaView) -> BTreeSet<ClassId> {
    let mut expanded = raw.clone();
    for class in raw {
        expanded.extend(schema.subclasses(*class));
    }
    expanded
}

/// Keeps the classes on which every filtered attribute resolves.
pub fn prune_inapplicable(
    classes: &BTreeSet<ClassId>,
    filters: &[&AttributeFilter],
    schema: &dyn SchemaView,
    identity_attribute: &str,
) -> BTreeSet<ClassId> {
    classes
        .iter()
        .copied()
        .filter(|class| {
            filters.iter().all(|filter| {
                filter.attribute == identity_attribute
                    || schema.has_attribute(*class, &filter.attribute)
            })
        })
        .collect()
}

/// Drops every class that has a strict superclass in `survivors`.
pub fn subsume(survivors: &BTreeSet<ClassId>, schema: &dyn SchemaView) -> BTreeSet<ClassId> {
    survivors
        .iter()
        .copied()
        .filter(|class| {
            schema
                .superclasses(*class)
                .iter()
                .all(|ancestor| !survivors.contains(ancestor))
        })
        .collect()
}
