#![forbid(unsafe_code)]

//! LURQL query planning and execution.
//!
//! A parsed [`ast::Query`] is compiled by the [`planner::Planner`] into a
//! [`plan::Plan`]: a graph of class-set vertices joined by association
//! traversals, with recursion and exists sub-queries marked as subgraphs. The
//! [`executor::Executor`] evaluates the plan against a
//! [`repository::Repository`], iterating recursive subgraphs to a fixpoint.

/// Abstract syntax tree for path queries.
pub mod ast;

/// Fluent construction of query ASTs.
pub mod builder;

/// Planning and execution errors.
pub mod errors;

/// Seminaive evaluation of compiled plans.
pub mod executor;

/// Class-set freezing: subclass expansion, pruning and subsumption.
pub mod freeze;

/// Metamodel view consumed by the planner.
pub mod metadata;

/// Plan graph produced by the planner.
pub mod plan;

/// AST to plan compilation.
pub mod planner;

/// Opt-in timing counters for execution phases.
pub mod profile;

/// Object access consumed by the executor.
pub mod repository;

/// Attribute values.
pub mod value;

pub use builder::QueryBuilder;
pub use errors::{ExecError, PlanError, QueryError, Result};
pub use executor::{Executor, ObjectSet, ParamValue, Params};
pub use plan::{Plan, PlanExplain};
pub use planner::{Planner, PlannerConfig};
