//! Planner and seminaive fixpoint executor for LURQL path queries.
//!
//! Queries navigate a metamodel repository: start from the instances of a
//! class, follow associations, filter on attributes, and optionally recurse
//! until no new objects appear. See [`query`] for the pipeline.

#![warn(missing_docs)]

pub mod cli;
pub mod query;
pub mod sqlite_adapter;

pub use query::{
    Executor, ObjectSet, Params, Plan, PlanError, PlanExplain, Planner, PlannerConfig,
    QueryBuilder, QueryError,
};
pub use sqlite_adapter::SqliteSqlConnection;
