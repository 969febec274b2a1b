//! `explain` and `run` commands over JSON fixtures.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::cli::fixture::{self, FixtureError};
use crate::query::errors::QueryError;
use crate::query::executor::{Executor, ParamValue, Params};
use crate::query::planner::Planner;
use crate::query::repository::Repository;
use crate::sqlite_adapter::SqliteSqlConnection;

/// Errors surfaced by the command-line front end.
#[derive(Debug, Error)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// Fixture loading failed.
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    /// Planning or execution failed.
    #[error("[{}] {}", .0.code(), .0)]
    Query(#[from] QueryError),
    /// The SQLite database could not be opened.
    #[error("failed to open sqlite database: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Output of `lurql explain`.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainReport {
    /// Sorted explain lines.
    pub lines: Vec<String>,
    /// Plan fingerprint as 16 hex digits.
    pub fingerprint: String,
}

/// Output of `lurql run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identities of the selected objects, sorted.
    pub objects: Vec<String>,
    /// Number of selected objects.
    pub count: usize,
    /// Fingerprint of the executed plan.
    pub fingerprint: String,
}

/// Inputs shared by both commands.
#[derive(Debug, Clone)]
pub struct QueryFiles {
    /// Model dump (schema plus objects).
    pub model: PathBuf,
    /// Query AST in JSON.
    pub query: PathBuf,
}

/// Options for `lurql run`.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Parameter bindings.
    pub params: Params,
    /// SQLite database for subquery filters.
    pub sqlite: Option<PathBuf>,
}

/// Plans the query and dumps the plan.
pub fn run_explain(files: &QueryFiles, planner: &Planner) -> Result<ExplainReport, CliError> {
    let model = fixture::load_model(&files.model)?;
    let query = fixture::load_query(&files.query)?;
    let plan = planner.plan(&query, model.schema.as_ref())?;
    let explain = plan.explain();
    Ok(ExplainReport {
        lines: explain.lines,
        fingerprint: format!("{:016x}", explain.plan_hash),
    })
}

/// Plans and executes the query against the model's objects.
pub fn run_query(
    files: &QueryFiles,
    planner: &Planner,
    config: RunConfig,
) -> Result<RunReport, CliError> {
    let model = fixture::load_model(&files.model)?;
    let query = fixture::load_query(&files.query)?;
    let plan = planner.plan(&query, model.schema.as_ref())?;

    let repository: Arc<dyn Repository> = model.repository.clone();
    let mut executor = Executor::new(Arc::clone(&repository)).with_params(config.params);
    if let Some(path) = &config.sqlite {
        executor = executor.with_sql_connection(Arc::new(open_sqlite(path)?));
    }
    let results = executor.execute(&plan)?;

    let mut objects = results
        .iter()
        .map(|obj| repository.object_id(*obj))
        .collect::<Result<Vec<_>, _>>()
        .map_err(QueryError::from)?;
    objects.sort();
    Ok(RunReport {
        count: objects.len(),
        objects,
        fingerprint: format!("{:016x}", plan.fingerprint()),
    })
}

fn open_sqlite(path: &Path) -> Result<SqliteSqlConnection, CliError> {
    if !path.exists() {
        return Err(CliError::Message(format!(
            "sqlite database {} does not exist",
            path.display()
        )));
    }
    Ok(SqliteSqlConnection::open(path)?)
}

/// Parses a `name=value` scalar binding.
pub fn parse_scalar_binding(raw: &str) -> Result<(String, ParamValue), CliError> {
    let (name, value) = split_binding(raw)?;
    Ok((name.to_string(), ParamValue::Scalar(value.to_string())))
}

/// Parses a `name=a,b,c` set binding. An empty right-hand side binds the empty set.
pub fn parse_set_binding(raw: &str) -> Result<(String, ParamValue), CliError> {
    let (name, values) = split_binding(raw)?;
    let set: BTreeSet<String> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    Ok((name.to_string(), ParamValue::Set(set)))
}

fn split_binding(raw: &str) -> Result<(&str, &str), CliError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(format!("invalid parameter binding '{raw}', expected NAME=VALUE").into()),
    }
}
