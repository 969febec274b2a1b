#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::query::repository::ExternalError;

/// Errors raised while compiling a query AST into a plan graph.
///
/// Planning is all-or-nothing: the first error aborts compilation and no
/// partial plan is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A root or association filter named a class the schema does not define.
    #[error("unknown class {class}")]
    UnknownClass { class: String },
    /// The same alias was attached to two different branches.
    #[error("duplicate definition for alias {alias}")]
    DuplicateAlias { alias: String },
    /// The select list referenced aliases never declared in the path spec.
    #[error("unknown alias reference in select: {}", .aliases.join(", "))]
    UnknownAliasInSelect { aliases: Vec<String> },
    /// A follow appeared where there is nothing to follow from.
    #[error("follow requires at least one parent")]
    FollowRequiresParent,
    /// A root appeared below another branch.
    #[error("root cannot have a parent")]
    RootCannotHaveParent,
    /// A recurse was reached from zero or several parents.
    #[error("recursion must have exactly one parent (got {parents})")]
    RecursionRequiresSingleParent { parents: usize },
    /// One round of a recursion produced more than one leaf.
    #[error("recursion does not support trees (got {leaves} leaves)")]
    RecursionDoesNotSupportTrees { leaves: usize },
    /// A dynamic parameter was used both as a scalar and as a set.
    #[error("conflicting type for parameter {param}")]
    ConflictingParamType { param: String },
    /// `gather with parent` was used where no parent exists.
    #[error("with parent requires at least one parent")]
    GatherParentRequiresParent,
    /// An exists select list named aliases bound outside of the exists.
    #[error("exists list aliases defined outside of exists: {}", .aliases.join(", "))]
    ExistsAliasDefinedOutside { aliases: Vec<String> },
    /// An exists select list named aliases its own path never declared.
    #[error("unknown alias reference in exists: {}", .aliases.join(", "))]
    UnknownAliasInExists { aliases: Vec<String> },
    /// A `matches` filter carried a pattern that does not compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl PlanError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::UnknownClass { .. } => "UnknownClass",
            PlanError::DuplicateAlias { .. } => "DuplicateAlias",
            PlanError::UnknownAliasInSelect { .. } => "UnknownAliasInSelect",
            PlanError::FollowRequiresParent => "FollowRequiresParent",
            PlanError::RootCannotHaveParent => "RootCannotHaveParent",
            PlanError::RecursionRequiresSingleParent { .. } => "RecursionRequiresSingleParent",
            PlanError::RecursionDoesNotSupportTrees { .. } => "RecursionDoesNotSupportTrees",
            PlanError::ConflictingParamType { .. } => "ConflictingParamType",
            PlanError::GatherParentRequiresParent => "GatherParentRequiresParent",
            PlanError::ExistsAliasDefinedOutside { .. } => "ExistsAliasDefinedOutside",
            PlanError::UnknownAliasInExists { .. } => "UnknownAliasInExists",
            PlanError::InvalidPattern { .. } => "InvalidPattern",
        }
    }
}

/// Errors raised while running a plan against a repository.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A subquery filter was reached but the executor has no SQL connection.
    #[error("no SQL connection available")]
    MissingSqlConnection,
    /// The SQL connection failed while evaluating a subquery filter.
    #[error("error executing SQL subquery '{query}': {source}")]
    SqlSubqueryFailure {
        query: String,
        #[source]
        source: ExternalError,
    },
    /// A filter referenced a dynamic parameter that was never bound.
    #[error("no value bound for parameter {param}")]
    UnboundParameter { param: String },
    /// A parameter was bound with a scalar where a set was planned, or vice versa.
    #[error("parameter {param} must be bound to a {expected}")]
    ParameterKindMismatch {
        param: String,
        expected: &'static str,
    },
    /// The repository failed during a scan, lookup, or navigation.
    #[error("repository access failed: {0}")]
    Repository(#[from] ExternalError),
}

impl ExecError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::MissingSqlConnection => "MissingSqlConnection",
            ExecError::SqlSubqueryFailure { .. } => "SqlSubqueryFailure",
            ExecError::UnboundParameter { .. } => "UnboundParameter",
            ExecError::ParameterKindMismatch { .. } => "ParameterKindMismatch",
            ExecError::Repository(_) => "RepositoryFailure",
        }
    }
}

/// The single checked error kind surfaced by planning and execution.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Compilation of the AST failed.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Execution of a compiled plan failed.
    #[error(transparent)]
    Execution(#[from] ExecError),
}

impl QueryError {
    /// Returns a machine-readable code for the underlying error.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Plan(err) => err.code(),
            QueryError::Execution(err) => err.code(),
        }
    }

    /// Returns the planning error, if this is one.
    pub fn as_plan_error(&self) -> Option<&PlanError> {
        match self {
            QueryError::Plan(err) => Some(err),
            QueryError::Execution(_) => None,
        }
    }
}

impl From<ExternalError> for QueryError {
    fn from(err: ExternalError) -> Self {
        QueryError::Execution(ExecError::Repository(err))
    }
}

/// Result alias used throughout the query pipeline.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
