//! Abstract syntax tree for LURQL path queries.
//!
//! The tree is produced by an external parser (or by [`crate::query::builder`])
//! and consumed read-only by the planner. Every node derives serde so the
//! command-line front end can read queries as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A complete query: select list plus the path expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Selected aliases; a single `"*"` selects everything.
    pub select_list: Vec<String>,
    /// Path expression the query starts from.
    pub root: QueryRoot,
}

impl Query {
    /// True when the select list is exactly `*`.
    pub fn is_select_all(&self) -> bool {
        is_star(&self.select_list)
    }
}

pub(crate) fn is_star(select_list: &[String]) -> bool {
    select_list.len() == 1 && select_list[0] == "*"
}

/// Top of a query: a single root or a whole path spec (e.g. a union of roots).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRoot {
    /// `select ... from class X ...`
    Root(Root),
    /// `select ... from (class X ... union class Y ...)`
    PathSpec(PathSpec),
}

/// Ordered branches sharing one parent list, with an optional gather.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    /// Branches evaluated against the same parents.
    pub branches: Vec<PathBranch>,
    /// Join point collecting the leaves of every branch.
    #[serde(default)]
    pub gather: Option<Gather>,
}

/// `gather [with parent] then (...)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gather {
    /// Merge the path spec's own parents into the gathered leaves.
    #[serde(default)]
    pub with_parent: bool,
    /// Continuation evaluated from the gathered leaves.
    #[serde(default)]
    pub then: Option<Box<PathSpec>>,
}

/// One branch of a path spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathBranch {
    /// Start from all instances of a class.
    Root(Root),
    /// Traverse associations from the parents.
    Follow(Follow),
    /// Repeat an inner path spec until no new objects are found.
    Recurse(Recurse),
    /// Nested path spec sharing the parents.
    PathSpec(PathSpec),
}

impl PathBranch {
    /// Alias attached to the branch, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            PathBranch::Root(root) => root.alias.as_deref(),
            PathBranch::Follow(follow) => follow.alias.as_deref(),
            PathBranch::Recurse(_) | PathBranch::PathSpec(_) => None,
        }
    }
}

/// `class X [as alias] [where ...] [then (...)]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Root {
    /// Name of the class whose extent seeds the path.
    pub class_name: String,
    /// Optional alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Filters on the seeded objects.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Continuation.
    #[serde(default)]
    pub then: Option<PathSpec>,
}

/// `follow [association filters] [as alias] [where ...] [then (...)]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    /// Optional alias.
    #[serde(default)]
    pub alias: Option<String>,
    /// Restrictions on which associations are traversed.
    #[serde(default)]
    pub association_filters: AssociationFilters,
    /// Filters on the reached objects.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Continuation.
    #[serde(default)]
    pub then: Option<PathSpec>,
}

/// Association filters of a follow. Unset fields do not restrict anything;
/// neither direction means both, neither aggregation kind means any.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationFilters {
    /// Traverse from end 0 to end 1.
    pub forward: bool,
    /// Traverse from end 1 to end 0.
    pub backward: bool,
    /// Association name.
    pub association: Option<String>,
    /// Name of the end the parents play.
    pub origin_end: Option<String>,
    /// Name of the end the reached objects play.
    pub destination_end: Option<String>,
    /// Class the parents are navigated as.
    pub origin_class: Option<String>,
    /// Class the reached objects must be instances of.
    pub destination_class: Option<String>,
    /// Only composite associations.
    pub composite: bool,
    /// Only non-composite associations.
    pub noncomposite: bool,
}

/// `recurse (...) [then (...)]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recurse {
    /// Path repeated until a fixpoint.
    pub path: PathSpec,
    /// Continuation evaluated after the recursion.
    #[serde(default)]
    pub then: Option<PathSpec>,
}

/// A filter attached to a root or follow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Attribute comparison.
    Attribute(AttributeFilter),
    /// `[not] exists (...)`.
    Exists(ExistsFilter),
}

/// `attr [not] = value`, `attr in (...)`, `attr matches 'p'`, `attr in [sql]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeFilter {
    /// Attribute name; the identity attribute compares object identities.
    pub attribute: String,
    /// What the attribute value is compared against.
    pub operand: FilterOperand,
    /// Inverts the comparison.
    #[serde(default)]
    pub negated: bool,
}

/// Right-hand side of an attribute filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperand {
    /// Literal set, possibly containing scalar parameters.
    Values(Vec<FilterValue>),
    /// Regular expression the whole value must match.
    Pattern(String),
    /// Single-column SQL query producing the value set.
    Subquery(String),
    /// Parameter bound to a whole set.
    SetParam(DynamicParam),
}

/// Member of a literal value set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Literal string.
    Literal(String),
    /// Scalar dynamic parameter.
    Param(DynamicParam),
}

/// Reference to a parameter supplied at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DynamicParam {
    /// Parameter name.
    pub name: String,
}

impl DynamicParam {
    /// Creates a parameter reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// `[not] exists [select ...] (...)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExistsFilter {
    /// The sub-query.
    pub exists: Exists,
    /// Passes when the sub-query finds nothing.
    #[serde(default)]
    pub negated: bool,
}

/// Existence sub-query rooted at the filtered object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exists {
    /// Aliases whose results count; `*` counts everything.
    pub select_list: Vec<String>,
    /// Path evaluated from the filtered object.
    pub path: PathSpec,
}

impl fmt::Display for DynamicParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.name)
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Literal(value) => write!(f, "'{value}'"),
            FilterValue::Param(param) => write!(f, "{param}"),
        }
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = if self.negated { "not " } else { "" };
        match &self.operand {
            FilterOperand::Values(values) if values.len() == 1 => {
                write!(f, "{} {not}= {}", self.attribute, values[0])
            }
            FilterOperand::Values(values) => {
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} {not}in ({})", self.attribute, rendered.join(", "))
            }
            FilterOperand::Pattern(pattern) => {
                write!(f, "{} {not}matches '{pattern}'", self.attribute)
            }
            FilterOperand::Subquery(sql) => write!(f, "{} {not}in [{sql}]", self.attribute),
            FilterOperand::SetParam(param) => write!(f, "{} {not}in {param}", self.attribute),
        }
    }
}
