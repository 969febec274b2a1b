//! Fluent constructors for query ASTs.
//!
//! Parsing LURQL text happens elsewhere; these helpers let tests and embedders
//! assemble the same trees in code:
//!
//! ```
//! use lurql::query::ast::{Filter, Follow, Recurse, Root};
//! use lurql::query::builder::QueryBuilder;
//!
//! let query = QueryBuilder::select_all()
//!     .from(
//!         Root::new("Folder")
//!             .filter(Filter::equals("name", "root"))
//!             .then(Recurse::new(Follow::new().association("Contains").forward())),
//!     )
//!     .build();
//! assert!(query.is_select_all());
//! ```

use crate::query::{
    ast::{
        AttributeFilter, DynamicParam, Exists, ExistsFilter, Filter, FilterOperand, FilterValue,
        Follow, Gather, PathBranch, PathSpec, Query, QueryRoot, Recurse, Root,
    },
    errors::Result,
    metadata::SchemaView,
    plan::Plan,
    planner::Planner,
};

/// Fluent builder producing a [`Query`].
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    select_list: Vec<String>,
    root: QueryRoot,
}

impl QueryBuilder {
    /// Starts a query selecting the given aliases.
    pub fn select<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            select_list: aliases.into_iter().map(Into::into).collect(),
            root: QueryRoot::PathSpec(PathSpec::default()),
        }
    }

    /// Starts a `select *` query.
    pub fn select_all() -> Self {
        Self::select(["*"])
    }

    /// Sets the path expression.
    pub fn from(mut self, root: impl Into<QueryRoot>) -> Self {
        self.root = root.into();
        self
    }

    /// Finishes the query.
    pub fn build(self) -> Query {
        Query {
            select_list: self.select_list,
            root: self.root,
        }
    }

    /// Finishes the query and compiles it against `schema`.
    pub fn plan(self, planner: &Planner, schema: &dyn SchemaView) -> Result<Plan> {
        planner.plan(&self.build(), schema)
    }
}

impl From<Root> for QueryRoot {
    fn from(root: Root) -> Self {
        QueryRoot::Root(root)
    }
}

impl From<PathSpec> for QueryRoot {
    fn from(spec: PathSpec) -> Self {
        QueryRoot::PathSpec(spec)
    }
}

impl PathSpec {
    /// Path spec with the given branches and no gather.
    pub fn new<I, B>(branches: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<PathBranch>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            gather: None,
        }
    }

    /// `gather then (...)`.
    pub fn gather_then(mut self, then: impl Into<PathSpec>) -> Self {
        self.gather = Some(Gather {
            with_parent: false,
            then: Some(Box::new(then.into())),
        });
        self
    }

    /// `gather with parent then (...)`.
    pub fn gather_with_parent_then(mut self, then: impl Into<PathSpec>) -> Self {
        self.gather = Some(Gather {
            with_parent: true,
            then: Some(Box::new(then.into())),
        });
        self
    }
}

impl Root {
    /// `class <name>`.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            alias: None,
            filters: Vec::new(),
            then: None,
        }
    }

    /// `as <alias>`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds a `where` filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// `then (...)`.
    pub fn then(mut self, spec: impl Into<PathSpec>) -> Self {
        self.then = Some(spec.into());
        self
    }
}

impl Follow {
    /// Unrestricted follow.
    pub fn new() -> Self {
        Self::default()
    }

    /// `as <alias>`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// `association <name>`.
    pub fn association(mut self, name: impl Into<String>) -> Self {
        self.association_filters.association = Some(name.into());
        self
    }

    /// `forward`.
    pub fn forward(mut self) -> Self {
        self.association_filters.forward = true;
        self
    }

    /// `backward`.
    pub fn backward(mut self) -> Self {
        self.association_filters.backward = true;
        self
    }

    /// `origin end <name>`.
    pub fn origin_end(mut self, name: impl Into<String>) -> Self {
        self.association_filters.origin_end = Some(name.into());
        self
    }

    /// `destination end <name>`.
    pub fn destination_end(mut self, name: impl Into<String>) -> Self {
        self.association_filters.destination_end = Some(name.into());
        self
    }

    /// `origin class <name>`.
    pub fn origin_class(mut self, name: impl Into<String>) -> Self {
        self.association_filters.origin_class = Some(name.into());
        self
    }

    /// `destination class <name>`.
    pub fn destination_class(mut self, name: impl Into<String>) -> Self {
        self.association_filters.destination_class = Some(name.into());
        self
    }

    /// `composite`.
    pub fn composite(mut self) -> Self {
        self.association_filters.composite = true;
        self
    }

    /// `noncomposite`.
    pub fn noncomposite(mut self) -> Self {
        self.association_filters.noncomposite = true;
        self
    }

    /// Adds a `where` filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// `then (...)`.
    pub fn then(mut self, spec: impl Into<PathSpec>) -> Self {
        self.then = Some(spec.into());
        self
    }
}

impl Recurse {
    /// `recurse (...)`.
    pub fn new(path: impl Into<PathSpec>) -> Self {
        Self {
            path: path.into(),
            then: None,
        }
    }

    /// `then (...)` after the recursion.
    pub fn then(mut self, spec: impl Into<PathSpec>) -> Self {
        self.then = Some(spec.into());
        self
    }
}

impl Filter {
    /// `attr = 'value'`.
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::one_of(attribute, [value])
    }

    /// `attr in ('a', 'b', ...)`.
    pub fn one_of<I, S>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::values(
            attribute,
            values
                .into_iter()
                .map(|v| FilterValue::Literal(v.into()))
                .collect(),
        )
    }

    /// `attr in (...)` with an explicit mix of literals and parameters.
    pub fn values(attribute: impl Into<String>, values: Vec<FilterValue>) -> Self {
        Self::attribute(attribute, FilterOperand::Values(values))
    }

    /// `attr = ?param`.
    pub fn param(attribute: impl Into<String>, param: impl Into<String>) -> Self {
        Self::values(
            attribute,
            vec![FilterValue::Param(DynamicParam::new(param))],
        )
    }

    /// `attr in ?param`.
    pub fn set_param(attribute: impl Into<String>, param: impl Into<String>) -> Self {
        Self::attribute(attribute, FilterOperand::SetParam(DynamicParam::new(param)))
    }

    /// `attr matches 'pattern'`.
    pub fn matches(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::attribute(attribute, FilterOperand::Pattern(pattern.into()))
    }

    /// `attr in [sql]`.
    pub fn subquery(attribute: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::attribute(attribute, FilterOperand::Subquery(sql.into()))
    }

    /// `exists select ... (path)`.
    pub fn exists<I, S>(select_list: I, path: impl Into<PathSpec>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Exists(ExistsFilter {
            exists: Exists {
                select_list: select_list.into_iter().map(Into::into).collect(),
                path: path.into(),
            },
            negated: false,
        })
    }

    /// Inverts the filter.
    pub fn negate(self) -> Self {
        match self {
            Filter::Attribute(filter) => Filter::Attribute(AttributeFilter {
                negated: !filter.negated,
                ..filter
            }),
            Filter::Exists(filter) => Filter::Exists(ExistsFilter {
                negated: !filter.negated,
                ..filter
            }),
        }
    }

    fn attribute(attribute: impl Into<String>, operand: FilterOperand) -> Self {
        Filter::Attribute(AttributeFilter {
            attribute: attribute.into(),
            operand,
            negated: false,
        })
    }
}

impl From<Root> for PathBranch {
    fn from(root: Root) -> Self {
        PathBranch::Root(root)
    }
}

impl From<Follow> for PathBranch {
    fn from(follow: Follow) -> Self {
        PathBranch::Follow(follow)
    }
}

impl From<Recurse> for PathBranch {
    fn from(recurse: Recurse) -> Self {
        PathBranch::Recurse(recurse)
    }
}

impl From<PathSpec> for PathBranch {
    fn from(spec: PathSpec) -> Self {
        PathBranch::PathSpec(spec)
    }
}

impl From<PathBranch> for PathSpec {
    fn from(branch: PathBranch) -> Self {
        PathSpec::new([branch])
    }
}

impl From<Root> for PathSpec {
    fn from(root: Root) -> Self {
        PathSpec::new([root])
    }
}

impl From<Follow> for PathSpec {
    fn from(follow: Follow) -> Self {
        PathSpec::new([follow])
    }
}

impl From<Recurse> for PathSpec {
    fn from(recurse: Recurse) -> Self {
        PathSpec::new([recurse])
    }
}
