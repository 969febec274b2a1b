//! Fixpoint executor for compiled plans.
//!
//! Vertices run in topological order. A vertex with no incoming edges scans
//! its classes (or dereferences its identity seeds); every vertex pushes its
//! results along outgoing follow edges, filtering at the target. Recursions run
//! as a seminaive loop owned by the recursion root, re-processing only objects
//! discovered in the previous round.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::query::ast::{FilterOperand, FilterValue};
use crate::query::errors::{ExecError, Result};
use crate::query::metadata::ClassId;
use crate::query::plan::{
    ExistsEdge, ParamKind, Plan, PlanVertex, Subgraph, VertexFilter, VertexId,
};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::repository::{ObjectRef, Repository, SqlConnection};
use crate::query::value::Value;

/// Deduplicated set of objects produced by a query.
pub type ObjectSet = FxHashSet<ObjectRef>;

/// Value bound to a dynamic parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    /// Single value for `attr = ?p` or `attr in ('x', ?p)`.
    Scalar(String),
    /// Whole set for `attr in ?p`.
    Set(BTreeSet<String>),
}

impl ParamValue {
    fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Scalar(_) => ParamKind::Scalar,
            ParamValue::Set(_) => ParamKind::Set,
        }
    }
}

/// Dynamic parameter bindings for one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    /// Creates an empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a scalar.
    pub fn bind_scalar(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, ParamValue::Scalar(value.into()));
        self
    }

    /// Binds `name` to a set.
    pub fn bind_set<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(
            name,
            ParamValue::Set(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Binds or rebinds `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Looks up a binding.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Runs plans against a repository.
///
/// The executor itself is immutable; all per-run state lives in a context
/// created by [`Executor::execute`], so one executor can run the same plan
/// repeatedly.
pub struct Executor {
    repository: Arc<dyn Repository>,
    sql: Option<Arc<dyn SqlConnection>>,
    params: Params,
}

impl Executor {
    /// Creates an executor over `repository` with no SQL connection and no
    /// parameter bindings.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            sql: None,
            params: Params::default(),
        }
    }

    /// Attaches the connection used by subquery filters.
    pub fn with_sql_connection(mut self, sql: Arc<dyn SqlConnection>) -> Self {
        self.sql = Some(sql);
        self
    }

    /// Replaces the parameter bindings.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Executes `plan` and returns the union of the selected vertices' results.
    pub fn execute(&self, plan: &Plan) -> Result<ObjectSet> {
        let mut ctx = ExecutionContext::new(self, plan);
        let scope: BTreeSet<VertexId> = plan.topological_order().iter().copied().collect();
        ctx.execute_graph(plan.topological_order(), &scope, None)?;

        let mut output = ObjectSet::default();
        for id in plan.topological_order() {
            let Some(vertex) = plan.vertex(*id) else {
                continue;
            };
            if plan.is_selected(vertex) {
                if let Some(results) = ctx.results.get(id) {
                    output.extend(results.iter().copied());
                }
            }
        }
        debug!(
            objects = output.len(),
            sql_queries = ctx.sql_cache.len(),
            exists_tests = ctx.exists_cache.len(),
            "lurql.exec.completed"
        );
        Ok(output)
    }
}

/// Per-run state: live and stashed results per vertex, plus the memoized
/// filter value sets, SQL results, and exists outcomes.
struct ExecutionContext<'e> {
    repository: &'e dyn Repository,
    sql: Option<&'e dyn SqlConnection>,
    params: &'e Params,
    plan: &'e Plan,
    results: FxHashMap<VertexId, ObjectSet>,
    stash: FxHashMap<VertexId, ObjectSet>,
    filter_values: FxHashMap<(VertexId, usize), Rc<FxHashSet<String>>>,
    sql_cache: FxHashMap<String, Rc<FxHashSet<String>>>,
    exists_cache: FxHashMap<(VertexId, ObjectRef), bool>,
}

impl<'e> ExecutionContext<'e> {
    fn new(executor: &'e Executor, plan: &'e Plan) -> Self {
        Self {
            repository: executor.repository.as_ref(),
            sql: executor.sql.as_deref(),
            params: &executor.params,
            plan,
            results: FxHashMap::default(),
            stash: FxHashMap::default(),
            filter_values: FxHashMap::default(),
            sql_cache: FxHashMap::default(),
            exists_cache: FxHashMap::default(),
        }
    }

    /// Runs the vertices in `order`, restricted to edges inside `scope`.
    /// `seed` pins the given vertex's scan to a single object.
    fn execute_graph(
        &mut self,
        order: &[VertexId],
        scope: &BTreeSet<VertexId>,
        seed: Option<(VertexId, ObjectRef)>,
    ) -> Result<()> {
        let plan = self.plan;
        for id in order {
            let Some(vertex) = plan.vertex(*id) else {
                continue;
            };
            let has_input = plan
                .edges()
                .iter()
                .any(|edge| edge.target() == *id && scope.contains(&edge.source()));
            if !has_input {
                let pinned = seed.and_then(|(root, obj)| (root == *id).then_some(obj));
                self.execute_root(vertex, pinned)?;
            }
            if vertex.is_recursive() {
                if let Some(body) = vertex.recursion_subgraph() {
                    self.execute_recursion(vertex.id(), body)?;
                    for member in body.order() {
                        self.propagate(*member, scope, Some(body.members()))?;
                    }
                }
            } else {
                self.propagate(*id, scope, None)?;
            }
        }
        Ok(())
    }

    fn execute_root(&mut self, vertex: &PlanVertex, pinned: Option<ObjectRef>) -> Result<()> {
        let timer = profile_timer();
        let candidates = match pinned {
            Some(obj) => vec![obj],
            None if vertex.root_object_ids().is_empty() => {
                let mut all = Vec::new();
                for class in vertex.classes() {
                    all.extend(self.repository.all_of_type(*class)?);
                }
                all
            }
            None => {
                let mut seeded = Vec::new();
                for id in vertex.root_object_ids() {
                    let Some(obj) = self.repository.object_by_id(id)? else {
                        continue;
                    };
                    for class in vertex.classes() {
                        if self.repository.is_instance_of(obj, *class)? {
                            seeded.push(obj);
                            break;
                        }
                    }
                }
                seeded
            }
        };
        record_profile_timer(QueryProfileKind::Scan, timer);
        let passed = self.filter_objects(vertex, candidates, None)?;
        self.results
            .entry(vertex.id())
            .or_default()
            .extend(passed);
        Ok(())
    }

    /// Pushes `source`'s current results along its follow edges into `scope`.
    /// Edges into `handled` were already run by a recursion loop and are skipped.
    fn propagate(
        &mut self,
        source: VertexId,
        scope: &BTreeSet<VertexId>,
        handled: Option<&BTreeSet<VertexId>>,
    ) -> Result<()> {
        let plan = self.plan;
        let input: Vec<ObjectRef> = match self.results.get(&source) {
            Some(results) if !results.is_empty() => results.iter().copied().collect(),
            _ => return Ok(()),
        };
        for edge in plan.outgoing(source) {
            let Some(follow) = edge.as_follow() else {
                continue;
            };
            if !scope.contains(&edge.target())
                || handled.is_some_and(|body| body.contains(&edge.target()))
            {
                continue;
            }
            let Some(target) = plan.vertex(edge.target()) else {
                continue;
            };
            let timer = profile_timer();
            let mut reached = Vec::new();
            for obj in &input {
                if !self.repository.is_instance_of(*obj, follow.origin_type)? {
                    continue;
                }
                reached.extend(
                    self.repository
                        .navigate(follow.association, follow.origin_end, *obj)?,
                );
            }
            record_profile_timer(QueryProfileKind::Navigate, timer);
            let passed = self.filter_objects(target, reached, follow.destination_type_filter)?;
            self.results
                .entry(target.id())
                .or_default()
                .extend(passed);
        }
        Ok(())
    }

    /// Seminaive fixpoint over the recursion body owned by `root`.
    fn execute_recursion(&mut self, root: VertexId, body: &Subgraph) -> Result<()> {
        let plan = self.plan;
        let mut round = 0usize;
        loop {
            let timer = profile_timer();
            let before = self.stash.get(&root).map_or(0, FxHashSet::len);
            for member in body.order() {
                self.propagate(*member, body.members(), None)?;
                let feeds_back = plan
                    .vertex(*member)
                    .is_some_and(|v| v.recursion_root() == Some(root));
                if feeds_back {
                    let produced: Vec<ObjectRef> = self
                        .results
                        .get(member)
                        .map(|set| set.iter().copied().collect())
                        .unwrap_or_default();
                    self.results.entry(root).or_default().extend(produced);
                }
            }

            for member in body.order() {
                let current = self.results.remove(member).unwrap_or_default();
                let stash = self.stash.entry(*member).or_default();
                if *member == root {
                    let delta: ObjectSet = current
                        .into_iter()
                        .filter(|obj| !stash.contains(obj))
                        .collect();
                    stash.extend(delta.iter().copied());
                    self.results.insert(*member, delta);
                } else {
                    stash.extend(current);
                }
            }

            round += 1;
            let after = self.stash.get(&root).map_or(0, FxHashSet::len);
            record_profile_timer(QueryProfileKind::Recursion, timer);
            debug!(
                root = root.0,
                round,
                discovered = after - before,
                total = after,
                "lurql.exec.recursion_round"
            );
            if after == before {
                break;
            }
        }

        for member in body.order() {
            let stashed = self.stash.remove(member).unwrap_or_default();
            self.results.entry(*member).or_default().extend(stashed);
        }
        Ok(())
    }

    /// Applies the type filter, attribute filters, and exists tests of
    /// `vertex` to `candidates`.
    fn filter_objects(
        &mut self,
        vertex: &PlanVertex,
        candidates: Vec<ObjectRef>,
        type_filter: Option<ClassId>,
    ) -> Result<Vec<ObjectRef>> {
        let plan = self.plan;
        let exists: Vec<(VertexId, &ExistsEdge)> = plan
            .outgoing(vertex.id())
            .filter_map(|edge| edge.as_exists().map(|exists| (edge.target(), exists)))
            .collect();
        if vertex.filters().is_empty() && exists.is_empty() && type_filter.is_none() {
            return Ok(candidates);
        }

        let timer = profile_timer();
        let mut passed = Vec::with_capacity(candidates.len());
        'candidates: for obj in candidates {
            if let Some(class) = type_filter {
                if !self.repository.is_instance_of(obj, class)? {
                    continue;
                }
            }
            for (idx, filter) in vertex.filters().iter().enumerate() {
                if !self.passes_filter(vertex.id(), idx, filter, obj)? {
                    continue 'candidates;
                }
            }
            for (root, edge) in &exists {
                if !self.test_exists(obj, *root, edge)? {
                    continue 'candidates;
                }
            }
            passed.push(obj);
        }
        record_profile_timer(QueryProfileKind::Filter, timer);
        Ok(passed)
    }

    /// A null value fails the filter whether or not it is negated.
    fn passes_filter(
        &mut self,
        vertex: VertexId,
        idx: usize,
        filter: &VertexFilter,
        obj: ObjectRef,
    ) -> Result<bool> {
        let attribute = &filter.filter.attribute;
        let value = if attribute == self.plan.identity_attribute() {
            Some(self.repository.object_id(obj)?)
        } else {
            match self.repository.attribute_value(obj, attribute)? {
                Value::Null => None,
                Value::Object(target) => Some(self.repository.object_id(target)?),
                other => other.scalar_string(),
            }
        };
        let Some(value) = value else {
            return Ok(false);
        };
        let hit = match &filter.pattern {
            Some(pattern) => pattern.is_match(&value),
            None => self.filter_values(vertex, idx, filter)?.contains(&value),
        };
        Ok(hit != filter.filter.negated)
    }

    fn filter_values(
        &mut self,
        vertex: VertexId,
        idx: usize,
        filter: &VertexFilter,
    ) -> Result<Rc<FxHashSet<String>>> {
        if let Some(values) = self.filter_values.get(&(vertex, idx)) {
            return Ok(Rc::clone(values));
        }
        let values = match &filter.filter.operand {
            FilterOperand::Values(values) => {
                let mut resolved = FxHashSet::default();
                for value in values {
                    match value {
                        FilterValue::Literal(literal) => {
                            resolved.insert(literal.clone());
                        }
                        FilterValue::Param(param) => {
                            match self.bound_param(&param.name, ParamKind::Scalar)? {
                                ParamValue::Scalar(value) => {
                                    resolved.insert(value.clone());
                                }
                                ParamValue::Set(_) => {}
                            }
                        }
                    }
                }
                Rc::new(resolved)
            }
            FilterOperand::SetParam(param) => {
                match self.bound_param(&param.name, ParamKind::Set)? {
                    ParamValue::Set(values) => Rc::new(values.iter().cloned().collect()),
                    ParamValue::Scalar(_) => Rc::new(FxHashSet::default()),
                }
            }
            FilterOperand::Subquery(sql) => self.run_subquery(sql)?,
            FilterOperand::Pattern(_) => Rc::new(FxHashSet::default()),
        };
        self.filter_values.insert((vertex, idx), Rc::clone(&values));
        Ok(values)
    }

    fn bound_param(&self, name: &str, expected: ParamKind) -> Result<&'e ParamValue> {
        let params = self.params;
        let value = params
            .get(name)
            .ok_or_else(|| ExecError::UnboundParameter {
                param: name.to_owned(),
            })?;
        if value.kind() != expected {
            return Err(ExecError::ParameterKindMismatch {
                param: name.to_owned(),
                expected: expected.describe(),
            }
            .into());
        }
        Ok(value)
    }

    fn run_subquery(&mut self, sql: &str) -> Result<Rc<FxHashSet<String>>> {
        if let Some(values) = self.sql_cache.get(sql) {
            return Ok(Rc::clone(values));
        }
        let connection = self.sql.ok_or(ExecError::MissingSqlConnection)?;
        let timer = profile_timer();
        let rows = connection
            .query_single_column(sql)
            .map_err(|source| ExecError::SqlSubqueryFailure {
                query: sql.to_owned(),
                source,
            })?;
        record_profile_timer(QueryProfileKind::Sql, timer);
        let values: Rc<FxHashSet<String>> = Rc::new(rows.into_iter().collect());
        debug!(rows = values.len(), "lurql.exec.sql_subquery");
        self.sql_cache.insert(sql.to_owned(), Rc::clone(&values));
        Ok(values)
    }

    /// Runs the exists sub-query rooted at `root` for `obj` in a fresh result
    /// scope. Outcomes are memoized per root and object for the run.
    fn test_exists(&mut self, obj: ObjectRef, root: VertexId, edge: &ExistsEdge) -> Result<bool> {
        if let Some(found) = self.exists_cache.get(&(root, obj)) {
            return Ok(*found != edge.negated);
        }
        let timer = profile_timer();
        let saved_results = std::mem::take(&mut self.results);
        let saved_stash = std::mem::take(&mut self.stash);
        let outcome = self.count_exists(obj, root, edge);
        self.results = saved_results;
        self.stash = saved_stash;
        record_profile_timer(QueryProfileKind::Exists, timer);

        let found = outcome? > 0;
        self.exists_cache.insert((root, obj), found);
        Ok(found != edge.negated)
    }

    fn count_exists(&mut self, obj: ObjectRef, root: VertexId, edge: &ExistsEdge) -> Result<usize> {
        let subgraph = &edge.subgraph;
        self.execute_graph(subgraph.order(), subgraph.members(), Some((root, obj)))?;
        let plan = self.plan;
        let mut count = 0;
        for member in subgraph.order() {
            if *member == root {
                continue;
            }
            let Some(vertex) = plan.vertex(*member) else {
                continue;
            };
            if let Some(projection) = &edge.projection {
                if !vertex.alias().is_some_and(|alias| projection.contains(alias)) {
                    continue;
                }
            }
            count += self.results.get(member).map_or(0, FxHashSet::len);
        }
        Ok(count)
    }
}
