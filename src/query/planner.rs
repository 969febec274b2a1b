//! Compiles a query AST into a [`Plan`] graph.
//!
//! Compilation walks the AST once, creating a vertex per root and follow,
//! wiring association edges from every parent vertex, freezing each vertex's
//! class set, and unrolling recursions until the leaf class set repeats. The
//! first error aborts compilation.

use std::collections::BTreeSet;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::query::{
    ast::{
        is_star, AssociationFilters, AttributeFilter, DynamicParam, ExistsFilter, Filter,
        FilterOperand, FilterValue, Follow, PathBranch, PathSpec, Query, QueryRoot, Recurse, Root,
    },
    errors::{PlanError, Result},
    metadata::{AssocId, ClassId, SchemaView},
    plan::{ExistsEdge, FollowEdge, ParamKind, Plan, VertexFilter, VertexId},
};

/// Attribute treated as object identity unless configured otherwise.
pub const DEFAULT_IDENTITY_ATTRIBUTE: &str = "mofId";

/// Planner inputs.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Attribute whose filters compare object identities. It applies to every
    /// class and seeds roots when compared against literals.
    pub identity_attribute: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            identity_attribute: DEFAULT_IDENTITY_ATTRIBUTE.to_owned(),
        }
    }
}

/// Stateless query compiler; a single planner may compile many queries.
#[derive(Clone, Debug, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner with the given configuration.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Planner configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Compiles `query` against `schema`.
    pub fn plan(&self, query: &Query, schema: &dyn SchemaView) -> Result<Plan> {
        let mut ctx = PlanContext::new(schema, &self.config.identity_attribute);
        let mut leaves = Vec::new();
        match &query.root {
            QueryRoot::Root(root) => ctx.prepare_root(root, &mut leaves)?,
            QueryRoot::PathSpec(spec) => ctx.prepare_path_spec(&[], spec, &mut leaves)?,
        }
        let projection = if is_star(&query.select_list) {
            None
        } else {
            let unknown = ctx.undeclared(&query.select_list);
            if !unknown.is_empty() {
                return Err(PlanError::UnknownAliasInSelect { aliases: unknown }.into());
            }
            Some(query.select_list.iter().cloned().collect())
        };
        let mut plan = ctx.finish();
        plan.finish(projection);
        debug!(
            vertices = plan.vertices().count(),
            edges = plan.edges().len(),
            params = plan.params().len(),
            fingerprint = plan.fingerprint(),
            "lurql.plan.compiled"
        );
        Ok(plan)
    }
}

/// Identity of an AST node. Recursion revisits the same node, so aliases are
/// keyed by node identity rather than by visit.
#[derive(Clone, Copy, Debug)]
struct BranchKey(*const ());

impl BranchKey {
    fn of<T>(node: &T) -> Self {
        Self(std::ptr::from_ref(node).cast())
    }

    fn is(self, other: BranchKey) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

/// Per-compilation state.
struct PlanContext<'a> {
    schema: &'a dyn SchemaView,
    identity_attribute: &'a str,
    plan: Plan,
    /// Alias to the AST node that declared it.
    alias_branches: FxHashMap<String, BranchKey>,
    next_id: usize,
    exists_depth: usize,
}

impl<'a> PlanContext<'a> {
    fn new(schema: &'a dyn SchemaView, identity_attribute: &'a str) -> Self {
        Self {
            schema,
            identity_attribute,
            plan: Plan::new(identity_attribute),
            alias_branches: FxHashMap::default(),
            next_id: 0,
            exists_depth: 0,
        }
    }

    fn finish(self) -> Plan {
        self.plan
    }

    fn undeclared(&self, aliases: &[String]) -> Vec<String> {
        aliases
            .iter()
            .filter(|alias| !self.alias_branches.contains_key(alias.as_str()))
            .cloned()
            .collect()
    }

    fn find_class(&self, name: &str) -> Result<ClassId> {
        self.schema.class_by_name(name).ok_or_else(|| {
            PlanError::UnknownClass {
                class: name.to_owned(),
            }
            .into()
        })
    }

    fn prepare_path_spec(
        &mut self,
        parents: &[VertexId],
        spec: &PathSpec,
        leaves: &mut Vec<VertexId>,
    ) -> Result<()> {
        let mut gathered = Vec::new();
        for branch in &spec.branches {
            let out = if spec.gather.is_some() {
                &mut gathered
            } else {
                &mut *leaves
            };
            match branch {
                PathBranch::Root(root) => {
                    if !parents.is_empty() {
                        return Err(PlanError::RootCannotHaveParent.into());
                    }
                    self.prepare_root(root, out)?;
                }
                PathBranch::Follow(follow) => {
                    if parents.is_empty() {
                        return Err(PlanError::FollowRequiresParent.into());
                    }
                    self.prepare_follow(follow, parents, out)?;
                }
                PathBranch::Recurse(recurse) => {
                    if parents.len() != 1 {
                        return Err(PlanError::RecursionRequiresSingleParent {
                            parents: parents.len(),
                        }
                        .into());
                    }
                    self.prepare_recurse(recurse, parents[0], out)?;
                }
                PathBranch::PathSpec(nested) => self.prepare_path_spec(parents, nested, out)?,
            }
        }
        if let Some(gather) = &spec.gather {
            if gather.with_parent {
                if parents.is_empty() {
                    return Err(PlanError::GatherParentRequiresParent.into());
                }
                gathered.extend_from_slice(parents);
            }
            self.prepare_continuation(&gathered, gather.then.as_deref(), leaves)?;
        }
        Ok(())
    }

    /// A missing continuation makes the parents themselves the leaves.
    fn prepare_continuation(
        &mut self,
        parents: &[VertexId],
        then: Option<&PathSpec>,
        leaves: &mut Vec<VertexId>,
    ) -> Result<()> {
        match then {
            Some(spec) => self.prepare_path_spec(parents, spec, leaves),
            None => {
                leaves.extend_from_slice(parents);
                Ok(())
            }
        }
    }

    fn prepare_root(&mut self, root: &Root, leaves: &mut Vec<VertexId>) -> Result<()> {
        let class = self.find_class(&root.class_name)?;
        let vertex = self.new_vertex(root.alias.as_deref(), BranchKey::of(root))?;
        let seeds = self.root_seeds(&root.filters);
        if let Some(v) = self.plan.vertex_mut(vertex) {
            v.add_class(class);
            v.seed_root_object_ids(seeds);
        }
        self.add_filters(vertex, &root.filters)?;
        self.freeze(vertex);
        self.prepare_continuation(&[vertex], root.then.as_ref(), leaves)
    }

    /// Literal identity values of the first non-negated identity filter.
    fn root_seeds(&self, filters: &[Filter]) -> Vec<String> {
        filters
            .iter()
            .find_map(|filter| match filter {
                Filter::Attribute(AttributeFilter {
                    attribute,
                    operand: FilterOperand::Values(values),
                    negated: false,
                }) if attribute == self.identity_attribute => values
                    .iter()
                    .map(|value| match value {
                        FilterValue::Literal(literal) => Some(literal.clone()),
                        FilterValue::Param(_) => None,
                    })
                    .collect::<Option<Vec<_>>>(),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn prepare_follow(
        &mut self,
        follow: &Follow,
        parents: &[VertexId],
        leaves: &mut Vec<VertexId>,
    ) -> Result<()> {
        let vertex = self.new_vertex(follow.alias.as_deref(), BranchKey::of(follow))?;
        for parent in parents {
            self.prepare_follow_edges(*parent, vertex, &follow.association_filters)?;
        }
        self.add_filters(vertex, &follow.filters)?;
        self.freeze(vertex);
        let empty = self
            .plan
            .vertex(vertex)
            .map_or(true, |v| v.classes().is_empty());
        if empty {
            if let Some(v) = self.plan.vertex(vertex) {
                debug!(vertex = v.name(), "lurql.plan.vertex_pruned");
            }
            self.plan.remove_vertex(vertex);
            return Ok(());
        }
        self.prepare_continuation(&[vertex], follow.then.as_ref(), leaves)
    }

    fn prepare_follow_edges(
        &mut self,
        source: VertexId,
        target: VertexId,
        filters: &AssociationFilters,
    ) -> Result<()> {
        let (forward, backward) = if filters.forward || filters.backward {
            (filters.forward, filters.backward)
        } else {
            (true, true)
        };

        let mut outgoing_filter: Option<BTreeSet<AssocId>> = None;
        let mut incoming_filter: Option<BTreeSet<AssocId>> = None;
        if let Some(name) = &filters.origin_class {
            let origin = self.find_class(name)?;
            outgoing_filter = Some(self.schema.outgoing_associations(origin).into_iter().collect());
            incoming_filter = Some(self.schema.incoming_associations(origin).into_iter().collect());
        }
        let mut destination_class = None;
        if let Some(name) = &filters.destination_class {
            let destination = self.find_class(name)?;
            destination_class = Some(destination);
            let reaching: BTreeSet<AssocId> = self
                .schema
                .incoming_associations(destination)
                .into_iter()
                .collect();
            let leaving: BTreeSet<AssocId> = self
                .schema
                .outgoing_associations(destination)
                .into_iter()
                .collect();
            outgoing_filter = Some(intersect(outgoing_filter, reaching));
            incoming_filter = Some(intersect(incoming_filter, leaving));
        }

        let source_classes: Vec<ClassId> = self
            .plan
            .vertex(source)
            .map(|v| v.classes().iter().copied().collect())
            .unwrap_or_default();
        for class in source_classes {
            if forward {
                let candidates =
                    restrict(self.schema.outgoing_associations(class), &outgoing_filter);
                self.add_traversals(source, target, filters, candidates, destination_class, 0);
            }
            if backward {
                let candidates =
                    restrict(self.schema.incoming_associations(class), &incoming_filter);
                self.add_traversals(source, target, filters, candidates, destination_class, 1);
            }
        }
        Ok(())
    }

    fn add_traversals(
        &mut self,
        source: VertexId,
        target: VertexId,
        filters: &AssociationFilters,
        candidates: Vec<AssocId>,
        destination_class: Option<ClassId>,
        origin_end: usize,
    ) {
        let schema = self.schema;
        let (composite, noncomposite) = if filters.composite || filters.noncomposite {
            (filters.composite, filters.noncomposite)
        } else {
            (true, true)
        };
        for assoc_id in candidates {
            let Some(assoc) = schema.association(assoc_id) else {
                continue;
            };
            if !matches_name(&filters.association, &assoc.name) {
                continue;
            }
            let wanted = if assoc.is_composite() {
                composite
            } else {
                noncomposite
            };
            if !wanted {
                continue;
            }
            let origin = assoc.end(origin_end);
            let destination = assoc.end(1 - origin_end);
            if !matches_name(&filters.origin_end, &origin.name)
                || !matches_name(&filters.destination_end, &destination.name)
            {
                continue;
            }

            let mut reached_class = destination.class;
            let mut type_filter = None;
            if let Some(requested) = destination_class {
                if requested != destination.class
                    && schema.superclasses(requested).contains(&destination.class)
                {
                    type_filter = Some(requested);
                    reached_class = requested;
                }
            }
            let follow = FollowEdge {
                association: assoc_id,
                origin_end,
                origin_type: origin.class,
                destination_type_filter: type_filter,
            };
            self.plan.add_follow_edge(schema, source, target, follow);
            if let Some(v) = self.plan.vertex_mut(target) {
                v.add_class(reached_class);
            }
        }
    }

    /// Unrolls the recursion until a round produces a leaf class set already
    /// seen, then links that leaf back to the vertex that first produced it.
    fn prepare_recurse(
        &mut self,
        recurse: &Recurse,
        parent: VertexId,
        leaves: &mut Vec<VertexId>,
    ) -> Result<()> {
        let mut parents = vec![parent];
        let mut seen: FxHashMap<BTreeSet<ClassId>, VertexId> = FxHashMap::default();
        loop {
            let mut round = Vec::new();
            self.prepare_path_spec(&parents, &recurse.path, &mut round)?;
            if round.len() > 1 {
                return Err(PlanError::RecursionDoesNotSupportTrees {
                    leaves: round.len(),
                }
                .into());
            }
            let Some(&leaf) = round.first() else {
                break;
            };
            let signature = self
                .plan
                .vertex(leaf)
                .map(|v| v.classes().clone())
                .unwrap_or_default();
            if let Some(&root) = seen.get(&signature) {
                self.plan.set_recursion_root(leaf, root);
                debug!(
                    leaf = leaf.0,
                    root = root.0,
                    classes = signature.len(),
                    "lurql.plan.model_fixpoint"
                );
                break;
            }
            seen.insert(signature, leaf);
            parents = round;
        }
        self.prepare_continuation(&parents, recurse.then.as_ref(), leaves)
    }

    fn add_filters(&mut self, vertex: VertexId, filters: &[Filter]) -> Result<()> {
        let mut runtime = Vec::new();
        for filter in filters {
            match filter {
                Filter::Exists(exists) => {
                    self.exists_depth += 1;
                    let prepared = self.prepare_exists(vertex, exists);
                    self.exists_depth -= 1;
                    prepared?;
                }
                Filter::Attribute(attribute) => {
                    let mut pattern = None;
                    match &attribute.operand {
                        FilterOperand::Values(values) => {
                            for value in values {
                                if let FilterValue::Param(param) = value {
                                    self.add_param(param, ParamKind::Scalar)?;
                                }
                            }
                        }
                        FilterOperand::SetParam(param) => self.add_param(param, ParamKind::Set)?,
                        FilterOperand::Pattern(source) => {
                            pattern = Some(compile_pattern(source)?);
                        }
                        FilterOperand::Subquery(_) => {}
                    }
                    runtime.push(VertexFilter {
                        filter: attribute.clone(),
                        pattern,
                    });
                }
            }
        }
        if let Some(v) = self.plan.vertex_mut(vertex) {
            v.add_filters(runtime);
        }
        Ok(())
    }

    fn prepare_exists(&mut self, vertex: VertexId, filter: &ExistsFilter) -> Result<()> {
        let exists = &filter.exists;
        let projection: Option<BTreeSet<String>> = if is_star(&exists.select_list) {
            None
        } else {
            let outside: Vec<String> = exists
                .select_list
                .iter()
                .filter(|alias| self.alias_branches.contains_key(alias.as_str()))
                .cloned()
                .collect();
            if !outside.is_empty() {
                return Err(PlanError::ExistsAliasDefinedOutside { aliases: outside }.into());
            }
            Some(exists.select_list.iter().cloned().collect())
        };

        let root = self.new_vertex(None, BranchKey::of(exists))?;
        let classes: Vec<ClassId> = self
            .plan
            .vertex(vertex)
            .map(|v| v.classes().iter().copied().collect())
            .unwrap_or_default();
        if let Some(v) = self.plan.vertex_mut(root) {
            for class in classes {
                v.add_class(class);
            }
        }
        self.freeze(root);
        self.prepare_path_spec(&[root], &exists.path, &mut Vec::new())?;

        if !is_star(&exists.select_list) {
            let unknown = self.undeclared(&exists.select_list);
            if !unknown.is_empty() {
                return Err(PlanError::UnknownAliasInExists { aliases: unknown }.into());
            }
        }
        let subgraph = self.plan.reachable_subgraph(root);
        self.plan.add_exists_edge(
            vertex,
            root,
            ExistsEdge {
                subgraph,
                projection,
                negated: filter.negated,
            },
        );
        Ok(())
    }

    fn add_param(&mut self, param: &DynamicParam, kind: ParamKind) -> Result<()> {
        match self.plan.params().get(&param.name) {
            Some(existing) if *existing != kind => Err(PlanError::ConflictingParamType {
                param: param.name.clone(),
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                self.plan.set_param(&param.name, kind);
                Ok(())
            }
        }
    }

    /// Creates a vertex, registering its alias against the AST node at
    /// `branch`. Re-entering the same node (as recursion does) is allowed.
    fn new_vertex(&mut self, alias: Option<&str>, branch: BranchKey) -> Result<VertexId> {
        self.next_id += 1;
        let name = match alias {
            Some(alias) => {
                match self.alias_branches.get(alias) {
                    Some(previous) if !previous.is(branch) => {
                        return Err(PlanError::DuplicateAlias {
                            alias: alias.to_owned(),
                        }
                        .into());
                    }
                    Some(_) => {}
                    None => {
                        self.alias_branches.insert(alias.to_owned(), branch);
                        self.plan.declare_alias(alias);
                    }
                }
                format!("{alias}_{}", self.next_id)
            }
            None => format!("anon_{}", self.next_id),
        };
        let in_exists = self.exists_depth > 0;
        Ok(self
            .plan
            .add_vertex(name, alias.map(str::to_owned), in_exists))
    }

    fn freeze(&mut self, vertex: VertexId) {
        let (schema, identity) = (self.schema, self.identity_attribute);
        if let Some(v) = self.plan.vertex_mut(vertex) {
            v.freeze(schema, identity);
        }
    }
}

fn matches_name(filter: &Option<String>, name: &str) -> bool {
    filter.as_deref().map_or(true, |wanted| wanted == name)
}

fn intersect(current: Option<BTreeSet<AssocId>>, other: BTreeSet<AssocId>) -> BTreeSet<AssocId> {
    match current {
        Some(current) => current.intersection(&other).copied().collect(),
        None => other,
    }
}

fn restrict(candidates: Vec<AssocId>, filter: &Option<BTreeSet<AssocId>>) -> Vec<AssocId> {
    match filter {
        Some(allowed) => candidates
            .into_iter()
            .filter(|assoc| allowed.contains(assoc))
            .collect(),
        None => candidates,
    }
}

fn compile_pattern(source: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{source})$")).map_err(|err| {
        PlanError::InvalidPattern {
            pattern: source.to_owned(),
            message: err.to_string(),
        }
        .into()
    })
}
