//! Plan graph produced by the planner and consumed by the executor.
//!
//! The plan is an arena: vertices live in slots addressed by [`VertexId`],
//! edges refer to vertices by id, and recursion back-references are plain ids
//! as well. True cycles are never stored as edges, so the edge set always forms
//! a DAG and the [`Plan`] is the single owner of everything in it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use regex::Regex;
use xxhash_rust::xxh64::xxh64;

use crate::query::ast::AttributeFilter;
use crate::query::freeze;
use crate::query::metadata::{AssocId, ClassId, SchemaView};

/// Stable index of a vertex within its plan.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VertexId(pub usize);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a dynamic parameter is used by the plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Single value, used inside a literal value list.
    Scalar,
    /// Whole value set.
    Set,
}

impl ParamKind {
    /// Human-readable name, used in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            ParamKind::Scalar => "scalar",
            ParamKind::Set => "set",
        }
    }
}

/// Runtime form of an attribute filter: the AST filter plus its compiled pattern.
#[derive(Clone, Debug)]
pub struct VertexFilter {
    /// The filter as written.
    pub filter: AttributeFilter,
    /// Anchored regex for `matches` filters.
    pub pattern: Option<Regex>,
}

/// A set of vertices executed as a unit (recursion body or exists sub-query).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subgraph {
    root: VertexId,
    order: Vec<VertexId>,
    members: BTreeSet<VertexId>,
}

impl Subgraph {
    /// Vertex the subgraph was grown from.
    pub fn root(&self) -> VertexId {
        self.root
    }

    /// Members in topological order.
    pub fn order(&self) -> &[VertexId] {
        &self.order
    }

    /// Whether `vertex` belongs to the subgraph.
    pub fn contains(&self, vertex: VertexId) -> bool {
        self.members.contains(&vertex)
    }

    /// Member set.
    pub fn members(&self) -> &BTreeSet<VertexId> {
        &self.members
    }
}

/// Planning-time placeholder for "objects of some class set reachable here".
#[derive(Clone, Debug)]
pub struct PlanVertex {
    id: VertexId,
    name: String,
    alias: Option<String>,
    classes: BTreeSet<ClassId>,
    class_names: Vec<String>,
    frozen: bool,
    filters: Vec<VertexFilter>,
    root_object_ids: BTreeSet<String>,
    recursion_root: Option<VertexId>,
    recursion_subgraph: Option<Subgraph>,
    recursive: bool,
    in_exists: bool,
}

impl PlanVertex {
    fn new(id: VertexId, name: String, alias: Option<String>, in_exists: bool) -> Self {
        Self {
            id,
            name,
            alias,
            classes: BTreeSet::new(),
            class_names: Vec::new(),
            frozen: false,
            filters: Vec::new(),
            root_object_ids: BTreeSet::new(),
            recursion_root: None,
            recursion_subgraph: None,
            recursive: false,
            in_exists,
        }
    }

    /// Identifier within the plan.
    pub fn id(&self) -> VertexId {
        self.id
    }

    /// Plan-unique name (`alias_N` or `anon_N`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// User alias, if any.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Candidate classes; final once the vertex is frozen.
    pub fn classes(&self) -> &BTreeSet<ClassId> {
        &self.classes
    }

    /// Whether freeze has run.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Attribute filters applied to every object reaching this vertex.
    pub fn filters(&self) -> &[VertexFilter] {
        &self.filters
    }

    /// Literal identity seeds; empty means "scan the class extents".
    pub fn root_object_ids(&self) -> &BTreeSet<String> {
        &self.root_object_ids
    }

    /// Vertex whose recursion this vertex feeds back into.
    pub fn recursion_root(&self) -> Option<VertexId> {
        self.recursion_root
    }

    /// Recursion body owned by this vertex.
    pub fn recursion_subgraph(&self) -> Option<&Subgraph> {
        self.recursion_subgraph.as_ref()
    }

    /// Whether the vertex takes part in a recursion.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether the vertex was created inside an exists sub-query.
    pub fn in_exists(&self) -> bool {
        self.in_exists
    }

    pub(crate) fn add_class(&mut self, class: ClassId) {
        debug_assert!(!self.frozen, "vertex {} mutated after freeze", self.name);
        self.classes.insert(class);
    }

    pub(crate) fn add_filters(&mut self, filters: impl IntoIterator<Item = VertexFilter>) {
        debug_assert!(!self.frozen, "vertex {} mutated after freeze", self.name);
        self.filters.extend(filters);
    }

    pub(crate) fn seed_root_object_ids(&mut self, ids: impl IntoIterator<Item = String>) {
        debug_assert!(!self.frozen, "vertex {} mutated after freeze", self.name);
        self.root_object_ids.extend(ids);
    }

    pub(crate) fn freeze(&mut self, schema: &dyn SchemaView, identity_attribute: &str) {
        debug_assert!(!self.frozen, "vertex {} frozen twice", self.name);
        let filters: Vec<&AttributeFilter> = self.filters.iter().map(|f| &f.filter).collect();
        self.classes = freeze::freeze(&self.classes, &filters, schema, identity_attribute);
        let mut names: Vec<String> = self
            .classes
            .iter()
            .map(|class| schema.display_class(*class))
            .collect();
        names.sort();
        self.class_names = names;
        self.frozen = true;
    }
}

/// Follow-edge payload: one association traversal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowEdge {
    /// Traversed association.
    pub association: AssocId,
    /// End played by the source objects (0 = forward, 1 = backward).
    pub origin_end: usize,
    /// Declared type of the origin end, used as a runtime precheck.
    pub origin_type: ClassId,
    /// Late-bound subclass narrowing for reached objects.
    pub destination_type_filter: Option<ClassId>,
}

/// Exists-edge payload: a sub-plan evaluated once per candidate object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistsEdge {
    /// Vertices of the sub-query, rooted at the edge target.
    pub subgraph: Subgraph,
    /// Aliases whose results count; `None` counts every vertex.
    pub projection: Option<BTreeSet<String>>,
    /// Passes when the sub-query finds nothing.
    pub negated: bool,
}

/// Edge variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanEdgeKind {
    /// Association traversal.
    Follow(FollowEdge),
    /// Existence test.
    Exists(ExistsEdge),
}

/// Directed plan edge. Equality is by canonical signature.
#[derive(Clone, Debug)]
pub struct PlanEdge {
    source: VertexId,
    target: VertexId,
    kind: PlanEdgeKind,
    signature: String,
}

impl PlanEdge {
    /// Source vertex.
    pub fn source(&self) -> VertexId {
        self.source
    }

    /// Target vertex.
    pub fn target(&self) -> VertexId {
        self.target
    }

    /// Edge payload.
    pub fn kind(&self) -> &PlanEdgeKind {
        &self.kind
    }

    /// Canonical signature, e.g. `a_1:parent -> Contains -> b_2:child`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Follow payload, if this is a follow edge.
    pub fn as_follow(&self) -> Option<&FollowEdge> {
        match &self.kind {
            PlanEdgeKind::Follow(follow) => Some(follow),
            PlanEdgeKind::Exists(_) => None,
        }
    }

    /// Exists payload, if this is an exists edge.
    pub fn as_exists(&self) -> Option<&ExistsEdge> {
        match &self.kind {
            PlanEdgeKind::Exists(exists) => Some(exists),
            PlanEdgeKind::Follow(_) => None,
        }
    }
}

impl PartialEq for PlanEdge {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for PlanEdge {}

impl std::hash::Hash for PlanEdge {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

impl fmt::Display for PlanEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature)
    }
}

/// Deterministic textual dump of a plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanExplain {
    /// One line per vertex and edge, sorted.
    pub lines: Vec<String>,
    /// Hash of the lines, stable across runs.
    pub plan_hash: u64,
}

impl fmt::Display for PlanExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// A compiled query: vertex arena, edges, aliases, parameters and projection.
#[derive(Clone, Debug)]
pub struct Plan {
    vertices: Vec<Option<PlanVertex>>,
    edges: Vec<PlanEdge>,
    signatures: HashSet<String>,
    aliases: BTreeMap<String, Vec<VertexId>>,
    params: BTreeMap<String, ParamKind>,
    projection: Option<BTreeSet<String>>,
    order: Vec<VertexId>,
    identity_attribute: String,
}

impl Plan {
    pub(crate) fn new(identity_attribute: impl Into<String>) -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            signatures: HashSet::new(),
            aliases: BTreeMap::new(),
            params: BTreeMap::new(),
            projection: None,
            order: Vec::new(),
            identity_attribute: identity_attribute.into(),
        }
    }

    /// Looks up a live vertex.
    pub fn vertex(&self, id: VertexId) -> Option<&PlanVertex> {
        self.vertices.get(id.0).and_then(Option::as_ref)
    }

    /// All live vertices in creation order.
    pub fn vertices(&self) -> impl Iterator<Item = &PlanVertex> {
        self.vertices.iter().flatten()
    }

    /// Live vertex named `name`.
    pub fn vertex_named(&self, name: &str) -> Option<&PlanVertex> {
        self.vertices().find(|vertex| vertex.name == name)
    }

    /// All edges in creation order.
    pub fn edges(&self) -> &[PlanEdge] {
        &self.edges
    }

    /// Edges leaving `vertex`.
    pub fn outgoing(&self, vertex: VertexId) -> impl Iterator<Item = &PlanEdge> {
        self.edges.iter().filter(move |edge| edge.source == vertex)
    }

    /// Declared aliases and the live vertices carrying them.
    pub fn aliases(&self) -> &BTreeMap<String, Vec<VertexId>> {
        &self.aliases
    }

    /// Dynamic parameters and their inferred kinds.
    pub fn params(&self) -> &BTreeMap<String, ParamKind> {
        &self.params
    }

    /// Selected aliases; `None` selects everything.
    pub fn projection(&self) -> Option<&BTreeSet<String>> {
        self.projection.as_ref()
    }

    /// True for `select *`.
    pub fn is_select_all(&self) -> bool {
        self.projection.is_none()
    }

    /// Whether `vertex` contributes to the final result.
    pub fn is_selected(&self, vertex: &PlanVertex) -> bool {
        match &self.projection {
            None => !vertex.in_exists,
            Some(projection) => vertex
                .alias
                .as_ref()
                .is_some_and(|alias| projection.contains(alias)),
        }
    }

    /// Vertices outside exists sub-queries, in topological order.
    pub fn topological_order(&self) -> &[VertexId] {
        &self.order
    }

    /// Name of the attribute denoting object identity.
    pub fn identity_attribute(&self) -> &str {
        &self.identity_attribute
    }

    /// Sorted dump of every vertex and edge.
    pub fn explain(&self) -> PlanExplain {
        let mut lines: Vec<String> = self
            .vertices()
            .map(|vertex| self.describe_vertex(vertex))
            .chain(self.edges.iter().map(|edge| edge.signature.clone()))
            .collect();
        lines.sort();
        let plan_hash = xxh64(lines.join("\n").as_bytes(), 0);
        PlanExplain { lines, plan_hash }
    }

    /// Hash of the explain dump, usable as a plan-cache key.
    pub fn fingerprint(&self) -> u64 {
        self.explain().plan_hash
    }

    fn describe_vertex(&self, vertex: &PlanVertex) -> String {
        let mut out = format!("{} {{{}}}", vertex.name, vertex.class_names.join(", "));
        if !vertex.filters.is_empty() {
            let filters: Vec<String> = vertex
                .filters
                .iter()
                .map(|f| f.filter.to_string())
                .collect();
            out.push_str(" where ");
            out.push_str(&filters.join(" and "));
        }
        if !vertex.root_object_ids.is_empty() {
            let ids: Vec<&str> = vertex.root_object_ids.iter().map(String::as_str).collect();
            out.push_str(&format!(" seeds ({})", ids.join(", ")));
        }
        if vertex.recursive {
            out.push_str(" recursive");
        }
        if let Some(root) = vertex.recursion_root.and_then(|id| self.vertex(id)) {
            out.push_str(&format!(" => {}", root.name));
        }
        out
    }

    pub(crate) fn add_vertex(
        &mut self,
        name: String,
        alias: Option<String>,
        in_exists: bool,
    ) -> VertexId {
        let id = VertexId(self.vertices.len());
        if let Some(alias) = &alias {
            self.aliases.entry(alias.clone()).or_default().push(id);
        }
        self.vertices
            .push(Some(PlanVertex::new(id, name, alias, in_exists)));
        id
    }

    pub(crate) fn declare_alias(&mut self, alias: &str) {
        self.aliases.entry(alias.to_owned()).or_default();
    }

    pub(crate) fn vertex_mut(&mut self, id: VertexId) -> Option<&mut PlanVertex> {
        self.vertices.get_mut(id.0).and_then(Option::as_mut)
    }

    pub(crate) fn set_param(&mut self, name: &str, kind: ParamKind) {
        self.params.insert(name.to_owned(), kind);
    }

    /// Adds a follow edge; a no-op when an edge with the same signature exists.
    pub(crate) fn add_follow_edge(
        &mut self,
        schema: &dyn SchemaView,
        source: VertexId,
        target: VertexId,
        follow: FollowEdge,
    ) -> bool {
        let Some(assoc) = schema.association(follow.association) else {
            return false;
        };
        let mut signature = format!(
            "{}:{} -> {} -> {}:{}",
            self.vertex_name(source),
            assoc.end(follow.origin_end).name,
            assoc.name,
            self.vertex_name(target),
            assoc.end(1 - follow.origin_end).name,
        );
        if let Some(class) = follow.destination_type_filter {
            signature.push_str(&format!(" {{{}}}", schema.display_class(class)));
        }
        self.push_edge(source, target, PlanEdgeKind::Follow(follow), signature)
    }

    /// Adds an exists edge from `source` to the sub-query root `target`.
    pub(crate) fn add_exists_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        exists: ExistsEdge,
    ) -> bool {
        let not = if exists.negated { "not " } else { "" };
        let projection = match &exists.projection {
            Some(aliases) => {
                let names: Vec<&str> = aliases.iter().map(String::as_str).collect();
                format!(" [{}]", names.join(", "))
            }
            None => String::new(),
        };
        let signature = format!(
            "{} -> {not}exists{projection} -> {}",
            self.vertex_name(source),
            self.vertex_name(target)
        );
        self.push_edge(source, target, PlanEdgeKind::Exists(exists), signature)
    }

    fn push_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        kind: PlanEdgeKind,
        signature: String,
    ) -> bool {
        if !self.signatures.insert(signature.clone()) {
            return false;
        }
        self.edges.push(PlanEdge {
            source,
            target,
            kind,
            signature,
        });
        true
    }

    fn vertex_name(&self, id: VertexId) -> &str {
        self.vertex(id).map(PlanVertex::name).unwrap_or("?")
    }

    /// Removes a vertex, its incident edges, and any exists sub-queries hanging
    /// off it.
    pub(crate) fn remove_vertex(&mut self, id: VertexId) {
        let Some(vertex) = self.vertices.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        if let Some(alias) = &vertex.alias {
            if let Some(ids) = self.aliases.get_mut(alias) {
                ids.retain(|v| *v != id);
            }
        }
        let mut orphaned = Vec::new();
        for edge in &self.edges {
            if edge.source == id {
                if let PlanEdgeKind::Exists(exists) = &edge.kind {
                    orphaned.extend(exists.subgraph.order.iter().copied());
                }
            }
        }
        let signatures = &mut self.signatures;
        self.edges.retain(|edge| {
            let keep = edge.source != id && edge.target != id;
            if !keep {
                signatures.remove(&edge.signature);
            }
            keep
        });
        for vertex in orphaned {
            self.remove_vertex(vertex);
        }
    }

    /// Records a model fixpoint: `leaf` feeds back into `root`, and `root` owns
    /// the recursion body reachable from it.
    pub(crate) fn set_recursion_root(&mut self, leaf: VertexId, root: VertexId) {
        let subgraph = self.reachable_subgraph(root);
        for member in subgraph.order.clone() {
            if let Some(vertex) = self.vertex_mut(member) {
                vertex.recursive = true;
            }
        }
        if let Some(vertex) = self.vertex_mut(leaf) {
            vertex.recursion_root = Some(root);
        }
        if let Some(vertex) = self.vertex_mut(root) {
            vertex.recursion_subgraph = Some(subgraph);
        }
    }

    /// Vertices reachable from `root` through follow edges, in topological order.
    pub(crate) fn reachable_subgraph(&self, root: VertexId) -> Subgraph {
        let mut members = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            for edge in self.outgoing(current) {
                if edge.as_follow().is_some() && members.insert(edge.target) {
                    stack.push(edge.target);
                }
            }
        }
        let order = self.topological_sort(&members, false);
        Subgraph {
            root,
            order,
            members,
        }
    }

    /// Fixes the projection and the main execution order.
    pub(crate) fn finish(&mut self, projection: Option<BTreeSet<String>>) {
        self.projection = projection;
        let members: BTreeSet<VertexId> = self
            .vertices()
            .filter(|vertex| !vertex.in_exists)
            .map(PlanVertex::id)
            .collect();
        self.order = self.topological_sort(&members, true);
    }

    /// Kahn's algorithm over the edges between `members`; ties are broken by
    /// vertex id so the order is deterministic.
    fn topological_sort(&self, members: &BTreeSet<VertexId>, with_exists: bool) -> Vec<VertexId> {
        let relevant: Vec<&PlanEdge> = self
            .edges
            .iter()
            .filter(|edge| with_exists || edge.as_follow().is_some())
            .filter(|edge| members.contains(&edge.source) && members.contains(&edge.target))
            .collect();
        let mut in_degree: BTreeMap<VertexId, usize> =
            members.iter().map(|id| (*id, 0)).collect();
        for edge in &relevant {
            *in_degree.entry(edge.target).or_default() += 1;
        }
        let mut ready: BTreeSet<VertexId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(members.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for edge in relevant.iter().filter(|edge| edge.source == next) {
                if let Some(degree) = in_degree.get_mut(&edge.target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(edge.target);
                    }
                }
            }
        }
        debug_assert_eq!(order.len(), members.len(), "plan graph contains a cycle");
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::metadata::{EndSpec, InMemorySchema};

    fn schema() -> InMemorySchema {
        let mut schema = InMemorySchema::new();
        schema.add_class("Folder", &[], &["name"]).unwrap();
        schema
            .add_association(
                "Contains",
                [
                    EndSpec::composite("parent", "Folder"),
                    EndSpec::new("child", "Folder"),
                ],
            )
            .unwrap();
        schema
    }

    fn follow(origin_end: usize) -> FollowEdge {
        FollowEdge {
            association: AssocId(0),
            origin_end,
            origin_type: ClassId(0),
            destination_type_filter: None,
        }
    }

    #[test]
    fn duplicate_signatures_are_ignored() {
        let schema = schema();
        let mut plan = Plan::new("mofId");
        let a = plan.add_vertex("a_1".into(), Some("a".into()), false);
        let b = plan.add_vertex("anon_2".into(), None, false);
        assert!(plan.add_follow_edge(&schema, a, b, follow(0)));
        assert!(!plan.add_follow_edge(&schema, a, b, follow(0)));
        assert!(plan.add_follow_edge(&schema, a, b, follow(1)));
        assert_eq!(plan.edges().len(), 2);
        assert_eq!(
            plan.edges()[0].signature(),
            "a_1:parent -> Contains -> anon_2:child"
        );
        assert_eq!(
            plan.edges()[1].signature(),
            "a_1:child -> Contains -> anon_2:parent"
        );
    }

    #[test]
    fn removing_a_vertex_drops_its_edges_and_exists_subgraph() {
        let schema = schema();
        let mut plan = Plan::new("mofId");
        let a = plan.add_vertex("a_1".into(), None, false);
        let b = plan.add_vertex("b_2".into(), Some("b".into()), false);
        let probe = plan.add_vertex("anon_3".into(), None, true);
        let inner = plan.add_vertex("anon_4".into(), None, true);
        plan.add_follow_edge(&schema, a, b, follow(0));
        plan.add_follow_edge(&schema, probe, inner, follow(0));
        let subgraph = plan.reachable_subgraph(probe);
        assert_eq!(subgraph.order(), &[probe, inner]);
        plan.add_exists_edge(
            b,
            probe,
            ExistsEdge {
                subgraph,
                projection: None,
                negated: false,
            },
        );

        plan.remove_vertex(b);
        assert!(plan.vertex(b).is_none());
        assert!(plan.vertex(probe).is_none());
        assert!(plan.vertex(inner).is_none());
        assert!(plan.edges().is_empty());
        assert_eq!(plan.aliases().get("b"), Some(&Vec::new()));
    }

    #[test]
    fn topological_order_breaks_ties_by_creation() {
        let schema = schema();
        let mut plan = Plan::new("mofId");
        let a = plan.add_vertex("a_1".into(), None, false);
        let b = plan.add_vertex("b_2".into(), None, false);
        let c = plan.add_vertex("c_3".into(), None, false);
        plan.add_follow_edge(&schema, c, a, follow(0));
        plan.finish(None);
        assert_eq!(plan.topological_order(), &[b, c, a]);
    }

    #[test]
    fn recursion_root_owns_reachable_body() {
        let schema = schema();
        let mut plan = Plan::new("mofId");
        let start = plan.add_vertex("start_1".into(), None, false);
        let first = plan.add_vertex("anon_2".into(), None, false);
        let second = plan.add_vertex("anon_3".into(), None, false);
        plan.add_follow_edge(&schema, start, first, follow(0));
        plan.add_follow_edge(&schema, first, second, follow(0));
        plan.set_recursion_root(second, first);

        let root = plan.vertex(first).unwrap();
        assert!(root.is_recursive());
        assert_eq!(root.recursion_subgraph().unwrap().order(), &[first, second]);
        assert_eq!(plan.vertex(second).unwrap().recursion_root(), Some(first));
        assert!(!plan.vertex(start).unwrap().is_recursive());
    }
}
