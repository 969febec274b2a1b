#![allow(missing_docs)]

use lurql::query::{
    ast::{Filter, Follow, PathSpec, Query, Recurse, Root},
    builder::QueryBuilder,
    metadata::{EndSpec, InMemorySchema},
    Plan, Planner, PlannerConfig,
};
use xxhash_rust::xxh64::xxh64;

fn schema() -> InMemorySchema {
    let mut schema = InMemorySchema::new();
    schema.add_class("Folder", &[], &["name"]).expect("folder");
    schema.add_class("File", &[], &["name"]).expect("file");
    schema
        .add_association(
            "Contains",
            [
                EndSpec::composite("parent", "Folder"),
                EndSpec::new("child", "Folder"),
            ],
        )
        .expect("folders");
    schema
        .add_association(
            "Contains",
            [
                EndSpec::composite("folder", "Folder"),
                EndSpec::new("file", "File"),
            ],
        )
        .expect("files");
    schema
}

fn plan(query: QueryBuilder) -> Plan {
    query
        .plan(&Planner::default(), &schema())
        .expect("plan succeeds")
}

fn logs() -> Follow {
    Follow::new()
        .association("Contains")
        .forward()
        .destination_class("File")
        .alias("logs")
        .filter(Filter::matches("name", r".*\.log"))
}

#[test]
fn exists_subqueries_are_explained_as_edges() {
    let plan = plan(
        QueryBuilder::select_all()
            .from(Root::new("Folder").filter(Filter::exists(["logs"], logs()).negate())),
    );
    assert_eq!(
        plan.explain().lines,
        [
            "anon_1 -> not exists [logs] -> anon_2",
            "anon_1 {Folder}",
            "anon_2 {Folder}",
            "anon_2:folder -> Contains -> logs_3:file",
            r"logs_3 {File} where name matches '.*\.log'",
        ]
    );
}

#[test]
fn identity_seeds_are_listed() {
    let plan = plan(
        QueryBuilder::select_all()
            .from(Root::new("Folder").filter(Filter::one_of("mofId", ["b", "a"]))),
    );
    assert_eq!(
        plan.explain().lines,
        ["anon_1 {Folder} where mofId in ('b', 'a') seeds (a, b)"]
    );
}

#[test]
fn configured_identity_attribute_drives_seeding() {
    let planner = Planner::new(PlannerConfig {
        identity_attribute: "uuid".into(),
    });
    let plan = QueryBuilder::select_all()
        .from(Root::new("Folder").filter(Filter::equals("uuid", "F1")))
        .plan(&planner, &schema())
        .expect("plan succeeds");
    assert_eq!(
        plan.explain().lines,
        ["anon_1 {Folder} where uuid = 'F1' seeds (F1)"]
    );
    assert_eq!(plan.identity_attribute(), "uuid");
}

#[test]
fn fingerprint_hashes_the_explain_text() {
    let query = || {
        QueryBuilder::select_all().from(
            Root::new("Folder")
                .filter(Filter::equals("name", "root"))
                .then(Recurse::new(Follow::new().association("Contains").forward())),
        )
    };
    let first = plan(query());
    let second = plan(query());
    let explain = first.explain();
    assert_eq!(explain.plan_hash, xxh64(explain.lines.join("\n").as_bytes(), 0));
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(explain.to_string().lines().count(), explain.lines.len());

    let other = plan(
        QueryBuilder::select_all().from(
            Root::new("Folder")
                .filter(Filter::equals("name", "other"))
                .then(Recurse::new(Follow::new().association("Contains").forward())),
        ),
    );
    assert_ne!(first.fingerprint(), other.fingerprint());
}

#[test]
fn json_queries_plan_like_built_ones() {
    let json = r#"{
        "select_list": ["files"],
        "root": {"root": {
            "class_name": "Folder",
            "then": {"branches": [{"follow": {
                "alias": "files",
                "association_filters": {"association": "Contains", "destination_class": "File"}
            }}]}
        }}
    }"#;
    let parsed: Query = serde_json::from_str(json).expect("query json");
    let from_json = Planner::default()
        .plan(&parsed, &schema())
        .expect("plan succeeds");
    let built = plan(
        QueryBuilder::select(["files"]).from(
            Root::new("Folder").then(
                Follow::new()
                    .association("Contains")
                    .destination_class("File")
                    .alias("files"),
            ),
        ),
    );
    assert_eq!(from_json.explain(), built.explain());
    assert!(!from_json.is_select_all());
}

#[test]
fn union_roots_share_one_plan() {
    let plan = plan(QueryBuilder::select_all().from(PathSpec::new([
        Root::new("Folder").alias("dirs"),
        Root::new("File").alias("docs"),
    ])));
    assert_eq!(
        plan.explain().lines,
        ["dirs_1 {Folder}", "docs_2 {File}"]
    );
    assert_eq!(plan.topological_order().len(), 2);
}
