#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use lurql::cli::fixture::{parse_model, LoadedModel};
use lurql::query::{
    ast::{DynamicParam, Filter, FilterValue, Follow, Root},
    builder::QueryBuilder,
    repository::Repository,
    Executor, Params, Plan, Planner, QueryError,
};
use lurql::SqliteSqlConnection;

const MODEL: &str = r#"{
    "classes": [
        {"name": "Named", "attributes": ["name"]},
        {"name": "Folder", "superclasses": ["Named"], "attributes": ["owner"]},
        {"name": "File", "superclasses": ["Named"], "attributes": ["size"]}
    ],
    "associations": [
        {"name": "Contains", "ends": [
            {"name": "parent", "class": "Folder", "aggregation": "composite"},
            {"name": "child", "class": "Folder"}]},
        {"name": "Contains", "ends": [
            {"name": "folder", "class": "Folder", "aggregation": "composite"},
            {"name": "file", "class": "File"}]}
    ],
    "objects": [
        {"id": "root", "class": "Folder", "attributes": {"name": "root"}},
        {"id": "a", "class": "Folder", "attributes": {"name": "a", "owner": {"ref": "root"}}},
        {"id": "b", "class": "Folder", "attributes": {"name": "b"}},
        {"id": "root.txt", "class": "File", "attributes": {"name": "root.txt", "size": 10}},
        {"id": "a.txt", "class": "File", "attributes": {"name": "a.txt", "size": 20}},
        {"id": "b.log", "class": "File", "attributes": {"name": "b.log", "size": 30}}
    ],
    "links": [
        {"association": "Contains", "ends": ["root", "a"]},
        {"association": "Contains", "ends": ["a", "b"]},
        {"association": "Contains", "ends": ["root", "root.txt"]},
        {"association": "Contains", "ends": ["a", "a.txt"]},
        {"association": "Contains", "ends": ["b", "b.log"]}
    ]
}"#;

fn model() -> LoadedModel {
    parse_model(MODEL).expect("model")
}

fn plan(model: &LoadedModel, query: QueryBuilder) -> Plan {
    query
        .plan(&Planner::default(), model.schema.as_ref())
        .expect("plan")
}

fn ids(model: &LoadedModel, executor: &Executor, plan: &Plan) -> Result<BTreeSet<String>, QueryError> {
    let results = executor.execute(plan)?;
    Ok(results
        .into_iter()
        .map(|obj| model.repository.object_id(obj).expect("id"))
        .collect())
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn wanted_sql() -> Arc<SqliteSqlConnection> {
    let sql = SqliteSqlConnection::open_in_memory().expect("sqlite");
    sql.execute_batch(
        "CREATE TABLE wanted (name TEXT);
         INSERT INTO wanted VALUES ('a.txt'), ('b.log'), (NULL);",
    )
    .expect("seed");
    Arc::new(sql)
}

#[test]
fn sql_subquery_filters_resolve_against_sqlite() {
    let model = model();
    let executor = Executor::new(model.repository.clone()).with_sql_connection(wanted_sql());
    let query = || {
        QueryBuilder::select_all()
            .from(Root::new("File").filter(Filter::subquery("name", "SELECT name FROM wanted")))
    };
    let wanted = plan(&model, query());
    assert_eq!(ids(&model, &executor, &wanted).unwrap(), set(&["a.txt", "b.log"]));

    let unwanted = plan(
        &model,
        QueryBuilder::select_all().from(
            Root::new("File").filter(Filter::subquery("name", "SELECT name FROM wanted").negate()),
        ),
    );
    assert_eq!(ids(&model, &executor, &unwanted).unwrap(), set(&["root.txt"]));
}

#[test]
fn sql_errors_carry_codes() {
    let model = model();
    let broken = plan(
        &model,
        QueryBuilder::select_all()
            .from(Root::new("File").filter(Filter::subquery("name", "SELECT x FROM missing"))),
    );
    let no_connection = Executor::new(model.repository.clone())
        .execute(&broken)
        .expect_err("no sql connection");
    assert_eq!(no_connection.code(), "MissingSqlConnection");

    let failing = Executor::new(model.repository.clone())
        .with_sql_connection(wanted_sql())
        .execute(&broken)
        .expect_err("bad table");
    assert_eq!(failing.code(), "SqlSubqueryFailure");
}

#[test]
fn numeric_attributes_compare_as_strings() {
    let model = model();
    let big = plan(
        &model,
        QueryBuilder::select_all().from(Root::new("File").filter(Filter::one_of("size", ["20", "30"]))),
    );
    let executor = Executor::new(model.repository.clone());
    assert_eq!(ids(&model, &executor, &big).unwrap(), set(&["a.txt", "b.log"]));
}

#[test]
fn inherited_attributes_filter_every_subclass() {
    let model = model();
    let named = plan(
        &model,
        QueryBuilder::select_all().from(Root::new("Named").filter(Filter::matches("name", "[ab].*"))),
    );
    let executor = Executor::new(model.repository.clone());
    assert_eq!(
        ids(&model, &executor, &named).unwrap(),
        set(&["a", "b", "a.txt", "b.log"])
    );
}

#[test]
fn scalar_and_set_params_bind_per_execution() {
    let model = model();
    let query = plan(
        &model,
        QueryBuilder::select(["files"]).from(
            Root::new("Folder")
                .filter(Filter::values(
                    "name",
                    vec![
                        FilterValue::Literal("b".into()),
                        FilterValue::Param(DynamicParam::new("folder")),
                    ],
                ))
                .then(
                    Follow::new()
                        .association("Contains")
                        .forward()
                        .destination_class("File")
                        .alias("files")
                        .filter(Filter::set_param("size", "sizes")),
                ),
        ),
    );
    assert_eq!(query.params().len(), 2);

    let executor = Executor::new(model.repository.clone()).with_params(
        Params::new()
            .bind_scalar("folder", "root")
            .bind_set("sizes", ["10", "30"]),
    );
    assert_eq!(ids(&model, &executor, &query).unwrap(), set(&["root.txt", "b.log"]));

    let empty = Executor::new(model.repository.clone()).with_params(
        Params::new()
            .bind_scalar("folder", "a")
            .bind_set("sizes", Vec::<String>::new()),
    );
    assert!(ids(&model, &empty, &query).unwrap().is_empty());
}

#[test]
fn exists_filters_test_each_candidate() {
    let model = model();
    let logs = || {
        Follow::new()
            .association("Contains")
            .forward()
            .destination_class("File")
            .alias("logs")
            .filter(Filter::matches("name", r".*\.log"))
    };
    let with_logs = plan(
        &model,
        QueryBuilder::select_all().from(Root::new("Folder").filter(Filter::exists(["*"], logs()))),
    );
    let executor = Executor::new(model.repository.clone());
    assert_eq!(ids(&model, &executor, &with_logs).unwrap(), set(&["b"]));

    let without_logs = plan(
        &model,
        QueryBuilder::select_all()
            .from(Root::new("Folder").filter(Filter::exists(["logs"], logs()).negate())),
    );
    assert_eq!(ids(&model, &executor, &without_logs).unwrap(), set(&["root", "a"]));
}

#[test]
fn object_references_match_by_identity() {
    let model = model();
    let owned = plan(
        &model,
        QueryBuilder::select_all().from(Root::new("Folder").filter(Filter::equals("owner", "root"))),
    );
    let unowned = plan(
        &model,
        QueryBuilder::select_all()
            .from(Root::new("Folder").filter(Filter::equals("owner", "root").negate())),
    );
    let executor = Executor::new(model.repository.clone());
    assert_eq!(ids(&model, &executor, &owned).unwrap(), set(&["a"]));
    // Null owners fail negated filters too.
    assert!(ids(&model, &executor, &unowned).unwrap().is_empty());
}

#[test]
fn scalar_param_selects_what_the_literal_selects() {
    let model = model();
    for (class, attribute, value) in [
        ("Named", "name", "a.txt"),
        ("Named", "name", "a"),
        ("File", "size", "30"),
        ("File", "size", "31"),
    ] {
        let literal = plan(
            &model,
            QueryBuilder::select_all().from(Root::new(class).filter(Filter::equals(attribute, value))),
        );
        let parameterized = plan(
            &model,
            QueryBuilder::select_all().from(Root::new(class).filter(Filter::param(attribute, "p"))),
        );
        let expected = ids(&model, &Executor::new(model.repository.clone()), &literal).unwrap();
        let bound = Executor::new(model.repository.clone())
            .with_params(Params::new().bind_scalar("p", value));
        assert_eq!(
            ids(&model, &bound, &parameterized).unwrap(),
            expected,
            "{attribute} = {value}"
        );
    }
}
