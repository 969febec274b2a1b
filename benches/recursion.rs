//! Seminaive recursion over long folder chains.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lurql::query::{
    ast::{Filter, Follow, Recurse, Root},
    builder::QueryBuilder,
    metadata::{EndSpec, InMemorySchema},
    repository::InMemoryRepository,
    Executor, Plan, Planner,
};

const CHAIN_LENGTHS: [usize; 3] = [100, 1_000, 5_000];
const FAST_ENV_VAR: &str = "LURQL_BENCH_FAST";

/// Folder chain `D0 -> D1 -> ... -> Dn`, each folder holding one file.
fn chain(length: usize) -> (Arc<InMemorySchema>, Arc<InMemoryRepository>) {
    let mut schema = InMemorySchema::new();
    schema.add_class("Folder", &[], &["name"]).unwrap();
    schema.add_class("File", &[], &["name"]).unwrap();
    schema
        .add_association(
            "Contains",
            [EndSpec::composite("parent", "Folder"), EndSpec::new("child", "Folder")],
        )
        .unwrap();
    schema
        .add_association(
            "Contains",
            [EndSpec::composite("folder", "Folder"), EndSpec::new("file", "File")],
        )
        .unwrap();
    let schema = Arc::new(schema);
    let mut repo = InMemoryRepository::new(Arc::clone(&schema));
    let mut prev = None;
    for i in 0..length {
        let folder = repo.add_object(&format!("D{i}"), "Folder").unwrap();
        repo.set_attribute(folder, "name", format!("D{i}")).unwrap();
        let file = repo.add_object(&format!("D{i}.txt"), "File").unwrap();
        repo.link_named("Contains", [folder, file]).unwrap();
        if let Some(parent) = prev {
            repo.link_named("Contains", [parent, folder]).unwrap();
        }
        prev = Some(folder);
    }
    (schema, Arc::new(repo))
}

fn subtree_plan(schema: &InMemorySchema) -> Plan {
    QueryBuilder::select(["files"])
        .from(
            Root::new("Folder")
                .filter(Filter::equals("name", "D0"))
                .then(
                    Recurse::new(Follow::new().association("Contains").forward()).then(
                        Follow::new()
                            .association("Contains")
                            .forward()
                            .destination_class("File")
                            .alias("files"),
                    ),
                ),
        )
        .plan(&Planner::default(), schema)
        .unwrap()
}

fn bench_recursion(c: &mut Criterion) {
    let fast = std::env::var_os(FAST_ENV_VAR).is_some();
    let mut group = c.benchmark_group("recursion_chain");
    group.sample_size(if fast { 10 } else { 30 });
    for length in CHAIN_LENGTHS {
        if fast && length > 1_000 {
            continue;
        }
        let (schema, repo) = chain(length);
        let plan = subtree_plan(&schema);
        let executor = Executor::new(repo);
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &plan, |b, plan| {
            b.iter(|| black_box(executor.execute(plan).unwrap().len()))
        });
    }
    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let (schema, _) = chain(1);
    c.bench_function("plan_recursive_subtree", |b| {
        b.iter(|| black_box(subtree_plan(&schema).fingerprint()))
    });
}

criterion_group!(benches, bench_recursion, bench_planning);
criterion_main!(benches);
