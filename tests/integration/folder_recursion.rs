#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use lurql::query::{
    ast::{Filter, Follow, PathSpec, Recurse, Root},
    builder::QueryBuilder,
    metadata::{EndSpec, InMemorySchema},
    repository::{InMemoryRepository, ObjectRef, Repository},
    Executor, Planner,
};

struct Tree {
    schema: Arc<InMemorySchema>,
    repo: Arc<InMemoryRepository>,
}

/// Folders F1 -> F2 -> F3, each holding one file, plus an unrelated folder.
fn tree(extra_links: &[(&str, &str)]) -> Tree {
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
        .expect("folder contains");
    schema
        .add_association(
            "Contains",
            [
                EndSpec::composite("folder", "Folder"),
                EndSpec::new("file", "File"),
            ],
        )
        .expect("file contains");
    let schema = Arc::new(schema);
    let mut repo = InMemoryRepository::new(Arc::clone(&schema));
    for (id, class) in [
        ("F1", "Folder"),
        ("F2", "Folder"),
        ("F3", "Folder"),
        ("X", "Folder"),
        ("f1.txt", "File"),
        ("f2.txt", "File"),
        ("f3.txt", "File"),
        ("x.txt", "File"),
    ] {
        let obj = repo.add_object(id, class).expect("object");
        repo.set_attribute(obj, "name", id).expect("name");
    }
    let links = [
        ("F1", "F2"),
        ("F2", "F3"),
        ("F1", "f1.txt"),
        ("F2", "f2.txt"),
        ("F3", "f3.txt"),
        ("X", "x.txt"),
    ];
    for (parent, child) in links.iter().chain(extra_links) {
        let ends = [lookup(&repo, parent), lookup(&repo, child)];
        repo.link_named("Contains", ends).expect("link");
    }
    Tree {
        schema,
        repo: Arc::new(repo),
    }
}

fn lookup(repo: &InMemoryRepository, id: &str) -> ObjectRef {
    repo.object_by_id(id).expect("lookup").expect("known id")
}

impl Tree {
    fn run(&self, query: QueryBuilder) -> BTreeSet<String> {
        let plan = query
            .plan(&Planner::default(), self.schema.as_ref())
            .expect("plan");
        let results = Executor::new(self.repo.clone())
            .execute(&plan)
            .expect("execute");
        results
            .into_iter()
            .map(|obj| self.repo.object_id(obj).expect("id"))
            .collect()
    }
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn files_of_subtree(start: &str) -> Root {
    Root::new("Folder")
        .alias("start")
        .filter(Filter::equals("name", start))
        .then(
            Recurse::new(Follow::new().association("Contains").forward()).then(
                Follow::new()
                    .association("Contains")
                    .forward()
                    .destination_class("File")
                    .alias("files"),
            ),
        )
}

#[test]
fn recursion_reaches_files_at_every_depth() {
    let tree = tree(&[]);
    let all = tree.run(QueryBuilder::select_all().from(files_of_subtree("F1")));
    assert_eq!(
        all,
        set(&["F1", "F2", "F3", "f1.txt", "f2.txt", "f3.txt"])
    );
}

#[test]
fn continuation_runs_from_the_recursion_fixpoint() {
    let tree = tree(&[]);
    let files = tree.run(QueryBuilder::select(["files"]).from(files_of_subtree("F1")));
    assert_eq!(files, set(&["f2.txt", "f3.txt"]));
    let start = tree.run(QueryBuilder::select(["start"]).from(files_of_subtree("F2")));
    assert_eq!(start, set(&["F2"]));
}

#[test]
fn cycles_in_the_data_terminate() {
    let tree = tree(&[("F3", "F1")]);
    let all = tree.run(QueryBuilder::select_all().from(files_of_subtree("F2")));
    assert_eq!(
        all,
        set(&["F1", "F2", "F3", "f1.txt", "f2.txt", "f3.txt"])
    );
}

#[test]
fn unfiltered_roots_cover_every_tree() {
    let tree = tree(&[]);
    let query = QueryBuilder::select_all().from(
        Root::new("Folder").then(Recurse::new(
            Follow::new()
                .association("Contains")
                .forward()
                .destination_class("Folder"),
        )),
    );
    assert_eq!(tree.run(query), set(&["F1", "F2", "F3", "X"]));
}

#[test]
fn gather_with_parent_merges_the_starting_folder() {
    let tree = tree(&[]);
    let query = QueryBuilder::select(["files"]).from(
        Root::new("Folder")
            .filter(Filter::equals("name", "F1"))
            .then(
                PathSpec::new([Follow::new()
                    .association("Contains")
                    .forward()
                    .destination_class("Folder")])
                .gather_with_parent_then(
                    Follow::new()
                        .association("Contains")
                        .destination_class("File")
                        .alias("files"),
                ),
            ),
    );
    assert_eq!(tree.run(query), set(&["f1.txt", "f2.txt"]));
}

#[test]
fn chained_recursions_feed_each_other() {
    let tree = tree(&[("F3", "X")]);
    let subfolders = || {
        Follow::new()
            .association("Contains")
            .forward()
            .destination_class("Folder")
    };
    let query = |alias: &str| {
        QueryBuilder::select([alias]).from(
            Root::new("Folder")
                .filter(Filter::equals("name", "F1"))
                .then(
                    Recurse::new(subfolders().alias("first"))
                        .then(Recurse::new(subfolders().alias("second"))),
                ),
        )
    };
    assert_eq!(tree.run(query("first")), set(&["F2", "F3", "X"]));
    assert_eq!(tree.run(query("second")), set(&["F3", "X"]));
}
