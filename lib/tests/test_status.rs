// Copyright 2024 The Mgt Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use maplit::btreemap;
use maplit::btreeset;
use mgt_lib::backend::Change;
use mgt_lib::backend::FileContent;
use mgt_lib::mem_store::MemoryStore;
use mgt_lib::object_id::CommitId;
use mgt_lib::opener::Opener;
use mgt_lib::repo_ast::WorkdirEntry;
use mgt_lib::repo_path::RepoPathBuf;
use mgt_lib::status;
use mgt_lib::status::FileStatus;
use mgt_lib::status::Relation;
use mgt_lib::status::StatusOptions;
use mgt_lib::store::ObjectStore;
use pollster::FutureExt as _;
use pretty_assertions::assert_eq;
use testutils::file_change;
use testutils::make_opener;
use testutils::path;
use testutils::sub_change;
use testutils::TestRepo;

const SUB_URL: &str = "https://example.com/s.git";

fn sub_with_two_commits() -> (Arc<MemoryStore>, CommitId, CommitId) {
    let mut repo = TestRepo::new();
    let c1 = repo.commit_on(
        "master",
        btreemap! { path("README.md") => file_change("one") },
        "c1",
    );
    let c2 = repo.commit_on(
        "master",
        btreemap! { path("README.md") => file_change("two") },
        "c2",
    );
    (repo.store(), c1, c2)
}

fn meta_with_sub(pin: &CommitId, open: bool) -> TestRepo {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! {
            path("root.txt") => file_change("root"),
            path("s") => sub_change(SUB_URL, Some(pin)),
        },
        "init",
    );
    if open {
        meta.ast.open_submodules.insert(path("s"));
    }
    meta
}

fn empty_opener() -> Opener {
    make_opener(&BTreeMap::new(), &BTreeSet::new())
}

#[test]
fn test_status_is_pure() {
    let (sub_store, c1, _c2) = sub_with_two_commits();
    let meta = meta_with_sub(&c1, true);
    let store: Arc<dyn ObjectStore> = meta.store();
    let subs = btreemap! { path("s") => sub_store };
    let opener = make_opener(&subs, &btreeset! { path("s") });

    let before_meta = store.head().block_on().unwrap();
    let first = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    let second = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(store.head().block_on().unwrap(), before_meta);
    assert!(store.index().block_on().unwrap().is_clean());
}

#[test]
fn test_staged_and_workdir_classification() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! {
            path("kept.txt") => file_change("kept"),
            path("gone.txt") => file_change("gone"),
        },
        "init",
    );
    meta.ast
        .index
        .staged
        .insert(path("new.txt"), file_change("new"));
    meta.ast.index.staged.insert(path("gone.txt"), Change::Removed);
    meta.ast.workdir.insert(
        path("kept.txt"),
        WorkdirEntry::File(FileContent::text("edited")),
    );
    let store: Arc<dyn ObjectStore> = meta.store();

    let repo_status = status::repo_status(&store, &empty_opener(), &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(repo_status.staged[&path("new.txt")], FileStatus::Added);
    assert_eq!(repo_status.staged[&path("gone.txt")], FileStatus::Removed);
    assert_eq!(repo_status.workdir[&path("kept.txt")], FileStatus::Modified);

    // With show_meta_changes off the staged section disappears.
    let options = StatusOptions {
        show_meta_changes: false,
        ..Default::default()
    };
    let repo_status = status::repo_status(&store, &empty_opener(), &options)
        .block_on()
        .unwrap();
    assert!(repo_status.staged.is_empty());
}

#[test]
fn test_untracked_directory_rollup() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("src/main.rs") => file_change("fn main() {}") },
        "init",
    );
    meta.ast.workdir.insert(
        path("vendor/a/one.txt"),
        WorkdirEntry::File(FileContent::text("1")),
    );
    meta.ast.workdir.insert(
        path("vendor/b/two.txt"),
        WorkdirEntry::File(FileContent::text("2")),
    );
    let store: Arc<dyn ObjectStore> = meta.store();

    let rolled = status::repo_status(&store, &empty_opener(), &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(
        rolled.workdir.keys().cloned().collect::<Vec<_>>(),
        vec![path("vendor")]
    );
    assert!(rolled.untracked_dirs.contains(&path("vendor")));

    let options = StatusOptions {
        show_all_untracked: true,
        ..Default::default()
    };
    let full = status::repo_status(&store, &empty_opener(), &options)
        .block_on()
        .unwrap();
    assert!(full.workdir.contains_key(&path("vendor/a/one.txt")));
    assert!(full.workdir.contains_key(&path("vendor/b/two.txt")));
    assert!(full.untracked_dirs.is_empty());
}

#[test]
fn test_ignore_index_diffs_workdir_against_head() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("committed") },
        "init",
    );
    meta.ast.index.staged.insert(path("a.txt"), file_change("staged"));
    let store: Arc<dyn ObjectStore> = meta.store();

    // The disk carries the staged content: clean against the index, but
    // modified against HEAD once the index is ignored.
    let plain = status::repo_status(&store, &empty_opener(), &StatusOptions::default())
        .block_on()
        .unwrap();
    assert!(plain.workdir.is_empty());

    let options = StatusOptions {
        ignore_index: true,
        ..Default::default()
    };
    let ignoring = status::repo_status(&store, &empty_opener(), &options)
        .block_on()
        .unwrap();
    assert_eq!(ignoring.workdir[&path("a.txt")], FileStatus::Modified);
}

#[test]
fn test_submodule_relations() {
    let (sub_store, c1, c2) = sub_with_two_commits();
    let subs = btreemap! { path("s") => sub_store };

    // Index ahead: committed pin c1, staged pin c2.
    let mut meta = meta_with_sub(&c1, false);
    meta.ast
        .index
        .staged
        .insert(path("s"), sub_change(SUB_URL, Some(&c2)));
    let store: Arc<dyn ObjectStore> = meta.store();
    let opener = make_opener(&subs, &BTreeSet::new());
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    let sub = &repo_status.submodules[&path("s")];
    assert_eq!(sub.index.as_ref().unwrap().relation, Relation::Ahead);
    // Closed sub: no workdir side.
    assert!(sub.workdir.is_none());

    // Behind: committed pin c2, staged pin c1.
    let (sub_store, c1, c2) = sub_with_two_commits();
    let subs = btreemap! { path("s") => sub_store };
    let mut meta = meta_with_sub(&c2, false);
    meta.ast
        .index
        .staged
        .insert(path("s"), sub_change(SUB_URL, Some(&c1)));
    let store: Arc<dyn ObjectStore> = meta.store();
    let opener = make_opener(&subs, &BTreeSet::new());
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(
        repo_status.submodules[&path("s")].index.as_ref().unwrap().relation,
        Relation::Behind
    );

    // Unknown: the sub is not materialized at all.
    let (_, c1, c2) = sub_with_two_commits();
    let mut meta = meta_with_sub(&c1, false);
    meta.ast
        .index
        .staged
        .insert(path("s"), sub_change(SUB_URL, Some(&c2)));
    let store: Arc<dyn ObjectStore> = meta.store();
    let repo_status = status::repo_status(&store, &empty_opener(), &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(
        repo_status.submodules[&path("s")].index.as_ref().unwrap().relation,
        Relation::Unknown
    );
}

#[test]
fn test_open_sub_workdir_relation_and_rollup() {
    let (sub_store, c1, _c2) = sub_with_two_commits();
    // Sub HEAD is at c2 while the meta pins c1: the workdir is ahead.
    let meta = meta_with_sub(&c1, true);
    let store: Arc<dyn ObjectStore> = meta.store();
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &btreeset! { path("s") });

    // Give the sub a workdir edit too.
    sub_store
        .set_workdir(
            &path("README.md"),
            Some(WorkdirEntry::File(FileContent::text("local edit"))),
        )
        .block_on()
        .unwrap();

    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    let sub = &repo_status.submodules[&path("s")];
    let wd = sub.workdir.as_ref().unwrap();
    assert_eq!(wd.relation, Relation::Ahead);
    assert_eq!(wd.status.workdir[&path("README.md")], FileStatus::Modified);

    // Rollup: the workdir descriptor set is the disjoint union of top-level
    // changes and sub changes under the sub prefix.
    let all_paths = repo_status.all_workdir_paths();
    assert!(all_paths.contains(&path("s/README.md")));
    assert!(repo_status.workdir.is_empty());
    assert!(!status::is_deep_clean(&repo_status, false));
}

#[test]
fn test_path_filter_restricts_files_and_subs() {
    let (sub_store, c1, _c2) = sub_with_two_commits();
    let mut meta = meta_with_sub(&c1, true);
    meta.ast
        .index
        .staged
        .insert(path("other.txt"), file_change("x"));
    let store: Arc<dyn ObjectStore> = meta.store();
    let subs = btreemap! { path("s") => sub_store };
    let opener = make_opener(&subs, &btreeset! { path("s") });

    let options = StatusOptions {
        paths: vec![path("s")],
        ..Default::default()
    };
    let repo_status = status::repo_status(&store, &opener, &options)
        .block_on()
        .unwrap();
    assert!(repo_status.staged.is_empty());
    assert!(repo_status.submodules.contains_key(&path("s")));

    let options = StatusOptions {
        paths: vec![path("other.txt")],
        ..Default::default()
    };
    let repo_status = status::repo_status(&store, &opener, &options)
        .block_on()
        .unwrap();
    assert!(repo_status.staged.contains_key(&path("other.txt")));
    assert!(repo_status.submodules.is_empty());
}

#[test]
fn test_deep_clean_requires_same_relations() {
    let (sub_store, c1, c2) = sub_with_two_commits();
    let subs = btreemap! { path("s") => sub_store };

    // Pinned at the sub's HEAD: deep clean.
    let meta = meta_with_sub(&c2, true);
    let store: Arc<dyn ObjectStore> = meta.store();
    let opener = make_opener(&subs, &btreeset! { path("s") });
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert!(status::is_deep_clean(&repo_status, true));

    // Pinned behind the sub's HEAD: not deep clean.
    let meta = meta_with_sub(&c1, true);
    let store: Arc<dyn ObjectStore> = meta.store();
    let opener = make_opener(&subs, &btreeset! { path("s") });
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert!(!status::is_deep_clean(&repo_status, false));
}

#[test]
fn test_new_sub_is_uncommittable_until_staged() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("root.txt") => file_change("root") },
        "init",
    );
    meta.ast
        .index
        .staged
        .insert(path("s"), sub_change(SUB_URL, None));
    meta.ast.open_submodules.insert(path("s"));
    let store: Arc<dyn ObjectStore> = meta.store();

    let empty_sub = Arc::new(MemoryStore::new(Default::default()).unwrap());
    let subs = btreemap! { path("s") => empty_sub.clone() };
    let opener = make_opener(&subs, &btreeset! { path("s") });
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    let sub = &repo_status.submodules[&path("s")];
    assert!(sub.commit.is_none());
    assert!(sub.is_uncommittable());
    assert!(sub.is_headless());

    // Staging a path inside the sub makes it committable.
    empty_sub
        .set_staged(&path("hello.txt"), Some(file_change("hi")))
        .block_on()
        .unwrap();
    let opener = make_opener(&subs, &btreeset! { path("s") });
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert!(!repo_status.submodules[&path("s")].is_uncommittable());
}

#[test]
fn test_bare_repo_reports_empty_collections() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("a") },
        "init",
    );
    meta.ast.bare = true;
    let store: Arc<dyn ObjectStore> = meta.store();
    let repo_status = status::repo_status(&store, &empty_opener(), &StatusOptions::default())
        .block_on()
        .unwrap();
    assert!(repo_status.staged.is_empty());
    assert!(repo_status.workdir.is_empty());
    assert!(repo_status.submodules.is_empty());
    assert_eq!(repo_status.current_branch.as_deref(), Some("master"));
}

#[test]
fn test_unrelated_sub_pins_are_reported() {
    let mut sub = TestRepo::new();
    let left = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("left") },
        "left root",
    );
    let right = sub.commit(
        &[],
        btreemap! { path("b.txt") => file_change("right") },
        "right root",
    );
    sub.set_ref("refs/keep/right", &right);
    let sub_store = sub.store();

    let mut meta = meta_with_sub(&left, false);
    meta.ast
        .index
        .staged
        .insert(path("s"), sub_change(SUB_URL, Some(&right)));
    let store: Arc<dyn ObjectStore> = meta.store();
    let subs = btreemap! { path("s") => sub_store };
    let opener = make_opener(&subs, &BTreeSet::new());
    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default())
        .block_on()
        .unwrap();
    assert_eq!(
        repo_status.submodules[&path("s")].index.as_ref().unwrap().relation,
        Relation::Unrelated
    );
}
