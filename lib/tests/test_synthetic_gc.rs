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
use mgt_lib::mem_store::MemoryStore;
use mgt_lib::object_id::CommitId;
use mgt_lib::store::ObjectStore;
use mgt_lib::synthetic_gc;
use pollster::FutureExt as _;
use pretty_assertions::assert_eq;
use testutils::file_change;
use testutils::make_opener;
use testutils::path;
use testutils::sub_change;
use testutils::TestRepo;

const SUB_URL: &str = "https://example.com/s.git";

fn synthetic_ref(sha: &CommitId) -> String {
    format!("{}{}", synthetic_gc::SYNTHETIC_REF_PREFIX, sha.hex())
}

/// Sub with C1 <- C2, both carrying synthetic refs; master points at C2.
fn sub_with_synthetic_refs() -> (Arc<MemoryStore>, CommitId, CommitId) {
    let mut sub = TestRepo::new();
    let c1 = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("1") },
        "c1",
    );
    let c2 = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("2") },
        "c2",
    );
    sub.set_ref(&synthetic_ref(&c1), &c1);
    sub.set_ref(&synthetic_ref(&c2), &c2);
    (sub.store(), c1, c2)
}

fn meta_pinning(pin: &CommitId) -> Arc<dyn ObjectStore> {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("s") => sub_change(SUB_URL, Some(pin)) },
        "pin sub",
    );
    meta.store()
}

fn default_roots(
    store: &Arc<dyn ObjectStore>,
) -> BTreeMap<mgt_lib::repo_path::RepoPathBuf, BTreeSet<CommitId>> {
    let refs: Vec<String> = synthetic_gc::DEFAULT_ROOT_REFS
        .iter()
        .map(|name| name.to_string())
        .collect();
    synthetic_gc::populate_roots(store, &refs).block_on().unwrap()
}

#[test]
fn test_populate_roots_walks_full_history() {
    let (sub_store, c1, c2) = sub_with_synthetic_refs();
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("s") => sub_change(SUB_URL, Some(&c1)) },
        "pin c1",
    );
    meta.commit_on(
        "master",
        btreemap! { path("s") => sub_change(SUB_URL, Some(&c2)) },
        "pin c2",
    );
    let store: Arc<dyn ObjectStore> = meta.store();
    drop(sub_store);

    let roots = default_roots(&store);
    // Both pins are persistent: the older one is still referenced by kept
    // meta history.
    assert_eq!(roots[&path("s")], btreeset! { c1, c2 });
}

#[test]
fn test_remove_redundant_keeps_the_persistent_tip() {
    let (sub_store, c1, c2) = sub_with_synthetic_refs();
    let store = meta_pinning(&c2);
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &BTreeSet::new());

    let roots = default_roots(&store);
    assert_eq!(roots[&path("s")], btreeset! { c2.clone() });

    let actions = synthetic_gc::remove_redundant(&opener, &roots, &|_| true, false)
        .block_on()
        .unwrap();
    assert_eq!(
        actions,
        vec![synthetic_gc::GcAction {
            sub_path: path("s"),
            sha: c1.clone(),
        }]
    );
    // C1's ref is gone, C2's remains, and C1 stays reachable through C2.
    let remaining = synthetic_gc::enumerate_synthetic_refs(sub_store.as_ref())
        .block_on()
        .unwrap();
    assert_eq!(remaining, btreeset! { c2.clone() });
    assert!(sub_store.is_ancestor(&c1, &c2).block_on().unwrap());
}

#[test]
fn test_remove_redundant_spares_persistent_ancestors() {
    let (sub_store, c1, c2) = sub_with_synthetic_refs();
    // Meta history pins C1 first, then C2: both are persistent.
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("s") => sub_change(SUB_URL, Some(&c1)) },
        "pin c1",
    );
    meta.commit_on(
        "master",
        btreemap! { path("s") => sub_change(SUB_URL, Some(&c2)) },
        "pin c2",
    );
    let store: Arc<dyn ObjectStore> = meta.store();
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &BTreeSet::new());

    let roots = default_roots(&store);
    let actions = synthetic_gc::remove_redundant(&opener, &roots, &|_| true, false)
        .block_on()
        .unwrap();
    assert!(actions.is_empty());
    let remaining = synthetic_gc::enumerate_synthetic_refs(sub_store.as_ref())
        .block_on()
        .unwrap();
    assert_eq!(remaining, btreeset! { c1, c2 });
}

#[test]
fn test_simulation_mode_removes_nothing() {
    let (sub_store, c1, c2) = sub_with_synthetic_refs();
    let store = meta_pinning(&c2);
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &BTreeSet::new());

    let roots = default_roots(&store);
    let actions = synthetic_gc::remove_redundant(&opener, &roots, &|_| true, true)
        .block_on()
        .unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].sha, c1);

    let remaining = synthetic_gc::enumerate_synthetic_refs(sub_store.as_ref())
        .block_on()
        .unwrap();
    assert_eq!(remaining, btreeset! { c1, c2 });
}

#[test]
fn test_remove_redundant_honors_predicate() {
    let (sub_store, c1, c2) = sub_with_synthetic_refs();
    let store = meta_pinning(&c2);
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &BTreeSet::new());

    let roots = default_roots(&store);
    let keep_everything = |_: &CommitId| false;
    let actions = synthetic_gc::remove_redundant(&opener, &roots, &keep_everything, false)
        .block_on()
        .unwrap();
    assert!(actions.is_empty());
    let remaining = synthetic_gc::enumerate_synthetic_refs(sub_store.as_ref())
        .block_on()
        .unwrap();
    assert_eq!(remaining, btreeset! { c1, c2 });
}

#[test]
fn test_remove_old_spares_persistent_and_young_refs() {
    let mut sub = TestRepo::new();
    let c1 = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("1") },
        "c1",
    );
    // A dangling commit only a synthetic ref keeps alive.
    let dangling = sub.commit(
        &[&c1],
        btreemap! { path("b.txt") => file_change("wip") },
        "abandoned work",
    );
    sub.set_ref(&synthetic_ref(&c1), &c1);
    sub.set_ref(&synthetic_ref(&dangling), &dangling);
    let sub_store = sub.store();

    let store = meta_pinning(&c1);
    let subs = btreemap! { path("s") => sub_store.clone() };
    let opener = make_opener(&subs, &BTreeSet::new());
    let roots = default_roots(&store);

    // Nothing is old: nothing is removed.
    let actions = synthetic_gc::remove_old(&opener, &roots, &|_| false, false)
        .block_on()
        .unwrap();
    assert!(actions.is_empty());

    // Everything is old: only the non-persistent ref goes.
    let actions = synthetic_gc::remove_old(&opener, &roots, &|_| true, false)
        .block_on()
        .unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].sha, dangling);
    let remaining = synthetic_gc::enumerate_synthetic_refs(sub_store.as_ref())
        .block_on()
        .unwrap();
    assert_eq!(remaining, btreeset! { c1 });
}
