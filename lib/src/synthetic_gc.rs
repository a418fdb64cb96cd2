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

//! Garbage collection of synthetic sub-repo references.
//!
//! Synthetic refs (`refs/commits/<sha>`) keep sub commits reachable while
//! meta history pins them, even when no branch in the sub points at them. A
//! ref becomes redundant once its commit is an ancestor of a persistent pin
//! (it stays reachable through the tip's ref), and collectable once meta
//! history no longer pins it at all and it is old enough.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::Commit;
use crate::backend::TreeValue;
use crate::error::Error;
use crate::error::Result;
use crate::object_id::CommitId;
use crate::opener::Opener;
use crate::repo_path::RepoPathBuf;
use crate::store::ObjectStore;

pub const SYNTHETIC_REF_PREFIX: &str = "refs/commits/";

/// Meta refs whose history pins are persistent by default.
pub const DEFAULT_ROOT_REFS: &[&str] = &["refs/heads/master"];

/// One ref removal, performed or simulated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcAction {
    pub sub_path: RepoPathBuf,
    pub sha: CommitId,
}

/// All sub-commit ids named by synthetic refs in one sub-repo.
pub async fn enumerate_synthetic_refs(store: &dyn ObjectStore) -> Result<BTreeSet<CommitId>> {
    Ok(store
        .refs_with_prefix(SYNTHETIC_REF_PREFIX)
        .await?
        .into_values()
        .collect())
}

/// Walks the named meta refs and records, per sub path, every sub sha pinned
/// anywhere in their reachable history. Those pins are persistent: their
/// reachability must survive GC.
pub async fn populate_roots(
    store: &Arc<dyn ObjectStore>,
    root_refs: &[String],
) -> Result<BTreeMap<RepoPathBuf, BTreeSet<CommitId>>> {
    let mut roots: BTreeMap<RepoPathBuf, BTreeSet<CommitId>> = BTreeMap::new();
    let mut seen: BTreeSet<CommitId> = BTreeSet::new();
    for ref_name in root_refs {
        let Some(tip) = resolve_root_ref(store.as_ref(), ref_name).await? else {
            continue;
        };
        let mut queue = VecDeque::from([tip]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for (path, value) in store.tree_of(&id).await? {
                if let TreeValue::Submodule(def) = value {
                    if let Some(pin) = def.commit {
                        roots.entry(path).or_default().insert(pin);
                    }
                }
            }
            queue.extend(store.read_commit(&id).await?.parents);
        }
    }
    Ok(roots)
}

async fn resolve_root_ref(store: &dyn ObjectStore, ref_name: &str) -> Result<Option<CommitId>> {
    if let Some(branch) = ref_name.strip_prefix("refs/heads/") {
        return Ok(store
            .branches()
            .await?
            .get(branch)
            .map(|branch| branch.target.clone()));
    }
    Ok(store
        .refs_with_prefix(ref_name)
        .await?
        .get(ref_name)
        .cloned())
}

/// Removes synthetic refs for commits that are proper ancestors of a
/// persistent pin and satisfy `predicate`; they stay reachable through the
/// tip. A ref naming a persistent pin itself is always kept. With
/// `simulate` (the default mode) nothing is removed and the would-be
/// actions are returned.
pub async fn remove_redundant(
    opener: &Opener,
    roots: &BTreeMap<RepoPathBuf, BTreeSet<CommitId>>,
    predicate: &dyn Fn(&CommitId) -> bool,
    simulate: bool,
) -> Result<Vec<GcAction>> {
    let mut actions = Vec::new();
    for (sub_path, persistent) in roots {
        let Some(handle) = opener.peek(sub_path) else {
            continue;
        };
        let synthetic = enumerate_synthetic_refs(handle.as_ref()).await?;
        let mut removable: BTreeSet<CommitId> = BTreeSet::new();
        for tip in persistent {
            if !handle.has_commit(tip).await? {
                return Err(Error::Integrity(format!(
                    "persistent submodule commit {tip} is missing from {sub_path}"
                )));
            }
            let mut queue: VecDeque<CommitId> =
                handle.read_commit(tip).await?.parents.into();
            let mut seen = BTreeSet::new();
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if synthetic.contains(&id) && !persistent.contains(&id) && predicate(&id) {
                    removable.insert(id.clone());
                }
                queue.extend(handle.read_commit(&id).await?.parents);
            }
        }
        for sha in removable {
            if !simulate {
                handle
                    .delete_ref(&format!("{SYNTHETIC_REF_PREFIX}{}", sha.hex()))
                    .await?;
            }
            actions.push(GcAction {
                sub_path: sub_path.clone(),
                sha,
            });
        }
    }
    Ok(actions)
}

/// Removes synthetic refs that are not persistent at all and whose commits
/// satisfy `is_old`.
pub async fn remove_old(
    opener: &Opener,
    roots: &BTreeMap<RepoPathBuf, BTreeSet<CommitId>>,
    is_old: &dyn Fn(&Commit) -> bool,
    simulate: bool,
) -> Result<Vec<GcAction>> {
    let empty = BTreeSet::new();
    let mut actions = Vec::new();
    for sub_path in opener.visible_paths() {
        let Some(handle) = opener.peek(&sub_path) else {
            continue;
        };
        let persistent = roots.get(&sub_path).unwrap_or(&empty);
        for sha in enumerate_synthetic_refs(handle.as_ref()).await? {
            if persistent.contains(&sha) {
                continue;
            }
            let commit = handle.read_commit(&sha).await?;
            if !is_old(&commit) {
                continue;
            }
            if !simulate {
                handle
                    .delete_ref(&format!("{SYNTHETIC_REF_PREFIX}{}", sha.hex()))
                    .await?;
            }
            actions.push(GcAction {
                sub_path: sub_path.clone(),
                sha,
            });
        }
    }
    Ok(actions)
}
