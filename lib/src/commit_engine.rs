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

//! Multi-repo commit production.
//!
//! Sub-repo commits are always written before the meta-repo commit that pins
//! them; the meta tree is a deterministic function of the resulting sub-sha
//! set, so concurrent sub commits compose reproducibly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::accumulate_changes;
use crate::backend::merge_changes;
use crate::backend::Change;
use crate::backend::Commit;
use crate::backend::CommitMetaData;
use crate::backend::Signature;
use crate::backend::SubmoduleDef;
use crate::backend::TreeValue;
use crate::error::Error;
use crate::error::Result;
use crate::object_id::CommitId;
use crate::opener::Opener;
use crate::parallel::do_in_parallel;
use crate::parallel::DEFAULT_PARALLELISM;
use crate::repo_ast::WorkdirEntry;
use crate::repo_path::RepoPathBuf;
use crate::status::RepoStatus;
use crate::status::Relation;
use crate::status::SubmoduleStatus;
use crate::store::ObjectStore;
use crate::store::ResetMode;

pub const PATH_COMMIT_INCOMPATIBLE: &str =
    "Cannot use path-based commit on submodules with staged commits or configuration changes.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub meta_commit: Option<CommitId>,
    pub submodule_commits: BTreeMap<RepoPathBuf, CommitId>,
}

/// Whether generating commits would change history.
pub fn should_commit(
    status: &RepoStatus,
    skip_meta: bool,
    sub_messages: Option<&BTreeMap<String, String>>,
) -> bool {
    if !status.staged.is_empty() && !skip_meta {
        return true;
    }
    for (path, sub) in &status.submodules {
        if let Some(wd) = &sub.workdir {
            if wd.relation != Relation::Same && !skip_meta {
                return true;
            }
            let named = sub_messages.map_or(true, |m| m.contains_key(path.as_str()));
            if !wd.status.staged.is_empty() && named {
                return true;
            }
        }
        if !skip_meta && sub_pin_changed(sub) {
            return true;
        }
    }
    false
}

fn sub_pin_changed(sub: &SubmoduleStatus) -> bool {
    match (&sub.commit, &sub.index) {
        (None, _) | (_, None) => true,
        (Some(commit), Some(index)) => commit.sha != index.sha || commit.url != index.url,
    }
}

/// Closed subs whose staged pin or url differs from the committed one.
/// Committing those bypasses whatever is going on inside the sub, so the
/// caller should require explicit opt-in.
pub fn closed_subs_with_pin_changes(status: &RepoStatus) -> Vec<RepoPathBuf> {
    status
        .submodules
        .iter()
        .filter(|(_, sub)| sub.workdir.is_none() && sub_pin_changed(sub))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Produces commits in every sub-repo with staged changes, reflects the new
/// sub shas into the meta index, and (when `message` is given) writes the
/// meta commit. Sub messages alone may produce sub commits with no meta
/// commit.
pub async fn commit(
    store: &Arc<dyn ObjectStore>,
    opener: &Opener,
    all: bool,
    status: &RepoStatus,
    message: Option<&str>,
    sub_messages: Option<&BTreeMap<String, String>>,
    sig: &Signature,
) -> Result<CommitResult> {
    let mut result = CommitResult::default();

    let mut jobs: Vec<(RepoPathBuf, String)> = Vec::new();
    for (path, sub) in &status.submodules {
        let Some(wd) = &sub.workdir else { continue };
        let dirty = !wd.status.staged.is_empty() || (all && !wd.status.workdir.is_empty());
        if !dirty {
            continue;
        }
        let sub_message = match sub_messages {
            Some(messages) => match messages.get(path.as_str()) {
                Some(message) => message.clone(),
                None => continue,
            },
            None => match message {
                Some(message) => message.to_string(),
                None => continue,
            },
        };
        if sub.is_uncommittable() {
            return Err(Error::user(format!(
                "the submodule {path} has no commits and nothing staged"
            )));
        }
        jobs.push((path.clone(), sub_message));
    }

    let sub_commits = do_in_parallel(jobs, DEFAULT_PARALLELISM, |(path, sub_message)| {
        async move {
            let handle = opener.open(&path).ok_or_else(|| {
                Error::Internal(format!("submodule {path} vanished while committing"))
            })?;
            let id = commit_in_repo(handle.as_ref(), all, &sub_message, sig).await?;
            Ok::<_, Error>(id.map(|id| (path, id)))
        }
    })
    .await?;
    result
        .submodule_commits
        .extend(sub_commits.into_iter().flatten());

    // Reflect every open sub's HEAD into the meta index so workdir sub-shas
    // land in the commit.
    let head_tree = match store.head().await? {
        Some(head) => store.tree_of(&head).await?,
        None => BTreeMap::new(),
    };
    for (path, sub) in &status.submodules {
        let Some(handle) = opener.open(path) else { continue };
        let Some(sub_head) = handle.head().await? else { continue };
        let url = sub
            .index
            .as_ref()
            .map(|i| i.url.clone())
            .or_else(|| sub.commit.as_ref().map(|c| c.url.clone()))
            .unwrap_or_default();
        let new_def = SubmoduleDef {
            url,
            commit: Some(sub_head.clone()),
        };
        if head_tree.get(path) == Some(&TreeValue::Submodule(new_def.clone())) {
            store.set_staged(path, None).await?;
        } else {
            store.set_staged(path, Some(Change::Sub(new_def))).await?;
        }
    }

    if let Some(message) = message {
        result.meta_commit = commit_in_repo(store.as_ref(), all, message, sig).await?;
    }
    Ok(result)
}

/// Stages tracked workdir changes when `all`, then commits the index overlay
/// onto HEAD. Returns `None` when there is nothing staged.
async fn commit_in_repo(
    store: &dyn ObjectStore,
    all: bool,
    message: &str,
    sig: &Signature,
) -> Result<Option<CommitId>> {
    if all {
        stage_tracked_workdir_changes(store).await?;
    }
    let index = store.index().await?;
    if !index.conflicts.is_empty() {
        return Err(Error::Conflict(
            "cannot commit with unresolved conflicts in the index".to_string(),
        ));
    }
    if index.staged.is_empty() {
        return Ok(None);
    }
    let head = store.head().await?;
    let commit = Commit {
        parents: head.into_iter().collect(),
        changes: index.staged.clone(),
        message: message.to_string(),
        author: sig.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(commit).await?;
    store.advance_head(&id).await?;
    for path in index.staged.keys() {
        store.set_staged(path, None).await?;
    }
    Ok(Some(id))
}

/// Stages every modified or deleted tracked file from the workdir overlay.
/// Untracked files are left alone.
async fn stage_tracked_workdir_changes(store: &dyn ObjectStore) -> Result<()> {
    let head_tree = match store.head().await? {
        Some(head) => store.tree_of(&head).await?,
        None => BTreeMap::new(),
    };
    let index = store.index().await?;
    let index_tree = accumulate_changes(&head_tree, &index.staged);
    for (path, entry) in store.workdir().await? {
        let tracked = matches!(index_tree.get(&path), Some(TreeValue::File(_)));
        if !tracked {
            continue;
        }
        let change = match entry {
            WorkdirEntry::File(file) => Change::File(file),
            WorkdirEntry::Removed => Change::Removed,
        };
        if head_tree.get(&path) == change.to_tree_value().as_ref() {
            store.set_staged(&path, None).await?;
        } else {
            store.set_staged(&path, Some(change)).await?;
        }
        store.set_workdir(&path, None).await?;
    }
    Ok(())
}

/// Whether path-restricted commits must be refused: any sub with a url
/// change, an addition or removal, or staged commits atop new commits.
pub fn are_submodules_incompatible_with_path_commits(status: &RepoStatus) -> bool {
    status.submodules.values().any(sub_pin_changed)
}

/// Commits the current content of the named paths, leaving everything else
/// staged as it was.
pub async fn commit_paths(
    store: &Arc<dyn ObjectStore>,
    opener: &Opener,
    status: &RepoStatus,
    message: &str,
    paths: &[RepoPathBuf],
    sig: &Signature,
) -> Result<CommitResult> {
    if are_submodules_incompatible_with_path_commits(status) {
        return Err(Error::user(PATH_COMMIT_INCOMPATIBLE));
    }
    let mut result = CommitResult::default();

    for (sub_path, sub) in &status.submodules {
        if sub.workdir.is_none() {
            continue;
        }
        let inner_paths: Vec<RepoPathBuf> = paths
            .iter()
            .filter_map(|path| path.strip_prefix(sub_path))
            .collect();
        if inner_paths.is_empty() {
            continue;
        }
        let handle = opener.open(sub_path).ok_or_else(|| {
            Error::Internal(format!("submodule {sub_path} vanished while committing"))
        })?;
        if let Some(id) = commit_paths_in_repo(handle.as_ref(), &inner_paths, message, sig).await? {
            result.submodule_commits.insert(sub_path.clone(), id);
        }
    }

    // Pin the fresh sub commits, then commit the named meta paths with the
    // same tree-building rule.
    for (sub_path, id) in &result.submodule_commits {
        let url = status.submodules[sub_path]
            .index
            .as_ref()
            .map(|i| i.url.clone())
            .unwrap_or_default();
        store
            .set_staged(
                sub_path,
                Some(Change::Sub(SubmoduleDef {
                    url,
                    commit: Some(id.clone()),
                })),
            )
            .await?;
    }
    let meta_paths: Vec<RepoPathBuf> = paths
        .iter()
        .filter(|path| {
            !status
                .submodules
                .keys()
                .any(|sub_path| path.starts_with(sub_path))
        })
        .cloned()
        .chain(result.submodule_commits.keys().cloned())
        .collect();
    result.meta_commit = commit_paths_in_repo(store.as_ref(), &meta_paths, message, sig).await?;
    Ok(result)
}

/// Builds a commit from the current content of the named paths: non-removed
/// files are taken from the working tree, removed files are dropped, and all
/// other entries are preserved. The index is then detached from the
/// committed paths.
async fn commit_paths_in_repo(
    store: &dyn ObjectStore,
    paths: &[RepoPathBuf],
    message: &str,
    sig: &Signature,
) -> Result<Option<CommitId>> {
    let head = store.head().await?;
    let head_tree = match &head {
        Some(head) => store.tree_of(head).await?,
        None => BTreeMap::new(),
    };
    let index = store.index().await?;
    let index_tree = accumulate_changes(&head_tree, &index.staged);
    let workdir = store.workdir().await?;

    let mut changes: BTreeMap<RepoPathBuf, Change> = BTreeMap::new();
    for path in paths {
        let staged_value = index.staged.get(path).cloned();
        let change = match workdir.get(path) {
            Some(WorkdirEntry::File(file)) => Change::File(file.clone()),
            Some(WorkdirEntry::Removed) => Change::Removed,
            None => match staged_value {
                Some(change) => change,
                None => match index_tree.get(path) {
                    Some(TreeValue::File(file)) => Change::File(file.clone()),
                    _ => continue,
                },
            },
        };
        changes.insert(path.clone(), change);
    }
    let changes = normalize_changes(changes, &head_tree);
    if changes.is_empty() {
        return Ok(None);
    }

    let commit = Commit {
        parents: head.into_iter().collect(),
        changes: changes.clone(),
        message: message.to_string(),
        author: sig.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(commit).await?;
    store.advance_head(&id).await?;
    // Soft-detach the committed paths from the index and drop workdir
    // overrides they now satisfy.
    for path in changes.keys() {
        store.set_staged(path, None).await?;
        store.set_workdir(path, None).await?;
    }
    Ok(Some(id))
}

/// Drops entries that would be no-ops against `base` and deletions of paths
/// `base` does not contain.
fn normalize_changes(
    changes: BTreeMap<RepoPathBuf, Change>,
    base: &BTreeMap<RepoPathBuf, TreeValue>,
) -> BTreeMap<RepoPathBuf, Change> {
    changes
        .into_iter()
        .filter(|(path, change)| match change {
            Change::Removed => base.contains_key(path),
            other => base.get(path) != other.to_tree_value().as_ref(),
        })
        .collect()
}

/// How one sub-repo participates in an amend of the most recent commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubAmendKind {
    /// The sub's HEAD commit is rewritten.
    Amend,
    /// The sub receives a fresh commit.
    Commit,
    /// No commit is produced for the sub.
    None,
}

#[derive(Clone, Debug)]
pub struct AmendStatus {
    pub meta_data: CommitMetaData,
    pub subs: BTreeMap<RepoPathBuf, (SubAmendKind, Option<CommitMetaData>)>,
}

/// Classifies every sub for an amend: a sub is amended (rather than freshly
/// committed) iff it existed in the prior meta commit, its sha changed in
/// HEAD, and its index and (if open) workdir relations are SAME.
pub async fn amend_status(
    store: &Arc<dyn ObjectStore>,
    opener: &Opener,
    status: &RepoStatus,
    all: bool,
) -> Result<AmendStatus> {
    let head = store
        .head()
        .await?
        .ok_or_else(|| Error::user("cannot amend: the repository has no commits"))?;
    let head_commit = store.read_commit(&head).await?;
    let parent_tree = match head_commit.left_parent() {
        Some(parent) => store.tree_of(parent).await?,
        None => BTreeMap::new(),
    };
    let head_tree = store.tree_of(&head).await?;

    let mut subs = BTreeMap::new();
    for (path, sub) in &status.submodules {
        let old_pin = match parent_tree.get(path) {
            Some(TreeValue::Submodule(def)) => Some(def.commit.clone()),
            _ => None,
        };
        let new_pin = match head_tree.get(path) {
            Some(TreeValue::Submodule(def)) => def.commit.clone(),
            _ => None,
        };
        let relations_same = sub
            .index
            .as_ref()
            .is_some_and(|i| i.relation == Relation::Same)
            && sub
                .workdir
                .as_ref()
                .map_or(true, |wd| wd.relation == Relation::Same);
        let amendable = old_pin.is_some() && old_pin.as_ref() != Some(&new_pin) && relations_same;
        let kind = if amendable {
            SubAmendKind::Amend
        } else if sub.workdir.as_ref().is_some_and(|wd| {
            !wd.status.staged.is_empty() || (all && !wd.status.workdir.is_empty())
        }) {
            SubAmendKind::Commit
        } else {
            SubAmendKind::None
        };
        let meta_data = match (&kind, opener.open(path)) {
            (SubAmendKind::Amend, Some(handle)) => {
                let sub_head = handle.head().await?.ok_or_else(|| {
                    Error::Integrity(format!("submodule {path} is open but has no HEAD"))
                })?;
                Some(handle.read_commit(&sub_head).await?.meta_data())
            }
            _ => None,
        };
        subs.insert(path.clone(), (kind, meta_data));
    }

    Ok(AmendStatus {
        meta_data: head_commit.meta_data(),
        subs,
    })
}

/// Amends the most recent commit of the meta-repo and of every amendable
/// sub. `sub_messages` overrides per-sub messages (interactive mode);
/// without it, every amendable sub's metadata must match the meta's.
pub async fn amend(
    store: &Arc<dyn ObjectStore>,
    opener: &Opener,
    all: bool,
    status: &RepoStatus,
    message: Option<&str>,
    sub_messages: Option<&BTreeMap<String, String>>,
    sig: &Signature,
) -> Result<CommitResult> {
    let plan = amend_status(store, opener, status, all).await?;
    if sub_messages.is_none() {
        for (path, (kind, meta_data)) in &plan.subs {
            if *kind == SubAmendKind::Amend
                && meta_data.as_ref() != Some(&plan.meta_data)
            {
                return Err(Error::user(format!(
                    "the last commit in {path} does not match the meta-repo commit; \
                     amend interactively to provide per-repository messages"
                )));
            }
        }
    }

    let mut result = CommitResult::default();
    let head = store.head().await?.expect("amend_status checked for HEAD");
    let head_commit = store.read_commit(&head).await?;
    let parent_tree = match head_commit.left_parent() {
        Some(parent) => store.tree_of(parent).await?,
        None => BTreeMap::new(),
    };

    let mut pin_updates: BTreeMap<RepoPathBuf, Option<CommitId>> = BTreeMap::new();
    for (path, (kind, _)) in &plan.subs {
        match kind {
            SubAmendKind::Amend => {
                let handle = opener.open(path).ok_or_else(|| {
                    Error::Internal(format!("amendable submodule {path} is not open"))
                })?;
                let sub_message = sub_messages
                    .and_then(|m| m.get(path.as_str()).cloned())
                    .or_else(|| message.map(str::to_string));
                match amend_in_repo(handle.as_ref(), all, sub_message.as_deref(), sig).await? {
                    Some(id) => {
                        result.submodule_commits.insert(path.clone(), id.clone());
                        pin_updates.insert(path.clone(), Some(id));
                    }
                    // Nothing left staged: the sub commit was stripped.
                    None => {
                        let new_head = handle.head().await?;
                        pin_updates.insert(path.clone(), new_head);
                    }
                }
            }
            SubAmendKind::Commit => {
                let handle = opener.open(path).ok_or_else(|| {
                    Error::Internal(format!("submodule {path} vanished while committing"))
                })?;
                let sub_message = sub_messages
                    .and_then(|m| m.get(path.as_str()).cloned())
                    .or_else(|| message.map(str::to_string))
                    .unwrap_or_else(|| head_commit.message.clone());
                if let Some(id) = commit_in_repo(handle.as_ref(), all, &sub_message, sig).await? {
                    result.submodule_commits.insert(path.clone(), id.clone());
                    pin_updates.insert(path.clone(), Some(id));
                }
            }
            SubAmendKind::None => {}
        }
    }

    // Build the amended meta commit: HEAD's changes folded with the staged
    // overlay, the workdir when `all`, and the new sub pins.
    if all {
        stage_tracked_workdir_changes(store.as_ref()).await?;
    }
    let index = store.index().await?;
    if !index.conflicts.is_empty() {
        return Err(Error::Conflict(
            "cannot amend with unresolved conflicts in the index".to_string(),
        ));
    }
    let mut changes = merge_changes(&head_commit.changes, &index.staged);
    let head_tree = store.tree_of(&head).await?;
    for (path, pin) in &pin_updates {
        let url = match head_tree.get(path) {
            Some(TreeValue::Submodule(def)) => def.url.clone(),
            _ => String::new(),
        };
        changes.insert(
            path.clone(),
            Change::Sub(SubmoduleDef {
                url,
                commit: pin.clone(),
            }),
        );
    }
    let changes = normalize_changes(changes, &parent_tree);

    let amended = Commit {
        parents: head_commit.parents.clone(),
        changes,
        message: message.unwrap_or(&head_commit.message).to_string(),
        author: head_commit.author.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(amended).await?;
    store.reset(&id, ResetMode::Mixed).await?;
    result.meta_commit = Some(id);
    Ok(result)
}

/// Rewrites the HEAD commit of one repository. Returns `None` (and resets
/// HEAD onto its parent) when nothing would remain in the amended commit.
async fn amend_in_repo(
    store: &dyn ObjectStore,
    all: bool,
    message: Option<&str>,
    sig: &Signature,
) -> Result<Option<CommitId>> {
    let head = store
        .head()
        .await?
        .ok_or_else(|| Error::user("cannot amend: the repository has no commits"))?;
    let head_commit = store.read_commit(&head).await?;
    let parent_tree = match head_commit.left_parent() {
        Some(parent) => store.tree_of(parent).await?,
        None => BTreeMap::new(),
    };

    if all {
        stage_tracked_workdir_changes(store).await?;
    }
    let index = store.index().await?;
    if !index.conflicts.is_empty() {
        return Err(Error::Conflict(
            "cannot amend with unresolved conflicts in the index".to_string(),
        ));
    }
    let changes = normalize_changes(
        merge_changes(&head_commit.changes, &index.staged),
        &parent_tree,
    );

    if changes.is_empty() {
        // After accounting for unstaged changes nothing is left: strip the
        // commit entirely.
        match head_commit.left_parent() {
            Some(parent) => store.reset(parent, ResetMode::Mixed).await?,
            None => return Err(Error::user("cannot strip the only commit in a repository")),
        }
        return Ok(None);
    }

    let amended = Commit {
        parents: head_commit.parents.clone(),
        changes,
        message: message.unwrap_or(&head_commit.message).to_string(),
        author: head_commit.author.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(amended).await?;
    store.reset(&id, ResetMode::Mixed).await?;
    Ok(Some(id))
}
