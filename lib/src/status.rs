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

//! Status computation across a meta-repo and its open sub-repos.
//!
//! A [`RepoStatus`] is the tri-partite difference committed tree → index →
//! working tree, extended per sub-repo with the commit/index/workdir triple
//! and the ancestry relation between the pinned shas. Statuses are computed
//! on demand and never persisted; computing one does not mutate any repo.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt as _;

use crate::backend::Change;
use crate::backend::SubmoduleDef;
use crate::backend::TreeValue;
use crate::error::Result;
use crate::object_id::CommitId;
use crate::opener::Opener;
use crate::parallel::do_in_parallel;
use crate::parallel::DEFAULT_PARALLELISM;
use crate::repo_ast::RepoAst;
use crate::repo_ast::WorkdirEntry;
use crate::repo_path::RepoPathBuf;
use crate::sequencer::SequencerState;
use crate::store::ObjectStore;

/// Classification of one path in a staged or workdir diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    TypeChanged,
    Conflicted,
}

/// Relation between two commits of the same sub-repo lineage. `Unknown` when
/// the sub is closed or either commit cannot be found, so ancestry cannot be
/// computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Same,
    Ahead,
    Behind,
    Unrelated,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct StatusOptions {
    pub show_meta_changes: bool,
    pub show_all_untracked: bool,
    pub ignore_index: bool,
    pub paths: Vec<RepoPathBuf>,
}

impl Default for StatusOptions {
    fn default() -> Self {
        StatusOptions {
            show_meta_changes: true,
            show_all_untracked: false,
            ignore_index: false,
            paths: vec![],
        }
    }
}

/// The committed side of a sub-repo: the pin recorded in the HEAD tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubCommitRef {
    pub sha: Option<CommitId>,
    pub url: String,
}

/// The staged side of a sub-repo, with its relation to the committed pin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubIndexRef {
    pub sha: Option<CommitId>,
    pub url: String,
    pub relation: Relation,
}

/// The open working copy of a sub-repo, with the relation of its HEAD to the
/// staged pin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubWorkdir {
    pub status: RepoStatus,
    pub relation: Relation,
}

/// Status of one sub-repo. `commit == None` means newly added, `index ==
/// None` means deleted, `workdir == None` means closed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmoduleStatus {
    pub commit: Option<SubCommitRef>,
    pub index: Option<SubIndexRef>,
    pub workdir: Option<SubWorkdir>,
}

impl SubmoduleStatus {
    /// A newly added sub with no commits and nothing staged cannot receive a
    /// commit yet.
    pub fn is_uncommittable(&self) -> bool {
        self.commit.is_none()
            && self.index.as_ref().is_some_and(|i| i.sha.is_none())
            && self
                .workdir
                .as_ref()
                .map_or(true, |wd| wd.status.head.is_none() && wd.status.staged.is_empty())
    }

    /// A sub that is open but whose HEAD is missing.
    pub fn is_headless(&self) -> bool {
        self.workdir.as_ref().is_some_and(|wd| wd.status.head.is_none())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub current_branch: Option<String>,
    pub head: Option<CommitId>,
    pub staged: BTreeMap<RepoPathBuf, FileStatus>,
    pub workdir: BTreeMap<RepoPathBuf, FileStatus>,
    /// Workdir entries that are rolled-up untracked directories rather than
    /// files; always a subset of `workdir`'s keys.
    pub untracked_dirs: BTreeSet<RepoPathBuf>,
    pub submodules: BTreeMap<RepoPathBuf, SubmoduleStatus>,
    pub sequencer: Option<SequencerState>,
    pub sparse: bool,
}

impl RepoStatus {
    pub fn is_clean(&self, all: bool) -> bool {
        self.staged.is_empty() && (!all || self.workdir.is_empty())
    }

    pub fn has_conflicts(&self) -> bool {
        self.staged.values().any(|s| *s == FileStatus::Conflicted)
            || self
                .submodules
                .values()
                .filter_map(|sub| sub.workdir.as_ref())
                .any(|wd| wd.status.has_conflicts())
    }

    /// Paths of all conflicted entries, sub entries prefixed by their sub
    /// path.
    pub fn conflicted_paths(&self) -> Vec<RepoPathBuf> {
        let mut paths: Vec<RepoPathBuf> = self
            .staged
            .iter()
            .filter(|(_, status)| **status == FileStatus::Conflicted)
            .map(|(path, _)| path.clone())
            .collect();
        for (sub_path, sub) in &self.submodules {
            if let Some(wd) = &sub.workdir {
                for inner in wd.status.conflicted_paths() {
                    paths.push(sub_path.concat(&inner));
                }
            }
        }
        paths
    }

    /// The full workdir descriptor set: top-level changes plus per-sub
    /// changes prefixed by the sub path. The two parts are disjoint by
    /// construction since sub paths are never reported as plain files.
    pub fn all_workdir_paths(&self) -> BTreeSet<RepoPathBuf> {
        let mut paths: BTreeSet<RepoPathBuf> = self.workdir.keys().cloned().collect();
        for (sub_path, sub) in &self.submodules {
            if let Some(wd) = &sub.workdir {
                for inner in wd.status.all_workdir_paths() {
                    paths.insert(sub_path.concat(&inner));
                }
            }
        }
        paths
    }
}

/// Deep cleanliness: no staged changes, no workdir changes when `all`, and
/// every sub-repo pinned SAME in the index and (if open) SAME in the workdir
/// with a deep-clean inner status.
pub fn is_deep_clean(status: &RepoStatus, all: bool) -> bool {
    if !status.staged.is_empty() {
        return false;
    }
    if all && !status.workdir.is_empty() {
        return false;
    }
    for sub in status.submodules.values() {
        let Some(index) = &sub.index else {
            // Deleted sub.
            return false;
        };
        if index.relation != Relation::Same || sub.commit.is_none() {
            return false;
        }
        if let Some(wd) = &sub.workdir {
            if wd.relation != Relation::Same || !is_deep_clean(&wd.status, all) {
                return false;
            }
        }
    }
    true
}

/// Relation of `local` to `other`: `Ahead` when `other` is an ancestor of
/// `local`, `Behind` for the converse, `Unknown` when either commit is not
/// present in the store.
pub async fn relation_between(
    store: &dyn ObjectStore,
    local: &CommitId,
    other: &CommitId,
) -> Result<Relation> {
    if local == other {
        return Ok(Relation::Same);
    }
    if !store.has_commit(local).await? || !store.has_commit(other).await? {
        return Ok(Relation::Unknown);
    }
    if store.is_ancestor(other, local).await? {
        return Ok(Relation::Ahead);
    }
    if store.is_ancestor(local, other).await? {
        return Ok(Relation::Behind);
    }
    Ok(Relation::Unrelated)
}

/// Computes the status of a meta-repo and its open sub-repos.
pub async fn repo_status(
    store: &Arc<dyn ObjectStore>,
    opener: &Opener,
    options: &StatusOptions,
) -> Result<RepoStatus> {
    status_inner(store.as_ref(), Some(opener), options).await
}

/// Status of a single repository without sub-repo recursion (used for the
/// inner status of an open sub).
pub async fn plain_repo_status(
    store: &dyn ObjectStore,
    options: &StatusOptions,
) -> Result<RepoStatus> {
    status_inner(store, None, options).await
}

fn status_inner<'a>(
    store: &'a dyn ObjectStore,
    opener: Option<&'a Opener>,
    options: &'a StatusOptions,
) -> BoxFuture<'a, Result<RepoStatus>> {
    async move {
        let head = store.head().await?;
        let mut status = RepoStatus {
            current_branch: store.current_branch().await?,
            head: head.clone(),
            sequencer: store.sequencer_state().await?,
            sparse: store.is_sparse().await?,
            ..Default::default()
        };
        if store.is_bare().await? {
            return Ok(status);
        }

        let head_tree = match &head {
            Some(head) => store.tree_of(head).await?,
            None => BTreeMap::new(),
        };
        let index = store.index().await?;
        let index_tree = crate::backend::accumulate_changes(&head_tree, &index.staged);

        // Staged section: the index overlay classified against the HEAD
        // tree. Sub pins are reported through the submodule section instead.
        if options.show_meta_changes {
            for (path, change) in &index.staged {
                if !path.matches_filters(&options.paths) {
                    continue;
                }
                let old = head_tree.get(path);
                let file_status = match (old, change) {
                    (_, Change::Sub(_)) => continue,
                    (Some(TreeValue::Submodule(_)), _) => continue,
                    (None, _) => FileStatus::Added,
                    (Some(_), Change::Removed) => FileStatus::Removed,
                    (Some(TreeValue::File(_)), Change::File(_)) => FileStatus::Modified,
                };
                status.staged.insert(path.clone(), file_status);
            }
            for path in index.conflicts.keys() {
                if path.matches_filters(&options.paths) {
                    status.staged.insert(path.clone(), FileStatus::Conflicted);
                }
            }
        }

        // Sub paths: union of submodules in the HEAD tree and the index.
        let mut sub_defs: BTreeMap<RepoPathBuf, (Option<SubmoduleDef>, Option<SubmoduleDef>)> =
            BTreeMap::new();
        for (path, def) in RepoAst::submodules_of(&head_tree) {
            sub_defs.entry(path).or_default().0 = Some(def);
        }
        for (path, def) in RepoAst::submodules_of(&index_tree) {
            sub_defs.entry(path).or_default().1 = Some(def);
        }
        sub_defs.retain(|path, _| path.matches_filters(&options.paths));
        let sub_paths: BTreeSet<RepoPathBuf> = sub_defs.keys().cloned().collect();

        // Workdir section: the simulated on-disk files diffed against the
        // index view (or against the HEAD tree when the index is ignored).
        let mut disk_files: BTreeMap<RepoPathBuf, crate::backend::FileContent> = index_tree
            .iter()
            .filter_map(|(path, value)| match value {
                TreeValue::File(file) => Some((path.clone(), file.clone())),
                TreeValue::Submodule(_) => None,
            })
            .collect();
        for (path, entry) in store.workdir().await? {
            match entry {
                WorkdirEntry::File(file) => {
                    disk_files.insert(path, file);
                }
                WorkdirEntry::Removed => {
                    disk_files.remove(&path);
                }
            }
        }
        let base_tree = if options.ignore_index { &head_tree } else { &index_tree };
        let mut tracked_paths: BTreeSet<RepoPathBuf> = index_tree.keys().cloned().collect();
        tracked_paths.extend(head_tree.keys().cloned());
        let mut workdir_paths: BTreeSet<RepoPathBuf> = disk_files.keys().cloned().collect();
        workdir_paths.extend(base_tree.keys().cloned());
        for path in workdir_paths {
            if !path.matches_filters(&options.paths) {
                continue;
            }
            if sub_paths.iter().any(|sub| path.starts_with(sub)) {
                continue;
            }
            let file_status = match (base_tree.get(&path), disk_files.get(&path)) {
                (Some(TreeValue::Submodule(_)), _) => continue,
                (None, None) => continue,
                (None, Some(_)) => FileStatus::Added,
                (Some(_), None) => FileStatus::Removed,
                (Some(TreeValue::File(tracked)), Some(on_disk)) => {
                    if tracked == on_disk {
                        continue;
                    }
                    FileStatus::Modified
                }
            };
            if file_status == FileStatus::Added && !options.show_all_untracked {
                if let Some(dir) = rollup_dir(&path, &tracked_paths) {
                    status.untracked_dirs.insert(dir.clone());
                    status.workdir.insert(dir, FileStatus::Added);
                    continue;
                }
            }
            status.workdir.insert(path.clone(), file_status);
        }

        if let Some(opener) = opener {
            let jobs: Vec<(RepoPathBuf, Option<SubmoduleDef>, Option<SubmoduleDef>)> = sub_defs
                .into_iter()
                .map(|(path, (committed, staged))| (path, committed, staged))
                .collect();
            let results = do_in_parallel(jobs, DEFAULT_PARALLELISM, |(path, committed, staged)| {
                async move {
                    let sub = submodule_status(opener, &path, committed, staged, options).await?;
                    Ok::<_, crate::error::Error>((path, sub))
                }
            })
            .await?;
            status.submodules.extend(results);
        }

        Ok(status)
    }
    .boxed()
}

/// Status of one sub-repo from its committed and staged definitions.
async fn submodule_status(
    opener: &Opener,
    path: &RepoPathBuf,
    committed: Option<SubmoduleDef>,
    staged: Option<SubmoduleDef>,
    options: &StatusOptions,
) -> Result<SubmoduleStatus> {
    let mut sub = SubmoduleStatus {
        commit: committed.as_ref().map(|def| SubCommitRef {
            sha: def.commit.clone(),
            url: def.url.clone(),
        }),
        ..Default::default()
    };

    if let Some(staged) = &staged {
        let relation = match (committed.as_ref().and_then(|d| d.commit.as_ref()), &staged.commit) {
            (Some(old), Some(new)) if old == new => Relation::Same,
            (Some(old), Some(new)) => match opener.peek(path) {
                Some(handle) => relation_between(handle.as_ref(), new, old).await?,
                None => Relation::Unknown,
            },
            _ => Relation::Unknown,
        };
        sub.index = Some(SubIndexRef {
            sha: staged.commit.clone(),
            url: staged.url.clone(),
            relation,
        });
    }

    if let Some(handle) = opener.open(path) {
        let inner_options = StatusOptions {
            show_meta_changes: true,
            show_all_untracked: options.show_all_untracked,
            ignore_index: options.ignore_index,
            paths: options
                .paths
                .iter()
                .filter_map(|filter| filter.strip_prefix(path))
                .collect(),
        };
        let inner = plain_repo_status(handle.as_ref(), &inner_options).await?;
        let relation = match (&inner.head, staged.as_ref().and_then(|d| d.commit.as_ref())) {
            (Some(head), Some(pinned)) => {
                relation_between(handle.as_ref(), head, pinned).await?
            }
            _ => Relation::Unknown,
        };
        sub.workdir = Some(SubWorkdir {
            status: inner,
            relation,
        });
    }

    Ok(sub)
}

/// The shortest ancestor directory of `path` containing no tracked entries,
/// if any; untracked files below it roll up into one `dir/` entry.
fn rollup_dir(path: &RepoPathBuf, tracked: &BTreeSet<RepoPathBuf>) -> Option<RepoPathBuf> {
    let components: Vec<&str> = path.components().collect();
    let mut prefix = String::new();
    for component in &components[..components.len().saturating_sub(1)] {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(component);
        let dir = RepoPathBuf::new(prefix.clone()).ok()?;
        if !tracked.iter().any(|t| t.starts_with(&dir)) {
            return Some(dir);
        }
    }
    None
}
