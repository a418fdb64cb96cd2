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

//! In-memory repository state with invariant validation.
//!
//! [`RepoAst`] is the complete value-level state of one repository: its
//! commit graph, references, index, and working directory overlays. The
//! reference store ([`crate::mem_store::MemoryStore`]) serves and mutates a
//! `RepoAst`; tests build them directly.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::backend::accumulate_changes;
use crate::backend::Branch;
use crate::backend::Change;
use crate::backend::Commit;
use crate::backend::Conflict;
use crate::backend::FileContent;
use crate::backend::Remote;
use crate::backend::SubmoduleDef;
use crate::backend::TreeValue;
use crate::object_id::CommitId;
use crate::repo_path::RepoPathBuf;
use crate::sequencer::SequencerState;

#[derive(Debug, Error)]
#[error("invalid repository state: {0}")]
pub struct InvalidRepoAst(pub String);

/// The staged overlay relative to the HEAD tree, plus unresolved conflicts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub staged: BTreeMap<RepoPathBuf, Change>,
    pub conflicts: BTreeMap<RepoPathBuf, Conflict>,
}

impl Index {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.conflicts.is_empty()
    }
}

/// A working-directory override relative to the index view: a file whose
/// on-disk content differs (or is untracked), or a deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkdirEntry {
    File(FileContent),
    Removed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAst {
    pub commits: BTreeMap<CommitId, Commit>,
    pub branches: BTreeMap<String, Branch>,
    /// Non-branch references (synthetic refs live here).
    pub refs: BTreeMap<String, CommitId>,
    pub head: Option<CommitId>,
    pub current_branch: Option<String>,
    pub remotes: BTreeMap<String, Remote>,
    pub index: Index,
    pub workdir: BTreeMap<RepoPathBuf, WorkdirEntry>,
    /// Notes, keyed by notes ref then annotated commit.
    pub notes: BTreeMap<String, BTreeMap<CommitId, String>>,
    pub open_submodules: BTreeSet<RepoPathBuf>,
    /// Mirror of the persisted sequencer state. Not part of the store
    /// snapshot; the state file is the source of truth.
    #[serde(skip)]
    pub sequencer: Option<SequencerState>,
    pub bare: bool,
    pub sparse: bool,
}

impl RepoAst {
    /// Checks the structural invariants. Called by the store on load and
    /// after test construction; engine mutations are expected to preserve
    /// them.
    pub fn validate(&self) -> Result<(), InvalidRepoAst> {
        let err = |message: String| Err(InvalidRepoAst(message));

        for (id, commit) in &self.commits {
            for parent in &commit.parents {
                if !self.commits.contains_key(parent) {
                    return err(format!("commit {id} has missing parent {parent}"));
                }
            }
            let parent_tree = match commit.left_parent() {
                Some(parent) => self.tree_of(parent)?,
                None => BTreeMap::new(),
            };
            for (path, change) in &commit.changes {
                match change {
                    Change::Removed => {
                        if !parent_tree.contains_key(path) {
                            return err(format!(
                                "commit {id} deletes {path}, which is absent from its left parent"
                            ));
                        }
                    }
                    other => {
                        if parent_tree.get(path) == other.to_tree_value().as_ref() {
                            return err(format!("commit {id} carries a no-op change for {path}"));
                        }
                    }
                }
            }
        }

        for (name, branch) in &self.branches {
            if !self.commits.contains_key(&branch.target) {
                return err(format!("branch {name} targets missing commit"));
            }
        }
        for (name, target) in &self.refs {
            if !self.commits.contains_key(target) {
                return err(format!("ref {name} targets missing commit"));
            }
        }
        for (name, remote) in &self.remotes {
            for target in remote.branches.values() {
                if !self.commits.contains_key(target) {
                    return err(format!("remote {name} references missing commit"));
                }
            }
        }
        if let Some(head) = &self.head {
            if !self.commits.contains_key(head) {
                return err("HEAD targets missing commit".to_string());
            }
        }
        if let Some(name) = &self.current_branch {
            match self.branches.get(name) {
                Some(branch) if Some(&branch.target) == self.head.as_ref() => {}
                Some(_) => return err(format!("HEAD disagrees with current branch {name}")),
                None => return err(format!("current branch {name} does not exist")),
            }
        }

        let reachable = self.reachable_commits();
        if let Some(id) = self.commits.keys().find(|id| !reachable.contains(*id)) {
            return err(format!("commit {id} is unreachable from any reference"));
        }

        if self.bare
            && !(self.index.is_clean() && self.workdir.is_empty() && self.sequencer.is_none())
        {
            return err("bare repository must have empty index, workdir, and sequencer".to_string());
        }

        let index_tree = self.index_tree()?;
        for path in &self.open_submodules {
            match index_tree.get(path) {
                Some(TreeValue::Submodule(_)) => {}
                _ => {
                    return err(format!(
                        "open submodule {path} is not tracked in the index or HEAD tree"
                    ))
                }
            }
        }

        for path in self.index.conflicts.keys() {
            if !matches!(self.workdir.get(path), Some(WorkdirEntry::File(_))) {
                return err(format!("conflicted path {path} has no working-directory value"));
            }
        }

        Ok(())
    }

    fn reachable_commits(&self) -> BTreeSet<CommitId> {
        self.reachable_from(std::iter::empty())
    }

    fn reachable_from(&self, extra_roots: impl IntoIterator<Item = CommitId>) -> BTreeSet<CommitId> {
        let mut queue: VecDeque<CommitId> = VecDeque::new();
        queue.extend(self.branches.values().map(|b| b.target.clone()));
        queue.extend(self.refs.values().cloned());
        queue.extend(self.head.iter().cloned());
        for remote in self.remotes.values() {
            queue.extend(remote.branches.values().cloned());
        }
        // An in-progress sequencer borrows commit ids; they stay alive for
        // the lifetime of the operation.
        if let Some(state) = &self.sequencer {
            queue.push_back(state.original_head.sha.clone());
            queue.push_back(state.target.sha.clone());
            queue.extend(state.commits.iter().cloned());
        }
        queue.extend(extra_roots);
        let mut seen = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Drops commits no reference, HEAD, sequencer id, or extra root keeps
    /// alive. History rewrites (amend, rebase) leave replaced commits
    /// behind; snapshotting prunes them so the stored state stays valid.
    pub fn retain_reachable(&mut self, extra_roots: impl IntoIterator<Item = CommitId>) {
        let keep = self.reachable_from(extra_roots);
        self.commits.retain(|id, _| keep.contains(id));
        for notes in self.notes.values_mut() {
            notes.retain(|id, _| keep.contains(id));
        }
    }

    /// Every sub sha pinned anywhere in this repository's commits or staged
    /// overlay. Those pins keep the corresponding sub commits alive.
    pub fn pinned_sub_commits(&self) -> BTreeMap<RepoPathBuf, BTreeSet<CommitId>> {
        let mut pinned: BTreeMap<RepoPathBuf, BTreeSet<CommitId>> = BTreeMap::new();
        let mut record = |path: &RepoPathBuf, def: &SubmoduleDef| {
            if let Some(pin) = &def.commit {
                pinned.entry(path.clone()).or_default().insert(pin.clone());
            }
        };
        for commit in self.commits.values() {
            for (path, change) in &commit.changes {
                if let Change::Sub(def) = change {
                    record(path, def);
                }
            }
        }
        for (path, change) in &self.index.staged {
            if let Change::Sub(def) = change {
                record(path, def);
            }
        }
        pinned
    }

    /// Materializes the tree of a commit by folding change-maps along the
    /// first-parent chain.
    pub fn tree_of(
        &self,
        id: &CommitId,
    ) -> Result<BTreeMap<RepoPathBuf, TreeValue>, InvalidRepoAst> {
        let mut chain = Vec::new();
        let mut cursor = Some(id.clone());
        while let Some(id) = cursor {
            let commit = self
                .commits
                .get(&id)
                .ok_or_else(|| InvalidRepoAst(format!("missing commit {id}")))?;
            cursor = commit.left_parent().cloned();
            chain.push(commit);
        }
        let mut tree = BTreeMap::new();
        for commit in chain.iter().rev() {
            tree = accumulate_changes(&tree, &commit.changes);
        }
        Ok(tree)
    }

    pub fn head_tree(&self) -> Result<BTreeMap<RepoPathBuf, TreeValue>, InvalidRepoAst> {
        match &self.head {
            Some(head) => self.tree_of(head),
            None => Ok(BTreeMap::new()),
        }
    }

    /// The HEAD tree with the staged overlay applied.
    pub fn index_tree(&self) -> Result<BTreeMap<RepoPathBuf, TreeValue>, InvalidRepoAst> {
        Ok(accumulate_changes(&self.head_tree()?, &self.index.staged))
    }

    /// The file view of the working directory: index files with the workdir
    /// overlay applied. Submodule entries are not part of this view; open
    /// sub workdirs are separate repositories.
    pub fn workdir_files(&self) -> Result<BTreeMap<RepoPathBuf, FileContent>, InvalidRepoAst> {
        let mut files: BTreeMap<RepoPathBuf, FileContent> = self
            .index_tree()?
            .into_iter()
            .filter_map(|(path, value)| match value {
                TreeValue::File(file) => Some((path, file)),
                TreeValue::Submodule(_) => None,
            })
            .collect();
        for (path, entry) in &self.workdir {
            match entry {
                WorkdirEntry::File(file) => {
                    files.insert(path.clone(), file.clone());
                }
                WorkdirEntry::Removed => {
                    files.remove(path);
                }
            }
        }
        Ok(files)
    }

    /// Submodule entries of a resolved tree.
    pub fn submodules_of(
        tree: &BTreeMap<RepoPathBuf, TreeValue>,
    ) -> BTreeMap<RepoPathBuf, SubmoduleDef> {
        tree.iter()
            .filter_map(|(path, value)| match value {
                TreeValue::Submodule(def) => Some((path.clone(), def.clone())),
                TreeValue::File(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;
    use crate::backend::Signature;
    use crate::backend::Timestamp;

    fn sig() -> Signature {
        Signature {
            name: "test".to_string(),
            email: "test@example.com".to_string(),
            timestamp: Timestamp {
                millis_since_epoch: 0,
                tz_offset_minutes: 0,
            },
        }
    }

    fn commit(parents: Vec<CommitId>, changes: BTreeMap<RepoPathBuf, Change>) -> Commit {
        Commit {
            parents,
            changes,
            message: "msg".to_string(),
            author: sig(),
            committer: sig(),
        }
    }

    fn repo_with_one_commit() -> (RepoAst, CommitId) {
        let c = commit(
            vec![],
            btreemap! { RepoPathBuf::from_literal("a") => Change::File(FileContent::text("1")) },
        );
        let id = c.id();
        let ast = RepoAst {
            commits: btreemap! { id.clone() => c },
            branches: btreemap! {
                "master".to_string() => Branch { target: id.clone(), tracking: None },
            },
            head: Some(id.clone()),
            current_branch: Some("master".to_string()),
            ..Default::default()
        };
        (ast, id)
    }

    #[test]
    fn test_validate_accepts_simple_repo() {
        let (ast, _) = repo_with_one_commit();
        ast.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unreachable_commit() {
        let (mut ast, _) = repo_with_one_commit();
        let orphan = commit(
            vec![],
            btreemap! { RepoPathBuf::from_literal("b") => Change::File(FileContent::text("2")) },
        );
        ast.commits.insert(orphan.id(), orphan);
        assert!(ast.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_deletion_of_absent_path() {
        let (mut ast, id) = repo_with_one_commit();
        let bad = commit(
            vec![id],
            btreemap! { RepoPathBuf::from_literal("nope") => Change::Removed },
        );
        let bad_id = bad.id();
        ast.commits.insert(bad_id.clone(), bad);
        ast.head = Some(bad_id.clone());
        ast.branches.get_mut("master").unwrap().target = bad_id;
        assert!(ast.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_detached_current_branch() {
        let (mut ast, _) = repo_with_one_commit();
        ast.head = None;
        assert!(ast.validate().is_err());
    }

    #[test]
    fn test_tree_of_folds_first_parent_chain() {
        let (mut ast, id) = repo_with_one_commit();
        let second = commit(
            vec![id.clone()],
            btreemap! {
                RepoPathBuf::from_literal("a") => Change::Removed,
                RepoPathBuf::from_literal("b") => Change::File(FileContent::text("2")),
            },
        );
        let second_id = second.id();
        ast.commits.insert(second_id.clone(), second);
        ast.head = Some(second_id.clone());
        ast.branches.get_mut("master").unwrap().target = second_id.clone();
        ast.validate().unwrap();

        let tree = ast.tree_of(&second_id).unwrap();
        assert!(!tree.contains_key(&RepoPathBuf::from_literal("a")));
        assert_eq!(
            tree.get(&RepoPathBuf::from_literal("b")),
            Some(&TreeValue::File(FileContent::text("2")))
        );
    }

    #[test]
    fn test_workdir_files_applies_overlay() {
        let (mut ast, _) = repo_with_one_commit();
        ast.workdir.insert(
            RepoPathBuf::from_literal("a"),
            WorkdirEntry::File(FileContent::text("changed")),
        );
        ast.workdir
            .insert(RepoPathBuf::from_literal("untracked"), WorkdirEntry::File(FileContent::text("u")));
        let files = ast.workdir_files().unwrap();
        assert_eq!(
            files.get(&RepoPathBuf::from_literal("a")),
            Some(&FileContent::text("changed"))
        );
        assert!(files.contains_key(&RepoPathBuf::from_literal("untracked")));
    }
}
