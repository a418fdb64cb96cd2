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

//! Reference implementation of [`ObjectStore`] over an in-memory
//! [`RepoAst`].
//!
//! The store is safe to call from multiple tasks; a mutex serializes access
//! to the underlying state and is never held across an await point. When a
//! private directory is attached, the sequencer-state slot is backed by a
//! JSON file there, written atomically so an interrupted operation can be
//! resumed from disk.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::Branch;
use crate::backend::Change;
use crate::backend::Commit;
use crate::backend::Conflict;
use crate::backend::FileContent;
use crate::backend::TreeValue;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::object_id::CommitId;
use crate::repo_ast::Index;
use crate::repo_ast::InvalidRepoAst;
use crate::repo_ast::RepoAst;
use crate::repo_ast::WorkdirEntry;
use crate::repo_path::RepoPathBuf;
use crate::sequencer::SequencerState;
use crate::store::MergeOutcome;
use crate::store::ObjectStore;
use crate::store::ResetMode;
use crate::store::StoreError;
use crate::store::StoreResult;

/// File name of the persisted sequencer state inside the private directory.
pub const SEQUENCER_STATE_FILE: &str = "sequencer-state.json";

pub struct MemoryStore {
    ast: Mutex<RepoAst>,
    state_dir: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(ast: RepoAst) -> Result<Self, InvalidRepoAst> {
        ast.validate()?;
        Ok(MemoryStore {
            ast: Mutex::new(ast),
            state_dir: None,
        })
    }

    /// Attaches a private directory. A sequencer-state file found there wins
    /// over whatever the in-memory state carries.
    pub fn with_state_dir(mut ast: RepoAst, state_dir: PathBuf) -> StoreResult<Self> {
        let state_path = state_dir.join(SEQUENCER_STATE_FILE);
        if state_path.exists() {
            let data = fs::read(&state_path).context(&state_path)?;
            let state: SequencerState = serde_json::from_slice(&data)
                .map_err(|err| StoreError::State(err.to_string()))?;
            ast.sequencer = Some(state);
        }
        ast.validate()
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        Ok(MemoryStore {
            ast: Mutex::new(ast),
            state_dir: Some(state_dir),
        })
    }

    /// A copy of the current state, for snapshotting to disk or asserting in
    /// tests.
    pub fn snapshot(&self) -> RepoAst {
        self.ast.lock().unwrap().clone()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, RepoAst> {
        self.ast.lock().unwrap()
    }

    fn tree_err(err: InvalidRepoAst) -> StoreError {
        StoreError::Invalid(err.to_string())
    }

    /// Rebuilds the workdir overlay after the index view changed, keeping
    /// the simulated on-disk content fixed.
    fn rebuild_workdir_overlay(
        ast: &mut RepoAst,
        disk_files: BTreeMap<RepoPathBuf, FileContent>,
    ) -> StoreResult<()> {
        let view = ast.index_tree().map_err(Self::tree_err)?;
        ast.workdir.clear();
        for (path, value) in &view {
            if let TreeValue::File(tracked) = value {
                match disk_files.get(path) {
                    Some(on_disk) if on_disk == tracked => {}
                    Some(on_disk) => {
                        ast.workdir
                            .insert(path.clone(), WorkdirEntry::File(on_disk.clone()));
                    }
                    None => {
                        ast.workdir.insert(path.clone(), WorkdirEntry::Removed);
                    }
                }
            }
        }
        for (path, on_disk) in disk_files {
            if !view.contains_key(&path) {
                ast.workdir.insert(path, WorkdirEntry::File(on_disk));
            }
        }
        Ok(())
    }

    fn move_head(ast: &mut RepoAst, id: &CommitId) {
        if let Some(name) = ast.current_branch.clone() {
            if let Some(branch) = ast.branches.get_mut(&name) {
                branch.target = id.clone();
            }
        }
        ast.head = Some(id.clone());
    }

    fn write_state_file(&self, state: Option<&SequencerState>) -> StoreResult<()> {
        let Some(state_dir) = &self.state_dir else {
            return Ok(());
        };
        let state_path = state_dir.join(SEQUENCER_STATE_FILE);
        match state {
            Some(state) => {
                let data = serde_json::to_vec_pretty(state)
                    .map_err(|err| StoreError::State(err.to_string()))?;
                file_util::write_file_atomic(&state_path, &data)?;
            }
            None => {
                if state_path.exists() {
                    fs::remove_file(&state_path).context(&state_path)?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read_commit(&self, id: &CommitId) -> StoreResult<Commit> {
        self.locked()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound(id.hex()))
    }

    async fn write_commit(&self, commit: Commit) -> StoreResult<CommitId> {
        let mut ast = self.locked();
        let parent_tree = match commit.left_parent() {
            Some(parent) => ast.tree_of(parent).map_err(Self::tree_err)?,
            None => BTreeMap::new(),
        };
        for parent in &commit.parents {
            if !ast.commits.contains_key(parent) {
                return Err(StoreError::ObjectNotFound(parent.hex()));
            }
        }
        for (path, change) in &commit.changes {
            match change {
                Change::Removed => {
                    if !parent_tree.contains_key(path) {
                        return Err(StoreError::Invalid(format!(
                            "deletion of non-existent path {path}"
                        )));
                    }
                }
                other => {
                    if parent_tree.get(path) == other.to_tree_value().as_ref() {
                        return Err(StoreError::Invalid(format!("no-op change for {path}")));
                    }
                }
            }
        }
        let id = commit.id();
        ast.commits.insert(id.clone(), commit);
        Ok(id)
    }

    async fn has_commit(&self, id: &CommitId) -> StoreResult<bool> {
        Ok(self.locked().commits.contains_key(id))
    }

    async fn tree_of(&self, id: &CommitId) -> StoreResult<BTreeMap<RepoPathBuf, TreeValue>> {
        self.locked().tree_of(id).map_err(Self::tree_err)
    }

    async fn head(&self) -> StoreResult<Option<CommitId>> {
        Ok(self.locked().head.clone())
    }

    async fn current_branch(&self) -> StoreResult<Option<String>> {
        Ok(self.locked().current_branch.clone())
    }

    async fn branches(&self) -> StoreResult<BTreeMap<String, Branch>> {
        Ok(self.locked().branches.clone())
    }

    async fn set_branch(&self, name: &str, target: &CommitId) -> StoreResult<()> {
        let mut ast = self.locked();
        if !ast.commits.contains_key(target) {
            return Err(StoreError::ObjectNotFound(target.hex()));
        }
        match ast.branches.get_mut(name) {
            Some(branch) => branch.target = target.clone(),
            None => {
                ast.branches.insert(
                    name.to_string(),
                    Branch {
                        target: target.clone(),
                        tracking: None,
                    },
                );
            }
        }
        if ast.current_branch.as_deref() == Some(name) {
            ast.head = Some(target.clone());
        }
        Ok(())
    }

    async fn refs_with_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, CommitId>> {
        Ok(self
            .locked()
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect())
    }

    async fn set_ref(&self, name: &str, target: &CommitId) -> StoreResult<()> {
        let mut ast = self.locked();
        if !ast.commits.contains_key(target) {
            return Err(StoreError::ObjectNotFound(target.hex()));
        }
        ast.refs.insert(name.to_string(), target.clone());
        Ok(())
    }

    async fn delete_ref(&self, name: &str) -> StoreResult<()> {
        let mut ast = self.locked();
        ast.refs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::RefNotFound(name.to_string()))
    }

    async fn resolve(&self, committish: &str) -> StoreResult<Option<CommitId>> {
        let ast = self.locked();
        if committish == "HEAD" {
            return Ok(ast.head.clone());
        }
        if let Some(branch) = ast.branches.get(committish) {
            return Ok(Some(branch.target.clone()));
        }
        if let Some(target) = ast.refs.get(committish) {
            return Ok(Some(target.clone()));
        }
        let matches: Vec<&CommitId> = ast
            .commits
            .keys()
            .filter(|id| id.matches_hex_prefix(committish))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some((*id).clone())),
            _ => Err(StoreError::Invalid(format!(
                "ambiguous commit id prefix {committish}"
            ))),
        }
    }

    async fn advance_head(&self, id: &CommitId) -> StoreResult<()> {
        let mut ast = self.locked();
        if !ast.commits.contains_key(id) {
            return Err(StoreError::ObjectNotFound(id.hex()));
        }
        Self::move_head(&mut ast, id);
        Ok(())
    }

    async fn checkout_detached(&self, id: &CommitId) -> StoreResult<()> {
        let mut ast = self.locked();
        if !ast.commits.contains_key(id) {
            return Err(StoreError::ObjectNotFound(id.hex()));
        }
        ast.head = Some(id.clone());
        ast.current_branch = None;
        ast.index = Index::default();
        ast.workdir.clear();
        Ok(())
    }

    async fn checkout_branch(&self, name: &str) -> StoreResult<()> {
        let mut ast = self.locked();
        let target = ast
            .branches
            .get(name)
            .map(|branch| branch.target.clone())
            .ok_or_else(|| StoreError::RefNotFound(name.to_string()))?;
        ast.head = Some(target);
        ast.current_branch = Some(name.to_string());
        ast.index = Index::default();
        ast.workdir.clear();
        Ok(())
    }

    async fn reset(&self, id: &CommitId, mode: ResetMode) -> StoreResult<()> {
        let mut ast = self.locked();
        if !ast.commits.contains_key(id) {
            return Err(StoreError::ObjectNotFound(id.hex()));
        }
        match mode {
            ResetMode::Soft => {
                Self::move_head(&mut ast, id);
            }
            ResetMode::Mixed => {
                let disk_files = ast.workdir_files().map_err(Self::tree_err)?;
                Self::move_head(&mut ast, id);
                ast.index = Index::default();
                Self::rebuild_workdir_overlay(&mut ast, disk_files)?;
            }
            ResetMode::Hard => {
                Self::move_head(&mut ast, id);
                ast.index = Index::default();
                ast.workdir.clear();
            }
        }
        Ok(())
    }

    async fn is_bare(&self) -> StoreResult<bool> {
        Ok(self.locked().bare)
    }

    async fn is_sparse(&self) -> StoreResult<bool> {
        Ok(self.locked().sparse)
    }

    async fn index(&self) -> StoreResult<Index> {
        Ok(self.locked().index.clone())
    }

    async fn set_staged(&self, path: &RepoPathBuf, change: Option<Change>) -> StoreResult<()> {
        let mut ast = self.locked();
        match change {
            Some(change) => {
                ast.index.staged.insert(path.clone(), change);
            }
            None => {
                ast.index.staged.remove(path);
            }
        }
        Ok(())
    }

    async fn set_conflict(
        &self,
        path: &RepoPathBuf,
        conflict: Option<Conflict>,
    ) -> StoreResult<()> {
        let mut ast = self.locked();
        match conflict {
            Some(conflict) => {
                if !conflict.is_well_formed() {
                    return Err(StoreError::Invalid(format!(
                        "malformed conflict recorded for {path}"
                    )));
                }
                ast.index.conflicts.insert(path.clone(), conflict);
            }
            None => {
                ast.index.conflicts.remove(path);
            }
        }
        Ok(())
    }

    async fn workdir(&self) -> StoreResult<BTreeMap<RepoPathBuf, WorkdirEntry>> {
        Ok(self.locked().workdir.clone())
    }

    async fn set_workdir(
        &self,
        path: &RepoPathBuf,
        entry: Option<WorkdirEntry>,
    ) -> StoreResult<()> {
        let mut ast = self.locked();
        match entry {
            Some(entry) => {
                ast.workdir.insert(path.clone(), entry);
            }
            None => {
                ast.workdir.remove(path);
            }
        }
        Ok(())
    }

    async fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> StoreResult<bool> {
        let ast = self.locked();
        if !ast.commits.contains_key(ancestor) || !ast.commits.contains_key(descendant) {
            return Ok(false);
        }
        let mut queue = VecDeque::from([descendant.clone()]);
        let mut seen = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            if id == *ancestor {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = ast.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        Ok(false)
    }

    async fn merge_base(&self, a: &CommitId, b: &CommitId) -> StoreResult<Option<CommitId>> {
        let ast = self.locked();
        if !ast.commits.contains_key(a) || !ast.commits.contains_key(b) {
            return Ok(None);
        }
        let mut ancestors_of_a = BTreeSet::new();
        let mut queue = VecDeque::from([a.clone()]);
        while let Some(id) = queue.pop_front() {
            if !ancestors_of_a.insert(id.clone()) {
                continue;
            }
            if let Some(commit) = ast.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        // Breadth-first from `b` finds a nearest common ancestor first.
        let mut queue = VecDeque::from([b.clone()]);
        let mut seen = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if ancestors_of_a.contains(&id) {
                return Ok(Some(id));
            }
            if let Some(commit) = ast.commits.get(&id) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        Ok(None)
    }

    async fn merge_entries(
        &self,
        ancestor: Option<TreeValue>,
        ours: Option<TreeValue>,
        theirs: Option<TreeValue>,
    ) -> StoreResult<MergeOutcome> {
        if ours == theirs {
            return Ok(MergeOutcome::Resolved(ours));
        }
        if ours == ancestor {
            return Ok(MergeOutcome::Resolved(theirs));
        }
        if theirs == ancestor {
            return Ok(MergeOutcome::Resolved(ours));
        }
        Ok(MergeOutcome::Conflicted(Conflict {
            ancestor,
            ours,
            theirs,
        }))
    }

    async fn note(&self, notes_ref: &str, id: &CommitId) -> StoreResult<Option<String>> {
        Ok(self
            .locked()
            .notes
            .get(notes_ref)
            .and_then(|notes| notes.get(id))
            .cloned())
    }

    async fn set_note(&self, notes_ref: &str, id: &CommitId, content: &str) -> StoreResult<()> {
        let mut ast = self.locked();
        ast.notes
            .entry(notes_ref.to_string())
            .or_default()
            .insert(id.clone(), content.to_string());
        Ok(())
    }

    async fn sequencer_state(&self) -> StoreResult<Option<SequencerState>> {
        Ok(self.locked().sequencer.clone())
    }

    async fn set_sequencer_state(&self, state: Option<SequencerState>) -> StoreResult<()> {
        // The file is written before the in-memory state changes so a crash
        // between the two leaves the recoverable copy on disk.
        self.write_state_file(state.as_ref())?;
        self.locked().sequencer = state;
        Ok(())
    }
}
