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

//! The object-store facade the engines are written against.
//!
//! Every suspension point of the engines is a call on [`ObjectStore`]. The
//! trait is safe to call concurrently; each repository's index is still a
//! single-writer resource by engine convention.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::Branch;
use crate::backend::Change;
use crate::backend::Commit;
use crate::backend::Conflict;
use crate::backend::TreeValue;
use crate::file_util::PathError;
use crate::object_id::CommitId;
use crate::repo_ast::Index;
use crate::repo_ast::WorkdirEntry;
use crate::repo_path::RepoPathBuf;
use crate::sequencer::SequencerState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    ObjectNotFound(String),
    #[error("reference {0} not found")]
    RefNotFound(String),
    #[error("invalid store operation: {0}")]
    Invalid(String),
    #[error("sequencer state error: {0}")]
    State(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How far a reset reaches: `Soft` moves HEAD only, `Mixed` also resets the
/// index, `Hard` additionally resets the working directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

/// Result of the store's entry-level three-way merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Resolved(Option<TreeValue>),
    Conflicted(Conflict),
}

/// Abstract interface over one underlying content-addressed repository.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // Commits and trees.
    async fn read_commit(&self, id: &CommitId) -> StoreResult<Commit>;
    /// Validates the change-map against the left parent (deletions must name
    /// existing paths, no-op changes are forbidden) and stores the commit.
    async fn write_commit(&self, commit: Commit) -> StoreResult<CommitId>;
    async fn has_commit(&self, id: &CommitId) -> StoreResult<bool>;
    /// The fully resolved tree of a commit.
    async fn tree_of(&self, id: &CommitId) -> StoreResult<BTreeMap<RepoPathBuf, TreeValue>>;

    // References.
    async fn head(&self) -> StoreResult<Option<CommitId>>;
    async fn current_branch(&self) -> StoreResult<Option<String>>;
    async fn branches(&self) -> StoreResult<BTreeMap<String, Branch>>;
    async fn set_branch(&self, name: &str, target: &CommitId) -> StoreResult<()>;
    async fn refs_with_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, CommitId>>;
    async fn set_ref(&self, name: &str, target: &CommitId) -> StoreResult<()>;
    async fn delete_ref(&self, name: &str) -> StoreResult<()>;
    /// Resolves a branch name, `HEAD`, a full ref name, or a unique hex
    /// prefix. Returns `None` when nothing matches.
    async fn resolve(&self, committish: &str) -> StoreResult<Option<CommitId>>;
    /// Moves HEAD (and the current branch, if any) to `id`.
    async fn advance_head(&self, id: &CommitId) -> StoreResult<()>;
    /// Detaches HEAD at `id` and hard-resets index and workdir.
    async fn checkout_detached(&self, id: &CommitId) -> StoreResult<()>;
    /// Re-attaches HEAD to `name` without moving the branch.
    async fn checkout_branch(&self, name: &str) -> StoreResult<()>;
    async fn reset(&self, id: &CommitId, mode: ResetMode) -> StoreResult<()>;

    // Repository flags.
    async fn is_bare(&self) -> StoreResult<bool>;
    async fn is_sparse(&self) -> StoreResult<bool>;

    // Index and working directory.
    async fn index(&self) -> StoreResult<Index>;
    /// Stages a change (`None` unstages the path).
    async fn set_staged(&self, path: &RepoPathBuf, change: Option<Change>) -> StoreResult<()>;
    async fn set_conflict(&self, path: &RepoPathBuf, conflict: Option<Conflict>)
        -> StoreResult<()>;
    async fn workdir(&self) -> StoreResult<BTreeMap<RepoPathBuf, WorkdirEntry>>;
    async fn set_workdir(&self, path: &RepoPathBuf, entry: Option<WorkdirEntry>)
        -> StoreResult<()>;

    // Ancestry.
    async fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> StoreResult<bool>;
    async fn merge_base(&self, a: &CommitId, b: &CommitId) -> StoreResult<Option<CommitId>>;

    /// Entry-level three-way merge. Blob-level resolution is a store
    /// concern; the reference store resolves an entry only when at most one
    /// side changed.
    async fn merge_entries(
        &self,
        ancestor: Option<TreeValue>,
        ours: Option<TreeValue>,
        theirs: Option<TreeValue>,
    ) -> StoreResult<MergeOutcome>;

    // Notes.
    async fn note(&self, notes_ref: &str, id: &CommitId) -> StoreResult<Option<String>>;
    async fn set_note(&self, notes_ref: &str, id: &CommitId, content: &str) -> StoreResult<()>;

    // Sequencer state slot (persisted in the repository's private
    // directory; a `None` read means no operation is in progress).
    async fn sequencer_state(&self) -> StoreResult<Option<SequencerState>>;
    async fn set_sequencer_state(&self, state: Option<SequencerState>) -> StoreResult<()>;
}
