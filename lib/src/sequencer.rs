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

//! The sequencer: merge, rebase, and cherry-pick across meta and subs.
//!
//! Every multi-step operation runs through one persisted [`SequencerState`]
//! and a per-kind apply routine. The state is rewritten atomically before
//! each apply, so the operation can be continued or aborted at any task
//! boundary, including across process exits. Conflicts are never retried:
//! they are recorded in the affected indexes and surfaced as an error
//! message while the state stays on disk.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools as _;
use serde::Deserialize;
use serde::Serialize;

use crate::backend::accumulate_changes;
use crate::backend::Change;
use crate::backend::Commit;
use crate::backend::CommitAndRef;
use crate::backend::Conflict;
use crate::backend::FileContent;
use crate::backend::Signature;
use crate::backend::SubmoduleDef;
use crate::backend::TreeValue;
use crate::error::Error;
use crate::error::Result;
use crate::hooks::HookRunner;
use crate::object_id::CommitId;
use crate::opener::Opener;
use crate::repo_ast::WorkdirEntry;
use crate::repo_path::RepoPathBuf;
use crate::status;
use crate::status::StatusOptions;
use crate::store::MergeOutcome;
use crate::store::ObjectStore;
use crate::store::ResetMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerKind {
    Merge,
    Rebase,
    CherryPick,
}

impl SequencerKind {
    pub fn command_name(&self) -> &'static str {
        match self {
            SequencerKind::Merge => "merge",
            SequencerKind::Rebase => "rebase",
            SequencerKind::CherryPick => "cherry-pick",
        }
    }
}

/// Persisted state of an in-progress operation. `current == commits.len()`
/// means no applies remain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerState {
    pub kind: SequencerKind,
    pub original_head: CommitAndRef,
    pub target: CommitAndRef,
    pub commits: Vec<CommitId>,
    pub current: usize,
    pub message: Option<String>,
}

impl SequencerState {
    pub fn is_done(&self) -> bool {
        self.current == self.commits.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Fast-forward when possible, otherwise create a merge commit.
    Normal,
    /// Error out when a fast-forward is not possible.
    FfOnly,
    /// Always create a merge commit.
    ForceCommit,
}

/// Outcome of a sequencer operation. `error_message` is set when the
/// operation stopped on conflicts; the persisted state is then left in
/// place for `--continue` or `--abort`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpResult {
    /// The resulting meta HEAD, when it moved.
    pub meta_commit: Option<CommitId>,
    pub submodule_commits: BTreeMap<RepoPathBuf, CommitId>,
    pub error_message: Option<String>,
}

/// Shared collaborators of one sequencer operation.
pub struct SequencerContext<'a> {
    pub store: &'a Arc<dyn ObjectStore>,
    pub opener: &'a Opener,
    pub hooks: &'a HookRunner,
    pub sig: &'a Signature,
    /// Path prefixes whose conflicts are surfaced directly instead of being
    /// recursively resolved in the sub-repo.
    pub do_not_recurse: &'a [String],
}

impl SequencerContext<'_> {
    fn recursion_allowed(&self, path: &RepoPathBuf) -> bool {
        !self
            .do_not_recurse
            .iter()
            .any(|prefix| path.starts_with_str(prefix))
    }
}

/// Merges `target` into the current HEAD.
pub async fn merge(
    ctx: &SequencerContext<'_>,
    target: &CommitAndRef,
    mode: MergeMode,
    message: Option<&str>,
) -> Result<OpResult> {
    ensure_no_operation_in_progress(ctx).await?;
    ensure_deep_clean(ctx, SequencerKind::Merge).await?;
    let head = current_head(ctx, SequencerKind::Merge).await?;

    if head == target.sha || ctx.store.is_ancestor(&target.sha, &head).await? {
        return Ok(OpResult::default());
    }

    if ctx.store.is_ancestor(&head, &target.sha).await? && mode != MergeMode::ForceCommit {
        // Fast-forward: a hard reset to the target, no sequencer state.
        ctx.store.reset(&target.sha, ResetMode::Hard).await?;
        ctx.hooks.post_checkout(&head.hex(), &target.sha.hex());
        return Ok(OpResult {
            meta_commit: Some(target.sha.clone()),
            ..Default::default()
        });
    }
    if mode == MergeMode::FfOnly {
        return Err(Error::user(format!(
            "cannot fast-forward to {}",
            describe(target)
        )));
    }
    if ctx.store.merge_base(&head, &target.sha).await?.is_none() {
        return Err(Error::user(format!(
            "no common ancestor with {}",
            describe(target)
        )));
    }

    let state = SequencerState {
        kind: SequencerKind::Merge,
        original_head: CommitAndRef {
            sha: head,
            ref_name: ctx.store.current_branch().await?,
        },
        target: target.clone(),
        commits: vec![target.sha.clone()],
        current: 0,
        message: message.map(str::to_string),
    };
    ctx.store.set_sequencer_state(Some(state.clone())).await?;
    run_sequencer(ctx, state, OpResult::default()).await
}

/// Rebases the current branch onto `onto`.
pub async fn rebase(ctx: &SequencerContext<'_>, onto: &CommitAndRef) -> Result<OpResult> {
    ensure_no_operation_in_progress(ctx).await?;
    ensure_deep_clean(ctx, SequencerKind::Rebase).await?;
    let head = current_head(ctx, SequencerKind::Rebase).await?;

    if head == onto.sha || ctx.store.is_ancestor(&onto.sha, &head).await? {
        return Ok(OpResult::default());
    }

    let commits = rebase_commit_list(ctx.store.as_ref(), &head, &onto.sha).await?;
    let state = SequencerState {
        kind: SequencerKind::Rebase,
        original_head: CommitAndRef {
            sha: head,
            ref_name: ctx.store.current_branch().await?,
        },
        target: onto.clone(),
        commits,
        current: 0,
        message: None,
    };
    ctx.store.set_sequencer_state(Some(state.clone())).await?;
    // Prepare the base: detach onto the target and put open subs on its
    // pins.
    ctx.store.checkout_detached(&onto.sha).await?;
    checkout_subs_at(ctx, &onto.sha).await?;
    run_sequencer(ctx, state, OpResult::default()).await
}

/// Cherry-picks the given commits, in order, onto the current HEAD.
pub async fn cherry_pick(ctx: &SequencerContext<'_>, commits: &[CommitId]) -> Result<OpResult> {
    ensure_no_operation_in_progress(ctx).await?;
    ensure_deep_clean(ctx, SequencerKind::CherryPick).await?;
    let head = current_head(ctx, SequencerKind::CherryPick).await?;
    let Some(first) = commits.first() else {
        return Err(Error::user("no commits to cherry-pick"));
    };

    let state = SequencerState {
        kind: SequencerKind::CherryPick,
        original_head: CommitAndRef {
            sha: head,
            ref_name: ctx.store.current_branch().await?,
        },
        target: CommitAndRef {
            sha: first.clone(),
            ref_name: None,
        },
        commits: commits.to_vec(),
        current: 0,
        message: None,
    };
    ctx.store.set_sequencer_state(Some(state.clone())).await?;
    run_sequencer(ctx, state, OpResult::default()).await
}

/// Resumes the in-progress operation after the user resolved all conflicts.
pub async fn continue_op(ctx: &SequencerContext<'_>) -> Result<OpResult> {
    let state = ctx
        .store
        .sequencer_state()
        .await?
        .ok_or_else(|| Error::user("no sequencer operation is in progress"))?;

    let index = ctx.store.index().await?;
    if !index.conflicts.is_empty() {
        return Err(Error::Conflict(
            "unresolved conflicts remain in the meta-repo index".to_string(),
        ));
    }
    // Commit resolved sub indexes first and reflect the new pins, so the
    // finalized meta commit pins resolved sub state.
    let mut result = OpResult::default();
    let mut any_resolution_staged = !index.staged.is_empty();
    let step_message = step_message(ctx, &state).await?;
    let head_tree = match ctx.store.head().await? {
        Some(head) => ctx.store.tree_of(&head).await?,
        None => BTreeMap::new(),
    };
    let index_tree = accumulate_changes(&head_tree, &index.staged);
    for (path, def) in crate::repo_ast::RepoAst::submodules_of(&index_tree) {
        let Some(handle) = ctx.opener.open(&path) else { continue };
        let sub_index = handle.index().await?;
        if !sub_index.conflicts.is_empty() {
            return Err(Error::Conflict(format!(
                "unresolved conflicts remain in submodule {path}"
            )));
        }
        if sub_index.staged.is_empty() {
            continue;
        }
        any_resolution_staged = true;
        if let Some(id) = commit_staged(handle.as_ref(), &step_message, None, ctx.sig).await? {
            stage_sub_pin(ctx, &path, &def.url, &id).await?;
            result.submodule_commits.insert(path, id);
        }
    }

    // Nothing was staged anywhere: the step was persisted but never
    // applied (recovery after a crash), so replay it from the top.
    if !any_resolution_staged {
        return run_sequencer(ctx, state, result).await;
    }

    let mut state = state;
    let meta_commit = finalize_step(ctx, &state).await?;
    if let Some(id) = &meta_commit {
        result.meta_commit = Some(id.clone());
    }
    state.current += 1;
    ctx.store.set_sequencer_state(Some(state.clone())).await?;
    run_sequencer(ctx, state, result).await
}

/// Abandons the in-progress operation and restores the original HEAD.
pub async fn abort_op(ctx: &SequencerContext<'_>) -> Result<()> {
    let state = ctx
        .store
        .sequencer_state()
        .await?
        .ok_or_else(|| Error::user("no sequencer operation is in progress"))?;

    ctx.store
        .reset(&state.original_head.sha, ResetMode::Hard)
        .await?;
    if let Some(branch) = &state.original_head.ref_name {
        ctx.store.set_branch(branch, &state.original_head.sha).await?;
        ctx.store.checkout_branch(branch).await?;
    }
    // Put open subs back on the restored pins, dropping any half-applied
    // state in their indexes.
    checkout_subs_at(ctx, &state.original_head.sha).await?;
    ctx.store.set_sequencer_state(None).await?;
    Ok(())
}

/// Hard-resets every open sub onto the pins recorded in the tree of `meta`.
async fn checkout_subs_at(ctx: &SequencerContext<'_>, meta: &CommitId) -> Result<()> {
    let tree = ctx.store.tree_of(meta).await?;
    for (path, def) in crate::repo_ast::RepoAst::submodules_of(&tree) {
        let (Some(handle), Some(pin)) = (ctx.opener.open(&path), def.commit) else {
            continue;
        };
        if handle.has_commit(&pin).await? {
            handle.reset(&pin, ResetMode::Hard).await?;
        }
    }
    Ok(())
}

/// The replay list for a rebase: ancestors of `from` that are not ancestors
/// of `onto`, in depth-first left-to-right post-order (ancestors precede
/// descendants), with merge commits dropped.
pub async fn rebase_commit_list(
    store: &dyn ObjectStore,
    from: &CommitId,
    onto: &CommitId,
) -> Result<Vec<CommitId>> {
    let mut exclude = BTreeSet::new();
    let mut stack = vec![onto.clone()];
    while let Some(id) = stack.pop() {
        if !exclude.insert(id.clone()) {
            continue;
        }
        stack.extend(store.read_commit(&id).await?.parents);
    }

    enum Frame {
        Enter(CommitId),
        Exit(CommitId, bool),
    }
    let mut list = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![Frame::Enter(from.clone())];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(id) => {
                if exclude.contains(&id) || !seen.insert(id.clone()) {
                    continue;
                }
                let commit = store.read_commit(&id).await?;
                stack.push(Frame::Exit(id, commit.is_merge()));
                // Reversed so the left parent is visited first.
                for parent in commit.parents.iter().rev() {
                    stack.push(Frame::Enter(parent.clone()));
                }
            }
            Frame::Exit(id, is_merge) => {
                if !is_merge {
                    list.push(id);
                }
            }
        }
    }
    Ok(list)
}

async fn run_sequencer(
    ctx: &SequencerContext<'_>,
    mut state: SequencerState,
    mut result: OpResult,
) -> Result<OpResult> {
    while !state.is_done() {
        let step = apply_step(ctx, &state).await?;
        match step {
            StepOutcome::Applied {
                meta_commit,
                submodule_commits,
            } => {
                if let Some(id) = meta_commit {
                    result.meta_commit = Some(id);
                }
                result.submodule_commits.extend(submodule_commits);
                state.current += 1;
                ctx.store.set_sequencer_state(Some(state.clone())).await?;
            }
            StepOutcome::Conflicted { message } => {
                result.error_message = Some(message);
                return Ok(result);
            }
        }
    }
    finish_sequencer(ctx, &state).await?;
    if result.meta_commit.is_none() {
        result.meta_commit = ctx.store.head().await?;
    }
    Ok(result)
}

enum StepOutcome {
    Applied {
        meta_commit: Option<CommitId>,
        submodule_commits: BTreeMap<RepoPathBuf, CommitId>,
    },
    Conflicted {
        message: String,
    },
}

/// Stages one step's changes into the meta index (recursing into subs) and,
/// when no conflicts arose, finalizes the corresponding commit.
async fn apply_step(ctx: &SequencerContext<'_>, state: &SequencerState) -> Result<StepOutcome> {
    let staged = match state.kind {
        SequencerKind::Merge => stage_merge(ctx, state).await?,
        SequencerKind::Rebase | SequencerKind::CherryPick => {
            stage_pick(ctx, &state.commits[state.current]).await?
        }
    };
    if !staged.conflicts.is_empty() {
        return Ok(StepOutcome::Conflicted {
            message: conflict_message(state.kind, &staged.conflicts),
        });
    }
    let meta_commit = finalize_step(ctx, state).await?;
    Ok(StepOutcome::Applied {
        meta_commit,
        submodule_commits: staged.submodule_commits,
    })
}

#[derive(Default)]
struct StagedStep {
    submodule_commits: BTreeMap<RepoPathBuf, CommitId>,
    conflicts: Vec<RepoPathBuf>,
}

/// Applies one picked commit's change-map to the meta index, recursively
/// cherry-picking sub-sha updates inside their sub-repos.
async fn stage_pick(ctx: &SequencerContext<'_>, picked_id: &CommitId) -> Result<StagedStep> {
    let picked = ctx.store.read_commit(picked_id).await?;
    let parent_tree = match picked.left_parent() {
        Some(parent) => ctx.store.tree_of(parent).await?,
        None => BTreeMap::new(),
    };
    let head_tree = match ctx.store.head().await? {
        Some(head) => ctx.store.tree_of(&head).await?,
        None => BTreeMap::new(),
    };
    let index = ctx.store.index().await?;
    let index_tree = accumulate_changes(&head_tree, &index.staged);

    let mut staged = StagedStep::default();
    for (path, change) in &picked.changes {
        let ancestor = parent_tree.get(path).cloned();
        let theirs = change.to_tree_value();
        let ours = index_tree.get(path).cloned();

        // A pin update of an open sub replays the sub commit inside the
        // sub-repo, unless the caller asked not to recurse there.
        if let (Some(TreeValue::Submodule(old_def)), Change::Sub(new_def)) = (&ancestor, change) {
            if let (Some(_old_pin), Some(new_pin)) = (&old_def.commit, &new_def.commit) {
                if old_def.url == new_def.url
                    && ctx.recursion_allowed(path)
                    && ctx.opener.is_open(path)
                {
                    let handle = ctx.opener.open(path).expect("checked is_open");
                    match pick_in_sub(handle.as_ref(), new_pin, ctx.sig).await? {
                        SubPickOutcome::Applied(new_head) => {
                            if let Some(id) = &new_head {
                                staged.submodule_commits.insert(path.clone(), id.clone());
                            }
                            let sub_head = handle.head().await?;
                            if let Some(sub_head) = sub_head {
                                stage_sub_pin(ctx, path, &new_def.url, &sub_head).await?;
                            }
                        }
                        SubPickOutcome::Conflicted(_) => {
                            record_meta_conflict(
                                ctx,
                                path,
                                Conflict {
                                    ancestor: ancestor.clone(),
                                    ours,
                                    theirs,
                                },
                            )
                            .await?;
                            staged.conflicts.push(path.clone());
                        }
                    }
                    continue;
                }
            }
        }

        match ctx.store.merge_entries(ancestor, ours, theirs).await? {
            MergeOutcome::Resolved(value) => {
                stage_resolved(ctx, path, value, &head_tree).await?;
            }
            MergeOutcome::Conflicted(conflict) => {
                record_meta_conflict(ctx, path, conflict).await?;
                staged.conflicts.push(path.clone());
            }
        }
    }
    Ok(staged)
}

/// Stages the three-way merge of the target tree into the meta index,
/// merging sub pin updates recursively inside their sub-repos.
async fn stage_merge(ctx: &SequencerContext<'_>, state: &SequencerState) -> Result<StagedStep> {
    let head = current_head(ctx, state.kind).await?;
    let base = ctx
        .store
        .merge_base(&head, &state.target.sha)
        .await?
        .ok_or_else(|| {
            Error::user(format!("no common ancestor with {}", describe(&state.target)))
        })?;
    let base_tree = ctx.store.tree_of(&base).await?;
    let ours_tree = ctx.store.tree_of(&head).await?;
    let theirs_tree = ctx.store.tree_of(&state.target.sha).await?;

    let mut paths: BTreeSet<RepoPathBuf> = base_tree.keys().cloned().collect();
    paths.extend(theirs_tree.keys().cloned());

    let mut staged = StagedStep::default();
    for path in paths {
        let ancestor = base_tree.get(&path).cloned();
        let ours = ours_tree.get(&path).cloned();
        let theirs = theirs_tree.get(&path).cloned();
        if theirs == ancestor {
            continue;
        }

        if let (
            Some(TreeValue::Submodule(base_def)),
            Some(TreeValue::Submodule(ours_def)),
            Some(TreeValue::Submodule(theirs_def)),
        ) = (&ancestor, &ours, &theirs)
        {
            if let (Some(ours_pin), Some(theirs_pin)) = (&ours_def.commit, &theirs_def.commit) {
                if base_def.url == theirs_def.url
                    && ours_def.url == theirs_def.url
                    && ctx.recursion_allowed(&path)
                    && ctx.opener.is_open(&path)
                {
                    let handle = ctx.opener.open(&path).expect("checked is_open");
                    let message = step_message(ctx, state).await?;
                    match merge_in_sub(handle.as_ref(), ours_pin, theirs_pin, &message, ctx.sig)
                        .await?
                    {
                        SubMergeOutcome::AlreadyUpToDate => {}
                        SubMergeOutcome::FastForward(pin) => {
                            stage_sub_pin(ctx, &path, &ours_def.url, &pin).await?;
                        }
                        SubMergeOutcome::Merged(pin) => {
                            staged.submodule_commits.insert(path.clone(), pin.clone());
                            stage_sub_pin(ctx, &path, &ours_def.url, &pin).await?;
                        }
                        SubMergeOutcome::Conflicted(_) => {
                            record_meta_conflict(
                                ctx,
                                &path,
                                Conflict {
                                    ancestor: ancestor.clone(),
                                    ours: ours.clone(),
                                    theirs: theirs.clone(),
                                },
                            )
                            .await?;
                            staged.conflicts.push(path.clone());
                        }
                    }
                    continue;
                }
            }
        }

        match ctx.store.merge_entries(ancestor, ours, theirs).await? {
            MergeOutcome::Resolved(value) => {
                stage_resolved(ctx, &path, value, &ours_tree).await?;
            }
            MergeOutcome::Conflicted(conflict) => {
                record_meta_conflict(ctx, &path, conflict).await?;
                staged.conflicts.push(path.clone());
            }
        }
    }
    Ok(staged)
}

/// Creates the commit for the current step from the staged index. For picks
/// the original author and message are preserved and the committer is the
/// current signature; for merges a two-parent commit is created.
async fn finalize_step(
    ctx: &SequencerContext<'_>,
    state: &SequencerState,
) -> Result<Option<CommitId>> {
    match state.kind {
        SequencerKind::Merge => {
            let head = current_head(ctx, state.kind).await?;
            let head_tree = ctx.store.tree_of(&head).await?;
            let index = ctx.store.index().await?;
            let staged_paths: Vec<RepoPathBuf> = index.staged.keys().cloned().collect();
            let changes = normalize_staged(index.staged, &head_tree);
            let message = match &state.message {
                Some(message) => message.clone(),
                None => format!("Merge of {}", describe(&state.target)),
            };
            let commit = Commit {
                parents: vec![head, state.target.sha.clone()],
                changes,
                message,
                author: ctx.sig.clone(),
                committer: ctx.sig.clone(),
            };
            let id = ctx.store.write_commit(commit).await?;
            ctx.store.advance_head(&id).await?;
            clear_staged(ctx.store.as_ref(), staged_paths.iter()).await?;
            Ok(Some(id))
        }
        SequencerKind::Rebase | SequencerKind::CherryPick => {
            let picked = ctx.store.read_commit(&state.commits[state.current]).await?;
            let head = current_head(ctx, state.kind).await?;
            let head_tree = ctx.store.tree_of(&head).await?;
            let index = ctx.store.index().await?;
            let staged_paths: Vec<RepoPathBuf> = index.staged.keys().cloned().collect();
            let changes = normalize_staged(index.staged, &head_tree);
            if changes.is_empty() {
                // The change is already present; the pick drops out.
                clear_staged(ctx.store.as_ref(), staged_paths.iter()).await?;
                return Ok(None);
            }
            let commit = Commit {
                parents: vec![head],
                changes,
                message: picked.message.clone(),
                author: picked.author.clone(),
                committer: ctx.sig.clone(),
            };
            let id = ctx.store.write_commit(commit).await?;
            ctx.store.advance_head(&id).await?;
            clear_staged(ctx.store.as_ref(), staged_paths.iter()).await?;
            Ok(Some(id))
        }
    }
}

/// Terminal transition: restore the original branch, clear the persisted
/// state, and fire the terminal hook.
async fn finish_sequencer(ctx: &SequencerContext<'_>, state: &SequencerState) -> Result<()> {
    match state.kind {
        SequencerKind::Rebase => {
            if let Some(branch) = &state.original_head.ref_name {
                let final_head = current_head(ctx, state.kind).await?;
                ctx.store.set_branch(branch, &final_head).await?;
                ctx.store.checkout_branch(branch).await?;
            }
            ctx.store.set_sequencer_state(None).await?;
            ctx.hooks.post_rewrite();
        }
        SequencerKind::Merge => {
            ctx.store.set_sequencer_state(None).await?;
            ctx.hooks.post_merge(false);
        }
        SequencerKind::CherryPick => {
            ctx.store.set_sequencer_state(None).await?;
        }
    }
    Ok(())
}

enum SubPickOutcome {
    /// The pick applied; `Some` carries the fresh sub commit (an empty pick
    /// creates none).
    Applied(Option<CommitId>),
    Conflicted(Vec<RepoPathBuf>),
}

/// Cherry-picks one commit inside a sub-repo.
async fn pick_in_sub(
    store: &dyn ObjectStore,
    picked_id: &CommitId,
    sig: &Signature,
) -> Result<SubPickOutcome> {
    if !store.has_commit(picked_id).await? {
        return Err(Error::Integrity(format!(
            "submodule commit {picked_id} is not present locally"
        )));
    }
    let picked = store.read_commit(picked_id).await?;
    let parent_tree = match picked.left_parent() {
        Some(parent) => store.tree_of(parent).await?,
        None => BTreeMap::new(),
    };
    let head = store.head().await?;
    let head_tree = match &head {
        Some(head) => store.tree_of(head).await?,
        None => BTreeMap::new(),
    };
    let index = store.index().await?;
    let index_tree = accumulate_changes(&head_tree, &index.staged);

    let mut conflicts = Vec::new();
    for (path, change) in &picked.changes {
        let ancestor = parent_tree.get(path).cloned();
        let ours = index_tree.get(path).cloned();
        let theirs = change.to_tree_value();
        match store.merge_entries(ancestor.clone(), ours.clone(), theirs.clone()).await? {
            MergeOutcome::Resolved(value) => {
                let staged_change = Change::from_tree_value(value);
                if head_tree.get(path) == staged_change.to_tree_value().as_ref() {
                    store.set_staged(path, None).await?;
                } else {
                    store.set_staged(path, Some(staged_change)).await?;
                }
            }
            MergeOutcome::Conflicted(conflict) => {
                store
                    .set_workdir(
                        path,
                        Some(WorkdirEntry::File(conflict_file_content(&conflict))),
                    )
                    .await?;
                store.set_conflict(path, Some(conflict)).await?;
                conflicts.push(path.clone());
            }
        }
    }
    if !conflicts.is_empty() {
        return Ok(SubPickOutcome::Conflicted(conflicts));
    }

    let index = store.index().await?;
    let staged_paths: Vec<RepoPathBuf> = index.staged.keys().cloned().collect();
    let changes = normalize_staged(index.staged, &head_tree);
    if changes.is_empty() {
        clear_staged(store, staged_paths.iter()).await?;
        return Ok(SubPickOutcome::Applied(None));
    }
    let commit = Commit {
        parents: head.into_iter().collect(),
        changes,
        message: picked.message.clone(),
        author: picked.author.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(commit).await?;
    store.advance_head(&id).await?;
    clear_staged(store, staged_paths.iter()).await?;
    Ok(SubPickOutcome::Applied(Some(id)))
}

enum SubMergeOutcome {
    AlreadyUpToDate,
    FastForward(CommitId),
    Merged(CommitId),
    Conflicted(Vec<RepoPathBuf>),
}

/// Merges `theirs_pin` into `ours_pin` inside an open sub-repo.
async fn merge_in_sub(
    store: &dyn ObjectStore,
    ours_pin: &CommitId,
    theirs_pin: &CommitId,
    message: &str,
    sig: &Signature,
) -> Result<SubMergeOutcome> {
    if !store.has_commit(theirs_pin).await? {
        return Err(Error::Integrity(format!(
            "submodule commit {theirs_pin} is not present locally"
        )));
    }
    if ours_pin == theirs_pin || store.is_ancestor(theirs_pin, ours_pin).await? {
        return Ok(SubMergeOutcome::AlreadyUpToDate);
    }
    if store.is_ancestor(ours_pin, theirs_pin).await? {
        store.reset(theirs_pin, ResetMode::Hard).await?;
        return Ok(SubMergeOutcome::FastForward(theirs_pin.clone()));
    }
    let base = store
        .merge_base(ours_pin, theirs_pin)
        .await?
        .ok_or_else(|| {
            Error::user(format!(
                "no common ancestor between submodule commits {ours_pin} and {theirs_pin}"
            ))
        })?;
    let base_tree = store.tree_of(&base).await?;
    let ours_tree = store.tree_of(ours_pin).await?;
    let theirs_tree = store.tree_of(theirs_pin).await?;

    let mut paths: BTreeSet<RepoPathBuf> = base_tree.keys().cloned().collect();
    paths.extend(theirs_tree.keys().cloned());

    let mut conflicts = Vec::new();
    for path in paths {
        let ancestor = base_tree.get(&path).cloned();
        let ours = ours_tree.get(&path).cloned();
        let theirs = theirs_tree.get(&path).cloned();
        if theirs == ancestor {
            continue;
        }
        match store.merge_entries(ancestor, ours, theirs).await? {
            MergeOutcome::Resolved(value) => {
                let staged_change = Change::from_tree_value(value);
                if ours_tree.get(&path) == staged_change.to_tree_value().as_ref() {
                    store.set_staged(&path, None).await?;
                } else {
                    store.set_staged(&path, Some(staged_change)).await?;
                }
            }
            MergeOutcome::Conflicted(conflict) => {
                store
                    .set_workdir(
                        &path,
                        Some(WorkdirEntry::File(conflict_file_content(&conflict))),
                    )
                    .await?;
                store.set_conflict(&path, Some(conflict)).await?;
                conflicts.push(path.clone());
            }
        }
    }
    if !conflicts.is_empty() {
        return Ok(SubMergeOutcome::Conflicted(conflicts));
    }

    let index = store.index().await?;
    let staged_paths: Vec<RepoPathBuf> = index.staged.keys().cloned().collect();
    let changes = normalize_staged(index.staged, &ours_tree);
    let commit = Commit {
        parents: vec![ours_pin.clone(), theirs_pin.clone()],
        changes,
        message: message.to_string(),
        author: sig.clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(commit).await?;
    store.advance_head(&id).await?;
    clear_staged(store, staged_paths.iter()).await?;
    Ok(SubMergeOutcome::Merged(id))
}

/// Commits whatever is staged, preserving an optional original author.
async fn commit_staged(
    store: &dyn ObjectStore,
    message: &str,
    author: Option<&Signature>,
    sig: &Signature,
) -> Result<Option<CommitId>> {
    let head = store.head().await?;
    let head_tree = match &head {
        Some(head) => store.tree_of(head).await?,
        None => BTreeMap::new(),
    };
    let index = store.index().await?;
    let staged_paths: Vec<RepoPathBuf> = index.staged.keys().cloned().collect();
    let changes = normalize_staged(index.staged, &head_tree);
    if changes.is_empty() {
        return Ok(None);
    }
    let commit = Commit {
        parents: head.into_iter().collect(),
        changes,
        message: message.to_string(),
        author: author.unwrap_or(sig).clone(),
        committer: sig.clone(),
    };
    let id = store.write_commit(commit).await?;
    store.advance_head(&id).await?;
    clear_staged(store, staged_paths.iter()).await?;
    Ok(Some(id))
}

async fn stage_sub_pin(
    ctx: &SequencerContext<'_>,
    path: &RepoPathBuf,
    url: &str,
    pin: &CommitId,
) -> Result<()> {
    let head_tree = match ctx.store.head().await? {
        Some(head) => ctx.store.tree_of(&head).await?,
        None => BTreeMap::new(),
    };
    let def = SubmoduleDef {
        url: url.to_string(),
        commit: Some(pin.clone()),
    };
    if head_tree.get(path) == Some(&TreeValue::Submodule(def.clone())) {
        ctx.store.set_staged(path, None).await?;
    } else {
        ctx.store.set_staged(path, Some(Change::Sub(def))).await?;
    }
    Ok(())
}

async fn stage_resolved(
    ctx: &SequencerContext<'_>,
    path: &RepoPathBuf,
    value: Option<TreeValue>,
    head_tree: &BTreeMap<RepoPathBuf, TreeValue>,
) -> Result<()> {
    let change = Change::from_tree_value(value);
    if head_tree.get(path) == change.to_tree_value().as_ref() {
        ctx.store.set_staged(path, None).await?;
    } else {
        ctx.store.set_staged(path, Some(change)).await?;
    }
    Ok(())
}

async fn record_meta_conflict(
    ctx: &SequencerContext<'_>,
    path: &RepoPathBuf,
    conflict: Conflict,
) -> Result<()> {
    ctx.store
        .set_workdir(
            path,
            Some(WorkdirEntry::File(conflict_file_content(&conflict))),
        )
        .await?;
    ctx.store.set_conflict(path, Some(conflict)).await?;
    Ok(())
}

async fn clear_staged(
    store: &dyn ObjectStore,
    paths: impl Iterator<Item = &RepoPathBuf>,
) -> Result<()> {
    for path in paths {
        store.set_staged(path, None).await?;
    }
    Ok(())
}

fn normalize_staged(
    staged: BTreeMap<RepoPathBuf, Change>,
    base: &BTreeMap<RepoPathBuf, TreeValue>,
) -> BTreeMap<RepoPathBuf, Change> {
    staged
        .into_iter()
        .filter(|(path, change)| match change {
            Change::Removed => base.contains_key(path),
            other => base.get(path) != other.to_tree_value().as_ref(),
        })
        .collect()
}

/// A textual rendering of an unresolved entry, written to the working
/// directory so the user has something to resolve.
fn conflict_file_content(conflict: &Conflict) -> FileContent {
    match (&conflict.ours, &conflict.theirs) {
        (Some(TreeValue::File(ours)), Some(TreeValue::File(theirs))) => {
            let mut data = Vec::new();
            data.extend_from_slice(b"<<<<<<< ours\n");
            data.extend_from_slice(&ours.data);
            if !ours.data.ends_with(b"\n") {
                data.push(b'\n');
            }
            data.extend_from_slice(b"=======\n");
            data.extend_from_slice(&theirs.data);
            if !theirs.data.ends_with(b"\n") {
                data.push(b'\n');
            }
            data.extend_from_slice(b">>>>>>> theirs\n");
            FileContent {
                data,
                executable: ours.executable,
            }
        }
        _ => FileContent::text(format!(
            "conflict: ours = {:?}, theirs = {:?}\n",
            conflict.ours, conflict.theirs
        )),
    }
}

fn conflict_message(kind: SequencerKind, paths: &[RepoPathBuf]) -> String {
    let listing = paths.iter().map(|path| format!("  {path}")).join("\n");
    let name = kind.command_name();
    format!(
        "conflicts while applying changes:\n{listing}\nResolve the conflicts and run \
         'mgt {name} --continue', or abort with 'mgt {name} --abort'."
    )
}

/// The message a mid-operation sub commit should carry.
async fn step_message(ctx: &SequencerContext<'_>, state: &SequencerState) -> Result<String> {
    match state.kind {
        SequencerKind::Merge => Ok(state
            .message
            .clone()
            .unwrap_or_else(|| format!("Merge of {}", describe(&state.target)))),
        SequencerKind::Rebase | SequencerKind::CherryPick => {
            let picked = ctx.store.read_commit(&state.commits[state.current]).await?;
            Ok(picked.message)
        }
    }
}

async fn ensure_no_operation_in_progress(ctx: &SequencerContext<'_>) -> Result<()> {
    if let Some(state) = ctx.store.sequencer_state().await? {
        return Err(Error::user(format!(
            "a {} is already in progress; continue or abort it first",
            state.kind.command_name()
        )));
    }
    Ok(())
}

async fn ensure_deep_clean(ctx: &SequencerContext<'_>, kind: SequencerKind) -> Result<()> {
    let repo_status =
        status::repo_status(ctx.store, ctx.opener, &StatusOptions::default()).await?;
    if !status::is_deep_clean(&repo_status, false) {
        return Err(Error::user(format!(
            "cannot {}: the repository has uncommitted changes",
            kind.command_name()
        )));
    }
    Ok(())
}

async fn current_head(ctx: &SequencerContext<'_>, kind: SequencerKind) -> Result<CommitId> {
    ctx.store.head().await?.ok_or_else(|| {
        Error::user(format!(
            "cannot {}: the repository has no commits",
            kind.command_name()
        ))
    })
}

fn describe(commit_and_ref: &CommitAndRef) -> String {
    match &commit_and_ref.ref_name {
        Some(name) => name.clone(),
        None => commit_and_ref.sha.short_hex(),
    }
}
