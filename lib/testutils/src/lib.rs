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

//! Fixture builders for the mgt test suites.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use mgt_lib::backend::Branch;
use mgt_lib::backend::Change;
use mgt_lib::backend::Commit;
use mgt_lib::backend::FileContent;
use mgt_lib::backend::Signature;
use mgt_lib::backend::SubmoduleDef;
use mgt_lib::backend::Timestamp;
use mgt_lib::mem_store::MemoryStore;
use mgt_lib::object_id::CommitId;
use mgt_lib::opener::Opener;
use mgt_lib::repo_ast::RepoAst;
use mgt_lib::repo_path::RepoPathBuf;
use mgt_lib::store::ObjectStore;
use mgt_lib::workspace::Workspace;
use tempfile::TempDir;

pub fn path(value: &str) -> RepoPathBuf {
    RepoPathBuf::from_literal(value)
}

pub fn file_change(text: &str) -> Change {
    Change::File(FileContent::text(text))
}

pub fn sub_change(url: &str, pin: Option<&CommitId>) -> Change {
    Change::Sub(SubmoduleDef {
        url: url.to_string(),
        commit: pin.cloned(),
    })
}

pub fn signature() -> Signature {
    signature_at(1_700_000_000_000)
}

pub fn signature_at(millis: i64) -> Signature {
    Signature {
        name: "Test User".to_string(),
        email: "test.user@example.com".to_string(),
        timestamp: Timestamp {
            millis_since_epoch: millis,
            tz_offset_minutes: 60,
        },
    }
}

/// Builds a repository graph commit by commit. Signatures carry a counter
/// timestamp so structurally equal changes still address distinct commits.
pub struct TestRepo {
    pub ast: RepoAst,
    counter: i64,
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepo {
    pub fn new() -> Self {
        TestRepo {
            ast: RepoAst::default(),
            counter: 0,
        }
    }

    fn next_signature(&mut self) -> Signature {
        self.counter += 1;
        signature_at(1_700_000_000_000 + self.counter * 1000)
    }

    /// Adds a commit without moving any reference.
    pub fn commit(
        &mut self,
        parents: &[&CommitId],
        changes: BTreeMap<RepoPathBuf, Change>,
        message: &str,
    ) -> CommitId {
        let sig = self.next_signature();
        let commit = Commit {
            parents: parents.iter().map(|id| (*id).clone()).collect(),
            changes,
            message: message.to_string(),
            author: sig.clone(),
            committer: sig,
        };
        let id = commit.id();
        self.ast.commits.insert(id.clone(), commit);
        id
    }

    /// Adds a commit on top of `branch` and advances it (and HEAD when the
    /// branch is checked out).
    pub fn commit_on(
        &mut self,
        branch: &str,
        changes: BTreeMap<RepoPathBuf, Change>,
        message: &str,
    ) -> CommitId {
        let parent = self.ast.branches.get(branch).map(|b| b.target.clone());
        let parents: Vec<&CommitId> = parent.iter().collect();
        let id = self.commit(&parents, changes, message);
        self.set_branch(branch, &id);
        id
    }

    pub fn set_branch(&mut self, branch: &str, target: &CommitId) {
        self.ast.branches.insert(
            branch.to_string(),
            Branch {
                target: target.clone(),
                tracking: None,
            },
        );
        if self.ast.current_branch.as_deref() == Some(branch) || self.ast.current_branch.is_none() {
            self.ast.current_branch = Some(branch.to_string());
            self.ast.head = Some(target.clone());
        }
    }

    pub fn checkout(&mut self, branch: &str) {
        let target = self.ast.branches[branch].target.clone();
        self.ast.current_branch = Some(branch.to_string());
        self.ast.head = Some(target);
    }

    pub fn set_ref(&mut self, name: &str, target: &CommitId) {
        self.ast.refs.insert(name.to_string(), target.clone());
    }

    pub fn store(self) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(self.ast).expect("test repository must be valid"))
    }
}

/// An opener over in-memory sub stores.
pub fn make_opener(
    subs: &BTreeMap<RepoPathBuf, Arc<MemoryStore>>,
    open: &BTreeSet<RepoPathBuf>,
) -> Opener {
    let available = subs
        .iter()
        .map(|(path, store)| (path.clone(), store.clone() as Arc<dyn ObjectStore>))
        .collect();
    Opener::new(available, open.clone())
}

/// A workspace in a temporary directory, for tests that need persistence
/// (sequencer state, hooks, the CLI).
pub struct TestWorkspace {
    pub dir: TempDir,
    pub workspace: Workspace,
}

impl TestWorkspace {
    pub fn init(meta: RepoAst, subs: BTreeMap<RepoPathBuf, RepoAst>) -> Self {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(dir.path(), meta, subs).unwrap();
        TestWorkspace { dir, workspace }
    }

    pub fn reload(&mut self) {
        self.workspace = Workspace::load(self.dir.path()).unwrap();
    }
}
