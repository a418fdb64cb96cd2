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

//! On-disk workspace layout.
//!
//! A workspace root carries a `.mgt/` private directory with the serialized
//! store snapshot, the sequencer-state file, and the `hooks/` directory.
//! The snapshot is loaded when a command starts and written back atomically
//! when it completes; the sequencer-state file is maintained separately by
//! the store so it survives crashes mid-operation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::hooks::HookRunner;
use crate::mem_store::MemoryStore;
use crate::object_id::CommitId;
use crate::opener::Opener;
use crate::repo_ast::RepoAst;
use crate::repo_path::RepoPathBuf;
use crate::store::ObjectStore;

pub const DOT_DIR: &str = ".mgt";
pub const STORE_FILE: &str = "store.json";
pub const HOOKS_DIR: &str = "hooks";

/// Notes ref memoizing successful sub-pin integrity checks per meta sha.
pub const CHECK_NOTES_REF: &str = "refs/notes/git-meta/subrepo-check";

#[derive(Serialize, Deserialize)]
struct WorkspaceData {
    meta: RepoAst,
    subs: BTreeMap<RepoPathBuf, RepoAst>,
}

pub struct Workspace {
    root: PathBuf,
    dot_dir: PathBuf,
    meta: Arc<MemoryStore>,
    subs: BTreeMap<RepoPathBuf, Arc<MemoryStore>>,
}

impl Workspace {
    /// Creates the private directory and writes the initial snapshot.
    pub fn init(
        root: &Path,
        meta: RepoAst,
        subs: BTreeMap<RepoPathBuf, RepoAst>,
    ) -> Result<Workspace> {
        let dot_dir = root.join(DOT_DIR);
        file_util::create_or_reuse_dir(&dot_dir)
            .context(&dot_dir)
            .map_err(|err| Error::Integrity(err.to_string()))?;
        let hooks_dir = dot_dir.join(HOOKS_DIR);
        file_util::create_or_reuse_dir(&hooks_dir)
            .context(&hooks_dir)
            .map_err(|err| Error::Integrity(err.to_string()))?;
        let workspace = Self::from_data(root.to_path_buf(), dot_dir, meta, subs)?;
        workspace.save()?;
        Ok(workspace)
    }

    /// Loads the workspace rooted at `root`.
    pub fn load(root: &Path) -> Result<Workspace> {
        let dot_dir = root.join(DOT_DIR);
        let store_path = dot_dir.join(STORE_FILE);
        let data = fs::read(&store_path)
            .context(&store_path)
            .map_err(|err| Error::Integrity(err.to_string()))?;
        let data: WorkspaceData = serde_json::from_slice(&data)
            .map_err(|err| Error::Integrity(format!("malformed store snapshot: {err}")))?;
        Self::from_data(root.to_path_buf(), dot_dir, data.meta, data.subs)
    }

    /// Walks upward from `start` until a directory containing `.mgt` is
    /// found.
    pub fn discover(start: &Path) -> Result<Workspace> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            if current.join(DOT_DIR).is_dir() {
                return Self::load(current);
            }
            dir = current.parent();
        }
        Err(Error::user(format!(
            "no workspace found above {}",
            start.display()
        )))
    }

    fn from_data(
        root: PathBuf,
        dot_dir: PathBuf,
        meta: RepoAst,
        subs: BTreeMap<RepoPathBuf, RepoAst>,
    ) -> Result<Workspace> {
        let meta = Arc::new(
            MemoryStore::with_state_dir(meta, dot_dir.clone()).map_err(Error::from)?,
        );
        let subs = subs
            .into_iter()
            .map(|(path, ast)| {
                let store = MemoryStore::new(ast)
                    .map_err(|err| Error::Integrity(err.to_string()))?;
                Ok((path, Arc::new(store)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Workspace {
            root,
            dot_dir,
            meta,
            subs,
        })
    }

    /// Writes the snapshot back, atomically. Commits that no reference or
    /// meta pin keeps alive are pruned from the snapshot; this is where
    /// rewritten-away history is finally dropped.
    pub fn save(&self) -> Result<()> {
        let mut meta = self.meta.snapshot();
        meta.retain_reachable(std::iter::empty());
        let pinned = meta.pinned_sub_commits();
        let empty = std::collections::BTreeSet::new();
        let data = WorkspaceData {
            subs: self
                .subs
                .iter()
                .map(|(path, store)| {
                    let mut ast = store.snapshot();
                    let roots = pinned.get(path).unwrap_or(&empty);
                    ast.retain_reachable(roots.iter().cloned());
                    (path.clone(), ast)
                })
                .collect(),
            meta,
        };
        let encoded = serde_json::to_vec_pretty(&data)
            .map_err(|err| Error::Internal(err.to_string()))?;
        let store_path = self.dot_dir.join(STORE_FILE);
        file_util::write_file_atomic(&store_path, &encoded)
            .map_err(|err| Error::Integrity(err.to_string()))?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> Arc<dyn ObjectStore> {
        self.meta.clone()
    }

    /// An opener over this workspace's sub-repos, scoped to one operation.
    pub fn opener(&self) -> Opener {
        let available = self
            .subs
            .iter()
            .map(|(path, store)| (path.clone(), store.clone() as Arc<dyn ObjectStore>))
            .collect();
        let open_paths = self.meta.snapshot().open_submodules;
        Opener::new(available, open_paths)
    }

    pub fn hooks(&self) -> HookRunner {
        HookRunner::new(self.dot_dir.join(HOOKS_DIR), self.root.clone())
    }

    /// Verifies that every sub sha pinned by the meta HEAD tree resolves in
    /// its sub store. Successful checks are memoized in notes, keyed by the
    /// meta sha.
    pub async fn check_subrepo_pins(&self) -> Result<()> {
        let meta = self.meta();
        let Some(head) = meta.head().await? else {
            return Ok(());
        };
        if meta.note(CHECK_NOTES_REF, &head).await?.is_some() {
            return Ok(());
        }
        let opener = self.opener();
        let tree = meta.tree_of(&head).await?;
        for (path, def) in RepoAst::submodules_of(&tree) {
            let Some(pin) = def.commit else { continue };
            let reachable = match opener.peek(&path) {
                Some(handle) => handle.has_commit(&pin).await?,
                None => continue,
            };
            if !reachable {
                return Err(Error::Integrity(format!(
                    "submodule {path} pin {pin} is missing from its repository"
                )));
            }
        }
        meta.set_note(CHECK_NOTES_REF, &head, "ok").await?;
        Ok(())
    }

    /// Resolves a committish against the meta store.
    pub async fn resolve_commit(&self, committish: &str) -> Result<CommitId> {
        self.meta()
            .resolve(committish)
            .await?
            .ok_or_else(|| Error::user(format!("unknown committish {committish:?}")))
    }
}
