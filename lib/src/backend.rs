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

//! Value types shared by the store facade and the engines.
//!
//! Everything here is a plain value object: equality is structural and
//! mutation happens by building a modified copy. Commits reference each
//! other by [`CommitId`] only, never by owning the commit object.

use std::collections::BTreeMap;

use blake2::Blake2b512;
use digest::Digest;
use serde::Deserialize;
use serde::Serialize;

use crate::object_id::CommitId;
use crate::object_id::COMMIT_ID_LENGTH;
use crate::repo_path::RepoPathBuf;

/// A point in time with the author's UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub millis_since_epoch: i64,
    pub tz_offset_minutes: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

/// File content with its executable bit. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileContent {
    pub data: Vec<u8>,
    pub executable: bool,
}

impl FileContent {
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        FileContent {
            data: data.into(),
            executable: false,
        }
    }
}

/// A sub-repository pointer as stored in a meta tree entry. `commit` is
/// `None` for a sub that was added but not yet pinned to a commit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmoduleDef {
    pub url: String,
    pub commit: Option<CommitId>,
}

/// A resolved tree entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeValue {
    File(FileContent),
    Submodule(SubmoduleDef),
}

impl TreeValue {
    pub fn is_submodule(&self) -> bool {
        matches!(self, TreeValue::Submodule(_))
    }
}

/// One entry in a commit's change-map, relative to the left parent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Change {
    File(FileContent),
    Sub(SubmoduleDef),
    Removed,
}

impl Change {
    pub fn from_tree_value(value: Option<TreeValue>) -> Change {
        match value {
            Some(TreeValue::File(file)) => Change::File(file),
            Some(TreeValue::Submodule(def)) => Change::Sub(def),
            None => Change::Removed,
        }
    }

    pub fn to_tree_value(&self) -> Option<TreeValue> {
        match self {
            Change::File(file) => Some(TreeValue::File(file.clone())),
            Change::Sub(def) => Some(TreeValue::Submodule(def.clone())),
            Change::Removed => None,
        }
    }
}

/// A commit: ordered parents (first = left parent), a change-map relative to
/// the left parent, a message, and author/committer signatures. The id is a
/// content address over all of those.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub changes: BTreeMap<RepoPathBuf, Change>,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

impl Commit {
    pub fn left_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// The content address of this commit.
    pub fn id(&self) -> CommitId {
        let mut hasher = Blake2b512::new();
        hasher.update(b"commit\0");
        hasher.update((self.parents.len() as u64).to_le_bytes());
        for parent in &self.parents {
            hasher.update(parent.as_bytes());
            hasher.update(b"\0");
        }
        for (path, change) in &self.changes {
            hasher.update(path.as_str().as_bytes());
            hasher.update(b"\0");
            match change {
                Change::File(file) => {
                    hasher.update(b"f");
                    hasher.update([file.executable as u8]);
                    hasher.update((file.data.len() as u64).to_le_bytes());
                    hasher.update(&file.data);
                }
                Change::Sub(def) => {
                    hasher.update(b"s");
                    hasher.update(def.url.as_bytes());
                    hasher.update(b"\0");
                    if let Some(id) = &def.commit {
                        hasher.update(id.as_bytes());
                    }
                }
                Change::Removed => {
                    hasher.update(b"r");
                }
            }
            hasher.update(b"\0");
        }
        hasher.update(self.message.as_bytes());
        hasher.update(b"\0");
        for sig in [&self.author, &self.committer] {
            hasher.update(sig.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(sig.email.as_bytes());
            hasher.update(b"\0");
            hasher.update(sig.timestamp.millis_since_epoch.to_le_bytes());
            hasher.update(sig.timestamp.tz_offset_minutes.to_le_bytes());
        }
        CommitId::new(hasher.finalize()[..COMMIT_ID_LENGTH].to_vec())
    }

    /// The fields that must agree between repositories for an amend to be
    /// applied uniformly.
    pub fn meta_data(&self) -> CommitMetaData {
        CommitMetaData {
            name: self.author.name.clone(),
            email: self.author.email.clone(),
            message: self.message.clone(),
        }
    }
}

/// Signature identity and message, used for amend-equivalence checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetaData {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// An unresolved three-way entry. At least two sides must differ from the
/// ancestor; sides compare structurally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub ancestor: Option<TreeValue>,
    pub ours: Option<TreeValue>,
    pub theirs: Option<TreeValue>,
}

impl Conflict {
    /// A conflict where fewer than two sides differ from the ancestor would
    /// have been resolvable, so it must never be constructed.
    pub fn is_well_formed(&self) -> bool {
        (self.ours != self.ancestor) && (self.theirs != self.ancestor)
    }
}

/// A commit with the ref name it was resolved from, if any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAndRef {
    pub sha: CommitId,
    pub ref_name: Option<String>,
}

/// A named branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub target: CommitId,
    pub tracking: Option<String>,
}

/// A named remote with the branches it is known to carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub url: String,
    pub branches: BTreeMap<String, CommitId>,
}

/// Applies a change-map on top of a resolved tree. Non-removal changes
/// right-bias (later wins) and `Removed` drops the entry, so folding two
/// deltas one after the other equals folding their merge.
pub fn accumulate_changes(
    tree: &BTreeMap<RepoPathBuf, TreeValue>,
    changes: &BTreeMap<RepoPathBuf, Change>,
) -> BTreeMap<RepoPathBuf, TreeValue> {
    let mut result = tree.clone();
    for (path, change) in changes {
        match change.to_tree_value() {
            Some(value) => {
                result.insert(path.clone(), value);
            }
            None => {
                result.remove(path);
            }
        }
    }
    result
}

/// Right-biased merge of two change-maps, matching the semantics of applying
/// them in sequence.
pub fn merge_changes(
    first: &BTreeMap<RepoPathBuf, Change>,
    second: &BTreeMap<RepoPathBuf, Change>,
) -> BTreeMap<RepoPathBuf, Change> {
    let mut result = first.clone();
    for (path, change) in second {
        result.insert(path.clone(), change.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

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

    #[test]
    fn test_commit_id_is_stable_and_distinguishing() {
        let commit = Commit {
            parents: vec![],
            changes: btreemap! {
                RepoPathBuf::from_literal("a") => Change::File(FileContent::text("x")),
            },
            message: "m".to_string(),
            author: sig(),
            committer: sig(),
        };
        assert_eq!(commit.id(), commit.id());

        let mut other = commit.clone();
        other.message = "n".to_string();
        assert_ne!(commit.id(), other.id());
    }

    #[test]
    fn test_conflict_well_formedness() {
        let file = |s: &str| Some(TreeValue::File(FileContent::text(s)));
        let ok = Conflict {
            ancestor: file("a"),
            ours: file("b"),
            theirs: file("c"),
        };
        assert!(ok.is_well_formed());
        let bad = Conflict {
            ancestor: file("a"),
            ours: file("a"),
            theirs: file("c"),
        };
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_accumulate_changes_composes() {
        let tree = btreemap! {
            RepoPathBuf::from_literal("keep") => TreeValue::File(FileContent::text("k")),
            RepoPathBuf::from_literal("gone") => TreeValue::File(FileContent::text("g")),
        };
        let first = btreemap! {
            RepoPathBuf::from_literal("gone") => Change::Removed,
            RepoPathBuf::from_literal("new") => Change::File(FileContent::text("1")),
        };
        let second = btreemap! {
            RepoPathBuf::from_literal("new") => Change::File(FileContent::text("2")),
        };
        let sequential = accumulate_changes(&accumulate_changes(&tree, &first), &second);
        let merged = accumulate_changes(&tree, &merge_changes(&first, &second));
        assert_eq!(sequential, merged);
        assert!(!sequential.contains_key(&RepoPathBuf::from_literal("gone")));
    }
}
