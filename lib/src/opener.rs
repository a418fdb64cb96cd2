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

//! Memoized factory for sub-repository handles.
//!
//! One `Opener` lives for the duration of a single logical operation; its
//! handles are released when it is dropped. A sub-repo is *visible* when it
//! is materialized locally (its store can answer ancestry questions) and
//! *open* when its working copy is checked out.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::repo_path::RepoPathBuf;
use crate::store::ObjectStore;

pub struct Opener {
    available: BTreeMap<RepoPathBuf, Arc<dyn ObjectStore>>,
    open_paths: BTreeSet<RepoPathBuf>,
    opened: Mutex<BTreeMap<RepoPathBuf, Arc<dyn ObjectStore>>>,
}

impl Opener {
    pub fn new(
        available: BTreeMap<RepoPathBuf, Arc<dyn ObjectStore>>,
        open_paths: BTreeSet<RepoPathBuf>,
    ) -> Self {
        Opener {
            available,
            open_paths,
            opened: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_open(&self, path: &RepoPathBuf) -> bool {
        self.open_paths.contains(path)
    }

    pub fn is_visible(&self, path: &RepoPathBuf) -> bool {
        self.available.contains_key(path)
    }

    /// The handle for an open sub-repo, memoized per path. `None` when the
    /// sub is closed.
    pub fn open(&self, path: &RepoPathBuf) -> Option<Arc<dyn ObjectStore>> {
        if !self.is_open(path) {
            return None;
        }
        let mut opened = self.opened.lock().unwrap();
        if let Some(handle) = opened.get(path) {
            return Some(handle.clone());
        }
        let handle = self.available.get(path)?.clone();
        opened.insert(path.clone(), handle.clone());
        Some(handle)
    }

    /// A handle for any visible sub-repo, open or closed. Closed handles may
    /// only be used for reads (ancestry, refs); their index is not theirs to
    /// mutate.
    pub fn peek(&self, path: &RepoPathBuf) -> Option<Arc<dyn ObjectStore>> {
        self.available.get(path).cloned()
    }

    /// Paths whose handles were actually materialized by this operation.
    pub fn opened_paths(&self) -> Vec<RepoPathBuf> {
        self.opened.lock().unwrap().keys().cloned().collect()
    }

    /// All locally materialized sub-repo paths, open or closed.
    pub fn visible_paths(&self) -> Vec<RepoPathBuf> {
        self.available.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use maplit::btreeset;

    use super::*;
    use crate::mem_store::MemoryStore;
    use crate::repo_ast::RepoAst;

    fn store() -> Arc<dyn ObjectStore> {
        Arc::new(MemoryStore::new(RepoAst::default()).unwrap())
    }

    #[test]
    fn test_open_is_memoized_and_respects_openness() {
        let open_path = RepoPathBuf::from_literal("open");
        let closed_path = RepoPathBuf::from_literal("closed");
        let opener = Opener::new(
            btreemap! {
                open_path.clone() => store(),
                closed_path.clone() => store(),
            },
            btreeset! { open_path.clone() },
        );

        assert!(opener.open(&open_path).is_some());
        assert!(opener.open(&closed_path).is_none());
        assert!(opener.peek(&closed_path).is_some());
        assert!(!opener.is_visible(&RepoPathBuf::from_literal("missing")));

        let first = opener.open(&open_path).unwrap();
        let second = opener.open(&open_path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opener.opened_paths(), vec![open_path]);
    }
}
