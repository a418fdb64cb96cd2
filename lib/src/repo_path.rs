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

//! Slash-separated repository paths.
//!
//! Paths are stored in normalized form: no leading or trailing `/`, no empty
//! segments, no `.` or `..` components. Prefix matching respects segment
//! boundaries, so `"sub"` is a prefix of `"sub/x"` but not of `"subx"`.

use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid repository path {path:?}: {reason}")]
pub struct InvalidRepoPath {
    pub path: String,
    pub reason: &'static str,
}

/// An owned, normalized repository path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoPathBuf(String);

impl RepoPathBuf {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidRepoPath> {
        let value = value.into();
        let invalid = |reason| InvalidRepoPath {
            path: value.clone(),
            reason,
        };
        if value.is_empty() {
            return Err(invalid("path must not be empty"));
        }
        if value.starts_with('/') || value.ends_with('/') {
            return Err(invalid("path must not start or end with '/'"));
        }
        for segment in value.split('/') {
            match segment {
                "" => return Err(invalid("path must not contain empty segments")),
                "." | ".." => return Err(invalid("path must not contain '.' or '..'")),
                _ => {}
            }
        }
        Ok(RepoPathBuf(value))
    }

    /// Builds a path from a trusted literal. Panics on malformed input, so
    /// only use this with constants.
    pub fn from_literal(value: &str) -> Self {
        Self::new(value).expect("literal repository path must be valid")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/')
    }

    pub fn join(&self, segment: &str) -> Result<RepoPathBuf, InvalidRepoPath> {
        RepoPathBuf::new(format!("{}/{}", self.0, segment))
    }

    pub fn parent(&self) -> Option<RepoPathBuf> {
        let (parent, _) = self.0.rsplit_once('/')?;
        Some(RepoPathBuf(parent.to_string()))
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap()
    }

    /// Whether `self` equals `prefix` or lives under it. Matches on whole
    /// segments only.
    pub fn starts_with(&self, prefix: &RepoPathBuf) -> bool {
        self.starts_with_str(prefix.as_str())
    }

    /// Segment-boundary prefix match against a raw string. A trailing `/` on
    /// the prefix is trimmed first, so caller-supplied filters like `sub/`
    /// behave as expected.
    pub fn starts_with_str(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match self.0.strip_prefix(prefix) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Strips a segment-boundary prefix, yielding the remainder.
    pub fn strip_prefix(&self, prefix: &RepoPathBuf) -> Option<RepoPathBuf> {
        let rest = self.0.strip_prefix(prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        Some(RepoPathBuf(rest.to_string()))
    }

    /// Joins a sub-repo path onto its prefix, for rolling sub statuses up
    /// into the meta namespace.
    pub fn concat(&self, suffix: &RepoPathBuf) -> RepoPathBuf {
        RepoPathBuf(format!("{}/{}", self.0, suffix.0))
    }

    /// The first segment of the path.
    pub fn top_level(&self) -> RepoPathBuf {
        RepoPathBuf(self.components().next().unwrap().to_string())
    }

    /// Whether the path matches any of the given filters (empty filter set
    /// matches everything).
    pub fn matches_filters(&self, filters: &[RepoPathBuf]) -> bool {
        filters.is_empty() || filters.iter().any(|f| self.starts_with(f) || f.starts_with(self))
    }
}

impl Display for RepoPathBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RepoPathBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
