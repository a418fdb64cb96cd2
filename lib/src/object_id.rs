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

//! Content-addressed object ids.

use std::fmt;
use std::fmt::Debug;
use std::fmt::Formatter;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

/// Number of raw bytes in a commit id (BLAKE2b-512 truncated).
pub const COMMIT_ID_LENGTH: usize = 32;

/// Identifier of a commit in a content-addressed store.
///
/// Ids are compared and ordered by their raw bytes, which keeps map
/// iteration deterministic across runs. The JSON encoding is the lowercase
/// hex string so ids can be used as object keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(Vec<u8>);

#[derive(Debug, Error)]
#[error("invalid commit id: {reason}")]
pub struct InvalidCommitId {
    pub reason: String,
}

impl CommitId {
    pub fn new(bytes: Vec<u8>) -> Self {
        CommitId(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, InvalidCommitId> {
        let bytes = hex::decode(hex_str).map_err(|err| InvalidCommitId {
            reason: err.to_string(),
        })?;
        Ok(CommitId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Abbreviated hex form for user-facing messages.
    pub fn short_hex(&self) -> String {
        let full = self.hex();
        full[..full.len().min(12)].to_string()
    }

    /// Whether `candidate` is a hex prefix of this id. Matching is on whole
    /// hex digits, case-insensitive.
    pub fn matches_hex_prefix(&self, candidate: &str) -> bool {
        !candidate.is_empty() && self.hex().starts_with(&candidate.to_ascii_lowercase())
    }
}

impl Debug for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.hex())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        CommitId::from_hex(&hex_str).map_err(de::Error::custom)
    }
}
