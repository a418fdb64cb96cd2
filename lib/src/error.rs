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

//! Engine-level error taxonomy.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the engines.
///
/// `User` and `Conflict` are recoverable and user-visible; `Integrity` means
/// an object or required reference is missing and the current operation must
/// stop (persisted state is left in place so the user can retry or abort);
/// `Internal` means a broken invariant.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    User(String),
    /// A conflict rendering that leaves sequencer state in place.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Integrity(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn user(message: impl Into<String>) -> Error {
        Error::User(message.into())
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::User(_) | Error::Conflict(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Error {
        match err {
            StoreError::ObjectNotFound(_) | StoreError::RefNotFound(_) => {
                Error::Integrity(err.to_string())
            }
            StoreError::Invalid(_) => Error::Internal(err.to_string()),
            StoreError::State(_) | StoreError::Path(_) => Error::Integrity(err.to_string()),
        }
    }
}
