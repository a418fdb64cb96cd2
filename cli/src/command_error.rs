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

use std::io;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Recoverable, user-visible; exits 1.
    User,
    /// Implementation or environment failure; exits 255.
    Internal,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn user(message: impl Into<String>) -> Self {
        CommandError {
            kind: CommandErrorKind::User,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CommandError {
            kind: CommandErrorKind::Internal,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.kind {
            CommandErrorKind::User => 1,
            CommandErrorKind::Internal => 255,
        }
    }
}

impl From<mgt_lib::error::Error> for CommandError {
    fn from(err: mgt_lib::error::Error) -> Self {
        if err.is_user_error() {
            CommandError::user(err.to_string())
        } else {
            CommandError::internal(err.to_string())
        }
    }
}

impl From<io::Error> for CommandError {
    fn from(err: io::Error) -> Self {
        CommandError::internal(err.to_string())
    }
}

impl From<mgt_lib::store::StoreError> for CommandError {
    fn from(err: mgt_lib::store::StoreError) -> Self {
        CommandError::from(mgt_lib::error::Error::from(err))
    }
}
