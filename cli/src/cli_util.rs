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

//! Command-side plumbing shared by all subcommands.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use mgt_lib::backend::CommitAndRef;
use mgt_lib::backend::Signature;
use mgt_lib::backend::Timestamp;
use mgt_lib::repo_path::RepoPathBuf;
use mgt_lib::workspace::Workspace;
use pollster::FutureExt as _;

use crate::command_error::CommandError;

/// Loads the workspace containing the current directory.
pub fn load_workspace() -> Result<Workspace, CommandError> {
    let cwd = std::env::current_dir()?;
    Ok(Workspace::discover(&cwd)?)
}

/// The signature used for commits created by this invocation. Overridable
/// through `MGT_USER` / `MGT_EMAIL`, mainly for tests.
pub fn default_signature() -> Signature {
    let name = std::env::var("MGT_USER").unwrap_or_else(|_| whoami::realname());
    let email = std::env::var("MGT_EMAIL")
        .unwrap_or_else(|_| format!("{}@local", whoami::username()));
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    Signature {
        name,
        email,
        timestamp: Timestamp {
            millis_since_epoch: millis,
            tz_offset_minutes: 0,
        },
    }
}

/// Parses user-supplied path arguments.
pub fn parse_paths(raw: &[String]) -> Result<Vec<RepoPathBuf>, CommandError> {
    raw.iter()
        .map(|value| {
            RepoPathBuf::new(value.trim_end_matches('/'))
                .map_err(|err| CommandError::user(err.to_string()))
        })
        .collect()
}

/// Persists the workspace and turns a sequencer outcome into the command
/// result: conflict outcomes become user errors after the state is saved.
pub fn conclude_sequencer(
    workspace: &Workspace,
    outcome: mgt_lib::error::Result<mgt_lib::sequencer::OpResult>,
) -> Result<mgt_lib::sequencer::OpResult, CommandError> {
    // Mutations must reach disk even when the operation stopped on an
    // error, so the persisted sequencer state stays usable.
    let saved = workspace.save();
    let result = outcome.map_err(CommandError::from)?;
    saved?;
    if let Some(message) = &result.error_message {
        return Err(CommandError::user(message.clone()));
    }
    Ok(result)
}

/// Resolves a committish, keeping the ref name when the input named a
/// branch.
pub fn resolve_commit_and_ref(
    workspace: &Workspace,
    committish: &str,
) -> Result<CommitAndRef, CommandError> {
    let sha = workspace.resolve_commit(committish).block_on()?;
    let is_branch = workspace
        .meta()
        .branches()
        .block_on()?
        .contains_key(committish);
    Ok(CommitAndRef {
        sha,
        ref_name: is_branch.then(|| committish.to_string()),
    })
}
