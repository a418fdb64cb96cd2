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

use std::fs;
use std::path::PathBuf;

use mgt_lib::sequencer;
use mgt_lib::sequencer::MergeMode;
use mgt_lib::sequencer::SequencerContext;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Merge a commit into the current branch, recursing into sub-repos
#[derive(clap::Args, Clone, Debug)]
pub struct MergeArgs {
    /// The commit to merge
    #[arg(value_name = "COMMIT", required_unless_present_any = ["continue_", "abort"])]
    commit: Option<String>,
    /// Fast-forward when possible (default)
    #[arg(long, group = "operation")]
    ff: bool,
    /// Refuse to merge unless a fast-forward is possible
    #[arg(long = "ff-only", group = "operation")]
    ff_only: bool,
    /// Always create a merge commit
    #[arg(long = "no-ff", group = "operation")]
    no_ff: bool,
    /// Resume the merge after resolving conflicts
    #[arg(long = "continue", group = "operation", conflicts_with = "commit")]
    continue_: bool,
    /// Abandon the merge in progress
    #[arg(long, group = "operation", conflicts_with = "commit")]
    abort: bool,
    /// Use the given message for the merge commit
    #[arg(long, short = 'm', value_name = "MSG", conflicts_with = "file")]
    message: Option<String>,
    /// Read the merge message from a file
    #[arg(long = "file", short = 'F', value_name = "FILE")]
    file: Option<PathBuf>,
    /// Surface conflicts under the prefix instead of recursing into the
    /// sub-repo (repeatable)
    #[arg(long = "do-not-recurse", value_name = "PREFIX")]
    do_not_recurse: Vec<String>,
}

#[tracing::instrument(skip(ui))]
pub fn cmd_merge(ui: &mut Ui, args: &MergeArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    let store = workspace.meta();
    let opener = workspace.opener();
    let hooks = workspace.hooks();
    let sig = cli_util::default_signature();
    let ctx = SequencerContext {
        store: &store,
        opener: &opener,
        hooks: &hooks,
        sig: &sig,
        do_not_recurse: &args.do_not_recurse,
    };

    if args.abort {
        let outcome = sequencer::abort_op(&ctx).block_on();
        workspace.save()?;
        outcome?;
        ui.writeln("Merge aborted.");
        return Ok(());
    }

    let outcome = if args.continue_ {
        sequencer::continue_op(&ctx).block_on()
    } else {
        let committish = args.commit.as_deref().expect("clap requires a commit");
        let target = cli_util::resolve_commit_and_ref(&workspace, committish)?;
        let mode = if args.ff_only {
            MergeMode::FfOnly
        } else if args.no_ff {
            MergeMode::ForceCommit
        } else {
            MergeMode::Normal
        };
        let message = read_message(args)?;
        sequencer::merge(&ctx, &target, mode, message.as_deref()).block_on()
    };
    let result = cli_util::conclude_sequencer(&workspace, outcome)?;

    match &result.meta_commit {
        Some(id) => ui.writeln(&format!("Merged; HEAD is now {}", id.short_hex())),
        None => ui.writeln("Already up to date."),
    }
    for (path, id) in &result.submodule_commits {
        ui.writeln(&format!("  merged {path} at {}", id.short_hex()));
    }
    Ok(())
}

fn read_message(args: &MergeArgs) -> Result<Option<String>, CommandError> {
    if let Some(message) = &args.message {
        return Ok(Some(message.clone()));
    }
    if let Some(path) = &args.file {
        let content = fs::read_to_string(path).map_err(|err| {
            CommandError::user(format!("cannot read message file {}: {err}", path.display()))
        })?;
        return Ok(Some(content.trim_end().to_string()));
    }
    Ok(None)
}
