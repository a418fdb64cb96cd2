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

use mgt_lib::sequencer;
use mgt_lib::sequencer::SequencerContext;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Replay the current branch's commits onto another commit
#[derive(clap::Args, Clone, Debug)]
pub struct RebaseArgs {
    /// The commit to rebase onto
    #[arg(value_name = "ONTO", required_unless_present_any = ["continue_", "abort"])]
    onto: Option<String>,
    /// Resume the rebase after resolving conflicts
    #[arg(long = "continue", group = "operation", conflicts_with = "onto")]
    continue_: bool,
    /// Abandon the rebase in progress
    #[arg(long, group = "operation", conflicts_with = "onto")]
    abort: bool,
}

#[tracing::instrument(skip(ui))]
pub fn cmd_rebase(ui: &mut Ui, args: &RebaseArgs) -> Result<(), CommandError> {
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
        do_not_recurse: &[],
    };

    if args.abort {
        let outcome = sequencer::abort_op(&ctx).block_on();
        workspace.save()?;
        outcome?;
        ui.writeln("Rebase aborted.");
        return Ok(());
    }

    let outcome = if args.continue_ {
        sequencer::continue_op(&ctx).block_on()
    } else {
        let committish = args.onto.as_deref().expect("clap requires a target");
        let onto = cli_util::resolve_commit_and_ref(&workspace, committish)?;
        sequencer::rebase(&ctx, &onto).block_on()
    };
    let result = cli_util::conclude_sequencer(&workspace, outcome)?;

    match &result.meta_commit {
        Some(id) => ui.writeln(&format!("Rebased; HEAD is now {}", id.short_hex())),
        None => ui.writeln("Already up to date."),
    }
    Ok(())
}
