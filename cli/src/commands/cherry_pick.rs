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

/// Apply existing commits on top of the current HEAD
#[derive(clap::Args, Clone, Debug)]
pub struct CherryPickArgs {
    /// The commits to apply, in order
    #[arg(value_name = "COMMIT", required_unless_present_any = ["continue_", "abort"])]
    commits: Vec<String>,
    /// Resume the cherry-pick after resolving conflicts
    #[arg(long = "continue", group = "operation", conflicts_with = "commits")]
    continue_: bool,
    /// Abandon the cherry-pick in progress
    #[arg(long, group = "operation", conflicts_with = "commits")]
    abort: bool,
}

#[tracing::instrument(skip(ui))]
pub fn cmd_cherry_pick(ui: &mut Ui, args: &CherryPickArgs) -> Result<(), CommandError> {
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
        ui.writeln("Cherry-pick aborted.");
        return Ok(());
    }

    let outcome = if args.continue_ {
        sequencer::continue_op(&ctx).block_on()
    } else {
        let commits = args
            .commits
            .iter()
            .map(|committish| {
                workspace
                    .resolve_commit(committish)
                    .block_on()
                    .map_err(CommandError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        sequencer::cherry_pick(&ctx, &commits).block_on()
    };
    let result = cli_util::conclude_sequencer(&workspace, outcome)?;

    match &result.meta_commit {
        Some(id) => ui.writeln(&format!("Cherry-picked; HEAD is now {}", id.short_hex())),
        None => ui.writeln("Nothing to apply."),
    }
    Ok(())
}
