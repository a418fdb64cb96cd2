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

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use mgt_lib::synthetic_gc;
use mgt_lib::synthetic_gc::GcAction;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Reclaim synthetic sub-repo references no longer needed for reachability
///
/// Without `--force` this only prints the refs it would remove.
#[derive(clap::Args, Clone, Debug)]
pub struct RefGcArgs {
    /// Meta refs whose reachable history keeps pins alive (default:
    /// refs/heads/master; repeatable)
    #[arg(long = "root-ref", value_name = "REF")]
    root_refs: Vec<String>,
    /// Actually remove the refs instead of simulating
    #[arg(long)]
    force: bool,
    /// Also remove refs that no kept history pins and whose commits are
    /// older than the given number of days
    #[arg(long, value_name = "DAYS")]
    remove_older_than: Option<i64>,
}

pub fn cmd_refgc(ui: &mut Ui, args: &RefGcArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    let store = workspace.meta();
    let opener = workspace.opener();
    let simulate = !args.force;

    let root_refs: Vec<String> = if args.root_refs.is_empty() {
        synthetic_gc::DEFAULT_ROOT_REFS
            .iter()
            .map(|name| name.to_string())
            .collect()
    } else {
        args.root_refs.clone()
    };
    let roots = synthetic_gc::populate_roots(&store, &root_refs).block_on()?;

    let redundant =
        synthetic_gc::remove_redundant(&opener, &roots, &|_| true, simulate).block_on()?;
    render_actions(ui, &redundant, simulate, "redundant");

    if let Some(days) = args.remove_older_than {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        let cutoff = now - days * MILLIS_PER_DAY;
        let old = synthetic_gc::remove_old(
            &opener,
            &roots,
            &|commit| commit.committer.timestamp.millis_since_epoch < cutoff,
            simulate,
        )
        .block_on()?;
        render_actions(ui, &old, simulate, "old");
    }

    if !simulate {
        workspace.save()?;
    } else {
        ui.writeln("Simulation only; pass --force to remove the refs.");
    }
    Ok(())
}

fn render_actions(ui: &mut Ui, actions: &[GcAction], simulate: bool, why: &str) {
    let verb = if simulate { "would remove" } else { "removed" };
    for action in actions {
        ui.writeln(&format!(
            "{verb} {why} ref refs/commits/{} in {}",
            action.sha.hex(),
            action.sub_path
        ));
    }
}
