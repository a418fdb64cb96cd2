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

use mgt_lib::repo_ast::RepoAst;
use mgt_lib::status;
use mgt_lib::status::StatusOptions;
use mgt_lib::store::ResetMode;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Check out a branch or commit, updating every open sub-repo to its pin
#[derive(clap::Args, Clone, Debug)]
pub struct CheckoutArgs {
    /// The branch or commit to check out
    #[arg(value_name = "COMMITTISH")]
    committish: String,
}

pub fn cmd_checkout(ui: &mut Ui, args: &CheckoutArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    let store = workspace.meta();
    let opener = workspace.opener();
    let hooks = workspace.hooks();

    let repo_status = status::repo_status(&store, &opener, &StatusOptions::default()).block_on()?;
    if !status::is_deep_clean(&repo_status, true) {
        return Err(CommandError::user(
            "cannot checkout: the repository has uncommitted changes",
        ));
    }

    let old_head = store.head().block_on()?;
    let target = workspace.resolve_commit(&args.committish).block_on()?;
    let is_branch = store
        .branches()
        .block_on()?
        .contains_key(args.committish.as_str());
    if is_branch {
        store.checkout_branch(&args.committish).block_on()?;
    } else {
        store.checkout_detached(&target).block_on()?;
    }

    // Move every open sub onto the pins of the new tree.
    let new_head = store.head().block_on()?.expect("checkout set HEAD");
    let tree = store.tree_of(&new_head).block_on()?;
    for (path, def) in RepoAst::submodules_of(&tree) {
        let (Some(handle), Some(pin)) = (opener.open(&path), def.commit) else {
            continue;
        };
        if handle.has_commit(&pin).block_on()? {
            handle.reset(&pin, ResetMode::Hard).block_on()?;
        } else {
            workspace.save()?;
            return Err(CommandError::user(format!(
                "submodule {path} pin {pin} is not present locally"
            )));
        }
    }

    workspace.save()?;
    let old = old_head
        .map(|id| id.hex())
        .unwrap_or_else(|| "0".repeat(64));
    hooks.post_checkout(&old, &new_head.hex());

    if is_branch {
        ui.writeln(&format!("Switched to branch {}", args.committish));
    } else {
        ui.writeln(&format!("HEAD is now at {}", new_head.short_hex()));
    }
    Ok(())
}
