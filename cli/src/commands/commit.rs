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

use std::collections::BTreeMap;

use itertools::Itertools as _;
use mgt_lib::commit_engine;
use mgt_lib::commit_engine::CommitResult;
use mgt_lib::split_message;
use mgt_lib::status;
use mgt_lib::status::StatusOptions;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::editor;
use crate::ui::Ui;

/// Commit changes across the meta-repo and its open sub-repos
#[derive(clap::Args, Clone, Debug)]
pub struct CommitArgs {
    /// Automatically stage modified and deleted tracked files
    #[arg(long, short = 'a')]
    all: bool,
    /// Use the given commit message
    #[arg(long, short = 'm', value_name = "MSG")]
    message: Option<String>,
    /// Include meta-repo file changes in the commit
    #[arg(long)]
    meta: bool,
    /// Rewrite the most recent commit in each affected repository
    #[arg(long)]
    amend: bool,
    /// Allow committing staged pin changes of closed submodules
    #[arg(long)]
    closed: bool,
    /// Edit one buffer with a separate message per repository
    #[arg(long, short = 'i')]
    interactive: bool,
    /// Restrict the commit to the given paths
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,
}

#[tracing::instrument(skip(ui))]
pub fn cmd_commit(ui: &mut Ui, args: &CommitArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    let store = workspace.meta();
    let opener = workspace.opener();
    let sig = cli_util::default_signature();

    let paths = cli_util::parse_paths(&args.paths)?;
    let options = StatusOptions {
        show_meta_changes: args.meta,
        show_all_untracked: false,
        ignore_index: false,
        paths: paths.clone(),
    };
    let repo_status = status::repo_status(&store, &opener, &options).block_on()?;

    if !args.closed {
        let closed = commit_engine::closed_subs_with_pin_changes(&repo_status);
        if !closed.is_empty() {
            return Err(CommandError::user(format!(
                "staged changes for closed submodules: {}; open them first or pass --closed",
                closed.iter().join(", ")
            )));
        }
    }

    let outcome = if !paths.is_empty() {
        let message = require_message(args, "path-restricted commit")?;
        commit_engine::commit_paths(&store, &opener, &repo_status, &message, &paths, &sig)
            .block_on()
    } else if args.amend {
        let sub_messages = if args.interactive {
            Some(edit_amend_messages(&store, &opener, &repo_status, args)?)
        } else {
            None
        };
        commit_engine::amend(
            &store,
            &opener,
            args.all,
            &repo_status,
            args.message.as_deref(),
            sub_messages.as_ref(),
            &sig,
        )
        .block_on()
    } else if args.interactive {
        let (meta_message, sub_messages) = edit_split_messages(&repo_status, args)?;
        if meta_message.is_none() && sub_messages.is_empty() {
            return Err(CommandError::user("empty commit message; aborting"));
        }
        commit_engine::commit(
            &store,
            &opener,
            args.all,
            &repo_status,
            meta_message.as_deref(),
            Some(&sub_messages),
            &sig,
        )
        .block_on()
    } else {
        if !commit_engine::should_commit(&repo_status, !args.meta, None) {
            ui.writeln("nothing to commit");
            return Ok(());
        }
        let message = require_message(args, "commit")?;
        commit_engine::commit(
            &store,
            &opener,
            args.all,
            &repo_status,
            Some(message.as_str()),
            None,
            &sig,
        )
        .block_on()
    };

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            workspace.save()?;
            return Err(err.into());
        }
    };
    workspace.save()?;
    render_result(ui, &result);
    Ok(())
}

fn require_message(args: &CommitArgs, what: &str) -> Result<String, CommandError> {
    if let Some(message) = &args.message {
        return Ok(message.clone());
    }
    let edited = editor::edit_text("")?;
    let message = edited
        .lines()
        .filter(|line| !line.starts_with('#'))
        .join("\n")
        .trim_end()
        .to_string();
    if message.is_empty() {
        return Err(CommandError::user(format!("empty {what} message; aborting")));
    }
    Ok(message)
}

/// Builds the split buffer for `-i`, runs the editor, and parses it back.
fn edit_split_messages(
    repo_status: &status::RepoStatus,
    args: &CommitArgs,
) -> Result<(Option<String>, BTreeMap<String, String>), CommandError> {
    let seed_message = args.message.clone().unwrap_or_default();
    let mut sub_seeds = BTreeMap::new();
    for (path, sub) in &repo_status.submodules {
        let Some(wd) = &sub.workdir else { continue };
        let dirty = !wd.status.staged.is_empty() || (args.all && !wd.status.workdir.is_empty());
        if dirty {
            sub_seeds.insert(path.as_str().to_string(), seed_message.clone());
        }
    }
    let buffer = split_message::format_split_commit_messages(&seed_message, &sub_seeds);
    let edited = editor::edit_text(&buffer)?;
    let parsed = split_message::parse_split_commit_messages(&edited)
        .map_err(|err| CommandError::user(err.to_string()))?;
    if parsed.meta.as_deref() == Some("") {
        return Err(CommandError::user("empty commit message; aborting"));
    }
    if let Some((name, _)) = parsed.subs.iter().find(|(_, message)| message.is_empty()) {
        return Err(CommandError::user(format!(
            "empty commit message for '{name}'; aborting"
        )));
    }
    Ok((parsed.meta, parsed.subs))
}

/// For `--amend -i`: seed the split buffer with each amendable repo's
/// current message so the user can adjust them per repository.
fn edit_amend_messages(
    store: &std::sync::Arc<dyn mgt_lib::store::ObjectStore>,
    opener: &mgt_lib::opener::Opener,
    repo_status: &status::RepoStatus,
    args: &CommitArgs,
) -> Result<BTreeMap<String, String>, CommandError> {
    let plan =
        commit_engine::amend_status(store, opener, repo_status, args.all).block_on()?;
    let mut sub_seeds = BTreeMap::new();
    for (path, (kind, meta_data)) in &plan.subs {
        if *kind == commit_engine::SubAmendKind::Amend {
            let seed = meta_data
                .as_ref()
                .map(|data| data.message.clone())
                .unwrap_or_default();
            sub_seeds.insert(path.as_str().to_string(), seed);
        }
    }
    let meta_seed = args
        .message
        .clone()
        .unwrap_or_else(|| plan.meta_data.message.clone());
    let buffer = split_message::format_split_commit_messages(&meta_seed, &sub_seeds);
    let edited = editor::edit_text(&buffer)?;
    let parsed = split_message::parse_split_commit_messages(&edited)
        .map_err(|err| CommandError::user(err.to_string()))?;
    Ok(parsed.subs)
}

fn render_result(ui: &mut Ui, result: &CommitResult) {
    for (path, id) in &result.submodule_commits {
        ui.writeln(&format!("Committed {} in {path}", id.short_hex()));
    }
    match &result.meta_commit {
        Some(id) => ui.writeln(&format!("Committed {} in the meta-repo", id.short_hex())),
        None => {
            if result.submodule_commits.is_empty() {
                ui.writeln("nothing to commit");
            }
        }
    }
}
