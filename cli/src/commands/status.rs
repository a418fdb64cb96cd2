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

use mgt_lib::status;
use mgt_lib::status::FileStatus;
use mgt_lib::status::Relation;
use mgt_lib::status::RepoStatus;
use mgt_lib::status::StatusOptions;
use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Show the combined status of the meta-repo and its open sub-repos
#[derive(clap::Args, Clone, Debug)]
pub struct StatusArgs {
    /// Restrict the report to the given paths
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,
    /// List every untracked file instead of rolling up untracked directories
    #[arg(long)]
    all_untracked: bool,
}

pub fn cmd_status(ui: &mut Ui, args: &StatusArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    let store = workspace.meta();
    let opener = workspace.opener();
    let options = StatusOptions {
        show_meta_changes: true,
        show_all_untracked: args.all_untracked,
        ignore_index: false,
        paths: cli_util::parse_paths(&args.paths)?,
    };
    let repo_status = status::repo_status(&store, &opener, &options).block_on()?;
    render_status(ui, &repo_status);
    Ok(())
}

fn render_status(ui: &mut Ui, repo_status: &RepoStatus) {
    match (&repo_status.current_branch, &repo_status.head) {
        (Some(branch), _) => ui.writeln(&format!("On branch {branch}")),
        (None, Some(head)) => {
            ui.writeln(&format!("HEAD detached at {}", head.short_hex()));
        }
        (None, None) => ui.writeln("No commits yet"),
    }
    if let Some(state) = &repo_status.sequencer {
        let banner = format!(
            "A {} is in progress (step {} of {}); continue or abort it.",
            state.kind.command_name(),
            state.current + 1,
            state.commits.len().max(1),
        );
        ui.writeln(&ui.yellow(&banner));
    }

    let mut clean = true;
    if !repo_status.staged.is_empty() {
        clean = false;
        ui.writeln("");
        ui.writeln("Changes to be committed:");
        for (path, file_status) in &repo_status.staged {
            let line = format!("  {}: {path}", status_word(*file_status));
            if *file_status == FileStatus::Conflicted {
                ui.writeln(&ui.red(&line));
            } else {
                ui.writeln(&ui.green(&line));
            }
        }
    }
    if !repo_status.workdir.is_empty() {
        clean = false;
        ui.writeln("");
        ui.writeln("Changes not staged for commit:");
        for (path, file_status) in &repo_status.workdir {
            let suffix = if repo_status.untracked_dirs.contains(path) {
                "/"
            } else {
                ""
            };
            let line = format!("  {}: {path}{suffix}", status_word(*file_status));
            ui.writeln(&ui.red(&line));
        }
    }

    let interesting: Vec<_> = repo_status
        .submodules
        .iter()
        .filter(|(_, sub)| !is_boring_sub(sub))
        .collect();
    if !interesting.is_empty() {
        clean = false;
        ui.writeln("");
        ui.writeln("Submodules:");
        for (path, sub) in interesting {
            render_submodule(ui, path.as_str(), sub);
        }
    }

    if clean {
        ui.writeln("nothing to commit, working tree clean");
    }
}

fn is_boring_sub(sub: &status::SubmoduleStatus) -> bool {
    let index_same = sub
        .index
        .as_ref()
        .is_some_and(|index| index.relation == Relation::Same);
    let workdir_quiet = sub.workdir.as_ref().map_or(true, |wd| {
        wd.relation == Relation::Same && wd.status.is_clean(true)
    });
    sub.commit.is_some() && index_same && workdir_quiet
}

fn render_submodule(ui: &mut Ui, path: &str, sub: &status::SubmoduleStatus) {
    let headline = match (&sub.commit, &sub.index) {
        (None, Some(index)) => format!("  {path}: added ({})", index.url),
        (Some(_), None) => format!("  {path}: removed"),
        (Some(_), Some(index)) => {
            let pin = index
                .sha
                .as_ref()
                .map(|sha| sha.short_hex())
                .unwrap_or_else(|| "unpinned".to_string());
            format!("  {path}: index at {pin} ({})", relation_word(index.relation))
        }
        (None, None) => format!("  {path}"),
    };
    ui.writeln(&ui.cyan(&headline));

    let Some(wd) = &sub.workdir else {
        return;
    };
    if sub.is_headless() {
        ui.writeln(&ui.red(&format!("    {path} is open but has no HEAD")));
        return;
    }
    if wd.relation != Relation::Same {
        ui.writeln(&format!(
            "    workdir is {} of the staged pin",
            relation_word(wd.relation)
        ));
    }
    for (inner, file_status) in &wd.status.staged {
        let line = format!("    staged {}: {path}/{inner}", status_word(*file_status));
        if *file_status == FileStatus::Conflicted {
            ui.writeln(&ui.red(&line));
        } else {
            ui.writeln(&ui.green(&line));
        }
    }
    for (inner, file_status) in &wd.status.workdir {
        let suffix = if wd.status.untracked_dirs.contains(inner) {
            "/"
        } else {
            ""
        };
        let line = format!("    {}: {path}/{inner}{suffix}", status_word(*file_status));
        ui.writeln(&ui.red(&line));
    }
}

fn status_word(file_status: FileStatus) -> &'static str {
    match file_status {
        FileStatus::Added => "added",
        FileStatus::Modified => "modified",
        FileStatus::Removed => "removed",
        FileStatus::Renamed => "renamed",
        FileStatus::TypeChanged => "type-changed",
        FileStatus::Conflicted => "conflicted",
    }
}

fn relation_word(relation: Relation) -> &'static str {
    match relation {
        Relation::Same => "same",
        Relation::Ahead => "ahead",
        Relation::Behind => "behind",
        Relation::Unrelated => "unrelated",
        Relation::Unknown => "unknown",
    }
}
