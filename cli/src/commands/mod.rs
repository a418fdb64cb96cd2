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

mod check;
mod cherry_pick;
mod checkout;
mod commit;
mod merge;
mod rebase;
mod refgc;
mod status;

use clap::Parser;
use clap::Subcommand;

use crate::command_error::CommandError;
use crate::ui::Ui;

#[derive(Parser, Clone, Debug)]
#[command(name = "mgt", version, about = "Version control across meta-repositories")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    Check(check::CheckArgs),
    CherryPick(cherry_pick::CherryPickArgs),
    Checkout(checkout::CheckoutArgs),
    Commit(commit::CommitArgs),
    Merge(merge::MergeArgs),
    Rebase(rebase::RebaseArgs),
    Refgc(refgc::RefGcArgs),
    Status(status::StatusArgs),
}

pub fn dispatch(ui: &mut Ui, cli: &Cli) -> Result<(), CommandError> {
    match &cli.command {
        Command::Check(args) => check::cmd_check(ui, args),
        Command::CherryPick(args) => cherry_pick::cmd_cherry_pick(ui, args),
        Command::Checkout(args) => checkout::cmd_checkout(ui, args),
        Command::Commit(args) => commit::cmd_commit(ui, args),
        Command::Merge(args) => merge::cmd_merge(ui, args),
        Command::Rebase(args) => rebase::cmd_rebase(ui, args),
        Command::Refgc(args) => refgc::cmd_refgc(ui, args),
        Command::Status(args) => status::cmd_status(ui, args),
    }
}
