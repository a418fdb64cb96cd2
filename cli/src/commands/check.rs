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

use pollster::FutureExt as _;

use crate::cli_util;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Verify that every sub-repo pin in the meta HEAD tree resolves locally
///
/// Successful checks are memoized per meta commit, so re-running is cheap.
#[derive(clap::Args, Clone, Debug)]
pub struct CheckArgs {}

pub fn cmd_check(ui: &mut Ui, _args: &CheckArgs) -> Result<(), CommandError> {
    let workspace = cli_util::load_workspace()?;
    workspace.check_subrepo_pins().block_on()?;
    workspace.save()?;
    ui.writeln("All sub-repo pins resolve.");
    Ok(())
}
