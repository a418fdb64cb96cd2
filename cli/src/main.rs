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

mod cli_util;
mod command_error;
mod commands;
mod editor;
mod ui;

use std::process::ExitCode;

use clap::Parser as _;
use tracing_subscriber::EnvFilter;

use crate::ui::Ui;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("MGT_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = commands::Cli::parse();
    let mut ui = Ui::new();
    match commands::dispatch(&mut ui, &cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui.error(&err.message);
            ExitCode::from(err.exit_code())
        }
    }
}
