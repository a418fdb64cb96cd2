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

//! Shim that runs the user's editor on a seeded temporary buffer.

use std::fs;
use std::process::Command;

use crate::command_error::CommandError;

fn editor_command() -> String {
    for var in ["MGT_EDITOR", "VISUAL", "EDITOR"] {
        if let Some(value) = std::env::var_os(var) {
            let value = value.to_string_lossy().into_owned();
            if !value.is_empty() {
                return value;
            }
        }
    }
    "vi".to_string()
}

/// Writes `seed` to a temporary file, opens the editor on it, and returns
/// the edited content.
pub fn edit_text(seed: &str) -> Result<String, CommandError> {
    let temp_file = tempfile::Builder::new()
        .prefix("mgt-editor-")
        .suffix(".txt")
        .tempfile()?;
    fs::write(temp_file.path(), seed)?;

    let editor = editor_command();
    let mut words = editor.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| CommandError::user("configured editor is empty"))?;
    let status = Command::new(program)
        .args(words)
        .arg(temp_file.path())
        .status()
        .map_err(|err| CommandError::user(format!("failed to run editor {editor:?}: {err}")))?;
    if !status.success() {
        return Err(CommandError::user(format!(
            "editor {editor:?} exited with {status}"
        )));
    }
    Ok(fs::read_to_string(temp_file.path())?)
}
