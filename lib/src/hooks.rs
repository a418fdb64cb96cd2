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

//! Invocation of external hook programs.
//!
//! Hooks are executables in the meta-repo's `hooks/` directory, spawned with
//! the meta workdir as their working directory. Failures are logged and
//! swallowed; hooks never fail an operation, and none is invoked on error
//! paths.

use std::path::PathBuf;
use std::process::Command;

pub struct HookRunner {
    hooks_dir: Option<PathBuf>,
    workdir: Option<PathBuf>,
}

impl HookRunner {
    pub fn new(hooks_dir: PathBuf, workdir: PathBuf) -> Self {
        HookRunner {
            hooks_dir: Some(hooks_dir),
            workdir: Some(workdir),
        }
    }

    /// A runner that invokes nothing, for repositories with no hooks
    /// directory.
    pub fn disabled() -> Self {
        HookRunner {
            hooks_dir: None,
            workdir: None,
        }
    }

    pub fn run(&self, name: &str, args: &[&str]) {
        let Some(hooks_dir) = &self.hooks_dir else {
            return;
        };
        let program = hooks_dir.join(name);
        if !program.is_file() {
            return;
        }
        let mut command = Command::new(&program);
        command.args(args);
        if let Some(workdir) = &self.workdir {
            command.current_dir(workdir);
        }
        match command.status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(hook = name, ?status, "hook exited with failure");
            }
            Err(err) => {
                tracing::warn!(hook = name, %err, "failed to invoke hook");
            }
        }
    }

    pub fn post_merge(&self, squash: bool) {
        self.run("post-merge", &[if squash { "1" } else { "0" }]);
    }

    pub fn post_checkout(&self, old_head: &str, new_head: &str) {
        self.run("post-checkout", &[old_head, new_head, "1"]);
    }

    pub fn post_rewrite(&self) {
        self.run("post-rewrite", &["rebase"]);
    }
}
