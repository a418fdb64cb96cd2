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

use std::path::Path;
use std::process::Output;

use maplit::btreemap;
use mgt_lib::backend::Change;
use mgt_lib::repo_path::RepoPathBuf;
use testutils::file_change;
use testutils::path;
use testutils::TestRepo;
use testutils::TestWorkspace;

fn run_mgt(workspace_root: &Path, args: &[&str]) -> Output {
    std::process::Command::new(assert_cmd::cargo::cargo_bin("mgt"))
        .args(args)
        .current_dir(workspace_root)
        .env("MGT_USER", "Test User")
        .env("MGT_EMAIL", "test.user@example.com")
        .env("MGT_EDITOR", "true")
        .output()
        .expect("failed to run mgt")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn workspace_with_staged_file() -> TestWorkspace {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("base.txt") => file_change("base") },
        "init",
    );
    meta.ast
        .index
        .staged
        .insert(path("a.txt"), file_change("content"));
    TestWorkspace::init(meta.ast, Default::default())
}

#[test]
fn test_status_reports_staged_changes() {
    let ws = workspace_with_staged_file();
    let output = run_mgt(ws.dir.path(), &["status"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("On branch master"), "{text}");
    assert!(text.contains("Changes to be committed:"), "{text}");
    assert!(text.contains("added: a.txt"), "{text}");
}

#[test]
fn test_commit_then_status_is_clean() {
    let ws = workspace_with_staged_file();
    let output = run_mgt(ws.dir.path(), &["commit", "--meta", "-m", "add a"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Committed"), "{}", stdout(&output));

    let output = run_mgt(ws.dir.path(), &["status"]);
    assert!(output.status.success());
    assert!(
        stdout(&output).contains("nothing to commit, working tree clean"),
        "{}",
        stdout(&output)
    );
}

#[test]
fn test_commit_without_changes_is_a_noop() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("base.txt") => file_change("base") },
        "init",
    );
    let ws = TestWorkspace::init(meta.ast, Default::default());
    let output = run_mgt(ws.dir.path(), &["commit", "--meta", "-m", "nothing"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("nothing to commit"));
}

#[test]
fn test_merge_fast_forward_and_exit_codes() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("a") },
        "init",
    );
    let m1 = meta.ast.branches["master"].target.clone();
    let m2 = meta.commit(
        &[&m1],
        btreemap! { path("b.txt") => file_change("b") },
        "feature",
    );
    meta.set_branch("feature", &m2);
    meta.checkout("master");
    let ws = TestWorkspace::init(meta.ast, Default::default());

    let output = run_mgt(ws.dir.path(), &["merge", "feature"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Merged; HEAD is now"));

    // Merging again is a no-op.
    let output = run_mgt(ws.dir.path(), &["merge", "feature"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Already up to date."));

    // An unknown committish is a user error: exit code 1.
    let output = run_mgt(ws.dir.path(), &["merge", "no-such-branch"]);
    assert_eq!(output.status.code(), Some(1), "{}", stderr(&output));
}

#[test]
fn test_conflicting_merge_flags_are_rejected() {
    let ws = workspace_with_staged_file();
    let output = run_mgt(ws.dir.path(), &["merge", "--ff", "--no-ff", "master"]);
    assert!(!output.status.success());
}

#[test]
fn test_rebase_conflict_persists_across_invocations() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("file.txt") => file_change("base") },
        "base",
    );
    let base = meta.ast.branches["master"].target.clone();
    meta.commit_on(
        "master",
        btreemap! { path("file.txt") => file_change("ours") },
        "master change",
    );
    let topic = meta.commit(
        &[&base],
        btreemap! { path("file.txt") => file_change("theirs") },
        "topic change",
    );
    meta.set_branch("topic", &topic);
    meta.checkout("topic");
    let ws = TestWorkspace::init(meta.ast, Default::default());

    let output = run_mgt(ws.dir.path(), &["rebase", "master"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("conflicts"), "{}", stderr(&output));

    // A second start is refused while the first is parked.
    let output = run_mgt(ws.dir.path(), &["rebase", "master"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("already in progress"),
        "{}",
        stderr(&output)
    );

    // Abort restores the original branch.
    let output = run_mgt(ws.dir.path(), &["rebase", "--abort"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let output = run_mgt(ws.dir.path(), &["status"]);
    assert!(stdout(&output).contains("On branch topic"), "{}", stdout(&output));
}

#[test]
fn test_checkout_switches_branches() {
    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("a") },
        "init",
    );
    let m1 = meta.ast.branches["master"].target.clone();
    let m2 = meta.commit(
        &[&m1],
        btreemap! { path("b.txt") => file_change("b") },
        "feature",
    );
    meta.set_branch("feature", &m2);
    meta.checkout("master");
    let ws = TestWorkspace::init(meta.ast, Default::default());

    let output = run_mgt(ws.dir.path(), &["checkout", "feature"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Switched to branch feature"));

    let output = run_mgt(ws.dir.path(), &["status"]);
    assert!(stdout(&output).contains("On branch feature"));
}

#[test]
fn test_refgc_simulates_by_default() {
    let mut sub = TestRepo::new();
    let c1 = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("1") },
        "c1",
    );
    let c2 = sub.commit_on(
        "master",
        btreemap! { path("a.txt") => file_change("2") },
        "c2",
    );
    sub.set_ref(
        &format!("refs/commits/{}", c1.hex()),
        &c1,
    );
    sub.set_ref(
        &format!("refs/commits/{}", c2.hex()),
        &c2,
    );

    let mut meta = TestRepo::new();
    meta.commit_on(
        "master",
        btreemap! {
            path("s") => Change::Sub(mgt_lib::backend::SubmoduleDef {
                url: "https://example.com/s.git".to_string(),
                commit: Some(c2.clone()),
            }),
        },
        "pin sub",
    );
    let subs: std::collections::BTreeMap<RepoPathBuf, _> =
        btreemap! { path("s") => sub.ast };
    let ws = TestWorkspace::init(meta.ast, subs);

    let output = run_mgt(ws.dir.path(), &["refgc"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains(&format!("would remove redundant ref refs/commits/{}", c1.hex())));
    assert!(text.contains("Simulation only"), "{text}");

    let output = run_mgt(ws.dir.path(), &["refgc", "--force"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("removed redundant ref"));
}
