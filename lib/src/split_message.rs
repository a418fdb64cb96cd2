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

//! The interactive split-commit message buffer.
//!
//! One text buffer carries the meta-repo message and one message per
//! sub-repo. Each block is terminated by a `# <tag>` comment line; deleting
//! a tag line suppresses that commit.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::error::Result;

/// Tag identifying the meta-repo block.
const META_TAG: &str = "*";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitCommitMessages {
    /// `None` when the user deleted the meta tag line (commit subs only).
    pub meta: Option<String>,
    pub subs: BTreeMap<String, String>,
}

/// Renders the editable buffer seeded with the given messages.
pub fn format_split_commit_messages(
    meta: &str,
    subs: &BTreeMap<String, String>,
) -> String {
    let mut buffer = String::new();
    push_message(&mut buffer, meta);
    buffer.push_str(
        "# <*> enter meta-repo message above this line; delete this line to commit only \
         submodules\n",
    );
    buffer.push_str("# Lines starting with '#' are ignored.\n");
    for (name, message) in subs {
        buffer.push_str("# ---\n");
        push_message(&mut buffer, message);
        buffer.push_str(&format!(
            "# <{name}> enter message for '{name}' above this line; delete this line to skip \
             committing '{name}'\n"
        ));
    }
    buffer
}

fn push_message(buffer: &mut String, message: &str) {
    buffer.push_str(message);
    if !message.is_empty() && !message.ends_with('\n') {
        buffer.push('\n');
    }
}

/// Parses an edited buffer back into per-repo messages.
///
/// Lines starting with `#` are comments. A comment of the form `# <tag> ...`
/// closes the block accumulated so far and assigns it to `tag`. Content
/// after the final tag line is discarded. A repeated tag is a user error.
pub fn parse_split_commit_messages(buffer: &str) -> Result<SplitCommitMessages> {
    let mut result = SplitCommitMessages::default();
    let mut seen_meta = false;
    let mut block: Vec<&str> = Vec::new();
    for line in buffer.lines() {
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(tag) = parse_tag(comment) {
                let message = block.join("\n").trim_end().to_string();
                block.clear();
                if tag == META_TAG {
                    if seen_meta {
                        return Err(Error::user("the meta-repo message appears twice"));
                    }
                    seen_meta = true;
                    result.meta = Some(message);
                } else if result.subs.insert(tag.to_string(), message).is_some() {
                    return Err(Error::user(format!(
                        "the message for '{tag}' appears twice"
                    )));
                }
            }
            continue;
        }
        block.push(line);
    }
    Ok(result)
}

fn parse_tag(comment: &str) -> Option<&str> {
    let rest = comment.trim_start().strip_prefix('<')?;
    let end = rest.find('>')?;
    let tag = &rest[..end];
    (!tag.is_empty()).then_some(tag)
}
