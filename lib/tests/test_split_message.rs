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

use mgt_lib::split_message::format_split_commit_messages;
use mgt_lib::split_message::parse_split_commit_messages;
use proptest::collection::btree_map;
use proptest::prelude::*;

/// Single-line message content that survives the buffer format: no comment
/// prefix, no leading/trailing whitespace.
fn arb_message() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9 ]{0,18}[a-z0-9]|[a-z]"
}

fn arb_sub_name() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(/[a-z]{1,6}){0,2}"
}

proptest! {
    /// Formatting then parsing returns exactly the messages that went in,
    /// whenever none of them is empty.
    #[test]
    fn test_round_trip(
        meta in arb_message(),
        subs in btree_map(arb_sub_name(), arb_message(), 0..5),
    ) {
        let buffer = format_split_commit_messages(&meta, &subs);
        let parsed = parse_split_commit_messages(&buffer).unwrap();
        prop_assert_eq!(parsed.meta.as_deref(), Some(meta.as_str()));
        prop_assert_eq!(parsed.subs, subs);
    }

    /// Parsing is idempotent on its own output shape: reformatting the
    /// parsed messages and parsing again changes nothing.
    #[test]
    fn test_reformat_stability(
        meta in arb_message(),
        subs in btree_map(arb_sub_name(), arb_message(), 0..4),
    ) {
        let once = parse_split_commit_messages(&format_split_commit_messages(&meta, &subs)).unwrap();
        let again = parse_split_commit_messages(&format_split_commit_messages(
            once.meta.as_deref().unwrap(),
            &once.subs,
        ))
        .unwrap();
        prop_assert_eq!(&once, &again);
    }
}

#[test]
fn test_multi_line_messages_round_trip() {
    let subs: BTreeMap<String, String> = [(
        "x/y".to_string(),
        "subject line\n\nbody paragraph".to_string(),
    )]
    .into();
    let buffer = format_split_commit_messages("meta subject\n\nmeta body", &subs);
    let parsed = parse_split_commit_messages(&buffer).unwrap();
    assert_eq!(parsed.meta.as_deref(), Some("meta subject\n\nmeta body"));
    assert_eq!(parsed.subs, subs);
}
