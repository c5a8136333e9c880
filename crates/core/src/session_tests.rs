// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    single_digit = { "0" },
    mixed_case_hex = { "aBcDeF0123" },
    guid = { "3b38a3c6-1a9f-4f9e-8f3a-0c9d2e61a001" },
    dashes_only = { "---" },
)]
fn accepts(id: &str) {
    let parsed = SessionId::parse(id).unwrap();
    assert_eq!(parsed.as_str(), id);
}

#[yare::parameterized(
    empty = { "" },
    non_hex_letter = { "xyz" },
    embedded_space = { "ab cd" },
    path_traversal = { "../etc" },
    newline = { "ab\n" },
)]
fn rejects(id: &str) {
    assert_eq!(SessionId::parse(id), Err(SessionIdError));
}

#[test]
fn borrows_as_str_for_map_lookups() {
    use std::collections::HashMap;
    let mut map: HashMap<SessionId, u32> = HashMap::new();
    map.insert(SessionId::parse("abc123").unwrap(), 1);
    assert_eq!(map.get("abc123"), Some(&1));
}
