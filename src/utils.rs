// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::Utc;
use rand::{RngExt, distr::Alphanumeric};

use crate::error::{BridgeError, Result};

/// Length of the random suffix appended to variable ids.
const ID_SUFFIX_LEN: usize = 8;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Allocates a variable id of the form `var_<name>_<unique>`. The suffix is
/// random alphanumeric; uniqueness within a store lifetime is re-checked by
/// the caller on insert.
pub fn variable_id(name: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("var_{name}_{suffix}")
}

/// Compiles a `*`-wildcard pattern into an anchored regex. Everything except
/// `*` matches literally.
pub fn wildcard_regex(pattern: &str) -> Result<regex::Regex> {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    regex::Regex::new(&format!("^{escaped}$"))
        .map_err(|e| BridgeError::Internal(format!("wildcard compile: {e}")))
}
