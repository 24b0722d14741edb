// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::BTreeMap;

use crate::{
    types::{Constraints, Value, VarType},
    utils::now_millis,
};

/// A named, typed, versioned, constraint-checked cell. Only reachable
/// through its owning session; `id` is unique for the store's lifetime.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub vtype: VarType,
    pub value: Value,
    pub constraints: Constraints,
    pub metadata: BTreeMap<String, String>,
    /// Advances by exactly one on every successful mutation.
    pub version: u32,
    pub created_at: i64,
    pub last_updated_at: i64,
    pub optimizing: bool,
}

impl Variable {
    pub fn new(
        id: String,
        name: String,
        vtype: VarType,
        value: Value,
        constraints: Constraints,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            name,
            vtype,
            value,
            constraints,
            metadata,
            version: 0,
            created_at: now,
            last_updated_at: now,
            optimizing: false,
        }
    }
}
