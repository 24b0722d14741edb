// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, unexpected},
};

/// Booleans. Accepts `true`/`false`, the texts `"true"`/`"false"`
/// (case-insensitive) and the numbers `1`/`0`. Carries no constraints.
pub struct BooleanType;

impl TypeCheck for BooleanType {
    fn tag(&self) -> &'static str {
        "boolean"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        match raw {
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::String(s) => {
                if s.eq_ignore_ascii_case("true") {
                    Ok(Value::Boolean(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Ok(Value::Boolean(false))
                } else {
                    Err(BridgeError::ValidationFailed(format!(
                        "string {s:?} is not a boolean"
                    )))
                }
            },
            Json::Number(n) => match n.as_i64() {
                Some(1) => Ok(Value::Boolean(true)),
                Some(0) => Ok(Value::Boolean(false)),
                _ => Err(BridgeError::ValidationFailed(format!(
                    "number {n} is not a boolean"
                ))),
            },
            other => Err(BridgeError::ValidationFailed(format!(
                "expected a boolean, got {other}"
            ))),
        }
    }

    fn validate_constraints(&self, value: &Value, _constraints: &Constraints) -> Result<()> {
        match value {
            Value::Boolean(_) => Ok(()),
            other => Err(unexpected("boolean", other)),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Boolean(v) = value else {
            return Err(unexpected("boolean", value));
        };
        Ok(Json::Bool(*v))
    }
}
