// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use regex::Regex;
use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, unexpected},
};

/// Text values. Scalars (numbers, booleans) coerce to their text form;
/// null is rejected outright.
pub struct StringType;

/// Compile `pattern` as a regex, falling back to a literal match when the
/// pattern itself does not compile.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Ok(re),
        Err(_) => Regex::new(&regex::escape(pattern))
            .map_err(|e| BridgeError::Internal(format!("escaped pattern failed to compile: {e}"))),
    }
}

pub(crate) fn check_string_constraints(
    v: &str,
    constraints: &Constraints,
) -> Result<()> {
    if let Some(min) = constraints.usize("min_length")?
        && v.chars().count() < min
    {
        return Err(BridgeError::ConstraintViolation(format!(
            "length {} is below min_length {min}",
            v.chars().count()
        )));
    }
    if let Some(max) = constraints.usize("max_length")?
        && v.chars().count() > max
    {
        return Err(BridgeError::ConstraintViolation(format!(
            "length {} is above max_length {max}",
            v.chars().count()
        )));
    }
    if let Some(pattern) = constraints.str("pattern")? {
        let re = compile_pattern(pattern)?;
        if !re.is_match(v) {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v:?} does not match pattern {pattern:?}"
            )));
        }
    }
    if let Some(allowed) = constraints.str_list("enum")?
        && !allowed.iter().any(|a| a == v)
    {
        return Err(BridgeError::ConstraintViolation(format!(
            "{v:?} is not in the enum set"
        )));
    }
    Ok(())
}

/// Shared text normalization for string, choice and module.
pub(crate) fn coerce_text(raw: &Json) -> Result<String> {
    match raw {
        Json::String(s) => Ok(s.clone()),
        Json::Bool(b) => Ok(b.to_string()),
        Json::Number(n) => Ok(n.to_string()),
        Json::Null => Err(BridgeError::ValidationFailed(
            "null is not a valid string".to_string(),
        )),
        other => Err(BridgeError::ValidationFailed(format!(
            "expected text, got {other}"
        ))),
    }
}

impl TypeCheck for StringType {
    fn tag(&self) -> &'static str {
        "string"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        coerce_text(raw).map(Value::Str)
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Str(v) = value else {
            return Err(unexpected("string", value));
        };
        check_string_constraints(v, constraints)
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Str(v) = value else {
            return Err(unexpected("string", value));
        };
        Ok(Json::String(v.clone()))
    }
}
