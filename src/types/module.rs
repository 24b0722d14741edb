// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{
        Constraints, TypeCheck, Value,
        string::{coerce_text, compile_pattern},
        unexpected,
    },
};

/// String naming a pluggable component. Constraints: `choices` (closed
/// set), `namespace` (dotted prefix) and `pattern` (regex).
pub struct ModuleType;

impl TypeCheck for ModuleType {
    fn tag(&self) -> &'static str {
        "module"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        let name = coerce_text(raw)?;
        if name.is_empty() {
            return Err(BridgeError::ValidationFailed(
                "module name must not be empty".to_string(),
            ));
        }
        Ok(Value::Module(name))
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Module(v) = value else {
            return Err(unexpected("module", value));
        };
        if let Some(choices) = constraints.str_list("choices")?
            && !choices.iter().any(|c| c == v)
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v:?} is not one of the configured modules"
            )));
        }
        if let Some(ns) = constraints.str("namespace")?
            && v != ns
            && !v.starts_with(&format!("{ns}."))
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v:?} is outside namespace {ns:?}"
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
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Module(v) = value else {
            return Err(unexpected("module", value));
        };
        Ok(Json::String(v.clone()))
    }
}
