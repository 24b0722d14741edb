// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, string::coerce_text, unexpected},
};

/// String value constrained to a closed `choices` set. Normalization follows
/// string rules; the set is only enforced when the constraint is present.
pub struct ChoiceType;

impl TypeCheck for ChoiceType {
    fn tag(&self) -> &'static str {
        "choice"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        coerce_text(raw).map(Value::Choice)
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Choice(v) = value else {
            return Err(unexpected("choice", value));
        };
        if let Some(choices) = constraints.str_list("choices")?
            && !choices.iter().any(|c| c == v)
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v:?} is not one of the configured choices"
            )));
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Choice(v) = value else {
            return Err(unexpected("choice", value));
        };
        Ok(Json::String(v.clone()))
    }
}
