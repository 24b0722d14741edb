// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, unexpected},
};

/// 64-bit signed integer. Floats are accepted only when finite with a zero
/// fractional part; anything that would truncate is rejected.
pub struct IntegerType;

impl TypeCheck for IntegerType {
    fn tag(&self) -> &'static str {
        "integer"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        let Json::Number(n) = raw else {
            return Err(BridgeError::ValidationFailed(format!(
                "expected an integer, got {raw}"
            )));
        };
        if let Some(v) = n.as_i64() {
            return Ok(Value::Integer(v));
        }
        if let Some(f) = n.as_f64() {
            if f.is_finite()
                && f.fract() == 0.0
                && f >= i64::MIN as f64
                && f <= i64::MAX as f64
            {
                return Ok(Value::Integer(f as i64));
            }
            return Err(BridgeError::ValidationFailed(format!(
                "{f} cannot be represented as an integer without truncation"
            )));
        }
        Err(BridgeError::ValidationFailed(format!(
            "{n} is out of the 64-bit integer range"
        )))
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Integer(v) = value else {
            return Err(unexpected("integer", value));
        };
        if let Some(min) = constraints.i64("min")?
            && *v < min
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v} is below min {min}"
            )));
        }
        if let Some(max) = constraints.i64("max")?
            && *v > max
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v} is above max {max}"
            )));
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Integer(v) = value else {
            return Err(unexpected("integer", value));
        };
        Ok(Json::from(*v))
    }
}
