// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, unexpected},
};

/// IEEE-754 double. Integers widen; the special values travel as the
/// strings `"Infinity"`, `"-Infinity"` and `"NaN"`.
pub struct FloatType;

pub(crate) fn special_from_str(s: &str) -> Option<f64> {
    match s {
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => None,
    }
}

pub(crate) fn special_to_str(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("Infinity")
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

impl TypeCheck for FloatType {
    fn tag(&self) -> &'static str {
        "float"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        match raw {
            Json::Number(n) => {
                let v = n
                    .as_f64()
                    .ok_or_else(|| BridgeError::ValidationFailed(format!("{n} is not a double")))?;
                Ok(Value::Float(v))
            },
            Json::String(s) => special_from_str(s).map(Value::Float).ok_or_else(|| {
                BridgeError::ValidationFailed(format!(
                    "string {s:?} is not one of Infinity, -Infinity, NaN"
                ))
            }),
            other => Err(BridgeError::ValidationFailed(format!(
                "expected a number, got {other}"
            ))),
        }
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Float(v) = value else {
            return Err(unexpected("float", value));
        };
        // Special values bypass bounds.
        if !v.is_finite() {
            return Ok(());
        }
        if let Some(min) = constraints.f64("min")?
            && *v < min
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v} is below min {min}"
            )));
        }
        if let Some(max) = constraints.f64("max")?
            && *v > max
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "{v} is above max {max}"
            )));
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Float(v) = value else {
            return Err(unexpected("float", value));
        };
        match special_to_str(*v) {
            Some(s) => Ok(Json::String(s.to_string())),
            None => serde_json::Number::from_f64(*v).map(Json::Number).ok_or_else(|| {
                BridgeError::Internal(format!("finite double {v} failed to serialize"))
            }),
        }
    }
}
