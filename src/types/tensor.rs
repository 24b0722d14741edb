// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{
        Constraints, Tensor, TypeCheck, Value,
        embedding::{floats_from_b64, serialize_floats},
        unexpected,
    },
};

/// Nested numeric array. The shape is inferred from the nesting and every
/// sub-array must agree with it (ragged input is rejected). The compact
/// binary form `{"shape": [..], "b64": "..."}` is accepted as well; the
/// canonical serialization is the nested JSON array.
pub struct TensorType;

fn infer_shape(raw: &Json) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut cur = raw;
    while let Json::Array(items) = cur {
        shape.push(items.len());
        match items.first() {
            Some(first) => cur = first,
            None => break,
        }
    }
    shape
}

fn flatten(raw: &Json, shape: &[usize], depth: usize, data: &mut Vec<f64>) -> Result<()> {
    if depth == shape.len() {
        let v = raw.as_f64().ok_or_else(|| {
            BridgeError::ValidationFailed(format!("{raw} is not a number at depth {depth}"))
        })?;
        data.push(v);
        return Ok(());
    }
    let Json::Array(items) = raw else {
        return Err(BridgeError::ValidationFailed(format!(
            "expected a nested array at depth {depth}, got {raw}"
        )));
    };
    if items.len() != shape[depth] {
        return Err(BridgeError::ValidationFailed(format!(
            "ragged tensor: expected {} element(s) at depth {depth}, got {}",
            shape[depth],
            items.len()
        )));
    }
    for it in items {
        flatten(it, shape, depth + 1, data)?;
    }
    Ok(())
}

fn build_tensor(shape: Vec<usize>, data: Vec<f64>) -> Tensor {
    let integral = data.iter().all(|v| v.is_finite() && v.fract() == 0.0);
    Tensor {
        shape,
        data,
        integral,
    }
}

fn nest(shape: &[usize], data: &[f64]) -> Result<Json> {
    match shape {
        [] => Err(BridgeError::Internal("empty tensor shape".to_string())),
        [_] => serialize_floats(data),
        [outer, rest @ ..] => {
            let chunk: usize = rest.iter().product();
            let mut out = Vec::with_capacity(*outer);
            for i in 0..*outer {
                out.push(nest(rest, &data[i * chunk..(i + 1) * chunk])?);
            }
            Ok(Json::Array(out))
        },
    }
}

impl TypeCheck for TensorType {
    fn tag(&self) -> &'static str {
        "tensor"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        match raw {
            Json::Array(_) => {
                let shape = infer_shape(raw);
                let mut data = Vec::with_capacity(shape.iter().product());
                flatten(raw, &shape, 0, &mut data)?;
                Ok(Value::Tensor(build_tensor(shape, data)))
            },
            Json::Object(map) => {
                let encoded = match map.get("b64") {
                    Some(Json::String(s)) => s,
                    _ => {
                        return Err(BridgeError::ValidationFailed(
                            "tensor object form requires a \"b64\" string field".to_string(),
                        ));
                    },
                };
                let shape = match map.get("shape") {
                    Some(Json::Array(items)) => {
                        let mut shape = Vec::with_capacity(items.len());
                        for it in items {
                            let dim = it.as_u64().ok_or_else(|| {
                                BridgeError::ValidationFailed(format!(
                                    "{it} is not a valid dimension"
                                ))
                            })?;
                            shape.push(dim as usize);
                        }
                        shape
                    },
                    _ => {
                        return Err(BridgeError::ValidationFailed(
                            "tensor object form requires a \"shape\" array".to_string(),
                        ));
                    },
                };
                let data = floats_from_b64(encoded)?;
                let expected: usize = shape.iter().product();
                if data.len() != expected {
                    return Err(BridgeError::ValidationFailed(format!(
                        "shape {shape:?} implies {expected} element(s), payload has {}",
                        data.len()
                    )));
                }
                Ok(Value::Tensor(build_tensor(shape, data)))
            },
            other => Err(BridgeError::ValidationFailed(format!(
                "expected a nested number array, got {other}"
            ))),
        }
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Tensor(t) = value else {
            return Err(unexpected("tensor", value));
        };
        if let Some(shape) = constraints.usize_list("shape")?
            && t.shape != shape
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "shape {:?} does not match required {shape:?}",
                t.shape
            )));
        }
        if let Some(dtype) = constraints.str("dtype")? {
            match dtype {
                "float" => {},
                "integer" => {
                    if !t.integral {
                        return Err(BridgeError::ConstraintViolation(
                            "tensor holds non-integer elements but dtype is integer".to_string(),
                        ));
                    }
                },
                other => {
                    return Err(BridgeError::ConstraintViolation(format!(
                        "unknown dtype {other:?}"
                    )));
                },
            }
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Tensor(t) = value else {
            return Err(unexpected("tensor", value));
        };
        nest(&t.shape, &t.data)
    }
}
