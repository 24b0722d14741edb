// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use base64::{Engine, engine::general_purpose::STANDARD as B64};
use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{Constraints, TypeCheck, Value, unexpected},
};

/// Ordered sequence of doubles. Accepts a JSON number array or the compact
/// binary form `{"b64": "<base64 of little-endian f64s>"}`; the canonical
/// serialization is always the JSON array.
pub struct EmbeddingType;

pub(crate) fn floats_from_b64(encoded: &str) -> Result<Vec<f64>> {
    let bytes = B64
        .decode(encoded)
        .map_err(|e| BridgeError::ValidationFailed(format!("invalid base64 payload: {e}")))?;
    if bytes.len() % 8 != 0 {
        return Err(BridgeError::ValidationFailed(format!(
            "binary payload length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(c);
            f64::from_le_bytes(buf)
        })
        .collect())
}

pub(crate) fn floats_from_json_array(items: &[Json]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let v = it
            .as_f64()
            .ok_or_else(|| BridgeError::ValidationFailed(format!("{it} is not a number")))?;
        out.push(v);
    }
    Ok(out)
}

impl TypeCheck for EmbeddingType {
    fn tag(&self) -> &'static str {
        "embedding"
    }

    fn validate(&self, raw: &Json) -> Result<Value> {
        match raw {
            Json::Array(items) => floats_from_json_array(items).map(Value::Embedding),
            Json::Object(map) => match map.get("b64") {
                Some(Json::String(encoded)) => floats_from_b64(encoded).map(Value::Embedding),
                _ => Err(BridgeError::ValidationFailed(
                    "embedding object form requires a \"b64\" string field".to_string(),
                )),
            },
            other => Err(BridgeError::ValidationFailed(format!(
                "expected a number array, got {other}"
            ))),
        }
    }

    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()> {
        let Value::Embedding(v) = value else {
            return Err(unexpected("embedding", value));
        };
        if let Some(dim) = constraints.usize("dimension")?
            && v.len() != dim
        {
            return Err(BridgeError::ConstraintViolation(format!(
                "dimension {} does not match required {dim}",
                v.len()
            )));
        }
        Ok(())
    }

    fn serialize(&self, value: &Value) -> Result<Json> {
        let Value::Embedding(v) = value else {
            return Err(unexpected("embedding", value));
        };
        serialize_floats(v)
    }
}

pub(crate) fn serialize_floats(v: &[f64]) -> Result<Json> {
    let mut out = Vec::with_capacity(v.len());
    for f in v {
        let n = serde_json::Number::from_f64(*f).ok_or_else(|| {
            BridgeError::ValidationFailed(format!(
                "non-finite element {f} cannot be serialized in an array"
            ))
        })?;
        out.push(Json::Number(n));
    }
    Ok(Json::Array(out))
}
