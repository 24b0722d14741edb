// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Closed type system of the bridge: per-type validation, normalization,
//! constraint checking and canonical payload serialization. The set of
//! types is fixed; both sides of the wire agree on it byte for byte.

use std::collections::BTreeMap;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{BridgeError, Result};

/// Boolean value checks.
pub mod boolean;
/// Enumerated string values.
pub mod choice;
/// Fixed-dimension float vectors.
pub mod embedding;
/// IEEE-754 doubles with special-value handling.
pub mod float;
/// 64-bit integers.
pub mod integer;
/// Component-naming strings with namespace rules.
pub mod module;
/// Text values.
pub mod string;
/// Nested numeric arrays with shape/dtype rules.
pub mod tensor;
/// The normalized value union.
pub mod value;

pub use value::{Tensor, Value};

use crate::types::{
    boolean::BooleanType, choice::ChoiceType, embedding::EmbeddingType, float::FloatType,
    integer::IntegerType, module::ModuleType, string::StringType, tensor::TensorType,
};

/// The closed set of variable types. Tags are the lowercase names used in
/// wire envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Float,
    Integer,
    String,
    Boolean,
    Choice,
    Module,
    Embedding,
    Tensor,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Choice => "choice",
            Self::Module => "module",
            Self::Embedding => "embedding",
            Self::Tensor => "tensor",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(match tag {
            "float" => Self::Float,
            "integer" => Self::Integer,
            "string" => Self::String,
            "boolean" => Self::Boolean,
            "choice" => Self::Choice,
            "module" => Self::Module,
            "embedding" => Self::Embedding,
            "tensor" => Self::Tensor,
            other => return Err(BridgeError::InvalidType(other.to_string())),
        })
    }

    pub fn handler(&self) -> TypeHandler {
        match self {
            Self::Float => TypeHandler::from(FloatType),
            Self::Integer => TypeHandler::from(IntegerType),
            Self::String => TypeHandler::from(StringType),
            Self::Boolean => TypeHandler::from(BooleanType),
            Self::Choice => TypeHandler::from(ChoiceType),
            Self::Module => TypeHandler::from(ModuleType),
            Self::Embedding => TypeHandler::from(EmbeddingType),
            Self::Tensor => TypeHandler::from(TensorType),
        }
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific constraint map. Values are plain JSON (numbers, strings,
/// arrays), not typed envelopes; each type module interprets its own keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints(pub BTreeMap<String, Json>);

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.0.get(key)
    }

    fn malformed(key: &str, want: &str) -> BridgeError {
        BridgeError::ConstraintViolation(format!("constraint {key} must be {want}"))
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>> {
        match self.0.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(Self::malformed(key, "a number")),
        }
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>> {
        match self.0.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Number(n)) => {
                n.as_i64().map(Some).ok_or_else(|| Self::malformed(key, "an integer"))
            },
            Some(_) => Err(Self::malformed(key, "an integer")),
        }
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>> {
        match self.i64(key)? {
            None => Ok(None),
            Some(v) if v >= 0 => Ok(Some(v as usize)),
            Some(_) => Err(Self::malformed(key, "a non-negative integer")),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) => Ok(Some(s)),
            Some(_) => Err(Self::malformed(key, "a string")),
        }
    }

    pub fn str_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.0.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    match it {
                        Json::String(s) => out.push(s.clone()),
                        _ => return Err(Self::malformed(key, "a list of strings")),
                    }
                }
                Ok(Some(out))
            },
            Some(_) => Err(Self::malformed(key, "a list of strings")),
        }
    }

    pub fn usize_list(&self, key: &str) -> Result<Option<Vec<usize>>> {
        match self.0.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for it in items {
                    let v = it
                        .as_u64()
                        .ok_or_else(|| Self::malformed(key, "a list of non-negative integers"))?;
                    out.push(v as usize);
                }
                Ok(Some(out))
            },
            Some(_) => Err(Self::malformed(key, "a list of non-negative integers")),
        }
    }
}

/// The four operations every type module exposes. All are pure;
/// normalization is deterministic.
#[enum_dispatch]
pub trait TypeCheck {
    /// Canonical envelope tag.
    fn tag(&self) -> &'static str;

    /// Parse and normalize a raw JSON payload.
    fn validate(&self, raw: &Json) -> Result<Value>;

    /// Check a normalized value against the constraint map.
    fn validate_constraints(&self, value: &Value, constraints: &Constraints) -> Result<()>;

    /// Canonical JSON payload of a normalized value.
    fn serialize(&self, value: &Value) -> Result<Json>;

    /// Parse payload bytes (JSON) and normalize.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let raw: Json = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::ValidationFailed(format!("payload is not valid JSON: {e}")))?;
        self.validate(&raw)
    }
}

/// Runtime dispatch over the closed type set.
#[enum_dispatch(TypeCheck)]
pub enum TypeHandler {
    Float(FloatType),
    Integer(IntegerType),
    Str(StringType),
    Boolean(BooleanType),
    Choice(ChoiceType),
    Module(ModuleType),
    Embedding(EmbeddingType),
    Tensor(TensorType),
}

/// Validate + constraint-check in one step.
pub fn validate_value(raw: &Json, vtype: VarType, constraints: &Constraints) -> Result<Value> {
    let handler = vtype.handler();
    let value = handler.validate(raw)?;
    handler.validate_constraints(&value, constraints)?;
    Ok(value)
}

/// Derived predicate over [`validate_value`].
pub fn is_valid(raw: &Json, vtype: VarType, constraints: &Constraints) -> bool {
    validate_value(raw, vtype, constraints).is_ok()
}

pub(crate) fn unexpected(vtype: &str, value: &Value) -> BridgeError {
    BridgeError::Internal(format!(
        "{vtype} handler applied to a {} value",
        value.var_type()
    ))
}
