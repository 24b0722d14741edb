// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value as Json;

use crate::{
    error::Result,
    types::{TypeCheck, VarType},
};

/// A normalized variable value. Exactly one variant per entry of the closed
/// type set; the store never holds anything that did not pass its type's
/// `validate`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Integer(i64),
    Str(String),
    Boolean(bool),
    Choice(String),
    Module(String),
    Embedding(Vec<f64>),
    Tensor(Tensor),
}

/// Normalized tensor: row-major data plus its inferred shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    /// Every element is finite with a zero fractional part.
    pub integral: bool,
}

impl Value {
    pub fn var_type(&self) -> VarType {
        match self {
            Self::Float(_) => VarType::Float,
            Self::Integer(_) => VarType::Integer,
            Self::Str(_) => VarType::String,
            Self::Boolean(_) => VarType::Boolean,
            Self::Choice(_) => VarType::Choice,
            Self::Module(_) => VarType::Module,
            Self::Embedding(_) => VarType::Embedding,
            Self::Tensor(_) => VarType::Tensor,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.var_type().as_str()
    }

    /// Canonical JSON payload via the owning type's serializer.
    pub fn to_payload(&self) -> Result<Json> {
        self.var_type().handler().serialize(self)
    }
}
