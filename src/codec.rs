// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire codec for dynamically-typed values. Every value crosses the wire as
//! a `google.protobuf.Any` whose bytes are the JSON envelope
//! `{"type": "<tag>", "value": <payload>}` and whose `type_url` last path
//! segment repeats the tag. The codec translates `(tag, payload)` to and
//! from [`Value`]; constraint checking lives one layer up.

use prost_types::Any;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    error::{BridgeError, Result},
    types::{TypeCheck, Value, VarType},
};

/// Authority part of every envelope type_url.
pub const TYPE_URL_AUTHORITY: &str = "type.varbridge.rs";

/// type_url used for plain-JSON constraint payloads.
pub const JSON_TYPE_URL: &str = "type.varbridge.rs/json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    value: Json,
}

fn type_url(tag: &str) -> String {
    format!("{TYPE_URL_AUTHORITY}/{tag}")
}

/// Last path segment of a type_url; used for fast rejection before the
/// JSON payload is touched.
fn url_tag(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}

/// Encode a normalized value into its wire envelope.
pub fn encode_value(value: &Value) -> Result<Any> {
    let tag = value.type_tag();
    let envelope = Envelope {
        tag: tag.to_string(),
        value: value.to_payload()?,
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| BridgeError::Internal(format!("envelope encode: {e}")))?;
    Ok(Any {
        type_url: type_url(tag),
        value: bytes,
    })
}

/// A parsed envelope whose payload has not yet been validated against any
/// variable. The tag is authoritative; validation happens where the target
/// type is known.
#[derive(Debug, Clone)]
pub struct TaggedPayload {
    pub tag: VarType,
    pub payload: Json,
}

impl TaggedPayload {
    /// Wrap an already-normalized value, e.g. from in-process callers.
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            tag: value.var_type(),
            payload: value.to_payload()?,
        })
    }

    /// Validate against an expected type, rejecting tag mismatches before
    /// payload parsing.
    pub fn into_value(self, expected: VarType) -> Result<Value> {
        if self.tag != expected {
            return Err(BridgeError::TypeMismatch {
                expected: expected.as_str().to_string(),
                actual: self.tag.as_str().to_string(),
            });
        }
        expected.handler().validate(&self.payload)
    }
}

/// Parse the outer envelope of an incoming Any. The `type_url` tag must
/// agree with the embedded JSON tag.
pub fn parse_envelope(any: &Any) -> Result<TaggedPayload> {
    let url_tag = url_tag(&any.type_url);
    let envelope: Envelope = serde_json::from_slice(&any.value)
        .map_err(|e| BridgeError::ValidationFailed(format!("malformed envelope: {e}")))?;
    if url_tag != envelope.tag {
        return Err(BridgeError::TypeMismatch {
            expected: url_tag.to_string(),
            actual: envelope.tag,
        });
    }
    let tag = VarType::from_tag(&envelope.tag)?;
    Ok(TaggedPayload {
        tag,
        payload: envelope.value,
    })
}

/// Decode an envelope whose type is known from the variable's declaration.
pub fn decode_value(expected: VarType, any: &Any) -> Result<Value> {
    parse_envelope(any)?.into_value(expected)
}

/// Constraint payloads travel as plain JSON, not typed envelopes.
pub fn encode_constraint(value: &Json) -> Result<Any> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| BridgeError::Internal(format!("constraint encode: {e}")))?;
    Ok(Any {
        type_url: JSON_TYPE_URL.to_string(),
        value: bytes,
    })
}

pub fn decode_constraint(any: &Any) -> Result<Json> {
    serde_json::from_slice(&any.value)
        .map_err(|e| BridgeError::ValidationFailed(format!("malformed constraint payload: {e}")))
}
