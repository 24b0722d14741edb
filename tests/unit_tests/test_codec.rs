// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD as B64};
use serde_json::json;
use varbridge_rs::{
    codec::{decode_value, encode_value, parse_envelope},
    error::BridgeError,
    types::{TypeCheck, Value, VarType},
};

fn round_trip(value: Value) -> Result<Value> {
    let any = encode_value(&value)?;
    Ok(decode_value(value.var_type(), &any)?)
}

#[test]
fn test_scalar_round_trips() -> Result<()> {
    for value in [
        Value::Float(1.25),
        Value::Integer(-7),
        Value::Str("hello".to_string()),
        Value::Boolean(true),
        Value::Choice("fast".to_string()),
        Value::Module("predict.ChainOfThought".to_string()),
        Value::Embedding(vec![0.5, -0.5]),
    ] {
        assert_eq!(round_trip(value.clone())?, value);
    }
    Ok(())
}

#[test]
fn test_special_floats_round_trip_as_strings() -> Result<()> {
    let any = encode_value(&Value::Float(f64::INFINITY))?;
    let envelope: serde_json::Value = serde_json::from_slice(&any.value)?;
    assert_eq!(envelope, json!({"type": "float", "value": "Infinity"}));

    match round_trip(Value::Float(f64::NAN))? {
        Value::Float(f) => assert!(f.is_nan()),
        other => anyhow::bail!("expected float, got {other:?}"),
    }
    match round_trip(Value::Float(f64::NEG_INFINITY))? {
        Value::Float(f) => assert_eq!(f, f64::NEG_INFINITY),
        other => anyhow::bail!("expected float, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_decode_against_wrong_type_is_mismatch() -> Result<()> {
    let any = encode_value(&Value::Str("x".to_string()))?;
    match decode_value(VarType::Integer, &any) {
        Err(BridgeError::TypeMismatch { expected, actual }) => {
            assert_eq!(expected, "integer");
            assert_eq!(actual, "string");
        },
        other => anyhow::bail!("expected TypeMismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_unknown_tag_in_envelope() {
    let any = prost_types::Any {
        type_url: "type.varbridge.rs/decimal".to_string(),
        value: br#"{"type":"decimal","value":"1.5"}"#.to_vec(),
    };
    match parse_envelope(&any) {
        Err(BridgeError::InvalidType(tag)) => assert_eq!(tag, "decimal"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn test_malformed_envelope_bytes() {
    let any = prost_types::Any {
        type_url: "type.varbridge.rs/float".to_string(),
        value: b"not json".to_vec(),
    };
    match parse_envelope(&any) {
        Err(BridgeError::ValidationFailed(_)) => {},
        other => panic!("expected ValidationFailed, got {other:?}"),
    }
}

#[test]
fn test_binary_embedding_payload() -> Result<()> {
    let floats = [1.0f64, -2.5, 3.25];
    let mut bytes = Vec::with_capacity(floats.len() * 8);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    let raw = json!({"b64": B64.encode(&bytes)});
    let value = VarType::Embedding.handler().validate(&raw)?;
    assert_eq!(value, Value::Embedding(vec![1.0, -2.5, 3.25]));
    Ok(())
}

#[test]
fn test_binary_tensor_payload() -> Result<()> {
    let floats = [1.0f64, 2.0, 3.0, 4.0];
    let mut bytes = Vec::with_capacity(floats.len() * 8);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    let raw = json!({"shape": [2, 2], "b64": B64.encode(&bytes)});
    let value = VarType::Tensor.handler().validate(&raw)?;
    let Value::Tensor(t) = value else {
        anyhow::bail!("expected tensor");
    };
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);

    // Length disagreeing with the shape is rejected.
    let raw = json!({"shape": [3, 2], "b64": B64.encode(&bytes)});
    assert!(VarType::Tensor.handler().validate(&raw).is_err());
    Ok(())
}
