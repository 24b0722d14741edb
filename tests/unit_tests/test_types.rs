// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use serde_json::json;
use varbridge_rs::{
    error::BridgeError,
    types::{TypeCheck, Value, VarType, is_valid, validate_value},
};

use super::constraints;

#[test]
fn test_float_accepts_numbers_and_widens_integers() -> Result<()> {
    let c = constraints(&[]);
    assert_eq!(
        validate_value(&json!(0.7), VarType::Float, &c)?,
        Value::Float(0.7)
    );
    assert_eq!(
        validate_value(&json!(3), VarType::Float, &c)?,
        Value::Float(3.0)
    );
    Ok(())
}

#[test]
fn test_float_specials_round_trip_and_bypass_bounds() -> Result<()> {
    let c = constraints(&[("min", json!(0.0)), ("max", json!(1.0))]);
    for (text, check) in [
        ("Infinity", f64::is_infinite as fn(f64) -> bool),
        ("-Infinity", f64::is_infinite),
        ("NaN", f64::is_nan),
    ] {
        let v = validate_value(&json!(text), VarType::Float, &c)?;
        let Value::Float(f) = v else {
            anyhow::bail!("expected float");
        };
        assert!(check(f), "{text} parsed to {f}");
        // Specials serialize back to the same string.
        let payload = VarType::Float.handler().serialize(&Value::Float(f))?;
        assert_eq!(payload, json!(text));
    }
    Ok(())
}

#[test]
fn test_float_bounds_are_inclusive() {
    let c = constraints(&[("min", json!(0.0)), ("max", json!(2.0))]);
    assert!(is_valid(&json!(0.0), VarType::Float, &c));
    assert!(is_valid(&json!(2.0), VarType::Float, &c));
    assert!(!is_valid(&json!(-0.1), VarType::Float, &c));
    assert!(!is_valid(&json!(2.1), VarType::Float, &c));
}

#[test]
fn test_integer_rejects_truncation() -> Result<()> {
    let c = constraints(&[]);
    assert_eq!(
        validate_value(&json!(5.0), VarType::Integer, &c)?,
        Value::Integer(5)
    );
    for bad in [json!(5.5), json!("NaN"), json!("7"), json!(true)] {
        assert!(
            !is_valid(&bad, VarType::Integer, &c),
            "{bad} must not be an integer"
        );
    }
    Ok(())
}

#[test]
fn test_integer_bounds() {
    let c = constraints(&[("min", json!(0)), ("max", json!(10))]);
    assert!(is_valid(&json!(10), VarType::Integer, &c));
    assert!(!is_valid(&json!(11), VarType::Integer, &c));
    assert!(!is_valid(&json!(-1), VarType::Integer, &c));
}

#[test]
fn test_string_coercion_and_null_rejection() -> Result<()> {
    let c = constraints(&[]);
    assert_eq!(
        validate_value(&json!("hi"), VarType::String, &c)?,
        Value::Str("hi".to_string())
    );
    // Scalars coerce to their text form.
    assert_eq!(
        validate_value(&json!(42), VarType::String, &c)?,
        Value::Str("42".to_string())
    );
    assert_eq!(
        validate_value(&json!(true), VarType::String, &c)?,
        Value::Str("true".to_string())
    );
    assert!(!is_valid(&serde_json::Value::Null, VarType::String, &c));
    Ok(())
}

#[test]
fn test_string_length_pattern_and_enum() {
    let c = constraints(&[("min_length", json!(2)), ("max_length", json!(4))]);
    assert!(is_valid(&json!("ab"), VarType::String, &c));
    assert!(!is_valid(&json!("a"), VarType::String, &c));
    assert!(!is_valid(&json!("abcde"), VarType::String, &c));

    let c = constraints(&[("pattern", json!("^[a-z]+$"))]);
    assert!(is_valid(&json!("abc"), VarType::String, &c));
    assert!(!is_valid(&json!("Abc"), VarType::String, &c));

    // Uncompilable pattern falls back to a literal match.
    let c = constraints(&[("pattern", json!("a[b"))]);
    assert!(is_valid(&json!("xa[bz"), VarType::String, &c));
    assert!(!is_valid(&json!("ab"), VarType::String, &c));

    let c = constraints(&[("enum", json!(["red", "green"]))]);
    assert!(is_valid(&json!("red"), VarType::String, &c));
    assert!(!is_valid(&json!("blue"), VarType::String, &c));
}

#[test]
fn test_boolean_coercions() -> Result<()> {
    let c = constraints(&[]);
    for (raw, want) in [
        (json!(true), true),
        (json!("TRUE"), true),
        (json!("false"), false),
        (json!(1), true),
        (json!(0), false),
    ] {
        assert_eq!(
            validate_value(&raw, VarType::Boolean, &c)?,
            Value::Boolean(want),
            "{raw}"
        );
    }
    for bad in [json!("yes"), json!(2), json!([true])] {
        assert!(!is_valid(&bad, VarType::Boolean, &c), "{bad}");
    }
    Ok(())
}

#[test]
fn test_choice_requires_membership_only_when_constrained() {
    let c = constraints(&[]);
    assert!(is_valid(&json!("anything"), VarType::Choice, &c));

    let c = constraints(&[("choices", json!(["fast", "slow"]))]);
    assert!(is_valid(&json!("fast"), VarType::Choice, &c));
    assert!(!is_valid(&json!("medium"), VarType::Choice, &c));
}

#[test]
fn test_module_namespace_and_pattern() {
    let c = constraints(&[("namespace", json!("predict"))]);
    assert!(is_valid(&json!("predict"), VarType::Module, &c));
    assert!(is_valid(&json!("predict.ChainOfThought"), VarType::Module, &c));
    assert!(!is_valid(&json!("retrieve.Basic"), VarType::Module, &c));

    let c = constraints(&[("choices", json!(["a.X", "a.Y"]))]);
    assert!(is_valid(&json!("a.X"), VarType::Module, &c));
    assert!(!is_valid(&json!("a.Z"), VarType::Module, &c));

    let c = constraints(&[("pattern", json!("^[a-z]+\\.[A-Z]"))]);
    assert!(is_valid(&json!("mod.Thing"), VarType::Module, &c));
    assert!(!is_valid(&json!("Thing"), VarType::Module, &c));
}

#[test]
fn test_embedding_dimension() -> Result<()> {
    let c = constraints(&[("dimension", json!(3))]);
    assert_eq!(
        validate_value(&json!([1.0, 2.0, 3.0]), VarType::Embedding, &c)?,
        Value::Embedding(vec![1.0, 2.0, 3.0])
    );
    assert!(!is_valid(&json!([1.0, 2.0]), VarType::Embedding, &c));
    assert!(!is_valid(&json!([1.0, "x", 3.0]), VarType::Embedding, &c));
    Ok(())
}

#[test]
fn test_tensor_shape_inference_and_constraints() -> Result<()> {
    let c = constraints(&[]);
    let v = validate_value(&json!([[1, 2, 3], [4, 5, 6]]), VarType::Tensor, &c)?;
    let Value::Tensor(t) = &v else {
        anyhow::bail!("expected tensor");
    };
    assert_eq!(t.shape, vec![2, 3]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert!(t.integral);

    // Canonical serialization reconstructs the nesting.
    let payload = VarType::Tensor.handler().serialize(&v)?;
    assert_eq!(payload, json!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));

    let c = constraints(&[("shape", json!([2, 3]))]);
    assert!(is_valid(&json!([[1, 2, 3], [4, 5, 6]]), VarType::Tensor, &c));
    assert!(!is_valid(&json!([[1, 2], [3, 4]]), VarType::Tensor, &c));

    // Ragged input is rejected.
    assert!(!is_valid(
        &json!([[1, 2, 3], [4, 5]]),
        VarType::Tensor,
        &constraints(&[])
    ));

    let c = constraints(&[("dtype", json!("integer"))]);
    assert!(is_valid(&json!([[1, 2]]), VarType::Tensor, &c));
    assert!(!is_valid(&json!([[1.5, 2.0]]), VarType::Tensor, &c));
    Ok(())
}

#[test]
fn test_deserialize_parses_and_normalizes() -> Result<()> {
    let v = VarType::Float.handler().deserialize(b"0.25")?;
    assert_eq!(v, Value::Float(0.25));
    let v = VarType::Boolean.handler().deserialize(b"\"TRUE\"")?;
    assert_eq!(v, Value::Boolean(true));
    assert!(VarType::Integer.handler().deserialize(b"not json").is_err());
    Ok(())
}

#[test]
fn test_unknown_tag_is_invalid_type() {
    match VarType::from_tag("decimal") {
        Err(BridgeError::InvalidType(tag)) => assert_eq!(tag, "decimal"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn test_malformed_constraint_values_are_rejected() {
    // min must be numeric for floats.
    let c = constraints(&[("min", json!("zero"))]);
    assert!(!is_valid(&json!(1.0), VarType::Float, &c));

    // choices must be a string list.
    let c = constraints(&[("choices", json!("fast,slow"))]);
    assert!(!is_valid(&json!("fast"), VarType::Choice, &c));
}
