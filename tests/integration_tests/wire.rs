// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use varbridge_rs::{proto::v1 as pb, types::Value};

use crate::integration_tests::common::{
    connect, decoded_value, get_variable, init_session, register, spawn_server,
    update_variable_any,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn type_mismatch_on_the_wire_changes_nothing() -> Result<()> {
    let server = spawn_server().await?;
    let mut client = connect(server.addr).await?;

    init_session(&mut client, "s", 0).await?;
    register(
        &mut client,
        "s",
        "count",
        pb::VariableType::Integer,
        &Value::Integer(1),
        &[],
    )
    .await?;

    // A string envelope aimed at an integer variable.
    let wrong = varbridge_rs::codec::encode_value(&Value::Str("x".to_string()))?;
    let err = update_variable_any(&mut client, "s", "count", wrong)
        .await
        .expect_err("string payload must not land in an integer");
    assert!(err.starts_with("type_mismatch:"), "{err}");

    let var = get_variable(&mut client, "s", "count")
        .await
        .map_err(anyhow::Error::msg)?;
    assert_eq!(decoded_value(&var)?, Value::Integer(1));
    assert_eq!(var.version, 0);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lying_type_url_is_rejected() -> Result<()> {
    let server = spawn_server().await?;
    let mut client = connect(server.addr).await?;

    init_session(&mut client, "s", 0).await?;
    register(
        &mut client,
        "s",
        "count",
        pb::VariableType::Integer,
        &Value::Integer(1),
        &[],
    )
    .await?;

    // Envelope whose URL tag disagrees with the embedded JSON tag.
    let mut forged = varbridge_rs::codec::encode_value(&Value::Str("x".to_string()))?;
    forged.type_url = "type.varbridge.rs/integer".to_string();
    let err = update_variable_any(&mut client, "s", "count", forged)
        .await
        .expect_err("inconsistent envelope must be rejected");
    assert!(err.starts_with("type_mismatch:"), "{err}");

    server.stop().await
}
