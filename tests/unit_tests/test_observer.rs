// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::sleep;
use varbridge_rs::{
    observer::{UpdateKind, queue::DROPPED_METADATA_KEY},
    store::WatchOptions,
    types::{Value, VarType},
};

use super::{constraints, new_store, tagged};

const TTL: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_initial_snapshot_precedes_live_updates() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "temp",
            VarType::Float,
            tagged(&Value::Float(0.7)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;

    let (record, snapshot) = store
        .watch_variables("s", &["temp".to_string()], WatchOptions {
            include_initial: true,
            filter: None,
        })
        .await?;
    assert_eq!(snapshot.len(), 1);

    store
        .update_variable("s", "temp", tagged(&Value::Float(0.8)), BTreeMap::new())
        .await?;

    // Queue order: snapshot entry first, then the live event.
    let first = record.queue.try_pop().expect("initial entry queued");
    assert_eq!(first.kind, UpdateKind::Initial);
    assert_eq!(first.old_value, None);
    assert_eq!(first.new_value, Some(Value::Float(0.7)));
    assert_eq!(first.version, 0);

    let second = record.queue.try_pop().expect("live event queued");
    assert_eq!(second.kind, UpdateKind::Value);
    assert_eq!(second.old_value, Some(Value::Float(0.7)));
    assert_eq!(second.new_value, Some(Value::Float(0.8)));
    assert_eq!(second.version, 1);

    // No stale reads: nothing with version <= snapshot version remains.
    assert!(record.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_watch_without_initial_sees_only_later_versions() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(1)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    store
        .update_variable("s", "x", tagged(&Value::Integer(2)), BTreeMap::new())
        .await?;

    let (record, _) = store
        .watch_variables("s", &["x".to_string()], Default::default())
        .await?;
    assert!(record.queue.is_empty());

    store
        .update_variable("s", "x", tagged(&Value::Integer(3)), BTreeMap::new())
        .await?;
    let event = record.queue.try_pop().expect("one event");
    assert_eq!(event.version, 2);
    assert!(record.queue.is_empty(), "delivered exactly once");
    Ok(())
}

#[tokio::test]
async fn test_wildcard_watch_and_unknown_identifiers() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    for name in ["temp", "temperature", "pressure"] {
        store
            .register_variable(
                "s",
                name,
                VarType::Float,
                tagged(&Value::Float(1.0)),
                constraints(&[]),
                BTreeMap::new(),
            )
            .await?;
    }
    let (_, snapshot) = store
        .watch_variables(
            "s",
            &["temp*".to_string(), "ghost".to_string()],
            WatchOptions {
                include_initial: true,
                filter: None,
            },
        )
        .await?;
    let names: Vec<&str> = snapshot.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["temp", "temperature"]);
    Ok(())
}

#[tokio::test]
async fn test_filter_drops_events() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(0)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;

    // Only let even values through.
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], WatchOptions {
            include_initial: false,
            filter: Some(Arc::new(|_, new| {
                matches!(new, Some(Value::Integer(n)) if n % 2 == 0)
            })),
        })
        .await?;

    for v in 1..=4i64 {
        store
            .update_variable("s", "x", tagged(&Value::Integer(v)), BTreeMap::new())
            .await?;
    }
    let versions: Vec<u32> = std::iter::from_fn(|| record.queue.try_pop())
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, vec![2, 4]);
    Ok(())
}

#[tokio::test]
async fn test_panicking_filter_is_drop_and_log() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(0)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], WatchOptions {
            include_initial: false,
            filter: Some(Arc::new(|_, _| panic!("bad filter"))),
        })
        .await?;

    // The update itself must succeed; the event is dropped.
    store
        .update_variable("s", "x", tagged(&Value::Integer(1)), BTreeMap::new())
        .await?;
    assert!(record.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_overflow_drops_oldest_and_surfaces_count() -> Result<()> {
    let (store, _) = new_store(TTL, 2);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(0)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], Default::default())
        .await?;

    for v in 1..=5i64 {
        store
            .update_variable("s", "x", tagged(&Value::Integer(v)), BTreeMap::new())
            .await?;
    }

    // Capacity 2: versions 1..3 were shed, 4 and 5 survive.
    let first = record.queue.try_pop().expect("first surviving event");
    assert_eq!(first.version, 4);
    assert_eq!(
        first.metadata.get(DROPPED_METADATA_KEY).map(String::as_str),
        Some("3")
    );
    let second = record.queue.try_pop().expect("second surviving event");
    assert_eq!(second.version, 5);
    assert!(!second.metadata.contains_key(DROPPED_METADATA_KEY));
    Ok(())
}

#[tokio::test]
async fn test_unregister_is_idempotent_and_stops_delivery() -> Result<()> {
    let (store, observers) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(0)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], Default::default())
        .await?;
    assert_eq!(store.list_watchers("s"), vec![record.id]);

    observers.unregister(record.id);
    observers.unregister(record.id);
    assert!(store.list_watchers("s").is_empty());

    store
        .update_variable("s", "x", tagged(&Value::Integer(1)), BTreeMap::new())
        .await?;
    assert!(record.queue.is_empty(), "no delivery after unregistration");
    Ok(())
}

#[tokio::test]
async fn test_sweeper_reaps_dead_liveness_handles() -> Result<()> {
    let (store, observers) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(0)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], Default::default())
        .await?;

    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = observers.spawn_sweeper(Duration::from_millis(100), shutdown.child_token());

    // Simulate liveness loss without an explicit unwatch.
    record.cancel.cancel();
    sleep(Duration::from_millis(350)).await;
    assert!(!observers.contains(record.id));

    shutdown.cancel();
    task.await?;
    Ok(())
}

#[tokio::test]
async fn test_deleted_variable_emits_terminal_event() -> Result<()> {
    let (store, _) = new_store(TTL, 64);
    store.create_session("s", None).await?;
    store
        .register_variable(
            "s",
            "x",
            VarType::Integer,
            tagged(&Value::Integer(7)),
            constraints(&[]),
            BTreeMap::new(),
        )
        .await?;
    let (record, _) = store
        .watch_variables("s", &["x".to_string()], Default::default())
        .await?;
    store.delete_variable("s", "x").await?;

    let event = record.queue.try_pop().expect("deletion event");
    assert_eq!(event.kind, UpdateKind::Deleted);
    assert_eq!(event.old_value, Some(Value::Integer(7)));
    assert_eq!(event.new_value, None);

    // No further delivery for the removed variable.
    assert!(record.queue.is_empty());
    Ok(())
}
