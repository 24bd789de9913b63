//! End-to-end pipeline tests: lifecycle registration, read collapsing,
//! null handling, and failure recovery against the in-memory twin.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dtg_dispatch::{
    Arg, Capability, CommitFn, DispatchError, FnHandler, HandlerRecord, HandlerResult, NullAction,
    OpKind, OwnerId, ParamSpec, RegistrationEvent, ResourceDispatcher, UriSegment,
};
use dtg_twin::{MemoryTwin, ResourceKey, TimedValue, ValueType};
use serde_json::{Map, Value, json};
use tokio::sync::Notify;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn key() -> ResourceKey {
    ResourceKey::new(None, "thermostat", "sensor", "temperature")
}

fn commit_to(key: &ResourceKey) -> CommitFn {
    let key = key.clone();
    Box::new(move |twin, tv| twin.apply_value(&key, tv))
}

fn get_record(owner: u64, on_null: NullAction, handler: Arc<dyn dtg_dispatch::ResourceHandler>) -> HandlerRecord {
    HandlerRecord {
        owner: OwnerId(owner),
        providers: BTreeSet::new(),
        params: Vec::new(),
        on_null,
        handler,
    }
}

async fn twin_value(dispatcher: &ResourceDispatcher, key: &ResourceKey) -> Option<TimedValue> {
    let key = key.clone();
    dispatcher
        .gateway()
        .execute(move |twin| twin.value_of(&key))
        .await
        .unwrap()
}

#[tokio::test]
async fn concurrent_pulls_collapse_onto_one_invocation() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let handler = {
        let calls = calls.clone();
        let started = started.clone();
        let release = release.clone();
        FnHandler::new(move |_| {
            let calls = calls.clone();
            let started = started.clone();
            let release = release.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                started.notify_one();
                release.notified().await;
                Ok(HandlerResult::Value(json!(21.5)))
            }
        })
    };
    dispatcher
        .registry()
        .register(OpKind::Get, key(), get_record(1, NullAction::Update, handler));

    // Both pulls are polled on this task before the handler resolves, so
    // the second one joins the first one's pipeline.
    let k = key();
    let (first, second, ()) = tokio::join!(
        dispatcher.pull_value(&k, "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&k)),
        dispatcher.pull_value(&k, "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&k)),
        async {
            started.notified().await;
            release.notify_one();
        }
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.value, Some(json!(21.5)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The pipeline settled, so the in-flight entry is gone and the twin
    // holds the committed value.
    assert!(!dispatcher.pending().contains(&key()));
    assert_eq!(twin_value(&dispatcher, &key()).await, Some(first));
}

#[tokio::test]
async fn in_flight_reads_do_not_mask_resolution_misses() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let handler = {
        let started = started.clone();
        let release = release.clone();
        FnHandler::new(move |_| {
            let started = started.clone();
            let release = release.clone();
            async move {
                started.notify_one();
                release.notified().await;
                Ok(HandlerResult::Value(json!(21.5)))
            }
        })
    };
    // The only GET record serves p1 alone.
    dispatcher.registry().register(
        OpKind::Get,
        key(),
        HandlerRecord {
            owner: OwnerId(1),
            providers: ["p1".to_string()].into_iter().collect(),
            params: Vec::new(),
            on_null: NullAction::Update,
            handler,
        },
    );

    // While the p1 read is blocked inside its handler, a p2 read of the
    // same key must fail resolution instead of adopting p1's pipeline.
    let k = key();
    let (first, err) = tokio::join!(
        dispatcher.pull_value(&k, "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&k)),
        async {
            started.notified().await;
            let err = dispatcher
                .pull_value(&key(), "p2", ValueType::Any, TimedValue::EMPTY, commit_to(&key()))
                .await
                .unwrap_err();
            release.notify_one();
            err
        }
    );

    assert!(matches!(err, DispatchError::NoHandlerFound { .. }));
    assert_eq!(err.to_string(), "no suitable handler for thermostat/p2/sensor/temperature");
    assert_eq!(first.unwrap().value, Some(json!(21.5)));
}

#[tokio::test]
async fn pushes_are_never_collapsed() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = calls.clone();
        FnHandler::new(move |args: Vec<Arg>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Echo the value being written.
                match args.into_iter().next() {
                    Some(Arg::Timed(tv)) => Ok(HandlerResult::Timed(tv)),
                    other => anyhow::bail!("unexpected binding {other:?}"),
                }
            }
        })
    };
    dispatcher.registry().register(
        OpKind::Set,
        key(),
        HandlerRecord {
            owner: OwnerId(1),
            providers: BTreeSet::new(),
            params: vec![ParamSpec::NewValue],
            on_null: NullAction::Update,
            handler,
        },
    );

    let k = key();
    let (first, second) = tokio::join!(
        dispatcher.push_value(
            &k,
            "p1",
            ValueType::Any,
            TimedValue::EMPTY,
            TimedValue::new(json!(1), 100),
            commit_to(&k),
        ),
        dispatcher.push_value(
            &k,
            "p1",
            ValueType::Any,
            TimedValue::EMPTY,
            TimedValue::new(json!(2), 200),
            commit_to(&k),
        ),
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn null_policies_control_the_twin_commit() {
    init_tracing();
    for (on_null, seed, expect_commit) in [
        (NullAction::Ignore, Some(TimedValue::new(json!(1), 100)), false),
        (NullAction::Update, None, true),
        (NullAction::UpdateIfPresent, None, false),
        (NullAction::UpdateIfPresent, Some(TimedValue::new(json!(1), 100)), true),
    ] {
        let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
        let handler = FnHandler::new(|_| async { Ok(HandlerResult::None) });
        dispatcher
            .registry()
            .register(OpKind::Get, key(), get_record(1, on_null, handler));

        let cached = seed.clone().unwrap_or(TimedValue::EMPTY);
        if let Some(seed) = &seed {
            let k = key();
            let tv = seed.clone();
            dispatcher
                .gateway()
                .execute(move |twin| twin.apply_value(&k, &tv))
                .await
                .unwrap()
                .unwrap();
        }

        let out = dispatcher
            .pull_value(&key(), "p1", ValueType::Any, cached, commit_to(&key()))
            .await
            .unwrap();

        if expect_commit {
            // A freshly stamped empty value landed on the twin.
            assert!(out.value.is_none(), "{on_null:?}");
            assert!(out.timestamp.is_some(), "{on_null:?}");
            assert_eq!(twin_value(&dispatcher, &key()).await, Some(out));
        } else {
            // The twin kept whatever it had.
            assert_eq!(out, TimedValue::EMPTY, "{on_null:?}");
            assert_eq!(twin_value(&dispatcher, &key()).await, seed, "{on_null:?}");
        }
    }
}

#[tokio::test]
async fn failed_reads_clear_the_pending_entry() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = calls.clone();
        FnHandler::new(move |_| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    anyhow::bail!("backend unreachable");
                }
                Ok(HandlerResult::Value(json!(7)))
            }
        })
    };
    dispatcher
        .registry()
        .register(OpKind::Get, key(), get_record(1, NullAction::Update, handler));

    let err = dispatcher
        .pull_value(&key(), "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Invocation(_)));
    assert!(err.to_string().contains("backend unreachable"));
    assert!(!dispatcher.pending().contains(&key()));

    // A later pull is not poisoned by the earlier failure.
    let out = dispatcher
        .pull_value(&key(), "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap();
    assert_eq!(out.value, Some(json!(7)));
}

#[tokio::test]
async fn panicking_handlers_surface_as_invocation_errors() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let handler = FnHandler::new(|_| async { panic!("handler bug") });
    dispatcher
        .registry()
        .register(OpKind::Get, key(), get_record(1, NullAction::Update, handler));

    let err = dispatcher
        .pull_value(&key(), "p1", ValueType::Any, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Invocation(_)));
    assert!(!dispatcher.pending().contains(&key()));
}

#[tokio::test]
async fn result_type_mismatch_is_rejected_before_the_commit() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let handler = FnHandler::new(|_| async { Ok(HandlerResult::Value(json!("warm"))) });
    dispatcher
        .registry()
        .register(OpKind::Get, key(), get_record(1, NullAction::Update, handler));

    let err = dispatcher
        .pull_value(&key(), "p1", ValueType::Integer, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidResultType { .. }));
    assert_eq!(twin_value(&dispatcher, &key()).await, None);
}

#[tokio::test]
async fn act_binds_uri_segments_and_coerces_named_arguments() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let handler = FnHandler::new(|args: Vec<Arg>| async move {
        let [Arg::Text(resource), Arg::Value(Some(Value::Number(level)))] = args.as_slice() else {
            anyhow::bail!("unexpected binding {args:?}");
        };
        Ok(HandlerResult::Value(json!(format!("{resource}={level}"))))
    });
    dispatcher.registry().register(
        OpKind::Act,
        key(),
        HandlerRecord {
            owner: OwnerId(1),
            providers: BTreeSet::new(),
            params: vec![
                ParamSpec::Uri(UriSegment::Resource),
                ParamSpec::Named { name: "level".into(), ty: ValueType::Integer },
            ],
            on_null: NullAction::default(),
            handler,
        },
    );

    // The caller supplies the level as a string; the binder coerces it.
    let mut args = Map::new();
    args.insert("level".into(), json!("3"));
    let out = dispatcher.act(&key(), "p1", args).await.unwrap();
    assert_eq!(out, json!("temperature=3"));
}

#[tokio::test]
async fn lifecycle_registration_update_and_removal() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));
    let act_key = ResourceKey::new(None, "thermostat", "actuator", "calibrate");

    let event = RegistrationEvent {
        owner: OwnerId(7),
        capabilities: vec![
            Capability {
                kind: OpKind::Get,
                key: key(),
                providers: BTreeSet::new(),
                params: Vec::new(),
                on_null: NullAction::Update,
                declared_type: ValueType::Float,
                handler: FnHandler::new(|_| async { Ok(HandlerResult::Value(json!(19.0))) }),
            },
            Capability {
                kind: OpKind::Act,
                key: act_key.clone(),
                providers: BTreeSet::new(),
                params: Vec::new(),
                on_null: NullAction::default(),
                declared_type: ValueType::Any,
                handler: FnHandler::new(|_| async { Ok(HandlerResult::Value(json!(true))) }),
            },
        ],
    };
    dispatcher.on_handler_registered(event).await.unwrap();

    // Registration created the backing resources on the twin.
    assert_eq!(twin_value(&dispatcher, &key()).await, Some(TimedValue::EMPTY));
    assert_eq!(twin_value(&dispatcher, &act_key).await, Some(TimedValue::EMPTY));

    // Both capabilities are live.
    let out = dispatcher
        .pull_value(&key(), "p1", ValueType::Float, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap();
    assert_eq!(out.value, Some(json!(19.0)));
    assert_eq!(dispatcher.act(&act_key, "p1", Map::new()).await.unwrap(), json!(true));

    // Narrowing the scope from catch-all to one provider drops the others.
    dispatcher.on_handler_updated(OwnerId(7), &["p1".to_string()].into_iter().collect());
    assert_eq!(dispatcher.act(&act_key, "p1", Map::new()).await.unwrap(), json!(true));
    let err = dispatcher.act(&act_key, "p2", Map::new()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoHandlerFound { .. }));

    // Removal withdraws everything the owner registered.
    dispatcher.on_handler_removed(OwnerId(7));
    let err = dispatcher.act(&act_key, "p1", Map::new()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoHandlerFound { .. }));
    let err = dispatcher
        .pull_value(&key(), "p1", ValueType::Float, TimedValue::EMPTY, commit_to(&key()))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoHandlerFound { .. }));
}

#[tokio::test]
async fn conflicting_resource_declarations_skip_the_capability() {
    init_tracing();
    let (dispatcher, _task) = ResourceDispatcher::new(Box::new(MemoryTwin::new()));

    // The key already exists as a value resource.
    dispatcher
        .on_handler_registered(RegistrationEvent {
            owner: OwnerId(1),
            capabilities: vec![Capability {
                kind: OpKind::Get,
                key: key(),
                providers: BTreeSet::new(),
                params: Vec::new(),
                on_null: NullAction::Update,
                declared_type: ValueType::Float,
                handler: FnHandler::new(|_| async { Ok(HandlerResult::None) }),
            }],
        })
        .await
        .unwrap();

    // An ACT capability on the same key conflicts and is skipped, while a
    // sibling capability in the same event still registers.
    let other = ResourceKey::new(None, "thermostat", "sensor", "humidity");
    dispatcher
        .on_handler_registered(RegistrationEvent {
            owner: OwnerId(2),
            capabilities: vec![
                Capability {
                    kind: OpKind::Act,
                    key: key(),
                    providers: BTreeSet::new(),
                    params: Vec::new(),
                    on_null: NullAction::default(),
                    declared_type: ValueType::Any,
                    handler: FnHandler::new(|_| async { Ok(HandlerResult::Value(json!(1))) }),
                },
                Capability {
                    kind: OpKind::Get,
                    key: other.clone(),
                    providers: BTreeSet::new(),
                    params: Vec::new(),
                    on_null: NullAction::Update,
                    declared_type: ValueType::Float,
                    handler: FnHandler::new(|_| async { Ok(HandlerResult::Value(json!(0.4))) }),
                },
            ],
        })
        .await
        .unwrap();

    let err = dispatcher.act(&key(), "p1", Map::new()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoHandlerFound { .. }));
    let out = dispatcher
        .pull_value(&other, "p1", ValueType::Float, TimedValue::EMPTY, commit_to(&other))
        .await
        .unwrap();
    assert_eq!(out.value, Some(json!(0.4)));
}
