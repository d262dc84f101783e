//! End-to-end tests over the public API: both backends, the envelope
//! round-trips, pooling behavior, and kill semantics.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use offthread::{
    Config, InProcessSpawner, InlineProgram, Outcome, StartError, TaskError, Threads,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn isolated() -> Threads {
    init_tracing();
    Threads::new(Config::default())
}

fn in_process() -> Threads {
    init_tracing();
    Threads::with_spawner(Config::default(), Arc::new(InProcessSpawner))
}

#[tokio::test]
async fn test_join_returns_program_value() {
    let threads = isolated();
    threads.register("sum", |_ctx, args| {
        let total: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(Outcome::value(total))
    });

    let thread = threads.start("sum", vec![json!(1), json!(2), json!(3)]).unwrap();
    assert_eq!(thread.join().await.unwrap(), json!(6));
    assert!(thread.is_finished());
    assert_eq!(thread.result().unwrap().unwrap(), json!(6));
}

#[tokio::test]
async fn test_done_event_carries_the_value() {
    let threads = isolated();
    threads.register("answer", |_ctx, _args| Ok(Outcome::value(42)));

    let thread = threads.start("answer", vec![]).unwrap();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    thread.once("done", move |args| {
        sink.lock().unwrap().extend(args.iter().cloned());
    });

    thread.join().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!(42)]);
}

#[tokio::test]
async fn test_program_error_surfaces_as_task_error() {
    let threads = isolated();
    threads.register("fail", |_ctx, _args| {
        Err(TaskError::Failed {
            error: "deliberate failure".into(),
        })
    });

    let thread = threads.start("fail", vec![]).unwrap();
    let err = thread.join().await.unwrap_err();
    assert_eq!(err.as_label(), "task_failed");
    assert!(err.as_message().contains("deliberate failure"));
}

#[tokio::test]
async fn test_program_panic_is_contained() {
    let threads = isolated();
    threads.register("explode", |_ctx, _args| panic!("boom"));

    let thread = threads.start("explode", vec![]).unwrap();
    let err = thread.join().await.unwrap_err();
    assert!(err.as_message().contains("boom"));
}

#[tokio::test]
async fn test_pending_outcome_settles_later() {
    let threads = isolated();
    threads.register("deferred", |_ctx, args| {
        let echo = args.first().cloned().unwrap_or(Value::Null);
        Ok(Outcome::pending(async move {
            tokio::task::yield_now().await;
            Ok(echo)
        }))
    });

    let thread = threads.start("deferred", vec![json!("later")]).unwrap();
    assert_eq!(thread.join().await.unwrap(), json!("later"));
}

#[tokio::test]
async fn test_custom_events_flow_outward() {
    let threads = isolated();
    threads.register("chatty", |ctx, _args| {
        ctx.emit("progress", vec![json!(50)]);
        ctx.emit("progress", vec![json!(100)]);
        Ok(Outcome::value("finished"))
    });

    let thread = threads.start("chatty", vec![]).unwrap();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    thread.on("progress", move |args| {
        sink.lock().unwrap().extend(args.iter().cloned());
    });

    thread.join().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!(50), json!(100)]);
}

#[tokio::test]
async fn test_log_passes_through_as_an_event() {
    let threads = isolated();
    threads.register("logger", |ctx, _args| {
        ctx.log(vec![json!("working"), json!(1)]);
        Ok(Outcome::value(Value::Null))
    });

    let thread = threads.start("logger", vec![]).unwrap();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    thread.on("log", move |args| {
        sink.lock().unwrap().extend(args.iter().cloned());
    });

    thread.join().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!("working"), json!(1)]);
}

#[tokio::test]
async fn test_emit_reaches_the_running_program() {
    let threads = isolated();
    threads.register("wait_for_go", |ctx, _args| {
        let go = ctx.next_event("go");
        Ok(Outcome::pending(async move {
            let args = go.await;
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        }))
    });

    let thread = threads.start("wait_for_go", vec![]).unwrap();
    // Send order is preserved: the source envelope registers the listener
    // before this event is handled.
    thread.emit("go", vec![json!("payload")]);

    assert_eq!(thread.join().await.unwrap(), json!("payload"));
}

#[tokio::test]
async fn test_completed_worker_is_reused_oldest_first() {
    let threads = isolated();
    threads.register("noop", |_ctx, _args| Ok(Outcome::value(Value::Null)));

    let first = threads.start("noop", vec![]).unwrap();
    first.join().await.unwrap();
    assert_eq!(threads.spawned_workers(), 1);
    assert_eq!(threads.idle_workers(), 1);

    let second = threads.start("noop", vec![]).unwrap();
    second.join().await.unwrap();
    assert_eq!(threads.spawned_workers(), 1);
}

#[tokio::test]
async fn test_concurrent_tasks_get_separate_workers() {
    let threads = isolated();
    threads.register("wait_for_go", |ctx, _args| {
        let go = ctx.next_event("go");
        Ok(Outcome::pending(async move {
            go.await;
            Ok(Value::Null)
        }))
    });

    let a = threads.start("wait_for_go", vec![]).unwrap();
    let b = threads.start("wait_for_go", vec![]).unwrap();
    assert_eq!(threads.spawned_workers(), 2);

    a.emit("go", vec![]);
    b.emit("go", vec![]);
    a.join().await.unwrap();
    b.join().await.unwrap();
    assert_eq!(threads.idle_workers(), 2);
}

#[tokio::test]
async fn test_failed_task_retires_its_worker() {
    let threads = isolated();
    threads.register("fail", |_ctx, _args| {
        Err(TaskError::Failed {
            error: "nope".into(),
        })
    });
    threads.register("noop", |_ctx, _args| Ok(Outcome::value(Value::Null)));

    let failing = threads.start("fail", vec![]).unwrap();
    failing.join().await.unwrap_err();
    assert_eq!(threads.idle_workers(), 0);

    // The next task gets a fresh worker, not the retired one.
    let clean = threads.start("noop", vec![]).unwrap();
    clean.join().await.unwrap();
    assert_eq!(threads.spawned_workers(), 2);
}

#[tokio::test]
async fn test_kill_removes_worker_and_settles_join() {
    let threads = isolated();
    threads.register("forever", |_ctx, _args| {
        Ok(Outcome::pending(futures::future::pending()))
    });

    let thread = threads.start("forever", vec![]).unwrap();
    thread.kill();

    let err = thread.join().await.unwrap_err();
    assert_eq!(err.as_label(), "task_killed");
    assert!(thread.is_finished());
    assert_eq!(threads.idle_workers(), 0);
}

#[tokio::test]
async fn test_unregistered_name_is_a_task_level_error_on_workers() {
    let threads = isolated();

    // Resolution happens inside the worker, so start itself succeeds.
    let thread = threads.start("missing", vec![]).unwrap();
    let err = thread.join().await.unwrap_err();
    assert!(err.as_message().contains("not registered"));
}

#[tokio::test]
async fn test_inline_program_is_rejected_by_the_isolated_backend() {
    let threads = isolated();
    let program = InlineProgram::new(|_ctx, _args| Ok(Outcome::value(1)));

    let err = threads.start(program, vec![]).unwrap_err();
    assert!(matches!(err, StartError::NotPortable));
}

#[tokio::test]
async fn test_in_process_backend_runs_inline_programs() {
    let threads = in_process();
    assert!(!threads.is_isolated());

    let program = InlineProgram::new(|_ctx, args| {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Outcome::value(n * 2))
    });

    let thread = threads.start(program, vec![json!(21)]).unwrap();
    assert_eq!(thread.join().await.unwrap(), json!(42));
    assert_eq!(threads.spawned_workers(), 0);
}

#[tokio::test]
async fn test_in_process_backend_resolves_registered_names() {
    let threads = in_process();
    threads.register("greet", |_ctx, args| {
        let name = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("stranger")
            .to_string();
        Ok(Outcome::value(format!("hello, {name}")))
    });

    let thread = threads.start("greet", vec![json!("ada")]).unwrap();
    assert_eq!(thread.join().await.unwrap(), json!("hello, ada"));
}

#[tokio::test]
async fn test_in_process_unregistered_name_fails_at_start() {
    let threads = in_process();
    let err = threads.start("missing", vec![]).unwrap_err();
    assert!(matches!(err, StartError::Unresolved { .. }));
}

#[tokio::test]
async fn test_in_process_events_flow_both_ways() {
    let threads = in_process();
    let program = InlineProgram::new(|ctx, _args| {
        ctx.emit("started", vec![]);
        let go = ctx.next_event("go");
        Ok(Outcome::pending(async move {
            let args = go.await;
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        }))
    });

    let thread = threads.start(program, vec![]).unwrap();
    // The body is deferred; wait for its first event before emitting inward.
    thread.next_event("started").await;
    thread.emit("go", vec![json!("round trip")]);

    assert_eq!(thread.join().await.unwrap(), json!("round trip"));
}

#[tokio::test]
async fn test_in_process_kill_is_a_noop() {
    let threads = in_process();
    let program = InlineProgram::new(|_ctx, _args| Ok(Outcome::value("survived")));

    let thread = threads.start(program, vec![]).unwrap();
    thread.kill();

    assert_eq!(thread.join().await.unwrap(), json!("survived"));
}

#[tokio::test]
async fn test_in_process_panic_is_contained() {
    let threads = in_process();
    let program = InlineProgram::new(|_ctx, _args| panic!("local boom"));

    let thread = threads.start(program, vec![]).unwrap();
    let err = thread.join().await.unwrap_err();
    assert!(err.as_message().contains("local boom"));
}
