//! Parallel macro integration tests.
//!
//! Tests that verify the worker/coordinator handoff: the barrier releases
//! only after every nested context is terminal, actions never overlap,
//! rejected workers cancel their contexts and interruption is surfaced.

use cascade::testing::{Ledger, ScriptedCommand};
use cascade::{
    Command, CommandError, ConfigLoader, Context, MacroCommand, ParallelComposer, State,
    WorkerPool,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::{nested, nested_states, parallel_macro, steps};

#[tokio::test]
async fn test_barrier_waits_for_every_nested_context() {
    for n in [0usize, 1, 3, 8] {
        let ledger = Ledger::new();
        let slow = steps(&ledger, n)
            .into_iter()
            .map(|s| s.with_delay(Duration::from_millis(5)))
            .collect();
        let command = parallel_macro("fan-out", 3, slow);
        let mut ctx = Context::for_command(command.clone(), json!(1));

        command.do_command(&mut ctx).await.unwrap();

        assert!(ctx.is_done(), "n = {n}");
        assert_eq!(nested(&ctx).len(), n);
        assert!(nested(&ctx).iter().all(|c| c.state().is_terminal()));
        assert_eq!(ledger.calls().len(), n);
    }
}

#[tokio::test]
async fn test_empty_parallel_macro_returns_null() {
    let command = parallel_macro("empty", 2, Vec::new());
    let mut ctx = Context::for_command(command.clone(), json!(1));

    tokio::time::timeout(Duration::from_millis(200), command.do_command(&mut ctx))
        .await
        .expect("empty macro blocked")
        .unwrap();

    assert!(ctx.is_done());
    assert_eq!(ctx.result(), Some(&serde_json::Value::Null));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_side_effects_never_overlap() {
    let ledger = Ledger::new();
    let slow = steps(&ledger, 10)
        .into_iter()
        .map(|s| s.with_delay(Duration::from_millis(5)))
        .collect();
    let command = parallel_macro("serialized", 8, slow);
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_done());
    assert_eq!(ledger.max_in_flight(), 1);
}

#[tokio::test]
async fn test_result_is_last_in_original_order() {
    let ledger = Ledger::new();
    let command = parallel_macro(
        "ordered",
        4,
        vec![
            ScriptedCommand::new("slow", &ledger)
                .adding(1)
                .with_delay(Duration::from_millis(20)),
            ScriptedCommand::new("fast", &ledger).adding(2),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    let names: Vec<&str> = nested(&ctx).iter().map(Context::command_name).collect();
    assert_eq!(names, vec!["slow", "fast"]);
    assert_eq!(ctx.result(), Some(&json!(2)));
}

#[tokio::test]
async fn test_shut_down_pool_cancels_and_fails_parent() {
    let ledger = Ledger::new();
    let pool = Arc::new(WorkerPool::new(2));
    pool.shutdown();
    let command = MacroCommand::parallel("rejected", ParallelComposer::new(pool));
    for step in steps(&ledger, 3) {
        command.add_nested(step.into_command()).unwrap();
    }
    let command = Arc::new(command);
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_failed());
    assert_eq!(
        ctx.failure(),
        Some(&CommandError::Cancelled("rejected".to_string()))
    );
    assert_eq!(nested_states(&ctx), vec![State::Cancelled; 3]);
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn test_interrupt_surfaces_to_caller() {
    let ledger = Ledger::new();
    let token = CancellationToken::new();
    let composer = ParallelComposer::new(Arc::new(WorkerPool::new(2))).with_interrupt(token.clone());
    let command = MacroCommand::parallel("interruptible", composer);
    for step in steps(&ledger, 2) {
        command.add_nested(step.into_command()).unwrap();
    }
    let command = Arc::new(command);
    let mut ctx = Context::for_command(command.clone(), json!(0));
    token.cancel();

    let err = command.do_command(&mut ctx).await.unwrap_err();

    assert_eq!(err, CommandError::Interrupted("interruptible".to_string()));
    assert!(ctx.is_failed());
    assert!(token.is_cancelled());
    // Contexts whose action already ran are written back with their state
    assert_eq!(nested(&ctx).len(), 2);
    assert!(nested(&ctx).iter().all(|c| c.state().is_terminal()));
    assert_eq!(nested_states(&ctx), vec![State::Done, State::Done]);
}

#[tokio::test]
async fn test_pool_shared_between_macros() {
    let ledger = Ledger::new();
    let pool = Arc::new(WorkerPool::new(2));
    let first = MacroCommand::parallel("first", ParallelComposer::new(Arc::clone(&pool)));
    let second = MacroCommand::parallel("second", ParallelComposer::new(Arc::clone(&pool)));
    for step in steps(&ledger, 3) {
        first.add_nested(step.into_command()).unwrap();
    }
    for step in steps(&ledger, 2) {
        second.add_nested(step.into_command()).unwrap();
    }
    let (first, second) = (Arc::new(first), Arc::new(second));
    let mut first_ctx = Context::for_command(first.clone(), json!(0));
    let mut second_ctx = Context::for_command(second.clone(), json!(0));

    let (a, b) = tokio::join!(
        first.do_command(&mut first_ctx),
        second.do_command(&mut second_ctx)
    );

    a.unwrap();
    b.unwrap();
    assert!(first_ctx.is_done());
    assert!(second_ctx.is_done());
    assert_eq!(pool.available_permits(), 2);
}

#[tokio::test]
async fn test_composer_from_yaml_config() {
    let config = ConfigLoader::parse("workers: 1\nhandoff_capacity: 1\n").unwrap();
    let ledger = Ledger::new();
    let command = MacroCommand::parallel("configured", ParallelComposer::from_config(&config));
    for step in steps(&ledger, 4) {
        command.add_nested(step.adding(1).into_command()).unwrap();
    }
    let command = Arc::new(command);
    let mut ctx = Context::for_command(command.clone(), json!(1));

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_done());
    assert_eq!(ctx.result(), Some(&json!(2)));
    assert_eq!(ledger.calls().len(), 4);
}
