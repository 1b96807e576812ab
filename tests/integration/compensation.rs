//! Compensation integration tests.
//!
//! Tests that verify saga-style rollback after partial failure, undo of
//! completed macros, redo recovery when a rollback fails, and the
//! lifecycle events emitted along the way.

use cascade::testing::{Ledger, ScriptedCommand};
use cascade::{
    Command, CommandError, Context, Event, EventBus, Input, MacroCommand, ParallelComposer, State,
    WorkerPool,
};
use serde_json::json;
use std::sync::Arc;

use crate::common::{RecordingHandler, nested, nested_states, parallel_macro, sequential_macro};

#[tokio::test]
async fn test_parallel_failure_undoes_the_other_two() {
    let ledger = Ledger::new();
    let command = parallel_macro(
        "saga",
        3,
        vec![
            ScriptedCommand::new("reserve", &ledger),
            ScriptedCommand::new("charge", &ledger).failing_do(),
            ScriptedCommand::new("ship", &ledger),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_failed());
    assert_eq!(
        ctx.failure(),
        Some(&CommandError::ExecutionFailed("charge failed".to_string()))
    );
    assert!(ctx.result().is_none());
    assert_eq!(
        nested_states(&ctx),
        vec![State::Undone, State::Failed, State::Undone]
    );
    assert_eq!(ledger.count("reserve", "undo"), 1);
    assert_eq!(ledger.count("ship", "undo"), 1);
    assert!(!ledger.ran("charge", "undo"));
}

#[tokio::test]
async fn test_first_failure_in_completion_order_wins() {
    let ledger = Ledger::new();
    let command = sequential_macro(
        "saga",
        vec![
            ScriptedCommand::new("ok", &ledger),
            ScriptedCommand::new("broken", &ledger).failing_do(),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    assert_eq!(
        ctx.failure(),
        Some(&CommandError::ExecutionFailed("broken failed".to_string()))
    );
}

#[tokio::test]
async fn test_compensation_failure_leaves_context_failed() {
    let ledger = Ledger::new();
    let command = parallel_macro(
        "saga",
        2,
        vec![
            ScriptedCommand::new("sticky", &ledger).failing_undo(),
            ScriptedCommand::new("broken", &ledger).failing_do(),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_failed());
    // The parent reports the do failure, not the rollback failure
    assert_eq!(
        ctx.failure(),
        Some(&CommandError::ExecutionFailed("broken failed".to_string()))
    );
    assert_eq!(nested_states(&ctx), vec![State::Failed, State::Failed]);
}

#[tokio::test]
async fn test_undo_of_parallel_macro() {
    let ledger = Ledger::new();
    let command = parallel_macro(
        "batch",
        2,
        vec![
            ScriptedCommand::new("a", &ledger),
            ScriptedCommand::new("b", &ledger),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));
    command.do_command(&mut ctx).await.unwrap();
    match ctx.undo_input() {
        Some(Input::Compensation(ids)) => assert_eq!(ids.len(), 2),
        other => panic!("Expected compensation input, got {other:?}"),
    }

    command.undo_command(&mut ctx).await.unwrap();

    assert!(ctx.is_undone());
    assert_eq!(nested_states(&ctx), vec![State::Undone, State::Undone]);
}

#[tokio::test]
async fn test_undo_failure_redoes_successful_rollbacks() {
    let ledger = Ledger::new();
    let command = parallel_macro(
        "batch",
        2,
        vec![
            ScriptedCommand::new("a", &ledger).adding(1),
            ScriptedCommand::new("b", &ledger).failing_undo(),
            ScriptedCommand::new("c", &ledger).adding(3),
        ],
    );
    let mut ctx = Context::for_command(command.clone(), json!(0));
    command.do_command(&mut ctx).await.unwrap();

    command.undo_command(&mut ctx).await.unwrap();

    assert!(ctx.is_failed());
    assert_eq!(
        ctx.failure(),
        Some(&CommandError::ExecutionFailed(
            "b could not be reverted".to_string()
        ))
    );
    assert_eq!(
        nested_states(&ctx),
        vec![State::Done, State::Failed, State::Done]
    );
    assert_eq!(ledger.count("a", "do"), 2);
    assert_eq!(ledger.count("c", "do"), 2);
    assert_eq!(nested(&ctx)[2].result(), Some(&json!(3)));
}

#[tokio::test]
async fn test_undo_twice_is_rejected() {
    let ledger = Ledger::new();
    let command = sequential_macro("once", vec![ScriptedCommand::new("a", &ledger)]);
    let mut ctx = Context::for_command(command.clone(), json!(0));
    command.do_command(&mut ctx).await.unwrap();
    command.undo_command(&mut ctx).await.unwrap();

    let err = command.undo_command(&mut ctx).await.unwrap_err();

    assert!(err.is_programming_error());
    assert_eq!(ledger.count("a", "undo"), 1);
}

#[tokio::test]
async fn test_redo_after_undo() {
    let ledger = Ledger::new();
    let command = sequential_macro("again", vec![ScriptedCommand::new("a", &ledger).adding(2)]);
    let mut ctx = Context::for_command(command.clone(), json!(1));
    command.do_command(&mut ctx).await.unwrap();
    command.undo_command(&mut ctx).await.unwrap();

    command.do_command(&mut ctx).await.unwrap();

    assert!(ctx.is_done());
    assert_eq!(ctx.result(), Some(&json!(3)));
    assert_eq!(ledger.count("a", "do"), 2);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let ledger = Ledger::new();
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    let command = MacroCommand::parallel(
        "observed",
        ParallelComposer::new(Arc::new(WorkerPool::new(2))),
    )
    .with_event_bus(Arc::clone(&bus));
    command
        .add_nested(ScriptedCommand::new("ok", &ledger).into_command())
        .unwrap();
    command
        .add_nested(ScriptedCommand::new("bad", &ledger).failing_do().into_command())
        .unwrap();
    let command = Arc::new(command);
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    let events = handler.events().await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], Event::MacroStarted { nested: 2, .. }));
    assert!(matches!(&events[1], Event::MacroFailed { error, .. } if error.contains("bad failed")));
    assert!(matches!(
        events[2],
        Event::CompensationStarted { contexts: 1, .. }
    ));
    assert!(events.iter().all(|e| e.context_id() == ctx.id()));
}

#[tokio::test]
async fn test_successful_macro_emits_completion() {
    let ledger = Ledger::new();
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    let command = MacroCommand::sequential("observed").with_event_bus(bus);
    command
        .add_nested(ScriptedCommand::new("ok", &ledger).into_command())
        .unwrap();
    let command = Arc::new(command);
    let mut ctx = Context::for_command(command.clone(), json!(0));

    command.do_command(&mut ctx).await.unwrap();

    let events = handler.events().await;
    assert_eq!(events.len(), 2);
    match &events[1] {
        Event::MacroCompleted { duration, .. } => assert!(duration.is_some()),
        other => panic!("Expected MacroCompleted event, got {other:?}"),
    }
}
