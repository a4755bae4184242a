use std::sync::Arc;

use pvshift::engine::sequential::SequentialEngine;
use pvshift::engine::{Engine, ExecutionOutcome};
use pvshift::error::{ErrorList, MigrateError};
use pvshift::events::{Event, EventBus};
use pvshift::strategy::Strategy;
use pvshift::strategy::mock::{CallLog, MockStrategy};
use pvshift::history::RunRecord;
use pvshift::task::{Task, TaskOptions, Volume, cancel_pair};

fn task() -> Task {
    Task::new(
        Volume::parse("/srv/source").unwrap(),
        Volume::parse("/srv/dest").unwrap(),
        TaskOptions::default(),
    )
}

async fn execute(strategies: Vec<Arc<dyn Strategy>>) -> ExecutionOutcome {
    SequentialEngine::new().execute(&task(), &strategies).await
}

#[tokio::test]
async fn picks_lowest_priority_feasible_and_stops_probing() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("a", 10, &log).into_arc(),
        MockStrategy::new("b", 5, &log).feasible(false).into_arc(),
        MockStrategy::new("c", 1, &log).into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert_eq!(outcome.selected(), Some("c"));
    assert!(outcome.is_success());
    assert_eq!(log.calls(), vec!["can_do:c", "run:c", "cleanup:c"]);
}

#[tokio::test]
async fn rejected_strategies_are_skipped_in_rank_order() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("a", 10, &log).into_arc(),
        MockStrategy::new("b", 5, &log).feasible(false).into_arc(),
        MockStrategy::new("c", 1, &log).feasible(false).into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert_eq!(outcome.selected(), Some("a"));
    assert_eq!(
        log.calls(),
        vec!["can_do:c", "can_do:b", "can_do:a", "run:a", "cleanup:a"]
    );
}

#[tokio::test]
async fn equal_priorities_keep_registration_order() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("first", 5, &log).into_arc(),
        MockStrategy::new("second", 5, &log).into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert_eq!(outcome.selected(), Some("first"));
    assert_eq!(log.count("can_do", "second"), 0);
}

#[tokio::test]
async fn nothing_feasible_runs_nothing() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("a", 10, &log).feasible(false).into_arc(),
        MockStrategy::new("b", 5, &log).feasible(false).into_arc(),
        MockStrategy::new("c", 1, &log).feasible(false).into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert!(outcome.selected().is_none());
    assert!(log.calls().iter().all(|c| c.starts_with("can_do:")));
    match outcome.into_result() {
        Err(MigrateError::NoFeasibleStrategy { attempted }) => {
            assert_eq!(attempted, vec!["c", "b", "a"]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_task_stops_probing_and_records_interrupt() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("a", 1, &log).into_arc(),
        MockStrategy::new("b", 2, &log).into_arc(),
    ];
    let (handle, token) = cancel_pair();
    let task = task().with_cancel(token);
    handle.cancel();

    let outcome = SequentialEngine::new().execute(&task, &strategies).await;

    assert!(outcome.selected().is_none());
    assert!(log.calls().is_empty());
    let record = RunRecord::from_outcome(&task, &outcome);
    assert!(record.interrupted);
    assert!(!record.succeeded());
}

#[tokio::test]
async fn empty_strategy_list_is_not_feasible() {
    let outcome = execute(Vec::new()).await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::NoneFeasible { ref attempted } if attempted.is_empty()
    ));
}

#[tokio::test]
async fn cleanup_runs_once_after_failed_run() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("a", 1, &log)
            .run_error("transfer aborted")
            .into_arc(),
        MockStrategy::new("b", 2, &log).into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert!(!outcome.run_succeeded());
    assert!(outcome.cleanup_succeeded());
    assert_eq!(log.count("cleanup", "a"), 1);
    // No fallback to the next strategy once one was selected.
    assert_eq!(log.count("can_do", "b"), 0);
    assert_eq!(log.count("run", "b"), 0);
}

#[tokio::test]
async fn cleanup_runs_once_after_panicking_run() {
    let log = CallLog::new();
    let strategies = vec![MockStrategy::new("boom", 1, &log).run_panics().into_arc()];

    let outcome = execute(strategies).await;

    assert_eq!(log.count("cleanup", "boom"), 1);
    let err = outcome.into_result().unwrap_err();
    assert!(err.to_string().contains("panicked"));
}

#[tokio::test]
async fn run_and_cleanup_errors_are_both_reported() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("relay", 1, &log)
            .run_error("transfer aborted")
            .cleanup_errors(&["failed to remove temp pod"])
            .into_arc(),
    ];

    let err = execute(strategies).await.into_result().unwrap_err();

    let text = err.to_string();
    assert!(text.contains("transfer aborted"), "{text}");
    assert!(text.contains("failed to remove temp pod"), "{text}");
}

#[tokio::test]
async fn cleanup_aggregate_keeps_every_failure() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("leaky", 1, &log)
            .cleanup_errors(&["service", "pod", "secret"])
            .into_arc(),
    ];

    let outcome = execute(strategies).await;

    assert!(outcome.run_succeeded());
    let ExecutionOutcome::Executed {
        cleanup: Err(err), ..
    } = &outcome
    else {
        panic!("expected a cleanup failure");
    };
    let list = err.downcast_ref::<ErrorList>().unwrap();
    assert_eq!(list.len(), 3);

    let err = outcome.into_result().unwrap_err();
    assert!(matches!(err, MigrateError::Cleanup { .. }));
    for part in ["service", "pod", "secret"] {
        assert!(err.to_string().contains(part));
    }
}

#[tokio::test]
async fn events_follow_the_cycle() {
    let log = CallLog::new();
    let strategies = vec![
        MockStrategy::new("slow", 1, &log).feasible(false).into_arc(),
        MockStrategy::new("fast", 2, &log).into_arc(),
    ];
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let engine = SequentialEngine::with_events(Arc::clone(&bus));

    engine.execute(&task(), &strategies).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let name = |s: &str| s.to_string();
    assert_eq!(
        events,
        vec![
            Event::Probing { strategy: name("slow") },
            Event::Rejected { strategy: name("slow") },
            Event::Probing { strategy: name("fast") },
            Event::Selected { strategy: name("fast") },
            Event::RunFinished {
                strategy: name("fast"),
                success: true
            },
            Event::CleanupFinished {
                strategy: name("fast"),
                success: true
            },
        ]
    );
}
