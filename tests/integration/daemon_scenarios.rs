//! End-to-end daemon scenarios against the mock marketplace.

use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use autolend::engine::{ConfirmationRegistry, Daemon, DaemonReport, DaemonState, DryRunInvestor, ShutdownSignal};
use autolend::events::Event;
use autolend::platforms::Marketplace;
use autolend::refresh::RefreshOutcome;
use autolend::secrets::{InMemorySecretProvider, PasswordAuthenticator};
use autolend::strategy::{self, StrategyCell};
use autolend::types::{Loan, Rating, ReturnCode};

use crate::mock_marketplace::{
    context, fast_config, loaded_strategy, picky_strategy, BrokenStrategy, EventRecorder, MockMarketplace,
    PickyStrategy,
};

fn authenticator() -> Arc<PasswordAuthenticator> {
    let secrets = InMemorySecretProvider::fallback("lender", SecretString::new("hunter2".into()));
    Arc::new(PasswordAuthenticator::new(Arc::new(secrets)))
}

struct Running {
    recorder: Arc<EventRecorder>,
    investor: Arc<DryRunInvestor>,
    shutdown: ShutdownSignal,
    join: tokio::task::JoinHandle<DaemonReport>,
}

fn launch(marketplace: Arc<MockMarketplace>, strategy: Arc<StrategyCell>) -> Running {
    let (ctx, recorder) = context();
    let investor = Arc::new(DryRunInvestor::new(dec!(10000)));
    let daemon = Daemon::new(
        ctx.clone(),
        fast_config(),
        marketplace,
        authenticator(),
        strategy,
        investor.clone(),
    );
    Running {
        recorder,
        investor,
        shutdown: ctx.shutdown.clone(),
        join: tokio::spawn(daemon.run()),
    }
}

async fn finish(running: Running) -> (DaemonReport, Arc<EventRecorder>, Arc<DryRunInvestor>) {
    running.shutdown.grant();
    let report = tokio::time::timeout(Duration::from_secs(5), running.join)
        .await
        .expect("daemon did not stop")
        .unwrap();
    (report, running.recorder, running.investor)
}

// -- Polled -------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_polled_single_loan_survives_earlier_failed_batch() {
    let marketplace = MockMarketplace::polled(vec![
        vec![Loan::sample(0, Rating::B)],
        vec![Loan::sample(1, Rating::A)],
    ]);
    let running = launch(marketplace.clone(), picky_strategy().await);

    running.recorder.wait_for_evaluations(2).await;
    let (report, recorder, investor) = finish(running).await;

    assert_eq!(report.state, DaemonState::Stopped);
    assert_eq!(report.return_code, ReturnCode::Ok);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.batches_evaluated, 1);
    assert_eq!(marketplace.closes(), 1);
    assert!(marketplace.runs() >= 2);

    let evaluated: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::BatchEvaluated { .. }))
        .collect();
    assert_eq!(evaluated.len(), 1);
    assert_eq!(report.investments.len(), 1);
    assert_eq!(report.investments[0].loan_id, 1);
    assert_eq!(investor.balance(), dec!(9800));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_polled_fatal_run_crashes() {
    let marketplace = MockMarketplace::polled(vec![vec![Loan::sample(1, Rating::A)]]);
    marketplace.set_fatal();
    let running = launch(marketplace.clone(), picky_strategy().await);

    let report = tokio::time::timeout(Duration::from_secs(5), running.join)
        .await
        .expect("daemon did not crash")
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![DaemonState::Starting, DaemonState::Running, DaemonState::Crashed]
    );
    assert_eq!(report.return_code, ReturnCode::Error);
    assert!(report.cause.as_deref().unwrap().contains("account suspended"));
    assert_eq!(marketplace.closes(), 1);
    assert!(running.recorder.evaluations().is_empty());
    assert!(running
        .recorder
        .events()
        .iter()
        .any(|e| matches!(e, Event::DaemonCrashed { .. })));
}

// -- Listening ----------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listening_batches_in_order() {
    let marketplace = MockMarketplace::listening(vec![
        vec![Loan::sample(1, Rating::A)],
        vec![],
        vec![Loan::sample(2, Rating::C)],
    ]);
    let running = launch(marketplace.clone(), picky_strategy().await);

    running.recorder.wait_for_evaluations(3).await;
    let (report, recorder, _) = finish(running).await;

    assert_eq!(report.state, DaemonState::Stopped);
    assert_eq!(
        report.transitions,
        vec![
            DaemonState::Starting,
            DaemonState::Running,
            DaemonState::Stopping,
            DaemonState::Stopped
        ]
    );
    assert_eq!(marketplace.closes(), 1);
    assert_eq!(marketplace.runs(), 1);

    let offered: Vec<usize> = recorder
        .evaluations()
        .iter()
        .map(|e| match e {
            Event::BatchEvaluated { offered, .. } => *offered,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(offered, vec![1, 0, 1]);

    let kinds = recorder.kinds();
    assert_eq!(kinds.first(), Some(&"daemon_started"));
    assert_eq!(kinds.last(), Some(&"daemon_ending"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listening_shutdown_right_after_delivery_keeps_queued_batches() {
    let marketplace = MockMarketplace::listening(vec![
        vec![Loan::sample(1, Rating::A)],
        vec![],
        vec![Loan::sample(2, Rating::C)],
    ]);
    let (ctx, recorder) = context();
    marketplace.shutdown_after_script(ctx.shutdown.clone());
    let strategy = loaded_strategy(|| {
        Box::new(PickyStrategy {
            delay: Duration::from_millis(30),
        })
    })
    .await;
    let daemon = Daemon::new(
        ctx,
        fast_config(),
        marketplace.clone(),
        authenticator(),
        strategy,
        Arc::new(DryRunInvestor::new(dec!(10000))),
    );
    let report = tokio::time::timeout(Duration::from_secs(5), daemon.run())
        .await
        .expect("daemon did not stop");

    assert_eq!(report.state, DaemonState::Stopped);
    assert_eq!(report.batches_evaluated, 3);
    assert_eq!(marketplace.closes(), 1);

    let offered: Vec<usize> = recorder
        .evaluations()
        .iter()
        .map(|e| match e {
            Event::BatchEvaluated { offered, .. } => *offered,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(offered, vec![1, 0, 1]);

    // Every decision reaches listeners before the daemon announces its end.
    let kinds = recorder.kinds();
    assert_eq!(kinds.last(), Some(&"daemon_ending"));
    assert_eq!(kinds.iter().filter(|k| **k == "daemon_ending").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listening_fatal_run_crashes() {
    let marketplace = MockMarketplace::listening(vec![]);
    marketplace.set_fatal();
    let running = launch(marketplace.clone(), picky_strategy().await);

    let report = tokio::time::timeout(Duration::from_secs(5), running.join)
        .await
        .expect("daemon did not crash")
        .unwrap();

    assert_eq!(report.state, DaemonState::Crashed);
    assert_eq!(
        report.transitions,
        vec![DaemonState::Starting, DaemonState::Running, DaemonState::Crashed]
    );
    assert_eq!(marketplace.closes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrecoverable_strategy_crashes() {
    let marketplace = MockMarketplace::listening(vec![vec![Loan::sample(1, Rating::A)]]);
    let strategy = loaded_strategy(|| Box::new(BrokenStrategy)).await;
    let running = launch(marketplace.clone(), strategy);

    let report = tokio::time::timeout(Duration::from_secs(5), running.join)
        .await
        .expect("daemon did not crash")
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![DaemonState::Starting, DaemonState::Running, DaemonState::Crashed]
    );
    assert_eq!(report.return_code, ReturnCode::Error);
    assert!(report.cause.as_deref().unwrap().contains("ledger corrupted"));
    assert_eq!(marketplace.closes(), 1);
    assert!(running.recorder.evaluations().is_empty());
    assert_eq!(running.recorder.kinds().last(), Some(&"daemon_crashed"));
}

// -- Confirmation -------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_confirmation_provider_approves_flagged_investments() {
    let mut path = std::env::temp_dir();
    path.push(format!("autolend_it_confirm_{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, "confirm_above = 300\n\n[amounts]\nA = 400\nB = 200\n").unwrap();
    let cell = strategy::rating_strategy_cell(&path);
    assert_eq!(cell.refresh().await, RefreshOutcome::Updated);

    let marketplace = MockMarketplace::listening(vec![vec![Loan::sample(1, Rating::A), Loan::sample(2, Rating::B)]]);
    let (ctx, recorder) = context();
    let secrets = Arc::new(InMemorySecretProvider::new());
    let provider = ConfirmationRegistry::with_defaults().build("approve", secrets).unwrap();
    let investor = Arc::new(DryRunInvestor::new(dec!(10000)));
    let daemon = Daemon::new(ctx.clone(), fast_config(), marketplace, authenticator(), cell, investor.clone())
        .with_confirmation(provider);
    let join = tokio::spawn(daemon.run());

    recorder.wait_for_evaluations(1).await;
    ctx.shutdown.grant();
    let report = join.await.unwrap();

    let mut loans: Vec<u64> = report.investments.iter().map(|i| i.loan_id).collect();
    loans.sort_unstable();
    assert_eq!(loans, vec![1, 2]);
    assert_eq!(investor.balance(), dec!(9400));

    std::fs::remove_file(&path).unwrap();
}

// -- Start-up failures --------------------------------------------------

#[tokio::test]
async fn test_missing_credentials_crash_before_running() {
    let marketplace = MockMarketplace::polled(vec![]);
    let (ctx, recorder) = context();
    let daemon = Daemon::new(
        ctx,
        fast_config(),
        marketplace.clone(),
        Arc::new(PasswordAuthenticator::new(Arc::new(InMemorySecretProvider::new()))),
        picky_strategy().await,
        Arc::new(DryRunInvestor::new(dec!(100))),
    );
    let report = daemon.run().await;

    assert_eq!(report.transitions, vec![DaemonState::Starting, DaemonState::Crashed]);
    assert_eq!(report.return_code.exit_code(), 1);
    assert_eq!(marketplace.closes(), 1);
    assert_eq!(marketplace.runs(), 0);
    assert_eq!(recorder.kinds(), vec!["daemon_crashed"]);
}

#[tokio::test]
async fn test_rejected_listener_crashes() {
    let marketplace = MockMarketplace::polled(vec![]);
    marketplace.close().await.unwrap();

    let (ctx, _recorder) = context();
    let daemon = Daemon::new(
        ctx,
        fast_config(),
        marketplace.clone(),
        authenticator(),
        picky_strategy().await,
        Arc::new(DryRunInvestor::new(dec!(100))),
    );
    let report = daemon.run().await;

    assert_eq!(report.state, DaemonState::Crashed);
    assert!(report.cause.unwrap().contains("rejected the offer listener"));
    assert_eq!(marketplace.closes(), 2);
}

// -- Hot reload ---------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_strategy_file_picked_up_while_running() {
    let mut path = std::env::temp_dir();
    path.push(format!("autolend_it_strategy_{}.toml", uuid::Uuid::new_v4()));
    let cell = strategy::rating_strategy_cell(&path);
    assert_eq!(cell.refresh().await, RefreshOutcome::NoSource);

    let marketplace = MockMarketplace::listening(vec![vec![Loan::sample(1, Rating::A)]]);
    let running = launch(marketplace.clone(), cell.clone());
    running.recorder.wait_for_evaluations(1).await;
    assert!(matches!(
        &running.recorder.evaluations()[0],
        Event::BatchFailed { reason, .. } if reason == "no strategy available"
    ));

    std::fs::write(&path, "[amounts]\nA = 300\n").unwrap();
    assert_eq!(cell.refresh().await, RefreshOutcome::Updated);
    let (report, _, investor) = finish(running).await;
    assert_eq!(report.batches_failed, 1);
    assert_eq!(investor.balance(), dec!(10000));
    assert!(cell.latest().is_some());

    std::fs::remove_file(&path).unwrap();
}
