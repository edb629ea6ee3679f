// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use stagehand_runner::runner::RepeatCount;
use std::sync::{Arc, OnceLock};

#[tokio::test]
async fn failure_in_one_iteration_fails_the_run() -> Result<()> {
    let workspace = TestWorkspace::new();
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    // One batch per iteration: index 1 is iteration 2.
    let (stats, runner) = run_suites(
        vec![led],
        workspace.settings(None),
        FakeExecutor::failing_batches([1]),
        FakeLauncher::default(),
        RepeatCount::from_count(3),
    )
    .await;

    assert_eq!(stats.iterations, 3, "all iterations run");
    assert_eq!(stats.batches_run, 3);
    assert_eq!(stats.batches_failed, 1);
    ensure!(stats.failed, "failed flag is sticky");
    ensure!(!stats.is_success(), "run failed");

    let results = workspace.results_dir();
    let logs: Vec<_> = executor(&runner)
        .batches
        .iter()
        .map(|batch| batch.log_path.clone())
        .collect();
    assert_eq!(
        logs,
        vec![
            results.join("iteration-1/led.xml"),
            results.join("iteration-2/led.xml"),
            results.join("iteration-3/led.xml"),
        ]
    );
    assert_eq!(stats.reports[0].summary.totals.failures, 1);
    Ok(())
}

#[tokio::test]
async fn forever_runs_until_interrupted() -> Result<()> {
    let workspace = TestWorkspace::new();
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    let slot = Arc::new(OnceLock::new());
    let mut runner = build_runner(
        vec![led],
        workspace.settings(None),
        FakeExecutor::interrupting_after(5, slot.clone()),
        FakeLauncher::default(),
        RepeatCount::from_count(0),
    );
    slot.set(runner.interrupt_handle()).expect("handle set once");

    let stats = runner.drive_all().await;
    ensure!(stats.interrupted, "run was interrupted");
    ensure!(stats.is_success(), "interruption alone is not a failure");
    assert_eq!(stats.iterations, 5);
    assert_eq!(stats.batches_run, 5);
    assert_eq!(helper_events(&runner), ["start", "stop"], "cleanup still ran");
    assert_eq!(stats.reports.len(), 1);
    Ok(())
}

#[tokio::test]
async fn forever_with_nothing_prepared_returns() -> Result<()> {
    let workspace = TestWorkspace::new();
    let cyclic = workspace.write_suite(
        "cyclic.robot",
        "*** Test Cases ***\nA\n    Requires    a\n    Provides    a\n",
    );

    let (stats, runner) = run_suites(
        vec![cyclic],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::Forever,
    )
    .await;

    assert_eq!(stats.iterations, 0);
    assert_eq!(stats.suite_errors.len(), 1);
    ensure!(executor(&runner).batches.is_empty(), "nothing ran");
    Ok(())
}

#[tokio::test]
async fn recurring_error_is_recorded_once() -> Result<()> {
    let workspace = TestWorkspace::new();
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    let (stats, runner) = run_suites(
        vec![led.clone()],
        workspace.settings(None),
        FakeExecutor::missing_runner(),
        FakeLauncher::default(),
        RepeatCount::from_count(4),
    )
    .await;

    assert_eq!(stats.iterations, 4, "the suite is still run every iteration");
    assert_eq!(executor(&runner).batches.len(), 4);
    assert_eq!(stats.suite_errors.len(), 1);
    assert_eq!(stats.suite_errors[0].0, led);
    ensure!(!stats.is_success(), "run failed");
    Ok(())
}
