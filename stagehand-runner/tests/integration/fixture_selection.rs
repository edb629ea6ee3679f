// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use stagehand_runner::runner::RepeatCount;

#[tokio::test]
async fn prerequisites_run_first_and_once() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);

    let (stats, runner) = run_suites(
        vec![uart],
        workspace.settings(Some("*.Should Echo")),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::from_count(2),
    )
    .await;
    ensure!(stats.is_success(), "run succeeded: {stats:?}");

    let executor = executor(&runner);
    let runs: Vec<(&str, &[String])> = executor
        .batches
        .iter()
        .map(|batch| (batch.suite_label.as_str(), batch.tests.as_slice()))
        .collect();
    assert_eq!(
        runs,
        vec![
            // Iteration 1: the plain batch has no matches, so only the prerequisite runs.
            ("uart", &["uart.Should Boot".to_owned()][..]),
            (
                "uart [HotSpot action: None]",
                &["uart [HotSpot action: None].Should Echo".to_owned()][..],
            ),
            (
                "uart [HotSpot action: Pause]",
                &["uart [HotSpot action: Pause].Should Echo".to_owned()][..],
            ),
            // Iteration 2: prerequisites are already met.
            (
                "uart [HotSpot action: None]",
                &["uart [HotSpot action: None].Should Echo".to_owned()][..],
            ),
            (
                "uart [HotSpot action: Pause]",
                &["uart [HotSpot action: Pause].Should Echo".to_owned()][..],
            ),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn prerequisite_batch_shares_plain_label() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);

    let (stats, runner) = run_suites(
        vec![uart],
        workspace.settings(Some("uart.Should Report Version")),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;
    ensure!(stats.is_success(), "run succeeded: {stats:?}");

    let batches = &executor(&runner).batches;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].tests, vec!["uart.Should Boot"]);
    assert_eq!(batches[1].tests, vec!["uart.Should Report Version"]);

    // Both batches have the same label, but their artifacts must not collide.
    let results = workspace.results_dir();
    assert_eq!(batches[0].log_path, results.join("iteration-1/uart.xml"));
    assert_eq!(batches[1].log_path, results.join("iteration-1/uart-2.xml"));
    assert_eq!(stats.reports[0].summary.merged, 2);
    Ok(())
}

#[tokio::test]
async fn failed_prerequisites_skip_selected_batch() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);

    let (stats, runner) = run_suites(
        vec![uart],
        workspace.settings(Some("*.Should Echo")),
        FakeExecutor::failing_batches([0]),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;

    ensure!(stats.failed, "the prerequisite failure fails the run");
    ensure!(stats.suite_errors.is_empty(), "test failures are not suite errors");
    // The prerequisite is marked met even though it failed, so the Pause batch still runs.
    assert_eq!(
        executor(&runner).labels(),
        vec!["uart", "uart [HotSpot action: Pause]"]
    );
    assert_eq!(stats.batches_run, 2);
    assert_eq!(stats.batches_failed, 1);
    Ok(())
}

#[tokio::test]
async fn no_matching_tests_is_success() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);

    let (stats, runner) = run_suites(
        vec![uart],
        workspace.settings(Some("gpio.*")),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;

    ensure!(stats.is_success(), "run succeeded: {stats:?}");
    ensure!(executor(&runner).batches.is_empty(), "nothing ran");
    assert_eq!(helper_events(&runner), ["start", "stop"]);
    Ok(())
}
