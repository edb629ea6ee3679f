// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use stagehand_runner::{
    errors::{ExecuteError, ResolveError, SuiteError},
    runner::RepeatCount,
    suite::SuiteKind,
};
use std::sync::{Arc, OnceLock};

#[tokio::test]
async fn helper_starts_once_across_suites() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);
    let project = workspace.root().join("Peripherals.csproj");

    let (stats, runner) = run_suites(
        vec![uart, led, project.clone()],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::from_count(2),
    )
    .await;

    ensure!(stats.is_success(), "run succeeded: {stats:?}");
    assert_eq!(helper_events(&runner), ["start", "stop"]);
    assert_eq!(runner.context().helper().ref_count(), 0);
    assert!(!runner.context().helper().is_running());

    let executor = executor(&runner);
    assert_eq!(executor.builds, vec![project.clone()]);
    assert_eq!(executor.assembly_runs.len(), 2, "assembly runs once per iteration");
    // uart: plain + 2 hotspot batches, led: 1 plain batch, plus the assembly; twice.
    assert_eq!(stats.batches_run, 10);
    assert_eq!(stats.iterations, 2);

    // Reports are written as the last suite of each kind is cleaned up.
    let kinds: Vec<_> = stats.reports.iter().map(|report| report.kind).collect();
    assert_eq!(kinds, vec![SuiteKind::Declarative, SuiteKind::Assembly]);
    assert_eq!(stats.reports[0].summary.merged, 8);
    assert_eq!(stats.reports[0].summary.totals.tests, 2 * (2 + 1 + 1 + 1));
    assert_eq!(stats.reports[1].summary.merged, 2);
    ensure!(
        stats.reports[0].summary.output.is_file(),
        "consolidated report written"
    );
    Ok(())
}

#[tokio::test]
async fn hotspot_batches_per_action() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);

    let (stats, runner) = run_suites(
        vec![uart.clone()],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;
    ensure!(stats.is_success(), "run succeeded: {stats:?}");

    let batches = &executor(&runner).batches;
    let results = workspace.results_dir();
    assert_eq!(
        batches,
        &vec![
            RecordedBatch {
                suite_label: "uart".to_owned(),
                tests: vec![
                    "uart.Should Boot".to_owned(),
                    "uart.Should Report Version".to_owned(),
                ],
                log_path: results.join("iteration-1/uart.xml"),
                metadata: vec!["HotSpot_Action:-".to_owned()],
                variables: vec!["SKIP_RUNNING_SERVER:True".to_owned()],
            },
            RecordedBatch {
                suite_label: "uart [HotSpot action: None]".to_owned(),
                tests: vec!["uart [HotSpot action: None].Should Echo".to_owned()],
                log_path: results.join("iteration-1/uart_None.xml"),
                metadata: vec!["HotSpot_Action:None".to_owned()],
                variables: vec![
                    "SKIP_RUNNING_SERVER:True".to_owned(),
                    "HOTSPOT_ACTION:None".to_owned(),
                ],
            },
            RecordedBatch {
                suite_label: "uart [HotSpot action: Pause]".to_owned(),
                tests: vec!["uart [HotSpot action: Pause].Should Echo".to_owned()],
                log_path: results.join("iteration-1/uart_Pause.xml"),
                metadata: vec!["HotSpot_Action:Pause".to_owned()],
                variables: vec![
                    "SKIP_RUNNING_SERVER:True".to_owned(),
                    "HOTSPOT_ACTION:Pause".to_owned(),
                ],
            },
        ]
    );
    assert_eq!(
        runner.context().artifacts(SuiteKind::Declarative).len(),
        3,
        "aggregator receives one artifact per batch"
    );
    Ok(())
}

#[tokio::test]
async fn empty_suite_succeeds() -> Result<()> {
    let workspace = TestWorkspace::new();
    let empty = workspace.write_suite("empty.robot", "*** Settings ***\nLibrary    Emulation\n");

    let (stats, runner) = run_suites(
        vec![empty],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;

    ensure!(stats.is_success(), "run succeeded: {stats:?}");
    assert!(executor(&runner).batches.is_empty());
    assert_eq!(stats.reports.len(), 1);
    assert_eq!(stats.reports[0].summary.merged, 0);
    let report = std::fs::read_to_string(&stats.reports[0].summary.output)?;
    ensure!(report.contains(r#"<testsuites tests="0""#), "empty report: {report}");
    Ok(())
}

#[tokio::test]
async fn malformed_suite_is_fatal_to_itself_only() -> Result<()> {
    let workspace = TestWorkspace::new();
    let cyclic = workspace.write_suite(
        "cyclic.robot",
        "*** Test Cases ***\nA\n    Requires    a\n    Provides    a\n",
    );
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    let (stats, runner) = run_suites(
        vec![cyclic.clone(), led],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::default(),
        RepeatCount::from_count(2),
    )
    .await;

    ensure!(!stats.is_success(), "run failed");
    ensure!(!stats.failed, "no batch failed");
    assert_eq!(stats.suite_errors.len(), 1, "prepare fails once");
    let (path, err) = &stats.suite_errors[0];
    assert_eq!(path, &cyclic);
    match err {
        SuiteError::Resolve {
            err: ResolveError::CyclicDependency { cycle },
            ..
        } => assert_eq!(cycle, &vec!["A".to_owned(), "A".to_owned()]),
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(executor(&runner).labels(), vec!["led", "led"]);
    // The failed suite held a lease until cleanup.
    assert_eq!(helper_events(&runner), ["start", "stop"]);
    Ok(())
}

#[tokio::test]
async fn helper_start_failure_is_retried_by_next_suite() -> Result<()> {
    let workspace = TestWorkspace::new();
    let uart = workspace.write_suite("uart.robot", UART_SUITE);
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    let (stats, runner) = run_suites(
        vec![uart.clone(), led],
        workspace.settings(None),
        FakeExecutor::default(),
        FakeLauncher::failing_starts(1),
        RepeatCount::default(),
    )
    .await;

    assert_eq!(stats.suite_errors.len(), 1);
    let (path, err) = &stats.suite_errors[0];
    assert_eq!(path, &uart);
    ensure!(err.is_lifecycle_error(), "helper error: {err:?}");

    assert_eq!(executor(&runner).labels(), vec!["led"]);
    assert_eq!(helper_events(&runner), ["start-failed", "start", "stop"]);
    assert_eq!(runner.context().helper().ref_count(), 0);
    Ok(())
}

#[tokio::test]
async fn build_failure_skips_assembly_suite() -> Result<()> {
    let workspace = TestWorkspace::new();
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);
    let project = workspace.root().join("Peripherals.csproj");

    let (stats, runner) = run_suites(
        vec![project.clone(), led],
        workspace.settings(None),
        FakeExecutor::failing_builds(),
        FakeLauncher::default(),
        RepeatCount::default(),
    )
    .await;

    assert_eq!(stats.suite_errors.len(), 1);
    ensure!(
        matches!(
            &stats.suite_errors[0].1,
            SuiteError::Execute(ExecuteError::BuildFailed { project: p, .. }) if *p == project
        ),
        "build failure recorded: {:?}",
        stats.suite_errors
    );
    let executor = executor(&runner);
    ensure!(executor.assembly_runs.is_empty(), "assembly never ran");
    assert_eq!(executor.labels(), vec!["led"]);

    // The assembly collector still aggregates, with nothing to merge.
    let assembly_report = stats
        .reports
        .iter()
        .find(|report| report.kind == SuiteKind::Assembly)
        .expect("assembly report written");
    assert_eq!(assembly_report.summary.merged, 0);
    Ok(())
}

#[tokio::test]
async fn interrupt_during_build_skips_remaining_preparation() -> Result<()> {
    let workspace = TestWorkspace::new();
    let first = workspace.root().join("Peripherals.csproj");
    let second = workspace.root().join("Timers.csproj");
    let led = workspace.write_suite("led.robot", PLAIN_SUITE);

    let slot = Arc::new(OnceLock::new());
    let mut runner = build_runner(
        vec![first.clone(), second, led],
        workspace.settings(None),
        FakeExecutor::interrupting_on_build(slot.clone()),
        FakeLauncher::default(),
        RepeatCount::from_count(3),
    );
    slot.set(runner.interrupt_handle()).expect("handle set once");

    let stats = runner.drive_all().await;
    ensure!(stats.interrupted, "run was interrupted");
    assert_eq!(stats.iterations, 0);

    let executor = executor(&runner);
    assert_eq!(executor.builds, vec![first], "no build after the interrupt");
    ensure!(executor.assembly_runs.is_empty(), "nothing ran");
    ensure!(executor.batches.is_empty(), "nothing ran");
    ensure!(
        helper_events(&runner).is_empty(),
        "helper never started for the skipped suite"
    );

    // The prepared suite is still cleaned up.
    let kinds: Vec<_> = stats.reports.iter().map(|report| report.kind).collect();
    assert_eq!(kinds, vec![SuiteKind::Assembly]);
    assert_eq!(stats.reports[0].summary.merged, 0);
    Ok(())
}
