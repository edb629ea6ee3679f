// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use stagehand_runner::{
    config::{RunSettings, RunSettingsBuilder, StagehandConfig},
    errors::{ExecuteError, HelperError},
    executor::{AssemblyRequest, BatchRequest, ExecutionResult, SuiteExecutor},
    helper::HelperLauncher,
    runner::{RepeatCount, RunStats, TestRunner, TestRunnerBuilder},
    signal::{InterruptHandle, SignalHandlerKind},
    suite::{SuiteContext, SuiteKindFilter, TestSuite},
};
use std::{
    collections::HashSet,
    sync::{Arc, OnceLock},
};

/// A batch the fake executor was asked to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RecordedBatch {
    pub(crate) suite_label: String,
    pub(crate) tests: Vec<String>,
    pub(crate) log_path: Utf8PathBuf,
    pub(crate) metadata: Vec<String>,
    pub(crate) variables: Vec<String>,
}

/// Records every request, and writes a minimal artifact for each run.
#[derive(Debug, Default)]
pub(crate) struct FakeExecutor {
    pub(crate) batches: Vec<RecordedBatch>,
    pub(crate) builds: Vec<Utf8PathBuf>,
    pub(crate) assembly_runs: Vec<Utf8PathBuf>,
    // Zero-based indexes into `batches` that report failure.
    fail_batches: HashSet<usize>,
    fail_builds: bool,
    missing_runner: bool,
    interrupt_after: Option<(usize, Arc<OnceLock<InterruptHandle>>)>,
    interrupt_on_build: Option<Arc<OnceLock<InterruptHandle>>>,
}

impl FakeExecutor {
    pub(crate) fn failing_batches(indexes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_batches: indexes.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn failing_builds() -> Self {
        Self {
            fail_builds: true,
            ..Default::default()
        }
    }

    /// Fails every batch as if the runner binary did not exist.
    pub(crate) fn missing_runner() -> Self {
        Self {
            missing_runner: true,
            ..Default::default()
        }
    }

    /// Interrupts the run while the first assembly is being built.
    pub(crate) fn interrupting_on_build(slot: Arc<OnceLock<InterruptHandle>>) -> Self {
        Self {
            interrupt_on_build: Some(slot),
            ..Default::default()
        }
    }

    /// Interrupts the run once `count` batches have run.
    pub(crate) fn interrupting_after(count: usize, slot: Arc<OnceLock<InterruptHandle>>) -> Self {
        Self {
            interrupt_after: Some((count, slot)),
            ..Default::default()
        }
    }

    pub(crate) fn labels(&self) -> Vec<&str> {
        self.batches.iter().map(|b| b.suite_label.as_str()).collect()
    }
}

fn write_artifact(path: &Utf8Path, name: &str, tests: usize, success: bool) {
    std::fs::create_dir_all(path.parent().expect("artifact has a parent"))
        .expect("created artifact dir");
    let failures = if success { 0 } else { 1 };
    std::fs::write(
        path,
        format!(r#"<testsuite name="{name}" tests="{tests}" failures="{failures}"/>"#),
    )
    .expect("wrote artifact");
}

impl SuiteExecutor for FakeExecutor {
    async fn run_batch(
        &mut self,
        request: &BatchRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError> {
        let index = self.batches.len();
        let success = !self.fail_batches.contains(&index);
        self.batches.push(RecordedBatch {
            suite_label: request.suite_label.to_owned(),
            tests: request.tests.clone(),
            log_path: request.log_path.to_owned(),
            metadata: request.metadata.clone(),
            variables: request.variables.clone(),
        });

        if let Some((count, slot)) = &self.interrupt_after {
            if self.batches.len() >= *count {
                slot.get().expect("interrupt handle was set").interrupt();
            }
        }

        if self.missing_runner {
            return Err(ExecuteError::Spawn {
                command: "robot".to_owned(),
                err: std::io::ErrorKind::NotFound.into(),
            });
        }
        write_artifact(request.log_path, request.suite_label, request.tests.len(), success);

        Ok(ExecutionResult {
            success,
            log_path: request.log_path.to_owned(),
        })
    }

    async fn build_assembly(&mut self, project: &Utf8Path) -> Result<Utf8PathBuf, ExecuteError> {
        self.builds.push(project.to_owned());
        if let Some(slot) = &self.interrupt_on_build {
            slot.get().expect("interrupt handle was set").interrupt();
        }
        if self.fail_builds {
            return Err(ExecuteError::BuildFailed {
                project: project.to_owned(),
                exit_code: Some(1),
            });
        }
        Ok(project.with_extension("dll"))
    }

    async fn run_assembly(
        &mut self,
        request: &AssemblyRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError> {
        self.assembly_runs.push(request.assembly.to_owned());
        let name = request.project.file_stem().unwrap_or("assembly");
        write_artifact(request.log_path, name, 1, true);
        Ok(ExecutionResult {
            success: true,
            log_path: request.log_path.to_owned(),
        })
    }
}

/// Records helper starts and stops.
#[derive(Debug, Default)]
pub(crate) struct FakeLauncher {
    pub(crate) events: Vec<&'static str>,
    failing_starts: usize,
}

impl FakeLauncher {
    pub(crate) fn failing_starts(count: usize) -> Self {
        Self {
            failing_starts: count,
            ..Default::default()
        }
    }
}

impl HelperLauncher for FakeLauncher {
    type Handle = ();

    async fn start(&mut self) -> Result<(), HelperError> {
        if self.failing_starts > 0 {
            self.failing_starts -= 1;
            self.events.push("start-failed");
            return Err(HelperError::Spawn {
                command: "fake-helper 9999".to_owned(),
                err: std::io::ErrorKind::NotFound.into(),
            });
        }
        self.events.push("start");
        Ok(())
    }

    async fn stop(&mut self, _handle: ()) -> Result<(), HelperError> {
        self.events.push("stop");
        Ok(())
    }
}

/// A temporary directory holding suite files and results.
pub(crate) struct TestWorkspace {
    dir: Utf8TempDir,
}

impl TestWorkspace {
    pub(crate) fn new() -> Self {
        Self {
            dir: camino_tempfile::tempdir().expect("created temp dir"),
        }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn write_suite(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("wrote suite");
        path
    }

    pub(crate) fn settings(&self, fixture: Option<&str>) -> RunSettings {
        let config = StagehandConfig::default_config(self.dir.path());
        RunSettingsBuilder::new()
            .set_fixture(fixture.map(ToOwned::to_owned))
            .build(&config)
            .expect("settings are valid")
    }

    pub(crate) fn results_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("tests")
    }
}

pub(crate) type FakeRunner = TestRunner<FakeExecutor, FakeLauncher>;

pub(crate) fn build_runner(
    paths: Vec<Utf8PathBuf>,
    settings: RunSettings,
    executor: FakeExecutor,
    launcher: FakeLauncher,
    repeat: RepeatCount,
) -> FakeRunner {
    let suites = TestSuite::from_paths(paths, SuiteKindFilter::All).expect("known suite kinds");
    let cx = SuiteContext::new(settings, executor, launcher);
    TestRunnerBuilder::default()
        .set_repeat(repeat)
        .set_signal_handler_kind(SignalHandlerKind::Noop)
        .build(suites, cx)
        .expect("no-op signal handler never fails")
}

pub(crate) async fn run_suites(
    paths: Vec<Utf8PathBuf>,
    settings: RunSettings,
    executor: FakeExecutor,
    launcher: FakeLauncher,
    repeat: RepeatCount,
) -> (RunStats, FakeRunner) {
    let mut runner = build_runner(paths, settings, executor, launcher, repeat);
    let stats = runner.drive_all().await;
    (stats, runner)
}

pub(crate) fn executor(runner: &FakeRunner) -> &FakeExecutor {
    runner.context().executor()
}

pub(crate) fn helper_events(runner: &FakeRunner) -> &[&'static str] {
    &runner.context().helper().launcher().events
}

pub(crate) const UART_SUITE: &str = "\
*** Test Cases ***
Should Boot
    Create Machine    stm32f4
    Provides          booted

Should Echo
    Requires          booted
    Write Line To Uart    hello
    Hot Spot

Should Report Version
    Requires          booted
    Execute Command    version
";

pub(crate) const PLAIN_SUITE: &str = "\
*** Test Cases ***
Should Blink
    Toggle Led
";
