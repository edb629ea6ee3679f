// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the external tools suites are executed with.

use crate::{config::DebugSettings, errors::ExecuteError};
use camino::{Utf8Path, Utf8PathBuf};

/// One invocation of the declarative runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchRequest<'a> {
    /// The suite file.
    pub suite_path: &'a Utf8Path,

    /// The suite label: the base name, plus the hotspot action if any.
    pub suite_label: &'a str,

    /// Fully qualified names of the tests to run, `{suite_label}.{test}`.
    pub tests: Vec<String>,

    /// Where the runner writes its log artifact.
    pub log_path: &'a Utf8Path,

    /// Suite metadata, `Name:Value`.
    pub metadata: Vec<String>,

    /// Variables, `NAME:value`.
    pub variables: Vec<String>,
}

/// One invocation of the assembly runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssemblyRequest<'a> {
    /// The project the assembly was built from.
    pub project: &'a Utf8Path,

    /// The compiled assembly.
    pub assembly: &'a Utf8Path,

    /// Where the runner writes its log artifact.
    pub log_path: &'a Utf8Path,

    /// The fixture, passed through to the runner verbatim.
    pub fixture: Option<&'a str>,

    /// Debugger settings.
    pub debug: DebugSettings,
}

/// The outcome of one runner invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionResult {
    /// True if the runner reported success.
    pub success: bool,

    /// The log artifact the runner was asked to write.
    pub log_path: Utf8PathBuf,
}

/// Runs test batches, builds assemblies and runs them.
///
/// [`ProcessExecutor`](crate::process::ProcessExecutor) spawns the configured programs.
#[allow(async_fn_in_trait)]
pub trait SuiteExecutor {
    /// Runs a batch of declarative tests.
    async fn run_batch(
        &mut self,
        request: &BatchRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError>;

    /// Builds a project, returning the compiled assembly.
    async fn build_assembly(&mut self, project: &Utf8Path) -> Result<Utf8PathBuf, ExecuteError>;

    /// Runs the tests in a compiled assembly.
    async fn run_assembly(
        &mut self,
        request: &AssemblyRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError>;
}
