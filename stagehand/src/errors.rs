// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, OutputStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use stagehand_metadata::StagehandExitCode;
use stagehand_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed through display_to_stderr, which
// colorizes them.

/// An expected failure: a bad invocation, or a run that did not pass.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("invalid run settings")]
    RunSettingsError {
        #[from]
        err: RunSettingsError,
    },
    #[error("could not determine current directory")]
    CurrentDirError {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("tests file read error")]
    TestsFileReadError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to set up signal handler")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("could not run {suites} suites")]
    SuiteErrors { suites: usize, helper_errors: usize },
    #[error("failed to consolidate results")]
    AggregateFailed { count: usize },
    #[error("test run failed")]
    TestRunFailed,
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn tests_file_read_error(path: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self::TestsFileReadError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. }
            | Self::RunSettingsError { .. }
            | Self::CurrentDirError { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::TestsFileReadError { .. }
            | Self::SignalHandlerSetupError { .. } => StagehandExitCode::SETUP_ERROR,
            Self::SuiteErrors { .. } => StagehandExitCode::SUITE_ERROR,
            Self::AggregateFailed { .. } => StagehandExitCode::AGGREGATE_FAILED,
            Self::TestRunFailed => StagehandExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } => StagehandExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &OutputStyles) {
        let mut next_error = match &self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config file `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::RunSettingsError { err } => {
                error!("{err}");
                err.source()
            }
            Self::CurrentDirError { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!("current directory `{}` is not valid UTF-8", path.display());
                None
            }
            Self::TestsFileReadError { path, err } => {
                error!("failed to read tests file `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                Some(err as &dyn Error)
            }
            Self::SuiteErrors {
                suites,
                helper_errors,
            } => {
                if *suites > 0 {
                    error!(
                        "could not run {} {}, see the log above for details",
                        suites.style(styles.bold),
                        plural_suites(*suites)
                    );
                }
                if *helper_errors > 0 {
                    error!("failed to stop the helper process");
                }
                None
            }
            Self::AggregateFailed { count } => {
                error!(
                    "failed to consolidate results ({} {})",
                    count.style(styles.bold),
                    if *count == 1 { "error" } else { "errors" }
                );
                None
            }
            Self::TestRunFailed => {
                error!("some tests failed, see the logs for details");
                None
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

pub(crate) fn plural_suites(count: usize) -> &'static str {
    if count == 1 { "suite" } else { "suites" }
}
