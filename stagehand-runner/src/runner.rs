// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. Suites are prepared once, run once per
//! iteration in registration order, and cleaned up once on the way out, whatever happened in
//! between.

use crate::{
    errors::{AggregateError, DisplayErrorChain, HelperError, SignalHandlerSetupError, SuiteError},
    executor::SuiteExecutor,
    helper::HelperLauncher,
    signal::{InterruptHandle, SignalHandler, SignalHandlerKind},
    suite::{AggregateReport, SuiteContext, TestSuite},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, num::NonZeroUsize};
use tracing::{error, info, warn};

/// How many times to run every suite.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RepeatCount {
    /// Run a fixed number of iterations.
    Times(NonZeroUsize),

    /// Run until interrupted.
    Forever,
}

impl RepeatCount {
    /// Converts a count, where 0 means run until interrupted.
    pub fn from_count(count: usize) -> Self {
        match NonZeroUsize::new(count) {
            Some(count) => Self::Times(count),
            None => Self::Forever,
        }
    }

    fn allows(self, iteration: usize) -> bool {
        match self {
            Self::Times(count) => iteration <= count.get(),
            Self::Forever => true,
        }
    }
}

impl Default for RepeatCount {
    fn default() -> Self {
        Self::Times(NonZeroUsize::MIN)
    }
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Times(count) => write!(f, "{count}"),
            Self::Forever => write!(f, "until interrupted"),
        }
    }
}

/// Test runner options.
#[derive(Debug)]
pub struct TestRunnerBuilder {
    repeat: RepeatCount,
    signal_handler_kind: SignalHandlerKind,
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self {
            repeat: RepeatCount::default(),
            signal_handler_kind: SignalHandlerKind::Standard,
        }
    }
}

impl TestRunnerBuilder {
    /// Sets the number of iterations.
    pub fn set_repeat(&mut self, repeat: RepeatCount) -> &mut Self {
        self.repeat = repeat;
        self
    }

    /// Sets the kind of signal handling.
    pub fn set_signal_handler_kind(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_handler_kind = kind;
        self
    }

    /// Creates a new test runner. Must be called from within a tokio runtime.
    pub fn build<E: SuiteExecutor, L: HelperLauncher>(
        &self,
        suites: Vec<TestSuite>,
        cx: SuiteContext<E, L>,
    ) -> Result<TestRunner<E, L>, SignalHandlerSetupError> {
        Ok(TestRunner {
            suites,
            cx,
            repeat: self.repeat,
            signal_handler: self.signal_handler_kind.build()?,
        })
    }
}

/// Context for running suites.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<E, L: HelperLauncher> {
    suites: Vec<TestSuite>,
    cx: SuiteContext<E, L>,
    repeat: RepeatCount,
    signal_handler: SignalHandler,
}

impl<E: SuiteExecutor, L: HelperLauncher> TestRunner<E, L> {
    /// Returns a handle that stops the run before the next suite starts.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.signal_handler.interrupt_handle()
    }

    /// Returns the shared suite context.
    pub fn context(&self) -> &SuiteContext<E, L> {
        &self.cx
    }

    /// Returns the registered suites.
    pub fn suites(&self) -> &[TestSuite] {
        &self.suites
    }

    /// Prepares every suite, runs the iterations, and cleans every suite up.
    pub async fn drive_all(&mut self) -> RunStats {
        let mut stats = RunStats::default();

        info!("preparing {} suites", self.suites.len());
        for suite in &mut self.suites {
            if self.signal_handler.is_interrupted() {
                warn!("interrupted, skipping preparation of remaining suites");
                stats.interrupted = true;
                break;
            }
            if let Err(err) = suite.prepare(&mut self.cx).await {
                record_suite_error(&mut stats, suite.path(), err);
            }
        }

        if stats.interrupted {
            info!("interrupted during preparation, not starting any iteration");
        } else if self.suites.iter().any(TestSuite::is_prepared) {
            info!("starting suites (iterations: {})", self.repeat);
            self.run_iterations(&mut stats).await;
        } else if !self.suites.is_empty() {
            warn!("no suite could be prepared, nothing to run");
        }

        info!("cleaning up suites");
        for suite in &mut self.suites {
            let outcome = suite.cleanup(&mut self.cx).await;
            if let Some(err) = outcome.helper_error {
                error!(
                    "failed to stop helper process: {}",
                    DisplayErrorChain::new(&err)
                );
                stats.lifecycle_errors.push(err);
            }
            match outcome.report {
                Some(Ok(report)) => {
                    info!("{} output: {}", report.kind, report.summary.output);
                    stats.reports.push(report);
                }
                Some(Err(err)) => {
                    error!("{}", DisplayErrorChain::new(&err));
                    stats.aggregate_errors.push(err);
                }
                None => {}
            }
        }

        stats
    }

    async fn run_iterations(&mut self, stats: &mut RunStats) {
        // Suites whose run already failed with an error. Later errors from the same suite are
        // logged but not recorded again.
        let mut errored = vec![false; self.suites.len()];
        let mut iteration = 0;
        'iterations: while self.repeat.allows(iteration + 1) {
            iteration += 1;
            self.cx.set_iteration(iteration);
            if self.repeat != RepeatCount::default() {
                info!("iteration {iteration}");
            }

            for (index, suite) in self.suites.iter_mut().enumerate() {
                if self.signal_handler.is_interrupted() {
                    stats.interrupted = true;
                    break 'iterations;
                }
                if !suite.is_prepared() {
                    continue;
                }
                match suite.run(&mut self.cx).await {
                    Ok(suite_stats) => {
                        stats.batches_run += suite_stats.batches_run;
                        stats.batches_failed += suite_stats.batches_failed;
                        if !suite_stats.success {
                            stats.failed = true;
                        }
                    }
                    Err(err) if errored[index] => {
                        warn!(
                            "{}: failed again in iteration {iteration}: {}",
                            suite.path(),
                            DisplayErrorChain::new(&err)
                        );
                    }
                    Err(err) => {
                        errored[index] = true;
                        record_suite_error(stats, suite.path(), err);
                    }
                }
            }

            stats.iterations = iteration;
        }
    }
}

fn record_suite_error(stats: &mut RunStats, path: &Utf8Path, err: SuiteError) {
    if err.is_lifecycle_error() {
        error!("{path}: helper process: {}", DisplayErrorChain::new(&err));
    } else {
        error!("{path}: {}", DisplayErrorChain::new(&err));
    }
    stats.suite_errors.push((path.to_owned(), err));
}

/// Statistics for a completed run.
#[derive(Debug, Default)]
pub struct RunStats {
    /// Iterations completed.
    pub iterations: usize,

    /// Runner invocations made.
    pub batches_run: usize,

    /// Runner invocations that reported failure.
    pub batches_failed: usize,

    /// Set once any batch fails, and never cleared.
    pub failed: bool,

    /// Fatal errors scoped to one suite invocation, in the order they happened. A suite whose
    /// runs fail with an error in several iterations is recorded once.
    pub suite_errors: Vec<(Utf8PathBuf, SuiteError)>,

    /// Errors stopping the helper process.
    pub lifecycle_errors: Vec<HelperError>,

    /// Consolidated reports written.
    pub reports: Vec<AggregateReport>,

    /// Errors consolidating reports.
    pub aggregate_errors: Vec<AggregateError>,

    /// True if the run was interrupted before all iterations completed.
    pub interrupted: bool,
}

impl RunStats {
    /// Returns true if every batch passed and nothing went wrong along the way.
    pub fn is_success(&self) -> bool {
        !self.failed
            && self.suite_errors.is_empty()
            && self.lifecycle_errors.is_empty()
            && self.aggregate_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, RepeatCount::Forever ; "zero is forever")]
    #[test_case(1, RepeatCount::default() ; "one")]
    #[test_case(3, RepeatCount::Times(NonZeroUsize::new(3).unwrap()) ; "three")]
    fn repeat_from_count(count: usize, expected: RepeatCount) {
        assert_eq!(RepeatCount::from_count(count), expected);
    }

    #[test]
    fn repeat_allows() {
        let three = RepeatCount::from_count(3);
        assert!(three.allows(1));
        assert!(three.allows(3));
        assert!(!three.allows(4));
        assert!(RepeatCount::Forever.allows(usize::MAX));
    }

    #[test]
    fn empty_stats_are_success() {
        assert!(RunStats::default().is_success());
        let stats = RunStats {
            failed: true,
            ..Default::default()
        };
        assert!(!stats.is_success());
    }
}
