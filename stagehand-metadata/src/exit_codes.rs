// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `stagehand` failures.
///
/// `stagehand` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum StagehandExitCode {}

impl StagehandExitCode {
    /// No errors occurred and every executed batch passed.
    pub const OK: i32 = 0;

    /// One or more test batches reported failure.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// One or more suites could not be run: a malformed suite definition, a
    /// failed build, or a helper process that would not start.
    ///
    /// This takes priority over [`Self::TEST_RUN_FAILED`].
    pub const SUITE_ERROR: i32 = 105;

    /// Consolidating the per-batch log artifacts into a report failed.
    pub const AGGREGATE_FAILED: i32 = 106;

    /// Writing data to stdout, stderr or the output file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a stagehand invocation: bad
    /// configuration, a reserved debugger port, or an unknown suite kind.
    pub const SETUP_ERROR: i32 = 96;
}
