// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-facing metadata for stagehand runs.
//!
//! Currently this is the set of documented process exit codes, so that CI
//! scripts can tell "tests failed" apart from "tests could not be run".

mod exit_codes;

pub use exit_codes::*;
