// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs stateful emulator test suites.
//!
//! Declarative suites are split into hotspot variants and run in batches against one shared
//! helper process; test assembly projects are built once and run as a whole. Per-batch log
//! artifacts are merged into one report per suite kind at the end of the run.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputStyles};
