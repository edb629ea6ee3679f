// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [stagehand](https://crates.io/crates/stagehand), a stateful test-suite
//! orchestrator.
//!
//! Declarative suites may declare state dependencies between test cases (`Requires` /
//! `Provides`), may mark test cases to be run once per hotspot action, and share a single
//! long-lived helper process. The [`runner`] module drives suites through their lifecycle; the
//! [`aggregator`] consolidates the log artifacts they produce.

pub mod aggregator;
pub mod config;
pub mod definition;
pub mod errors;
pub mod executor;
pub mod helper;
pub mod process;
pub mod resolver;
pub mod runner;
pub mod signal;
pub mod suite;
pub mod test_filter;
pub mod variants;
