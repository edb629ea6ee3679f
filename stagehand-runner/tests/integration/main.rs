// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests driving [`stagehand_runner::runner::TestRunner`] with fake collaborators.

mod fixture_selection;
mod fixtures;
mod lifecycle;
mod repeat;
