// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hotspot variant expansion.
//!
//! Test cases marked with a `Hot Spot` step are sensitive to the emulator's hotspot handling, and
//! are run once per configured [`HotspotAction`]. Every other test case runs exactly once per
//! suite run, in a single batch without a variant.

use crate::definition::SuiteDefinition;
use serde::Deserialize;
use std::fmt;

/// A hotspot action, such as `None` or `Pause`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(transparent)]
pub struct HotspotAction(String);

impl HotspotAction {
    /// Creates a new hotspot action.
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    /// Returns the action name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HotspotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group of test cases run together in one runner invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VariantBatch {
    /// The hotspot action applied to the batch, or `None` for the plain batch.
    pub variant: Option<HotspotAction>,

    /// Test case names in declaration order.
    pub test_names: Vec<String>,
}

/// Splits a suite into batches: the plain batch first, then one batch per action covering every
/// hotspot-sensitive test.
pub fn expand(def: &SuiteDefinition, actions: &[HotspotAction]) -> Vec<VariantBatch> {
    let (sensitive, plain): (Vec<_>, Vec<_>) = def.test_cases().partition(|t| t.is_hotspot());

    let mut batches = Vec::with_capacity(1 + actions.len());
    if !plain.is_empty() {
        batches.push(VariantBatch {
            variant: None,
            test_names: plain.iter().map(|t| t.name().to_owned()).collect(),
        });
    }
    if !sensitive.is_empty() {
        let names: Vec<String> = sensitive.iter().map(|t| t.name().to_owned()).collect();
        batches.extend(actions.iter().map(|action| VariantBatch {
            variant: Some(action.clone()),
            test_names: names.clone(),
        }));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn default_actions() -> Vec<HotspotAction> {
        vec![HotspotAction::new("None"), HotspotAction::new("Pause")]
    }

    #[test]
    fn plain_and_sensitive() {
        let def = SuiteDefinition::parse(
            "s.robot",
            indoc! {"
                *** Test Cases ***
                A
                    Log    a
                B
                    Hot Spot
                C
                    Log    c
            "},
        )
        .unwrap();

        let batches = expand(&def, &default_actions());
        assert_eq!(
            batches,
            vec![
                VariantBatch {
                    variant: None,
                    test_names: vec!["A".to_owned(), "C".to_owned()],
                },
                VariantBatch {
                    variant: Some(HotspotAction::new("None")),
                    test_names: vec!["B".to_owned()],
                },
                VariantBatch {
                    variant: Some(HotspotAction::new("Pause")),
                    test_names: vec!["B".to_owned()],
                },
            ]
        );
    }

    #[test]
    fn only_sensitive() {
        let def = SuiteDefinition::parse("s.robot", "*** Test Cases ***\nB\n    Hot Spot\n").unwrap();
        let batches = expand(&def, &default_actions());
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.variant.is_some()));
    }

    #[test]
    fn empty_suite_has_no_batches() {
        let def = SuiteDefinition::parse("s.robot", "").unwrap();
        assert!(expand(&def, &default_actions()).is_empty());
    }
}
