// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of `Requires` / `Provides` state dependencies between test cases.
//!
//! Every test case may require at most one state. That state must be provided by exactly one test
//! case in the same suite, which may in turn require another state, and so on. The resolved
//! [`DependencyChain`] lists the providers dependencies-first.

use crate::{
    definition::{SuiteDefinition, TestCase},
    errors::ResolveError,
};

/// The ordered prerequisites of a test case, dependencies-first.
///
/// A name never appears before its own prerequisites, and never appears twice.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyChain {
    names: Vec<String>,
}

impl DependencyChain {
    /// Returns the prerequisite names in execution order.
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    /// Iterates over prerequisite names in execution order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }

    /// Returns the number of prerequisites.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the test case has no prerequisites.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl IntoIterator for DependencyChain {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.into_iter()
    }
}

/// Resolves the prerequisite chain of the test case `name`.
pub fn resolve(def: &SuiteDefinition, name: &str) -> Result<DependencyChain, ResolveError> {
    let test = def.get(name).ok_or_else(|| ResolveError::UnknownTest {
        name: name.to_owned(),
    })?;

    let mut path = Vec::new();
    let mut names = Vec::new();
    resolve_into(def, test, &mut path, &mut names)?;
    Ok(DependencyChain { names })
}

/// Resolves every test case in the suite, returning the first error.
pub fn validate(def: &SuiteDefinition) -> Result<(), ResolveError> {
    for test in def.test_cases() {
        resolve(def, test.name())?;
    }
    Ok(())
}

fn resolve_into<'a>(
    def: &'a SuiteDefinition,
    test: &'a TestCase,
    path: &mut Vec<&'a str>,
    names: &mut Vec<String>,
) -> Result<(), ResolveError> {
    if let Some(pos) = path.iter().position(|visited| *visited == test.name()) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|&name| name.to_owned()).collect();
        cycle.push(test.name().to_owned());
        return Err(ResolveError::CyclicDependency { cycle });
    }

    let requirements = test.requirements();
    let state = match requirements.as_slice() {
        [] => return Ok(()),
        [state] => *state,
        _ => {
            return Err(ResolveError::TooManyRequirements {
                test: test.name().to_owned(),
                requirements: requirements.iter().map(|&req| req.to_owned()).collect(),
            });
        }
    };

    let provider = find_provider(def, test, state)?;

    path.push(test.name());
    resolve_into(def, provider, path, names)?;
    path.pop();

    if !names.iter().any(|name| name == provider.name()) {
        names.push(provider.name().to_owned());
    }
    Ok(())
}

fn find_provider<'a>(
    def: &'a SuiteDefinition,
    test: &TestCase,
    state: &str,
) -> Result<&'a TestCase, ResolveError> {
    let mut candidates = def.test_cases().filter(|t| t.provides_state(state));
    let Some(first) = candidates.next() else {
        return Err(ResolveError::MissingProvider {
            state: state.to_owned(),
            test: test.name().to_owned(),
        });
    };

    let rest: Vec<&TestCase> = candidates.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    Err(ResolveError::AmbiguousProvider {
        state: state.to_owned(),
        candidates: std::iter::once(first)
            .chain(rest)
            .map(|t| t.name().to_owned())
            .collect(),
    })
}
