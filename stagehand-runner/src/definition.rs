// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declarative suite definitions.
//!
//! A declarative suite is a plain-text file made of `*** Section ***` tables. Only the test case
//! table is interpreted: an unindented line starts a test case, and indented lines are its steps.
//! Cells are separated by two or more spaces, a tab, or ` | ` in the pipe-separated format.
//!
//! Three step names carry meaning for the orchestrator:
//!
//! * [`REQUIRES`]: the test needs a state established by another test.
//! * [`PROVIDES`]: the test establishes a state.
//! * [`HOTSPOT_MARKER`]: the test must be run once per hotspot action.

use crate::errors::{DefinitionParseError, DefinitionParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, map::Entry};
use regex::Regex;
use std::sync::LazyLock;

/// The step name declaring the state a test case depends on.
pub const REQUIRES: &str = "Requires";

/// The step name declaring a state a test case establishes.
pub const PROVIDES: &str = "Provides";

/// The step name marking a test case as hotspot-sensitive.
pub const HOTSPOT_MARKER: &str = "Hot Spot";

/// A parsed declarative suite.
#[derive(Clone, Debug)]
pub struct SuiteDefinition {
    path: Utf8PathBuf,
    // Insertion order is declaration order.
    test_cases: IndexMap<String, TestCase>,
}

impl SuiteDefinition {
    /// Reads and parses the suite at `path`.
    pub fn from_path(path: impl Into<Utf8PathBuf>) -> Result<Self, DefinitionParseError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|err| {
            DefinitionParseError::new(path.clone(), DefinitionParseErrorKind::Read(err))
        })?;
        Self::parse(path, &contents)
    }

    /// Parses suite contents. `path` is used as the suite's identity and in error messages.
    pub fn parse(path: impl Into<Utf8PathBuf>, contents: &str) -> Result<Self, DefinitionParseError> {
        let path = path.into();
        match parse_test_cases(contents) {
            Ok(test_cases) => Ok(Self { path, test_cases }),
            Err(kind) => Err(DefinitionParseError::new(path, kind)),
        }
    }

    /// Returns the path this suite was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the file name without its extension, used to label batches and artifacts.
    pub fn base_name(&self) -> &str {
        self.path.file_stem().unwrap_or(self.path.as_str())
    }

    /// Looks up a test case by name.
    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.test_cases.get(name)
    }

    /// Iterates over test cases in declaration order.
    pub fn test_cases(&self) -> impl ExactSizeIterator<Item = &TestCase> + '_ {
        self.test_cases.values()
    }

    /// Returns the number of test cases.
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    /// Returns true if the suite has no test cases.
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }
}

/// A single test case and its steps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    name: String,
    line: usize,
    steps: Vec<Step>,
}

impl TestCase {
    /// The test case name, unique within its suite.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The 1-based line the test case was declared on.
    pub fn line(&self) -> usize {
        self.line
    }

    /// The steps, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns every state named by a `Requires` step.
    ///
    /// Well-formed test cases have at most one; the resolver rejects the rest.
    pub fn requirements(&self) -> Vec<&str> {
        self.state_args(REQUIRES).collect()
    }

    /// Returns the states named by `Provides` steps.
    pub fn provides(&self) -> impl Iterator<Item = &str> + '_ {
        self.state_args(PROVIDES)
    }

    /// Returns true if this test provides `state`.
    pub fn provides_state(&self, state: &str) -> bool {
        self.provides().any(|provided| provided == state)
    }

    /// Returns true if this test must be run once per hotspot action.
    pub fn is_hotspot(&self) -> bool {
        self.steps.iter().any(|step| step.name == HOTSPOT_MARKER)
    }

    fn state_args<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.steps
            .iter()
            .filter(move |step| step.name == keyword)
            .filter_map(|step| step.args.first().map(String::as_str))
    }
}

/// A step (keyword invocation) within a test case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    name: String,
    args: Vec<String>,
    line: usize,
}

impl Step {
    /// The step (keyword) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The step's arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

static SPACE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t| {2,}").expect("separator regex is valid"));

fn parse_test_cases(
    contents: &str,
) -> Result<IndexMap<String, TestCase>, DefinitionParseErrorKind> {
    let mut test_cases: IndexMap<String, TestCase> = IndexMap::new();
    let mut current: Option<String> = None;
    let mut in_test_cases = false;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = idx + 1;

        let header = raw_line.trim().trim_matches('|').trim();
        if header.starts_with('*') {
            in_test_cases = is_test_case_header(header);
            current = None;
            continue;
        }
        if !in_test_cases {
            continue;
        }

        let Some(row) = split_row(raw_line) else {
            continue;
        };

        let step_cells = if row.indented {
            row.cells
        } else {
            let mut cells = row.cells.into_iter();
            let name = cells.next().expect("unindented rows have a first cell");
            match test_cases.entry(name.clone()) {
                Entry::Occupied(_) => {
                    return Err(DefinitionParseErrorKind::DuplicateTestCase { name, line });
                }
                Entry::Vacant(entry) => {
                    entry.insert(TestCase {
                        name: name.clone(),
                        line,
                        steps: Vec::new(),
                    });
                }
            }
            current = Some(name);
            // The rest of the row, if any, is the first step.
            cells.collect()
        };

        if step_cells.is_empty() {
            continue;
        }

        let test_case = match &current {
            Some(name) => test_cases
                .get_mut(name)
                .expect("current test case was inserted"),
            None => return Err(DefinitionParseErrorKind::StepOutsideTestCase { line }),
        };

        let mut cells = step_cells.into_iter();
        let name = cells.next().expect("step_cells is non-empty");
        if name == "..." {
            // Continuation row: extends the previous step's arguments.
            if let Some(step) = test_case.steps.last_mut() {
                step.args.extend(cells);
            }
            continue;
        }
        test_case.steps.push(Step {
            name,
            args: cells.collect(),
            line,
        });
    }

    for test_case in test_cases.values() {
        check_state_steps(test_case)?;
    }

    Ok(test_cases)
}

fn check_state_steps(test_case: &TestCase) -> Result<(), DefinitionParseErrorKind> {
    for step in &test_case.steps {
        let keyword = match step.name.as_str() {
            REQUIRES => REQUIRES,
            PROVIDES => PROVIDES,
            _ => continue,
        };
        if step.args.len() != 1 {
            return Err(DefinitionParseErrorKind::StateArgument {
                test: test_case.name.clone(),
                keyword,
                found: step.args.len(),
                line: step.line,
            });
        }
    }
    Ok(())
}

fn is_test_case_header(header: &str) -> bool {
    let name = header.trim_matches('*').trim().to_ascii_lowercase();
    name == "test cases" || name == "test case"
}

struct Row {
    indented: bool,
    cells: Vec<String>,
}

/// Splits a line into cells. Returns `None` for blank and comment lines.
fn split_row(line: &str) -> Option<Row> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (indented, cells) = if let Some(rest) = line.strip_prefix('|') {
        // Pipe-separated: an empty first cell marks a step.
        let rest = rest.trim_end().strip_suffix('|').unwrap_or(rest);
        let mut cells: Vec<&str> = rest.split(" | ").map(str::trim).collect();
        let indented = cells.first().is_some_and(|first| first.is_empty());
        if indented {
            cells.remove(0);
        }
        (indented, cells)
    } else {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        (indented, SPACE_SEPARATOR.split(trimmed).map(str::trim).collect())
    };

    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        if cell.starts_with('#') {
            // Everything after a comment cell is ignored.
            break;
        }
        if cell.is_empty() && out.is_empty() {
            continue;
        }
        out.push(cell.to_owned());
    }
    // Trailing empty cells carry no meaning.
    while out.last().is_some_and(|cell: &String| cell.is_empty()) {
        out.pop();
    }

    if out.is_empty() {
        return None;
    }
    Some(Row {
        indented,
        cells: out,
    })
}
