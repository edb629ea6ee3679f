// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consolidation of per-batch log artifacts into a single report.
//!
//! Artifacts are treated as opaque XML documents. Each document's root element is copied under a
//! `<testsuites>` root, except for a `<testsuites>` root, whose children are copied instead.
//!
//! Counts of the copied top-level elements are summed onto the new root:
//!
//! * xUnit `<testsuite>`: `tests`, `failures`, `errors` and `skipped`.
//! * NUnit 2 `<test-results>`: `total`, `failures`, `errors` and `not-run`, the last counted as
//!   skipped.

use crate::errors::AggregateError;
use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use std::io;
use tracing::{debug, warn};

const TESTSUITES: &[u8] = b"testsuites";
const TESTSUITE: &[u8] = b"testsuite";
const TEST_RESULTS: &[u8] = b"test-results";

/// Summed counts over every merged artifact.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReportTotals {
    /// Tests run.
    pub tests: u64,
    /// Tests that failed.
    pub failures: u64,
    /// Tests that errored.
    pub errors: u64,
    /// Tests that were skipped.
    pub skipped: u64,
}

impl ReportTotals {
    fn add_from(&mut self, element: &BytesStart<'_>) -> Result<(), quick_xml::Error> {
        let nunit = match element.name().as_ref() {
            TESTSUITE => false,
            TEST_RESULTS => true,
            _ => return Ok(()),
        };
        for attr in element.attributes() {
            let attr = attr?;
            let slot = match (nunit, attr.key.as_ref()) {
                (false, b"tests") | (true, b"total") => &mut self.tests,
                (_, b"failures") => &mut self.failures,
                (_, b"errors") => &mut self.errors,
                (false, b"skipped") | (true, b"not-run") => &mut self.skipped,
                _ => continue,
            };
            // Non-numeric counts are left out of the totals.
            if let Ok(value) = attr.unescape_value()?.trim().parse::<u64>() {
                *slot += value;
            }
        }
        Ok(())
    }
}

/// The outcome of a merge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MergeSummary {
    /// The consolidated report.
    pub output: Utf8PathBuf,

    /// Number of artifacts merged.
    pub merged: usize,

    /// Number of listed artifacts that did not exist.
    pub missing: usize,

    /// Summed counts.
    pub totals: ReportTotals,
}

/// Merges `log_paths`, in order, into a single report at `output`.
///
/// An empty list produces a valid report with zero counts.
pub fn merge(log_paths: &[Utf8PathBuf], output: &Utf8Path) -> Result<MergeSummary, AggregateError> {
    let mut body = Writer::new(Vec::new());
    let mut totals = ReportTotals::default();
    let mut merged = 0;
    let mut missing = 0;

    for path in log_paths {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("log artifact `{path}` not found, skipping");
                missing += 1;
                continue;
            }
            Err(err) => {
                return Err(AggregateError::Read {
                    path: path.clone(),
                    err,
                });
            }
        };

        copy_artifact(&contents, &mut body, &mut totals).map_err(|err| AggregateError::Parse {
            path: path.clone(),
            err,
        })?;
        merged += 1;
    }

    let report = finish_report(body.into_inner(), totals).map_err(|err| AggregateError::Write {
        path: output.to_owned(),
        err: io::Error::other(err),
    })?;

    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir).map_err(|err| AggregateError::Write {
            path: output.to_owned(),
            err,
        })?;
    }
    std::fs::write(output, report).map_err(|err| AggregateError::Write {
        path: output.to_owned(),
        err,
    })?;

    debug!(merged, missing, "wrote consolidated report {output}");
    Ok(MergeSummary {
        output: output.to_owned(),
        merged,
        missing,
        totals,
    })
}

/// Copies the document's content elements into `body`.
fn copy_artifact(
    contents: &str,
    body: &mut Writer<Vec<u8>>,
    totals: &mut ReportTotals,
) -> Result<(), quick_xml::Error> {
    let mut reader = Reader::from_str(contents);
    let mut depth = 0usize;
    let mut unwrapped = false;

    loop {
        // Depth at which copied elements are top-level in the merged report.
        let top = usize::from(unwrapped);
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 0 && e.name().as_ref() == TESTSUITES {
                    unwrapped = true;
                    depth += 1;
                    continue;
                }
                if depth == top {
                    totals.add_from(&e)?;
                    newline(body);
                }
                depth += 1;
                body.write_event(Event::Start(e))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && unwrapped {
                    continue;
                }
                body.write_event(Event::End(e))?;
            }
            Event::Empty(e) => {
                if depth == 0 && e.name().as_ref() == TESTSUITES {
                    continue;
                }
                if depth == top {
                    totals.add_from(&e)?;
                    newline(body);
                }
                body.write_event(Event::Empty(e))?;
            }
            Event::Eof => break,
            // Prolog, whitespace and comments between top-level elements are not copied.
            _ if depth <= top => {}
            event => body.write_event(event)?,
        }
    }

    if depth != 0 {
        return Err(quick_xml::Error::UnexpectedEof(
            "document ended inside an element".to_owned(),
        ));
    }
    Ok(())
}

fn newline(body: &mut Writer<Vec<u8>>) {
    body.get_mut().extend_from_slice(b"\n  ");
}

fn finish_report(body: Vec<u8>, totals: ReportTotals) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new(Vec::with_capacity(body.len() + 256));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.get_mut().push(b'\n');

    let counts = [
        ("tests", totals.tests.to_string()),
        ("failures", totals.failures.to_string()),
        ("errors", totals.errors.to_string()),
        ("skipped", totals.skipped.to_string()),
    ];
    let root = BytesStart::new("testsuites")
        .with_attributes(counts.iter().map(|(key, value)| (*key, value.as_str())));

    if body.is_empty() {
        writer.write_event(Event::Empty(root))?;
    } else {
        writer.write_event(Event::Start(root))?;
        writer.get_mut().extend_from_slice(&body);
        writer.get_mut().push(b'\n');
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;
    }
    writer.get_mut().push(b'\n');
    Ok(writer.into_inner())
}
