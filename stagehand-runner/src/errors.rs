// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by stagehand.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, process::ExitStatus, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse stagehand config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A configured hotspot action list was empty.
    #[error("`declarative.hotspot-actions` must list at least one action")]
    NoHotspotActions,
}

/// An error in the combination of command-line options and configuration, detected before any
/// suite runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunSettingsError {
    /// The requested debugger port collides with the helper's reserved port.
    #[error("port {port} is reserved for the helper process and cannot be used for remote debugging")]
    PortReserved {
        /// The reserved port.
        port: u16,
    },

    /// A debugger port or suspend flag was requested without debug mode.
    #[error("port/suspend options can be used in debug mode only")]
    DebugOptionsWithoutDebug,

    /// The helper binary does not exist.
    #[error("helper binary not found at `{path}` (did you forget to build it?)")]
    HelperBinaryNotFound {
        /// The path that was checked.
        path: Utf8PathBuf,
    },

    /// A suite path had an extension that does not map to a suite kind.
    #[error("unknown test suite type: `{path}`")]
    UnknownSuiteKind {
        /// The suite path.
        path: Utf8PathBuf,
    },

    /// The fixture pattern is not a valid glob.
    #[error("invalid fixture pattern `{pattern}`")]
    InvalidFixture {
        /// The pattern as provided.
        pattern: String,

        /// The underlying error.
        #[source]
        err: GlobConstructError,
    },
}

/// An error that occurred while constructing a glob matcher.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum GlobConstructError {
    /// An invalid glob was constructed.
    #[error(transparent)]
    InvalidGlob(globset::Error),

    /// A glob was parsed but it failed to convert to a regex.
    #[error("{0}")]
    RegexError(String),
}

/// An error that occurred while reading a declarative suite definition.
#[derive(Debug, Error)]
#[error("failed to parse suite definition `{path}`")]
#[non_exhaustive]
pub struct DefinitionParseError {
    path: Utf8PathBuf,
    #[source]
    kind: DefinitionParseErrorKind,
}

impl DefinitionParseError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: DefinitionParseErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the suite file that failed to parse.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &DefinitionParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a suite definition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DefinitionParseErrorKind {
    /// The file could not be read.
    #[error("error reading file")]
    Read(#[source] std::io::Error),

    /// A step appeared before any test case was declared.
    #[error("line {line}: step found outside of a test case")]
    StepOutsideTestCase {
        /// The 1-based line number.
        line: usize,
    },

    /// Two test cases share a name.
    #[error("line {line}: duplicate test case `{name}`")]
    DuplicateTestCase {
        /// The test name.
        name: String,

        /// The 1-based line number of the second declaration.
        line: usize,
    },

    /// A `Requires` or `Provides` step did not have exactly one argument.
    #[error("line {line}: `{keyword}` in test `{test}` takes exactly one state name, found {found}")]
    StateArgument {
        /// The test containing the step.
        test: String,

        /// The step keyword.
        keyword: &'static str,

        /// The number of arguments found.
        found: usize,

        /// The 1-based line number.
        line: usize,
    },
}

/// An error produced while resolving the prerequisite chain of a test case.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The test case does not exist in the suite.
    #[error("test case `{name}` not found")]
    UnknownTest {
        /// The requested name.
        name: String,
    },

    /// No test case provides the required state.
    #[error("no provider for state `{state}` found (required by `{test}`)")]
    MissingProvider {
        /// The required state.
        state: String,

        /// The test that requires it.
        test: String,
    },

    /// More than one test case provides the required state.
    #[error("too many providers for state `{state}` found: {}", .candidates.join(", "))]
    AmbiguousProvider {
        /// The required state.
        state: String,

        /// The providing test cases, in declaration order.
        candidates: Vec<String>,
    },

    /// A test case declares more than one requirement.
    #[error("too many requirements for test `{test}` ({}): at most one is allowed", .requirements.join(", "))]
    TooManyRequirements {
        /// The offending test.
        test: String,

        /// The requirements it declares.
        requirements: Vec<String>,
    },

    /// Provider resolution looped back onto a test case already being resolved.
    #[error("cyclic state dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// The test cases along the cycle, starting and ending with the same name.
        cycle: Vec<String>,
    },
}

/// An error that occurred while starting or stopping the shared helper process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelperError {
    /// The helper process could not be spawned.
    #[error("failed to start helper process `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The helper process exited before it accepted connections.
    #[error("helper process `{command}` exited during startup with {status}")]
    ExitedEarly {
        /// The command line.
        command: String,

        /// The exit status.
        status: ExitStatus,
    },

    /// The helper process did not accept connections in time.
    #[error("helper process `{command}` not listening on port {port} after {timeout:?}")]
    NotReady {
        /// The command line.
        command: String,

        /// The port the helper was expected to listen on.
        port: u16,

        /// How long stagehand waited.
        timeout: Duration,
    },

    /// The stop signal could not be delivered.
    #[error("failed to signal helper process {pid}")]
    Signal {
        /// The process ID.
        pid: u32,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// Waiting for the helper process to exit failed.
    #[error("failed to wait for helper process to exit")]
    Wait(#[source] std::io::Error),
}

/// An error that occurred while invoking an external collaborator (test runner or build tool).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The command could not be spawned.
    #[error("failed to execute `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// Reading the child's output or waiting on it failed.
    #[error("error reading output of `{command}`")]
    Output {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// Building a test assembly failed.
    #[error("building project `{project}` failed{}", DisplayExitCode(.exit_code))]
    BuildFailed {
        /// The project that was built.
        project: Utf8PathBuf,

        /// The exit code, if the build process exited normally.
        exit_code: Option<i32>,
    },

    /// The directory for log artifacts could not be created.
    #[error("failed to create artifact directory `{dir}`")]
    ArtifactDir {
        /// The directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

struct DisplayExitCode<'a>(&'a Option<i32>);

impl fmt::Display for DisplayExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Some(code) => write!(f, " with error code: {code}"),
            None => write!(f, " (terminated by signal)"),
        }
    }
}

/// A fatal error scoped to a single suite: it aborts that suite's current lifecycle step but not
/// the rest of the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SuiteError {
    /// The suite definition could not be parsed.
    #[error(transparent)]
    Definition(#[from] DefinitionParseError),

    /// The suite's provider/requirement graph is malformed.
    #[error("invalid state dependencies in `{path}`")]
    Resolve {
        /// The suite file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: ResolveError,
    },

    /// The shared helper process could not be started.
    #[error("shared helper unavailable")]
    Helper(#[from] HelperError),

    /// An external collaborator failed.
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

impl SuiteError {
    /// Returns true if this error comes from the helper process lifecycle rather than from the
    /// suite itself.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self, Self::Helper(_))
    }
}

/// An error that occurred while consolidating log artifacts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AggregateError {
    /// An artifact could not be read.
    #[error("error reading log artifact `{path}`")]
    Read {
        /// The artifact.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// An artifact is not well-formed XML.
    #[error("log artifact `{path}` is not well-formed XML")]
    Parse {
        /// The artifact.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: quick_xml::Error,
    },

    /// The consolidated report could not be written.
    #[error("error writing consolidated report `{path}`")]
    Write {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// A chain of errors rendered on a single line, used for log messages.
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_messages() {
        let err = ResolveError::AmbiguousProvider {
            state: "booted".to_owned(),
            candidates: vec!["Boot A".to_owned(), "Boot B".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "too many providers for state `booted` found: Boot A, Boot B"
        );

        let err = ResolveError::CyclicDependency {
            cycle: vec!["A".to_owned(), "B".to_owned(), "A".to_owned()],
        };
        assert_eq!(err.to_string(), "cyclic state dependency: A -> B -> A");
    }

    #[test]
    fn error_chain_display() {
        let err = SuiteError::Resolve {
            path: "suites/uart.robot".into(),
            err: ResolveError::MissingProvider {
                state: "booted".to_owned(),
                test: "Echo".to_owned(),
            },
        };
        assert_eq!(
            DisplayErrorChain::new(&err).to_string(),
            "invalid state dependencies in `suites/uart.robot`: \
             no provider for state `booted` found (required by `Echo`)"
        );
    }

    #[test]
    fn build_failed_message() {
        let err = ExecuteError::BuildFailed {
            project: "tests/Peripherals.csproj".into(),
            exit_code: Some(2),
        };
        assert_eq!(
            err.to_string(),
            "building project `tests/Peripherals.csproj` failed with error code: 2"
        );
    }
}
