// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, OutputStyles},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, ValueEnum};
use owo_colors::OwoColorize;
use stagehand_metadata::StagehandExitCode;
use stagehand_runner::{
    config::{RunSettingsBuilder, StagehandConfig},
    process::{OutputSink, ProcessExecutor, ProcessHelperLauncher},
    runner::{RepeatCount, RunStats, TestRunnerBuilder},
    suite::{SuiteContext, SuiteKind, SuiteKindFilter, TestSuite},
};
use std::{
    collections::BTreeSet,
    io::{self, Write},
};
use tracing::{info, warn};

/// Runs stateful emulator test suites against a shared helper process.
///
/// Declarative suites (`.robot`) run in batches, once per hotspot variant. Test projects
/// (`.csproj`) are built once and then run as a whole.
#[derive(Debug, Parser)]
#[command(version, styles = crate::output::clap_styles::style())]
pub struct StagehandApp {
    /// Test suites to run
    #[arg(value_name = "SUITES")]
    suites: Vec<Utf8PathBuf>,

    /// Read suite paths from FILE, one per line, if no suite is given
    #[arg(long, short = 't', alias = "tests", value_name = "FILE")]
    tests_file: Option<Utf8PathBuf>,

    #[command(flatten)]
    run_opts: RunOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(flatten)]
    output: OutputOpts,
}

impl StagehandApp {
    /// Initializes logging and returns the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace_root = self.config_opts.workspace_root()?;
        let config = StagehandConfig::from_sources(
            &workspace_root,
            self.config_opts.config_file.as_deref(),
        )?;

        let fixture = fixture_override(
            self.run_opts.fixture.clone(),
            std::env::var("FIXTURE").ok(),
        );
        let settings = RunSettingsBuilder::new()
            .set_debug(self.run_opts.debug)
            .set_port(self.run_opts.port)
            .set_suspend(self.run_opts.suspend)
            .set_fixture(fixture)
            .set_results_dir(self.config_opts.results_dir.clone())
            .build(&config)?;
        if settings.debug().enabled {
            info!("running in debug mode");
        }
        if let Some(fixture) = settings.fixture() {
            info!("testing fixture: {}", fixture.as_str());
        }

        let suites = TestSuite::from_paths(self.suite_paths()?, self.run_opts.suite_type.into())?;
        if suites.is_empty() {
            warn!("no suites to run");
        }

        // The helper binary is only required if a suite will start the helper.
        let launcher = if suites
            .iter()
            .any(|suite| suite.kind() == SuiteKind::Declarative)
        {
            ProcessHelperLauncher::new(&config, &settings)?
        } else {
            ProcessHelperLauncher::unchecked(&config, &settings)
        };
        let sink = match &self.run_opts.output_file {
            Some(path) => OutputSink::create_or_stdout(path).await,
            None => OutputSink::stdout(),
        };
        let executor = ProcessExecutor::new(&config, &settings, sink);

        let repeat = RepeatCount::from_count(self.run_opts.repeat);
        let mut runner = TestRunnerBuilder::default()
            .set_repeat(repeat)
            .build(suites, SuiteContext::new(settings, executor, launcher))?;
        let stats = runner.drive_all().await;

        write_summary(&stats, &output.stdout_styles(), &mut io::stdout().lock())
            .map_err(|err| ExpectedError::WriteOutputError { err })?;
        final_result(&stats)
    }

    fn suite_paths(&self) -> Result<Vec<Utf8PathBuf>> {
        match &self.tests_file {
            Some(tests_file) if self.suites.is_empty() => {
                let contents = std::fs::read_to_string(tests_file)
                    .map_err(|err| ExpectedError::tests_file_read_error(tests_file, err))?;
                Ok(parse_tests_file(&contents))
            }
            _ => Ok(self.suites.clone()),
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Run options")]
struct RunOpts {
    /// Only run tests whose qualified name matches GLOB [env: FIXTURE, which takes precedence]
    #[arg(long, short = 'f', value_name = "GLOB")]
    fixture: Option<String>,

    /// Run every suite N times; without a value, repeat until interrupted
    #[arg(
        long,
        short = 'n',
        value_name = "N",
        num_args = 0..=1,
        default_value_t = 1,
        default_missing_value = "0"
    )]
    repeat: usize,

    /// Build and run in debug mode
    #[arg(long, short = 'd')]
    debug: bool,

    /// Remote debugger port (requires --debug)
    #[arg(long, short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Suspend until a debugger attaches (requires --debug)
    #[arg(long, short = 's')]
    suspend: bool,

    /// Kind of suites to run
    #[arg(
        long = "type",
        short = 'T',
        value_enum,
        default_value_t,
        value_name = "TYPE"
    )]
    suite_type: SuiteTypeOpt,

    /// Write the output of test programs to FILE instead of stdout
    #[arg(long = "output", short = 'o', value_name = "FILE")]
    output_file: Option<Utf8PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum SuiteTypeOpt {
    /// Every suite
    #[default]
    All,

    /// Declarative suites only
    #[value(alias = "robot")]
    Declarative,

    /// Test projects only
    #[value(alias = "nunit")]
    Assembly,
}

impl From<SuiteTypeOpt> for SuiteKindFilter {
    fn from(opt: SuiteTypeOpt) -> Self {
        match opt {
            SuiteTypeOpt::All => Self::All,
            SuiteTypeOpt::Declarative => Self::Declarative,
            SuiteTypeOpt::Assembly => Self::Assembly,
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Workspace root [default: current directory]
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/stagehand.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Directory for log artifacts and reports, relative to the workspace root
    #[arg(long, value_name = "DIR")]
    results_dir: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        if let Some(root) = &self.workspace_root {
            return Ok(root.clone());
        }
        let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirError { err })?;
        Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
            path: err.into_path_buf(),
        })
    }
}

/// The `FIXTURE` environment variable wins over `--fixture`.
fn fixture_override(cli: Option<String>, env: Option<String>) -> Option<String> {
    env.or(cli)
}

fn parse_tests_file(contents: &str) -> Vec<Utf8PathBuf> {
    contents
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(Utf8PathBuf::from)
        .collect()
}

fn write_summary(
    stats: &RunStats,
    styles: &OutputStyles,
    writer: &mut impl Write,
) -> io::Result<()> {
    if stats.interrupted {
        writeln!(
            writer,
            "{}: run interrupted after {} {}",
            "warning".style(styles.warning_text),
            stats.iterations,
            if stats.iterations == 1 { "iteration" } else { "iterations" },
        )?;
    }
    for report in &stats.reports {
        let totals = &report.summary.totals;
        writeln!(
            writer,
            "{:>12} {} report {} ({} tests, {} failures, {} errors, {} skipped)",
            "Merged".style(styles.bold),
            report.kind,
            report.summary.output,
            totals.tests,
            totals.failures,
            totals.errors,
            totals.skipped,
        )?;
    }
    writeln!(
        writer,
        "{:>12} {} batches run: {} passed, {} failed",
        "Summary".style(styles.bold),
        stats.batches_run,
        stats.batches_run - stats.batches_failed,
        stats.batches_failed,
    )?;

    if stats.is_success() {
        writeln!(writer, "{}", "tests finished successfully".style(styles.success))?;
    } else {
        writeln!(writer, "{}", "test run failed".style(styles.failure))?;
    }
    writer.flush()
}

/// Maps run statistics to an exit code. Suite errors take priority over test failures.
fn final_result(stats: &RunStats) -> Result<i32> {
    let failed_suites: BTreeSet<_> = stats.suite_errors.iter().map(|(path, _)| path).collect();
    if !failed_suites.is_empty() || !stats.lifecycle_errors.is_empty() {
        return Err(ExpectedError::SuiteErrors {
            suites: failed_suites.len(),
            helper_errors: stats.lifecycle_errors.len(),
        });
    }
    if !stats.aggregate_errors.is_empty() {
        return Err(ExpectedError::AggregateFailed {
            count: stats.aggregate_errors.len(),
        });
    }
    if stats.failed {
        return Err(ExpectedError::TestRunFailed);
    }
    Ok(StagehandExitCode::OK)
}
