// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for stagehand.
//!
//! Configuration is layered: the embedded `default-config.toml` first, then
//! `.config/stagehand.toml` under the workspace root (or an explicitly provided file). Command-line
//! options are folded in afterwards by [`RunSettingsBuilder`].

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind, RunSettingsError},
    test_filter::FixtureFilter,
    variants::HotspotAction,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Overall configuration for stagehand.
#[derive(Clone, Debug)]
pub struct StagehandConfig {
    workspace_root: Utf8PathBuf,
    inner: StagehandConfigImpl,
}

impl StagehandConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/stagehand.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the provided file, or from `.config/stagehand.toml` under the
    /// workspace root if none is given. A missing default file is not an error.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            let unknown = unknown.into_iter().collect::<Vec<_>>().join(", ");
            warn!("ignoring unknown configuration keys in config file {config_file}: {unknown}");
        }
        if inner.declarative.hotspot_actions.is_empty() {
            return Err(ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::NoHotspotActions,
            ));
        }

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default configuration, with no repository overrides applied.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (inner, _unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the results directory, relative to the workspace root.
    pub fn results_dir(&self) -> &str {
        &self.inner.results_dir
    }

    /// Returns the helper configuration.
    pub fn helper(&self) -> &HelperConfig {
        &self.inner.helper
    }

    /// Returns the declarative runner configuration.
    pub fn declarative(&self) -> &DeclarativeConfig {
        &self.inner.declarative
    }

    /// Returns the assembly build and runner configuration.
    pub fn assembly(&self) -> &AssemblyConfig {
        &self.inner.assembly
    }

    /// Returns the output configuration.
    pub fn output(&self) -> &OutputConfig {
        &self.inner.output
    }

    /// Returns the consolidated report names.
    pub fn reports(&self) -> &ReportsConfig {
        &self.inner.reports
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(StagehandConfigImpl, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: StagehandConfigImpl =
            serde_path_to_error::deserialize(ignored_de).map_err(|error| {
                // The config crate also reports the key. Drop it from the inner error so the
                // path is only printed once.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StagehandConfigImpl {
    results_dir: String,
    helper: HelperConfig,
    declarative: DeclarativeConfig,
    assembly: AssemblyConfig,
    output: OutputConfig,
    reports: ReportsConfig,
}

/// Configuration for the shared helper process.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HelperConfig {
    /// An optional wrapper program the binary is passed to.
    pub program: Option<String>,

    /// The helper binary, relative to the workspace root.
    pub binary: String,

    /// Arguments appended after the binary.
    pub args: Vec<String>,

    /// The port the helper listens on.
    pub port: u16,

    /// How long to wait for the helper to accept connections.
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// The helper's working directory. Defaults to the binary's directory.
    pub cwd: Option<String>,
}

/// Configuration for the declarative test runner.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeclarativeConfig {
    /// The runner program.
    pub program: String,

    /// Arguments passed before the batch-specific ones.
    pub args: Vec<String>,

    /// Hotspot actions, in the order their batches run.
    pub hotspot_actions: Vec<HotspotAction>,
}

/// Configuration for building and running test assemblies.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssemblyConfig {
    /// The build tool.
    pub build_program: String,

    /// Arguments passed to the build tool before the project path.
    pub build_args: Vec<String>,

    /// The assembly test runner.
    pub runner_program: String,

    /// Arguments passed to the runner before the log, assembly and fixture arguments.
    pub runner_args: Vec<String>,
}

/// Configuration for forwarded child output.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Lines containing any of these strings are dropped.
    pub noise_filters: Vec<String>,
}

/// Names of the consolidated reports, relative to the results directory.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportsConfig {
    /// The consolidated declarative report.
    pub declarative: String,

    /// The consolidated assembly report.
    pub assembly: String,
}

/// Debugger settings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DebugSettings {
    /// Whether debug mode is enabled.
    pub enabled: bool,

    /// The port a remote debugger attaches to.
    pub port: Option<u16>,

    /// Whether to suspend until a debugger attaches.
    pub suspend: bool,
}

impl DebugSettings {
    /// Returns the build configuration name, `Debug` or `Release`.
    pub fn configuration(&self) -> &'static str {
        if self.enabled { "Debug" } else { "Release" }
    }
}

/// Settings for a single stagehand invocation: configuration with command-line options applied.
#[derive(Clone, Debug)]
pub struct RunSettings {
    workspace_root: Utf8PathBuf,
    results_dir: Utf8PathBuf,
    debug: DebugSettings,
    fixture: Option<FixtureFilter>,
    hotspot_actions: Vec<HotspotAction>,
    helper_port: u16,
    declarative_report: Utf8PathBuf,
    assembly_report: Utf8PathBuf,
}

impl RunSettings {
    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the absolute results directory.
    pub fn results_dir(&self) -> &Utf8Path {
        &self.results_dir
    }

    /// Returns debugger settings.
    pub fn debug(&self) -> DebugSettings {
        self.debug
    }

    /// Returns the fixture filter, if any.
    pub fn fixture(&self) -> Option<&FixtureFilter> {
        self.fixture.as_ref()
    }

    /// Returns hotspot actions in order.
    pub fn hotspot_actions(&self) -> &[HotspotAction] {
        &self.hotspot_actions
    }

    /// Returns the port reserved for the helper.
    pub fn helper_port(&self) -> u16 {
        self.helper_port
    }

    /// Returns the consolidated declarative report path.
    pub fn declarative_report(&self) -> &Utf8Path {
        &self.declarative_report
    }

    /// Returns the consolidated assembly report path.
    pub fn assembly_report(&self) -> &Utf8Path {
        &self.assembly_report
    }

    /// Returns the placeholder context for expanding configured arguments.
    pub fn arg_context(&self) -> ArgContext<'_> {
        ArgContext {
            configuration: self.debug.configuration(),
            port: self.helper_port,
            results_dir: &self.results_dir,
            workspace_root: &self.workspace_root,
        }
    }
}

/// Builds [`RunSettings`] from configuration and command-line options.
#[derive(Clone, Debug, Default)]
pub struct RunSettingsBuilder {
    debug: bool,
    port: Option<u16>,
    suspend: bool,
    fixture: Option<String>,
    results_dir: Option<Utf8PathBuf>,
}

impl RunSettingsBuilder {
    /// Creates a new builder with defaults: release mode, no fixture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables debug mode.
    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// Sets the remote debugger port.
    pub fn set_port(&mut self, port: Option<u16>) -> &mut Self {
        self.port = port;
        self
    }

    /// Suspends the runner until a debugger attaches.
    pub fn set_suspend(&mut self, suspend: bool) -> &mut Self {
        self.suspend = suspend;
        self
    }

    /// Sets the fixture glob.
    pub fn set_fixture(&mut self, fixture: Option<String>) -> &mut Self {
        self.fixture = fixture;
        self
    }

    /// Overrides the configured results directory.
    pub fn set_results_dir(&mut self, results_dir: Option<Utf8PathBuf>) -> &mut Self {
        self.results_dir = results_dir;
        self
    }

    /// Validates the options against the configuration.
    pub fn build(&self, config: &StagehandConfig) -> Result<RunSettings, RunSettingsError> {
        if !self.debug && (self.port.is_some() || self.suspend) {
            return Err(RunSettingsError::DebugOptionsWithoutDebug);
        }
        let helper_port = config.helper().port;
        if self.port == Some(helper_port) {
            return Err(RunSettingsError::PortReserved { port: helper_port });
        }

        let fixture = self
            .fixture
            .as_deref()
            .map(FixtureFilter::new)
            .transpose()?;

        let workspace_root = config.workspace_root().to_owned();
        let results_dir = match &self.results_dir {
            Some(dir) => workspace_root.join(dir),
            None => workspace_root.join(config.results_dir()),
        };
        let declarative_report = results_dir.join(&config.reports().declarative);
        let assembly_report = results_dir.join(&config.reports().assembly);

        Ok(RunSettings {
            workspace_root,
            results_dir,
            debug: DebugSettings {
                enabled: self.debug,
                port: self.port,
                suspend: self.suspend,
            },
            fixture,
            hotspot_actions: config.declarative().hotspot_actions.clone(),
            helper_port,
            declarative_report,
            assembly_report,
        })
    }
}

/// Values substituted into configured arguments.
#[derive(Clone, Copy, Debug)]
pub struct ArgContext<'a> {
    configuration: &'a str,
    port: u16,
    results_dir: &'a Utf8Path,
    workspace_root: &'a Utf8Path,
}

impl ArgContext<'_> {
    /// Replaces placeholders in `arg`.
    pub fn expand(&self, arg: &str) -> String {
        arg.replace("{configuration}", self.configuration)
            .replace("{port}", &self.port.to_string())
            .replace("{results-dir}", self.results_dir.as_str())
            .replace("{workspace-root}", self.workspace_root.as_str())
    }

    /// Replaces placeholders in every argument.
    pub fn expand_all<'s>(&self, args: impl IntoIterator<Item = &'s String>) -> Vec<String> {
        args.into_iter().map(|arg| self.expand(arg)).collect()
    }
}
