// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test suites and their lifecycle.
//!
//! Every suite goes through `prepare`, any number of `run`s, and a single `cleanup`. State shared
//! between suites (the helper process, log artifacts, the current iteration) lives in a
//! [`SuiteContext`] owned by the runner and lent to each lifecycle call.

use crate::{
    aggregator::{self, MergeSummary},
    config::RunSettings,
    definition::SuiteDefinition,
    errors::{AggregateError, HelperError, RunSettingsError, SuiteError},
    executor::{AssemblyRequest, BatchRequest, SuiteExecutor},
    helper::{HelperLauncher, SharedHelper},
    resolver,
    variants::{self, HotspotAction, VariantBatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::{collections::HashSet, fmt};
use tracing::{debug, info, warn};

/// The kind of a test suite, determined by its file extension.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SuiteKind {
    /// A declarative suite (`.robot`), run in batches against the shared helper.
    Declarative,

    /// A test assembly project (`.csproj`), built and then run as a whole.
    Assembly,
}

impl SuiteKind {
    /// Determines the suite kind from the path's extension.
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension() {
            Some("robot") => Some(Self::Declarative),
            Some("csproj") => Some(Self::Assembly),
            _ => None,
        }
    }
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declarative => write!(f, "declarative"),
            Self::Assembly => write!(f, "assembly"),
        }
    }
}

/// Which kinds of suites to run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SuiteKindFilter {
    /// Run every suite. Unknown suite kinds are an error.
    #[default]
    All,

    /// Run declarative suites only.
    Declarative,

    /// Run assembly suites only.
    Assembly,
}

impl SuiteKindFilter {
    fn accepts(self, kind: SuiteKind) -> bool {
        match self {
            Self::All => true,
            Self::Declarative => kind == SuiteKind::Declarative,
            Self::Assembly => kind == SuiteKind::Assembly,
        }
    }
}

/// A consolidated report produced when the last suite of a kind is cleaned up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AggregateReport {
    /// The suite kind the report covers.
    pub kind: SuiteKind,

    /// What was merged.
    pub summary: MergeSummary,
}

/// Collects the log artifacts of one suite kind, and merges them once the last suite of that kind
/// is cleaned up.
#[derive(Debug)]
pub(crate) struct ArtifactCollector {
    kind: SuiteKind,
    results_dir: Utf8PathBuf,
    output: Utf8PathBuf,
    live: usize,
    artifacts: Vec<Utf8PathBuf>,
    used: HashSet<Utf8PathBuf>,
}

impl ArtifactCollector {
    fn new(kind: SuiteKind, results_dir: &Utf8Path, output: &Utf8Path) -> Self {
        Self {
            kind,
            results_dir: results_dir.to_owned(),
            output: output.to_owned(),
            live: 0,
            artifacts: Vec::new(),
            used: HashSet::new(),
        }
    }

    fn join(&mut self) {
        self.live += 1;
    }

    /// Leaves the collector, merging artifacts if this was the last live suite.
    fn leave(&mut self) -> Option<Result<AggregateReport, AggregateError>> {
        self.live = self.live.checked_sub(1)?;
        if self.live > 0 {
            return None;
        }

        info!(
            "aggregating {} {} results into {}",
            self.artifacts.len(),
            self.kind,
            self.output
        );
        let kind = self.kind;
        Some(aggregator::merge(&self.artifacts, &self.output).map(|summary| AggregateReport {
            kind,
            summary,
        }))
    }

    /// Returns a unique artifact path for `stem` in this iteration, and records it.
    fn allocate(&mut self, iteration: usize, stem: &str) -> Utf8PathBuf {
        let dir = self.results_dir.join(format!("iteration-{iteration}"));
        let mut path = dir.join(format!("{stem}.xml"));
        let mut n = 1;
        while self.used.contains(&path) {
            n += 1;
            path = dir.join(format!("{stem}-{n}.xml"));
        }
        self.used.insert(path.clone());
        self.artifacts.push(path.clone());
        path
    }

    pub(crate) fn artifacts(&self) -> &[Utf8PathBuf] {
        &self.artifacts
    }
}

/// State shared by all suites in a run.
#[derive(Debug)]
pub struct SuiteContext<E, L: HelperLauncher> {
    executor: E,
    helper: SharedHelper<L>,
    settings: RunSettings,
    declarative: ArtifactCollector,
    assembly: ArtifactCollector,
    iteration: usize,
}

impl<E: SuiteExecutor, L: HelperLauncher> SuiteContext<E, L> {
    /// Creates a new context.
    pub fn new(settings: RunSettings, executor: E, launcher: L) -> Self {
        let declarative = ArtifactCollector::new(
            SuiteKind::Declarative,
            settings.results_dir(),
            settings.declarative_report(),
        );
        let assembly = ArtifactCollector::new(
            SuiteKind::Assembly,
            settings.results_dir(),
            settings.assembly_report(),
        );
        Self {
            executor,
            helper: SharedHelper::new(launcher),
            settings,
            declarative,
            assembly,
            iteration: 0,
        }
    }

    /// Returns the run settings.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Returns the executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Returns the shared helper.
    pub fn helper(&self) -> &SharedHelper<L> {
        &self.helper
    }

    /// Returns the current iteration, starting at 1. Zero before the first iteration.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub(crate) fn set_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    /// Returns every log artifact recorded so far for `kind`, in production order.
    pub fn artifacts(&self, kind: SuiteKind) -> &[Utf8PathBuf] {
        match kind {
            SuiteKind::Declarative => self.declarative.artifacts(),
            SuiteKind::Assembly => self.assembly.artifacts(),
        }
    }
}

/// Batch counts from a single suite run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SuiteRunStats {
    /// Runner invocations made, including prerequisite batches.
    pub batches_run: usize,

    /// Runner invocations that reported failure.
    pub batches_failed: usize,

    /// True if every batch passed.
    pub success: bool,
}

impl Default for SuiteRunStats {
    fn default() -> Self {
        Self {
            batches_run: 0,
            batches_failed: 0,
            success: true,
        }
    }
}

impl SuiteRunStats {
    fn record(&mut self, success: bool) {
        self.batches_run += 1;
        if !success {
            self.batches_failed += 1;
        }
    }
}

/// What happened during cleanup.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    /// The helper could not be stopped.
    pub helper_error: Option<HelperError>,

    /// Set if this suite was the last of its kind.
    pub report: Option<Result<AggregateReport, AggregateError>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SuiteState {
    Unprepared,
    Prepared,
    PrepareFailed,
    CleanedUp,
}

/// A test suite.
#[derive(Debug)]
pub enum TestSuite {
    /// A declarative suite.
    Declarative(DeclarativeSuite),

    /// A test assembly project.
    Assembly(AssemblySuite),
}

impl TestSuite {
    /// Creates a suite, choosing its kind from the path's extension.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Result<Self, RunSettingsError> {
        let path = path.into();
        match SuiteKind::from_path(&path) {
            Some(SuiteKind::Declarative) => Ok(Self::Declarative(DeclarativeSuite::new(path))),
            Some(SuiteKind::Assembly) => Ok(Self::Assembly(AssemblySuite::new(path))),
            None => Err(RunSettingsError::UnknownSuiteKind { path }),
        }
    }

    /// Creates suites for every path accepted by `filter`, in order.
    ///
    /// Paths of unknown kind are an error when every kind is selected, and are skipped otherwise.
    pub fn from_paths(
        paths: impl IntoIterator<Item = Utf8PathBuf>,
        filter: SuiteKindFilter,
    ) -> Result<Vec<Self>, RunSettingsError> {
        let mut suites = Vec::new();
        for path in paths {
            match SuiteKind::from_path(&path) {
                Some(kind) if filter.accepts(kind) => suites.push(Self::new(path)?),
                None if filter == SuiteKindFilter::All => {
                    return Err(RunSettingsError::UnknownSuiteKind { path });
                }
                _ => debug!("skipping {path}: not selected by suite type filter"),
            }
        }
        Ok(suites)
    }

    /// Returns the suite's path.
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Declarative(suite) => &suite.path,
            Self::Assembly(suite) => &suite.project,
        }
    }

    /// Returns the suite's kind.
    pub fn kind(&self) -> SuiteKind {
        match self {
            Self::Declarative(_) => SuiteKind::Declarative,
            Self::Assembly(_) => SuiteKind::Assembly,
        }
    }

    /// Returns true if `prepare` succeeded and the suite has not been cleaned up.
    pub fn is_prepared(&self) -> bool {
        self.state() == SuiteState::Prepared
    }

    fn state(&self) -> SuiteState {
        match self {
            Self::Declarative(suite) => suite.state,
            Self::Assembly(suite) => suite.state,
        }
    }

    /// Prepares the suite for running.
    ///
    /// Resources taken before a failure are still held, and are returned by
    /// [`cleanup`](Self::cleanup).
    pub async fn prepare<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<(), SuiteError> {
        match self {
            Self::Declarative(suite) => suite.prepare(cx).await,
            Self::Assembly(suite) => suite.prepare(cx).await,
        }
    }

    /// Runs the suite once.
    pub async fn run<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<SuiteRunStats, SuiteError> {
        if !self.is_prepared() {
            warn!("{} is not prepared, not running it", self.path());
            return Ok(SuiteRunStats {
                success: false,
                ..Default::default()
            });
        }
        match self {
            Self::Declarative(suite) => suite.run(cx).await,
            Self::Assembly(suite) => suite.run(cx).await,
        }
    }

    /// Releases the suite's resources. Calling this more than once has no further effect.
    pub async fn cleanup<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> CleanupOutcome {
        match self {
            Self::Declarative(suite) => suite.cleanup(cx).await,
            Self::Assembly(suite) => suite.cleanup(cx).await,
        }
    }
}

/// A declarative suite, run in variant batches against the shared helper.
#[derive(Debug)]
pub struct DeclarativeSuite {
    path: Utf8PathBuf,
    state: SuiteState,
    helper_leased: bool,
    joined: bool,
    definition: Option<SuiteDefinition>,
    // Prerequisites already run by this instance.
    dependencies_met: HashSet<String>,
}

impl DeclarativeSuite {
    fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            state: SuiteState::Unprepared,
            helper_leased: false,
            joined: false,
            definition: None,
            dependencies_met: HashSet::new(),
        }
    }

    async fn prepare<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<(), SuiteError> {
        if self.state != SuiteState::Unprepared {
            return Ok(());
        }
        self.state = SuiteState::PrepareFailed;

        cx.declarative.join();
        self.joined = true;

        cx.helper.acquire().await?;
        self.helper_leased = true;

        let definition = SuiteDefinition::from_path(&self.path)?;
        resolver::validate(&definition).map_err(|err| SuiteError::Resolve {
            path: self.path.clone(),
            err,
        })?;
        debug!("{}: {} test cases", self.path, definition.len());

        self.definition = Some(definition);
        self.state = SuiteState::Prepared;
        Ok(())
    }

    async fn run<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<SuiteRunStats, SuiteError> {
        let Some(definition) = &self.definition else {
            return Ok(SuiteRunStats::default());
        };
        info!("running {}", self.path);

        let batches = variants::expand(definition, cx.settings.hotspot_actions());
        let mut stats = SuiteRunStats::default();
        for batch in &batches {
            // Every batch runs, even after a failure.
            let success = run_variant(
                cx,
                definition,
                &mut self.dependencies_met,
                batch,
                &mut stats,
            )
            .await?;
            stats.success &= success;
        }
        Ok(stats)
    }

    async fn cleanup<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();
        if self.state == SuiteState::CleanedUp {
            return outcome;
        }
        self.state = SuiteState::CleanedUp;

        if std::mem::take(&mut self.helper_leased) {
            outcome.helper_error = cx.helper.release().await.err();
        }
        if std::mem::take(&mut self.joined) {
            outcome.report = cx.declarative.leave();
        }
        outcome
    }
}

/// Runs one variant batch, preceded by any prerequisites the fixture selection needs.
async fn run_variant<E: SuiteExecutor, L: HelperLauncher>(
    cx: &mut SuiteContext<E, L>,
    definition: &SuiteDefinition,
    dependencies_met: &mut HashSet<String>,
    batch: &VariantBatch,
    stats: &mut SuiteRunStats,
) -> Result<bool, SuiteError> {
    let variant = batch.variant.as_ref();
    let label = suite_label(definition.base_name(), variant);

    let Some(fixture) = cx.settings.fixture() else {
        return invoke_batch(cx, definition, variant, &batch.test_names, stats).await;
    };

    let selected: Vec<String> = batch
        .test_names
        .iter()
        .filter(|name| fixture.is_match(&qualified_name(&label, name)))
        .cloned()
        .collect();
    if selected.is_empty() {
        debug!("no tests in {label} match fixture `{}`", fixture.as_str());
        return Ok(true);
    }

    let mut prerequisites = IndexSet::new();
    for name in &selected {
        let chain = resolver::resolve(definition, name).map_err(|err| SuiteError::Resolve {
            path: definition.path().to_owned(),
            err,
        })?;
        prerequisites.extend(chain);
    }
    prerequisites.retain(|name| !dependencies_met.contains(name));

    if !prerequisites.is_empty() {
        dependencies_met.extend(prerequisites.iter().cloned());
        let prerequisites: Vec<String> = prerequisites.into_iter().collect();
        debug!("{label}: running prerequisites {}", prerequisites.join(", "));
        if !invoke_batch(cx, definition, None, &prerequisites, stats).await? {
            warn!("{label}: prerequisites failed, skipping selected tests");
            return Ok(false);
        }
    }

    invoke_batch(cx, definition, variant, &selected, stats).await
}

/// Invokes the runner once.
async fn invoke_batch<E: SuiteExecutor, L: HelperLauncher>(
    cx: &mut SuiteContext<E, L>,
    definition: &SuiteDefinition,
    variant: Option<&HotspotAction>,
    tests: &[String],
    stats: &mut SuiteRunStats,
) -> Result<bool, SuiteError> {
    let base = definition.base_name();
    let label = suite_label(base, variant);
    let stem = match variant {
        Some(action) => format!("{base}_{action}"),
        None => base.to_owned(),
    };
    let log_path = cx.declarative.allocate(cx.iteration, &stem);

    let mut variables = vec!["SKIP_RUNNING_SERVER:True".to_owned()];
    if let Some(action) = variant {
        variables.push(format!("HOTSPOT_ACTION:{action}"));
    }
    if cx.settings.debug().enabled {
        variables.push("CONFIGURATION:Debug".to_owned());
    }

    let request = BatchRequest {
        suite_path: definition.path(),
        suite_label: &label,
        tests: tests.iter().map(|test| qualified_name(&label, test)).collect(),
        log_path: &log_path,
        metadata: vec![format!(
            "HotSpot_Action:{}",
            variant.map_or("-", HotspotAction::as_str)
        )],
        variables,
    };

    info!("running {label}: {} tests", tests.len());
    let result = cx.executor.run_batch(&request).await?;
    stats.record(result.success);
    Ok(result.success)
}

/// Returns the suite label for a batch: the base name, plus the hotspot action if any.
pub fn suite_label(base: &str, variant: Option<&HotspotAction>) -> String {
    match variant {
        Some(action) => format!("{base} [HotSpot action: {action}]"),
        None => base.to_owned(),
    }
}

fn qualified_name(label: &str, test: &str) -> String {
    format!("{label}.{test}")
}

/// A test assembly project, built once and run as a whole.
#[derive(Debug)]
pub struct AssemblySuite {
    project: Utf8PathBuf,
    state: SuiteState,
    joined: bool,
    assembly: Option<Utf8PathBuf>,
}

impl AssemblySuite {
    fn new(project: Utf8PathBuf) -> Self {
        Self {
            project,
            state: SuiteState::Unprepared,
            joined: false,
            assembly: None,
        }
    }

    async fn prepare<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<(), SuiteError> {
        if self.state != SuiteState::Unprepared {
            return Ok(());
        }
        self.state = SuiteState::PrepareFailed;

        cx.assembly.join();
        self.joined = true;

        let assembly = cx.executor.build_assembly(&self.project).await?;
        self.assembly = Some(assembly);
        self.state = SuiteState::Prepared;
        Ok(())
    }

    async fn run<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> Result<SuiteRunStats, SuiteError> {
        let Some(assembly) = &self.assembly else {
            return Ok(SuiteRunStats::default());
        };
        info!("running {}", self.project);

        let base = self.project.file_stem().unwrap_or(self.project.as_str());
        let log_path = cx.assembly.allocate(cx.iteration, base);
        let request = AssemblyRequest {
            project: &self.project,
            assembly,
            log_path: &log_path,
            fixture: cx.settings.fixture().map(|fixture| fixture.as_str()),
            debug: cx.settings.debug(),
        };

        let result = cx.executor.run_assembly(&request).await?;
        let mut stats = SuiteRunStats::default();
        stats.record(result.success);
        stats.success = result.success;
        Ok(stats)
    }

    async fn cleanup<E: SuiteExecutor, L: HelperLauncher>(
        &mut self,
        cx: &mut SuiteContext<E, L>,
    ) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();
        if self.state == SuiteState::CleanedUp {
            return outcome;
        }
        self.state = SuiteState::CleanedUp;

        if std::mem::take(&mut self.joined) {
            outcome.report = cx.assembly.leave();
        }
        outcome
    }
}
