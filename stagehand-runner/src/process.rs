// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-spawning implementations of [`SuiteExecutor`] and [`HelperLauncher`].
//!
//! Child output is consumed line by line: blank lines and lines matching a noise filter are
//! dropped, and the rest is forwarded to an [`OutputSink`].

use crate::{
    config::{DebugSettings, RunSettings, StagehandConfig},
    errors::{DisplayErrorChain, ExecuteError, HelperError, RunSettingsError},
    executor::{AssemblyRequest, BatchRequest, ExecutionResult, SuiteExecutor},
    helper::HelperLauncher,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    io,
    net::Ipv4Addr,
    pin::Pin,
    process::{ExitStatus, Stdio},
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    process::{Child, Command},
};
use tracing::{debug, info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where forwarded child output goes.
#[derive(Debug)]
pub struct OutputSink {
    inner: SinkInner,
}

#[derive(Debug)]
enum SinkInner {
    Stdout(tokio::io::Stdout),
    File(tokio::fs::File),
}

impl OutputSink {
    /// Forwards output to standard output.
    pub fn stdout() -> Self {
        Self {
            inner: SinkInner::Stdout(tokio::io::stdout()),
        }
    }

    /// Forwards output to a newly created file, falling back to standard output if the file
    /// cannot be created.
    pub async fn create_or_stdout(path: &Utf8Path) -> Self {
        match tokio::fs::File::create(path).await {
            Ok(file) => Self {
                inner: SinkInner::File(file),
            },
            Err(err) => {
                warn!("failed to create output file `{path}` ({err}), falling back to stdout");
                Self::stdout()
            }
        }
    }

    /// Returns true if output goes to standard output.
    pub fn is_stdout(&self) -> bool {
        matches!(self.inner, SinkInner::Stdout(_))
    }
}

impl AsyncWrite for OutputSink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            SinkInner::Stdout(stdout) => Pin::new(stdout).poll_write(cx, buf),
            SinkInner::File(file) => Pin::new(file).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            SinkInner::Stdout(stdout) => Pin::new(stdout).poll_flush(cx),
            SinkInner::File(file) => Pin::new(file).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            SinkInner::Stdout(stdout) => Pin::new(stdout).poll_shutdown(cx),
            SinkInner::File(file) => Pin::new(file).poll_shutdown(cx),
        }
    }
}

/// Drops uninteresting lines from child output.
#[derive(Clone, Debug, Default)]
pub struct NoiseFilter {
    patterns: Vec<String>,
}

impl NoiseFilter {
    /// Creates a filter dropping lines that contain any of `patterns`.
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    /// Returns true if the line should be dropped.
    pub fn is_noise(&self, line: &str) -> bool {
        line.trim().is_empty() || self.patterns.iter().any(|pattern| line.contains(pattern.as_str()))
    }
}

/// Forwards child stdout and stderr to `sink` until both reach end of file.
///
/// Lines are interleaved in the order they become available. Invalid UTF-8 is replaced rather
/// than treated as an error.
pub async fn forward_lines<O, E, W>(
    stdout: O,
    stderr: E,
    filter: &NoiseFilter,
    sink: &mut W,
) -> io::Result<()>
where
    O: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stdout = stdout.split(b'\n');
    let mut stderr = stderr.split(b'\n');
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        let segment = tokio::select! {
            segment = stdout.next_segment(), if !stdout_done => {
                let segment = segment?;
                stdout_done = segment.is_none();
                segment
            }
            segment = stderr.next_segment(), if !stderr_done => {
                let segment = segment?;
                stderr_done = segment.is_none();
                segment
            }
        };
        let Some(segment) = segment else {
            continue;
        };

        let line = String::from_utf8_lossy(&segment);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if filter.is_noise(line) {
            continue;
        }
        sink.write_all(line.as_bytes()).await?;
        sink.write_all(b"\n").await?;
    }

    sink.flush().await
}

/// Runs declarative batches and assemblies by spawning the configured programs.
#[derive(Debug)]
pub struct ProcessExecutor {
    results_dir: Utf8PathBuf,
    declarative_program: String,
    declarative_args: Vec<String>,
    build_program: String,
    build_args: Vec<String>,
    runner_program: String,
    runner_args: Vec<String>,
    filter: NoiseFilter,
    sink: OutputSink,
}

impl ProcessExecutor {
    /// Creates a new executor, expanding placeholders in configured arguments.
    pub fn new(config: &StagehandConfig, settings: &RunSettings, sink: OutputSink) -> Self {
        let cx = settings.arg_context();
        let declarative = config.declarative();
        let assembly = config.assembly();
        Self {
            results_dir: settings.results_dir().to_owned(),
            declarative_program: cx.expand(&declarative.program),
            declarative_args: cx.expand_all(&declarative.args),
            build_program: cx.expand(&assembly.build_program),
            build_args: cx.expand_all(&assembly.build_args),
            runner_program: cx.expand(&assembly.runner_program),
            runner_args: cx.expand_all(&assembly.runner_args),
            filter: NoiseFilter::new(config.output().noise_filters.iter().cloned()),
            sink,
        }
    }

    /// Consumes the executor, returning the output sink.
    pub fn into_sink(self) -> OutputSink {
        self.sink
    }

    async fn run_command(
        &mut self,
        program: &str,
        args: &[String],
        cwd: Option<&Utf8Path>,
    ) -> Result<ExitStatus, ExecuteError> {
        let command_str = display_command(program, args);
        debug!("running `{command_str}`");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|err| ExecuteError::Spawn {
            command: command_str.clone(),
            err,
        })?;

        let output_err = |err: io::Error| ExecuteError::Output {
            command: command_str.clone(),
            err,
        };
        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            forward_lines(
                BufReader::new(stdout),
                BufReader::new(stderr),
                &self.filter,
                &mut self.sink,
            )
            .await
            .map_err(output_err)?;
        }
        child.wait().await.map_err(output_err)
    }
}

impl SuiteExecutor for ProcessExecutor {
    async fn run_batch(
        &mut self,
        request: &BatchRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError> {
        create_parent_dir(request.log_path).await?;

        // The artifact is the runner's xUnit file. Its native output is not kept.
        let mut args = self.declarative_args.clone();
        args.extend([
            "--output".to_owned(),
            "NONE".to_owned(),
            "--xunit".to_owned(),
            request.log_path.to_string(),
            "--name".to_owned(),
            request.suite_label.to_owned(),
        ]);
        for metadata in &request.metadata {
            args.extend(["--metadata".to_owned(), metadata.clone()]);
        }
        for variable in &request.variables {
            args.extend(["--variable".to_owned(), variable.clone()]);
        }
        for test in &request.tests {
            args.extend(["--test".to_owned(), test.clone()]);
        }
        args.push(request.suite_path.to_string());

        let program = self.declarative_program.clone();
        let status = self.run_command(&program, &args, None).await?;
        Ok(ExecutionResult {
            success: status.success(),
            log_path: request.log_path.to_owned(),
        })
    }

    async fn build_assembly(&mut self, project: &Utf8Path) -> Result<Utf8PathBuf, ExecuteError> {
        info!("building {project}");
        let mut args = self.build_args.clone();
        args.push(project.to_string());

        let program = self.build_program.clone();
        let status = self.run_command(&program, &args, None).await?;
        if !status.success() {
            return Err(ExecuteError::BuildFailed {
                project: project.to_owned(),
                exit_code: status.code(),
            });
        }

        let stem = project.file_stem().unwrap_or(project.as_str());
        Ok(self.results_dir.join(format!("{stem}.dll")))
    }

    async fn run_assembly(
        &mut self,
        request: &AssemblyRequest<'_>,
    ) -> Result<ExecutionResult, ExecuteError> {
        create_parent_dir(request.log_path).await?;

        let mut args = debugger_args(request.debug);
        args.extend(self.runner_args.iter().cloned());
        args.push(format!("-xml:{}", request.log_path));
        args.push(request.assembly.to_string());
        if let Some(fixture) = request.fixture {
            args.push(format!("-run:{fixture}"));
        }

        let program = self.runner_program.clone();
        let cwd = request.assembly.parent().map(ToOwned::to_owned);
        let status = self.run_command(&program, &args, cwd.as_deref()).await?;
        Ok(ExecutionResult {
            success: status.success(),
            log_path: request.log_path.to_owned(),
        })
    }
}

/// Arguments inserted before the runner's own arguments in debug mode.
fn debugger_args(debug: DebugSettings) -> Vec<String> {
    match (debug.enabled, debug.port) {
        (true, Some(port)) => {
            if debug.suspend {
                info!("waiting for a debugger at port {port}");
            }
            vec![
                "--debug".to_owned(),
                format!(
                    "--debugger-agent=transport=dt_socket,server=y,suspend={},address=127.0.0.1:{port}",
                    if debug.suspend { "y" } else { "n" },
                ),
            ]
        }
        (true, None) => vec!["--debug".to_owned()],
        (false, _) => Vec::new(),
    }
}

async fn create_parent_dir(path: &Utf8Path) -> Result<(), ExecuteError> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| ExecuteError::ArtifactDir {
            dir: dir.to_owned(),
            err,
        })
}

fn display_command(program: &str, args: &[String]) -> String {
    shell_words::join(std::iter::once(program).chain(args.iter().map(String::as_str)))
}

/// Starts the helper as a child process, and stops it with a termination signal.
///
/// The helper counts as started once it accepts connections on its port.
#[derive(Debug)]
pub struct ProcessHelperLauncher {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    port: u16,
    ready_timeout: Duration,
}

impl ProcessHelperLauncher {
    /// Creates a launcher from configuration. The helper binary must exist.
    pub fn new(config: &StagehandConfig, settings: &RunSettings) -> Result<Self, RunSettingsError> {
        let (launcher, binary) = Self::from_config(config, settings);
        if !binary.is_file() {
            return Err(RunSettingsError::HelperBinaryNotFound { path: binary });
        }
        Ok(launcher)
    }

    /// Creates a launcher without checking for the helper binary, for runs where no suite will
    /// acquire the helper.
    pub fn unchecked(config: &StagehandConfig, settings: &RunSettings) -> Self {
        Self::from_config(config, settings).0
    }

    fn from_config(config: &StagehandConfig, settings: &RunSettings) -> (Self, Utf8PathBuf) {
        let helper = config.helper();
        let cx = settings.arg_context();
        let workspace_root = settings.workspace_root();

        let binary = workspace_root.join(cx.expand(&helper.binary));
        let cwd = match &helper.cwd {
            Some(cwd) => workspace_root.join(cx.expand(cwd)),
            None => binary
                .parent()
                .map_or_else(|| workspace_root.to_owned(), ToOwned::to_owned),
        };
        let (program, mut args) = match &helper.program {
            Some(program) => (cx.expand(program), vec![binary.to_string()]),
            None => (binary.to_string(), Vec::new()),
        };
        args.extend(cx.expand_all(&helper.args));

        let launcher = Self {
            program,
            args,
            cwd,
            port: settings.helper_port(),
            ready_timeout: helper.ready_timeout,
        };
        (launcher, binary)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        program: &str,
        args: &[&str],
        cwd: &Utf8Path,
        port: u16,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|&arg| arg.to_owned()).collect(),
            cwd: cwd.to_owned(),
            port,
            ready_timeout,
        }
    }
}

impl HelperLauncher for ProcessHelperLauncher {
    type Handle = Child;

    async fn start(&mut self) -> Result<Child, HelperError> {
        let command = display_command(&self.program, &self.args);
        debug!("starting helper `{command}` in {}", self.cwd);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| HelperError::Spawn {
                command: command.clone(),
                err,
            })?;

        let startup = tokio::select! {
            status = child.wait() => Startup::Exited(status),
            () = wait_for_port(self.port) => Startup::Ready,
            () = tokio::time::sleep(self.ready_timeout) => Startup::TimedOut,
        };

        match startup {
            Startup::Ready => {
                debug!("helper listening on port {}", self.port);
                Ok(child)
            }
            Startup::Exited(Ok(status)) => Err(HelperError::ExitedEarly { command, status }),
            Startup::Exited(Err(err)) => Err(HelperError::Wait(err)),
            Startup::TimedOut => {
                if let Err(err) = self.stop(child).await {
                    warn!(
                        "failed to stop unresponsive helper: {}",
                        DisplayErrorChain::new(&err)
                    );
                }
                Err(HelperError::NotReady {
                    command,
                    port: self.port,
                    timeout: self.ready_timeout,
                })
            }
        }
    }

    async fn stop(&mut self, mut child: Child) -> Result<(), HelperError> {
        terminate_child(&mut child)?;
        let status = child.wait().await.map_err(HelperError::Wait)?;
        debug!("helper exited with {status}");
        Ok(())
    }
}

enum Startup {
    Ready,
    Exited(io::Result<ExitStatus>),
    TimedOut,
}

/// Resolves once something accepts connections on the loopback port.
async fn wait_for_port(port: u16) {
    loop {
        if TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

fn terminate_child(child: &mut Child) -> Result<(), HelperError> {
    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use nix::{errno::Errno, sys::signal::{Signal, kill}, unistd::Pid};

            let result = match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                // Exited but not yet reaped.
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(errno) => Err(io::Error::from(errno)),
            };
        } else {
            let result = child.start_kill();
        }
    }
    result.map_err(|err| HelperError::Signal { pid, err })
}
