//! Process-based command runner.
//!
//! Runs programs directly on the host, or inside a Docker/Podman container
//! when the [`CommandSpec`] carries a [`ContainerSpec`]. Container runtimes
//! are detected automatically when none is requested.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::{CommandSpec, ContainerRuntime, ContainerSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Log output from command execution.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Process runner options.
#[derive(Debug, Clone)]
pub struct CliRunnerOptions {
    /// Preferred container runtime (if not set, auto-detect)
    pub preferred_runtime: Option<ContainerRuntime>,
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// CI mode (format streamed logs for CI systems)
    pub ci_mode: bool,
}

impl Default for CliRunnerOptions {
    fn default() -> Self {
        Self {
            preferred_runtime: None,
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl CliRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }

    pub fn prefer_docker(mut self) -> Self {
        self.preferred_runtime = Some(ContainerRuntime::Docker);
        self
    }

    pub fn prefer_podman(mut self) -> Self {
        self.preferred_runtime = Some(ContainerRuntime::Podman);
        self
    }
}

/// Fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    fn display(&self) -> String {
        CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .display()
    }
}

/// Process-based command runner.
pub struct CliRunner {
    options: CliRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl CliRunner {
    pub fn new(options: CliRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Set a log handler for streaming logs.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Detect an available container runtime.
    pub fn detect_runtime(options: &CliRunnerOptions) -> RunnerResult<ContainerRuntime> {
        if let Some(preferred) = options.preferred_runtime {
            if Self::is_program_available(preferred.command()) {
                return Ok(preferred);
            }
            warn!(
                "Preferred runtime {} not available, trying alternatives",
                preferred
            );
        }

        if Self::is_program_available(ContainerRuntime::Docker.command()) {
            return Ok(ContainerRuntime::Docker);
        }

        if Self::is_program_available(ContainerRuntime::Podman.command()) {
            return Ok(ContainerRuntime::Podman);
        }

        Err(RunnerError::ProgramNotAvailable(
            "Neither Docker nor Podman is available".to_string(),
        ))
    }

    /// Check if a program starts and reports a version.
    fn is_program_available(program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn resolve_runtime(&self, container: &ContainerSpec) -> RunnerResult<ContainerRuntime> {
        match container.runtime {
            Some(runtime) => Ok(runtime),
            None => Self::detect_runtime(&self.options),
        }
    }

    /// Turn a spec into the process that actually gets spawned.
    pub(crate) fn build_invocation(
        spec: &CommandSpec,
        runtime: Option<ContainerRuntime>,
    ) -> RunnerResult<Invocation> {
        let (container, runtime) = match (&spec.container, runtime) {
            (None, _) => {
                return Ok(Invocation {
                    program: spec.program.clone(),
                    args: spec.args.clone(),
                    current_dir: spec.workdir.clone(),
                    env: spec.env.clone(),
                });
            }
            (Some(container), Some(runtime)) => (container, runtime),
            (Some(container), None) => {
                return Err(RunnerError::InvalidSpec(format!(
                    "no container runtime resolved for image {}",
                    container.full_image()
                )));
            }
        };

        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if let Some(workdir) = &spec.workdir {
            let mount_root = spec.mount_root.as_deref().unwrap_or(workdir);
            let relative = workdir.strip_prefix(mount_root).map_err(|_| {
                RunnerError::InvalidSpec(format!(
                    "working directory {:?} is outside mounted directory {:?}",
                    workdir, mount_root
                ))
            })?;

            args.push("-v".to_string());
            args.push(format!(
                "{}:{}",
                mount_root.to_string_lossy(),
                container.mount_target
            ));
            args.push("-w".to_string());
            args.push(container_path(&container.mount_target, relative));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("--entrypoint".to_string());
        args.push(spec.program.clone());
        args.push(container.full_image());
        args.extend(spec.args.iter().cloned());

        Ok(Invocation {
            program: runtime.command().to_string(),
            args,
            current_dir: None,
            env: BTreeMap::new(),
        })
    }

    fn image_exists(runtime: ContainerRuntime, image: &str) -> bool {
        Command::new(runtime.command())
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn pull_image(runtime: ContainerRuntime, image: &str) -> RunnerResult<()> {
        info!("Pulling image: {}", image);
        let output = Command::new(runtime.command())
            .args(["pull", image])
            .output()
            .map_err(|e| RunnerError::ExecutionFailed(format!("Failed to pull {}: {}", image, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(RunnerError::ExecutionFailed(format!(
                "Failed to pull {}: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Spawn the process and collect its output, streaming lines if requested.
    fn execute_with_streaming(
        invocation: &Invocation,
        run_config: &RunConfig,
        ci_mode: bool,
        log_handler: Option<LogHandler>,
    ) -> RunnerResult<(i64, String, String)> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.envs(&invocation.env);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Executing: {}", invocation.display());

        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", invocation.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr not captured".to_string()))?;

        let stream_logs = run_config.stream_logs;
        let stdout_handle = {
            let handler = log_handler.clone();
            std::thread::spawn(move || {
                collect_stream(stdout, LogStream::Stdout, stream_logs, ci_mode, handler)
            })
        };
        let stderr_handle = std::thread::spawn(move || {
            collect_stream(stderr, LogStream::Stderr, stream_logs, ci_mode, log_handler)
        });

        let status = if run_config.timeout_seconds > 0 {
            let timeout = Duration::from_secs(run_config.timeout_seconds);
            let start = Instant::now();
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) => {
                        if start.elapsed() > timeout {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(RunnerError::Timeout(run_config.timeout_seconds));
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => {
                        return Err(RunnerError::ExecutionFailed(format!(
                            "Failed to wait for process: {}",
                            e
                        )));
                    }
                }
            }
        } else {
            child.wait().map_err(|e| {
                RunnerError::ExecutionFailed(format!("Failed to wait for process: {}", e))
            })?
        };

        let stdout_output = stdout_handle.join().unwrap_or_default();
        let stderr_output = stderr_handle.join().unwrap_or_default();

        let exit_code = status.code().map(i64::from).unwrap_or(-1);

        Ok((exit_code, stdout_output, stderr_output))
    }
}

fn collect_stream<R: Read>(
    reader: R,
    stream: LogStream,
    stream_logs: bool,
    ci_mode: bool,
    log_handler: Option<LogHandler>,
) -> String {
    let mut output = String::new();
    for line in BufReader::new(reader).lines().map_while(Result::ok) {
        output.push_str(&line);
        output.push('\n');
        if !stream_logs {
            continue;
        }
        let log_line = LogLine {
            timestamp: Utc::now(),
            stream,
            message: line,
        };
        if ci_mode {
            // GitHub Actions compatible format
            println!(
                "[{}] [{}] {}",
                log_line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                log_line.stream,
                log_line.message
            );
        } else {
            match stream {
                LogStream::Stdout => println!("{}", log_line.message),
                LogStream::Stderr => eprintln!("{}", log_line.message),
            }
        }
        if let Some(handler) = &log_handler {
            handler(log_line);
        }
    }
    output
}

#[async_trait]
impl CommandRunner for CliRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let program = program.to_string();
        tokio::task::spawn_blocking(move || Self::is_program_available(&program))
            .await
            .map_err(|e| RunnerError::ExecutionFailed(e.to_string()))
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let runtime = match &spec.container {
            Some(container) => Some(self.resolve_runtime(container)?),
            None => None,
        };
        let invocation = Self::build_invocation(spec, runtime)?;
        let cmd_str = invocation.display();

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {}", cmd_str);
            let now = Utc::now();
            return Ok(ExecutionResult {
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", cmd_str),
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        info!("Running: {}", spec.display());

        let image = spec.container.as_ref().map(ContainerSpec::full_image);
        let run_config = run_config.clone();
        let ci_mode = self.options.ci_mode;
        let log_handler = self.log_handler.clone();

        let started_at = Utc::now();
        let (exit_code, stdout, stderr) = tokio::task::spawn_blocking(move || {
            if let (Some(runtime), Some(image)) = (runtime, image) {
                if run_config.pull_image && !Self::image_exists(runtime, &image) {
                    Self::pull_image(runtime, &image)?;
                }
            }
            Self::execute_with_streaming(&invocation, &run_config, ci_mode, log_handler)
        })
        .await
        .map_err(|e| RunnerError::ExecutionFailed(format!("Command task failed: {}", e)))??;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if exit_code == 0 {
            info!("Command completed successfully in {}ms", duration_ms);
        } else {
            error!(
                "Command failed with exit code {} after {}ms",
                exit_code, duration_ms
            );
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}

/// `relative` joined onto the mount target with `/` separators.
fn container_path(mount_target: &str, relative: &Path) -> String {
    let mut path = mount_target.trim_end_matches('/').to_string();
    for component in relative.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_invocation_passes_through() {
        let spec = CommandSpec::new("terraform")
            .args(["init", "-input=false"])
            .workdir("/tmp/stage/module")
            .env("TF_IN_AUTOMATION", "1");

        let invocation = CliRunner::build_invocation(&spec, None).unwrap();

        assert_eq!(invocation.program, "terraform");
        assert_eq!(invocation.args, vec!["init", "-input=false"]);
        assert_eq!(invocation.current_dir, Some(PathBuf::from("/tmp/stage/module")));
        assert_eq!(invocation.env.get("TF_IN_AUTOMATION"), Some(&"1".to_string()));
    }

    #[test]
    fn test_container_invocation() {
        let spec = CommandSpec::new("terraform")
            .args(["plan", "-no-color"])
            .workdir("/tmp/stage/module")
            .env("ARM_SUBSCRIPTION_ID", "sub")
            .container(Some(ContainerSpec::new("hashicorp/terraform").tag("1.6")));

        let invocation =
            CliRunner::build_invocation(&spec, Some(ContainerRuntime::Podman)).unwrap();

        assert_eq!(invocation.program, "podman");
        assert_eq!(
            invocation.args,
            vec![
                "run",
                "--rm",
                "-v",
                "/tmp/stage/module:/workspace",
                "-w",
                "/workspace",
                "-e",
                "ARM_SUBSCRIPTION_ID=sub",
                "--entrypoint",
                "terraform",
                "hashicorp/terraform:1.6",
                "plan",
                "-no-color",
            ]
        );
        assert!(invocation.current_dir.is_none());
    }

    #[test]
    fn test_container_mounts_whole_staged_tree() {
        let spec = CommandSpec::new("terraform")
            .arg("init")
            .workdir("/tmp/stage/repo/examples/azure/tf-storage")
            .mount_root("/tmp/stage/repo")
            .container(Some(ContainerSpec::new("hashicorp/terraform")));

        let invocation =
            CliRunner::build_invocation(&spec, Some(ContainerRuntime::Docker)).unwrap();

        // sibling modules referenced as ../../modules stay inside the mount
        assert_eq!(
            &invocation.args[2..6],
            &["-v", "/tmp/stage/repo:/workspace", "-w", "/workspace/examples/azure/tf-storage"]
        );
    }

    #[test]
    fn test_workdir_outside_mount_is_rejected() {
        let spec = CommandSpec::new("terraform")
            .workdir("/tmp/other")
            .mount_root("/tmp/stage/repo")
            .container(Some(ContainerSpec::new("hashicorp/terraform")));

        let result = CliRunner::build_invocation(&spec, Some(ContainerRuntime::Docker));
        assert!(matches!(result, Err(RunnerError::InvalidSpec(_))));
    }

    #[test]
    fn test_container_invocation_requires_runtime() {
        let spec = CommandSpec::new("terraform")
            .container(Some(ContainerSpec::new("hashicorp/terraform")));

        let result = CliRunner::build_invocation(&spec, None);
        assert!(matches!(result, Err(RunnerError::InvalidSpec(_))));
    }

    #[test]
    fn test_dry_run_mode() {
        let runner = CliRunner::new(CliRunnerOptions::new().dry_run());
        assert!(runner.is_dry_run());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_spawn() {
        let runner = CliRunner::new(CliRunnerOptions::new().dry_run());
        let spec = CommandSpec::new("definitely-not-a-real-program-tfprobe").arg("apply");

        let result = runner.run(&spec, &RunConfig::default()).await.unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("[DRY-RUN]"));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let runner = CliRunner::new(CliRunnerOptions::default());
        let spec = CommandSpec::new("definitely-not-a-real-program-tfprobe");

        let result = runner.run(&spec, &RunConfig::default()).await;
        assert!(matches!(result, Err(RunnerError::ExecutionFailed(_))));
        assert!(!runner
            .is_available("definitely-not-a-real-program-tfprobe")
            .await
            .unwrap());
    }
}
