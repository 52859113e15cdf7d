//! Terraform command wrapper.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use tfprobe_runner::{CommandRunner, CommandSpec, ContainerSpec, RunConfig};

use crate::error::{CoreError, CoreResult};
use crate::staging::StagedOptions;

/// Terraform subcommands driven by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerraformCommand {
    Init,
    Validate,
    Plan,
    Apply,
    Destroy,
    Output,
}

impl TerraformCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for TerraformCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How terraform is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformConfig {
    /// Binary name or path
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Run terraform inside this image instead of on the host
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    /// Per-command timeout in seconds (0 = no timeout)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Stream terraform output while it runs
    #[serde(default)]
    pub stream_logs: bool,
}

fn default_binary() -> String {
    "terraform".to_string()
}

fn default_timeout() -> u64 {
    3600
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            container: None,
            timeout_seconds: default_timeout(),
            stream_logs: false,
        }
    }
}

/// Result of a Terraform command that exited successfully.
#[derive(Debug, Clone)]
pub struct TerraformResult {
    pub command: TerraformCommand,
    pub output: String,
    pub exit_code: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(default)]
    value: Value,
}

/// Runs terraform commands against a staged module.
#[derive(Clone)]
pub struct Terraform {
    runner: Arc<dyn CommandRunner>,
    config: TerraformConfig,
}

impl Terraform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            config: TerraformConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TerraformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TerraformConfig {
        &self.config
    }

    /// Run `terraform init` with the backend config.
    pub async fn init(&self, options: &StagedOptions) -> CoreResult<TerraformResult> {
        self.run_command(TerraformCommand::Init, options).await
    }

    /// Run `terraform validate`.
    pub async fn validate(&self, options: &StagedOptions) -> CoreResult<TerraformResult> {
        self.run_command(TerraformCommand::Validate, options).await
    }

    /// Run `terraform plan`.
    pub async fn plan(&self, options: &StagedOptions) -> CoreResult<TerraformResult> {
        self.run_command(TerraformCommand::Plan, options).await
    }

    /// Run `terraform apply -auto-approve`.
    pub async fn apply(&self, options: &StagedOptions) -> CoreResult<TerraformResult> {
        self.run_command(TerraformCommand::Apply, options).await
    }

    /// Run `terraform destroy -auto-approve`.
    pub async fn destroy(&self, options: &StagedOptions) -> CoreResult<TerraformResult> {
        self.run_command(TerraformCommand::Destroy, options).await
    }

    /// All outputs of the applied module, by name.
    pub async fn outputs(&self, options: &StagedOptions) -> CoreResult<BTreeMap<String, Value>> {
        let result = self.run_command(TerraformCommand::Output, options).await?;
        parse_outputs(&result.output)
    }

    /// A single output rendered as a string; missing or null outputs are errors.
    pub async fn output_required(&self, options: &StagedOptions, name: &str) -> CoreResult<String> {
        let outputs = self.outputs(options).await?;
        required_output(&outputs, name)
    }

    async fn run_command(
        &self,
        command: TerraformCommand,
        options: &StagedOptions,
    ) -> CoreResult<TerraformResult> {
        info!("Running terraform {} in {:?}", command, options.working_dir);

        let spec = CommandSpec::new(&self.config.binary)
            .args(command_args(command, options))
            .workdir(&options.working_dir)
            .mount_root(options.staging_root())
            .env("TF_IN_AUTOMATION", "1")
            .envs(&options.env)
            .container(self.config.container.clone());

        let run_config = RunConfig::default()
            .timeout(self.config.timeout_seconds)
            .stream_logs(self.config.stream_logs);

        debug!("Executing {}", spec.display());

        let result = self.runner.run(&spec, &run_config).await?;

        if !result.success() {
            return Err(CoreError::CommandFailed {
                command: command.to_string(),
                exit_code: result.exit_code,
                output: last_lines(&result.combined_output(), 20),
            });
        }

        Ok(TerraformResult {
            command,
            // `output -json` must stay parseable
            output: if command == TerraformCommand::Output {
                result.stdout
            } else {
                result.combined_output()
            },
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
        })
    }
}

/// Arguments for a subcommand, including variables and backend config.
pub fn command_args(command: TerraformCommand, options: &StagedOptions) -> Vec<String> {
    let mut args = vec![command.as_str().to_string()];

    match command {
        TerraformCommand::Init => {
            args.extend(["-input=false", "-no-color"].map(String::from));
            args.extend(
                options
                    .backend_config
                    .iter()
                    .map(|(k, v)| format!("-backend-config={}={}", k, v)),
            );
        }
        TerraformCommand::Validate => args.push("-no-color".to_string()),
        TerraformCommand::Plan => {
            args.extend(["-input=false", "-lock=false", "-no-color"].map(String::from));
            args.extend(var_args(&options.variables));
        }
        TerraformCommand::Apply | TerraformCommand::Destroy => {
            args.extend(["-input=false", "-auto-approve", "-no-color"].map(String::from));
            args.extend(var_args(&options.variables));
        }
        TerraformCommand::Output => {
            args.extend(["-no-color", "-json"].map(String::from));
        }
    }

    args
}

fn var_args(variables: &BTreeMap<String, Value>) -> Vec<String> {
    variables
        .iter()
        .flat_map(|(name, value)| ["-var".to_string(), format_var(name, value)])
        .collect()
}

/// Render `name=value` for `-var`. Strings go verbatim, everything else as
/// JSON text, which terraform parses as an HCL expression.
pub fn format_var(name: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!("{}={}", name, s),
        Value::Null => format!("{}=null", name),
        other => format!("{}={}", name, other),
    }
}

/// Parse `terraform output -json`.
pub fn parse_outputs(json: &str) -> CoreResult<BTreeMap<String, Value>> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let entries: BTreeMap<String, OutputEntry> = serde_json::from_str(json)
        .map_err(|e| CoreError::InvalidOutput(format!("cannot parse outputs: {}", e)))?;
    Ok(entries
        .into_iter()
        .map(|(name, entry)| (name, entry.value))
        .collect())
}

/// Look up an output and render it as a string.
pub fn required_output(outputs: &BTreeMap<String, Value>, name: &str) -> CoreResult<String> {
    match outputs.get(name) {
        None | Some(Value::Null) => Err(CoreError::MissingOutput(name.to_string())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
