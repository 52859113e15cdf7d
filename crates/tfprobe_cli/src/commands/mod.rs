//! CLI command definitions.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use tfprobe_runner::{CliRunner, CliRunnerOptions};

pub mod exec;
pub mod run;
pub mod stage;

/// tfprobe - Terraform module test harness
#[derive(Parser)]
#[command(name = "tfprobe")]
#[command(version, about = "tfprobe - Terraform module test harness")]
#[command(long_about = r#"
tfprobe stages a Terraform module in a temporary directory, provisions it,
optionally checks the health of what was created, and always destroys it.

COMMANDS:
  run    → Run the modules of a suite file
  exec   → Run a single module given on the command line
  stage  → Copy a module to a staging directory and print its path

EXIT CODES:
  0 - Every module run was successful
  1 - General error
  2 - Invalid arguments
  3 - At least one module run failed
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the modules of a suite
    Run(run::RunArgs),

    /// Run one module
    Exec(exec::ExecArgs),

    /// Stage a module without running terraform
    Stage(stage::StageArgs),
}

/// Runner shared by every module of an invocation.
pub(crate) fn command_runner(dry_run: bool) -> Arc<CliRunner> {
    let options = CliRunnerOptions::default();
    let options = if dry_run { options.dry_run() } else { options };
    Arc::new(CliRunner::new(options))
}

/// Parse a `key=value` argument.
pub(crate) fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("account_tier=Standard").unwrap(),
            ("account_tier".to_string(), "Standard".to_string())
        );
        assert_eq!(
            parse_key_val("tags={\"env\"=\"ci\"}").unwrap().1,
            "{\"env\"=\"ci\"}"
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "tfprobe", "run", "--suite", "s.toml", "-m", "storage", "-m", "network", "--jobs", "2",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.suite.to_string_lossy(), "s.toml");
                assert_eq!(args.modules, vec!["storage", "network"]);
                assert_eq!(args.jobs, 2);
                assert!(!args.dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_exec() {
        let cli = Cli::parse_from([
            "tfprobe",
            "--log-format",
            "json",
            "exec",
            "--module-path",
            "examples/azure/tf-storage",
            "--var",
            "account_tier=Standard",
            "--static-analysis",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.root, "../");
                assert_eq!(args.vars, vec![("account_tier".to_string(), "Standard".to_string())]);
                assert!(args.static_analysis);
                assert!(!args.health_check);
            }
            _ => panic!("expected exec"),
        }
    }
}
