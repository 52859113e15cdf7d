//! Console report of module runs.

use colored::Colorize;

use tfprobe_core::{CoreResult, ExecutionOutcome, ExecutionReport};

/// Result of one module run, as shown to the user.
#[derive(Debug)]
pub struct ModuleRun {
    pub name: String,
    pub report: ExecutionReport,
    pub result: CoreResult<ExecutionOutcome>,
}

impl ModuleRun {
    /// Errors count as failures.
    pub fn outcome(&self) -> ExecutionOutcome {
        match &self.result {
            Ok(outcome) => *outcome,
            Err(_) => ExecutionOutcome::Failed,
        }
    }
}

/// Print the step list of one run.
pub fn print_run(run: &ModuleRun) {
    let duration = (run.report.finished_at - run.report.started_at).num_milliseconds();
    let header = format!("{} ({})", run.name, run.report.module);

    match run.outcome() {
        ExecutionOutcome::Successful => {
            println!("{} {} {}", "✓".green().bold(), header.bold(), format!("{}ms", duration).dimmed())
        }
        ExecutionOutcome::Failed => {
            println!("{} {} {}", "✗".red().bold(), header.bold(), format!("{}ms", duration).dimmed())
        }
    }

    for step in &run.report.steps {
        let mark = if step.passed { "✓".green() } else { "✗".red() };
        let line = format!("    {} {:<9} {}", mark, step.step.to_string(), format!("{}ms", step.duration_ms).dimmed());
        match &step.message {
            Some(message) if !step.passed => println!("{} {}", line, first_line(message).red()),
            _ => println!("{}", line),
        }
    }

    if let Some(error) = &run.report.error {
        println!("    {} {}", "error:".red().bold(), first_line(error));
    }
}

/// Print a one-line summary and return the combined outcome.
pub fn print_summary(runs: &[ModuleRun]) -> ExecutionOutcome {
    let failed: Vec<&str> = runs
        .iter()
        .filter(|r| !r.outcome().is_successful())
        .map(|r| r.name.as_str())
        .collect();
    let passed = runs.len() - failed.len();

    println!();
    if failed.is_empty() {
        println!(
            "{} {} of {} module(s) successful",
            "✓".green().bold(),
            passed,
            runs.len()
        );
        ExecutionOutcome::Successful
    } else {
        println!(
            "{} {} of {} module(s) failed: {}",
            "✗".red().bold(),
            failed.len(),
            runs.len(),
            failed.join(", ")
        );
        ExecutionOutcome::Failed
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
