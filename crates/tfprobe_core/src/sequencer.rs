//! Module execution sequencing.
//!
//! A run is strictly linear:
//! stage → (init, validate, plan | init) → apply → check → destroy.
//! Destroy always runs once the module is staged, whatever happened before.
//! That includes a run that panics or is cancelled mid-way: the staged copy is
//! then handed to a background destroy on the current runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use tfprobe_runner::CommandRunner;

use crate::error::{CheckError, CoreError, CoreResult};
use crate::module::{ExecutionOutcome, ModuleDescriptor};
use crate::staging::{stage, StagedOptions, StagingOptions};
use crate::terraform::{Terraform, TerraformConfig};

/// Verification run against the provisioned module before it is destroyed.
#[async_trait]
pub trait ProvisionCheck: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> String;

    /// Inspect the applied module.
    async fn check(
        &self,
        terraform: &Terraform,
        options: &StagedOptions,
    ) -> Result<ExecutionOutcome, CheckError>;
}

/// One step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Stage,
    Init,
    Validate,
    Plan,
    Apply,
    Check,
    Destroy,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stage => "stage",
            Self::Init => "init",
            Self::Validate => "validate",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Check => "check",
            Self::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Record of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Summary of one module run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub module: String,
    pub static_analysis: bool,
    pub outcome: ExecutionOutcome,
    pub steps: Vec<StepRecord>,
    /// Verdict of the provisioning check, when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    fn new(module: &ModuleDescriptor, static_analysis: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            module: module.label(),
            static_analysis,
            outcome: ExecutionOutcome::Failed,
            steps: Vec::new(),
            check: None,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Steps in the order they ran.
    pub fn step_names(&self) -> Vec<Step> {
        self.steps.iter().map(|s| s.step).collect()
    }

    async fn record<T, F>(&mut self, step: Step, fut: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.steps.push(StepRecord {
            step,
            passed: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            message: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    fn finish(&mut self, result: &CoreResult<ExecutionOutcome>) {
        self.finished_at = Utc::now();
        match result {
            Ok(outcome) => self.outcome = *outcome,
            Err(e) => {
                self.outcome = ExecutionOutcome::Failed;
                self.error = Some(e.to_string());
            }
        }
    }
}

/// Owns a staged module between staging and the destroy step.
///
/// Dropped while still armed (panic or cancellation), it spawns the destroy
/// so applied resources are not left behind.
struct DestroyGuard {
    terraform: Terraform,
    module: String,
    staged: Option<StagedOptions>,
}

impl DestroyGuard {
    fn staged(&self) -> &StagedOptions {
        self.staged
            .as_ref()
            .expect("staged module is present until the guard is disarmed")
    }

    /// Hand the staged module back for the regular destroy step.
    fn disarm(mut self) -> StagedOptions {
        self.staged
            .take()
            .expect("staged module is present until the guard is disarmed")
    }
}

impl Drop for DestroyGuard {
    fn drop(&mut self) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        warn!("Run of {} interrupted before destroy", self.module);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                "No runtime left to destroy {}, resources may be leaked in {}",
                self.module,
                staged.working_dir.display()
            );
            return;
        };

        let terraform = self.terraform.clone();
        let module = std::mem::take(&mut self.module);
        handle.spawn(async move {
            match terraform.destroy(&staged).await {
                Ok(_) => info!("Destroyed interrupted run of {}", module),
                Err(e) => error!(
                    "Destroy of interrupted run of {} failed, resources may be leaked: {}",
                    module, e
                ),
            }
        });
    }
}

/// Stages a module and drives terraform through a fixed command sequence.
pub struct ModuleExecution {
    terraform: Terraform,
    staging: StagingOptions,
}

impl ModuleExecution {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            terraform: Terraform::new(runner),
            staging: StagingOptions::default(),
        }
    }

    pub fn with_terraform_config(mut self, config: TerraformConfig) -> Self {
        self.terraform = self.terraform.with_config(config);
        self
    }

    pub fn with_staging_options(mut self, staging: StagingOptions) -> Self {
        self.staging = staging;
        self
    }

    pub fn terraform(&self) -> &Terraform {
        &self.terraform
    }

    /// Stage the module, provision it, destroy it, and report the outcome.
    ///
    /// Staging failures come back as `Ok(Failed)` without running terraform.
    /// Any later failure is returned as an error after destroy has run.
    pub async fn execute(
        &self,
        module: &mut ModuleDescriptor,
        use_static_analysis: bool,
    ) -> CoreResult<ExecutionOutcome> {
        self.execute_with_check(module, use_static_analysis, None)
            .await
    }

    /// Like [`execute`](Self::execute), running `check` between apply and destroy.
    pub async fn execute_with_check(
        &self,
        module: &mut ModuleDescriptor,
        use_static_analysis: bool,
        check: Option<&dyn ProvisionCheck>,
    ) -> CoreResult<ExecutionOutcome> {
        self.execute_reported(module, use_static_analysis, check)
            .await
            .1
    }

    /// Run and also return a per-step report.
    pub async fn execute_reported(
        &self,
        module: &mut ModuleDescriptor,
        use_static_analysis: bool,
        check: Option<&dyn ProvisionCheck>,
    ) -> (ExecutionReport, CoreResult<ExecutionOutcome>) {
        module.resolve_defaults();
        let module: &ModuleDescriptor = module;
        let mut report = ExecutionReport::new(module, use_static_analysis);

        info!(
            "Executing module {} (static analysis: {})",
            report.module, use_static_analysis
        );

        let to_stage = module.clone();
        let staging = self.staging.clone();
        let staged = report
            .record(Step::Stage, async move {
                to_stage.validate_variables()?;
                tokio::task::spawn_blocking(move || stage(&to_stage, &staging))
                    .await
                    .map_err(|e| CoreError::Staging(format!("staging task failed: {}", e)))?
            })
            .await;
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Staging {} failed: {}", report.module, e);
                let result = Ok(ExecutionOutcome::Failed);
                report.finish(&result);
                report.error = Some(e.to_string());
                return (report, result);
            }
        };

        let guard = DestroyGuard {
            terraform: self.terraform.clone(),
            module: report.module.clone(),
            staged: Some(staged),
        };
        let body = self
            .provision(guard.staged(), use_static_analysis, check, &mut report)
            .await;
        let staged = guard.disarm();

        let destroyed = report
            .record(Step::Destroy, self.terraform.destroy(&staged))
            .await;

        let result = match (body, destroyed) {
            (Err(e), Err(destroy_err)) => {
                error!(
                    "Destroy of {} also failed, resources may be leaked: {}",
                    report.module, destroy_err
                );
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(_), Err(destroy_err)) => Err(destroy_err),
            (Ok(outcome), Ok(_)) => Ok(outcome),
        };

        report.finish(&result);
        match &result {
            Ok(outcome) => info!("Module {} finished: {}", report.module, outcome),
            Err(e) => error!("Module {} failed: {}", report.module, e),
        }

        (report, result)
    }

    async fn provision(
        &self,
        staged: &StagedOptions,
        use_static_analysis: bool,
        check: Option<&dyn ProvisionCheck>,
        report: &mut ExecutionReport,
    ) -> CoreResult<ExecutionOutcome> {
        let tf = &self.terraform;

        report.record(Step::Init, tf.init(staged)).await?;
        if use_static_analysis {
            report.record(Step::Validate, tf.validate(staged)).await?;
            report.record(Step::Plan, tf.plan(staged)).await?;
        }
        report.record(Step::Apply, tf.apply(staged)).await?;

        let Some(check) = check else {
            return Ok(ExecutionOutcome::Successful);
        };

        info!("Running {} check on {}", check.name(), report.module);
        let started = Instant::now();
        let result = check.check(tf, staged).await;
        report.steps.push(StepRecord {
            step: Step::Check,
            passed: matches!(result, Ok(ExecutionOutcome::Successful)),
            duration_ms: started.elapsed().as_millis() as u64,
            message: match &result {
                Ok(ExecutionOutcome::Successful) => None,
                Ok(ExecutionOutcome::Failed) => Some(format!("{} check reported Failed", check.name())),
                Err(e) => Some(e.to_string()),
            },
        });

        // an unhealthy verdict is a value, not an error
        let outcome = result.map_err(CoreError::Check)?;
        report.check = Some(outcome);
        Ok(outcome)
    }
}
