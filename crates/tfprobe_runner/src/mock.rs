//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait
//! for use in unit tests without requiring terraform, az or a container
//! runtime on the machine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
        }
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CapturedCall {
    /// First non-flag argument.
    pub fn subcommand(&self) -> Option<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .find(|a| !a.starts_with('-'))
    }
}

/// Mock command runner for testing.
///
/// Responses are looked up by subcommand first (`apply`, `destroy`, ...),
/// then taken from the sequential queue, and default to an empty success.
#[derive(Clone)]
pub struct MockRunner {
    /// Programs reported as unavailable.
    unavailable: Arc<RwLock<HashSet<String>>>,
    /// Responses keyed by subcommand.
    by_subcommand: Arc<RwLock<HashMap<String, MockResponse>>>,
    /// Sequential responses for run calls.
    responses: Arc<RwLock<Vec<MockResponse>>>,
    /// Index of next sequential response to return.
    response_index: Arc<AtomicUsize>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    /// Subcommands whose spawn fails outright.
    spawn_failures: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            unavailable: Arc::new(RwLock::new(HashSet::new())),
            by_subcommand: Arc::new(RwLock::new(HashMap::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            spawn_failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Report a program as unavailable.
    pub fn set_unavailable(self, program: impl Into<String>) -> Self {
        self.unavailable.write().insert(program.into());
        self
    }

    /// Respond to every call of a subcommand with the given response.
    pub fn on_subcommand(self, subcommand: impl Into<String>, response: MockResponse) -> Self {
        self.by_subcommand.write().insert(subcommand.into(), response);
        self
    }

    /// Add a sequential response.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Fail to spawn the process for a subcommand.
    pub fn fail_spawn(self, subcommand: impl Into<String>, message: impl Into<String>) -> Self {
        self.spawn_failures
            .write()
            .insert(subcommand.into(), message.into());
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Subcommands in the order they were run.
    pub fn subcommands(&self) -> Vec<String> {
        self.captured_calls
            .read()
            .iter()
            .filter_map(|c| c.subcommand().map(str::to_string))
            .collect()
    }

    /// Number of times a subcommand was run.
    pub fn count_of(&self, subcommand: &str) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.subcommand() == Some(subcommand))
            .count()
    }

    /// Calls to a specific subcommand.
    pub fn get_subcommand_calls(&self, subcommand: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.subcommand() == Some(subcommand))
            .cloned()
            .collect()
    }

    fn record_call(&self, call: CapturedCall) {
        self.captured_calls.write().push(call);
    }

    fn next_response(&self, subcommand: Option<&str>) -> MockResponse {
        if let Some(response) = subcommand.and_then(|s| self.by_subcommand.read().get(s).cloned()) {
            return response;
        }
        let responses = self.responses.read();
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        Ok(!self.unavailable.read().contains(program))
    }

    async fn run(&self, spec: &CommandSpec, _run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        let call = CapturedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            workdir: spec.workdir.clone(),
            env: spec.env.clone(),
        };
        let subcommand = call.subcommand().map(str::to_string);
        self.record_call(call);

        if let Some(message) = subcommand
            .as_deref()
            .and_then(|s| self.spawn_failures.read().get(s).cloned())
        {
            return Err(RunnerError::ExecutionFailed(message));
        }

        let response = self.next_response(subcommand.as_deref());
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}
