use std::path::PathBuf;

use thiserror::Error;

pub type GoldenResult<T> = Result<T, GoldenError>;

#[derive(Debug, Error)]
pub enum GoldenError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fixture `{name}` not found at `{}`", .path.display())]
    FixtureNotFound { name: String, path: PathBuf },

    #[error("fixture `{name}` could not be parsed: {reason}")]
    FixtureParse { name: String, reason: String },

    #[error("pipeline `{adapter}` failed: {reason}")]
    PipelineExecution { adapter: String, reason: String },

    #[error("scenario `{scenario}` has no comparison rule for reference field(s): {}", .fields.join(", "))]
    ComparisonRuleMissing {
        scenario: String,
        fields: Vec<String>,
    },

    #[error("`{subject}` exceeded wall-clock budget of {budget_ms}ms")]
    TimeoutExceeded { subject: String, budget_ms: u64 },

    #[error(
        "scenario `{scenario}`: {failed} of {total} comparison(s) failed; first: field `{field}` expected {expected}, got {actual}"
    )]
    AssertionMismatch {
        scenario: String,
        failed: usize,
        total: usize,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("scenario `{scenario}` aborted at {stage}: {source}")]
    ScenarioAborted {
        scenario: String,
        stage: &'static str,
        #[source]
        source: Box<GoldenError>,
    },
}

impl GoldenError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    /// Re-express a command-layer failure at the adapter boundary.
    ///
    /// Timeouts stay timeouts (attributed to the adapter); every other
    /// failure while producing a live result is a pipeline execution error.
    #[must_use]
    pub fn into_pipeline_error(self, adapter: &str) -> Self {
        match self {
            Self::CommandTimedOut { timeout_ms, .. } => Self::TimeoutExceeded {
                subject: adapter.to_owned(),
                budget_ms: timeout_ms,
            },
            Self::PipelineExecution { .. } | Self::TimeoutExceeded { .. } => self,
            other => Self::PipelineExecution {
                adapter: adapter.to_owned(),
                reason: other.to_string(),
            },
        }
    }

    /// The failure itself, without the scenario it aborted.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::ScenarioAborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the scenario this error belongs to, when it carries one.
    #[must_use]
    pub fn scenario(&self) -> Option<&str> {
        match self {
            Self::ScenarioAborted { scenario, .. }
            | Self::ComparisonRuleMissing { scenario, .. }
            | Self::AssertionMismatch { scenario, .. } => Some(scenario.as_str()),
            _ => None,
        }
    }

    /// Whether this error aborts a scenario before comparison.
    ///
    /// Only `AssertionMismatch` describes a regression in the model output;
    /// everything else is an environment, fixture, or configuration problem.
    #[must_use]
    pub const fn aborts_scenario(&self) -> bool {
        !matches!(self, Self::AssertionMismatch { .. })
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "FG-IO",
            Self::Json(_) => "FG-JSON",
            Self::FixtureNotFound { .. } => "FG-FIXTURE-NOT-FOUND",
            Self::FixtureParse { .. } => "FG-FIXTURE-PARSE",
            Self::PipelineExecution { .. } => "FG-PIPELINE-EXEC",
            Self::ComparisonRuleMissing { .. } => "FG-RULE-MISSING",
            Self::TimeoutExceeded { .. } => "FG-TIMEOUT",
            Self::AssertionMismatch { .. } => "FG-MISMATCH",
            Self::InvalidConfig(_) => "FG-INVALID-CONFIG",
            Self::CommandMissing { .. } => "FG-CMD-MISSING",
            Self::CommandFailed { .. } => "FG-CMD-FAILED",
            Self::CommandTimedOut { .. } => "FG-CMD-TIMEOUT",
            Self::ScenarioAborted { .. } => "FG-SCENARIO-ABORTED",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}
