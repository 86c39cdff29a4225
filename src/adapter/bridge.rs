//! Bridge to an external model tool that prints one JSON document.
//!
//! Invocation: `program [args...] <media_path> [--context <json>]`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use super::AdapterContext;
use crate::error::{GoldenError, GoldenResult};
use crate::process::{command_exists, run_command_with_timeout};

const CONTEXT_FLAG: &str = "--context";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBridge {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandBridge {
    /// Fails with `CommandMissing` when `program` is not on `PATH`.
    pub fn new(program: impl Into<String>) -> GoldenResult<Self> {
        let program = program.into();
        if !command_exists(&program) {
            return Err(GoldenError::CommandMissing { command: program });
        }
        Ok(Self {
            program,
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        })
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Hard limit after which the tool process is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn build_args(&self, media: &Path, context: Option<&AdapterContext>) -> GoldenResult<Vec<String>> {
        let mut args = self.args.clone();
        args.push(media.display().to_string());
        if let Some(context) = context {
            args.push(CONTEXT_FLAG.to_owned());
            args.push(serde_json::to_string(context)?);
        }
        Ok(args)
    }

    /// Run the tool on `media` and parse its stdout as JSON.
    pub fn invoke(&self, media: &Path, context: Option<&AdapterContext>) -> GoldenResult<Value> {
        self.invoke_within(media, context, None)
    }

    /// Like [`invoke`](Self::invoke), but the tool is killed at whichever
    /// comes first: the bridge timeout or `budget`.
    pub fn invoke_within(
        &self,
        media: &Path,
        context: Option<&AdapterContext>,
        budget: Option<Duration>,
    ) -> GoldenResult<Value> {
        let args = self.build_args(media, context)?;
        let limit = match (self.timeout, budget) {
            (Some(own), Some(budget)) => Some(own.min(budget)),
            (own, budget) => own.or(budget),
        };
        let output = run_command_with_timeout(&self.program, &args, self.working_dir.as_deref(), limit)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(serde_json::from_str(stdout.trim())?)
    }
}
