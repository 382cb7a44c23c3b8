//! The process supervisor seam.
//!
//! A supervisor runs one external command to completion, streaming its
//! output and enforcing a timeout. Retry policy belongs to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Directory the child process is rooted at.
    pub working_dir: PathBuf,
    /// Shell command line.
    pub command_line: String,
    /// Variables layered over the inherited environment.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        command_line: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            command_line: command_line.into(),
            env: HashMap::new(),
            timeout,
        }
    }

    pub fn with_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Emitted by the supervisor itself, e.g. a timeout notice.
    System,
}

/// A piece of output, delivered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub stream: LogStream,
    pub content: String,
}

impl OutputChunk {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stderr,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            stream: LogStream::System,
            content: content.into(),
        }
    }
}

/// How a supervised command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit. `-1` when the process was ended by a signal.
    NonZeroExit(i32),
    Timeout,
    SpawnFailure(String),
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exited successfully"),
            ExitOutcome::NonZeroExit(-1) => write!(f, "terminated by signal"),
            ExitOutcome::NonZeroExit(code) => write!(f, "exited with code {code}"),
            ExitOutcome::Timeout => write!(f, "timed out"),
            ExitOutcome::SpawnFailure(reason) => write!(f, "failed to start: {reason}"),
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Run `spec` to completion, handing every output chunk to `on_output`
    /// in arrival order. Never retries.
    async fn run(
        &self,
        spec: &CommandSpec,
        on_output: &(dyn Fn(OutputChunk) + Send + Sync),
    ) -> ExitOutcome;
}
