//! Child-process supervisor.
//!
//! Runs each command under `sh -c` in its working directory, streaming
//! stdout and stderr as they arrive and killing the child when its
//! timeout elapses.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use minici_core::executor::{CommandSpec, ExitOutcome, LogStream, OutputChunk, Supervisor};

const READ_BUFFER: usize = 8192;

/// Supervisor that runs commands as local child processes.
pub struct LocalProcessSupervisor {
    shell: String,
    /// How long to keep reading after exit. Grandchildren may hold the
    /// pipes open past the child's own exit.
    drain_grace: Duration,
}

impl LocalProcessSupervisor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            drain_grace: Duration::from_secs(2),
        }
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

impl Default for LocalProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for LocalProcessSupervisor {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_output: &(dyn Fn(OutputChunk) + Send + Sync),
    ) -> ExitOutcome {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&spec.command_line)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            command = %spec.command_line,
            dir = %spec.working_dir.display(),
            timeout_secs = spec.timeout.as_secs(),
            "Starting process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %spec.command_line, error = %e, "Failed to spawn process");
                return ExitOutcome::SpawnFailure(e.to_string());
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, LogStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, LogStream::Stderr, tx.clone())));
        }
        drop(tx);

        let deadline = tokio::time::sleep(spec.timeout);
        tokio::pin!(deadline);

        let waited = loop {
            tokio::select! {
                Some(chunk) = rx.recv() => on_output(chunk),
                status = child.wait() => break Some(status),
                _ = &mut deadline => break None,
            }
        };

        let outcome = match waited {
            Some(Ok(status)) => match status.code() {
                Some(0) => ExitOutcome::Success,
                Some(code) => ExitOutcome::NonZeroExit(code),
                None => ExitOutcome::NonZeroExit(-1),
            },
            Some(Err(e)) => {
                warn!(command = %spec.command_line, error = %e, "Failed to wait for process");
                ExitOutcome::SpawnFailure(format!("wait failed: {e}"))
            }
            None => {
                warn!(command = %spec.command_line, "Process timed out");
                on_output(OutputChunk::system(format!(
                    "Process timed out after {}s, terminating\n",
                    spec.timeout.as_secs()
                )));
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out process");
                }
                ExitOutcome::Timeout
            }
        };

        let drain = async {
            while let Some(chunk) = rx.recv().await {
                on_output(chunk);
            }
        };
        if tokio::time::timeout(self.drain_grace, drain).await.is_err() {
            debug!(command = %spec.command_line, "Output still open after exit, abandoning");
        }
        for reader in readers {
            reader.abort();
        }

        info!(command = %spec.command_line, outcome = %outcome, "Process finished");
        outcome
    }
}

async fn pump<R>(mut reader: R, stream: LogStream, tx: mpsc::UnboundedSender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER];
    let mut carry = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let content = decode_chunk(&mut carry);
                if !content.is_empty() && tx.send(OutputChunk { stream, content }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output read error");
                break;
            }
        }
    }
    if !carry.is_empty() {
        let _ = tx.send(OutputChunk {
            stream,
            content: String::from_utf8_lossy(&carry).into_owned(),
        });
    }
}

/// Decode as much of `carry` as possible, leaving an incomplete trailing
/// UTF-8 sequence in place for the next read.
fn decode_chunk(carry: &mut Vec<u8>) -> String {
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let rest = carry.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(carry).into_owned();
            *carry = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}
