//! The build pipeline: clone, install, test.
//!
//! One `run` drives one build from `pending` to a terminal status. Every
//! failure is folded into the build record; nothing escapes to the caller.

use minici_config::{StepConfig, SystemConfig};
use minici_core::event::{BuildEvent, Broadcaster};
use minici_core::executor::{CommandSpec, ExitOutcome, LogStream, OutputChunk, Supervisor};
use minici_core::job::JobDescriptor;
use minici_core::notify::{Notifier, NotifyPolicy};
use minici_core::{BuildId, BuildRecord, BuildStatus, CommitInfo};
use minici_db::{BuildStore, DbError, with_retry};
use minici_executor::git;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::output::OutputWriter;

/// Conclusion recorded for every `error` build.
pub const ERROR_CONCLUSION: &str = "Build process failed";

// Test runners that report an empty suite, e.g. "Error: no test specified"
static NO_TESTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)no tests? (specified|found)").unwrap());

/// Everything the pipeline needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workspace_dir: PathBuf,
    pub clone_timeout: Duration,
    pub install: StepConfig,
    pub test: StepConfig,
    pub descriptor_files: Vec<String>,
    pub flush_interval: Duration,
    pub env: HashMap<String, String>,
    pub notify_policy: NotifyPolicy,
    pub recipients: Vec<String>,
}

impl From<&SystemConfig> for PipelineSettings {
    fn from(config: &SystemConfig) -> Self {
        Self {
            workspace_dir: config.workspace_dir.clone(),
            clone_timeout: config.pipeline.clone_timeout,
            install: config.pipeline.install.clone(),
            test: config.pipeline.test.clone(),
            descriptor_files: config.pipeline.descriptor_files.clone(),
            flush_interval: config.pipeline.flush_interval,
            env: config.pipeline.env.clone(),
            notify_policy: config.notifications.policy,
            recipients: config.notifications.recipients.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum PipelineError {
    #[error("{0}")]
    Setup(String),

    #[error("{step} {outcome}")]
    Step {
        step: &'static str,
        outcome: ExitOutcome,
    },

    #[error("could not persist build: {0}")]
    Persistence(#[from] DbError),
}

/// Result of a pipeline that got as far as running the tests.
struct TestResult {
    status: BuildStatus,
    conclusion: String,
    duration: Duration,
}

/// Runs the fixed pipeline for one build at a time.
pub struct BuildPipeline {
    store: Arc<dyn BuildStore>,
    supervisor: Arc<dyn Supervisor>,
    broadcaster: Arc<dyn Broadcaster>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
}

impl BuildPipeline {
    pub fn new(
        store: Arc<dyn BuildStore>,
        supervisor: Arc<dyn Supervisor>,
        broadcaster: Arc<dyn Broadcaster>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            supervisor,
            broadcaster,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    /// Working directory for a build. Unique per build id.
    pub fn workdir(&self, repository: &str, build_id: BuildId) -> PathBuf {
        self.settings
            .workspace_dir
            .join(minici_core::build::repo_name(repository))
            .join(build_id.to_string())
    }

    /// Run the pipeline for `job` and return the terminal status reached.
    pub async fn run(&self, job: &JobDescriptor) -> BuildStatus {
        let writer = self.output_writer(job.build_id);
        self.run_with_writer(job, &writer).await
    }

    /// Output writer for one build, flushing on the configured interval.
    pub fn output_writer(&self, build_id: BuildId) -> OutputWriter {
        OutputWriter::start(build_id, self.store.clone(), self.settings.flush_interval)
    }

    /// Like [`run`](Self::run), buffering output in a writer the caller
    /// owns so it can still be persisted if the run is cut short.
    pub async fn run_with_writer(&self, job: &JobDescriptor, writer: &OutputWriter) -> BuildStatus {
        info!(
            build_id = %job.build_id,
            job_id = %job.job_id,
            repository = %job.repository,
            branch = %job.branch,
            "Starting pipeline"
        );

        let status = match self.execute(job, writer).await {
            Ok(result) => self.complete(job.build_id, writer, result).await,
            Err(err) => self.fail(job.build_id, writer, err).await,
        };

        info!(build_id = %job.build_id, status = %status, "Pipeline finished");
        status
    }

    /// Mark a build whose pipeline died without finishing as `error`.
    pub async fn abandon(&self, build_id: BuildId, reason: &str) {
        if let Err(e) = self
            .store
            .append_output(build_id, &format!("Error: {reason}\n"))
            .await
        {
            warn!(build_id = %build_id, error = %e, "Failed to record abandon reason");
        }

        let result = with_retry("abandon write", || {
            self.store.update(
                build_id,
                Box::new(|build| {
                    if build.status.is_terminal() {
                        return Ok(());
                    }
                    build.finish(BuildStatus::Error, ERROR_CONCLUSION, None)
                }),
            )
        })
        .await;
        if let Err(e) = result {
            error!(build_id = %build_id, error = %e, "Failed to mark abandoned build as error");
        }

        self.broadcaster.publish(BuildEvent::BuildError {
            build_id,
            reason: reason.to_string(),
        });
    }

    async fn execute(
        &self,
        job: &JobDescriptor,
        writer: &OutputWriter,
    ) -> Result<TestResult, PipelineError> {
        let build_id = job.build_id;

        writer.push(&format!(
            "Starting build of {} ({})\n",
            job.repository, job.branch
        ));
        writer.flush().await?;
        let build = self.store.get(build_id).await?;
        self.broadcaster.publish(BuildEvent::NewBuild { build });

        let workdir = self.workdir(&job.repository, build_id);
        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            PipelineError::Setup(format!(
                "could not create working directory {}: {e}",
                workdir.display()
            ))
        })?;

        self.record(writer, format!("Cloning {} ({})\n", job.repository, job.branch));
        let clone = CommandSpec::new(
            &workdir,
            git::clone_command(&job.repository, &job.branch),
            self.settings.clone_timeout,
        )
        .with_env(&self.settings.env);
        self.run_step("clone", &clone, writer).await?;

        let (branch, commit) = self.resolve_head(&workdir, writer).await?;
        let checked_out = format!(
            "Checked out {branch} at {} {}\n",
            commit.short_hash(),
            commit.message
        );

        self.store
            .update(
                build_id,
                Box::new(move |build| {
                    build.commit = Some(commit);
                    build.transition(BuildStatus::Running)
                }),
            )
            .await?;
        self.record(writer, checked_out);
        self.flush(writer).await;

        let descriptor = self.find_descriptor(&workdir).await.ok_or_else(|| {
            PipelineError::Setup(format!(
                "no project descriptor found (expected one of: {})",
                self.settings.descriptor_files.join(", ")
            ))
        })?;
        self.record(writer, format!("Found {descriptor}\n"));

        let install = &self.settings.install;
        self.record(writer, format!("Installing dependencies: {}\n", install.command));
        self.run_step("install", &self.step_spec(&workdir, install), writer)
            .await?;

        let test = &self.settings.test;
        self.record(writer, format!("Running tests: {}\n", test.command));
        let transcript = Mutex::new(String::new());
        let started = Instant::now();
        let outcome = self
            .run_command(&self.step_spec(&workdir, test), writer, Some(&transcript))
            .await;
        let duration = started.elapsed();
        self.flush(writer).await;

        let transcript = transcript.into_inner().unwrap_or_else(PoisonError::into_inner);
        let (status, conclusion) = conclude_tests(&outcome, test.timeout, &transcript);
        Ok(TestResult {
            status,
            conclusion,
            duration,
        })
    }

    async fn complete(
        &self,
        build_id: BuildId,
        writer: &OutputWriter,
        result: TestResult,
    ) -> BuildStatus {
        let TestResult {
            status,
            conclusion,
            duration,
        } = result;

        self.record(writer, format!("Build {status}: {conclusion}\n"));
        if let Err(e) = writer.finish().await {
            error!(build_id = %build_id, error = %e, "Failed to persist final output");
        }

        let persisted = with_retry("terminal status write", || {
            let conclusion = conclusion.clone();
            self.store.update(
                build_id,
                Box::new(move |build| build.finish(status, conclusion, Some(duration))),
            )
        })
        .await;

        match persisted {
            Ok(build) => {
                self.broadcaster.publish(BuildEvent::BuildComplete {
                    build: build.clone(),
                });
                self.notify(&build).await;
                status
            }
            Err(e) => {
                error!(build_id = %build_id, error = %e, "Failed to persist terminal status");
                self.broadcaster.publish(BuildEvent::BuildError {
                    build_id,
                    reason: format!("could not persist {status} result: {e}"),
                });
                BuildStatus::Error
            }
        }
    }

    async fn fail(&self, build_id: BuildId, writer: &OutputWriter, err: PipelineError) -> BuildStatus {
        let reason = err.to_string();
        error!(build_id = %build_id, error = %reason, "Build errored");

        self.record(writer, format!("Error: {reason}\n"));
        if let Err(e) = writer.finish().await {
            error!(build_id = %build_id, error = %e, "Failed to persist final output");
        }

        let persisted = with_retry("terminal status write", || {
            self.store.update(
                build_id,
                Box::new(|build| build.finish(BuildStatus::Error, ERROR_CONCLUSION, None)),
            )
        })
        .await;

        self.broadcaster.publish(BuildEvent::BuildError { build_id, reason });

        match persisted {
            Ok(build) => self.notify(&build).await,
            Err(e) => error!(build_id = %build_id, error = %e, "Failed to persist error status"),
        }
        BuildStatus::Error
    }

    async fn notify(&self, build: &BuildRecord) {
        if !self.settings.notify_policy.should_notify(build.status) {
            return;
        }
        if let Err(e) = self
            .notifier
            .notify(build, &self.settings.recipients)
            .await
        {
            warn!(build_id = %build.id, error = %e, "Notification failed");
        }
    }

    async fn resolve_head(
        &self,
        workdir: &Path,
        writer: &OutputWriter,
    ) -> Result<(String, CommitInfo), PipelineError> {
        let spec = CommandSpec::new(workdir, git::HEAD_QUERY, self.settings.clone_timeout);
        let stdout = Mutex::new(String::new());
        let outcome = self
            .supervisor
            .run(&spec, &|chunk: OutputChunk| match chunk.stream {
                LogStream::Stdout => stdout
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_str(&chunk.content),
                _ => self.record(writer, chunk.content),
            })
            .await;
        if !outcome.is_success() {
            return Err(PipelineError::Step {
                step: "commit lookup",
                outcome,
            });
        }

        let stdout = stdout.into_inner().unwrap_or_else(PoisonError::into_inner);
        git::parse_head(&stdout)
            .ok_or_else(|| PipelineError::Setup("could not read the checked-out commit".to_string()))
    }

    async fn find_descriptor(&self, workdir: &Path) -> Option<String> {
        for name in &self.settings.descriptor_files {
            if tokio::fs::try_exists(workdir.join(name)).await.unwrap_or(false) {
                return Some(name.clone());
            }
        }
        None
    }

    fn step_spec(&self, workdir: &Path, step: &StepConfig) -> CommandSpec {
        CommandSpec::new(workdir, step.command.clone(), step.timeout).with_env(&self.settings.env)
    }

    async fn run_step(
        &self,
        step: &'static str,
        spec: &CommandSpec,
        writer: &OutputWriter,
    ) -> Result<(), PipelineError> {
        let outcome = self.run_command(spec, writer, None).await;
        self.flush(writer).await;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(PipelineError::Step { step, outcome })
        }
    }

    async fn run_command(
        &self,
        spec: &CommandSpec,
        writer: &OutputWriter,
        transcript: Option<&Mutex<String>>,
    ) -> ExitOutcome {
        self.supervisor
            .run(spec, &|chunk: OutputChunk| {
                if let Some(transcript) = transcript {
                    transcript
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_str(&chunk.content);
                }
                self.record(writer, chunk.content);
            })
            .await
    }

    /// Buffer output for persistence and forward it live.
    fn record(&self, writer: &OutputWriter, text: String) {
        writer.push(&text);
        self.broadcaster.publish(BuildEvent::BuildUpdate {
            build_id: writer.build_id(),
            output: text,
        });
    }

    async fn flush(&self, writer: &OutputWriter) {
        if let Err(e) = writer.flush().await {
            warn!(build_id = %writer.build_id(), error = %e, "Output flush failed, will retry");
        }
    }
}

fn conclude_tests(outcome: &ExitOutcome, timeout: Duration, transcript: &str) -> (BuildStatus, String) {
    match outcome {
        ExitOutcome::Success => (BuildStatus::Success, "All tests passed".to_string()),
        ExitOutcome::Timeout => (
            BuildStatus::Failure,
            format!("Tests timed out after {}s", timeout.as_secs()),
        ),
        ExitOutcome::NonZeroExit(_) if NO_TESTS.is_match(transcript) => {
            (BuildStatus::Failure, "No tests found".to_string())
        }
        ExitOutcome::NonZeroExit(code) if *code >= 0 => (
            BuildStatus::Failure,
            format!("Tests failed (exit code {code})"),
        ),
        other => (BuildStatus::Failure, format!("Tests failed ({other})")),
    }
}
