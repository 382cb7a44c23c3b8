//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use minici_core::notify::NotifyPolicy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// System-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub server: ServerConfig,
    /// Root under which per-build working directories are created.
    pub workspace_dir: PathBuf,
    /// Branch used when a trigger does not name one.
    pub default_branch: String,
    /// PostgreSQL URL. Builds are kept in memory when absent.
    pub database_url: Option<String>,
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub clone_timeout: Duration,
    pub install: StepConfig,
    pub test: StepConfig,
    /// A build is only installable if one of these exists at the checkout root.
    pub descriptor_files: Vec<String>,
    /// Minimum interval between output persistence writes.
    pub flush_interval: Duration,
    /// Variables layered over the inherited environment of every step.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig {
    pub command: String,
    pub timeout: Duration,
}

/// How admitted jobs reach a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Run each job immediately on its own task.
    Direct,
    /// FIFO queue drained by a bounded worker pool.
    Queued,
}

impl std::str::FromStr for AdmissionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "direct" => Ok(AdmissionMode::Direct),
            "queued" => Ok(AdmissionMode::Queued),
            other => Err(ConfigError::InvalidValue {
                field: "queue mode".to_string(),
                message: format!("expected \"direct\" or \"queued\", got \"{other}\""),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub mode: AdmissionMode,
    pub workers: usize,
}

#[derive(Clone, PartialEq, Default)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Webhooks are rejected while unset.
    pub secret: Option<String>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationConfig {
    pub policy: NotifyPolicy,
    pub recipients: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "test".to_string());

        Self {
            server: ServerConfig {
                bind: "0.0.0.0:3000".to_string(),
            },
            workspace_dir: std::env::temp_dir().join("minici-workspaces"),
            default_branch: "main".to_string(),
            database_url: None,
            pipeline: PipelineConfig {
                clone_timeout: Duration::from_secs(120),
                install: StepConfig {
                    command: "npm install".to_string(),
                    timeout: Duration::from_secs(180),
                },
                test: StepConfig {
                    command: "npm test".to_string(),
                    timeout: Duration::from_secs(120),
                },
                descriptor_files: vec!["package.json".to_string()],
                flush_interval: Duration::from_millis(1500),
                env,
            },
            queue: QueueConfig {
                mode: AdmissionMode::Queued,
                workers: 2,
            },
            webhook: WebhookConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Load from a KDL file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        let mut config = parse_system_config(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(bind) = var("MINICI_BIND") {
            self.server.bind = bind;
        } else if let Some(port) = var("PORT") {
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                message: format!("not a port number: {port}"),
            })?;
            self.server.bind = format!("0.0.0.0:{port}");
        }
        if let Some(dir) = var("MINICI_WORKSPACE") {
            self.workspace_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(workers) = var("MINICI_WORKERS") {
            self.queue.workers = workers.parse().map_err(|_| ConfigError::InvalidValue {
                field: "MINICI_WORKERS".to_string(),
                message: format!("not a number: {workers}"),
            })?;
        }
        if let Some(secret) = var("GITHUB_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(recipients) = var("MINICI_NOTIFY") {
            self.notifications.recipients = recipients
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue.workers == 0 {
            return Err(invalid("queue workers", "must be at least 1"));
        }
        for (field, timeout) in [
            ("clone-timeout", self.pipeline.clone_timeout),
            ("install timeout", self.pipeline.install.timeout),
            ("test timeout", self.pipeline.test.timeout),
            ("flush-interval-ms", self.pipeline.flush_interval),
        ] {
            if timeout.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.pipeline.install.command.trim().is_empty() {
            return Err(ConfigError::MissingField("install command".to_string()));
        }
        if self.pipeline.test.command.trim().is_empty() {
            return Err(ConfigError::MissingField("test command".to_string()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(ConfigError::MissingField("default-branch".to_string()));
        }
        Ok(())
    }
}

/// Parse system configuration from KDL text.
///
/// Anything not mentioned keeps its default; unknown nodes are ignored.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                for child in child_nodes(node) {
                    if child.name().value() == "bind" {
                        config.server.bind = required_string(child, "server bind")?;
                    }
                }
            }
            "workspace" => {
                config.workspace_dir = PathBuf::from(required_string(node, "workspace")?);
            }
            "default-branch" => {
                config.default_branch = required_string(node, "default-branch")?;
            }
            "database" => {
                config.database_url = Some(required_string(node, "database")?);
            }
            "pipeline" => parse_pipeline(node, &mut config.pipeline)?,
            "queue" => parse_queue(node, &mut config.queue)?,
            "webhook" => {
                for child in child_nodes(node) {
                    if child.name().value() == "secret" {
                        config.webhook.secret = Some(required_string(child, "webhook secret")?);
                    }
                }
            }
            "notifications" => parse_notifications(node, &mut config.notifications)?,
            _ => {}
        }
    }

    config.validate()?;
    Ok(config)
}

fn parse_pipeline(node: &KdlNode, pipeline: &mut PipelineConfig) -> ConfigResult<()> {
    let mut descriptors = Vec::new();

    for child in child_nodes(node) {
        match child.name().value() {
            "clone-timeout" => {
                pipeline.clone_timeout = seconds(child, "clone-timeout")?;
            }
            "install" => parse_step(child, "install", &mut pipeline.install)?,
            "test" => parse_step(child, "test", &mut pipeline.test)?,
            "descriptor" => descriptors.extend(get_all_string_args(child)),
            "flush-interval-ms" => {
                let ms = required_integer(child, "flush-interval-ms")?;
                pipeline.flush_interval = Duration::from_millis(non_negative(ms, "flush-interval-ms")?);
            }
            "env" => {
                for var in child_nodes(child) {
                    if let Some(value) = get_first_string_arg(var) {
                        pipeline.env.insert(var.name().value().to_string(), value);
                    }
                }
            }
            _ => {}
        }
    }

    if !descriptors.is_empty() {
        pipeline.descriptor_files = descriptors;
    }
    Ok(())
}

fn parse_step(node: &KdlNode, name: &str, step: &mut StepConfig) -> ConfigResult<()> {
    step.command = required_string(node, &format!("{name} command"))?;
    if let Some(timeout) = node.get("timeout") {
        let secs = timeout.as_integer().ok_or_else(|| {
            invalid(&format!("{name} timeout"), "expected an integer number of seconds")
        })?;
        step.timeout = Duration::from_secs(non_negative(secs, &format!("{name} timeout"))?);
    }
    Ok(())
}

fn parse_queue(node: &KdlNode, queue: &mut QueueConfig) -> ConfigResult<()> {
    for child in child_nodes(node) {
        match child.name().value() {
            "mode" => {
                queue.mode = required_string(child, "queue mode")?.parse()?;
            }
            "workers" => {
                let workers = required_integer(child, "queue workers")?;
                queue.workers = non_negative(workers, "queue workers")? as usize;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_notifications(node: &KdlNode, notifications: &mut NotificationConfig) -> ConfigResult<()> {
    for child in child_nodes(node) {
        match child.name().value() {
            "policy" => {
                let policy = required_string(child, "notifications policy")?;
                notifications.policy = policy
                    .parse()
                    .map_err(|e: minici_core::Error| invalid("notifications policy", &e.to_string()))?;
            }
            "recipient" => notifications.recipients.extend(get_all_string_args(child)),
            _ => {}
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn child_nodes(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn required_integer(node: &KdlNode, field: &str) -> ConfigResult<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn seconds(node: &KdlNode, field: &str) -> ConfigResult<Duration> {
    let secs = required_integer(node, field)?;
    Ok(Duration::from_secs(non_negative(secs, field)?))
}

fn non_negative(value: i128, field: &str) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| invalid(field, "must be a non-negative integer"))
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.pipeline.install.timeout, Duration::from_secs(180));
        assert_eq!(config.pipeline.test.timeout, Duration::from_secs(120));
        assert!(config.pipeline.install.timeout > config.pipeline.test.timeout);
        assert_eq!(config.pipeline.env.get("NODE_ENV").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            server {
                bind "127.0.0.1:8080"
            }
            workspace "/var/lib/minici"
            default-branch "trunk"
            database "postgres://localhost/minici"
            pipeline {
                clone-timeout 60
                install "yarn install" timeout=240
                test "yarn test" timeout=90
                descriptor "package.json"
                descriptor "yarn.lock"
                flush-interval-ms 2000
                env {
                    NODE_ENV "ci"
                    CI "true"
                }
            }
            queue {
                mode "direct"
                workers 4
            }
            webhook {
                secret "s3cret"
            }
            notifications {
                policy "all-terminal"
                recipient "dev@example.com" "ops@example.com"
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.workspace_dir, PathBuf::from("/var/lib/minici"));
        assert_eq!(config.default_branch, "trunk");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/minici"));
        assert_eq!(config.pipeline.clone_timeout, Duration::from_secs(60));
        assert_eq!(config.pipeline.install.command, "yarn install");
        assert_eq!(config.pipeline.install.timeout, Duration::from_secs(240));
        assert_eq!(config.pipeline.test.command, "yarn test");
        assert_eq!(config.pipeline.test.timeout, Duration::from_secs(90));
        assert_eq!(config.pipeline.descriptor_files, vec!["package.json", "yarn.lock"]);
        assert_eq!(config.pipeline.flush_interval, Duration::from_millis(2000));
        assert_eq!(config.pipeline.env.get("NODE_ENV").map(String::as_str), Some("ci"));
        assert_eq!(config.pipeline.env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(config.queue.mode, AdmissionMode::Direct);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.webhook.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.notifications.policy, NotifyPolicy::AllTerminal);
        assert_eq!(config.notifications.recipients, vec!["dev@example.com", "ops@example.com"]);
    }

    #[test]
    fn test_invalid_queue_mode() {
        let result = parse_system_config(r#"queue { mode "sometimes"; }"#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = parse_system_config("queue { workers 0; }");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let result = parse_system_config(r#"pipeline { test "npm test" timeout=-5; }"#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_error() {
        let result = parse_system_config("server {");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SystemConfig::default();
        config
            .apply_env(|key| match key {
                "PORT" => Some("4000".to_string()),
                "MINICI_WORKERS" => Some("3".to_string()),
                "GITHUB_WEBHOOK_SECRET" => Some("from-env".to_string()),
                "MINICI_NOTIFY" => Some("a@example.com, b@example.com,".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:4000");
        assert_eq!(config.queue.workers, 3);
        assert_eq!(config.webhook.secret.as_deref(), Some("from-env"));
        assert_eq!(config.notifications.recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_bad_env_override() {
        let mut config = SystemConfig::default();
        let result = config.apply_env(|key| (key == "MINICI_WORKERS").then(|| "many".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let webhook = WebhookConfig {
            secret: Some("hunter2".to_string()),
        };
        let debug = format!("{webhook:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
