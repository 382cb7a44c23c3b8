//! KDL configuration parsing for minici.
//!
//! Handles the system configuration file (`minici.kdl`), its defaults and
//! environment overrides.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    AdmissionMode, NotificationConfig, PipelineConfig, QueueConfig, ServerConfig, StepConfig,
    SystemConfig, WebhookConfig,
};
