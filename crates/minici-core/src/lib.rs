//! Core domain types and traits for the minici build orchestrator.
//!
//! This crate contains:
//! - Build and job identifiers
//! - The build record and its status state machine
//! - Job descriptors handed from admission to workers
//! - Lifecycle events and the broadcaster seam
//! - The notification seam
//! - Push webhook payload parsing
//! - The process supervisor seam

pub mod build;
pub mod error;
pub mod event;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod push;

pub use build::{BuildRecord, BuildStatus, CommitInfo, TriggerSource};
pub use error::{Error, Result};
pub use id::{BuildId, JobId};
