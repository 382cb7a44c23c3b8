//! Process supervision for minici.
//!
//! Provides the local child-process supervisor and the git commands the
//! pipeline runs through it.

pub mod git;
pub mod local;

pub use local::LocalProcessSupervisor;
pub use minici_core::executor::{
    CommandSpec, ExitOutcome, LogStream, OutputChunk, Supervisor,
};
