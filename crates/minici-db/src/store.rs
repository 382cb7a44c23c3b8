//! The build store seam.

use async_trait::async_trait;
use minici_core::{BuildId, BuildRecord, TriggerSource};

use crate::DbResult;

/// A change applied to a fresh copy of a stored build.
///
/// Returning an error leaves the stored record untouched.
pub type BuildMutator = Box<dyn FnOnce(&mut BuildRecord) -> minici_core::Result<()> + Send>;

/// Durable build records.
///
/// `update` is a read-modify-write on a single record and must not lose
/// concurrent `append_output` calls: implementations never write the
/// `output` column from `update`.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Create a `pending` record with a fresh id.
    async fn create(
        &self,
        repository: &str,
        branch: &str,
        trigger: TriggerSource,
    ) -> DbResult<BuildRecord>;

    async fn get(&self, id: BuildId) -> DbResult<BuildRecord>;

    /// Apply `mutator` to the current record and persist everything but
    /// `output`. Refreshes `updated_at`.
    async fn update(&self, id: BuildId, mutator: BuildMutator) -> DbResult<BuildRecord>;

    /// Atomically append to the record's output.
    async fn append_output(&self, id: BuildId, chunk: &str) -> DbResult<()>;

    /// Most recent builds first.
    async fn list_recent(&self, limit: usize) -> DbResult<Vec<BuildRecord>>;
}
