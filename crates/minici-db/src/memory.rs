//! In-process build store.

use async_trait::async_trait;
use chrono::Utc;
use minici_core::{BuildId, BuildRecord, TriggerSource};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{BuildMutator, BuildStore, DbError, DbResult};

/// Keeps builds in a map for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryBuildStore {
    builds: RwLock<HashMap<BuildId, BuildRecord>>,
}

impl InMemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStore for InMemoryBuildStore {
    async fn create(
        &self,
        repository: &str,
        branch: &str,
        trigger: TriggerSource,
    ) -> DbResult<BuildRecord> {
        let record = BuildRecord::new(repository, branch, trigger);
        self.builds.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildRecord> {
        self.builds
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {id}")))
    }

    async fn update(&self, id: BuildId, mutator: BuildMutator) -> DbResult<BuildRecord> {
        let mut builds = self.builds.write().await;
        let stored = builds
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {id}")))?;

        let mut next = stored.clone();
        mutator(&mut next)?;
        next.id = stored.id;
        next.output = std::mem::take(&mut stored.output);
        next.created_at = stored.created_at;
        next.updated_at = Utc::now();
        *stored = next;
        Ok(stored.clone())
    }

    async fn append_output(&self, id: BuildId, chunk: &str) -> DbResult<()> {
        let mut builds = self.builds.write().await;
        let stored = builds
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {id}")))?;
        stored.output.push_str(chunk);
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> DbResult<Vec<BuildRecord>> {
        let builds = self.builds.read().await;
        let mut records: Vec<BuildRecord> = builds.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minici_core::{BuildStatus, CommitInfo};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryBuildStore::new();
        let build = store
            .create("https://example.com/org/repo.git", "main", TriggerSource::Manual)
            .await
            .unwrap();
        assert_eq!(build.status, BuildStatus::Pending);

        let fetched = store.get(build.id).await.unwrap();
        assert_eq!(fetched, build);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = InMemoryBuildStore::new();
        let err = store.get(BuildId::new()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_applies_mutator() {
        let store = InMemoryBuildStore::new();
        let build = store.create("repo", "main", TriggerSource::Manual).await.unwrap();

        let updated = store
            .update(
                build.id,
                Box::new(|b| {
                    b.commit = Some(CommitInfo {
                        hash: "abc".into(),
                        message: "msg".into(),
                        author_name: "me".into(),
                    });
                    b.transition(BuildStatus::Running)
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, BuildStatus::Running);
        assert!(updated.commit.is_some());
        assert!(updated.updated_at >= build.updated_at);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_record_untouched() {
        let store = InMemoryBuildStore::new();
        let build = store.create("repo", "main", TriggerSource::Manual).await.unwrap();

        let err = store
            .update(build.id, Box::new(|b| b.transition(BuildStatus::Success)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rejected(_)));
        assert_eq!(store.get(build.id).await.unwrap().status, BuildStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_never_writes_output() {
        let store = InMemoryBuildStore::new();
        let build = store.create("repo", "main", TriggerSource::Manual).await.unwrap();
        store.append_output(build.id, "kept\n").await.unwrap();

        store
            .update(
                build.id,
                Box::new(|b| {
                    b.output = "clobbered".into();
                    b.transition(BuildStatus::Running)
                }),
            )
            .await
            .unwrap();
        assert_eq!(store.get(build.id).await.unwrap().output, "kept\n");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryBuildStore::new());
        let build = store.create("repo", "main", TriggerSource::Manual).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_output(build.id, &format!("line {i}\n")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let output = store.get(build.id).await.unwrap().output;
        assert_eq!(output.lines().count(), 20);
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = InMemoryBuildStore::new();
        let first = store.create("a", "main", TriggerSource::Manual).await.unwrap();
        let second = store.create("b", "main", TriggerSource::Manual).await.unwrap();
        let third = store.create("c", "main", TriggerSource::Manual).await.unwrap();

        let recent = store.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, third.id);
        assert_eq!(recent[1].id, second.id);
        assert!(!recent.iter().any(|b| b.id == first.id));
    }
}
