//! Lifecycle events and the broadcaster seam.

use serde::{Deserialize, Serialize};

use crate::{BuildId, BuildRecord};

/// Event emitted while a build moves through the pipeline.
///
/// Every variant carries the build id so subscribers can demultiplex
/// concurrently running builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum BuildEvent {
    NewBuild {
        build: BuildRecord,
    },
    BuildUpdate {
        #[serde(rename = "buildId")]
        build_id: BuildId,
        output: String,
    },
    BuildComplete {
        build: BuildRecord,
    },
    BuildError {
        #[serde(rename = "buildId")]
        build_id: BuildId,
        reason: String,
    },
}

impl BuildEvent {
    pub fn build_id(&self) -> BuildId {
        match self {
            BuildEvent::NewBuild { build } | BuildEvent::BuildComplete { build } => build.id,
            BuildEvent::BuildUpdate { build_id, .. } | BuildEvent::BuildError { build_id, .. } => {
                *build_id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BuildEvent::NewBuild { .. } => "new-build",
            BuildEvent::BuildUpdate { .. } => "build-update",
            BuildEvent::BuildComplete { .. } => "build-complete",
            BuildEvent::BuildError { .. } => "build-error",
        }
    }
}

/// Fan-out of lifecycle events to live observers.
///
/// Publishing never blocks and never fails the pipeline; there is no
/// delivery guarantee for observers that are not connected.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: BuildEvent);
}

/// Broadcaster that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish(&self, _event: BuildEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TriggerSource;

    #[test]
    fn test_event_wire_names() {
        let build = BuildRecord::new("repo", "main", TriggerSource::Manual);
        let id = build.id;

        let json = serde_json::to_value(BuildEvent::NewBuild { build }).unwrap();
        assert_eq!(json["type"], "new-build");
        assert_eq!(json["data"]["build"]["id"], id.to_string());

        let json = serde_json::to_value(BuildEvent::BuildUpdate {
            build_id: id,
            output: "chunk".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "build-update");
        assert_eq!(json["data"]["buildId"], id.to_string());
        assert_eq!(json["data"]["output"], "chunk");

        let json = serde_json::to_value(BuildEvent::BuildError {
            build_id: id,
            reason: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "build-error");
    }

    #[test]
    fn test_build_id_accessor() {
        let build = BuildRecord::new("repo", "main", TriggerSource::Manual);
        let id = build.id;
        let event = BuildEvent::BuildComplete { build };
        assert_eq!(event.build_id(), id);
        assert_eq!(event.kind(), "build-complete");
    }
}
