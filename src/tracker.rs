//! Ordered teardown of created resources
//!
//! Resources are deleted newest first so that dependents (a Job using a
//! PVC) go before what they depend on. A failed deletion stops the sweep and
//! stays tracked for the next attempt.

use tracing::{info, warn};

use crate::resource::{Deleter, Resource, ResourceError, ResourceInformation};

/// One created resource and the means to delete it
pub struct TrackedResource {
    pub information: ResourceInformation,
    deleter: Deleter,
}

impl TrackedResource {
    pub fn new(information: ResourceInformation, deleter: Deleter) -> Self {
        Self {
            information,
            deleter,
        }
    }
}

impl From<&Resource> for TrackedResource {
    fn from(resource: &Resource) -> Self {
        Self::new(resource.information(), resource.deleter())
    }
}

impl std::fmt::Debug for TrackedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedResource")
            .field("information", &self.information)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ResourceTracker::attempt_to_delete_all`]
#[derive(Debug, Default)]
pub struct DeletionResult {
    /// Deleted this attempt, in deletion order
    pub deleted: Vec<ResourceInformation>,
    /// The entry that failed; it is back on the tracker
    pub failed: Option<(ResourceInformation, ResourceError)>,
}

impl DeletionResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ResourceTracker {
    undeleted: Vec<TrackedResource>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, resource: TrackedResource) {
        info!(resource = %resource.information, "Tracking resource");
        self.undeleted.push(resource);
    }

    pub fn len(&self) -> usize {
        self.undeleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undeleted.is_empty()
    }

    /// Still-tracked resources, oldest first
    pub fn tracked(&self) -> impl Iterator<Item = &ResourceInformation> {
        self.undeleted.iter().map(|r| &r.information)
    }

    /// Delete from newest to oldest, stopping at the first failure
    pub async fn attempt_to_delete_all(&mut self) -> DeletionResult {
        let mut result = DeletionResult::default();

        while let Some(entry) = self.undeleted.pop() {
            match (entry.deleter)().await {
                Ok(()) => {
                    info!(resource = %entry.information, "Deleted tracked resource");
                    result.deleted.push(entry.information);
                }
                Err(e) => {
                    warn!(resource = %entry.information, error = %e, "Failed to delete tracked resource");
                    let information = entry.information.clone();
                    self.undeleted.push(entry);
                    result.failed = Some((information, e));
                    break;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    fn recording(
        name: &str,
        log: &Arc<Mutex<Vec<String>>>,
        fail: Arc<Mutex<bool>>,
    ) -> TrackedResource {
        let information = ResourceInformation::new("ConfigMap", name, "ns");
        let log = log.clone();
        let name = name.to_string();
        let deleter: Deleter = Box::new(move || {
            let log = log.clone();
            let name = name.clone();
            let fail = fail.clone();
            async move {
                log.lock().unwrap().push(name.clone());
                if *fail.lock().unwrap() {
                    Err(ResourceError::Delete {
                        info: ResourceInformation::new("ConfigMap", &name, "ns"),
                        source: ClusterError::DeleteError("rejected".into()),
                    })
                } else {
                    Ok(())
                }
            }
            .boxed()
        });
        TrackedResource::new(information, deleter)
    }

    #[tokio::test]
    async fn test_deletes_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ok = || Arc::new(Mutex::new(false));
        let mut tracker = ResourceTracker::new();
        tracker.track(recording("a", &log, ok()));
        tracker.track(recording("b", &log, ok()));
        tracker.track(recording("c", &log, ok()));

        let result = tracker.attempt_to_delete_all().await;

        assert!(result.is_complete());
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        let names: Vec<_> = result.deleted.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_failure_stays_tracked() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let b_fails = Arc::new(Mutex::new(true));
        let mut tracker = ResourceTracker::new();
        tracker.track(recording("a", &log, Arc::new(Mutex::new(false))));
        tracker.track(recording("b", &log, b_fails.clone()));
        tracker.track(recording("c", &log, Arc::new(Mutex::new(false))));

        let result = tracker.attempt_to_delete_all().await;

        assert!(!result.is_complete());
        assert_eq!(result.deleted.len(), 1);
        assert_eq!(result.deleted[0].name, "c");
        let (failed, _) = result.failed.as_ref().unwrap();
        assert_eq!(failed.name, "b");
        let remaining: Vec<_> = tracker.tracked().map(|i| i.name.as_str()).collect();
        assert_eq!(remaining, vec!["a", "b"]);

        *b_fails.lock().unwrap() = false;
        let retry = tracker.attempt_to_delete_all().await;
        assert!(retry.is_complete());
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "b", "a"]);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_tracks_real_resources() {
        use crate::cluster::memory::MemoryCluster;
        use serde_json::json;

        let cluster = Arc::new(MemoryCluster::new());
        let mut tracker = ResourceTracker::new();
        for name in ["first", "second"] {
            let mut resource = Resource::from_document(
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name, "namespace": "ns"}}),
                cluster.clone(),
            )
            .unwrap();
            resource.create().await.unwrap();
            tracker.track(TrackedResource::from(&resource));
        }

        assert!(tracker.attempt_to_delete_all().await.is_complete());
        let order: Vec<_> = cluster.deleted().into_iter().map(|i| i.name).collect();
        assert_eq!(order, vec!["second", "first"]);
        assert_eq!(cluster.live_count(), 0);
    }
}
