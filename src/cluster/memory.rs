//! In-memory [`ClusterApi`] for tests

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::json;

use super::{ClusterApi, ClusterError};
use crate::resource::{Gvk, ResourceInformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Running,
    Complete,
    Failed(i32),
}

type Key = (String, String, String);

struct State {
    objects: BTreeMap<Key, DynamicObject>,
    generated: u32,
    pod_phase: String,
    job_outcome: JobOutcome,
    failing_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
    created: Vec<ResourceInformation>,
    deleted: Vec<ResourceInformation>,
}

pub(crate) struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                generated: 0,
                pod_phase: "Running".to_string(),
                job_outcome: JobOutcome::Complete,
                failing_creates: HashSet::new(),
                failing_deletes: HashSet::new(),
                created: Vec::new(),
                deleted: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_pod_phase(&self, phase: &str) {
        self.state().pod_phase = phase.to_string();
    }

    pub(crate) fn set_job_outcome(&self, outcome: JobOutcome) {
        self.state().job_outcome = outcome;
    }

    /// Creation of any resource of `kind` fails
    pub(crate) fn fail_create_of(&self, kind: &str) {
        self.state().failing_creates.insert(kind.to_string());
    }

    /// Deletion of any resource whose name starts with `prefix` fails
    pub(crate) fn fail_delete_of(&self, prefix: &str) {
        self.state().failing_deletes.insert(prefix.to_string());
    }

    pub(crate) fn heal_deletes(&self) {
        self.state().failing_deletes.clear();
    }

    pub(crate) fn created(&self) -> Vec<ResourceInformation> {
        self.state().created.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<ResourceInformation> {
        self.state().deleted.clone()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state().objects.len()
    }
}

fn key(gvk: &Gvk, name: &str, namespace: Option<&str>) -> Key {
    (
        gvk.kind.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn with_status(state: &State, gvk: &Gvk, mut object: DynamicObject) -> DynamicObject {
    if gvk.is_same_kind(&Gvk::pod()) {
        object.data["status"] = json!({ "phase": state.pod_phase, "podIP": "10.0.0.7" });
    } else if gvk.is_same_kind(&Gvk::job()) {
        object.data["status"] = match state.job_outcome {
            JobOutcome::Running => json!({ "active": 1 }),
            JobOutcome::Complete => {
                json!({ "succeeded": 1, "completionTime": "2024-05-01T12:00:00Z" })
            }
            JobOutcome::Failed(n) => json!({ "failed": n }),
        };
    }
    object
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn create(&self, gvk: &Gvk, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let mut state = self.state();
        if state.failing_creates.contains(&gvk.kind) {
            return Err(ClusterError::CreateError(format!(
                "{} creation rejected",
                gvk.kind
            )));
        }

        let mut object = object.clone();
        if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
            state.generated += 1;
            let prefix = object.metadata.generate_name.clone().unwrap_or_default();
            object.metadata.name = Some(format!("{prefix}{:05x}", state.generated));
        }
        object.metadata.resource_version = Some("1".to_string());

        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = object.metadata.namespace.clone();
        let key = key(gvk, &name, namespace.as_deref());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::CreateError(format!(
                "{} '{name}' already exists",
                gvk.kind
            )));
        }

        state.created.push(ResourceInformation::new(
            &gvk.kind,
            &name,
            namespace.unwrap_or_default(),
        ));
        state.objects.insert(key, object.clone());
        Ok(with_status(&state, gvk, object))
    }

    async fn get(
        &self,
        gvk: &Gvk,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject, ClusterError> {
        let state = self.state();
        let object = state
            .objects
            .get(&key(gvk, name, namespace))
            .cloned()
            .ok_or_else(|| ClusterError::GetError(format!("{} '{name}' not found", gvk.kind)))?;
        Ok(with_status(&state, gvk, object))
    }

    async fn delete(&self, gvk: &Gvk, name: &str, namespace: Option<&str>) -> Result<(), ClusterError> {
        let mut state = self.state();
        if state.failing_deletes.iter().any(|p| name.starts_with(p.as_str())) {
            return Err(ClusterError::DeleteError(format!(
                "{} '{name}' deletion rejected",
                gvk.kind
            )));
        }
        state
            .objects
            .remove(&key(gvk, name, namespace))
            .ok_or_else(|| ClusterError::DeleteError(format!("{} '{name}' not found", gvk.kind)))?;
        state.deleted.push(ResourceInformation::new(
            &gvk.kind,
            name,
            namespace.unwrap_or_default(),
        ));
        Ok(())
    }

    async fn create_service_account_token(
        &self,
        name: &str,
        namespace: &str,
        audiences: &[String],
    ) -> Result<String, ClusterError> {
        Ok(format!("token:{namespace}/{name}:{}", audiences.join(",")))
    }
}
