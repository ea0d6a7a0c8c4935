//! Kind-specific views over [`Resource`]
//!
//! Each view is obtained with `TryFrom<Resource>`, which checks the kind and
//! decodes the object into its `k8s-openapi` type.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1 as batch, core::v1 as core};
use serde_json::json;

use super::{Gvk, Resource, ResourceError};
use crate::cluster::ClusterApi;
use crate::wait::{Refreshable, ResourceState, WaitTimer, WaitTimerError};

/// Probe interval while waiting for a Pod to run
pub const POD_PROBE_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on waiting for a Pod to run
pub const POD_RUNNING_TIMEOUT: Duration = Duration::from_secs(60);
/// Probe interval while waiting for a Job to finish
pub const JOB_PROBE_INTERVAL: Duration = Duration::from_secs(10);
/// Audiences requested for bound service account tokens
pub const TOKEN_AUDIENCES: [&str; 2] = ["api", "https://kubernetes.default.svc"];

pub struct Pod {
    resource: Resource,
    pod: core::Pod,
}

impl TryFrom<Resource> for Pod {
    type Error = ResourceError;

    fn try_from(resource: Resource) -> Result<Self, Self::Error> {
        resource.expect_kind(&Gvk::pod())?;
        let pod = resource.decode()?;
        Ok(Self { resource, pod })
    }
}

impl Pod {
    /// Look up an existing Pod
    pub async fn fetch(
        cluster: Arc<dyn ClusterApi>,
        name: &str,
        namespace: &str,
    ) -> Result<Self, ResourceError> {
        let mut resource = Resource::reference(&Gvk::pod(), name, Some(namespace), cluster)?;
        resource.refresh().await?;
        Self::try_from(resource)
    }

    pub fn phase(&self) -> &str {
        self.pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown")
    }

    pub fn is_running(&self) -> bool {
        self.phase() == "Running"
    }

    pub fn ip(&self) -> Option<&str> {
        self.pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.as_deref())
            .filter(|ip| !ip.is_empty())
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub async fn wait_for_running_state(&mut self, timeout: Duration) -> Result<(), ResourceError> {
        WaitTimer::new(timeout, POD_PROBE_INTERVAL)
            .test_expectation(self, |pod| Ok::<_, Infallible>(pod.is_running()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Refreshable for Pod {
    type Error = ResourceError;

    async fn update_status(&mut self) -> Result<(), ResourceError> {
        self.resource.refresh().await?;
        self.pod = self.resource.decode()?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "Pod"
    }

    fn name(&self) -> &str {
        self.resource.name()
    }

    fn state_description(&self) -> String {
        ResourceState::state_description(&self.pod)
    }
}

pub struct Job {
    resource: Resource,
    job: batch::Job,
}

impl TryFrom<Resource> for Job {
    type Error = ResourceError;

    fn try_from(resource: Resource) -> Result<Self, Self::Error> {
        resource.expect_kind(&Gvk::job())?;
        let job = resource.decode()?;
        Ok(Self { resource, job })
    }
}

impl Job {
    pub fn failed_pods(&self) -> i32 {
        self.job
            .status
            .as_ref()
            .and_then(|s| s.failed)
            .unwrap_or(0)
    }

    pub fn is_complete(&self) -> bool {
        self.job
            .status
            .as_ref()
            .is_some_and(|s| s.completion_time.is_some())
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Poll until the Job records a completion time. Any failed Pod ends the
    /// wait with [`ResourceError::JobFailed`].
    pub async fn wait_for_completion(&mut self, timeout: Duration) -> Result<(), ResourceError> {
        let outcome = WaitTimer::new(timeout, JOB_PROBE_INTERVAL)
            .test_expectation(self, |job| {
                let failed = job.failed_pods();
                if failed > 0 {
                    return Err(format!("[{failed}] Pods for the Job failed"));
                }
                Ok(job.is_complete())
            })
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(WaitTimerError::Expectation { .. }) if self.failed_pods() > 0 => {
                Err(ResourceError::JobFailed(self.failed_pods()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Refreshable for Job {
    type Error = ResourceError;

    async fn update_status(&mut self) -> Result<(), ResourceError> {
        self.resource.refresh().await?;
        self.job = self.resource.decode()?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "Job"
    }

    fn name(&self) -> &str {
        self.resource.name()
    }

    fn state_description(&self) -> String {
        ResourceState::state_description(&self.job)
    }
}

/// A namespace handle
pub struct Namespace {
    resource: Resource,
}

impl TryFrom<Resource> for Namespace {
    type Error = ResourceError;

    fn try_from(resource: Resource) -> Result<Self, Self::Error> {
        resource.expect_kind(&Gvk::namespace())?;
        Ok(Self { resource })
    }
}

impl Namespace {
    /// Namespace whose final name the server derives from `basename`
    pub fn with_generated_name(
        basename: &str,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ResourceError> {
        let resource = Resource::from_document(
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "generateName": basename },
            }),
            cluster,
        )?;
        Ok(Self { resource })
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub async fn create(&mut self) -> Result<(), ResourceError> {
        self.resource.create().await
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

pub struct ServiceAccount {
    resource: Resource,
}

impl TryFrom<Resource> for ServiceAccount {
    type Error = ResourceError;

    fn try_from(resource: Resource) -> Result<Self, Self::Error> {
        resource.expect_kind(&Gvk::service_account())?;
        Ok(Self { resource })
    }
}

impl ServiceAccount {
    /// Handle on an existing service account; nothing is fetched
    pub fn reference(
        name: &str,
        namespace: &str,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ResourceError> {
        Self::try_from(Resource::reference(
            &Gvk::service_account(),
            name,
            Some(namespace),
            cluster,
        )?)
    }

    /// Mint a token bound to this account for the in-cluster API audiences
    pub async fn bound_token(&self) -> Result<String, ResourceError> {
        let audiences: Vec<String> = TOKEN_AUDIENCES.iter().map(|a| a.to_string()).collect();
        self.resource
            .cluster()
            .create_service_account_token(
                self.resource.name(),
                self.resource.namespace_name().unwrap_or_default(),
                &audiences,
            )
            .await
            .map_err(|source| ResourceError::Token {
                info: self.resource.information(),
                source,
            })
    }
}
