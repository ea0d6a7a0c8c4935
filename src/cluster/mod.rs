//! Cluster capability used by resource handles
//!
//! Everything that talks to the Kubernetes API goes through [`ClusterApi`].
//! [`KubeCluster`] is the real implementation; tests use an in-memory one.

mod kubernetes;
#[cfg(test)]
pub(crate) mod memory;

pub use kubernetes::KubeCluster;

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::resource::Gvk;

/// Errors from cluster operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("No API resource found for {0}")]
    DiscoveryError(String),

    #[error("Failed to create resource: {0}")]
    CreateError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("Failed to delete resource: {0}")]
    DeleteError(String),

    #[error("Failed to request service account token: {0}")]
    TokenError(String),
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create `object` and return the server's copy (generated name,
    /// resourceVersion, status). Cluster-scoped kinds ignore the namespace.
    async fn create(&self, gvk: &Gvk, object: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    async fn get(
        &self,
        gvk: &Gvk,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete with foreground propagation
    async fn delete(&self, gvk: &Gvk, name: &str, namespace: Option<&str>) -> Result<(), ClusterError>;

    /// Mint a bound token for a service account
    async fn create_service_account_token(
        &self,
        name: &str,
        namespace: &str,
        audiences: &[String],
    ) -> Result<String, ClusterError>;
}
