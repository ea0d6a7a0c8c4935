use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::ApiResource;
use kube::discovery::{self, Scope};
use kube::{Client, Config};
use tracing::{debug, info};

use super::{ClusterApi, ClusterError};
use crate::resource::Gvk;

/// [`ClusterApi`] backed by a kube client with discovery-based GVK lookup
pub struct KubeCluster {
    client: Client,
    resolved: Mutex<HashMap<Gvk, (ApiResource, Scope)>>,
}

impl KubeCluster {
    /// Connect using an explicit kubeconfig file, or the usual inference
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster) when `None`.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::ClientError(format!("{}: {e}", path.display())))?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::ClientError(format!("{}: {e}", path.display())))?;
                Client::try_from(config).map_err(|e| ClusterError::ClientError(e.to_string()))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| ClusterError::ClientError(e.to_string()))?,
        };

        info!(kubeconfig = ?kubeconfig, "Connected to cluster");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, gvk: &Gvk) -> Result<(ApiResource, Scope), ClusterError> {
        let cached = self.cache().get(gvk).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk.to_kube())
            .await
            .map_err(|e| ClusterError::DiscoveryError(format!("{gvk}: {e}")))?;

        debug!(gvk = %gvk, plural = %resource.plural, "Resolved API resource");
        let entry = (resource, capabilities.scope);
        self.cache().insert(gvk.clone(), entry.clone());
        Ok(entry)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<Gvk, (ApiResource, Scope)>> {
        self.resolved.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn api(&self, gvk: &Gvk, namespace: Option<&str>) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, scope) = self.resolve(gvk).await?;
        Ok(match (scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &resource),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        })
    }

    async fn is_cluster_scoped(&self, gvk: &Gvk) -> Result<bool, ClusterError> {
        Ok(matches!(self.resolve(gvk).await?.1, Scope::Cluster))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create(&self, gvk: &Gvk, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let mut object = object.clone();
        if self.is_cluster_scoped(gvk).await? {
            object.metadata.namespace = None;
        }
        let namespace = object.metadata.namespace.clone();
        let name = display_name(&object);

        let api = self.api(gvk, namespace.as_deref()).await?;
        let created = api
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| ClusterError::CreateError(improve_error_message(&e, &gvk.kind, &name)))?;

        info!(
            namespace = ?created.metadata.namespace,
            name = ?created.metadata.name,
            kind = %gvk.kind,
            "Created resource"
        );
        Ok(created)
    }

    async fn get(
        &self,
        gvk: &Gvk,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<DynamicObject, ClusterError> {
        let api = self.api(gvk, namespace).await?;
        api.get(name)
            .await
            .map_err(|e| ClusterError::GetError(improve_error_message(&e, &gvk.kind, name)))
    }

    async fn delete(&self, gvk: &Gvk, name: &str, namespace: Option<&str>) -> Result<(), ClusterError> {
        let api = self.api(gvk, namespace).await?;
        api.delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| ClusterError::DeleteError(improve_error_message(&e, &gvk.kind, name)))?;

        info!(namespace = ?namespace, name = %name, kind = %gvk.kind, "Deleted resource");
        Ok(())
    }

    async fn create_service_account_token(
        &self,
        name: &str,
        namespace: &str,
        audiences: &[String],
    ) -> Result<String, ClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                ..Default::default()
            },
            ..Default::default()
        };

        let response = api
            .create_token_request(name, &PostParams::default(), &request)
            .await
            .map_err(|e| ClusterError::TokenError(improve_error_message(&e, "ServiceAccount", name)))?;

        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| ClusterError::TokenError(format!("no token returned for ServiceAccount '{name}'")))
    }
}

fn display_name(object: &DynamicObject) -> String {
    match (&object.metadata.name, &object.metadata.generate_name) {
        (Some(name), _) => name.clone(),
        (None, Some(prefix)) => format!("{prefix}*"),
        (None, None) => "<unnamed>".to_string(),
    }
}

/// Rewrite common API failures into short, readable messages
fn improve_error_message(err: &kube::Error, resource_kind: &str, resource_name: &str) -> String {
    let raw = err.to_string();

    if let kube::Error::Api(response) = err {
        match response.code {
            404 => return format!("{resource_kind} '{resource_name}' not found"),
            409 => return format!("{resource_kind} '{resource_name}' already exists"),
            403 => {
                return format!("{resource_kind} '{resource_name}': permission denied (check RBAC)")
            }
            422 => {
                return format!(
                    "{resource_kind} '{resource_name}' is invalid: {}",
                    response.message
                )
            }
            _ => {}
        }
    }

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{resource_kind} '{resource_name}': operation timed out");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}
