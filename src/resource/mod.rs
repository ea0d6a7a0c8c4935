//! Resource handles
//!
//! A [`Resource`] wraps one cluster object of any kind and exposes the
//! operations every kind shares: create, delete and status refresh.
//! Kind-specific behavior lives on the typed views in [`typed`], which are
//! obtained from a `Resource` with a fallible `TryFrom` conversion.

pub mod typed;
mod types;

pub use typed::{Job, Namespace, Pod, ServiceAccount};
pub use types::{Gvk, ResourceInformation};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;

use crate::cluster::{ClusterApi, ClusterError};
use crate::wait::{Refreshable, WaitTimerError};

/// Errors from resource handles
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid resource definition ({info}): {message}")]
    InvalidDefinition {
        info: ResourceInformation,
        message: String,
    },

    #[error("{info} is not a {expected}")]
    WrongKind {
        info: ResourceInformation,
        expected: String,
    },

    #[error("failed to decode {info}: {message}")]
    Decode {
        info: ResourceInformation,
        message: String,
    },

    #[error("failed to create {info}: {source}")]
    Create {
        info: ResourceInformation,
        source: ClusterError,
    },

    #[error("failed to delete {info}: {source}")]
    Delete {
        info: ResourceInformation,
        source: ClusterError,
    },

    #[error("failed to refresh {info}: {source}")]
    Refresh {
        info: ResourceInformation,
        source: ClusterError,
    },

    #[error(transparent)]
    Wait(#[from] WaitTimerError),

    #[error("[{0}] Pods for the Job failed")]
    JobFailed(i32),

    #[error("failed to mint token for {info}: {source}")]
    Token {
        info: ResourceInformation,
        source: ClusterError,
    },
}

impl ResourceError {
    /// Identity of the resource the error concerns, when known
    pub fn information(&self) -> Option<&ResourceInformation> {
        match self {
            Self::InvalidDefinition { info, .. }
            | Self::WrongKind { info, .. }
            | Self::Decode { info, .. }
            | Self::Create { info, .. }
            | Self::Delete { info, .. }
            | Self::Refresh { info, .. }
            | Self::Token { info, .. } => Some(info),
            Self::Wait(_) | Self::JobFailed(_) => None,
        }
    }
}

/// Deletes one tracked resource. Returned by [`Resource::deleter`].
pub type Deleter = Box<dyn Fn() -> BoxFuture<'static, Result<(), ResourceError>> + Send + Sync>;

/// Handle on a single cluster object of any kind
#[derive(Clone)]
pub struct Resource {
    gvk: Gvk,
    object: DynamicObject,
    cluster: Arc<dyn ClusterApi>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("gvk", &self.gvk)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// Build a handle from a decoded document. `apiVersion`, `kind` and one
    /// of `metadata.name` / `metadata.generateName` are required.
    pub fn from_document(
        document: serde_json::Value,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ResourceError> {
        let info = partial_information(&document);
        let invalid = |message: &str| ResourceError::InvalidDefinition {
            info: info.clone(),
            message: message.to_string(),
        };

        let map = document
            .as_object()
            .ok_or_else(|| invalid("document is not a mapping"))?;
        let api_version = map
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("apiVersion is required"))?;
        let kind = map
            .get("kind")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("kind is required"))?;
        let gvk = Gvk::from_api_version(api_version, kind);

        let object: DynamicObject = serde_json::from_value(document.clone())
            .map_err(|e| invalid(&e.to_string()))?;

        let named = object.metadata.name.as_deref().is_some_and(|n| !n.is_empty())
            || object
                .metadata
                .generate_name
                .as_deref()
                .is_some_and(|n| !n.is_empty());
        if !named {
            return Err(invalid("metadata.name or metadata.generateName is required"));
        }

        Ok(Self {
            gvk,
            object,
            cluster,
        })
    }

    /// Handle on an object that already exists, identified by kind, name and
    /// namespace (`None` for cluster-scoped kinds). Nothing is fetched.
    pub fn reference(
        gvk: &Gvk,
        name: &str,
        namespace: Option<&str>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, ResourceError> {
        let mut metadata = serde_json::json!({ "name": name });
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            metadata["namespace"] = namespace.into();
        }
        Self::from_document(
            serde_json::json!({
                "apiVersion": gvk.api_version(),
                "kind": gvk.kind,
                "metadata": metadata,
            }),
            cluster,
        )
    }

    pub fn gvk(&self) -> &Gvk {
        &self.gvk
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    /// Server-assigned name after creation; the `generateName` prefix before
    pub fn name(&self) -> &str {
        self.object
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.object.metadata.generate_name.as_deref())
            .unwrap_or_default()
    }

    pub fn namespace_name(&self) -> Option<&str> {
        self.object
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.object.metadata.namespace = Some(namespace.into());
    }

    /// Place the resource in `namespace` unless it names one itself.
    /// Namespaces are never given a namespace.
    pub fn default_namespace_to(&mut self, namespace: &str) {
        if self.namespace_name().is_none() && !self.is_a(&Gvk::namespace()) {
            self.set_namespace(namespace);
        }
    }

    pub fn is_a(&self, gvk: &Gvk) -> bool {
        self.gvk.is_same_kind(gvk)
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    pub fn information(&self) -> ResourceInformation {
        ResourceInformation::new(
            self.kind(),
            self.name(),
            self.namespace_name().unwrap_or_default(),
        )
    }

    /// Create on the cluster; the handle then reflects the server's copy
    pub async fn create(&mut self) -> Result<(), ResourceError> {
        self.object = self
            .cluster
            .create(&self.gvk, &self.object)
            .await
            .map_err(|source| ResourceError::Create {
                info: self.information(),
                source,
            })?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), ResourceError> {
        self.cluster
            .delete(&self.gvk, self.name(), self.namespace_name())
            .await
            .map_err(|source| ResourceError::Delete {
                info: self.information(),
                source,
            })
    }

    /// Re-read the object from the cluster
    pub async fn refresh(&mut self) -> Result<(), ResourceError> {
        self.object = self
            .cluster
            .get(&self.gvk, self.name(), self.namespace_name())
            .await
            .map_err(|source| ResourceError::Refresh {
                info: self.information(),
                source,
            })?;
        Ok(())
    }

    /// Deletion closure for the tracker; it owns everything it needs
    pub fn deleter(&self) -> Deleter {
        let handle = self.clone();
        Box::new(move || {
            let handle = handle.clone();
            async move { handle.delete().await }.boxed()
        })
    }

    /// Decode into a typed `k8s-openapi` object
    pub(crate) fn decode<K: DeserializeOwned>(&self) -> Result<K, ResourceError> {
        serde_json::to_value(&self.object)
            .and_then(serde_json::from_value)
            .map_err(|e| ResourceError::Decode {
                info: self.information(),
                message: e.to_string(),
            })
    }

    pub(crate) fn expect_kind(&self, gvk: &Gvk) -> Result<(), ResourceError> {
        if self.is_a(gvk) {
            Ok(())
        } else {
            Err(ResourceError::WrongKind {
                info: self.information(),
                expected: gvk.kind.clone(),
            })
        }
    }
}

#[async_trait]
impl Refreshable for Resource {
    type Error = ResourceError;

    async fn update_status(&mut self) -> Result<(), ResourceError> {
        self.refresh().await
    }

    fn kind(&self) -> &str {
        Resource::kind(self)
    }

    fn name(&self) -> &str {
        Resource::name(self)
    }
}

/// Best-effort identity from a document that may be malformed
fn partial_information(document: &serde_json::Value) -> ResourceInformation {
    let text = |v: &serde_json::Value| v.as_str().unwrap_or_default().to_string();
    let metadata = &document["metadata"];
    let name = match metadata["name"].as_str() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => text(&metadata["generateName"]),
    };
    ResourceInformation::new(text(&document["kind"]), name, text(&metadata["namespace"]))
}
