use std::fmt;

use serde::Serialize;

/// `GroupVersionKind` identifies a Kubernetes resource type
///
/// The plural resource name is never guessed; the cluster layer resolves it
/// through discovery.
///
/// # Example
///
/// ```
/// use jobber::resource::Gvk;
///
/// let gvk = Gvk::from_api_version("batch/v1", "Job");
/// assert_eq!(gvk, Gvk::job());
/// assert_eq!(gvk.api_version(), "batch/v1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvk {
    /// API group ("" for core)
    pub group: String,
    /// API version (e.g. "v1")
    pub version: String,
    /// Kind name (e.g. "Pod")
    pub kind: String,
}

impl Gvk {
    #[must_use]
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` value (`v1`, `batch/v1`) into group and version
    #[must_use]
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    #[must_use]
    pub fn pod() -> Self {
        Self::new("", "v1", "Pod")
    }

    #[must_use]
    pub fn job() -> Self {
        Self::new("batch", "v1", "Job")
    }

    #[must_use]
    pub fn namespace() -> Self {
        Self::new("", "v1", "Namespace")
    }

    #[must_use]
    pub fn service_account() -> Self {
        Self::new("", "v1", "ServiceAccount")
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Same group and kind; the version is not compared
    pub fn is_same_kind(&self, other: &Gvk) -> bool {
        self.group == other.group && self.kind == other.kind
    }

    pub(crate) fn to_kube(&self) -> kube::core::GroupVersionKind {
        kube::core::GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Identity of a resource as carried in messages, events and the tracker.
/// `namespace` is empty for cluster-scoped resources; `name` may be a
/// `generateName` prefix before creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResourceInformation {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceInformation {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ResourceInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_empty() { "?" } else { &self.kind };
        let name = if self.name.is_empty() { "?" } else { &self.name };
        write!(f, "Kind [{kind}] Named [{name}]")?;
        if !self.namespace.is_empty() {
            write!(f, " in Namespace [{}]", self.namespace)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_api_version() {
        assert_eq!(Gvk::from_api_version("v1", "Pod"), Gvk::pod());
        let gvk = Gvk::from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.to_string(), "apps/v1, Kind=Deployment");
    }

    #[test]
    fn test_same_kind_ignores_version() {
        assert!(Gvk::new("batch", "v1beta1", "Job").is_same_kind(&Gvk::job()));
        assert!(!Gvk::new("example.com", "v1", "Job").is_same_kind(&Gvk::job()));
    }

    #[test]
    fn test_information_display() {
        let info = ResourceInformation::new("Pod", "server", "perf-x1");
        assert_eq!(info.to_string(), "Kind [Pod] Named [server] in Namespace [perf-x1]");
        let info = ResourceInformation::new("Namespace", "perf-x1", "");
        assert_eq!(info.to_string(), "Kind [Namespace] Named [perf-x1]");
        assert_eq!(ResourceInformation::default().to_string(), "Kind [?] Named [?]");
    }
}
