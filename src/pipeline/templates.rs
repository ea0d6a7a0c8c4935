//! Template expansion for resource actions
//!
//! Templates are Jinja (minijinja) rendered against the serialized
//! [`Variables`] tree, so `{{ Values.Case.TPS }}` and
//! `{{ Runtime.DefaultNamespace.Name }}` are available. Referencing anything
//! undefined is an error.
//!
//! The function table is an explicit value built once and shared; there is no
//! global registry. Beyond the engine's built-in filters (`default`, `upper`,
//! `lower`, `trim`, `join`, `indent`, `tojson`, ...) it carries:
//!
//! | name | kind | |
//! |---|---|---|
//! | `quote` | filter | wrap in double quotes, escaping |
//! | `b64enc` / `b64dec` | filter | base64 |
//! | `required` | filter | fail if the value is missing or none |
//! | `pod_ip(name, namespace=None)` | function | IP of an existing Pod |
//! | `service_account_token(name, namespace=None)` | function | bound token |
//!
//! The cluster functions default `namespace` to the run's default namespace.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use minijinja::value::{from_args, Object};
use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior, Value};
use tokio::runtime::Handle;

use crate::cluster::ClusterApi;
use crate::resource::{Pod, ServiceAccount};
use crate::variables::Variables;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("template function [{0}] is already registered")]
    DuplicateFunction(String),

    #[error("failed to expand template ({name}): {message}")]
    Expansion { name: String, message: String },
}

pub struct TemplateFunctions {
    env: Environment<'static>,
    names: HashSet<String>,
}

impl Default for TemplateFunctions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names.iter().collect();
        names.sort();
        f.debug_struct("TemplateFunctions").field("names", &names).finish()
    }
}

impl TemplateFunctions {
    /// Helpers only; no cluster access
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("quote", quote);
        env.add_filter("b64enc", b64enc);
        env.add_filter("b64dec", b64dec);
        env.add_filter("required", required);

        Self {
            env,
            names: ["quote", "b64enc", "b64dec", "required"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// Helpers plus `pod_ip` and `service_account_token`.
    ///
    /// Cluster calls block on `handle`, so expansion must run off the async
    /// worker threads (e.g. under `spawn_blocking`).
    pub fn with_cluster_functions(
        cluster: Arc<dyn ClusterApi>,
        handle: Handle,
    ) -> Result<Self, TemplateError> {
        let mut functions = Self::new();
        for operation in [ClusterOperation::PodIp, ClusterOperation::ServiceAccountToken] {
            functions.register(
                operation.name(),
                Value::from_object(ClusterFunction {
                    operation,
                    cluster: cluster.clone(),
                    handle: handle.clone(),
                }),
            )?;
        }
        Ok(functions)
    }

    /// Add a callable (see [`Value::from_function`]) under `name`
    pub fn register(&mut self, name: &str, function: Value) -> Result<(), TemplateError> {
        if !self.names.insert(name.to_string()) {
            return Err(TemplateError::DuplicateFunction(name.to_string()));
        }
        self.env.add_global(name.to_string(), function);
        Ok(())
    }

    pub fn expand(
        &self,
        name: &str,
        source: &str,
        variables: &Variables,
    ) -> Result<String, TemplateError> {
        self.env
            .render_named_str(name, source, variables.to_json())
            .map_err(|e| TemplateError::Expansion {
                name: name.to_string(),
                message: format!("{e:#}"),
            })
    }
}

fn quote(value: Value) -> String {
    let text = value
        .as_str()
        .map(str::to_owned)
        .unwrap_or_else(|| value.to_string());
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn b64enc(value: Value) -> String {
    let text = value
        .as_str()
        .map(str::to_owned)
        .unwrap_or_else(|| value.to_string());
    base64::engine::general_purpose::STANDARD.encode(text)
}

fn b64dec(value: String) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("b64dec: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("b64dec: {e}")))
}

fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy)]
enum ClusterOperation {
    PodIp,
    ServiceAccountToken,
}

impl ClusterOperation {
    fn name(self) -> &'static str {
        match self {
            Self::PodIp => "pod_ip",
            Self::ServiceAccountToken => "service_account_token",
        }
    }
}

struct ClusterFunction {
    operation: ClusterOperation,
    cluster: Arc<dyn ClusterApi>,
    handle: Handle,
}

impl fmt::Debug for ClusterFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation.name())
    }
}

impl Object for ClusterFunction {
    fn call(self: &Arc<Self>, state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let (name, namespace): (String, Option<String>) = from_args(args)?;
        let namespace = match namespace {
            Some(ns) => ns,
            None => default_namespace(state)?,
        };
        let fail = |e: &dyn fmt::Display| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("{}({name}, {namespace}): {e}", self.operation.name()),
            )
        };

        let cluster = self.cluster.clone();
        match self.operation {
            ClusterOperation::PodIp => {
                let pod = self
                    .handle
                    .block_on(Pod::fetch(cluster, &name, &namespace))
                    .map_err(|e| fail(&e))?;
                let ip = pod.ip().ok_or_else(|| fail(&"pod has no IP yet"))?;
                Ok(Value::from(ip))
            }
            ClusterOperation::ServiceAccountToken => {
                let account =
                    ServiceAccount::reference(&name, &namespace, cluster).map_err(|e| fail(&e))?;
                let token = self
                    .handle
                    .block_on(account.bound_token())
                    .map_err(|e| fail(&e))?;
                Ok(Value::from(token))
            }
        }
    }
}

fn default_namespace(state: &State<'_, '_>) -> Result<String, Error> {
    state
        .lookup("Runtime")
        .and_then(|runtime| runtime.get_attr("DefaultNamespace").ok())
        .and_then(|ns| ns.get_attr("Name").ok())
        .and_then(|name| name.as_str().map(str::to_owned))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "no default namespace is set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryCluster;
    use crate::config::tests::sample;
    use crate::resource::Resource;
    use serde_json::json;

    fn variables() -> Variables {
        let config = sample();
        Variables::global(&config)
            .rescoped_to_unit("Baseline", &config.test.units[0].values)
            .rescoped_to_case("100TPS", &config.test.cases[0].values)
            .with_default_namespace("perf-00001")
    }

    #[test]
    fn test_expand_values_and_helpers() {
        let functions = TemplateFunctions::new();
        let source = "tps: {{ Values.Case.TPS }}\n\
                      ns: {{ Runtime.DefaultNamespace.Name | quote }}\n\
                      image: {{ Values.Global.ImageVersions.Server | b64enc | b64dec }}\n\
                      {% if Values.Unit.Sidecar.Use %}sidecar: true{% else %}sidecar: false{% endif %}\n";

        let text = functions.expand("resources/a.yaml", source, &variables()).unwrap();

        assert_eq!(
            text,
            "tps: 100\nns: \"perf-00001\"\nimage: 1.2.0\nsidecar: false\n"
        );
    }

    #[test]
    fn test_undefined_is_an_error() {
        let functions = TemplateFunctions::new();
        let err = functions
            .expand("resources/a.yaml", "{{ Values.Case.Missing.Deeper }}", &variables())
            .unwrap_err();
        let TemplateError::Expansion { name, .. } = err else {
            unreachable!()
        };
        assert_eq!(name, "resources/a.yaml");

        let err = functions
            .expand("resources/b.yaml", "{{ Values.Case.Nope | default(none) | required('need Nope') }}", &variables())
            .unwrap_err();
        assert!(err.to_string().contains("need Nope"), "{err}");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut functions = TemplateFunctions::new();
        functions
            .register("answer", Value::from_function(|| 42))
            .unwrap();
        assert_eq!(
            functions.register("answer", Value::from_function(|| 43)),
            Err(TemplateError::DuplicateFunction("answer".into()))
        );
        assert!(functions.register("quote", Value::from(1)).is_err());

        let text = functions.expand("t", "{{ answer() }}", &variables()).unwrap();
        assert_eq!(text, "42");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cluster_functions() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut pod = Resource::from_document(
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "server", "namespace": "perf-00001" },
                "spec": { "containers": [ { "name": "main", "image": "nginx" } ] }
            }),
            cluster.clone(),
        )
        .unwrap();
        pod.create().await.unwrap();

        let functions = Arc::new(
            TemplateFunctions::with_cluster_functions(cluster, Handle::current()).unwrap(),
        );
        let vars = variables();
        let text = tokio::task::spawn_blocking(move || {
            functions.expand(
                "resources/client.yaml",
                "ip: {{ pod_ip('server') }}\ntoken: {{ service_account_token('default', 'other') }}",
                &vars,
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            text,
            "ip: 10.0.0.7\ntoken: token:other/default:api,https://kubernetes.default.svc"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pod_ip_missing_pod() {
        let cluster = Arc::new(MemoryCluster::new());
        let functions =
            TemplateFunctions::with_cluster_functions(cluster, Handle::current()).unwrap();
        let vars = variables();

        let err = tokio::task::spawn_blocking(move || {
            functions.expand("resources/client.yaml", "{{ pod_ip('ghost') }}", &vars)
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(err.to_string().contains("pod_ip(ghost, perf-00001)"), "{err}");
    }
}
