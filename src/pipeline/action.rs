//! Pipeline actions
//!
//! An action descriptor has the form `<type>/<relative-path>`:
//!
//! | type | action |
//! |---|---|
//! | `resources` | expand a template into resource documents and create them |
//! | `values-transforms` | run a program over the variables |
//! | `executables` | run a program with the variables on stdin |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::message::{ActionMessage, MessageSink};
use super::process::{run_with_input, RunResult};
use super::templates::TemplateFunctions;
use crate::cluster::ClusterApi;
use crate::resource::typed::POD_RUNNING_TIMEOUT;
use crate::resource::{Gvk, Job, Pod, Resource, ResourceError};
use crate::variables::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    TemplatedResource,
    ValuesTransform,
    Executable,
}

impl ActionType {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TemplatedResource => "resources",
            Self::ValuesTransform => "values-transforms",
            Self::Executable => "executables",
        }
    }
}

impl FromStr for ActionType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resources" => Ok(Self::TemplatedResource),
            "values-transforms" => Ok(Self::ValuesTransform),
            "executables" => Ok(Self::Executable),
            other => Err(DescriptorError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("action descriptor is empty")]
    Empty,

    #[error("action descriptor [{0}] must be of format <type>/<target>")]
    MissingSeparator(String),

    #[error("action type [{0}] is not understood")]
    UnknownType(String),

    #[error("action descriptor [{0}] has no target path")]
    MissingPath(String),
}

/// A validated `<type>/<relative-path>` descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionDescriptor {
    pub action_type: ActionType,
    pub relative_path: String,
}

impl ActionDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        if descriptor.is_empty() {
            return Err(DescriptorError::Empty);
        }
        let (type_segment, relative_path) = descriptor
            .split_once('/')
            .ok_or_else(|| DescriptorError::MissingSeparator(descriptor.to_string()))?;
        let action_type = type_segment.parse()?;
        if relative_path.is_empty() {
            return Err(DescriptorError::MissingPath(descriptor.to_string()));
        }

        Ok(Self {
            action_type,
            relative_path: relative_path.to_string(),
        })
    }

    /// Absolute path of the target under `root`
    pub fn resolve(&self, root: &Path) -> Result<PathBuf, std::io::Error> {
        std::path::absolute(root.join(self.action_type.prefix()).join(&self.relative_path))
    }

    /// Final path component, used to name artifacts
    pub fn basename(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.relative_path)
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.action_type, self.relative_path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error(transparent)]
    Template(#[from] super::templates::TemplateError),

    #[error("template ({descriptor}) produced no resource documents")]
    NoDocuments { descriptor: String },

    #[error("document {index} of ({descriptor}) is not valid YAML: {message}")]
    Decode {
        descriptor: String,
        index: usize,
        message: String,
    },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Process(#[from] super::process::ProcessError),

    #[error("{descriptor} exited with status {exit_code}")]
    NonZeroExit { descriptor: String, exit_code: i32 },
}

/// What an action needs from the run besides the variables
#[derive(Clone)]
pub struct ActionEnvironment {
    pub cluster: Arc<dyn ClusterApi>,
    pub templates: Arc<TemplateFunctions>,
    pub execution_environment: BTreeMap<String, String>,
    pub pod_running_timeout: Duration,
    pub job_completion_timeout: Duration,
}

impl ActionEnvironment {
    pub fn new(cluster: Arc<dyn ClusterApi>, templates: Arc<TemplateFunctions>) -> Self {
        Self {
            cluster,
            templates,
            execution_environment: BTreeMap::new(),
            pod_running_timeout: POD_RUNNING_TIMEOUT,
            job_completion_timeout: crate::config::DEFAULT_JOB_COMPLETION_TIMEOUT,
        }
    }
}

/// One step of the pipeline; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    descriptor: ActionDescriptor,
    path: PathBuf,
}

impl Action {
    pub fn new(descriptor: &str, root: &Path) -> Result<Self, super::PipelineError> {
        let parsed = ActionDescriptor::parse(descriptor)?;
        let path = parsed
            .resolve(root)
            .map_err(|e| super::PipelineError::Resolve {
                descriptor: descriptor.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            descriptor: parsed,
            path,
        })
    }

    pub fn action_type(&self) -> ActionType {
        self.descriptor.action_type
    }

    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run to completion, reporting through `sink`. The sink's drop ends the
    /// stream with `ActionCompleted`.
    pub async fn run(&self, variables: Variables, env: ActionEnvironment, mut sink: MessageSink) {
        let outcome = match self.descriptor.action_type {
            ActionType::TemplatedResource => self.run_templated_resource(&variables, &env, &sink).await,
            ActionType::Executable => self.run_executable(&variables, &env, &sink).await,
            ActionType::ValuesTransform => self.run_values_transform(&variables, &env, &sink).await,
        };

        match outcome {
            Ok(()) => {
                info!(action = %self.descriptor, "Action succeeded");
                sink.succeeded();
            }
            Err(e) => warn!(action = %self.descriptor, error = %e, "Action failed"),
        }
    }

    async fn run_templated_resource(
        &self,
        variables: &Variables,
        env: &ActionEnvironment,
        sink: &MessageSink,
    ) -> Result<(), ActionError> {
        let descriptor = self.descriptor.to_string();

        let text = match self.expand(variables, env).await {
            Ok(text) => text,
            Err(e) => {
                sink.send(ActionMessage::TemplateExpansionFailed {
                    descriptor: descriptor.clone(),
                    error: e.to_string(),
                    partial_text: None,
                });
                return Err(e);
            }
        };
        sink.send(ActionMessage::TemplateExpanded {
            descriptor: descriptor.clone(),
            text: text.clone(),
        });

        let documents = match decode_documents(&descriptor, &text) {
            Ok(documents) => documents,
            Err(e) => {
                sink.send(ActionMessage::TemplateExpansionFailed {
                    descriptor: descriptor.clone(),
                    error: e.to_string(),
                    partial_text: Some(text),
                });
                return Err(e);
            }
        };

        for document in documents {
            let mut resource = match Resource::from_document(document, env.cluster.clone()) {
                Ok(resource) => resource,
                Err(e) => {
                    sink.send(ActionMessage::ResourceCreationFailed {
                        information: e.information().cloned().unwrap_or_default(),
                        error: e.to_string(),
                    });
                    return Err(e.into());
                }
            };
            resource.default_namespace_to(variables.default_namespace());

            if let Err(e) = resource.create().await {
                sink.send(ActionMessage::ResourceCreationFailed {
                    information: resource.information(),
                    error: e.to_string(),
                });
                return Err(e.into());
            }
            sink.send(ActionMessage::ResourceCreated {
                gvk: resource.gvk().clone(),
                information: resource.information(),
            });

            self.await_readiness(resource, env, sink).await?;
        }

        Ok(())
    }

    async fn expand(&self, variables: &Variables, env: &ActionEnvironment) -> Result<String, ActionError> {
        let source = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ActionError::Read {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        let templates = env.templates.clone();
        let name = self.descriptor.to_string();
        let variables = variables.clone();
        let expanded = tokio::task::spawn_blocking(move || templates.expand(&name, &source, &variables))
            .await
            .map_err(|e| ActionError::Read {
                path: self.path.display().to_string(),
                message: format!("template expansion task: {e}"),
            })??;

        debug!(action = %self.descriptor, bytes = expanded.len(), "Expanded template");
        Ok(expanded)
    }

    async fn await_readiness(
        &self,
        resource: Resource,
        env: &ActionEnvironment,
        sink: &MessageSink,
    ) -> Result<(), ActionError> {
        let information = resource.information();

        if resource.is_a(&Gvk::pod()) {
            sink.send(ActionMessage::WaitingForPod {
                information: information.clone(),
            });
            let outcome = match Pod::try_from(resource) {
                Ok(mut pod) => pod.wait_for_running_state(env.pod_running_timeout).await,
                Err(e) => Err(e),
            };
            return match outcome {
                Ok(()) => {
                    sink.send(ActionMessage::PodRunning { information });
                    Ok(())
                }
                Err(e) => {
                    sink.send(ActionMessage::ResourceCreationFailed {
                        information,
                        error: e.to_string(),
                    });
                    Err(e.into())
                }
            };
        }

        if resource.is_a(&Gvk::job()) {
            sink.send(ActionMessage::WaitingForJob {
                information: information.clone(),
            });
            let outcome = match Job::try_from(resource) {
                Ok(mut job) => job.wait_for_completion(env.job_completion_timeout).await,
                Err(e) => Err(e),
            };
            return match outcome {
                Ok(()) => {
                    sink.send(ActionMessage::JobCompleted { information });
                    Ok(())
                }
                Err(e) => {
                    sink.send(ActionMessage::JobFailed {
                        information,
                        error: e.to_string(),
                    });
                    Err(e.into())
                }
            };
        }

        Ok(())
    }

    async fn invoke(&self, variables: &Variables, env: &ActionEnvironment) -> Result<RunResult, ActionError> {
        let input = variables.to_stdin_line().map_err(|e| ActionError::Read {
            path: self.path.display().to_string(),
            message: format!("serializing variables: {e}"),
        })?;
        Ok(run_with_input(&self.path, &env.execution_environment, input).await?)
    }

    async fn run_executable(
        &self,
        variables: &Variables,
        env: &ActionEnvironment,
        sink: &MessageSink,
    ) -> Result<(), ActionError> {
        let descriptor = self.descriptor.to_string();
        match self.checked_invoke(variables, env).await {
            Ok(result) => {
                sink.send(ActionMessage::ExecutionSucceeded {
                    descriptor,
                    stdout: result.stdout,
                    stderr: result.stderr,
                });
                Ok(())
            }
            Err((e, result)) => {
                let (stdout, stderr) = result.map(|r| (r.stdout, r.stderr)).unwrap_or_default();
                sink.send(ActionMessage::ExecutionFailed {
                    descriptor,
                    error: e.to_string(),
                    stdout,
                    stderr,
                });
                Err(e)
            }
        }
    }

    /// Same invocation as an executable; the variables flow on unchanged
    async fn run_values_transform(
        &self,
        variables: &Variables,
        env: &ActionEnvironment,
        sink: &MessageSink,
    ) -> Result<(), ActionError> {
        let descriptor = self.descriptor.to_string();
        match self.checked_invoke(variables, env).await {
            Ok(result) => {
                sink.send(ActionMessage::ValuesTransformSucceeded {
                    descriptor,
                    stdout: result.stdout,
                    stderr: result.stderr,
                });
                Ok(())
            }
            Err((e, result)) => {
                let (stdout, stderr) = result.map(|r| (r.stdout, r.stderr)).unwrap_or_default();
                sink.send(ActionMessage::ValuesTransformFailed {
                    descriptor,
                    error: e.to_string(),
                    stdout,
                    stderr,
                });
                Err(e)
            }
        }
    }

    async fn checked_invoke(
        &self,
        variables: &Variables,
        env: &ActionEnvironment,
    ) -> Result<RunResult, (ActionError, Option<RunResult>)> {
        let result = self.invoke(variables, env).await.map_err(|e| (e, None))?;
        if result.passed() {
            return Ok(result);
        }
        let error = ActionError::NonZeroExit {
            descriptor: self.descriptor.to_string(),
            exit_code: result.exit_code,
        };
        Err((error, Some(result)))
    }
}

fn document_separator() -> &'static Regex {
    static SEPARATOR: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?m)^---[ \t]*\r?$").expect("valid separator regex"))
}

/// Split expanded text on `---` lines and decode each non-blank document.
/// Zero documents is an error.
pub(crate) fn decode_documents(
    descriptor: &str,
    text: &str,
) -> Result<Vec<serde_json::Value>, ActionError> {
    let mut documents = Vec::new();

    for (index, chunk) in document_separator().split(text).enumerate() {
        if chunk.trim().is_empty() {
            continue;
        }
        let document: serde_json::Value =
            serde_yaml::from_str(chunk).map_err(|e| ActionError::Decode {
                descriptor: descriptor.to_string(),
                index,
                message: e.to_string(),
            })?;
        if document.is_null() {
            continue;
        }
        documents.push(document);
    }

    if documents.is_empty() {
        return Err(ActionError::NoDocuments {
            descriptor: descriptor.to_string(),
        });
    }
    Ok(documents)
}
