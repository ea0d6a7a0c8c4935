//! Test runner
//!
//! Drives the whole run, one case at a time:
//!
//! ```text
//! for unit in Units:
//!     for case in Cases:
//!         directories -> default namespace -> pipeline -> teardown
//! archive -> remove asset root
//! ```
//!
//! The first failure ends the run after the current case's teardown. The
//! asset root is then left in place for inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::assets::{AssetDirectories, AssetError};
use crate::cluster::ClusterApi;
use crate::config::{Configuration, TestCase, TestUnit};
use crate::events::{EventContext, EventKind, EventReporter};
use crate::pipeline::{
    Action, ActionEnvironment, ActionMessage, MessageSink, Pipeline, PipelineError,
    TemplateFunctions,
};
use crate::resource::{Namespace, Resource, ResourceError, ResourceInformation};
use crate::tracker::{ResourceTracker, TrackedResource};
use crate::variables::Variables;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Assets(#[from] AssetError),

    #[error("[{context}] failed to create default namespace: {source}")]
    Namespace {
        context: String,
        source: ResourceError,
    },

    #[error("[{context}] action {descriptor} failed")]
    Action { context: String, descriptor: String },

    #[error("[{context}] action {descriptor} panicked: {message}")]
    ActionPanicked {
        context: String,
        descriptor: String,
        message: String,
    },

    #[error("[{context}] failed to delete {information}: {source}")]
    Teardown {
        context: String,
        information: ResourceInformation,
        source: ResourceError,
    },
}

pub struct TestRunner {
    config: Configuration,
    cluster: Arc<dyn ClusterApi>,
    templates: Arc<TemplateFunctions>,
    tracker: ResourceTracker,
    events: EventReporter,
    asset_parent: PathBuf,
}

impl TestRunner {
    /// `config` should already have overrides applied and be validated
    pub fn new(
        config: Configuration,
        cluster: Arc<dyn ClusterApi>,
        templates: Arc<TemplateFunctions>,
        events: EventReporter,
    ) -> Self {
        Self {
            config,
            cluster,
            templates,
            tracker: ResourceTracker::new(),
            events,
            asset_parent: std::env::temp_dir(),
        }
    }

    /// Create the asset root under `parent` instead of the system temp
    /// directory
    #[must_use]
    pub fn with_asset_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.asset_parent = parent.into();
        self
    }

    /// Resources created but not yet deleted, oldest first
    pub fn tracked(&self) -> impl Iterator<Item = &ResourceInformation> {
        self.tracker.tracked()
    }

    pub async fn run(&mut self) -> Result<(), RunnerError> {
        let root = Path::new(&self.config.test.pipeline.action_definitions_root_directory);
        let mut pipeline =
            match Pipeline::from_descriptors(&self.config.test.pipeline.actions_in_order[..], root) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    self.events.pipeline_invalid(&e);
                    return Err(e.into());
                }
            };

        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut assets = self
            .reported(
                &EventContext::none(),
                AssetDirectories::create_root_in(&self.asset_parent, &id).await,
                |a| directory_created(a.root()),
                |e| directory_failed(e),
            )?;
        info!(
            root = %assets.root().display(),
            units = self.config.test.units.len(),
            cases = self.config.test.cases.len(),
            "Starting test run"
        );

        let global = Variables::global(&self.config);
        let units = self.config.test.units.clone();
        let cases = self.config.test.cases.clone();

        for unit in &units {
            self.events.unit_started(&unit.name);
            let unit_context = EventContext::for_unit(&unit.name);
            let unit_path = assets.root().join(&unit.name);
            self.reported(
                &unit_context,
                assets.create_unit_directory(&unit.name).await,
                |_| directory_created(&unit_path),
                |e| directory_failed(e),
            )?;

            let unit_variables = global.rescoped_to_unit(&unit.name, &unit.values);
            for case in &cases {
                self.run_case(unit, case, &unit_variables, &mut pipeline, &mut assets)
                    .await?;
            }

            self.events.unit_completed(&unit.name);
        }

        self.finish(&assets).await?;
        self.events.testing_completed();
        info!("Test run completed");
        Ok(())
    }

    async fn run_case(
        &mut self,
        unit: &TestUnit,
        case: &TestCase,
        unit_variables: &Variables,
        pipeline: &mut Pipeline,
        assets: &mut AssetDirectories,
    ) -> Result<(), RunnerError> {
        let context = EventContext::for_case(&unit.name, &case.name);
        self.events.case_started(&context);

        match assets.create_case_directories(&unit.name, &case.name).await {
            Ok(created) => {
                for path in created {
                    self.events.emit(&context, directory_created(&path));
                }
            }
            Err(e) => {
                self.events.emit(&context, directory_failed(&e));
                return Err(e.into());
            }
        }
        let retrieved_assets = assets
            .case_directories(&unit.name, &case.name)?
            .retrieved_assets
            .display()
            .to_string();

        let outcome = match self.create_default_namespace(&context).await {
            Ok(namespace) => {
                let variables = unit_variables
                    .rescoped_to_case(&case.name, &case.values)
                    .with_default_namespace(namespace)
                    .with_retrieved_assets_directory(retrieved_assets);
                self.run_pipeline(&context, &variables, pipeline, assets).await
            }
            Err(e) => Err(e),
        };

        let teardown = self.teardown(&context).await;
        outcome?;
        teardown?;

        self.events.case_completed(&context);
        Ok(())
    }

    async fn create_default_namespace(&mut self, context: &EventContext) -> Result<String, RunnerError> {
        let basename = self.config.test.default_namespace.basename.clone();
        self.events.emit(
            context,
            EventKind::CreatingDefaultNamespace {
                basename: basename.clone(),
            },
        );

        let created = async {
            let mut namespace = Namespace::with_generated_name(&basename, self.cluster.clone())?;
            namespace.create().await?;
            Ok::<_, ResourceError>(namespace)
        }
        .await;

        match created {
            Ok(namespace) => {
                let information = namespace.resource().information();
                self.tracker.track(TrackedResource::from(namespace.resource()));
                self.events.emit(
                    context,
                    EventKind::ResourceCreated {
                        information: information.clone(),
                    },
                );
                info!(namespace = %information.name, context = %context, "Created default namespace");
                Ok(information.name)
            }
            Err(source) => {
                self.events.emit(
                    context,
                    EventKind::ResourceCreationFailed {
                        information: ResourceInformation::new(
                            "Namespace",
                            format!("{basename}<generated>"),
                            "",
                        ),
                        error: source.to_string(),
                    },
                );
                Err(RunnerError::Namespace {
                    context: context.to_string(),
                    source,
                })
            }
        }
    }

    async fn run_pipeline(
        &mut self,
        context: &EventContext,
        variables: &Variables,
        pipeline: &mut Pipeline,
        assets: &AssetDirectories,
    ) -> Result<(), RunnerError> {
        let environment = self.action_environment();

        pipeline.restart();
        while let Some(action) = pipeline.next_action() {
            let action = action.clone();
            self.run_action(context, &action, variables, &environment, assets)
                .await?;
        }
        Ok(())
    }

    /// Run one action on its own task and consume its messages until it
    /// reports completion
    async fn run_action(
        &mut self,
        context: &EventContext,
        action: &Action,
        variables: &Variables,
        environment: &ActionEnvironment,
        assets: &AssetDirectories,
    ) -> Result<(), RunnerError> {
        let descriptor = action.descriptor().to_string();
        info!(action = %descriptor, context = %context, "Running action");

        let (sender, mut messages) = mpsc::unbounded_channel();
        let sink = MessageSink::new(descriptor.clone(), sender);
        let task = {
            let action = action.clone();
            let variables = variables.clone();
            let environment = environment.clone();
            tokio::spawn(async move { action.run(variables, environment, sink).await })
        };

        let mut succeeded = false;
        let mut artifacts_written = true;
        while let Some(message) = messages.recv().await {
            match assets
                .record(&context.unit, &context.case, action.descriptor(), &message)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    artifacts_written = false;
                    self.events.emit(
                        context,
                        EventKind::ArtifactWriteFailed {
                            path: assets.root().display().to_string(),
                            error: e.to_string(),
                        },
                    );
                }
            }

            if let ActionMessage::ResourceCreated { gvk, information } = &message {
                let namespace = Some(information.namespace.as_str());
                match Resource::reference(gvk, &information.name, namespace, self.cluster.clone()) {
                    Ok(resource) => self.tracker.track(TrackedResource::from(&resource)),
                    Err(e) => warn!(resource = %information, error = %e, "Cannot track created resource"),
                }
            }

            self.events.action_message(context, &message);

            if let ActionMessage::ActionCompleted { succeeded: done, .. } = message {
                succeeded = done;
                break;
            }
        }

        if let Err(e) = task.await {
            return Err(RunnerError::ActionPanicked {
                context: context.to_string(),
                descriptor,
                message: e.to_string(),
            });
        }

        if succeeded && artifacts_written {
            Ok(())
        } else {
            Err(RunnerError::Action {
                context: context.to_string(),
                descriptor,
            })
        }
    }

    async fn teardown(&mut self, context: &EventContext) -> Result<(), RunnerError> {
        let result = self.tracker.attempt_to_delete_all().await;
        for information in result.deleted {
            self.events.resource_deleted(context, information);
        }

        match result.failed {
            None => Ok(()),
            Some((information, source)) => {
                self.events
                    .resource_deletion_failed(context, information.clone(), &source);
                Err(RunnerError::Teardown {
                    context: context.to_string(),
                    information,
                    source,
                })
            }
        }
    }

    async fn finish(&self, assets: &AssetDirectories) -> Result<(), RunnerError> {
        let context = EventContext::none();
        let archive = self.config.test.asset_archive.file_path.clone();

        self.reported(
            &context,
            assets.archive_to(Path::new(&archive)).await,
            |_| EventKind::ArchiveCreated {
                path: archive.clone(),
            },
            |e| EventKind::ArchiveCreationFailed {
                path: archive.clone(),
                error: e.to_string(),
            },
        )?;

        let root = assets.root().display().to_string();
        self.reported(
            &context,
            assets.remove().await,
            |_| EventKind::AssetDirectoryRemoved { path: root.clone() },
            |e| EventKind::AssetDirectoryRemovalFailed {
                path: root.clone(),
                error: e.to_string(),
            },
        )?;
        Ok(())
    }

    fn action_environment(&self) -> ActionEnvironment {
        let pipeline = &self.config.test.pipeline;
        let mut environment = ActionEnvironment::new(self.cluster.clone(), self.templates.clone());
        environment.execution_environment = pipeline.execution_environment.clone();
        environment.job_completion_timeout = pipeline.job_completion_timeout();
        environment
    }

    /// Emit the success or failure event for `result` and pass it on
    fn reported<T>(
        &self,
        context: &EventContext,
        result: Result<T, AssetError>,
        on_success: impl FnOnce(&T) -> EventKind,
        on_failure: impl FnOnce(&AssetError) -> EventKind,
    ) -> Result<T, RunnerError> {
        match result {
            Ok(value) => {
                self.events.emit(context, on_success(&value));
                Ok(value)
            }
            Err(e) => {
                self.events.emit(context, on_failure(&e));
                Err(e.into())
            }
        }
    }
}

fn directory_created(path: &Path) -> EventKind {
    EventKind::DirectoryCreated {
        path: path.display().to_string(),
    }
}

fn directory_failed(error: &AssetError) -> EventKind {
    let path = match error {
        AssetError::CreateDirectory { path, .. } => path.clone(),
        _ => String::new(),
    };
    EventKind::DirectoryCreationFailed {
        path,
        error: error.to_string(),
    }
}
