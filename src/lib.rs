//! Jobber - Kubernetes performance-test pipeline runner
//!
//! For every combination of a test unit and a test case, jobber creates a
//! fresh namespace, runs an ordered pipeline of actions against the cluster,
//! waits for the resulting workloads, and deletes everything it created.
//!
//! Actions come in three kinds:
//!
//! - `resources/<path>`: a Jinja template expanding to YAML resource documents
//! - `values-transforms/<path>`: a program run over the variables
//! - `executables/<path>`: a program run with the variables on stdin
//!
//! # Example (Rust)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use jobber::{Configuration, EventReporter, KubeCluster, TemplateFunctions, TestRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::from_file("config.yaml")?;
//!     config.validate()?;
//!
//!     let cluster = Arc::new(KubeCluster::connect(None).await?);
//!     let templates = TemplateFunctions::with_cluster_functions(
//!         cluster.clone(),
//!         tokio::runtime::Handle::current(),
//!     )?;
//!
//!     let (reporter, mut events) = EventReporter::channel();
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     TestRunner::new(config, cluster, Arc::new(templates), reporter)
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! jobber --config ./config.yaml --set 'Test.Cases.[100TPS].Values.TPS=200'
//! ```

pub mod assets;
pub mod cluster;
pub mod config;
pub mod events;
pub mod overrides;
pub mod pipeline;
pub mod reporter;
pub mod resource;
pub mod runner;
pub mod telemetry;
pub mod tracker;
pub mod variables;
pub mod wait;

// Re-export commonly used types
pub use cluster::{ClusterApi, ClusterError, KubeCluster};
pub use config::{ConfigError, Configuration};
pub use events::{Event, EventContext, EventKind, EventReporter};
pub use overrides::{apply_overrides, parse_assignment, OverrideError};
pub use pipeline::{Action, ActionDescriptor, ActionType, Pipeline, TemplateFunctions};
pub use reporter::EventFormatter;
pub use resource::{Gvk, Resource, ResourceError, ResourceInformation};
pub use runner::{RunnerError, TestRunner};
pub use telemetry::init_logging;
pub use tracker::ResourceTracker;
pub use variables::Variables;
pub use wait::{WaitError, WaitTimer, WaitTimerError};
