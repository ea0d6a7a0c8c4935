//! Test configuration
//!
//! A run is described by a single YAML document rooted at `Test`. Keys are
//! PascalCase to match the dotted paths accepted by [`crate::overrides`].
//!
//! # Example
//!
//! ```
//! use jobber::config::Configuration;
//!
//! let config: Configuration = r#"
//! Test:
//!   AssetArchive: { FilePath: /tmp/out.tar.gz }
//!   DefaultNamespace: { Basename: perf- }
//!   Pipeline:
//!     ActionDefinitionsRootDirectory: /opt/actions
//!     ActionsInOrder: [ resources/server.yaml ]
//!   Units: [ { Name: baseline } ]
//!   Cases: [ { Name: 100TPS, Values: { TPS: 100 } } ]
//! "#
//! .parse()
//! .unwrap();
//!
//! assert_eq!(config.test.cases[0].name, "100TPS");
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::action::ActionDescriptor;

/// Free-form, arbitrarily nested values supplied to templates
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// Default bound on Job completion waits
pub const DEFAULT_JOB_COMPLETION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Errors from loading or validating a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at ({path}): {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("{path} {problem}")]
    Invalid { path: String, problem: String },
}

impl ConfigError {
    fn invalid(path: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            problem: problem.into(),
        }
    }
}

/// Root of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    pub test: TestSection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestSection {
    #[serde(default)]
    pub asset_archive: AssetArchive,
    #[serde(default)]
    pub default_namespace: DefaultNamespace,
    #[serde(default)]
    pub global_values: ValueMap,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub cases: Vec<TestCase>,
    #[serde(default)]
    pub units: Vec<TestUnit>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetArchive {
    #[serde(default)]
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultNamespace {
    #[serde(default)]
    pub basename: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineSection {
    #[serde(default)]
    pub action_definitions_root_directory: String,
    /// Environment handed to executables and values transforms. Nothing is
    /// inherited from the runner's own environment.
    #[serde(default)]
    pub execution_environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_completion_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub actions_in_order: Vec<String>,
}

impl PipelineSection {
    pub fn job_completion_timeout(&self) -> Duration {
        self.job_completion_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JOB_COMPLETION_TIMEOUT)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub values: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestUnit {
    pub name: String,
    #[serde(default)]
    pub values: ValueMap,
}

impl Configuration {
    /// Read and parse a configuration file. Overrides are not applied and
    /// the result is not validated; see [`Configuration::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        text.parse()
    }

    /// Check required sections and descriptor syntax
    pub fn validate(&self) -> Result<(), ConfigError> {
        let test = &self.test;

        if test.cases.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.Cases",
                "must exist and cannot be an empty list",
            ));
        }
        if test.units.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.Units",
                "must exist and cannot be an empty list",
            ));
        }
        check_unique_names(".Test.Cases", test.cases.iter().map(|c| c.name.as_str()))?;
        check_unique_names(".Test.Units", test.units.iter().map(|u| u.name.as_str()))?;

        if test.asset_archive.file_path.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.AssetArchive.FilePath",
                "must exist and cannot be the empty string",
            ));
        }
        if test.default_namespace.basename.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.DefaultNamespace.Basename",
                "must be defined and cannot be the empty string",
            ));
        }
        if test.pipeline.action_definitions_root_directory.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.Pipeline.ActionDefinitionsRootDirectory",
                "must be defined and cannot be empty",
            ));
        }
        if test.pipeline.actions_in_order.is_empty() {
            return Err(ConfigError::invalid(
                ".Test.Pipeline.ActionsInOrder",
                "must have at least one entry",
            ));
        }
        for (index, entry) in test.pipeline.actions_in_order.iter().enumerate() {
            ActionDescriptor::parse(entry).map_err(|e| {
                ConfigError::invalid(format!(".Test.Pipeline.ActionsInOrder[{index}]"), e.to_string())
            })?;
        }

        Ok(())
    }

    pub fn longest_case_name(&self) -> usize {
        self.test
            .cases
            .iter()
            .map(|c| c.name.chars().count())
            .max()
            .unwrap_or(0)
    }

    pub fn longest_unit_name(&self) -> usize {
        self.test
            .units
            .iter()
            .map(|u| u.name.chars().count())
            .max()
            .unwrap_or(0)
    }
}

impl FromStr for Configuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn check_unique_names<'a>(
    path: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::invalid(path, "entries must have a non-empty Name"));
        }
        if !seen.insert(name) {
            return Err(ConfigError::invalid(
                path,
                format!("contains the Name [{name}] more than once"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
Test:
  AssetArchive:
    FilePath: /tmp/results.tar.gz
  DefaultNamespace:
    Basename: perf-
  GlobalValues:
    ImageVersions:
      Server: "1.2.0"
  Pipeline:
    ActionDefinitionsRootDirectory: /opt/actions
    ExecutionEnvironment:
      PATH: /usr/bin:/bin
    ActionsInOrder:
      - resources/server.yaml
      - executables/load.sh
  Units:
    - Name: Baseline
      Values:
        Sidecar:
          Use: false
    - Name: NoTelemetry
      Values:
        Sidecar:
          Use:
            Telemetry: true
  Cases:
    - Name: 100TPS
      Values:
        TPS: 100
        Duration: 30s
    - Name: 1000TPS
"#;

    pub(crate) fn sample() -> Configuration {
        SAMPLE.parse().unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.test.units.len(), 2);
        assert_eq!(config.test.cases[0].values["TPS"], 100);
        assert!(config.test.cases[1].values.is_empty());
        assert_eq!(
            config.test.pipeline.execution_environment["PATH"],
            "/usr/bin:/bin"
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_sections_fail_validation() {
        let mut config = sample();
        config.test.cases.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(".Test.Cases"), "{err}");

        let mut config = sample();
        config.test.default_namespace.basename.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Basename"), "{err}");
    }

    #[test]
    fn test_bad_descriptor_names_index() {
        let mut config = sample();
        config.test.pipeline.actions_in_order.push("scripts/run.sh".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ActionsInOrder[2]"), "{err}");
    }

    #[test]
    fn test_duplicate_case_names_rejected() {
        let mut config = sample();
        config.test.cases[1].name = "100TPS".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_longest_names() {
        let config = sample();
        assert_eq!(config.longest_unit_name(), "NoTelemetry".len());
        assert_eq!(config.longest_case_name(), "1000TPS".len());
    }

    #[test]
    fn test_job_timeout_default() {
        let mut config = sample();
        assert_eq!(
            config.test.pipeline.job_completion_timeout(),
            DEFAULT_JOB_COMPLETION_TIMEOUT
        );
        config.test.pipeline.job_completion_timeout_seconds = Some(5);
        assert_eq!(
            config.test.pipeline.job_completion_timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_from_file_missing() {
        let err = Configuration::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
