//! Variables handed to templates and subprocesses
//!
//! The tree is scoped in three layers: global values are set once per run,
//! unit values when a test unit starts and case values when a test case
//! starts. Every rescope returns a new, fully independent tree; the parent
//! is never touched. Sibling cases therefore never share mutable state.
//!
//! Serialized (for templates and for executable stdin) with PascalCase keys:
//!
//! ```text
//! { "Values":  { "Global": {...}, "Unit": {...}, "Case": {...} },
//!   "Config":  { "Archive": { "FilePath": "..." } },
//!   "Runtime": { "DefaultNamespace": { "Name": "..." },
//!                "Context": { "CurrentUnit": { "Name": "..." },
//!                             "CurrentCase": { "Name": "...",
//!                                              "RetrievedAssetsDirectoryPath": "..." } } } }
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{Configuration, ValueMap};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Variables {
    pub values: ScopedValues,
    pub config: ConfigVariables,
    pub runtime: RuntimeVariables,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScopedValues {
    pub global: ValueMap,
    pub unit: ValueMap,
    pub case: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigVariables {
    pub archive: ArchiveVariables,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveVariables {
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeVariables {
    pub default_namespace: NamedVariable,
    pub context: RuntimeContext,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeContext {
    pub current_unit: NamedVariable,
    pub current_case: CurrentCase,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedVariable {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CurrentCase {
    pub name: String,
    pub retrieved_assets_directory_path: String,
}

impl Variables {
    /// Global scope for a run
    pub fn global(config: &Configuration) -> Self {
        Self {
            values: ScopedValues {
                global: config.test.global_values.clone(),
                ..Default::default()
            },
            config: ConfigVariables {
                archive: ArchiveVariables {
                    file_path: config.test.asset_archive.file_path.clone(),
                },
            },
            runtime: RuntimeVariables::default(),
        }
    }

    /// Copy scoped to a test unit. Case scope and case context are reset.
    #[must_use]
    pub fn rescoped_to_unit(&self, unit_name: &str, unit_values: &ValueMap) -> Self {
        let mut copy = self.clone();
        copy.values.unit = unit_values.clone();
        copy.values.case = ValueMap::new();
        copy.runtime.context.current_unit.name = unit_name.to_string();
        copy.runtime.context.current_case = CurrentCase::default();
        copy
    }

    /// Copy scoped to a test case within the current unit
    #[must_use]
    pub fn rescoped_to_case(&self, case_name: &str, case_values: &ValueMap) -> Self {
        let mut copy = self.clone();
        copy.values.case = case_values.clone();
        copy.runtime.context.current_case = CurrentCase {
            name: case_name.to_string(),
            ..Default::default()
        };
        copy
    }

    #[must_use]
    pub fn with_default_namespace(mut self, name: impl Into<String>) -> Self {
        self.runtime.default_namespace.name = name.into();
        self
    }

    #[must_use]
    pub fn with_retrieved_assets_directory(mut self, path: impl Into<String>) -> Self {
        self.runtime.context.current_case.retrieved_assets_directory_path = path.into();
        self
    }

    pub fn default_namespace(&self) -> &str {
        &self.runtime.default_namespace.name
    }

    /// Template rendering context
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Line-oriented encoding written to subprocess stdin: compact JSON
    /// followed by a newline.
    pub fn to_stdin_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
