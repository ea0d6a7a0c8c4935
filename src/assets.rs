//! Per-run artifact directories
//!
//! ```text
//! <temp>/jobber.<id>/
//!   <unit>/
//!     <case>/
//!       expanded-templates/
//!       retrieved-assets/
//!       values-transform-output/
//!       executable-output/
//! ```
//!
//! At the end of a run the root is archived with `tar` and removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::pipeline::{ActionDescriptor, ActionMessage, ActionType};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to create directory {path}: {message}")]
    CreateDirectory { path: String, message: String },

    #[error("no asset directories exist for {0}")]
    UnknownScope(String),

    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("tar failed: {0}")]
    Archive(String),

    #[error("failed to remove {path}: {message}")]
    Remove { path: String, message: String },
}

/// Directories of one unit/case pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDirectories {
    pub root: PathBuf,
    pub expanded_templates: PathBuf,
    pub retrieved_assets: PathBuf,
    pub values_transform_output: PathBuf,
    pub executable_output: PathBuf,
}

impl CaseDirectories {
    fn under(root: PathBuf) -> Self {
        Self {
            expanded_templates: root.join("expanded-templates"),
            retrieved_assets: root.join("retrieved-assets"),
            values_transform_output: root.join("values-transform-output"),
            executable_output: root.join("executable-output"),
            root,
        }
    }

    fn all(&self) -> [&Path; 5] {
        [
            &self.root,
            &self.expanded_templates,
            &self.retrieved_assets,
            &self.values_transform_output,
            &self.executable_output,
        ]
    }

    /// Where output for `action_type` lands
    pub fn output_directory(&self, action_type: ActionType) -> &Path {
        match action_type {
            ActionType::TemplatedResource => &self.expanded_templates,
            ActionType::ValuesTransform => &self.values_transform_output,
            ActionType::Executable => &self.executable_output,
        }
    }
}

/// Owns the run's asset tree
#[derive(Debug)]
pub struct AssetDirectories {
    root: PathBuf,
    cases: HashMap<(String, String), CaseDirectories>,
}

impl AssetDirectories {
    /// Create `jobber.<id>` under `parent`
    pub async fn create_root_in(parent: &Path, id: &str) -> Result<Self, AssetError> {
        let root = parent.join(format!("jobber.{id}"));
        create_directory(&root).await?;
        info!(root = %root.display(), "Created asset root");
        Ok(Self {
            root,
            cases: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn create_unit_directory(&self, unit: &str) -> Result<PathBuf, AssetError> {
        let path = self.root.join(unit);
        create_directory(&path).await?;
        Ok(path)
    }

    /// Create the case directory and its four subdirectories. Returns every
    /// path created, in creation order.
    pub async fn create_case_directories(
        &mut self,
        unit: &str,
        case: &str,
    ) -> Result<Vec<PathBuf>, AssetError> {
        let directories = CaseDirectories::under(self.root.join(unit).join(case));
        let mut created = Vec::new();
        for path in directories.all() {
            create_directory(path).await?;
            created.push(path.to_path_buf());
        }
        self.cases
            .insert((unit.to_string(), case.to_string()), directories);
        Ok(created)
    }

    pub fn case_directories(&self, unit: &str, case: &str) -> Result<&CaseDirectories, AssetError> {
        self.cases
            .get(&(unit.to_string(), case.to_string()))
            .ok_or_else(|| AssetError::UnknownScope(format!("{unit}/{case}")))
    }

    /// Persist what a message carries: expanded template text or captured
    /// program output. Returns the files written.
    pub async fn record(
        &self,
        unit: &str,
        case: &str,
        descriptor: &ActionDescriptor,
        message: &ActionMessage,
    ) -> Result<Vec<PathBuf>, AssetError> {
        let directory = self
            .case_directories(unit, case)?
            .output_directory(descriptor.action_type);

        match message {
            ActionMessage::TemplateExpanded { text, .. } => {
                let path = unused_base_path(directory, descriptor.basename(), &[""]).await?;
                write_file(&path, text.as_bytes()).await?;
                Ok(vec![path])
            }
            ActionMessage::TemplateExpansionFailed {
                partial_text: Some(text),
                ..
            } => {
                let path = unused_base_path(directory, descriptor.basename(), &[""]).await?;
                write_file(&path, text.as_bytes()).await?;
                Ok(vec![path])
            }
            ActionMessage::ExecutionSucceeded { stdout, stderr, .. }
            | ActionMessage::ExecutionFailed { stdout, stderr, .. }
            | ActionMessage::ValuesTransformSucceeded { stdout, stderr, .. }
            | ActionMessage::ValuesTransformFailed { stdout, stderr, .. } => {
                let base =
                    unused_base_path(directory, descriptor.basename(), &[".stdout", ".stderr"]).await?;
                let stdout_path = with_suffix(&base, ".stdout");
                let stderr_path = with_suffix(&base, ".stderr");
                write_file(&stdout_path, stdout).await?;
                write_file(&stderr_path, stderr).await?;
                Ok(vec![stdout_path, stderr_path])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// `tar czf <archive> -C <root> .`
    pub async fn archive_to(&self, archive: &Path) -> Result<(), AssetError> {
        let output = Command::new("tar")
            .arg("czf")
            .arg(archive)
            .arg("-C")
            .arg(&self.root)
            .arg(".")
            .output()
            .await
            .map_err(|e| AssetError::Archive(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AssetError::Archive(
                stderr.split_whitespace().collect::<Vec<_>>().join(" "),
            ));
        }
        info!(archive = %archive.display(), "Archived assets");
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), AssetError> {
        fs::remove_dir_all(&self.root)
            .await
            .map_err(|e| AssetError::Remove {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })
    }
}

async fn create_directory(path: &Path) -> Result<(), AssetError> {
    fs::create_dir(path)
        .await
        .map_err(|e| AssetError::CreateDirectory {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    debug!(path = %path.display(), "Created directory");
    Ok(())
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), AssetError> {
    fs::write(path, contents)
        .await
        .map_err(|e| AssetError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// `<directory>/<basename>`, or the first of `-0`, `-1`, ... appended to it,
/// such that no `<base><suffix>` exists yet
async fn unused_base_path(
    directory: &Path,
    basename: &str,
    suffixes: &[&str],
) -> Result<PathBuf, AssetError> {
    let base = directory.join(basename);
    let mut candidate = base.clone();
    let mut discriminator = 0;
    while is_taken(&candidate, suffixes).await? {
        candidate = with_suffix(&base, &format!("-{discriminator}"));
        discriminator += 1;
    }
    Ok(candidate)
}

async fn is_taken(candidate: &Path, suffixes: &[&str]) -> Result<bool, AssetError> {
    for suffix in suffixes {
        let path = with_suffix(candidate, suffix);
        let exists = fs::try_exists(&path)
            .await
            .map_err(|e| AssetError::Write {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if exists {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn case_tree() -> (tempfile::TempDir, AssetDirectories) {
        let parent = tempfile::tempdir().unwrap();
        let mut assets = AssetDirectories::create_root_in(parent.path(), "test").await.unwrap();
        assets.create_unit_directory("Baseline").await.unwrap();
        assets.create_case_directories("Baseline", "100TPS").await.unwrap();
        (parent, assets)
    }

    #[tokio::test]
    async fn test_layout() {
        let (parent, assets) = case_tree().await;

        let root = parent.path().join("jobber.test");
        assert_eq!(assets.root(), root);
        let case = root.join("Baseline/100TPS");
        for sub in [
            "expanded-templates",
            "retrieved-assets",
            "values-transform-output",
            "executable-output",
        ] {
            assert!(case.join(sub).is_dir(), "{sub}");
        }
        assert_eq!(
            assets.case_directories("Baseline", "100TPS").unwrap().retrieved_assets,
            case.join("retrieved-assets")
        );
        assert!(assets.case_directories("Baseline", "Other").is_err());
    }

    #[tokio::test]
    async fn test_existing_directory_fails() {
        let (_parent, assets) = case_tree().await;
        let err = assets.create_unit_directory("Baseline").await.unwrap_err();
        assert!(matches!(err, AssetError::CreateDirectory { .. }));
    }

    #[tokio::test]
    async fn test_collisions_get_suffixes() {
        let (_parent, assets) = case_tree().await;
        let descriptor = ActionDescriptor::parse("resources/sub/server.yaml").unwrap();
        let expanded = |text: &str| ActionMessage::TemplateExpanded {
            descriptor: descriptor.to_string(),
            text: text.to_string(),
        };

        let mut written = Vec::new();
        for text in ["one", "two", "three"] {
            written.extend(
                assets
                    .record("Baseline", "100TPS", &descriptor, &expanded(text))
                    .await
                    .unwrap(),
            );
        }

        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["server.yaml", "server.yaml-0", "server.yaml-1"]);
        assert_eq!(std::fs::read_to_string(&written[2]).unwrap(), "three");
    }

    #[tokio::test]
    async fn test_program_output_pairs() {
        let (_parent, assets) = case_tree().await;
        let descriptor = ActionDescriptor::parse("executables/load.sh").unwrap();
        let message = ActionMessage::ExecutionFailed {
            descriptor: descriptor.to_string(),
            error: "exited with status 1".into(),
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        };

        let first = assets.record("Baseline", "100TPS", &descriptor, &message).await.unwrap();
        let second = assets.record("Baseline", "100TPS", &descriptor, &message).await.unwrap();

        let directory = &assets.case_directories("Baseline", "100TPS").unwrap().executable_output;
        assert_eq!(first, [directory.join("load.sh.stdout"), directory.join("load.sh.stderr")]);
        assert_eq!(
            second,
            [directory.join("load.sh-0.stdout"), directory.join("load.sh-0.stderr")]
        );
        assert_eq!(std::fs::read(&first[1]).unwrap(), b"err");

        let nothing = assets
            .record(
                "Baseline",
                "100TPS",
                &descriptor,
                &ActionMessage::ActionCompleted {
                    descriptor: descriptor.to_string(),
                    succeeded: true,
                },
            )
            .await
            .unwrap();
        assert!(nothing.is_empty());
    }

    #[tokio::test]
    async fn test_archive_and_remove() {
        let (parent, assets) = case_tree().await;
        let archive = parent.path().join("result.tar.gz");

        assets.archive_to(&archive).await.unwrap();
        assets.remove().await.unwrap();

        assert!(archive.is_file());
        assert!(!assets.root().exists());
        assert!(matches!(assets.remove().await, Err(AssetError::Remove { .. })));
    }

    #[tokio::test]
    async fn test_archive_failure_reports_tar_error() {
        let (_parent, assets) = case_tree().await;
        let err = assets
            .archive_to(Path::new("/nonexistent/dir/result.tar.gz"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("tar failed"), "{err}");
    }

    #[tokio::test]
    async fn test_unwritable_output_name_fails() {
        let (_parent, assets) = case_tree().await;
        let descriptor = ActionDescriptor::parse(&format!("executables/{}", "x".repeat(250))).unwrap();
        let message = ActionMessage::ExecutionSucceeded {
            descriptor: descriptor.to_string(),
            stdout: b"out".to_vec(),
            stderr: Vec::new(),
        };

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            assets.record("Baseline", "100TPS", &descriptor, &message),
        )
        .await
        .expect("record should not loop");
        assert!(matches!(outcome, Err(AssetError::Write { .. })), "{outcome:?}");
    }
}
