//! One-line, column-aligned rendering of [`Event`]s
//!
//! ```text
//! [Baseline/100TPS]  Successfully Created Kind [Pod] Named [server] in Namespace [perf-x7k2p]
//! [Baseline/100TPS]  Waiting For  Pod Kind [Pod] Named [server] in Namespace [perf-x7k2p] to reach Running
//! ```

use crate::config::Configuration;
use crate::events::{Event, EventKind};

const STARTED: &str = "Started";
const TRYING: &str = "Trying To";
const SUCCEEDED: &str = "Successfully";
const FAILED: &str = "Failed To";
const WAITING: &str = "Waiting For";

const VERB_WIDTH: usize = SUCCEEDED.len();

#[derive(Debug, Clone)]
pub struct EventFormatter {
    context_width: usize,
}

impl EventFormatter {
    /// `[` + unit + `/` + case + `]`
    pub fn new(longest_unit: usize, longest_case: usize) -> Self {
        Self {
            context_width: longest_unit + longest_case + 3,
        }
    }

    pub fn for_configuration(config: &Configuration) -> Self {
        Self::new(config.longest_unit_name(), config.longest_case_name())
    }

    pub fn format(&self, event: &Event) -> String {
        let context = format!("[{}]", event.context);
        let (verb, description) = describe(&event.kind);
        let mut line = format!(
            "{context:<width$} {verb:<VERB_WIDTH$} {description}",
            width = self.context_width,
        );
        if let Some(error) = event.kind.error() {
            line.push_str(": ");
            line.push_str(error);
        }
        line
    }
}

fn describe(kind: &EventKind) -> (&'static str, String) {
    use EventKind::*;

    match kind {
        UnitStarted => (STARTED, "Test Unit".into()),
        UnitCompleted => (SUCCEEDED, "Completed Test Unit".into()),
        CaseStarted => (STARTED, "Test Case".into()),
        CaseCompleted => (SUCCEEDED, "Completed Test Case".into()),
        TestingCompleted => (SUCCEEDED, "Completed Testing".into()),
        PipelineDefinitionInvalid { .. } => (FAILED, "Build Pipeline".into()),

        DirectoryCreated { path } => (SUCCEEDED, format!("Created Directory [{path}]")),
        DirectoryCreationFailed { path, .. } => (FAILED, format!("Create Directory [{path}]")),
        ArtifactWriteFailed { path, .. } => (FAILED, format!("Write Artifact [{path}]")),

        CreatingDefaultNamespace { basename } => (
            TRYING,
            format!("Create Default Namespace With Generated Name [{basename}]"),
        ),
        TemplateExpanded { descriptor } => (SUCCEEDED, format!("Expanded Template [{descriptor}]")),
        TemplateExpansionFailed { descriptor, .. } => {
            (FAILED, format!("Expand Template [{descriptor}]"))
        }
        ResourceCreated { information } => (SUCCEEDED, format!("Created {information}")),
        ResourceCreationFailed { information, .. } => (FAILED, format!("Create {information}")),
        ResourceDeleted { information } => (SUCCEEDED, format!("Deleted {information}")),
        ResourceDeletionFailed { information, .. } => (FAILED, format!("Delete {information}")),

        WaitingForPod { information } => (WAITING, format!("Pod {information} to reach Running")),
        PodRunning { information } => (SUCCEEDED, format!("Started {information}")),
        WaitingForJob { information } => (WAITING, format!("Job {information} to complete")),
        JobCompleted { information } => (SUCCEEDED, format!("Completed {information}")),
        JobFailed { information, .. } => (FAILED, format!("Complete {information}")),

        ExecutionSucceeded { descriptor } => (SUCCEEDED, format!("Ran Executable [{descriptor}]")),
        ExecutionFailed { descriptor, .. } => (FAILED, format!("Run Executable [{descriptor}]")),
        ValuesTransformSucceeded { descriptor } => {
            (SUCCEEDED, format!("Ran Values Transform [{descriptor}]"))
        }
        ValuesTransformFailed { descriptor, .. } => {
            (FAILED, format!("Run Values Transform [{descriptor}]"))
        }

        ArchiveCreated { path } => (SUCCEEDED, format!("Created Archive [{path}]")),
        ArchiveCreationFailed { path, .. } => (FAILED, format!("Create Archive [{path}]")),
        AssetDirectoryRemoved { path } => (SUCCEEDED, format!("Removed Asset Directory [{path}]")),
        AssetDirectoryRemovalFailed { path, .. } => {
            (FAILED, format!("Remove Asset Directory [{path}]"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventContext;
    use crate::resource::ResourceInformation;

    #[test]
    fn test_columns_align() {
        // "Baseline" (8) + "1000TPS" (7) + 3
        let formatter = EventFormatter::new(8, 7);

        let created = formatter.format(&Event::new(
            EventContext::for_case("Baseline", "100TPS"),
            EventKind::ResourceCreated {
                information: ResourceInformation::new("Pod", "server", "perf-1"),
            },
        ));
        assert_eq!(
            created,
            "[Baseline/100TPS]  Successfully Created Kind [Pod] Named [server] in Namespace [perf-1]"
        );

        let started = formatter.format(&Event::new(
            EventContext::for_unit("Baseline"),
            EventKind::UnitStarted,
        ));
        assert_eq!(started, "[Baseline]         Started      Test Unit");

        let done = formatter.format(&Event::new(EventContext::none(), EventKind::TestingCompleted));
        assert_eq!(done, "[]                 Successfully Completed Testing");
    }

    #[test]
    fn test_failures_carry_error() {
        let formatter = EventFormatter::new(8, 6);
        let line = formatter.format(&Event::new(
            EventContext::for_case("Baseline", "100TPS"),
            EventKind::JobFailed {
                information: ResourceInformation::new("Job", "load", "perf-1"),
                error: "[2] Pods for the Job failed".into(),
            },
        ));
        assert_eq!(
            line,
            "[Baseline/100TPS] Failed To    Complete Kind [Job] Named [load] in Namespace [perf-1]: [2] Pods for the Job failed"
        );
    }

    #[test]
    fn test_width_from_configuration() {
        let config = crate::config::tests::sample();
        let formatter = EventFormatter::for_configuration(&config);
        // "NoTelemetry" (11) + "1000TPS" (7) + 3
        assert_eq!(formatter.context_width, 21);
    }
}
