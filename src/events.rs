//! Progress events
//!
//! Every event carries the unit and case it happened under, so a consumer
//! can render it without tracking any state of its own.

use std::fmt;

use tokio::sync::mpsc;

use crate::pipeline::ActionMessage;
use crate::resource::ResourceInformation;

/// Unit and case an event belongs to; empty strings when not yet scoped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    pub unit: String,
    pub case: String,
}

impl EventContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_unit(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            case: String::new(),
        }
    }

    pub fn for_case(unit: &str, case: &str) -> Self {
        Self {
            unit: unit.to_string(),
            case: case.to_string(),
        }
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.unit.is_empty(), self.case.is_empty()) {
            (true, _) => Ok(()),
            (false, true) => f.write_str(&self.unit),
            (false, false) => write!(f, "{}/{}", self.unit, self.case),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    UnitStarted,
    UnitCompleted,
    CaseStarted,
    CaseCompleted,
    TestingCompleted,
    PipelineDefinitionInvalid { error: String },

    DirectoryCreated { path: String },
    DirectoryCreationFailed { path: String, error: String },
    ArtifactWriteFailed { path: String, error: String },

    /// `basename` is the generateName prefix the server expands
    CreatingDefaultNamespace { basename: String },
    TemplateExpanded { descriptor: String },
    TemplateExpansionFailed { descriptor: String, error: String },
    ResourceCreated { information: ResourceInformation },
    ResourceCreationFailed { information: ResourceInformation, error: String },
    ResourceDeleted { information: ResourceInformation },
    ResourceDeletionFailed { information: ResourceInformation, error: String },

    WaitingForPod { information: ResourceInformation },
    PodRunning { information: ResourceInformation },
    WaitingForJob { information: ResourceInformation },
    JobCompleted { information: ResourceInformation },
    JobFailed { information: ResourceInformation, error: String },

    ExecutionSucceeded { descriptor: String },
    ExecutionFailed { descriptor: String, error: String },
    ValuesTransformSucceeded { descriptor: String },
    ValuesTransformFailed { descriptor: String, error: String },

    ArchiveCreated { path: String },
    ArchiveCreationFailed { path: String, error: String },
    AssetDirectoryRemoved { path: String },
    AssetDirectoryRemovalFailed { path: String, error: String },
}

impl EventKind {
    /// Error text carried by a failure kind
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::PipelineDefinitionInvalid { error }
            | Self::DirectoryCreationFailed { error, .. }
            | Self::ArtifactWriteFailed { error, .. }
            | Self::TemplateExpansionFailed { error, .. }
            | Self::ResourceCreationFailed { error, .. }
            | Self::ResourceDeletionFailed { error, .. }
            | Self::JobFailed { error, .. }
            | Self::ExecutionFailed { error, .. }
            | Self::ValuesTransformFailed { error, .. }
            | Self::ArchiveCreationFailed { error, .. }
            | Self::AssetDirectoryRemovalFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }

    /// Testing completed, or any failure. Only teardown and cleanup events
    /// can follow one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TestingCompleted) || self.is_failure()
    }

    /// Map an action's progress message; `ActionCompleted` has no event of
    /// its own
    pub fn from_message(message: &ActionMessage) -> Option<Self> {
        let kind = match message.clone() {
            ActionMessage::TemplateExpanded { descriptor, .. } => Self::TemplateExpanded { descriptor },
            ActionMessage::TemplateExpansionFailed {
                descriptor, error, ..
            } => Self::TemplateExpansionFailed { descriptor, error },
            ActionMessage::ResourceCreated { information, .. } => Self::ResourceCreated { information },
            ActionMessage::ResourceCreationFailed { information, error } => {
                Self::ResourceCreationFailed { information, error }
            }
            ActionMessage::WaitingForPod { information } => Self::WaitingForPod { information },
            ActionMessage::PodRunning { information } => Self::PodRunning { information },
            ActionMessage::WaitingForJob { information } => Self::WaitingForJob { information },
            ActionMessage::JobCompleted { information } => Self::JobCompleted { information },
            ActionMessage::JobFailed { information, error } => Self::JobFailed { information, error },
            ActionMessage::ExecutionSucceeded { descriptor, .. } => Self::ExecutionSucceeded { descriptor },
            ActionMessage::ExecutionFailed {
                descriptor, error, ..
            } => Self::ExecutionFailed { descriptor, error },
            ActionMessage::ValuesTransformSucceeded { descriptor, .. } => {
                Self::ValuesTransformSucceeded { descriptor }
            }
            ActionMessage::ValuesTransformFailed {
                descriptor, error, ..
            } => Self::ValuesTransformFailed { descriptor, error },
            ActionMessage::ActionCompleted { .. } => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub context: EventContext,
    pub kind: EventKind,
}

impl Event {
    pub fn new(context: EventContext, kind: EventKind) -> Self {
        Self { context, kind }
    }

    pub fn is_failure(&self) -> bool {
        self.kind.is_failure()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Builds events and hands them to the consumer. A dropped receiver is
/// ignored; the run itself does not depend on anyone listening.
#[derive(Debug, Clone)]
pub struct EventReporter {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventReporter {
    pub fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self { sender }
    }

    /// A reporter and the receiving end of its stream
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn emit(&self, context: &EventContext, kind: EventKind) {
        let _ = self.sender.send(Event::new(context.clone(), kind));
    }

    pub fn unit_started(&self, unit: &str) {
        self.emit(&EventContext::for_unit(unit), EventKind::UnitStarted);
    }

    pub fn unit_completed(&self, unit: &str) {
        self.emit(&EventContext::for_unit(unit), EventKind::UnitCompleted);
    }

    pub fn case_started(&self, context: &EventContext) {
        self.emit(context, EventKind::CaseStarted);
    }

    pub fn case_completed(&self, context: &EventContext) {
        self.emit(context, EventKind::CaseCompleted);
    }

    pub fn testing_completed(&self) {
        self.emit(&EventContext::none(), EventKind::TestingCompleted);
    }

    pub fn pipeline_invalid(&self, error: &dyn fmt::Display) {
        self.emit(
            &EventContext::none(),
            EventKind::PipelineDefinitionInvalid {
                error: error.to_string(),
            },
        );
    }

    /// Forward an action message; returns whether an event was emitted
    pub fn action_message(&self, context: &EventContext, message: &ActionMessage) -> bool {
        match EventKind::from_message(message) {
            Some(kind) => {
                self.emit(context, kind);
                true
            }
            None => false,
        }
    }

    pub fn resource_deleted(&self, context: &EventContext, information: ResourceInformation) {
        self.emit(context, EventKind::ResourceDeleted { information });
    }

    pub fn resource_deletion_failed(
        &self,
        context: &EventContext,
        information: ResourceInformation,
        error: &dyn fmt::Display,
    ) {
        self.emit(
            context,
            EventKind::ResourceDeletionFailed {
                information,
                error: error.to_string(),
            },
        );
    }
}
