//! The ordered list of actions run for every unit/case pair

pub mod action;
pub mod message;
pub mod process;
pub mod templates;

pub use action::{Action, ActionDescriptor, ActionEnvironment, ActionError, ActionType, DescriptorError};
pub use message::{ActionMessage, MessageSink};
pub use process::{ProcessError, RunResult};
pub use templates::{TemplateError, TemplateFunctions};

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("cannot resolve action [{descriptor}]: {message}")]
    Resolve { descriptor: String, message: String },
}

/// Actions in configured order. Built eagerly; the first invalid
/// descriptor aborts construction.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    actions: Vec<Action>,
    next: usize,
}

impl Pipeline {
    pub fn from_descriptors<S: AsRef<str>>(
        descriptors: &[S],
        root: &Path,
    ) -> Result<Self, PipelineError> {
        let actions = descriptors
            .iter()
            .map(|descriptor| Action::new(descriptor.as_ref(), root))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { actions, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Rewind the cursor to the first action
    pub fn restart(&mut self) {
        self.next = 0;
    }

    /// The next action, or `None` once the pipeline is exhausted
    pub fn next_action(&mut self) -> Option<&Action> {
        let action = self.actions.get(self.next)?;
        self.next += 1;
        Some(action)
    }
}
