use tokio::sync::mpsc;

use crate::resource::{Gvk, ResourceInformation};

/// Progress reported by a running action, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ActionMessage {
    TemplateExpanded {
        descriptor: String,
        text: String,
    },
    TemplateExpansionFailed {
        descriptor: String,
        error: String,
        partial_text: Option<String>,
    },
    /// Created on the cluster; the receiver must track it
    ResourceCreated {
        gvk: Gvk,
        information: ResourceInformation,
    },
    ResourceCreationFailed {
        information: ResourceInformation,
        error: String,
    },
    WaitingForPod {
        information: ResourceInformation,
    },
    PodRunning {
        information: ResourceInformation,
    },
    WaitingForJob {
        information: ResourceInformation,
    },
    JobCompleted {
        information: ResourceInformation,
    },
    JobFailed {
        information: ResourceInformation,
        error: String,
    },
    ExecutionSucceeded {
        descriptor: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    ExecutionFailed {
        descriptor: String,
        error: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    ValuesTransformSucceeded {
        descriptor: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    ValuesTransformFailed {
        descriptor: String,
        error: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// Always the last message of an action
    ActionCompleted {
        descriptor: String,
        succeeded: bool,
    },
}

impl ActionMessage {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TemplateExpansionFailed { .. }
                | Self::ResourceCreationFailed { .. }
                | Self::JobFailed { .. }
                | Self::ExecutionFailed { .. }
                | Self::ValuesTransformFailed { .. }
                | Self::ActionCompleted {
                    succeeded: false,
                    ..
                }
        )
    }
}

/// Sending half handed to a running action.
///
/// Dropping the sink sends [`ActionMessage::ActionCompleted`], so every exit
/// path of an action, early returns and panics included, ends its stream.
/// Success is whatever was last recorded with [`MessageSink::succeeded`].
pub struct MessageSink {
    descriptor: String,
    sender: mpsc::UnboundedSender<ActionMessage>,
    succeeded: bool,
}

impl MessageSink {
    pub fn new(descriptor: impl Into<String>, sender: mpsc::UnboundedSender<ActionMessage>) -> Self {
        Self {
            descriptor: descriptor.into(),
            sender,
            succeeded: false,
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// A closed receiver is not an error for the action
    pub fn send(&self, message: ActionMessage) {
        let _ = self.sender.send(message);
    }

    pub fn succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for MessageSink {
    fn drop(&mut self) {
        let _ = self.sender.send(ActionMessage::ActionCompleted {
            descriptor: std::mem::take(&mut self.descriptor),
            succeeded: self.succeeded,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_sends_terminal_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let sink = MessageSink::new("executables/x.sh", tx);
            sink.send(ActionMessage::ExecutionFailed {
                descriptor: "executables/x.sh".into(),
                error: "exit status 1".into(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        }

        assert!(rx.try_recv().unwrap().is_failure());
        assert_eq!(
            rx.try_recv().unwrap(),
            ActionMessage::ActionCompleted {
                descriptor: "executables/x.sh".into(),
                succeeded: false
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_success_is_recorded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = MessageSink::new("resources/a.yaml", tx);
        sink.succeeded();
        drop(sink);

        assert_eq!(
            rx.try_recv().unwrap(),
            ActionMessage::ActionCompleted {
                descriptor: "resources/a.yaml".into(),
                succeeded: true
            }
        );
    }
}
