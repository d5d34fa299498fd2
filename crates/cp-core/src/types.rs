use serde::{Deserialize, Serialize};

/// The task the user currently has selected in the panel, as handed to the
/// coding assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl TaskContext {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }
}
