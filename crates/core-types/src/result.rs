use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Coarse classification of why a job did not complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A malformed or incomplete action.
    Validation,
    /// No slot or session could be obtained.
    Resource,
    /// A command failed against the live page.
    Execution,
    /// A code wait, slot wait or command deadline expired.
    Timeout,
    /// The engine shut down before the job finished.
    Cancelled,
}

/// Data produced by one action (extracted content, screenshot, script value).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub action_index: usize,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub data: Value,
}

/// Terminal outcome of a job, written once together with the terminal status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ActionOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<usize>,
}

impl JobResult {
    pub fn success(message: impl Into<String>, outputs: Vec<ActionOutput>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: (!outputs.is_empty()).then_some(outputs),
            ..Self::default()
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            failure_kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn at_action(mut self, index: usize) -> Self {
        self.failed_action = Some(index);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.failure_kind == Some(FailureKind::Timeout)
    }
}
