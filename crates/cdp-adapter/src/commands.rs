//! Executable command vocabulary understood by every driver.

use std::time::Duration;

use handoff_core_types::ContentFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ScrollTarget {
    Top,
    Bottom,
    Element(String),
}

/// One executable automation command. `Sequence` runs its children in order and
/// stops at the first failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BrowserCommand {
    Navigate { url: String },
    WaitVisible { selector: String },
    WaitHidden { selector: String },
    Sleep { duration: Duration },
    Click { selector: String },
    TypeText { selector: String, text: String },
    Clear { selector: String },
    Submit { selector: String },
    SelectOption { selector: String, value: String },
    Scroll(ScrollTarget),
    Screenshot { quality: u8 },
    ExtractContent { selector: String, format: ContentFormat },
    RunScript { script: String },
    Sequence(Vec<BrowserCommand>),
}

impl BrowserCommand {
    /// Short label for logs. Never includes typed text.
    pub fn name(&self) -> &'static str {
        match self {
            BrowserCommand::Navigate { .. } => "navigate",
            BrowserCommand::WaitVisible { .. } => "wait_visible",
            BrowserCommand::WaitHidden { .. } => "wait_hidden",
            BrowserCommand::Sleep { .. } => "sleep",
            BrowserCommand::Click { .. } => "click",
            BrowserCommand::TypeText { .. } => "type_text",
            BrowserCommand::Clear { .. } => "clear",
            BrowserCommand::Submit { .. } => "submit",
            BrowserCommand::SelectOption { .. } => "select_option",
            BrowserCommand::Scroll(_) => "scroll",
            BrowserCommand::Screenshot { .. } => "screenshot",
            BrowserCommand::ExtractContent { .. } => "extract_content",
            BrowserCommand::RunScript { .. } => "run_script",
            BrowserCommand::Sequence(_) => "sequence",
        }
    }

    /// Number of leaf commands, counting each sequence child.
    pub fn step_count(&self) -> usize {
        match self {
            BrowserCommand::Sequence(steps) => steps.iter().map(Self::step_count).sum(),
            _ => 1,
        }
    }
}

/// Data returned by a command. Most commands return `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CommandOutput {
    #[default]
    None,
    Text { mime_type: &'static str, text: String },
    Image { mime_type: &'static str, bytes: Vec<u8> },
    Json(Value),
}

impl CommandOutput {
    pub fn is_none(&self) -> bool {
        matches!(self, CommandOutput::None)
    }
}
