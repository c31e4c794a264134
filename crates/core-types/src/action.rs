//! Declarative browser steps as submitted by callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value token replaced by the delivered second-factor code in `type`/`select` steps.
pub const CODE_PLACEHOLDER: &str = "{{task.tfa_code}}";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    WaitVisible,
    WaitHidden,
    WaitDelay,
    Click,
    #[serde(rename = "type")]
    Type,
    Select,
    Scroll,
    Screenshot,
    #[serde(alias = "extract_content")]
    GetDom,
    RunScript,
    Login,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::WaitVisible => "wait_visible",
            ActionKind::WaitHidden => "wait_hidden",
            ActionKind::WaitDelay => "wait_delay",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Select => "select",
            ActionKind::Scroll => "scroll",
            ActionKind::Screenshot => "screenshot",
            ActionKind::GetDom => "get_dom",
            ActionKind::RunScript => "run_script",
            ActionKind::Login => "login",
        }
    }

    /// Steps after which the page may have moved on to a second-factor prompt.
    pub fn may_trigger_challenge(&self) -> bool {
        matches!(self, ActionKind::Navigate | ActionKind::Click)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output shape for content extraction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    FullHtml,
    SimplifiedHtml,
    #[default]
    TextContent,
}

impl ContentFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentFormat::FullHtml | ContentFormat::SimplifiedHtml => "text/html",
            ContentFormat::TextContent => "text/plain",
        }
    }
}

/// One declarative step. Which of `selector`, `value` and `format` matter depends on `kind`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            selector: String::new(),
            value: String::new(),
            format: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_format(mut self, format: ContentFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate).with_value(url)
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(ActionKind::Click).with_selector(selector)
    }

    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(ActionKind::Type)
            .with_selector(selector)
            .with_value(text)
    }

    pub fn wait_visible(selector: impl Into<String>) -> Self {
        Self::new(ActionKind::WaitVisible).with_selector(selector)
    }

    pub fn wait_delay(duration: impl Into<String>) -> Self {
        Self::new(ActionKind::WaitDelay).with_value(duration)
    }

    pub fn extract(selector: impl Into<String>, format: ContentFormat) -> Self {
        Self::new(ActionKind::GetDom)
            .with_selector(selector)
            .with_format(format)
    }

    pub fn run_script(script: impl Into<String>) -> Self {
        Self::new(ActionKind::RunScript).with_value(script)
    }

    pub fn login() -> Self {
        Self::new(ActionKind::Login)
    }

    /// Returns the selector if set, otherwise `default`.
    pub fn selector_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.selector.is_empty() {
            default
        } else {
            &self.selector
        }
    }
}
