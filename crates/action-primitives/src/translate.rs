//! Action → command translation.

use std::time::Duration;

use cdp_adapter::{BrowserCommand, ScrollTarget};
use handoff_core_types::{Action, ActionKind, Credentials, CODE_PLACEHOLDER};
use tracing::debug;

use crate::errors::ActionError;
use crate::login::login_sequence;

pub const DEFAULT_SCREENSHOT_QUALITY: u8 = 90;
pub const DEFAULT_EXTRACT_SELECTOR: &str = "body";

/// Translates one action into the command a driver executes.
///
/// `code` is the second-factor code delivered earlier in the job, if any. A `type` or
/// `select` value equal to the code placeholder is replaced by it; with no code the
/// placeholder is passed through verbatim.
pub fn translate(
    action: &Action,
    credentials: Option<&Credentials>,
    code: Option<&str>,
) -> Result<BrowserCommand, ActionError> {
    let kind = action.kind;
    let command = match kind {
        ActionKind::Navigate => BrowserCommand::Navigate {
            url: required(kind, "value", &action.value)?,
        },
        ActionKind::WaitVisible => BrowserCommand::WaitVisible {
            selector: required(kind, "selector", &action.selector)?,
        },
        ActionKind::WaitHidden => BrowserCommand::WaitHidden {
            selector: required(kind, "selector", &action.selector)?,
        },
        ActionKind::WaitDelay => BrowserCommand::Sleep {
            duration: parse_delay(&action.value)?,
        },
        ActionKind::Click => BrowserCommand::Click {
            selector: required(kind, "selector", &action.selector)?,
        },
        ActionKind::Type => BrowserCommand::TypeText {
            selector: required(kind, "selector", &action.selector)?,
            text: resolve_value(&action.value, code),
        },
        ActionKind::Select => BrowserCommand::SelectOption {
            selector: required(kind, "selector", &action.selector)?,
            value: resolve_value(&action.value, code),
        },
        ActionKind::Scroll => BrowserCommand::Scroll(scroll_target(action)?),
        ActionKind::Screenshot => BrowserCommand::Screenshot {
            quality: parse_quality(&action.value)?,
        },
        ActionKind::GetDom => BrowserCommand::ExtractContent {
            selector: action.selector_or(DEFAULT_EXTRACT_SELECTOR).to_string(),
            format: action.format.unwrap_or_default(),
        },
        ActionKind::RunScript => BrowserCommand::RunScript {
            script: required(kind, "value", &action.value)?,
        },
        ActionKind::Login => match credentials {
            Some(creds) if creds.is_complete() => login_sequence(creds),
            _ => return Err(ActionError::MissingCredentials),
        },
    };
    Ok(command)
}

/// Runs the same checks as [`translate`] without building a command.
pub fn validate(action: &Action, credentials: Option<&Credentials>) -> Result<(), ActionError> {
    translate(action, credentials, None).map(|_| ())
}

fn required(kind: ActionKind, field: &'static str, value: &str) -> Result<String, ActionError> {
    if value.trim().is_empty() {
        Err(ActionError::missing(kind, field))
    } else {
        Ok(value.to_string())
    }
}

fn resolve_value(value: &str, code: Option<&str>) -> String {
    match code {
        Some(code) if value == CODE_PLACEHOLDER && !code.is_empty() => {
            debug!("substituting delivered code into action value");
            code.to_string()
        }
        _ => value.to_string(),
    }
}

fn parse_delay(raw: &str) -> Result<Duration, ActionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ActionError::missing(ActionKind::WaitDelay, "value"));
    }
    humantime::parse_duration(trimmed)
        .map_err(|err| ActionError::invalid(ActionKind::WaitDelay, "value", err.to_string()))
}

fn parse_quality(raw: &str) -> Result<u8, ActionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_SCREENSHOT_QUALITY);
    }
    match trimmed.parse::<u8>() {
        Ok(quality) if quality <= 100 => Ok(quality),
        _ => Err(ActionError::invalid(
            ActionKind::Screenshot,
            "value",
            format!("expected quality 0-100, got {trimmed:?}"),
        )),
    }
}

fn scroll_target(action: &Action) -> Result<ScrollTarget, ActionError> {
    match action.value.trim().to_ascii_lowercase().as_str() {
        "top" => return Ok(ScrollTarget::Top),
        "bottom" => return Ok(ScrollTarget::Bottom),
        _ => {}
    }
    if !action.selector.trim().is_empty() {
        return Ok(ScrollTarget::Element(action.selector.clone()));
    }
    if action.value.trim().is_empty() {
        Err(ActionError::missing(ActionKind::Scroll, "selector"))
    } else {
        Err(ActionError::invalid(
            ActionKind::Scroll,
            "value",
            format!("expected top or bottom, got {:?}", action.value),
        ))
    }
}
