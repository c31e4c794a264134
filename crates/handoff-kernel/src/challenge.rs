//! Second-factor prompt detection and code submission.

use std::fmt;

use cdp_adapter::{AdapterError, BrowserCommand};
use handoff_scheduler::PooledSession;
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, warn};

/// Selectors that only appear on one-time-code prompts; checked in order.
pub const CODE_INPUT_SELECTORS: [&str; 6] = [
    "input[name='otp']",
    "input[name='security_code']",
    "input[autocomplete='one-time-code']",
    "#verification_code",
    "input[id*='2fa']",
    "input[id*='mfa']",
];

static PUSH_APPROVAL_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "approve the sign-in request",
        "approve this sign-in",
        "approve sign in request",
        "check your phone to approve",
        "tap yes on your phone",
        "we sent a notification to your",
    ]
});

static CODE_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "enter verification code",
        "two-factor authentication",
        "security code",
        "enter the code",
    ]
});

/// What kind of prompt was detected; decides which fields receive the code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeHint {
    Input,
    Button,
    Unknown,
}

impl ChallengeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeHint::Input => "input",
            ChallengeHint::Button => "button",
            ChallengeHint::Unknown => "unknown",
        }
    }

    pub fn code_field_selector(&self) -> &'static str {
        match self {
            ChallengeHint::Input => "input[type='text'], input[type='number'], input[type='tel']",
            ChallengeHint::Button | ChallengeHint::Unknown => {
                "input[name='code'], input[placeholder*='code'], input[aria-label*='code']"
            }
        }
    }

    /// Selector set used when submission with this hint fails.
    pub fn fallback(&self) -> ChallengeHint {
        match self {
            ChallengeHint::Unknown => ChallengeHint::Input,
            ChallengeHint::Input | ChallengeHint::Button => ChallengeHint::Unknown,
        }
    }
}

impl fmt::Display for ChallengeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CONFIRM_BUTTON_SELECTOR: &str = "button.confirm, button.verify";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Challenge {
    pub hint: ChallengeHint,
    /// The selector or phrase that matched.
    pub evidence: String,
}

/// Classifies lower-cased page text. Push-approval phrases win over code phrases.
pub fn classify_text(text: &str) -> Option<Challenge> {
    let lower = text.to_lowercase();
    if let Some(phrase) = PUSH_APPROVAL_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Some(Challenge {
            hint: ChallengeHint::Button,
            evidence: phrase.to_string(),
        });
    }
    CODE_PHRASES
        .iter()
        .find(|p| lower.contains(*p))
        .map(|phrase| Challenge {
            hint: ChallengeHint::Unknown,
            evidence: phrase.to_string(),
        })
}

/// Probes the live page for a second-factor prompt.
///
/// Probe failures are logged and count as "not present".
pub async fn detect(session: &PooledSession) -> Option<Challenge> {
    for selector in CODE_INPUT_SELECTORS {
        match session.element_present(selector).await {
            Ok(true) => {
                return Some(Challenge {
                    hint: ChallengeHint::Input,
                    evidence: selector.to_string(),
                })
            }
            Ok(false) => {}
            Err(err) => warn!(session = %session.id(), selector, %err, "challenge selector probe failed"),
        }
    }

    match session.visible_text().await {
        Ok(text) => classify_text(&text),
        Err(err) => {
            warn!(session = %session.id(), %err, "challenge text probe failed");
            None
        }
    }
}

/// Command sequence that enters `code` for a prompt of kind `hint`.
///
/// `with_field` only matters for [`ChallengeHint::Button`], where the code field is optional.
pub fn submission_command(hint: ChallengeHint, code: &str, with_field: bool) -> BrowserCommand {
    let field = hint.code_field_selector().to_string();
    let mut steps = Vec::new();
    if with_field || hint != ChallengeHint::Button {
        steps.push(BrowserCommand::WaitVisible {
            selector: field.clone(),
        });
        steps.push(BrowserCommand::Clear {
            selector: field.clone(),
        });
        steps.push(BrowserCommand::TypeText {
            selector: field.clone(),
            text: code.to_string(),
        });
    }
    match hint {
        ChallengeHint::Button => {
            steps.push(BrowserCommand::WaitVisible {
                selector: CONFIRM_BUTTON_SELECTOR.to_string(),
            });
            steps.push(BrowserCommand::Click {
                selector: CONFIRM_BUTTON_SELECTOR.to_string(),
            });
        }
        ChallengeHint::Input | ChallengeHint::Unknown => {
            steps.push(BrowserCommand::Submit { selector: field });
        }
    }
    BrowserCommand::Sequence(steps)
}

/// Enters the code, retrying once with the fallback selector set.
pub async fn submit_code(
    session: &PooledSession,
    hint: ChallengeHint,
    code: &str,
) -> Result<(), AdapterError> {
    let with_field = hint == ChallengeHint::Button
        && session
            .element_present(hint.code_field_selector())
            .await
            .unwrap_or(false);
    let first = session.run(&submission_command(hint, code, with_field)).await;
    let Err(err) = first else {
        return Ok(());
    };
    let fallback = hint.fallback();
    debug!(
        session = %session.id(),
        hint = %hint,
        fallback = %fallback,
        %err,
        "code submission failed, retrying with fallback selectors"
    );
    session
        .run(&submission_command(fallback, code, true))
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_phrases_map_to_unknown_hint() {
        let found = classify_text("Please ENTER THE CODE we sent to your email").unwrap();
        assert_eq!(found.hint, ChallengeHint::Unknown);
        assert_eq!(found.evidence, "enter the code");
    }

    #[test]
    fn push_approval_maps_to_button_hint() {
        let found =
            classify_text("Check your phone to approve. Two-factor authentication is on.").unwrap();
        assert_eq!(found.hint, ChallengeHint::Button);
    }

    #[test]
    fn ordinary_text_is_not_a_challenge() {
        assert!(classify_text("Welcome back, your dashboard is ready").is_none());
        assert!(classify_text("").is_none());
    }

    #[test]
    fn button_submission_clicks_confirm() {
        let cmd = submission_command(ChallengeHint::Button, "111222", false);
        let BrowserCommand::Sequence(steps) = cmd else {
            panic!("expected a sequence");
        };
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps.last(),
            Some(&BrowserCommand::Click {
                selector: CONFIRM_BUTTON_SELECTOR.to_string()
            })
        );
    }

    #[test]
    fn input_submission_types_then_submits() {
        let cmd = submission_command(ChallengeHint::Input, "654321", false);
        let BrowserCommand::Sequence(steps) = cmd else {
            panic!("expected a sequence");
        };
        let names: Vec<_> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["wait_visible", "clear", "type_text", "submit"]);
        assert!(matches!(&steps[2], BrowserCommand::TypeText { text, .. } if text == "654321"));
    }

    #[test]
    fn fallback_never_repeats_the_failed_set() {
        for hint in [ChallengeHint::Input, ChallengeHint::Button, ChallengeHint::Unknown] {
            assert_ne!(hint.fallback(), hint);
        }
    }
}
