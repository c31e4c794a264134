//! Login credentials and second-factor hints attached to a job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Username/password pair for the `login` step.
///
/// Accepted on input but never serialized back out, and redacted from `Debug`.
#[derive(Clone, Default, Eq, PartialEq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TfaProvider {
    #[default]
    Email,
    Sms,
    App,
}

/// What the caller expects from a second-factor prompt. Carries no verification logic.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SecondFactorConfig {
    #[serde(default)]
    pub expected: bool,
    #[serde(default)]
    pub provider: TfaProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl SecondFactorConfig {
    pub fn expected(provider: TfaProvider) -> Self {
        Self {
            expected: true,
            provider,
            ..Self::default()
        }
    }

    /// Provider-specific contact hint surfaced to whoever supplies the code.
    pub fn contact_hint(&self) -> Option<&str> {
        match self.provider {
            TfaProvider::Email => self.email.as_deref(),
            TfaProvider::Sms => self.phone_number.as_deref(),
            TfaProvider::App => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("alice", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn incomplete_credentials_detected() {
        assert!(Credentials::new("alice", "pw").is_complete());
        assert!(!Credentials::new("alice", "").is_complete());
        assert!(!Credentials::default().is_complete());
    }

    #[test]
    fn contact_hint_follows_provider() {
        let cfg: SecondFactorConfig = serde_json::from_value(json!({
            "expected": true,
            "provider": "sms",
            "email": "a@example.com",
            "phone_number": "+15550100",
        }))
        .unwrap();
        assert_eq!(cfg.contact_hint(), Some("+15550100"));
        assert_eq!(SecondFactorConfig::expected(TfaProvider::App).contact_hint(), None);
    }
}
