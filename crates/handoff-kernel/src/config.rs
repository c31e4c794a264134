//! Engine configuration: YAML document plus `HANDOFF_*` environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cdp_adapter::{AdapterMode, CdpConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub engine: EngineConfig,
    pub browser: BrowserSettings,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_sessions: usize,
    #[serde(with = "human_duration")]
    pub acquire_timeout: Duration,
    #[serde(with = "human_duration")]
    pub action_timeout: Duration,
    #[serde(with = "human_duration")]
    pub code_wait_timeout: Duration,
    #[serde(with = "human_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            acquire_timeout: Duration::from_secs(5 * 60),
            action_timeout: Duration::from_secs(30),
            code_wait_timeout: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub mode: AdapterMode,
    pub executable: String,
    pub headless: bool,
    pub user_data_dir: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Real,
            executable: String::new(),
            headless: true,
            user_data_dir: String::new(),
        }
    }
}

impl BrowserSettings {
    /// Driver configuration; an empty executable falls back to auto-detection.
    pub fn cdp_config(&self) -> CdpConfig {
        let mut cfg = CdpConfig::default();
        if !self.executable.trim().is_empty() {
            cfg.executable = PathBuf::from(self.executable.trim());
        }
        if !self.user_data_dir.trim().is_empty() {
            cfg.user_data_dir = Some(PathBuf::from(self.user_data_dir.trim()));
        }
        cfg.headless = self.headless;
        cfg
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    #[serde(with = "human_duration")]
    pub timeout: Duration,
    pub username: String,
    pub password: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl NotifyConfig {
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        (!self.username.is_empty()).then_some((self.username.as_str(), self.password.as_str()))
    }
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HandoffConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Applies `HANDOFF_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = get("HANDOFF_MAX_SESSIONS") {
            self.engine.max_sessions = raw
                .parse()
                .map_err(|_| ConfigError::invalid("HANDOFF_MAX_SESSIONS", format!("{raw:?} is not a number")))?;
        }
        if let Some(raw) = get("HANDOFF_ACTION_TIMEOUT") {
            self.engine.action_timeout = parse_duration("HANDOFF_ACTION_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("HANDOFF_CODE_WAIT_TIMEOUT") {
            self.engine.code_wait_timeout = parse_duration("HANDOFF_CODE_WAIT_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("HANDOFF_HEADLESS") {
            self.browser.headless = parse_bool("HANDOFF_HEADLESS", &raw)?;
        }
        if let Some(raw) = get("HANDOFF_CHROME") {
            self.browser.executable = raw;
        }
        if let Some(raw) = get("HANDOFF_LOG_LEVEL") {
            self.log.level = raw;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_sessions == 0 {
            return Err(ConfigError::invalid("engine.max_sessions", "must be at least 1"));
        }
        for (key, value) in [
            ("engine.acquire_timeout", self.engine.acquire_timeout),
            ("engine.action_timeout", self.engine.action_timeout),
            ("engine.code_wait_timeout", self.engine.code_wait_timeout),
            ("notify.timeout", self.notify.timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Copy safe to print: secrets blanked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.notify.password.is_empty() {
            copy.notify.password = "********".to_string();
        }
        copy
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|err| ConfigError::invalid(key, err.to_string()))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("{other:?} is not a boolean"))),
    }
}

mod human_duration {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = HandoffConfig::default();
        assert_eq!(cfg.engine.max_sessions, 10);
        assert_eq!(cfg.engine.action_timeout, Duration::from_secs(30));
        assert_eq!(cfg.engine.code_wait_timeout, Duration::from_secs(300));
        assert_eq!(cfg.engine.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(cfg.notify.timeout, Duration::from_secs(10));
        assert!(cfg.browser.headless);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_partial_yaml_with_human_durations() {
        let cfg = HandoffConfig::from_yaml_str(
            "engine:\n  max_sessions: 3\n  code_wait_timeout: 90s\nbrowser:\n  mode: stub\n",
        )
        .unwrap();
        assert_eq!(cfg.engine.max_sessions, 3);
        assert_eq!(cfg.engine.code_wait_timeout, Duration::from_secs(90));
        assert_eq!(cfg.engine.action_timeout, Duration::from_secs(30));
        assert!(cfg.browser.mode.is_stub());
    }

    #[test]
    fn rejects_unparseable_duration() {
        let err = HandoffConfig::from_yaml_str("engine:\n  action_timeout: whenever\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HANDOFF_MAX_SESSIONS", "4"),
            ("HANDOFF_ACTION_TIMEOUT", "2s"),
            ("HANDOFF_HEADLESS", "false"),
            ("HANDOFF_LOG_LEVEL", "debug"),
        ]);
        let mut cfg = HandoffConfig::default();
        cfg.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.engine.max_sessions, 4);
        assert_eq!(cfg.engine.action_timeout, Duration::from_secs(2));
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn zero_sessions_is_rejected_with_key() {
        let mut cfg = HandoffConfig::default();
        let err = cfg
            .apply_overrides_from(|key| (key == "HANDOFF_MAX_SESSIONS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn redacted_copy_hides_password() {
        let mut cfg = HandoffConfig::default();
        cfg.notify.username = "hook".into();
        cfg.notify.password = "s3cret".into();
        let rendered = serde_yaml::to_string(&cfg.redacted()).unwrap();
        assert!(!rendered.contains("s3cret"));
        assert!(!format!("{:?}", cfg.notify).contains("s3cret"));
        assert_eq!(cfg.notify.basic_auth(), Some(("hook", "s3cret")));
    }

    #[test]
    fn loads_from_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.yaml");
        std::fs::write(&path, "browser:\n  executable: /opt/chrome\nlog:\n  level: warn\n").unwrap();
        let cfg = HandoffConfig::from_path(&path).unwrap();
        assert_eq!(cfg.browser.executable, "/opt/chrome");
        assert_eq!(cfg.log.level, "warn");

        let missing = dir.path().join("absent.yaml");
        let err = HandoffConfig::from_path(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path == &missing));
    }

    #[test]
    fn durations_serialize_human_readable() {
        let rendered = serde_yaml::to_string(&HandoffConfig::default()).unwrap();
        assert!(rendered.contains("action_timeout: 30s"));
        assert!(rendered.contains("code_wait_timeout: 5m"));
    }
}
