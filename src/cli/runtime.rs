use std::path::PathBuf;

use anyhow::{Context, Result};
use handoff_kernel::HandoffConfig;
use tokio::fs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG` wins over `level`; `debug` forces debug. Logs go to stderr so stdout
/// stays machine-readable.
pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Logging already initialised")?;

    Ok(())
}

pub struct LoadedConfig {
    pub config: HandoffConfig,
    pub path: PathBuf,
    /// False when the file did not exist and defaults were used.
    pub found: bool,
}

pub fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/handoff.yaml > ~/.config/handoff/config.yaml
    let local_config = PathBuf::from("config/handoff.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("handoff");
    path.push("config.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    let found = fs::try_exists(&path).await.unwrap_or(false);
    let mut config = if found {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        HandoffConfig::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?
    } else {
        HandoffConfig::default()
    };

    config
        .apply_env_overrides()
        .context("Invalid HANDOFF_* environment override")?;

    Ok(LoadedConfig {
        config,
        path,
        found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn explicit_missing_path_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(!loaded.found);
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.engine.max_sessions, 10);
    }

    #[tokio::test]
    async fn explicit_path_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  max_sessions: 4\n  action_timeout: 45s").unwrap();
        let path = file.path().to_path_buf();
        let loaded = load_config(Some(&path)).await.unwrap();
        assert!(loaded.found);
        assert_eq!(loaded.config.engine.max_sessions, 4);
        assert_eq!(
            loaded.config.engine.action_timeout,
            std::time::Duration::from_secs(45)
        );
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine: [not, a, map]").unwrap();
        let path = file.path().to_path_buf();
        assert!(load_config(Some(&path)).await.is_err());
    }
}
