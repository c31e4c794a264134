use std::path::{Path, PathBuf};
use std::sync::Arc;

use handoff_kernel::HandoffConfig;

pub struct CliContext {
    config: Arc<HandoffConfig>,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: HandoffConfig, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn config(&self) -> &HandoffConfig {
        self.config.as_ref()
    }

    /// Where the configuration was looked up, whether or not the file exists.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
