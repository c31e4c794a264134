//! Task execution engine.
//!
//! [`TaskManager`] accepts jobs, runs each on its own tokio task against a bounded
//! pool of browser sessions, suspends a job when the page asks for a second-factor
//! code and resumes it once [`TaskManager::provide_code`] delivers one.

pub mod challenge;
pub mod config;
pub mod error;
mod executor;
pub mod manager;
pub mod notify;

pub use challenge::{Challenge, ChallengeHint};
pub use config::{BrowserSettings, ConfigError, EngineConfig, HandoffConfig, LogConfig, NotifyConfig};
pub use error::EngineError;
pub use manager::{JobEvent, TaskManager};
pub use notify::{CallbackPayload, Notifier};
