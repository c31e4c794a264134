use std::time::Duration;

use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session slot became free within {0:?}")]
    AcquireTimeout(Duration),
    #[error("slot acquisition cancelled")]
    Cancelled,
    #[error("session pool closed")]
    Closed,
    #[error("failed to open browser session: {0}")]
    SessionOpen(#[source] AdapterError),
}

impl PoolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout(_))
    }
}
