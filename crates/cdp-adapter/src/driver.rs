use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::{BrowserCommand, CommandOutput};
use crate::error::AdapterError;
use crate::ids::SessionId;

/// Contract the engine consumes from the page-driving layer.
///
/// A session is one isolated page owned by a single job; it is opened once, driven
/// sequentially and closed once.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self) -> Result<SessionId, AdapterError>;

    async fn run(
        &self,
        session: &SessionId,
        command: &BrowserCommand,
    ) -> Result<CommandOutput, AdapterError>;

    async fn close(&self, session: &SessionId) -> Result<(), AdapterError>;

    async fn element_present(&self, session: &SessionId, selector: &str)
        -> Result<bool, AdapterError>;

    async fn visible_text(&self, session: &SessionId) -> Result<String, AdapterError>;

    /// Releases driver-wide resources (the browser process). Sessions still open are dropped.
    async fn shutdown(&self) {}
}

#[async_trait]
impl<D> BrowserDriver for Arc<D>
where
    D: BrowserDriver + ?Sized,
{
    async fn open(&self) -> Result<SessionId, AdapterError> {
        (**self).open().await
    }

    async fn run(
        &self,
        session: &SessionId,
        command: &BrowserCommand,
    ) -> Result<CommandOutput, AdapterError> {
        (**self).run(session, command).await
    }

    async fn close(&self, session: &SessionId) -> Result<(), AdapterError> {
        (**self).close(session).await
    }

    async fn element_present(
        &self,
        session: &SessionId,
        selector: &str,
    ) -> Result<bool, AdapterError> {
        (**self).element_present(session, selector).await
    }

    async fn visible_text(&self, session: &SessionId) -> Result<String, AdapterError> {
        (**self).visible_text(session).await
    }

    async fn shutdown(&self) {
        (**self).shutdown().await
    }
}
