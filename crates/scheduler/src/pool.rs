//! Bounded pool of browser sessions.
//!
//! A slot is a semaphore permit; a session is opened against a slot and the slot is
//! only handed back once the session has been closed, so the number of live sessions
//! never exceeds `max_sessions`.

use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{AdapterError, BrowserCommand, BrowserDriver, CommandOutput, SessionId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::metrics;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_sessions: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            acquire_timeout: Duration::from_secs(300),
        }
    }
}

/// One unit of pool capacity. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        metrics::record_acquired();
        Self { _permit: permit }
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        metrics::record_released();
    }
}

pub struct SessionPool {
    cfg: PoolConfig,
    slots: Arc<Semaphore>,
    driver: Arc<dyn BrowserDriver>,
}

impl SessionPool {
    pub fn new(driver: Arc<dyn BrowserDriver>, cfg: PoolConfig) -> Self {
        let max = cfg.max_sessions.max(1);
        Self {
            cfg: PoolConfig {
                max_sessions: max,
                ..cfg
            },
            slots: Arc::new(Semaphore::new(max)),
            driver,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        Arc::clone(&self.driver)
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free slot, the acquisition deadline, or `cancel`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SlotPermit, PoolError> {
        let waiting = self.slots.clone().acquire_owned();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                metrics::record_cancelled();
                Err(PoolError::Cancelled)
            }
            outcome = tokio::time::timeout(self.cfg.acquire_timeout, waiting) => match outcome {
                Ok(Ok(permit)) => {
                    debug!(available = self.available(), "session slot acquired");
                    Ok(SlotPermit::new(permit))
                }
                Ok(Err(_)) => Err(PoolError::Closed),
                Err(_) => {
                    metrics::record_timed_out();
                    warn!(timeout = ?self.cfg.acquire_timeout, "timed out waiting for a session slot");
                    Err(PoolError::AcquireTimeout(self.cfg.acquire_timeout))
                }
            }
        }
    }

    pub fn release(&self, slot: SlotPermit) {
        drop(slot);
    }

    /// Opens a fresh driver session bound to `slot`. On failure the slot is freed.
    pub async fn open_session(&self, slot: SlotPermit) -> Result<PooledSession, PoolError> {
        match self.driver.open().await {
            Ok(id) => {
                metrics::record_session_opened();
                debug!(session = %id, "browser session opened");
                Ok(PooledSession {
                    id,
                    driver: Arc::clone(&self.driver),
                    slot: Some(slot),
                })
            }
            Err(err) => {
                metrics::record_session_failed();
                drop(slot);
                Err(PoolError::SessionOpen(err))
            }
        }
    }

    /// Rejects every pending and future acquisition.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// A live session that owns its slot until closed.
pub struct PooledSession {
    id: SessionId,
    driver: Arc<dyn BrowserDriver>,
    slot: Option<SlotPermit>,
}

impl PooledSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn run(&self, command: &BrowserCommand) -> Result<CommandOutput, AdapterError> {
        self.driver.run(&self.id, command).await
    }

    pub async fn element_present(&self, selector: &str) -> Result<bool, AdapterError> {
        self.driver.element_present(&self.id, selector).await
    }

    pub async fn visible_text(&self) -> Result<String, AdapterError> {
        self.driver.visible_text(&self.id).await
    }

    /// Closes the session, then frees the slot.
    pub async fn close(mut self) -> Result<(), AdapterError> {
        let slot = self.slot.take();
        let outcome = self.driver.close(&self.id).await;
        drop(slot);
        debug!(session = %self.id, "browser session closed");
        outcome
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let driver = Arc::clone(&self.driver);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = driver.close(&id).await {
                        warn!(session = %id, %err, "closing dropped session failed");
                    }
                    drop(slot);
                });
            }
            Err(_) => warn!(session = %id, "session dropped outside a runtime; not closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{StubDriver, StubScript};

    fn pool(max: usize, timeout: Duration) -> (Arc<StubDriver>, SessionPool) {
        let driver = Arc::new(StubDriver::default());
        let pool = SessionPool::new(
            driver.clone(),
            PoolConfig {
                max_sessions: max,
                acquire_timeout: timeout,
            },
        );
        (driver, pool)
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let (_driver, pool) = pool(1, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let held = pool.acquire(&cancel).await.unwrap();
        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(err.is_timeout());
        drop(held);
        assert!(pool.acquire(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_observes_cancellation() {
        let (_driver, pool) = pool(1, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();
        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.cancel();
        });
        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
    }

    #[tokio::test]
    async fn slot_is_freed_only_after_session_close() {
        let (driver, pool) = pool(1, Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let slot = pool.acquire(&cancel).await.unwrap();
        let session = pool.open_session(slot).await.unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(driver.open_sessions(), 1);

        session.close().await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(driver.open_sessions(), 0);
        assert_eq!(driver.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn failed_open_returns_the_slot() {
        let driver = Arc::new(StubDriver::new(StubScript::new().failing_open()));
        let pool = SessionPool::new(driver, PoolConfig::default());
        let cancel = CancellationToken::new();
        let slot = pool.acquire(&cancel).await.unwrap();
        let err = pool.open_session(slot).await.err().unwrap();
        assert!(matches!(err, PoolError::SessionOpen(_)));
        assert_eq!(pool.available(), pool.config().max_sessions);
    }

    #[tokio::test]
    async fn dropped_session_is_closed_in_background() {
        let (driver, pool) = pool(1, Duration::from_millis(500));
        let cancel = CancellationToken::new();
        let slot = pool.acquire(&cancel).await.unwrap();
        let session = pool.open_session(slot).await.unwrap();
        drop(session);
        let slot = pool.acquire(&cancel).await.unwrap();
        assert_eq!(driver.open_sessions(), 0);
        drop(slot);
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let (_driver, pool) = pool(0, Duration::from_millis(10));
        assert_eq!(pool.config().max_sessions, 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn counters_track_acquire_and_release() {
        let before = metrics::snapshot();
        let (_driver, pool) = pool(2, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        drop(a);
        drop(b);
        let after = metrics::snapshot();
        assert!(after.acquired >= before.acquired + 2);
        assert!(after.released >= before.released + 2);
        assert!(after.peak_in_use >= 2);
    }
}
