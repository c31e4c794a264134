pub mod error;
pub mod metrics;
pub mod pool;

pub use error::PoolError;
pub use pool::{PoolConfig, PooledSession, SessionPool, SlotPermit};
