// Connection pool abstraction shared by every destination driver
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::Dialect;

/// Sizing and recycling limits for a destination pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_open: usize,
    pub max_idle: usize,
    pub max_lifetime: Option<Duration>,
}

impl PoolOptions {
    /// Pool size used when the configured maximum is not positive
    pub const DEFAULT_MAX_OPEN: usize = 25;

    /// Normalise raw configuration values.
    /// `max_idle` defaults to and is clamped by `max_open`; a zero lifetime means unlimited.
    pub fn new(max_open: i64, max_idle: Option<i64>, max_lifetime_secs: u64) -> Self {
        let max_open = if max_open <= 0 {
            Self::DEFAULT_MAX_OPEN
        } else {
            max_open as usize
        };
        let max_idle = match max_idle {
            Some(idle) if idle <= 0 => 0,
            Some(idle) => (idle as usize).min(max_open),
            None => max_open,
        };
        let max_lifetime = (max_lifetime_secs > 0).then(|| Duration::from_secs(max_lifetime_secs));

        Self {
            max_open,
            max_idle,
            max_lifetime,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_OPEN as i64, None, 0)
    }
}

/// A bounded set of interchangeable destination connections
#[async_trait::async_trait]
pub trait ConnectionPool: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Most connections ever open at once
    fn max_open(&self) -> usize;

    /// Check a connection out, waiting while the pool is exhausted
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PipelineError>;

    async fn ping(&self) -> Result<(), PipelineError> {
        let mut conn = self.acquire().await?;
        conn.ping().await
    }

    /// Release every idle connection and refuse new checkouts
    async fn close(&self);
}

/// A checked-out connection; dropping it hands it back to its pool
#[async_trait::async_trait]
pub trait PooledConnection: Send {
    /// Run SQL text without returning rows
    async fn execute(&mut self, sql: &str) -> Result<(), PipelineError>;

    async fn ping(&mut self) -> Result<(), PipelineError>;
}
