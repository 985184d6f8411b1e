// Destination and source connection pools per driver
pub mod adapter;
pub mod mysql;
pub mod postgresql;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod recording;

pub use adapter::{ConnectionPool, PoolOptions, PooledConnection};
pub use mysql::MySqlPool;
pub use postgresql::PostgresPool;
pub use sqlite::SqlitePool;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PipelineError;
use crate::models::{DatabaseAddress, Dialect};

/// Delay between connectivity pings
pub const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Factory for the pool matching an address's dialect
pub fn connect(
    address: &DatabaseAddress,
    options: PoolOptions,
) -> Result<Arc<dyn ConnectionPool>, PipelineError> {
    match address.dialect {
        Dialect::PostgreSQL => Ok(Arc::new(PostgresPool::new(&address.dsn, options)?)),
        Dialect::MySQL => Ok(Arc::new(MySqlPool::new(&address.dsn, options)?)),
        Dialect::SQLite => Ok(Arc::new(SqlitePool::new(&address.dsn, options)?)),
        Dialect::Oracle | Dialect::SqlServer => Err(PipelineError::NotImplemented(format!(
            "no bundled driver for {} databases",
            address.dialect
        ))),
    }
}

/// Ping until the pool answers or `timeout` elapses
pub async fn wait_until_connected(
    pool: &dyn ConnectionPool,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(PING_INTERVAL);

    loop {
        ticker.tick().await;

        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(PING_INTERVAL);
        let result = match tokio::time::timeout(budget, pool.ping()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Connection("ping timed out".to_string())),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::error!("{} database is not reachable: {}", pool.dialect(), e);
                if Instant::now() >= deadline {
                    return Err(PipelineError::Connection(format!(
                        "{} database unreachable after {:?}: {}",
                        pool.dialect(),
                        timeout,
                        e
                    )));
                }
            }
        }
    }
}

/// Create a pool for `address` and wait for it to answer
pub async fn open(
    address: &DatabaseAddress,
    options: PoolOptions,
    connect_timeout: Duration,
) -> Result<Arc<dyn ConnectionPool>, PipelineError> {
    let pool = connect(address, options)?;
    wait_until_connected(pool.as_ref(), connect_timeout).await?;
    tracing::info!("Connected to {}", address.masked());
    Ok(pool)
}
