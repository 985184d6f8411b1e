// PostgreSQL destination pool backed by deadpool-postgres
use std::time::Duration;

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::error::PipelineError;
use crate::models::{mask_credentials, Dialect};
use crate::services::database::adapter::{ConnectionPool, PoolOptions, PooledConnection};

pub struct PostgresPool {
    pool: Pool,
    max_open: usize,
    max_lifetime: Option<Duration>,
}

impl PostgresPool {
    pub fn new(dsn: &str, options: PoolOptions) -> Result<Self, PipelineError> {
        tracing::info!(
            "Creating PostgreSQL connection pool for: {} (max_size: {}, max_lifetime: {:?})",
            mask_credentials(dsn),
            options.max_open,
            options.max_lifetime
        );

        let mut cfg = PoolConfig::new();
        cfg.url = Some(dsn.to_string());
        // Fast recycling keeps session settings applied by broadcasts
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| {
                tracing::error!("Failed to create connection pool: {}", e);
                PipelineError::Connection(format!("Failed to create connection pool: {}", e))
            })?;
        pool.resize(options.max_open);

        Ok(Self {
            pool,
            max_open: options.max_open,
            max_lifetime: options.max_lifetime,
        })
    }
}

#[async_trait::async_trait]
impl ConnectionPool for PostgresPool {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }

    fn max_open(&self) -> usize {
        self.max_open
    }

    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PipelineError> {
        loop {
            let client = self.pool.get().await.map_err(|e| {
                PipelineError::Connection(format!("Failed to get connection from pool: {}", e))
            })?;

            if let Some(max_lifetime) = self.max_lifetime {
                if Object::metrics(&client).age() > max_lifetime {
                    tracing::debug!("Discarding PostgreSQL connection past its lifetime");
                    drop(Object::take(client));
                    continue;
                }
            }

            return Ok(Box::new(PostgresConnection { client }));
        }
    }

    async fn close(&self) {
        self.pool.close();
    }
}

struct PostgresConnection {
    client: Object,
}

#[async_trait::async_trait]
impl PooledConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), PipelineError> {
        self.client.batch_execute(sql).await.map_err(|e| {
            let error_details = if let Some(db_error) = e.as_db_error() {
                format!(
                    "Code: {}, Message: {}",
                    db_error.code().code(),
                    db_error.message()
                )
            } else {
                format!("{}", e)
            };
            PipelineError::Database(format!("Query execution failed: {}", error_details))
        })
    }

    async fn ping(&mut self) -> Result<(), PipelineError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Connection(format!("PostgreSQL ping failed: {}", e)))
    }
}
