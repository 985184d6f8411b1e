// MySQL / MariaDB destination pool backed by mysql_async
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};

use crate::error::PipelineError;
use crate::models::{mask_credentials, Dialect};
use crate::services::database::adapter::{ConnectionPool, PoolOptions, PooledConnection};

pub struct MySqlPool {
    pool: Pool,
    max_open: usize,
}

impl MySqlPool {
    pub fn new(dsn: &str, options: PoolOptions) -> Result<Self, PipelineError> {
        tracing::info!(
            "Creating MySQL connection pool for: {} (max_size: {}, min_idle: {})",
            mask_credentials(dsn),
            options.max_open,
            options.max_idle
        );

        let opts = Opts::from_url(dsn)
            .map_err(|e| PipelineError::Address(format!("Invalid MySQL URL: {}", e)))?;

        let constraints = PoolConstraints::new(options.max_idle, options.max_open).ok_or_else(|| {
            PipelineError::Connection(format!(
                "Invalid pool bounds: min {} > max {}",
                options.max_idle, options.max_open
            ))
        })?;
        // Session settings must survive checkout, so connections are not reset
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_abs_conn_ttl(options.max_lifetime)
            .with_reset_connection(false);

        let pool = Pool::new(OptsBuilder::from_opts(opts).pool_opts(pool_opts));

        Ok(Self {
            pool,
            max_open: options.max_open,
        })
    }
}

#[async_trait::async_trait]
impl ConnectionPool for MySqlPool {
    fn dialect(&self) -> Dialect {
        Dialect::MySQL
    }

    fn max_open(&self) -> usize {
        self.max_open
    }

    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PipelineError> {
        let conn = self.pool.get_conn().await.map_err(|e| {
            PipelineError::Connection(format!("Failed to get MySQL connection from pool: {}", e))
        })?;
        Ok(Box::new(MySqlConnection { conn }))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            tracing::warn!("Failed to disconnect MySQL pool: {}", e);
        }
    }
}

struct MySqlConnection {
    conn: Conn,
}

#[async_trait::async_trait]
impl PooledConnection for MySqlConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), PipelineError> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| PipelineError::Database(format!("Query execution failed: {}", e)))
    }

    async fn ping(&mut self) -> Result<(), PipelineError> {
        self.conn
            .ping()
            .await
            .map_err(|e| PipelineError::Connection(format!("MySQL ping failed: {}", e)))
    }
}
