// SQLite destination pool; rusqlite connections driven on the blocking thread pool
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PipelineError;
use crate::models::Dialect;
use crate::services::database::adapter::{ConnectionPool, PoolOptions, PooledConnection};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct IdleConnection {
    conn: Connection,
    opened_at: Instant,
}

type IdleList = Arc<Mutex<Vec<IdleConnection>>>;

fn lock(idle: &IdleList) -> MutexGuard<'_, Vec<IdleConnection>> {
    idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SqlitePool {
    path: String,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    idle: IdleList,
}

impl SqlitePool {
    pub fn new(path: &str, options: PoolOptions) -> Result<Self, PipelineError> {
        let mut options = options;
        if path == ":memory:" && options.max_open > 1 {
            // every in-memory connection would see its own database
            tracing::warn!("SQLite in-memory destination limited to a single connection");
            options.max_open = 1;
            options.max_idle = 1;
        }

        tracing::info!(
            "Creating SQLite connection pool for: {} (max_size: {}, max_idle: {})",
            path,
            options.max_open,
            options.max_idle
        );

        Ok(Self {
            path: path.to_string(),
            permits: Arc::new(Semaphore::new(options.max_open)),
            options,
            idle: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn expired(&self, opened_at: Instant) -> bool {
        self.options
            .max_lifetime
            .is_some_and(|lifetime| opened_at.elapsed() > lifetime)
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = lock(&self.idle);
        while let Some(candidate) = idle.pop() {
            if !self.expired(candidate.opened_at) {
                return Some(candidate);
            }
        }
        None
    }

    async fn open(&self) -> Result<IdleConnection, PipelineError> {
        let path = self.path.clone();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        })
        .await?
        .map_err(|e| PipelineError::Connection(format!("Failed to open SQLite database: {}", e)))?;

        Ok(IdleConnection {
            conn,
            opened_at: Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl ConnectionPool for SqlitePool {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn max_open(&self) -> usize {
        self.options.max_open
    }

    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PipelineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Connection("SQLite pool is closed".to_string()))?;

        let idle = match self.take_idle() {
            Some(idle) => idle,
            None => self.open().await?,
        };

        Ok(Box::new(SqliteConnection {
            conn: Some(idle.conn),
            opened_at: idle.opened_at,
            options: self.options,
            idle: self.idle.clone(),
            _permit: permit,
        }))
    }

    async fn close(&self) {
        self.permits.close();
        lock(&self.idle).clear();
    }
}

struct SqliteConnection {
    conn: Option<Connection>,
    opened_at: Instant,
    options: PoolOptions,
    idle: IdleList,
    _permit: OwnedSemaphorePermit,
}

impl SqliteConnection {
    /// Run `work` on the blocking pool, handing the connection back afterwards
    async fn run<F>(&mut self, work: F) -> Result<rusqlite::Result<()>, PipelineError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()> + Send + 'static,
    {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| PipelineError::Internal("SQLite connection lost".to_string()))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&conn);
            (conn, result)
        })
        .await?;
        self.conn = Some(conn);
        Ok(result)
    }
}

#[async_trait::async_trait]
impl PooledConnection for SqliteConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), PipelineError> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql))
            .await?
            .map_err(|e| PipelineError::Database(format!("Query execution failed: {}", e)))
    }

    async fn ping(&mut self) -> Result<(), PipelineError> {
        self.run(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await?
            .map_err(|e| PipelineError::Connection(format!("SQLite ping failed: {}", e)))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let expired = self
            .options
            .max_lifetime
            .is_some_and(|lifetime| self.opened_at.elapsed() > lifetime);
        if expired {
            return;
        }

        let mut idle = lock(&self.idle);
        if idle.len() < self.options.max_idle {
            idle.push(IdleConnection {
                conn,
                opened_at: self.opened_at,
            });
        }
    }
}
