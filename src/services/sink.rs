// Execution Engine
//
// Routes each classified statement to a connection: buffered INSERT batches
// flushed through a bounded worker pool, a sentry connection pinned while a
// transaction is open, and broadcasts for session-scoped statements.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{preview, PipelineError};
use crate::models::{Classification, Dialect, DmlLevel, Insert, Statement, TclLevel};
use crate::services::classifier::{parser_for, StatementParser};
use crate::services::database::{ConnectionPool, PooledConnection};
use crate::services::worker_pool::WorkerPool;

/// Rows per prefix that trigger a flush when no cap is configured
pub const DEFAULT_BATCH_CAP: usize = 500;

/// Counters reported when a pipe finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Statements sent to the destination, batches included
    pub executed: u64,
    /// Statements classified Unknown and not executed
    pub skipped: u64,
    /// Rows that went through the INSERT buffers
    pub buffered_rows: u64,
    /// Multi-row statements built by flushes
    pub batches: u64,
    pub flushes: u64,
}

/// The connection reserved for an open transaction
struct Sentry {
    conn: Box<dyn PooledConnection>,
    depth: usize,
}

/// Execute one statement, treating the dialect's harmless errors as success
async fn run(conn: &mut dyn PooledConnection, dialect: Dialect, sql: &str) -> Result<(), PipelineError> {
    match conn.execute(sql).await {
        Ok(()) => {
            trace!("Executed: {}", preview(sql));
            Ok(())
        }
        Err(e) if dialect.is_harmless_error(&e.to_string()) => {
            debug!("Ignored harmless error for {}: {}", preview(sql), e);
            Ok(())
        }
        Err(e) => Err(PipelineError::execution(sql, e)),
    }
}

/// Run each statement, in order, on `wanted` distinct pooled connections at once
async fn run_on_pool(
    pool: &dyn ConnectionPool,
    dialect: Dialect,
    statements: &[String],
    wanted: usize,
) -> Result<(), PipelineError> {
    // held together so each checkout is a distinct connection
    let mut conns = Vec::with_capacity(wanted);
    for _ in 0..wanted {
        conns.push(pool.acquire().await?);
    }

    let results = futures::future::join_all(conns.iter_mut().map(|conn| async move {
        for sql in statements {
            run(conn.as_mut(), dialect, sql).await?;
        }
        Ok::<(), PipelineError>(())
    }))
    .await;
    results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

/// Destination side of a pipe
pub struct Sink {
    pool: Arc<dyn ConnectionPool>,
    parser: Box<dyn StatementParser>,
    batch_cap: usize,
    /// Buffered rows per prefix, in first-seen order
    buffers: Vec<(String, Vec<String>)>,
    buffered_rows: usize,
    sentry: Option<Sentry>,
    /// Session statements run on the sentry, replayed on the pool once it is released
    deferred: Vec<String>,
    /// The only connection used when the pool holds a single connection
    pinned: Option<Box<dyn PooledConnection>>,
    cancel: CancellationToken,
    stats: SinkStats,
}

impl Sink {
    pub fn new(pool: Arc<dyn ConnectionPool>, batch_cap: usize, cancel: CancellationToken) -> Self {
        let parser = parser_for(pool.dialect());
        let batch_cap = if batch_cap == 0 {
            DEFAULT_BATCH_CAP
        } else {
            batch_cap
        };

        Self {
            pool,
            parser,
            batch_cap,
            buffers: Vec::new(),
            buffered_rows: 0,
            sentry: None,
            deferred: Vec::new(),
            pinned: None,
            cancel,
            stats: SinkStats::default(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.parser.dialect()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Rows waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffered_rows
    }

    pub fn in_transaction(&self) -> bool {
        self.sentry.is_some()
    }

    fn single_connection(&self) -> bool {
        self.pool.max_open() <= 1
    }

    /// Classify and route one statement
    pub async fn exec(&mut self, statement: &Statement) -> Result<(), PipelineError> {
        let text = statement.text();
        let parsed = self.parser.parse(text)?;

        if parsed.is_unknown() {
            trace!("Skipped statement: {}", preview(text));
            self.stats.skipped += 1;
            return Ok(());
        }

        if self.single_connection() {
            return self.execute_pinned(text).await;
        }

        match parsed.classification {
            Classification::TransactionControl(TclLevel::Begin) => {
                self.flush().await?;
                self.begin(text).await
            }
            Classification::TransactionControl(TclLevel::End) => {
                self.flush().await?;
                self.end(text).await
            }
            Classification::ControlLanguage | Classification::DefinitionLanguage => {
                self.flush().await?;
                self.execute_exclusive(text).await
            }
            Classification::Manipulation(DmlLevel::SingleSession) => {
                match self.parser.decompose(&parsed) {
                    Some(insert) => self.buffer(insert).await,
                    None => {
                        self.flush().await?;
                        self.execute_exclusive(text).await
                    }
                }
            }
            Classification::Manipulation(DmlLevel::MultiSession) => {
                self.flush().await?;
                self.broadcast(text).await
            }
            Classification::Unknown => Ok(()),
        }
    }

    /// Execute every buffered batch and clear the buffers
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        if self.buffers.is_empty() {
            return Ok(());
        }

        // cleared whether or not the batches succeed
        let buffers = std::mem::take(&mut self.buffers);
        let rows = std::mem::take(&mut self.buffered_rows);
        let statements: Vec<String> = buffers
            .iter()
            .map(|(prefix, values)| Insert::assemble(prefix, values))
            .collect();
        let batches = statements.len() as u64;
        let dialect = self.dialect();

        debug!("Flushing {} batches ({} rows)", batches, rows);
        self.stats.flushes += 1;

        if let Some(sentry) = self.sentry.as_mut() {
            // buffered rows belong to the open transaction
            for sql in &statements {
                run(sentry.conn.as_mut(), dialect, sql).await?;
                self.stats.batches += 1;
                self.stats.executed += 1;
            }
            return Ok(());
        }

        let mut workers = WorkerPool::new(self.pool.max_open(), &self.cancel);
        for sql in statements {
            let pool = self.pool.clone();
            let dispatched = workers
                .spawn(async move {
                    let mut conn = pool.acquire().await?;
                    run(conn.as_mut(), dialect, &sql).await
                })
                .await;
            if !dispatched {
                break;
            }
        }
        workers.wait().await?;

        self.stats.batches += batches;
        self.stats.executed += batches;
        Ok(())
    }

    /// Flush, drop any transaction state and close the pool
    pub async fn close(&mut self) -> Result<(), PipelineError> {
        let flushed = self.flush().await;

        if let Some(sentry) = self.sentry.take() {
            warn!(
                "Closing {} destination with an open transaction (depth {}, {} session statements not replayed)",
                self.dialect(),
                sentry.depth,
                self.deferred.len()
            );
        }
        self.deferred.clear();
        self.pinned = None;
        self.pool.close().await;

        flushed
    }

    async fn buffer(&mut self, insert: Insert) -> Result<(), PipelineError> {
        let Insert { prefix, values } = insert;
        let rows = values.len();

        let pending = match self.buffers.iter_mut().find(|(buffered, _)| *buffered == prefix) {
            Some((_, buffered)) => {
                buffered.extend(values);
                buffered.len()
            }
            None => {
                self.buffers.push((prefix, values));
                rows
            }
        };
        self.buffered_rows += rows;
        self.stats.buffered_rows += rows as u64;

        if pending >= self.batch_cap || self.buffers.len() >= self.pool.max_open() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn begin(&mut self, sql: &str) -> Result<(), PipelineError> {
        let dialect = self.dialect();
        if self.sentry.is_none() {
            let conn = self.pool.acquire().await?;
            self.sentry = Some(Sentry { conn, depth: 0 });
        }
        let Some(sentry) = self.sentry.as_mut() else {
            return Err(PipelineError::Internal("sentry connection missing".to_string()));
        };

        let result = run(sentry.conn.as_mut(), dialect, sql).await;
        if result.is_ok() {
            sentry.depth += 1;
            self.stats.executed += 1;
        } else if sentry.depth == 0 {
            self.sentry = None;
        }
        result
    }

    async fn end(&mut self, sql: &str) -> Result<(), PipelineError> {
        let dialect = self.dialect();
        let Some(sentry) = self.sentry.as_mut() else {
            warn!("Transaction end without an open transaction: {}", preview(sql));
            return self.execute_exclusive(sql).await;
        };

        let result = run(sentry.conn.as_mut(), dialect, sql).await;
        sentry.depth = sentry.depth.saturating_sub(1);
        if sentry.depth > 0 {
            result?;
            self.stats.executed += 1;
            return Ok(());
        }

        let released = self.sentry.take();
        let deferred = std::mem::take(&mut self.deferred);
        result?;
        self.stats.executed += 1;

        if !deferred.is_empty() {
            // the old sentry stays checked out so the replay reaches every other connection
            debug!("Replaying {} session statements after transaction end", deferred.len());
            let wanted = self.pool.max_open().saturating_sub(1);
            let replayed = run_on_pool(self.pool.as_ref(), dialect, &deferred, wanted).await;
            drop(released);
            replayed?;
        }
        Ok(())
    }

    /// Run on the sentry inside a transaction, otherwise on one pooled connection
    async fn execute_exclusive(&mut self, sql: &str) -> Result<(), PipelineError> {
        let dialect = self.dialect();
        match self.sentry.as_mut() {
            Some(sentry) => run(sentry.conn.as_mut(), dialect, sql).await?,
            None => {
                let mut conn = self.pool.acquire().await?;
                run(conn.as_mut(), dialect, sql).await?;
            }
        }
        self.stats.executed += 1;
        Ok(())
    }

    /// Run on every connection the pool may hold.
    ///
    /// Inside a transaction only the sentry runs it right away. Pooled
    /// connections could block on locks the sentry holds, so they get the
    /// statement when the transaction ends.
    async fn broadcast(&mut self, sql: &str) -> Result<(), PipelineError> {
        let dialect = self.dialect();
        if let Some(sentry) = self.sentry.as_mut() {
            run(sentry.conn.as_mut(), dialect, sql).await?;
            self.deferred.push(sql.to_string());
            self.stats.executed += 1;
            return Ok(());
        }

        run_on_pool(self.pool.as_ref(), dialect, &[sql.to_string()], self.pool.max_open()).await?;
        self.stats.executed += 1;
        Ok(())
    }

    /// Single-connection mode: everything runs in order on one connection
    async fn execute_pinned(&mut self, sql: &str) -> Result<(), PipelineError> {
        let dialect = self.dialect();
        if self.pinned.is_none() {
            self.pinned = Some(self.pool.acquire().await?);
        }
        let Some(conn) = self.pinned.as_mut() else {
            return Err(PipelineError::Internal("pinned connection missing".to_string()));
        };
        run(conn.as_mut(), dialect, sql).await?;
        self.stats.executed += 1;
        Ok(())
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if self.buffered_rows > 0 {
            warn!(
                "Sink dropped with {} buffered rows in {} batches that were never flushed",
                self.buffered_rows,
                self.buffers.len()
            );
        }
    }
}
