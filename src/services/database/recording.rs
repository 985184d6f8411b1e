// In-memory pool that records every statement, for engine tests
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Barrier, OwnedRwLockWriteGuard, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::error::PipelineError;
use crate::models::Dialect;
use crate::services::database::adapter::{ConnectionPool, PooledConnection};

#[derive(Default)]
struct Shared {
    /// (connection id, sql) in execution order
    log: Mutex<Vec<(usize, String)>>,
    idle_ids: Mutex<Vec<usize>>,
    next_id: AtomicUsize,
    pings: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

pub(crate) struct RecordingPool {
    dialect: Dialect,
    max_open: usize,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
    failures: Arc<Vec<(String, String)>>,
    rendezvous: Option<(String, Arc<Barrier>)>,
    locking: Option<Arc<TableLock>>,
    ping_failures: usize,
}

/// A lock taken by one connection that stalls every other connection
struct TableLock {
    lock: String,
    unlock: String,
    table: Arc<RwLock<()>>,
}

impl RecordingPool {
    pub fn new(dialect: Dialect, max_open: usize) -> Self {
        Self {
            dialect,
            max_open,
            permits: Arc::new(Semaphore::new(max_open)),
            shared: Arc::new(Shared::default()),
            failures: Arc::new(Vec::new()),
            rendezvous: None,
            locking: None,
            ping_failures: 0,
        }
    }

    /// Statements containing `fragment` fail with `message`
    pub fn failing_on(mut self, fragment: &str, message: &str) -> Self {
        let mut failures = (*self.failures).clone();
        failures.push((fragment.to_string(), message.to_string()));
        self.failures = Arc::new(failures);
        self
    }

    /// Statements containing `fragment` wait until `parties` of them run at once
    pub fn rendezvous_on(mut self, fragment: &str, parties: usize) -> Self {
        self.rendezvous = Some((fragment.to_string(), Arc::new(Barrier::new(parties))));
        self
    }

    /// A statement containing `lock` blocks all other connections until the
    /// same connection runs one containing `unlock`
    pub fn locking_on(mut self, lock: &str, unlock: &str) -> Self {
        self.locking = Some(Arc::new(TableLock {
            lock: lock.to_string(),
            unlock: unlock.to_string(),
            table: Arc::new(RwLock::new(())),
        }));
        self
    }

    /// The first `count` pings fail
    pub fn with_ping_failures(mut self, count: usize) -> Self {
        self.ping_failures = count;
        self
    }

    pub fn log(&self) -> Vec<(usize, String)> {
        self.shared
            .log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log().into_iter().map(|(_, sql)| sql).collect()
    }

    /// Connection that executed the first statement containing `fragment`
    pub fn connection_of(&self, fragment: &str) -> Option<usize> {
        self.log()
            .into_iter()
            .find(|(_, sql)| sql.contains(fragment))
            .map(|(id, _)| id)
    }

    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

#[async_trait::async_trait]
impl ConnectionPool for RecordingPool {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn max_open(&self) -> usize {
        self.max_open
    }

    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PipelineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Connection("pool is closed".to_string()))?;

        let reused = self.shared.idle_ids.lock().ok().and_then(|mut ids| ids.pop());
        let id = reused.unwrap_or_else(|| self.shared.next_id.fetch_add(1, Ordering::SeqCst));

        Ok(Box::new(RecordingConnection {
            id,
            shared: self.shared.clone(),
            failures: self.failures.clone(),
            rendezvous: self.rendezvous.clone(),
            locking: self.locking.clone(),
            held: None,
            _permit: permit,
        }))
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        let attempt = self.shared.pings.fetch_add(1, Ordering::SeqCst);
        if attempt < self.ping_failures {
            return Err(PipelineError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.permits.close();
    }
}

struct RecordingConnection {
    id: usize,
    shared: Arc<Shared>,
    failures: Arc<Vec<(String, String)>>,
    rendezvous: Option<(String, Arc<Barrier>)>,
    locking: Option<Arc<TableLock>>,
    held: Option<OwnedRwLockWriteGuard<()>>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait::async_trait]
impl PooledConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), PipelineError> {
        if let Some(locking) = &self.locking {
            if self.held.is_some() {
                if sql.contains(locking.unlock.as_str()) {
                    self.held = None;
                }
            } else if sql.contains(locking.lock.as_str()) {
                self.held = Some(locking.table.clone().write_owned().await);
            } else {
                // waits while another connection holds the lock
                let _ = locking.table.read().await;
            }
        }

        let running = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some((fragment, barrier)) = &self.rendezvous {
            if sql.contains(fragment.as_str()) {
                barrier.wait().await;
            }
        }

        if let Ok(mut log) = self.shared.log.lock() {
            log.push((self.id, sql.to_string()));
        }
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.iter().find(|(fragment, _)| sql.contains(fragment.as_str())) {
            Some((_, message)) => Err(PipelineError::Database(message.clone())),
            None => Ok(()),
        }
    }

    async fn ping(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.shared.idle_ids.lock() {
            ids.push(self.id);
        }
    }
}
