// Source Adapters
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::models::{Address, DatabaseAddress};
use crate::services::database::{self, ConnectionPool, PoolOptions};
use crate::services::sink::Sink;
use crate::services::splitter::StatementReader;

/// Produces statements and pipes each into a sink
#[async_trait::async_trait]
pub trait Source: Send {
    /// Address of the source, safe to log
    fn describe(&self) -> String;

    /// Drive every statement into `sink`, ending with a flush.
    /// Returns the first error encountered.
    async fn pipe(&mut self, sink: &mut Sink, cancel: &CancellationToken) -> Result<(), PipelineError>;

    async fn close(&mut self) -> Result<(), PipelineError>;
}

type ScriptReader = Box<dyn AsyncRead + Send + Unpin>;

/// A SQL script read from a file, an HTTP body or an inline payload
pub struct ScriptSource {
    reader: Option<ScriptReader>,
    description: String,
}

impl ScriptSource {
    pub fn new(reader: ScriptReader, description: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            description: description.into(),
        }
    }

    pub async fn open(address: &Address) -> Result<Self, PipelineError> {
        let description = address.describe();
        let reader: ScriptReader = match address {
            Address::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    PipelineError::Io(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Box::new(file)
            }
            Address::Http(url) => {
                let response = reqwest::get(url.clone())
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| PipelineError::Io(format!("Failed to fetch {}: {}", description, e)))?;
                let body = response.bytes_stream().map_err(std::io::Error::other);
                Box::new(StreamReader::new(Box::pin(body)))
            }
            Address::Raw(bytes) => Box::new(std::io::Cursor::new(bytes.clone())),
            Address::Database(_) => {
                return Err(PipelineError::Address(
                    "a database address is not a script".to_string(),
                ))
            }
        };

        Ok(Self::new(reader, description))
    }
}

#[async_trait::async_trait]
impl Source for ScriptSource {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn pipe(&mut self, sink: &mut Sink, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let reader = self.reader.take().ok_or_else(|| {
            PipelineError::Internal(format!("{} was already piped", self.description))
        })?;
        let mut statements = StatementReader::new(reader, sink.dialect());

        while let Some(statement) = statements.next_statement().await? {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            sink.exec(&statement).await?;
        }

        sink.flush().await
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        self.reader = None;
        Ok(())
    }
}

/// A live source database; extraction is not supported yet, so piping is a no-op
pub struct DatabaseSource {
    address: DatabaseAddress,
    pool: Arc<dyn ConnectionPool>,
}

impl DatabaseSource {
    pub async fn open(
        address: &DatabaseAddress,
        options: PoolOptions,
        connect_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let pool = database::open(address, options, connect_timeout).await?;
        Ok(Self {
            address: address.clone(),
            pool,
        })
    }
}

#[async_trait::async_trait]
impl Source for DatabaseSource {
    fn describe(&self) -> String {
        self.address.masked()
    }

    async fn pipe(&mut self, _sink: &mut Sink, _cancel: &CancellationToken) -> Result<(), PipelineError> {
        debug!(
            "Streaming extraction from {} sources is not supported, nothing to pipe",
            self.address.dialect
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Open the source behind an address
pub async fn open_source(
    address: &str,
    options: PoolOptions,
    connect_timeout: Duration,
) -> Result<Box<dyn Source>, PipelineError> {
    let address = Address::parse(address)?;
    info!("Opening source {}", address.describe());

    match &address {
        Address::Database(db) => Ok(Box::new(
            DatabaseSource::open(db, options, connect_timeout).await?,
        )),
        _ => Ok(Box::new(ScriptSource::open(&address).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use crate::services::database::recording::RecordingPool;

    const SCRIPT: &str = "-- seed\nCREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n";

    fn sink_over(pool: &Arc<RecordingPool>) -> Sink {
        Sink::new(pool.clone(), 500, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_raw_script_is_piped_and_flushed() {
        let pool = Arc::new(RecordingPool::new(Dialect::MySQL, 4));
        let mut sink = sink_over(&pool);
        let mut source = open_source(&format!("raw://{}", SCRIPT), PoolOptions::default(), Duration::from_secs(1))
            .await
            .unwrap();

        source.pipe(&mut sink, &CancellationToken::new()).await.unwrap();
        source.close().await.unwrap();

        assert_eq!(
            pool.statements(),
            vec!["CREATE TABLE t (id INT);", "INSERT INTO `t` VALUES (1), (2)"]
        );
        assert_eq!(sink.stats().skipped, 1);
        assert_eq!(sink.buffered(), 0);
    }

    #[tokio::test]
    async fn test_base64_script() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode("SELECT 1;\n");
        let pool = Arc::new(RecordingPool::new(Dialect::SQLite, 2));
        let mut sink = sink_over(&pool);

        let mut source = open_source(
            &format!("raw+base64://{}", encoded),
            PoolOptions::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        source.pipe(&mut sink, &CancellationToken::new()).await.unwrap();

        assert_eq!(pool.statements(), vec!["SELECT 1;"]);
    }

    #[tokio::test]
    async fn test_file_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.sql");
        tokio::fs::write(&path, SCRIPT).await.unwrap();

        let pool = Arc::new(RecordingPool::new(Dialect::MySQL, 4));
        let mut sink = sink_over(&pool);
        let mut source = open_source(
            &format!("file://{}", path.display()),
            PoolOptions::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(source.describe().ends_with("seed.sql"));

        source.pipe(&mut sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(pool.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = open_source(
            "file:///definitely/not/here.sql",
            PoolOptions::default(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[tokio::test]
    async fn test_pipe_stops_when_cancelled() {
        let pool = Arc::new(RecordingPool::new(Dialect::MySQL, 4));
        let mut sink = sink_over(&pool);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut source = ScriptSource::new(Box::new(std::io::Cursor::new(SCRIPT.as_bytes().to_vec())), "raw");
        let result = source.pipe(&mut sink, &cancel).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(pool.log().is_empty());
    }

    #[tokio::test]
    async fn test_script_source_pipes_once() {
        let pool = Arc::new(RecordingPool::new(Dialect::MySQL, 4));
        let mut sink = sink_over(&pool);
        let mut source = ScriptSource::new(Box::new(std::io::Cursor::new(Vec::new())), "raw");

        source.pipe(&mut sink, &CancellationToken::new()).await.unwrap();
        assert!(matches!(
            source.pipe(&mut sink, &CancellationToken::new()).await,
            Err(PipelineError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_database_source_pipe_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let address = format!("sqlite://{}", dir.path().join("source.db").display());
        let pool = Arc::new(RecordingPool::new(Dialect::MySQL, 4));
        let mut sink = sink_over(&pool);

        let mut source = open_source(&address, PoolOptions::new(2, None, 0), Duration::from_secs(5))
            .await
            .unwrap();
        source.pipe(&mut sink, &CancellationToken::new()).await.unwrap();
        source.close().await.unwrap();

        assert!(pool.log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let result = open_source("ftp://example.com/x.sql", PoolOptions::default(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PipelineError::Address(_))));
    }
}
