// One pipe run: open both ends, stream statements, close, report
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::Address;
use crate::services::database;
use crate::services::sink::{Sink, SinkStats};
use crate::services::source::open_source;

/// Outcome of a successful pipe
#[derive(Debug, Clone, Copy)]
pub struct PipeReport {
    pub stats: SinkStats,
    pub cost: Duration,
}

/// Pipe the configured source into the configured destination.
///
/// The source is split with the destination's dialect. Both ends are closed
/// whatever the outcome, and the first error wins.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<PipeReport, PipelineError> {
    let started = Instant::now();
    let connect_timeout = config.pipeline.connect_timeout();

    let destination = Address::parse_database(&config.destination.address)?;
    let pool = database::open(&destination, config.destination.pool_options(), connect_timeout).await?;
    let mut sink = Sink::new(pool, config.destination.batch_cap, cancel.clone());

    let mut source = match open_source(
        &config.source.address,
        config.source.pool_options(),
        connect_timeout,
    )
    .await
    {
        Ok(source) => source,
        Err(e) => {
            if let Err(close_err) = sink.close().await {
                warn!("Failed to close destination: {}", close_err);
            }
            return Err(e);
        }
    };

    info!("Piping {} into {}", source.describe(), destination.masked());

    let piped = tokio::select! {
        result = source.pipe(&mut sink, &cancel) => result,
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
    };
    let source_closed = source.close().await;
    let sink_closed = sink.close().await;

    piped?;
    sink_closed?;
    source_closed?;

    let report = PipeReport {
        stats: sink.stats(),
        cost: started.elapsed(),
    };
    info!(
        "Pipe into {} finished: {} executed, {} skipped, {} rows in {} batches, cost {:?}",
        destination.masked(),
        report.stats.executed,
        report.stats.skipped,
        report.stats.buffered_rows,
        report.stats.batches,
        report.cost
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationConfig, LoggingConfig, PipelineConfig, SourceConfig};
    use std::path::Path;

    const SEED: &str = "\
-- schema
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, note TEXT);

/* seed rows */
INSERT INTO users (id, name) VALUES (1, 'ann');
INSERT INTO users (id, name) VALUES (2, 'bo;b');
INSERT INTO orders (id, user_id, note) VALUES (10, 1, 'it''s here');
BEGIN;
INSERT INTO orders (id, user_id, note) VALUES (11, 2, NULL);
UPDATE users SET name = 'bob' WHERE id = 2;
COMMIT;
INSERT INTO users (id, name) VALUES (3, 'cy'), (4, 'di');
";

    fn config(source: String, destination: &Path, conn_max: i64) -> Config {
        Config {
            source: SourceConfig {
                address: source,
                conn_max: 1,
            },
            destination: DestinationConfig {
                address: format!("sqlite://{}", destination.display()),
                conn_max,
                conn_max_idle: None,
                conn_max_lifetime_secs: 0,
                batch_cap: 500,
            },
            pipeline: PipelineConfig {
                timeout_secs: 60,
                connect_timeout_secs: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    fn rows(path: &Path, sql: &str) -> Vec<(i64, String)> {
        let conn = rusqlite::Connection::open(path).unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
        })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
    }

    async fn pipe_seed(conn_max: i64) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("seed.sql");
        let destination = dir.path().join("dest.db");
        tokio::fs::write(&script, SEED).await.unwrap();

        let config = config(format!("file://{}", script.display()), &destination, conn_max);
        let report = run(&config, CancellationToken::new()).await.unwrap();

        assert_eq!(report.stats.skipped, 2);
        // a single connection executes inserts as they come
        let expected_rows = if conn_max > 1 { 6 } else { 0 };
        assert_eq!(report.stats.buffered_rows, expected_rows);
        assert_eq!(
            rows(&destination, "SELECT id, name FROM users ORDER BY id"),
            vec![
                (1, "ann".to_string()),
                (2, "bob".to_string()),
                (3, "cy".to_string()),
                (4, "di".to_string()),
            ]
        );
        assert_eq!(
            rows(&destination, "SELECT id, note FROM orders ORDER BY id"),
            vec![(10, "it's here".to_string()), (11, String::new())]
        );
    }

    #[tokio::test]
    async fn test_pipe_file_into_sqlite_single_connection() {
        pipe_seed(1).await;
    }

    #[tokio::test]
    async fn test_pipe_file_into_sqlite_pooled() {
        pipe_seed(2).await;
    }

    #[tokio::test]
    async fn test_pipe_reports_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("dest.db");
        let config = config(
            "raw://INSERT INTO missing VALUES (1);\n".to_string(),
            &destination,
            2,
        );

        let err = run(&config, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_pipe_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("dest.db");
        let config = config(
            "raw://CREATE TABLE t (id INTEGER);\n".to_string(),
            &destination,
            2,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run(&config, cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_destination_must_be_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("raw://SELECT 1;".to_string(), &dir.path().join("x.db"), 1);
        config.destination.address = "file:///tmp/out.sql".to_string();

        assert!(matches!(
            run(&config, CancellationToken::new()).await,
            Err(PipelineError::Address(_))
        ));
    }
}
