pub mod classifier; // Dialect classification and INSERT decomposition
pub mod database; // Connection pools per driver
pub mod pipeline;
pub mod sink; // Execution engine
pub mod source;
pub mod splitter;
pub mod worker_pool;

pub use classifier::{classify, parser_for, Parsed, StatementParser};
pub use database::{ConnectionPool, PoolOptions, PooledConnection};
pub use pipeline::{run, PipeReport};
pub use sink::{Sink, SinkStats};
pub use source::{open_source, DatabaseSource, ScriptSource, Source};
pub use splitter::{split_statements, StatementReader};
pub use worker_pool::WorkerPool;
