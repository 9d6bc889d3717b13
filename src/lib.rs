//! shardrun: shard a test suite and run the shards in parallel.
//!
//! A job file names a test framework and a parallelism. shardrun splits
//! the suite into shards, runs each shard as a local subprocess with a
//! bounded number in flight, and reduces the per-shard exit statuses into
//! one verdict.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Config**: Load and validate job files (YAML or TOML)
//! - **Discovery**: Find the work items to distribute (files, command output)
//! - **Framework**: Build each shard's command (pytest, Playwright, custom)
//! - **Orchestrator**: Shard, execute in a bounded pool, aggregate
//! - **Report**: Console summary, progress bar, JUnit XML
//!
//! # Example
//!
//! ```no_run
//! use shardrun::config::{RunConfiguration, load_job};
//! use shardrun::discovery::Discoverer;
//! use shardrun::orchestrator::{Orchestrator, ProcessShardRunner};
//! use shardrun::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfiguration::from_job(&load_job("job.toml".as_ref())?)?;
//!     let source = Discoverer::from_spec(&config.discovery);
//!     let runner = ProcessShardRunner::new(config.framework.clone());
//!
//!     let verdict = Orchestrator::new(config, source, runner, NullReporter).run().await?;
//!     println!("{}", shardrun::report::format_summary(&verdict));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod framework;
pub mod orchestrator;
pub mod process;
pub mod report;

// Re-export commonly used types
pub use config::{ConfigError, JobFile, RunConfiguration, load_job};
pub use discovery::{WorkItem, WorkItemSource};
pub use framework::Framework;
pub use orchestrator::{
    ExecutionPool, JobVerdict, Orchestrator, OrchestratorError, ResultAggregator, ShardResult,
    ShardRunner, Sharder,
};
pub use report::Reporter;
