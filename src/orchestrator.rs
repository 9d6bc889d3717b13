//! Shard partitioning, parallel execution and aggregation.
//!
//! This module is the core of shardrun. It takes a validated
//! [`RunConfiguration`], a [`WorkItemSource`] and a [`ShardRunner`], and
//! turns them into a single [`JobVerdict`].
//!
//! # Architecture
//!
//! ```text
//!  RunConfiguration        WorkItemSource
//!         │                      │
//!         │                      │ discover()   (item-list frameworks only)
//!         │                      ▼
//!         │               Vec<WorkItem>
//!         │                      │
//!         └─────────► Sharder ◄──┘
//!                        │ shard() / native()
//!                        ▼
//!                 ShardAssignment (N shards)
//!                        │
//!                        ▼
//!                  ExecutionPool ──── Semaphore(parallelism)
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!     ShardRunner   ShardRunner   ShardRunner   (scoped tasks)
//!          │             │             │
//!          └──────► mpsc channel ◄─────┘
//!                        │ single collector
//!                        ▼
//!                 Vec<ShardResult>
//!                        │
//!                        ▼
//!                ResultAggregator ──► JobVerdict ──► Reporter
//! ```
//!
//! # Execution Flow
//!
//! 1. **Planning**: discover work items (skipped for natively sharded
//!    frameworks) and split them into N shards
//! 2. **Environment**: snapshot the process environment once, overrides on top
//! 3. **Execution**: run shards in parallel, at most `parallelism` at a time
//! 4. **Aggregation**: check that every shard reported exactly once and
//!    derive the verdict
//! 5. **Reporting**: notify reporters with the verdict
//!
//! # Example
//!
//! ```no_run
//! use shardrun::config::{RunConfiguration, load_job};
//! use shardrun::discovery::Discoverer;
//! use shardrun::orchestrator::{Orchestrator, ProcessShardRunner};
//! use shardrun::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let job = load_job(std::path::Path::new("job.yaml"))?;
//!     let config = RunConfiguration::from_job(&job)?;
//!
//!     let source = Discoverer::from_spec(&config.discovery);
//!     let runner = ProcessShardRunner::new(config.framework.clone())
//!         .with_optional_timeout(config.shard_timeout)
//!         .with_streaming(config.stream_output);
//!     let reporter = ConsoleReporter::new(false);
//!
//!     let orchestrator = Orchestrator::new(config, source, runner, reporter);
//!     let verdict = orchestrator.run().await?;
//!
//!     std::process::exit(verdict.exit_code());
//! }
//! ```

pub mod aggregate;
pub mod pool;
pub mod runner;
pub mod scheduler;

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RunConfiguration};
use crate::discovery::{DiscoveryError, WorkItemSource};
use crate::framework::ShardingMode;
use crate::process::Environment;
use crate::report::Reporter;

pub use aggregate::{CoordinationFault, JobVerdict, ResultAggregator};
pub use pool::ExecutionPool;
pub use runner::{
    FAULT_STATUS, LAUNCH_FAILURE_STATUS, ProcessShardRunner, ShardOutcome, ShardResult,
    ShardRunner, TIMEOUT_STATUS,
};
pub use scheduler::{Shard, ShardAssignment, ShardWork, Sharder};

/// Exit code when every shard passed.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when at least one shard failed.
pub const EXIT_SHARD_FAILED: i32 = 1;

/// Exit code for configuration, usage and discovery errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code when the collected results do not match the plan.
pub const EXIT_COORDINATION_FAULT: i32 = 3;

/// Errors that end a run without a verdict.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Coordination fault: {0}")]
    Coordination(#[from] CoordinationFault),
}

impl OrchestratorError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Config(_) | OrchestratorError::Discovery(_) => EXIT_CONFIG_ERROR,
            OrchestratorError::Coordination(_) => EXIT_COORDINATION_FAULT,
        }
    }
}

/// Coordinates one run from configuration to verdict.
///
/// # Type Parameters
///
/// - `S`: Supplies work items for item-list frameworks
/// - `R`: Executes a single shard
/// - `Rep`: Receives progress events
pub struct Orchestrator<S, R, Rep> {
    config: RunConfiguration,
    source: S,
    runner: R,
    reporter: Rep,
}

impl<S, R, Rep> Orchestrator<S, R, Rep>
where
    S: WorkItemSource,
    R: ShardRunner,
    Rep: Reporter,
{
    pub fn new(config: RunConfiguration, source: S, runner: R, reporter: Rep) -> Self {
        Self {
            config,
            source,
            runner,
            reporter,
        }
    }

    /// The configuration this orchestrator runs.
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Determines the shard assignment without running anything.
    ///
    /// Item-list frameworks discover their work items first; natively
    /// sharded frameworks get N descriptors and never touch the source.
    ///
    /// # Errors
    ///
    /// Fails if the shard count is invalid or discovery fails.
    pub async fn plan(&self) -> Result<ShardAssignment, OrchestratorError> {
        let sharder = Sharder::new(self.config.shard_count)?;

        match self.config.framework.sharding_mode() {
            ShardingMode::Native => {
                debug!(
                    "{} shards natively; skipping discovery",
                    self.config.framework.name()
                );
                Ok(sharder.native())
            }
            ShardingMode::Items => {
                let items = self.source.discover().await?;
                info!(
                    "Discovered {} work items using {}",
                    items.len(),
                    self.source.name()
                );
                if items.is_empty() {
                    warn!("No work items found; every shard will be empty");
                }
                Ok(sharder.shard(items))
            }
        }
    }

    /// Runs every shard and returns the job verdict.
    ///
    /// A failing shard is part of the verdict, not an error.
    ///
    /// # Errors
    ///
    /// Configuration and discovery errors before any shard starts; a
    /// [`CoordinationFault`] if the collected results do not match the plan.
    pub async fn run(&self) -> Result<JobVerdict, OrchestratorError> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4();

        info!(
            "Starting run {} for job '{}' ({}, {} shards, parallelism {})",
            run_id,
            self.config.name,
            self.config.framework.name(),
            self.config.shard_count,
            self.config.parallelism
        );

        let assignment = self.plan().await?;
        for shard in &assignment {
            debug!("{}: {} work items", shard, shard.item_count());
        }

        self.reporter.on_plan_ready(run_id, &assignment).await;

        let env = Environment::capture(&self.config.env_overrides);
        let pool = ExecutionPool::new(self.config.parallelism);
        let results = pool
            .execute_reporting(&assignment, &self.runner, &env, &self.reporter)
            .await;

        let verdict = ResultAggregator::new(assignment.len())
            .aggregate(&results)
            .inspect_err(|e| error!("Run {} cannot be aggregated: {}", run_id, e))?;

        let duration = start.elapsed();
        if verdict.success() {
            info!("Run {} passed in {:?}", run_id, duration);
        } else {
            info!(
                "Run {} failed in {:?}: shards {:?}",
                run_id, duration, verdict.failed_shards
            );
        }

        self.reporter.on_run_complete(&verdict, duration).await;

        Ok(verdict)
    }
}
