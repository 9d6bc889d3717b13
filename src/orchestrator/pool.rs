//! Bounded parallel shard execution.
//!
//! The [`ExecutionPool`] runs every shard of an assignment with at most
//! `parallelism` shards in flight. Workers are scoped tasks that borrow the
//! runner, environment and reporter; each worker sends its single result
//! into one channel drained by one collector task, so the collected list is
//! the only mutable state shared across workers.
//!
//! ```text
//!   shard 1 ──► worker ─┐
//!   shard 2 ──► worker ─┼──► mpsc ──► collector ──► Vec<ShardResult>
//!   shard N ──► worker ─┘
//!        ▲
//!   Semaphore(parallelism)
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

use super::runner::{ShardResult, ShardRunner};
use super::scheduler::ShardAssignment;
use crate::process::Environment;
use crate::report::{NullReporter, Reporter};

/// Runs shards concurrently under a worker-count cap.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPool {
    parallelism: usize,
}

impl ExecutionPool {
    /// Creates a pool running at most `parallelism` shards at once.
    ///
    /// A parallelism of 0 is treated as 1; validated configurations never
    /// produce it.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    /// Maximum number of concurrently running shards.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs every shard and returns exactly one result per shard, in
    /// completion order.
    ///
    /// # Panics
    ///
    /// Workers run in a `tokio_scoped` scope, which blocks in place and
    /// panics on a current-thread runtime. Call this from a multi-thread
    /// runtime (`#[tokio::main]`, or `#[tokio::test(flavor = "multi_thread")]`
    /// in tests).
    pub async fn execute<R: ShardRunner>(
        &self,
        assignment: &ShardAssignment,
        runner: &R,
        env: &Environment,
    ) -> Vec<ShardResult> {
        self.execute_reporting(assignment, runner, env, &NullReporter)
            .await
    }

    /// Like [`execute`](Self::execute), notifying `reporter` as shards start
    /// and complete.
    ///
    /// Completion events are delivered from the collector, one at a time.
    ///
    /// # Panics
    ///
    /// Panics on a current-thread runtime, like [`execute`](Self::execute).
    pub async fn execute_reporting<R: ShardRunner, Rep: Reporter>(
        &self,
        assignment: &ShardAssignment,
        runner: &R,
        env: &Environment,
        reporter: &Rep,
    ) -> Vec<ShardResult> {
        let semaphore = Semaphore::new(self.parallelism);
        let (tx, mut rx) = mpsc::unbounded_channel::<ShardResult>();
        let mut collected: Vec<ShardResult> = Vec::with_capacity(assignment.len());

        debug!(
            "Running {} shards with parallelism {}",
            assignment.len(),
            self.parallelism
        );

        let sink = &mut collected;
        tokio_scoped::scope(|scope| {
            scope.spawn(async move {
                while let Some(result) = rx.recv().await {
                    reporter.on_shard_complete(&result).await;
                    sink.push(result);
                }
            });

            for shard in assignment {
                let semaphore = &semaphore;
                let tx = tx.clone();

                scope.spawn(async move {
                    let result = match semaphore.acquire().await {
                        Ok(_permit) => {
                            reporter.on_shard_start(shard).await;
                            let start = Instant::now();
                            match AssertUnwindSafe(runner.run(shard, env))
                                .catch_unwind()
                                .await
                            {
                                Ok(result) => result,
                                Err(panic) => {
                                    let message = panic_message(&*panic);
                                    error!("[shard {}] worker panicked: {}", shard.index, message);
                                    ShardResult::faulted(shard.index, shard.item_count(), message)
                                        .with_duration(start.elapsed())
                                }
                            }
                        }
                        Err(e) => ShardResult::faulted(
                            shard.index,
                            shard.item_count(),
                            format!("worker permit unavailable: {}", e),
                        ),
                    };

                    if tx.send(result).is_err() {
                        error!("[shard {}] result collector is gone", shard.index);
                    }
                });
            }

            // Workers hold the remaining senders; the collector stops once
            // the last of them finishes.
            drop(tx);
        });

        for shard in assignment {
            if !collected.iter().any(|r| r.shard_index == shard.index) {
                error!("[shard {}] produced no result; marking as faulted", shard.index);
                collected.push(ShardResult::faulted(
                    shard.index,
                    shard.item_count(),
                    "worker produced no result",
                ));
            }
        }

        collected
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::discovery::WorkItem;
    use crate::orchestrator::runner::{FAULT_STATUS, ShardOutcome};
    use crate::orchestrator::{Shard, Sharder};

    /// Records peak concurrency; fails the shards listed in `failing`.
    struct FakeRunner {
        failing: Vec<usize>,
        panicking: Vec<usize>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                failing: Vec::new(),
                panicking: Vec::new(),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ShardRunner for FakeRunner {
        async fn run(&self, shard: &Shard, _env: &Environment) -> ShardResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // Later shards finish first so completion order differs from index order.
            tokio::time::sleep(Duration::from_millis(5 * (10 - shard.index as u64 % 10))).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&shard.index) {
                panic!("boom in shard {}", shard.index);
            }
            let status = if self.failing.contains(&shard.index) { 1 } else { 0 };
            ShardResult::exited(shard.index, status, shard.item_count())
        }
    }

    fn assignment(items: usize, shards: usize) -> ShardAssignment {
        let items = (0..items).map(|i| WorkItem::new(format!("t{}", i))).collect();
        Sharder::new(shards).unwrap().shard(items)
    }

    fn sorted_indices(results: &[ShardResult]) -> Vec<usize> {
        let mut indices: Vec<usize> = results.iter().map(|r| r.shard_index).collect();
        indices.sort_unstable();
        indices
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_result_per_shard_for_any_parallelism() {
        for parallelism in [1, 2, 6, 20] {
            let runner = FakeRunner::new();
            let assignment = assignment(13, 6);
            let results = ExecutionPool::new(parallelism)
                .execute(&assignment, &runner, &Environment::default())
                .await;

            assert_eq!(sorted_indices(&results), vec![1, 2, 3, 4, 5, 6]);
            assert!(runner.peak.load(Ordering::SeqCst) <= parallelism);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parallelism_one_is_sequential() {
        let runner = FakeRunner::new();
        ExecutionPool::new(1)
            .execute(&assignment(4, 4), &runner, &Environment::default())
            .await;
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_does_not_stop_siblings() {
        let mut runner = FakeRunner::new();
        runner.failing = vec![2];
        let results = ExecutionPool::new(3)
            .execute(&assignment(3, 3), &runner, &Environment::default())
            .await;

        assert_eq!(results.len(), 3);
        let failed: Vec<usize> = results
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.shard_index)
            .collect();
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_worker_becomes_faulted_result() {
        let mut runner = FakeRunner::new();
        runner.panicking = vec![1];
        let results = ExecutionPool::new(2)
            .execute(&assignment(2, 2), &runner, &Environment::default())
            .await;

        assert_eq!(sorted_indices(&results), vec![1, 2]);
        let faulted = results.iter().find(|r| r.shard_index == 1).unwrap();
        assert_eq!(faulted.outcome, ShardOutcome::Faulted);
        assert_eq!(faulted.exit_status, FAULT_STATUS);
        assert!(faulted.label.as_deref().unwrap().contains("boom in shard 1"));
    }

    #[test]
    #[should_panic(expected = "multi-threaded runtime")]
    fn test_current_thread_runtime_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            ExecutionPool::new(1)
                .execute(&assignment(1, 1), &FakeRunner::new(), &Environment::default())
                .await
        });
    }

    #[test]
    fn test_zero_parallelism_clamped() {
        assert_eq!(ExecutionPool::new(0).parallelism(), 1);
    }
}
