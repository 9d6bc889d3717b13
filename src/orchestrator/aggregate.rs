//! Reduction of shard results into a job verdict.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use super::runner::ShardResult;
use super::{EXIT_SHARD_FAILED, EXIT_SUCCESS};

/// The result set does not describe the run it claims to.
///
/// These indicate a bug in coordination, not a test failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationFault {
    #[error("Expected {expected} shard results, got {actual}")]
    CardinalityMismatch { expected: usize, actual: usize },

    #[error("Shard {0} reported more than once")]
    DuplicateShard(usize),

    #[error("Shard index {index} is outside 1..={total}")]
    UnknownShard { index: usize, total: usize },
}

/// The job-level outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobVerdict {
    /// True iff every shard exited with status 0.
    pub overall_success: bool,

    /// One result per shard, in ascending shard index.
    pub results: Vec<ShardResult>,

    /// Indices of shards with a non-zero status, ascending.
    pub failed_shards: Vec<usize>,
}

impl JobVerdict {
    /// Returns true if every shard passed.
    pub fn success(&self) -> bool {
        self.overall_success
    }

    /// Process exit code: [`EXIT_SUCCESS`] if every shard passed,
    /// [`EXIT_SHARD_FAILED`] otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.overall_success {
            EXIT_SUCCESS
        } else {
            EXIT_SHARD_FAILED
        }
    }

    /// Total number of work items across all shards.
    pub fn total_items(&self) -> usize {
        self.results.iter().map(|r| r.item_count).sum()
    }
}

/// Checks a completed result set and derives the verdict.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator {
    expected_shards: usize,
}

impl ResultAggregator {
    /// Creates an aggregator for a run of `expected_shards` shards.
    pub fn new(expected_shards: usize) -> Self {
        Self { expected_shards }
    }

    /// Aggregates `results`, which may be in any order.
    ///
    /// Pure: aggregating the same results twice gives the same verdict.
    ///
    /// # Errors
    ///
    /// A [`CoordinationFault`] if the results are not exactly one per shard
    /// index in `1..=expected_shards`.
    pub fn aggregate(&self, results: &[ShardResult]) -> Result<JobVerdict, CoordinationFault> {
        let mut seen = BTreeSet::new();
        for result in results {
            if result.shard_index == 0 || result.shard_index > self.expected_shards {
                return Err(CoordinationFault::UnknownShard {
                    index: result.shard_index,
                    total: self.expected_shards,
                });
            }
            if !seen.insert(result.shard_index) {
                return Err(CoordinationFault::DuplicateShard(result.shard_index));
            }
        }

        if results.len() != self.expected_shards {
            return Err(CoordinationFault::CardinalityMismatch {
                expected: self.expected_shards,
                actual: results.len(),
            });
        }

        let mut ordered = results.to_vec();
        ordered.sort_by_key(|r| r.shard_index);

        let failed_shards: Vec<usize> = ordered
            .iter()
            .filter(|r| !r.success())
            .map(|r| r.shard_index)
            .collect();

        Ok(JobVerdict {
            overall_success: failed_shards.is_empty(),
            results: ordered,
            failed_shards,
        })
    }
}
