//! Shard partitioning.
//!
//! The [`Sharder`] splits the discovered work items into a fixed number of
//! shards. The split is deterministic: the same items and shard count
//! always give the same assignment.
//!
//! # Strategies
//!
//! | Method | Produces | Used by |
//! |--------|----------|---------|
//! | [`shard`](Sharder::shard) | Round-robin item lists | File-list frameworks (pytest) |
//! | [`native`](Sharder::native) | `{index, total}` descriptors | Natively sharded frameworks (Playwright) |
//!
//! # Example
//!
//! ```
//! use shardrun::discovery::WorkItem;
//! use shardrun::orchestrator::Sharder;
//!
//! let items: Vec<WorkItem> = ["a", "b", "c", "d", "e"].into_iter().map(WorkItem::from).collect();
//! let assignment = Sharder::new(2).unwrap().shard(items);
//!
//! // Shard 1: a, c, e    Shard 2: b, d
//! assert_eq!(assignment.len(), 2);
//! assert_eq!(assignment.get(1).unwrap().item_count(), 3);
//! assert_eq!(assignment.get(2).unwrap().item_count(), 2);
//! ```

use std::fmt;

use serde::Serialize;

use crate::config::ConfigError;
use crate::discovery::WorkItem;

/// What a shard is asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "lowercase")]
pub enum ShardWork {
    /// An explicit list of work items, in discovery order.
    Items(Vec<WorkItem>),

    /// The framework selects its own slice from the shard index and total.
    Native,
}

/// One shard of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shard {
    /// 1-based shard index.
    pub index: usize,

    /// Number of shards in the run.
    pub total: usize,

    /// The shard's work.
    pub work: ShardWork,
}

impl Shard {
    /// Work items assigned to this shard (empty for native shards).
    pub fn items(&self) -> &[WorkItem] {
        match &self.work {
            ShardWork::Items(items) => items,
            ShardWork::Native => &[],
        }
    }

    /// Number of assigned work items (0 for native shards).
    pub fn item_count(&self) -> usize {
        self.items().len()
    }

    /// True for an item-list shard that received no items. Such a shard
    /// succeeds without launching anything.
    pub fn is_empty(&self) -> bool {
        matches!(&self.work, ShardWork::Items(items) if items.is_empty())
    }

    /// True if the framework does its own slicing for this shard.
    pub fn is_native(&self) -> bool {
        matches!(self.work, ShardWork::Native)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}/{}", self.index, self.total)
    }
}

/// The complete, immutable partition of a run into shards.
///
/// Shards are stored in index order; `get(i)` returns shard `i` (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardAssignment {
    shards: Vec<Shard>,
}

impl ShardAssignment {
    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True if there are no shards.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Returns shard `index` (1-based).
    pub fn get(&self, index: usize) -> Option<&Shard> {
        index.checked_sub(1).and_then(|i| self.shards.get(i))
    }

    /// Iterates over shards in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, Shard> {
        self.shards.iter()
    }

    /// Total number of work items across all shards.
    pub fn total_items(&self) -> usize {
        self.shards.iter().map(Shard::item_count).sum()
    }
}

impl<'a> IntoIterator for &'a ShardAssignment {
    type Item = &'a Shard;
    type IntoIter = std::slice::Iter<'a, Shard>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Distributes work items across a fixed number of shards.
pub struct Sharder {
    shard_count: usize,
}

impl Sharder {
    /// Creates a sharder producing `shard_count` shards.
    ///
    /// # Errors
    ///
    /// A shard count of zero is a configuration error.
    pub fn new(shard_count: usize) -> Result<Self, ConfigError> {
        if shard_count == 0 {
            return Err(ConfigError::InvalidShardCount(0));
        }
        Ok(Self { shard_count })
    }

    /// Assigns items round-robin: the item at position `i` goes to shard
    /// `(i mod N) + 1`.
    ///
    /// Every item lands in exactly one shard, discovery order is kept
    /// within each shard, and shard sizes differ by at most one. Empty
    /// shards are kept; there are always exactly N shards.
    pub fn shard(&self, items: Vec<WorkItem>) -> ShardAssignment {
        let mut buckets: Vec<Vec<WorkItem>> = (0..self.shard_count)
            .map(|_| Vec::with_capacity(items.len() / self.shard_count + 1))
            .collect();

        for (i, item) in items.into_iter().enumerate() {
            buckets[i % self.shard_count].push(item);
        }

        ShardAssignment {
            shards: buckets
                .into_iter()
                .enumerate()
                .map(|(i, items)| Shard {
                    index: i + 1,
                    total: self.shard_count,
                    work: ShardWork::Items(items),
                })
                .collect(),
        }
    }

    /// Produces N native shard descriptors without looking at items.
    pub fn native(&self) -> ShardAssignment {
        ShardAssignment {
            shards: (1..=self.shard_count)
                .map(|index| Shard {
                    index,
                    total: self.shard_count,
                    work: ShardWork::Native,
                })
                .collect(),
        }
    }
}
