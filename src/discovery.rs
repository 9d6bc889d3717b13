//! Work-item discovery.
//!
//! A [`WorkItemSource`] produces the ordered list of work items (test files
//! or test node ids) that the sharder distributes. Discovery runs once per
//! job, before any shard starts, and its order is the order shards see.
//!
//! # Built-in Sources
//!
//! | Implementation | Items | Order |
//! |----------------|-------|-------|
//! | [`files::FileDiscoverer`] | Files under a root matching a name pattern | Lexicographic |
//! | [`command::CommandDiscoverer`] | Lines printed by a shell command | As printed |

pub mod command;
pub mod files;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DiscoverySpec;

pub use command::CommandDiscoverer;
pub use files::FileDiscoverer;

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur while discovering work items.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery root does not exist or is not a directory.
    #[error("Discovery root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// The discovery root could not be expanded (e.g. undefined `$VAR`).
    #[error("Invalid discovery root: {0}")]
    InvalidRoot(String),

    /// The file name pattern could not be compiled.
    #[error("Invalid file pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The discovery command could not be run or exited non-zero.
    #[error("Discovery command failed: {0}")]
    CommandFailed(String),

    /// I/O error while walking the file tree.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque unit of schedulable work, such as `tests/api/test_users.py`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    /// Creates a work item from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItem {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkItem {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Supplies the ordered sequence of work items for a run.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// Returns the work items in discovery order.
    async fn discover(&self) -> DiscoveryResult<Vec<WorkItem>>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// The work-item source selected by a job's discovery settings.
pub enum Discoverer {
    Files(FileDiscoverer),
    Command(CommandDiscoverer),
}

impl Discoverer {
    /// Chooses command discovery when a command is configured, file
    /// discovery otherwise.
    pub fn from_spec(spec: &DiscoverySpec) -> Self {
        match &spec.command {
            Some(command) => Discoverer::Command(CommandDiscoverer::new(command.clone())),
            None => Discoverer::Files(FileDiscoverer::new(
                spec.root.clone(),
                spec.pattern.clone(),
            )),
        }
    }
}

#[async_trait]
impl WorkItemSource for Discoverer {
    async fn discover(&self) -> DiscoveryResult<Vec<WorkItem>> {
        match self {
            Discoverer::Files(d) => d.discover().await,
            Discoverer::Command(d) => d.discover().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Discoverer::Files(d) => d.name(),
            Discoverer::Command(d) => d.name(),
        }
    }
}

/// A fixed list of work items, useful for embedding and tests.
pub struct StaticSource {
    items: Vec<WorkItem>,
}

impl StaticSource {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkItem>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl WorkItemSource for StaticSource {
    async fn discover(&self) -> DiscoveryResult<Vec<WorkItem>> {
        Ok(self.items.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
