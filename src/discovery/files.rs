//! File-tree discovery.
//!
//! Collects every file below a root directory whose name matches a simple
//! wildcard pattern, then sorts the paths lexicographically. With the
//! defaults this is the equivalent of `tests/**/test_*.py`.
//!
//! Hidden entries (names starting with `.`) are skipped, and symlinked
//! directories are not followed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{DiscoveryError, DiscoveryResult, WorkItem, WorkItemSource};

/// Discovers test files under a root directory.
pub struct FileDiscoverer {
    root: PathBuf,
    pattern: String,
}

impl FileDiscoverer {
    /// Creates a discoverer for files under `root` whose name matches
    /// `pattern` (`*` = any run of characters, `?` = one character).
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
        }
    }

    fn expanded_root(&self) -> DiscoveryResult<PathBuf> {
        let raw = self.root.to_string_lossy();
        let expanded =
            shellexpand::full(&raw).map_err(|e| DiscoveryError::InvalidRoot(e.to_string()))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

#[async_trait]
impl WorkItemSource for FileDiscoverer {
    async fn discover(&self) -> DiscoveryResult<Vec<WorkItem>> {
        let root = self.expanded_root()?;
        let matcher = wildcard_regex(&self.pattern)?;

        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(DiscoveryError::RootNotFound(root)),
        }

        let mut found = Vec::new();
        walk(&root, &matcher, &mut found).await?;

        let mut items: Vec<String> = found
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        items.sort();

        debug!(
            "Found {} files matching {:?} under {}",
            items.len(),
            self.pattern,
            root.display()
        );

        Ok(items.into_iter().map(WorkItem::from).collect())
    }

    fn name(&self) -> &'static str {
        "files"
    }
}

/// Collect matching files below `root`, depth first.
async fn walk(root: &Path, matcher: &Regex, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let (hidden, matches) = {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                (name.starts_with('.'), matcher.is_match(&name))
            };
            if hidden {
                continue;
            }

            let ty = entry.file_type().await?;
            if ty.is_dir() {
                pending.push(entry.path());
            } else if matches {
                found.push(entry.path());
            }
        }
    }

    Ok(())
}

/// Translate a file name wildcard into an anchored regex.
fn wildcard_regex(pattern: &str) -> DiscoveryResult<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
