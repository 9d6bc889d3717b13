//! Playwright command template.
//!
//! Playwright shards natively, so shardrun never discovers spec files for
//! it. Shard `i` of `N` runs:
//!
//! ```text
//! npx playwright test --shard=i/N
//! ```

use crate::config::PlaywrightOptions;
use crate::orchestrator::Shard;
use crate::process::Command;

/// Runs one native Playwright shard.
#[derive(Debug, Clone)]
pub struct PlaywrightFramework {
    options: PlaywrightOptions,
}

impl PlaywrightFramework {
    pub fn new(options: PlaywrightOptions) -> Self {
        Self { options }
    }

    pub(crate) fn produce_command(&self, shard: &Shard) -> Command {
        Command::new(&self.options.program)
            .arg("playwright")
            .arg("test")
            .arg(format!("--shard={}/{}", shard.index, shard.total))
            .args(self.options.extra_args.iter().cloned())
    }
}
