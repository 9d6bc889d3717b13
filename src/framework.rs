//! Test framework command templates.
//!
//! Every supported framework maps to exactly one command template. The
//! set is closed: adding a framework means adding a variant to
//! [`Framework`] and a module implementing its template.
//!
//! # Built-in Frameworks
//!
//! | Name | Implementation | Sharding | Command |
//! |------|----------------|----------|---------|
//! | `pytest` | [`pytest::PytestFramework`] | Item lists | `pytest -q --maxfail=1 <files..>` |
//! | `playwright` | [`playwright::PlaywrightFramework`] | Native | `npx playwright test --shard=i/N` |
//! | `command` | [`command::CommandFramework`] | Either | User template |

pub mod command;
pub mod playwright;
pub mod pytest;

use crate::config::{ConfigError, JobSpec};
use crate::orchestrator::Shard;
use crate::process::Command;

pub use command::CommandFramework;
pub use playwright::PlaywrightFramework;
pub use pytest::PytestFramework;

/// Names accepted in `spec.framework`.
pub const SUPPORTED_FRAMEWORKS: &[&str] = &["pytest", "playwright", "command"];

/// How a framework wants its work divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardingMode {
    /// shardrun discovers items and hands each shard an explicit list.
    Items,

    /// The framework slices the suite itself from `{index, total}`.
    Native,
}

/// A supported test framework with its resolved command settings.
#[derive(Debug, Clone)]
pub enum Framework {
    Pytest(PytestFramework),
    Playwright(PlaywrightFramework),
    Command(CommandFramework),
}

impl Framework {
    /// Resolves `spec.framework` and its options.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedFramework`] for names outside
    /// [`SUPPORTED_FRAMEWORKS`]; command template errors for `command`.
    pub fn from_spec(spec: &JobSpec) -> Result<Self, ConfigError> {
        match spec.framework.as_str() {
            "pytest" => Ok(Framework::Pytest(PytestFramework::new(spec.pytest.clone()))),
            "playwright" => Ok(Framework::Playwright(PlaywrightFramework::new(
                spec.playwright.clone(),
            ))),
            "command" => {
                let options = spec.command.as_ref().ok_or(ConfigError::MissingCommand)?;
                Ok(Framework::Command(CommandFramework::parse(&options.run)?))
            }
            other => Err(ConfigError::UnsupportedFramework(other.to_string())),
        }
    }

    /// The framework's name as written in job files.
    pub fn name(&self) -> &'static str {
        match self {
            Framework::Pytest(_) => "pytest",
            Framework::Playwright(_) => "playwright",
            Framework::Command(_) => "command",
        }
    }

    /// Whether shards carry item lists or native descriptors.
    pub fn sharding_mode(&self) -> ShardingMode {
        match self {
            Framework::Pytest(_) => ShardingMode::Items,
            Framework::Playwright(_) => ShardingMode::Native,
            Framework::Command(c) => c.sharding_mode(),
        }
    }

    /// Builds the command that runs one shard.
    pub fn produce_command(&self, shard: &Shard) -> Command {
        match self {
            Framework::Pytest(f) => f.produce_command(shard),
            Framework::Playwright(f) => f.produce_command(shard),
            Framework::Command(f) => f.produce_command(shard),
        }
    }
}
