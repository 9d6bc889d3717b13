//! Custom command template.
//!
//! Lets any test runner be driven by shardrun. The template is split into
//! words once, when the job is validated; at run time placeholders are
//! substituted per shard and the words are passed to the program directly,
//! without a shell.
//!
//! ```toml
//! # Item lists: discovery output is sharded and passed as arguments
//! [spec.command]
//! run = "go test -v {items}"
//!
//! # Native: the runner slices the suite itself
//! [spec.command]
//! run = "jest --shard={index}/{total}"
//! ```

use crate::config::ConfigError;
use crate::framework::ShardingMode;
use crate::orchestrator::Shard;
use crate::process::Command;

const ITEMS: &str = "{items}";
const INDEX: &str = "{index}";
const TOTAL: &str = "{total}";

/// A user-defined command template.
#[derive(Debug, Clone)]
pub struct CommandFramework {
    words: Vec<String>,
}

impl CommandFramework {
    /// Splits and checks a template.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidCommand`] if the template is empty, has
    /// unbalanced quotes, or embeds `{items}` inside a larger word.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let words = shell_words::split(template)
            .map_err(|e| ConfigError::InvalidCommand(format!("{}: {}", template, e)))?;

        if words.is_empty() {
            return Err(ConfigError::InvalidCommand("template is empty".to_string()));
        }
        if words.iter().any(|w| w.contains(ITEMS) && w != ITEMS) {
            return Err(ConfigError::InvalidCommand(format!(
                "{} must be a separate word in {:?}",
                ITEMS, template
            )));
        }
        if words[0] == ITEMS {
            return Err(ConfigError::InvalidCommand(format!(
                "{} cannot be the program in {:?}",
                ITEMS, template
            )));
        }

        Ok(Self { words })
    }

    /// Item lists when the template mentions `{items}`, native otherwise.
    pub fn sharding_mode(&self) -> ShardingMode {
        if self.words.iter().any(|w| w == ITEMS) {
            ShardingMode::Items
        } else {
            ShardingMode::Native
        }
    }

    pub(crate) fn produce_command(&self, shard: &Shard) -> Command {
        let index = shard.index.to_string();
        let total = shard.total.to_string();

        let mut expanded = Vec::with_capacity(self.words.len() + shard.item_count());
        for word in &self.words {
            if word == ITEMS {
                expanded.extend(shard.items().iter().map(|item| item.as_str().to_string()));
            } else {
                expanded.push(word.replace(INDEX, &index).replace(TOTAL, &total));
            }
        }

        let mut words = expanded.into_iter();
        let program = words.next().unwrap_or_default();
        Command::new(program).args(words)
    }
}
