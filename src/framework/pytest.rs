//! pytest command template.
//!
//! Each shard runs pytest once over its file list:
//!
//! ```text
//! pytest -q --maxfail=1 tests/api/test_users.py tests/ui/test_login.py
//! ```
//!
//! `--maxfail` stops a shard at its N-th internal failure; sibling shards
//! are unaffected. It is configurable and `maxfail = 0` drops the flag.
//!
//! ```yaml
//! spec:
//!   framework: pytest
//!   pytest:
//!     program: python
//!     program_args: ["-m", "pytest"]
//!     maxfail: 0
//!     extra_args: ["-p", "no:cacheprovider"]
//! ```

use crate::config::PytestOptions;
use crate::orchestrator::Shard;
use crate::process::Command;

/// Runs a shard's files with pytest.
#[derive(Debug, Clone)]
pub struct PytestFramework {
    options: PytestOptions,
}

impl PytestFramework {
    /// Creates a pytest framework with the given options.
    pub fn new(options: PytestOptions) -> Self {
        Self { options }
    }

    pub(crate) fn produce_command(&self, shard: &Shard) -> Command {
        let mut cmd = Command::new(&self.options.program)
            .args(self.options.program_args.iter().cloned())
            .arg("-q");

        if self.options.maxfail > 0 {
            cmd = cmd.arg(format!("--maxfail={}", self.options.maxfail));
        }

        cmd.args(self.options.extra_args.iter().cloned())
            .args(shard.items().iter().map(|item| item.as_str().to_string()))
    }
}
