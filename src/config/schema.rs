//! Job file schema definitions for shardrun.
//!
//! This module defines the types a job description is deserialized into.
//! The same schema is read from YAML and TOML; the layout mirrors a
//! Kubernetes-style job object with `metadata` and `spec` sections.
//!
//! # Schema Overview
//!
//! ```text
//! JobFile (root)
//! ├── Metadata               - Job name
//! └── JobSpec                - Everything the run needs
//!     ├── framework          - "pytest" | "playwright" | "command"
//!     ├── parallelism        - Worker count
//!     ├── EnvironmentSpec    - Variable overrides for every shard
//!     ├── ShardingSpec       - Shard total (defaults to parallelism)
//!     ├── DiscoverySpec      - How work items are found
//!     ├── PytestOptions      - pytest command template settings
//!     ├── PlaywrightOptions  - Playwright command template settings
//!     └── CommandOptions     - Custom command template
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root structure of a job description file.
///
/// # Example
///
/// ```
/// use shardrun::config::JobFile;
///
/// let job: JobFile = toml::from_str(r#"
///     [metadata]
///     name = "regression"
///
///     [spec]
///     framework = "pytest"
///     parallelism = 4
/// "#).unwrap();
///
/// assert_eq!(job.spec.parallelism, 4);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobFile {
    /// Descriptive job metadata (optional).
    #[serde(default)]
    pub metadata: Metadata,

    /// The job specification.
    #[serde(default)]
    pub spec: JobSpec,
}

/// Descriptive metadata for a job.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Metadata {
    /// Human-readable job name, used in logs and reports.
    pub name: Option<String>,
}

/// The job specification.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `framework` | `"pytest"` |
/// | `parallelism` | 1 |
/// | `timeout_secs` | None (no timeout) |
/// | `stream_output` | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSpec {
    /// Name of the test framework. Validated against the supported set
    /// when the run configuration is built.
    #[serde(default = "default_framework")]
    pub framework: String,

    /// Maximum number of shards executing at the same time.
    ///
    /// Signed so that zero and negative values reach validation and are
    /// reported as configuration errors instead of parse errors.
    #[serde(default = "default_parallelism")]
    pub parallelism: i64,

    /// Environment variable overrides applied to every shard.
    #[serde(default)]
    pub environment: EnvironmentSpec,

    /// Sharding options.
    #[serde(default)]
    pub sharding: ShardingSpec,

    /// Work-item discovery options (file-list frameworks only).
    #[serde(default)]
    pub discovery: DiscoverySpec,

    /// Per-shard wall-clock limit in seconds. No limit when absent.
    pub timeout_secs: Option<u64>,

    /// Pipe shard output and prefix each line with `[shard N]`.
    ///
    /// When disabled, shards inherit the orchestrator's stdout and stderr.
    #[serde(default)]
    pub stream_output: bool,

    /// pytest command settings.
    #[serde(default)]
    pub pytest: PytestOptions,

    /// Playwright command settings.
    #[serde(default)]
    pub playwright: PlaywrightOptions,

    /// Custom command settings (required for `framework = "command"`).
    pub command: Option<CommandOptions>,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            parallelism: default_parallelism(),
            environment: EnvironmentSpec::default(),
            sharding: ShardingSpec::default(),
            discovery: DiscoverySpec::default(),
            timeout_secs: None,
            stream_output: false,
            pytest: PytestOptions::default(),
            playwright: PlaywrightOptions::default(),
            command: None,
        }
    }
}

fn default_framework() -> String {
    "pytest".to_string()
}

fn default_parallelism() -> i64 {
    1
}

/// Environment section of the job spec.
///
/// ```yaml
/// environment:
///   variables:
///     BASE_URL: https://staging.example.com
///     RETRIES: 3
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvironmentSpec {
    /// Variables merged over the ambient process environment.
    #[serde(default)]
    pub variables: BTreeMap<String, EnvValue>,
}

/// A scalar environment value as written in the job file.
///
/// YAML readily produces numbers and booleans for unquoted values; those
/// are accepted and rendered as strings. Anything else (lists, maps, null)
/// is rejected during validation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Other(serde_json::Value),
}

impl EnvValue {
    /// Renders the value as an environment string, or `None` if the value
    /// is not a scalar.
    pub fn render(&self) -> Option<String> {
        match self {
            EnvValue::String(s) => Some(s.clone()),
            EnvValue::Integer(i) => Some(i.to_string()),
            EnvValue::Float(f) => Some(f.to_string()),
            EnvValue::Bool(b) => Some(b.to_string()),
            EnvValue::Other(_) => None,
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        EnvValue::String(s.to_string())
    }
}

/// Sharding options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShardingSpec {
    /// Number of shards. Defaults to `parallelism`.
    pub total: Option<i64>,
}

/// How work items are found for file-list frameworks.
///
/// With `command` set, the command's stdout lines are the work items.
/// Otherwise files under `root` whose name matches `pattern` are collected
/// recursively and sorted lexicographically.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverySpec {
    /// Directory searched for test files. `~` and `$VAR` are expanded.
    ///
    /// Default: `tests`
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// File name pattern; `*` matches any run of characters, `?` one.
    ///
    /// Default: `test_*.py`
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Shell command printing one work item per line.
    pub command: Option<String>,
}

impl Default for DiscoverySpec {
    fn default() -> Self {
        Self {
            root: default_root(),
            pattern: default_pattern(),
            command: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("tests")
}

fn default_pattern() -> String {
    "test_*.py".to_string()
}

/// pytest command template settings.
///
/// Produces `<program> [args..] -q [--maxfail=N] [extra_args..] <files..>`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PytestOptions {
    /// Executable to run. Default: `pytest`
    #[serde(default = "default_pytest_program")]
    pub program: String,

    /// Arguments placed right after the program (e.g. `["-m", "pytest"]`
    /// with `program = "python"`).
    #[serde(default)]
    pub program_args: Vec<String>,

    /// Stop a shard after this many internal failures. `0` lets the shard
    /// run every test. Default: 1
    #[serde(default = "default_maxfail")]
    pub maxfail: u32,

    /// Additional arguments placed before the file list.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for PytestOptions {
    fn default() -> Self {
        Self {
            program: default_pytest_program(),
            program_args: Vec::new(),
            maxfail: default_maxfail(),
            extra_args: Vec::new(),
        }
    }
}

fn default_pytest_program() -> String {
    "pytest".to_string()
}

fn default_maxfail() -> u32 {
    1
}

/// Playwright command template settings.
///
/// Produces `<program> playwright test --shard=<i>/<N> [extra_args..]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaywrightOptions {
    /// Launcher executable. Default: `npx`
    #[serde(default = "default_playwright_program")]
    pub program: String,

    /// Additional arguments placed after the shard flag.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for PlaywrightOptions {
    fn default() -> Self {
        Self {
            program: default_playwright_program(),
            extra_args: Vec::new(),
        }
    }
}

fn default_playwright_program() -> String {
    "npx".to_string()
}

/// Custom command template.
///
/// The template is split like a shell would split it (no shell is
/// involved at run time). Placeholders:
///
/// - `{items}` - replaced by the shard's work items, one argument each.
///   Must stand alone as a word.
/// - `{index}` / `{total}` - shard index (1-based) and shard count; may
///   appear inside a word, e.g. `--shard={index}/{total}`.
///
/// A template without `{items}` runs with native shard descriptors and
/// skips discovery.
///
/// ```toml
/// [spec.command]
/// run = "go test -v {items}"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandOptions {
    /// The command template.
    pub run: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_spec_is_empty() {
        let job: JobFile = toml::from_str("[spec]").unwrap();
        assert_eq!(job.spec.framework, "pytest");
        assert_eq!(job.spec.parallelism, 1);
        assert_eq!(job.spec.pytest.maxfail, 1);
        assert_eq!(job.spec.discovery.root, PathBuf::from("tests"));
        assert_eq!(job.spec.discovery.pattern, "test_*.py");
        assert!(job.spec.timeout_secs.is_none());
        assert!(job.metadata.name.is_none());
    }

    #[test]
    fn test_env_values_render_scalars() {
        let job: JobFile = serde_yaml::from_str(
            r#"
spec:
  environment:
    variables:
      NAME: staging
      RETRIES: 3
      RATIO: 0.5
      DEBUG: true
      LIST: [1, 2]
"#,
        )
        .unwrap();
        let vars = &job.spec.environment.variables;
        assert_eq!(vars["NAME"].render().as_deref(), Some("staging"));
        assert_eq!(vars["RETRIES"].render().as_deref(), Some("3"));
        assert_eq!(vars["RATIO"].render().as_deref(), Some("0.5"));
        assert_eq!(vars["DEBUG"].render().as_deref(), Some("true"));
        assert_eq!(vars["LIST"].render(), None);
    }
}
