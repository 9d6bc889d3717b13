//! Job file loading and run configuration.
//!
//! A job file is read from YAML (`.yml`/`.yaml`) or TOML (anything else)
//! into a [`JobFile`], then validated into a [`RunConfiguration`], the
//! read-only value the orchestrator works from. Every configuration
//! problem is reported as a [`ConfigError`] before any shard starts.

pub mod schema;

pub use schema::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::framework::Framework;

/// Errors detected while loading or validating a job description.
///
/// Any of these aborts the run before a single shard is launched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The job file could not be read.
    #[error("Failed to read job file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job file is not valid YAML/TOML or does not match the schema.
    #[error("Failed to parse job file {origin}: {message}")]
    Parse { origin: String, message: String },

    /// The framework name is not one shardrun knows how to run.
    #[error("Unsupported framework: {0} (supported: pytest, playwright, command)")]
    UnsupportedFramework(String),

    /// Parallelism must be a positive integer.
    #[error("parallelism must be at least 1, got {0}")]
    InvalidParallelism(i64),

    /// The shard total must be a positive integer.
    #[error("shard count must be at least 1, got {0}")]
    InvalidShardCount(i64),

    /// A shard timeout of zero would kill every shard on launch.
    #[error("timeout_secs must be at least 1, got {0}")]
    InvalidTimeout(u64),

    /// An environment override cannot be passed to a child process.
    #[error("Invalid environment variable {key:?}: {reason}")]
    InvalidEnvironment { key: String, reason: String },

    /// `framework = "command"` without a `command.run` template.
    #[error("framework \"command\" requires spec.command.run")]
    MissingCommand,

    /// The command template could not be split or uses placeholders wrongly.
    #[error("Invalid command template: {0}")]
    InvalidCommand(String),
}

/// Input format of a job description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFormat {
    Yaml,
    Toml,
}

impl JobFormat {
    /// Picks the format from a file extension; anything that is not
    /// `.yml`/`.yaml` is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml") => {
                JobFormat::Yaml
            }
            _ => JobFormat::Toml,
        }
    }
}

/// Loads a job description from a file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read and
/// [`ConfigError::Parse`] if it does not match the schema.
///
/// # Example
///
/// ```no_run
/// use shardrun::config::load_job;
/// use std::path::Path;
///
/// let job = load_job(Path::new("regression-job.yml"))?;
/// println!("Parallelism: {}", job.spec.parallelism);
/// # Ok::<(), shardrun::config::ConfigError>(())
/// ```
pub fn load_job(path: &Path) -> Result<JobFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_job(&content, JobFormat::from_path(path), &path.display().to_string())
}

/// Loads a job description from a string.
///
/// # Example
///
/// ```
/// use shardrun::config::{load_job_str, JobFormat};
///
/// let job = load_job_str(r#"
/// metadata:
///   name: smoke
/// spec:
///   framework: playwright
///   parallelism: 3
/// "#, JobFormat::Yaml)?;
///
/// assert_eq!(job.spec.framework, "playwright");
/// # Ok::<(), shardrun::config::ConfigError>(())
/// ```
pub fn load_job_str(content: &str, format: JobFormat) -> Result<JobFile, ConfigError> {
    parse_job(content, format, "<string>")
}

fn parse_job(content: &str, format: JobFormat, origin: &str) -> Result<JobFile, ConfigError> {
    let parsed = match format {
        JobFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        JobFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| ConfigError::Parse {
        origin: origin.to_string(),
        message,
    })
}

/// Validated, read-only settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Job name for logs and reports.
    pub name: String,

    /// The framework, resolved to its command template.
    pub framework: Framework,

    /// Maximum number of concurrently executing shards.
    pub parallelism: usize,

    /// Number of shards the work is split into.
    pub shard_count: usize,

    /// Environment overrides; they win over the ambient environment.
    pub env_overrides: BTreeMap<String, String>,

    /// Per-shard time limit.
    pub shard_timeout: Option<Duration>,

    /// Prefix and forward shard output instead of inheriting stdio.
    pub stream_output: bool,

    /// Work-item discovery settings.
    pub discovery: DiscoverySpec,
}

impl RunConfiguration {
    /// Validates a job description.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnsupportedFramework`] for unknown framework names
    /// - [`ConfigError::InvalidParallelism`] / [`ConfigError::InvalidShardCount`]
    ///   for values below 1
    /// - [`ConfigError::InvalidTimeout`] for `timeout_secs: 0`
    /// - [`ConfigError::InvalidEnvironment`] for variables a process cannot carry
    /// - [`ConfigError::MissingCommand`] / [`ConfigError::InvalidCommand`] for
    ///   a bad custom command template
    pub fn from_job(job: &JobFile) -> Result<Self, ConfigError> {
        let spec = &job.spec;
        let framework = Framework::from_spec(spec)?;

        let parallelism = positive(spec.parallelism).ok_or(ConfigError::InvalidParallelism(
            spec.parallelism,
        ))?;

        let shard_count = match spec.sharding.total {
            Some(total) => positive(total).ok_or(ConfigError::InvalidShardCount(total))?,
            None => parallelism,
        };

        let shard_timeout = match spec.timeout_secs {
            Some(0) => return Err(ConfigError::InvalidTimeout(0)),
            secs => secs.map(Duration::from_secs),
        };

        let env_overrides = validate_environment(&spec.environment.variables)?;

        Ok(Self {
            name: job
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| "unnamed".to_string()),
            framework,
            parallelism,
            shard_count,
            env_overrides,
            shard_timeout,
            stream_output: spec.stream_output,
            discovery: spec.discovery.clone(),
        })
    }
}

fn positive(value: i64) -> Option<usize> {
    if value >= 1 {
        usize::try_from(value).ok()
    } else {
        None
    }
}

fn validate_environment(
    variables: &BTreeMap<String, EnvValue>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let invalid = |key: &str, reason: &str| ConfigError::InvalidEnvironment {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let mut env = BTreeMap::new();
    for (key, value) in variables {
        if key.is_empty() {
            return Err(invalid(key, "name is empty"));
        }
        if key.contains('=') {
            return Err(invalid(key, "name contains '='"));
        }
        if key.contains('\0') {
            return Err(invalid(key, "name contains a NUL byte"));
        }
        let rendered = value
            .render()
            .ok_or_else(|| invalid(key, "value must be a string, number or boolean"))?;
        if rendered.contains('\0') {
            return Err(invalid(key, "value contains a NUL byte"));
        }
        env.insert(key.clone(), rendered);
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_JOB: &str = r#"
metadata:
  name: regression
spec:
  framework: pytest
  parallelism: 4
  environment:
    variables:
      BASE_URL: https://staging.example.com
      WORKERS: 2
  sharding:
    total: 8
"#;

    const TOML_JOB: &str = r#"
[metadata]
name = "regression"

[spec]
framework = "pytest"
parallelism = 4

[spec.environment.variables]
BASE_URL = "https://staging.example.com"
WORKERS = 2

[spec.sharding]
total = 8
"#;

    #[test]
    fn test_yaml_and_toml_agree() {
        let yaml = RunConfiguration::from_job(&load_job_str(YAML_JOB, JobFormat::Yaml).unwrap())
            .unwrap();
        let toml = RunConfiguration::from_job(&load_job_str(TOML_JOB, JobFormat::Toml).unwrap())
            .unwrap();

        for config in [&yaml, &toml] {
            assert_eq!(config.name, "regression");
            assert_eq!(config.framework.name(), "pytest");
            assert_eq!(config.parallelism, 4);
            assert_eq!(config.shard_count, 8);
            assert_eq!(config.env_overrides["WORKERS"], "2");
        }
        assert_eq!(yaml.env_overrides, toml.env_overrides);
    }

    #[test]
    fn test_shard_count_defaults_to_parallelism() {
        let job = load_job_str("[spec]\nparallelism = 3", JobFormat::Toml).unwrap();
        let config = RunConfiguration::from_job(&job).unwrap();
        assert_eq!(config.shard_count, 3);
        assert!(config.shard_timeout.is_none());
    }

    #[test]
    fn test_unsupported_framework() {
        let job = load_job_str("spec:\n  framework: unsupported-x\n", JobFormat::Yaml).unwrap();
        let err = RunConfiguration::from_job(&job).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFramework(name) if name == "unsupported-x"));
    }

    #[test]
    fn test_non_positive_parallelism() {
        for value in [0, -2] {
            let job = load_job_str(&format!("[spec]\nparallelism = {}", value), JobFormat::Toml)
                .unwrap();
            let err = RunConfiguration::from_job(&job).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidParallelism(v) if v == value));
        }
    }

    #[test]
    fn test_zero_shard_total() {
        let job = load_job_str("[spec.sharding]\ntotal = 0", JobFormat::Toml).unwrap();
        let err = RunConfiguration::from_job(&job).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShardCount(0)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let job = load_job_str("spec:\n  timeout_secs: 0\n", JobFormat::Yaml).unwrap();
        let err = RunConfiguration::from_job(&job).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(0)));

        let job = load_job_str("spec:\n  timeout_secs: 30\n", JobFormat::Yaml).unwrap();
        let config = RunConfiguration::from_job(&job).unwrap();
        assert_eq!(config.shard_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_malformed_environment() {
        let job = load_job_str(
            "spec:\n  environment:\n    variables:\n      \"A=B\": x\n",
            JobFormat::Yaml,
        )
        .unwrap();
        assert!(matches!(
            RunConfiguration::from_job(&job),
            Err(ConfigError::InvalidEnvironment { .. })
        ));

        let job = load_job_str(
            "spec:\n  environment:\n    variables:\n      NESTED: {a: 1}\n",
            JobFormat::Yaml,
        )
        .unwrap();
        assert!(matches!(
            RunConfiguration::from_job(&job),
            Err(ConfigError::InvalidEnvironment { key, .. }) if key == "NESTED"
        ));
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = load_job_str("spec: [unclosed", JobFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_job(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(JobFormat::from_path(Path::new("job.yml")), JobFormat::Yaml);
        assert_eq!(JobFormat::from_path(Path::new("job.YAML")), JobFormat::Yaml);
        assert_eq!(JobFormat::from_path(Path::new("job.toml")), JobFormat::Toml);
        assert_eq!(JobFormat::from_path(Path::new("job")), JobFormat::Toml);
    }
}
