//! shardrun CLI - shard a test suite and run the shards in parallel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use shardrun::config::{self, RunConfiguration};
use shardrun::discovery::Discoverer;
use shardrun::framework::SUPPORTED_FRAMEWORKS;
use shardrun::orchestrator::{
    EXIT_CONFIG_ERROR, Orchestrator, OrchestratorError, ProcessShardRunner, Shard, ShardWork,
};
use shardrun::report::{ConsoleReporter, JUnitReporter, MultiReporter, NullReporter};

#[derive(Parser)]
#[command(name = "shardrun")]
#[command(about = "Shard a test suite and run the shards in parallel", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run {
        /// Job file (YAML or TOML)
        job: PathBuf,

        /// Override the job's parallelism
        #[arg(short, long)]
        parallel: Option<usize>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// Show how a job would be sharded, without running anything
    Plan {
        /// Job file (YAML or TOML)
        job: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a job file
    Validate {
        /// Job file (YAML or TOML)
        job: PathBuf,
    },

    /// Write a sample job file
    Init {
        /// Test framework (pytest, playwright, command)
        #[arg(short, long, default_value = "pytest")]
        framework: String,

        /// Where to write the job file
        #[arg(short, long, default_value = "shardrun.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    let result = match cli.command {
        Commands::Run {
            job,
            parallel,
            junit,
        } => run_job(&job, parallel, junit, cli.verbose).await,
        Commands::Plan { job, format } => plan_job(&job, &format).await,
        Commands::Validate { job } => validate_job(&job),
        Commands::Init { framework, output } => init_job(&framework, &output),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            error_exit_code(&e)
        }
    };
    std::process::exit(code);
}

/// Every error that reaches `main` happened before a verdict existed; only
/// coordination faults get their own code.
fn error_exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<OrchestratorError>()
        .map(OrchestratorError::exit_code)
        .unwrap_or(EXIT_CONFIG_ERROR)
}

fn load_configuration(job_path: &Path, parallel: Option<usize>) -> Result<RunConfiguration> {
    let mut job = config::load_job(job_path)
        .with_context(|| format!("Failed to load job from {}", job_path.display()))?;

    if let Some(parallel) = parallel {
        job.spec.parallelism = i64::try_from(parallel).unwrap_or(i64::MAX);
    }

    let config = RunConfiguration::from_job(&job)
        .with_context(|| format!("Invalid job {}", job_path.display()))?;
    info!("Loaded job '{}' from {}", config.name, job_path.display());
    Ok(config)
}

fn create_runner(config: &RunConfiguration) -> ProcessShardRunner {
    ProcessShardRunner::new(config.framework.clone())
        .with_optional_timeout(config.shard_timeout)
        .with_streaming(config.stream_output)
}

async fn run_job(
    job_path: &Path,
    parallel: Option<usize>,
    junit: Option<PathBuf>,
    verbose: bool,
) -> Result<i32> {
    let config = load_configuration(job_path, parallel)?;

    let mut reporter = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));
    if let Some(path) = junit {
        reporter =
            reporter.with_reporter(JUnitReporter::new(path).with_testsuite_name(&config.name));
    }

    let source = Discoverer::from_spec(&config.discovery);
    let runner = create_runner(&config);
    let orchestrator = Orchestrator::new(config, source, runner, reporter);

    let verdict = orchestrator.run().await?;
    Ok(verdict.exit_code())
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    name: &'a str,
    framework: &'a str,
    parallelism: usize,
    shards: Vec<&'a Shard>,
}

async fn plan_job(job_path: &Path, format: &str) -> Result<i32> {
    let config = load_configuration(job_path, None)?;
    let source = Discoverer::from_spec(&config.discovery);
    let runner = create_runner(&config);
    let orchestrator = Orchestrator::new(config, source, runner, NullReporter);

    let assignment = orchestrator.plan().await?;
    let config = orchestrator.config();

    match format {
        "json" => {
            let output = PlanOutput {
                name: &config.name,
                framework: config.framework.name(),
                parallelism: config.parallelism,
                shards: assignment.iter().collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "text" => {
            println!(
                "Job '{}': {} shards, parallelism {}, framework {}",
                config.name,
                assignment.len(),
                config.parallelism,
                config.framework.name()
            );
            for shard in &assignment {
                match &shard.work {
                    ShardWork::Native => println!("  {}: native", shard),
                    ShardWork::Items(items) => {
                        println!("  {}: {} work items", shard, items.len());
                        for item in items {
                            println!("    {}", item);
                        }
                    }
                }
            }
        }
        other => bail!("Unknown format: {}. Use: text, json", other),
    }

    Ok(0)
}

fn validate_job(job_path: &Path) -> Result<i32> {
    let config = load_configuration(job_path, None)?;

    println!("Job file is valid!");
    println!();
    println!("Settings:");
    println!("  Name: {}", config.name);
    println!("  Framework: {}", config.framework.name());
    println!("  Parallelism: {}", config.parallelism);
    println!("  Shards: {}", config.shard_count);
    match config.shard_timeout {
        Some(timeout) => println!("  Shard timeout: {}s", timeout.as_secs()),
        None => println!("  Shard timeout: none"),
    }
    println!("  Environment overrides: {}", config.env_overrides.len());

    Ok(0)
}

fn init_job(framework: &str, output: &Path) -> Result<i32> {
    let framework_config = match framework {
        "pytest" => {
            r#"  framework: pytest
  discovery:
    root: tests
    pattern: "test_*.py"
  pytest:
    program: pytest
    maxfail: 1
    extra_args: []"#
        }
        "playwright" => {
            r#"  framework: playwright
  playwright:
    program: npx
    extra_args: ["--reporter=line"]"#
        }
        "command" => {
            r#"  framework: command
  discovery:
    command: "find tests -name '*_test.sh' | sort"
  command:
    # {items} expands to the shard's work items; {index} and {total}
    # are also available for runners that shard natively.
    run: "sh run-tests.sh {items}""#
        }
        _ => bail!(
            "Unknown framework: {}. Use: {}",
            framework,
            SUPPORTED_FRAMEWORKS.join(", ")
        ),
    };

    let job = format!(
        r#"# shardrun job file
metadata:
  name: tests
spec:
{}
  parallelism: 4
  # timeout_secs: 1800
  stream_output: false
  environment:
    variables: {{}}
"#,
        framework_config
    );

    if output.exists() {
        bail!(
            "{} already exists. Remove it first or edit manually.",
            output.display()
        );
    }

    std::fs::write(output, job)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Created {}", output.display());
    println!();
    println!("Edit the job as needed, then run:");
    println!("  shardrun run {}", output.display());

    Ok(0)
}
