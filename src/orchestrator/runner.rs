//! Shard execution.
//!
//! A [`ShardRunner`] turns one [`Shard`] into exactly one [`ShardResult`].
//! Runners never return errors: a command that fails to launch, times out
//! or exits non-zero is reported as data so that no shard can silently
//! drop out of the aggregate.
//!
//! # Synthetic Statuses
//!
//! | Situation | Outcome | Status |
//! |-----------|---------|--------|
//! | Empty item list, nothing launched | [`ShardOutcome::Skipped`] | 0 |
//! | Program could not be started | [`ShardOutcome::LaunchFailed`] | 127 |
//! | Time limit exceeded, child killed | [`ShardOutcome::TimedOut`] | 124 |
//! | Worker panicked or vanished | [`ShardOutcome::Faulted`] | 70 |
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//! use shardrun::config::PytestOptions;
//! use shardrun::discovery::WorkItem;
//! use shardrun::framework::{Framework, PytestFramework};
//! use shardrun::orchestrator::{ProcessShardRunner, ShardRunner, Sharder};
//! use shardrun::process::Environment;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let framework = Framework::Pytest(PytestFramework::new(PytestOptions::default()));
//! let runner = ProcessShardRunner::new(framework).with_timeout(Duration::from_secs(600));
//!
//! let assignment = Sharder::new(1)?.shard(vec![WorkItem::from("tests/test_math.py")]);
//! let env = Environment::capture(&BTreeMap::new());
//!
//! let result = runner.run(assignment.get(1).unwrap(), &env).await;
//! println!("shard 1 exited with {}", result.exit_status);
//! # Ok(())
//! # }
//! ```

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

use super::Shard;
use crate::framework::Framework;
use crate::process::{Environment, exit_status_code};

/// Status reported when the shard's program could not be started.
pub const LAUNCH_FAILURE_STATUS: i32 = 127;

/// Status reported when a shard exceeded its time limit.
pub const TIMEOUT_STATUS: i32 = 124;

/// Status reported when a worker failed without producing a result.
pub const FAULT_STATUS: i32 = 70;

/// How a shard's status came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardOutcome {
    /// Empty shard; nothing was launched.
    Skipped,
    /// The command ran to completion; the status is its own.
    Exited,
    /// The command could not be started.
    LaunchFailed,
    /// The command was killed after the time limit.
    TimedOut,
    /// The worker failed before reporting (panic, internal error).
    Faulted,
}

/// The outcome of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardResult {
    /// 1-based shard index.
    pub shard_index: usize,

    /// Exit status, verbatim from the command or synthetic (see module docs).
    pub exit_status: i32,

    /// Number of work items the shard was given.
    pub item_count: usize,

    /// Extra detail: native shard slice, launch error, fault message.
    pub label: Option<String>,

    /// How the status came about.
    pub outcome: ShardOutcome,

    /// Wall-clock time spent in the shard.
    #[serde(skip)]
    pub duration: Duration,
}

impl ShardResult {
    /// An empty shard that succeeded without running anything.
    pub fn skipped(shard_index: usize) -> Self {
        Self {
            shard_index,
            exit_status: 0,
            item_count: 0,
            label: Some("no work items".to_string()),
            outcome: ShardOutcome::Skipped,
            duration: Duration::ZERO,
        }
    }

    /// A command that ran and exited with `exit_status`.
    pub fn exited(shard_index: usize, exit_status: i32, item_count: usize) -> Self {
        Self {
            shard_index,
            exit_status,
            item_count,
            label: None,
            outcome: ShardOutcome::Exited,
            duration: Duration::ZERO,
        }
    }

    /// A command that could not be started.
    pub fn launch_failed(shard_index: usize, item_count: usize, error: impl Into<String>) -> Self {
        Self {
            shard_index,
            exit_status: LAUNCH_FAILURE_STATUS,
            item_count,
            label: Some(format!("launch failed: {}", error.into())),
            outcome: ShardOutcome::LaunchFailed,
            duration: Duration::ZERO,
        }
    }

    /// A command killed after running longer than `limit`.
    pub fn timed_out(shard_index: usize, item_count: usize, limit: Duration) -> Self {
        Self {
            shard_index,
            exit_status: TIMEOUT_STATUS,
            item_count,
            label: Some(format!("timed out after {:?}", limit)),
            outcome: ShardOutcome::TimedOut,
            duration: limit,
        }
    }

    /// A worker that failed before producing a result.
    pub fn faulted(shard_index: usize, item_count: usize, message: impl Into<String>) -> Self {
        Self {
            shard_index,
            exit_status: FAULT_STATUS,
            item_count,
            label: Some(format!("fault: {}", message.into())),
            outcome: ShardOutcome::Faulted,
            duration: Duration::ZERO,
        }
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// True when the exit status is 0.
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Executes a single shard.
#[async_trait]
pub trait ShardRunner: Send + Sync {
    /// Runs `shard` with the child environment `env` and reports its result.
    ///
    /// Must produce a result for every shard, including ones whose command
    /// cannot be launched.
    async fn run(&self, shard: &Shard, env: &Environment) -> ShardResult;
}

/// Runs shards as local child processes using the framework's template.
pub struct ProcessShardRunner {
    framework: Framework,
    timeout: Option<Duration>,
    stream_output: bool,
}

impl ProcessShardRunner {
    /// Creates a runner with no time limit that inherits stdio.
    pub fn new(framework: Framework) -> Self {
        Self {
            framework,
            timeout: None,
            stream_output: false,
        }
    }

    /// Kills a shard's command after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets an optional time limit.
    pub fn with_optional_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pipes the command's output and prints each line prefixed with
    /// `[shard N]`, so interleaved output from parallel shards stays
    /// attributable.
    pub fn with_streaming(mut self, stream_output: bool) -> Self {
        self.stream_output = stream_output;
        self
    }

    /// Waits for the child, forwarding piped output when streaming.
    async fn wait(
        &self,
        child: &mut tokio::process::Child,
        shard_index: usize,
    ) -> std::io::Result<std::process::ExitStatus> {
        if !self.stream_output {
            return child.wait().await;
        }

        let stdout = child.stdout.take().map(|out| output_lines(out, false));
        let stderr = child.stderr.take().map(|err| output_lines(err, true));

        let mut combined = stream::select(
            stdout.unwrap_or_else(|| stream::empty().boxed()),
            stderr.unwrap_or_else(|| stream::empty().boxed()),
        );

        let forward = async {
            while let Some((is_err, line)) = combined.next().await {
                if is_err {
                    eprintln!("[shard {}] {}", shard_index, line);
                } else {
                    println!("[shard {}] {}", shard_index, line);
                }
            }
        };

        let (status, ()) = tokio::join!(child.wait(), forward);
        status
    }
}

/// Splits child output into lines tagged with whether they came from stderr.
///
/// Lines are split on raw bytes; bytes that are not UTF-8 are rendered
/// lossily rather than dropped.
fn output_lines<R>(reader: R, is_err: bool) -> BoxStream<'static, (bool, String)>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    SplitStream::new(BufReader::new(reader).split(b'\n'))
        .map(move |chunk| match chunk {
            Ok(bytes) => (is_err, render_line(&bytes)),
            Err(e) => (is_err, format!("<unreadable output: {}>", e)),
        })
        .boxed()
}

fn render_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[async_trait]
impl ShardRunner for ProcessShardRunner {
    async fn run(&self, shard: &Shard, env: &Environment) -> ShardResult {
        let item_count = shard.item_count();

        if shard.is_empty() {
            debug!("{} has no work items; not launching", shard);
            return ShardResult::skipped(shard.index);
        }

        let cmd = self.framework.produce_command(shard);
        info!("[shard {}] running: {}", shard.index, cmd);

        let mut process = cmd.to_tokio(env);
        process.kill_on_drop(true);
        if self.stream_output {
            process.stdout(Stdio::piped());
            process.stderr(Stdio::piped());
        }

        let start = Instant::now();
        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("[shard {}] failed to launch {}: {}", shard.index, cmd.program, e);
                return ShardResult::launch_failed(
                    shard.index,
                    item_count,
                    format!("{}: {}", cmd.program, e),
                );
            }
        };

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait(&mut child, shard.index)).await,
            None => Ok(self.wait(&mut child, shard.index).await),
        };

        let result = match waited {
            Ok(Ok(status)) => ShardResult::exited(shard.index, exit_status_code(status), item_count),
            Ok(Err(e)) => ShardResult::faulted(
                shard.index,
                item_count,
                format!("waiting for {} failed: {}", cmd.program, e),
            ),
            Err(_) => {
                // The wait future was dropped, so the child is still ours to reap.
                warn!("[shard {}] exceeded its time limit; killing", shard.index);
                if let Err(e) = child.kill().await {
                    warn!("[shard {}] failed to kill child: {}", shard.index, e);
                }
                let limit = self.timeout.unwrap_or_default();
                return ShardResult::timed_out(shard.index, item_count, limit);
            }
        };

        let result = if shard.is_native() {
            result.with_label(format!("native shard {}/{}", shard.index, shard.total))
        } else {
            result
        };

        result.with_duration(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::discovery::WorkItem;
    use crate::framework::CommandFramework;
    use crate::orchestrator::ShardWork;

    fn runner(template: &str) -> ProcessShardRunner {
        ProcessShardRunner::new(Framework::Command(CommandFramework::parse(template).unwrap()))
    }

    fn item_shard(items: &[&str]) -> Shard {
        Shard {
            index: 1,
            total: 1,
            work: ShardWork::Items(items.iter().map(|s| WorkItem::from(*s)).collect()),
        }
    }

    fn native_shard(index: usize, total: usize) -> Shard {
        Shard {
            index,
            total,
            work: ShardWork::Native,
        }
    }

    fn ambient() -> Environment {
        Environment::capture(&BTreeMap::new())
    }

    #[tokio::test]
    async fn test_exit_status_is_verbatim() {
        let result = runner("sh -c 'exit 3'").run(&native_shard(2, 4), &ambient()).await;
        assert_eq!(result.shard_index, 2);
        assert_eq!(result.exit_status, 3);
        assert_eq!(result.outcome, ShardOutcome::Exited);
        assert_eq!(result.label.as_deref(), Some("native shard 2/4"));
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_items_are_passed_as_arguments() {
        // Succeeds only when exactly the two items arrive, in order.
        let runner = runner(r#"sh -c 'test "$#" = 2 && test "$1" = a.py && test "$2" = b.py' sh {items}"#);
        let result = runner.run(&item_shard(&["a.py", "b.py"]), &ambient()).await;
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.item_count, 2);
        assert!(result.label.is_none());
    }

    #[tokio::test]
    async fn test_empty_shard_is_not_launched() {
        let runner = runner("/nonexistent/shardrun-missing-binary {items}");
        let result = runner.run(&item_shard(&[]), &ambient()).await;
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.item_count, 0);
        assert_eq!(result.outcome, ShardOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let runner = runner("/nonexistent/shardrun-missing-binary {items}");
        let result = runner.run(&item_shard(&["a.py"]), &ambient()).await;
        assert_eq!(result.exit_status, LAUNCH_FAILURE_STATUS);
        assert_eq!(result.outcome, ShardOutcome::LaunchFailed);
        assert_eq!(result.item_count, 1);
        assert!(result.label.unwrap().contains("/nonexistent/shardrun-missing-binary"));
    }

    #[tokio::test]
    async fn test_environment_override_wins() {
        let mut overrides = BTreeMap::new();
        overrides.insert("SHARDRUN_MODE".to_string(), "override".to_string());
        let env = Environment::merge(
            std::env::vars_os().chain([("SHARDRUN_MODE".into(), "ambient".into())]),
            &overrides,
        );

        let runner = runner(r#"sh -c 'test "$SHARDRUN_MODE" = override'"#);
        let result = runner.run(&native_shard(1, 1), &env).await;
        assert_eq!(result.exit_status, 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_shard() {
        let runner = runner("sleep 5").with_timeout(Duration::from_millis(200));
        let start = Instant::now();
        let result = runner.run(&native_shard(1, 1), &ambient()).await;
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(result.exit_status, TIMEOUT_STATUS);
        assert_eq!(result.outcome, ShardOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_output_lines_keep_non_utf8_text() {
        let output: &'static [u8] = b"first\n\xff\xfe caf\xe9 failure detail\r\nlast";
        let lines: Vec<(bool, String)> = output_lines(output, true).collect().await;
        assert_eq!(
            lines,
            vec![
                (true, "first".to_string()),
                (true, "\u{FFFD}\u{FFFD} caf\u{FFFD} failure detail".to_string()),
                (true, "last".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_streaming_non_utf8_output_still_reports_status() {
        let runner = runner(r#"sh -c "printf 'first\n\377\376 caf\351\nlast\n'; exit 5""#)
            .with_streaming(true);
        let result = runner.run(&native_shard(1, 1), &ambient()).await;
        assert_eq!(result.exit_status, 5);
    }

    #[tokio::test]
    async fn test_streaming_still_reports_status() {
        let runner = runner("sh -c 'echo out; echo err >&2; exit 4'").with_streaming(true);
        let result = runner.run(&native_shard(1, 1), &ambient()).await;
        assert_eq!(result.exit_status, 4);
    }
}
