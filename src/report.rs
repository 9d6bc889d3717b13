//! Run reporting and output generation.
//!
//! Reporters observe a run through the [`Reporter`] trait: once when the
//! shard plan is ready, as each shard starts and completes, and once with
//! the final verdict. Completion events arrive one at a time from the
//! pool's collector, in completion order.

pub mod junit;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::orchestrator::{JobVerdict, Shard, ShardAssignment, ShardResult};

pub use junit::JUnitReporter;

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the shard assignment is known, before any shard runs.
    ///
    /// `run_id` identifies this run in logs and reports.
    async fn on_plan_ready(&self, run_id: Uuid, assignment: &ShardAssignment);

    /// Called when a shard acquires a worker and is about to run.
    async fn on_shard_start(&self, shard: &Shard);

    /// Called when a shard's result has been collected.
    async fn on_shard_complete(&self, result: &ShardResult);

    /// Called with the final verdict.
    async fn on_run_complete(&self, verdict: &JobVerdict, duration: Duration);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_plan_ready(&self, _run_id: Uuid, _assignment: &ShardAssignment) {}
    async fn on_shard_start(&self, _shard: &Shard) {}
    async fn on_shard_complete(&self, _result: &ShardResult) {}
    async fn on_run_complete(&self, _verdict: &JobVerdict, _duration: Duration) {}
}

/// A reporter that forwards every event to several reporters in turn.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Adds a reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_plan_ready(&self, run_id: Uuid, assignment: &ShardAssignment) {
        for reporter in &self.reporters {
            reporter.on_plan_ready(run_id, assignment).await;
        }
    }

    async fn on_shard_start(&self, shard: &Shard) {
        for reporter in &self.reporters {
            reporter.on_shard_start(shard).await;
        }
    }

    async fn on_shard_complete(&self, result: &ShardResult) {
        for reporter in &self.reporters {
            reporter.on_shard_complete(result).await;
        }
    }

    async fn on_run_complete(&self, verdict: &JobVerdict, duration: Duration) {
        for reporter in &self.reporters {
            reporter.on_run_complete(verdict, duration).await;
        }
    }
}

/// Console reporter: a progress bar while shards run, then the summary.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Creates a console reporter. With `verbose`, every shard start and
    /// completion is printed, not just failures.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        match self.progress.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pb) => pb.println(line),
                None => eprintln!("{}", line),
            },
            Err(_) => eprintln!("{}", line),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_plan_ready(&self, _run_id: Uuid, assignment: &ShardAssignment) {
        eprintln!(
            "Planned {} shards ({} work items)",
            assignment.len(),
            assignment.total_items()
        );

        let pb = indicatif::ProgressBar::new(assignment.len() as u64);
        let style = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shards")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn on_shard_start(&self, shard: &Shard) {
        if self.verbose {
            self.println(format!("Running: {} ({} work items)", shard, shard.item_count()));
        }
    }

    async fn on_shard_complete(&self, result: &ShardResult) {
        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.inc(1);
        }

        if self.verbose || !result.success() {
            let status = if result.success() {
                console::style("PASS").green()
            } else {
                console::style("FAIL").red()
            };
            self.println(format!(
                "{} shard {} (exit {}, {:.1}s)",
                status,
                result.shard_index,
                result.exit_status,
                result.duration.as_secs_f64()
            ));
        }
    }

    async fn on_run_complete(&self, verdict: &JobVerdict, duration: Duration) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }

        print_summary(verdict);
        eprintln!("{}", format_totals(verdict, duration));
    }
}

/// Renders the per-shard summary, one line per shard in index order,
/// followed by the overall verdict line.
///
/// ```text
/// shard 1: exit 0, tests 3
/// shard 2: exit 1, tests 2
/// FAILED shards: [2]
/// ```
pub fn format_summary(verdict: &JobVerdict) -> String {
    let mut lines: Vec<String> = verdict.results.iter().map(format_shard_line).collect();
    lines.push(verdict_line(verdict));
    lines.join("\n")
}

fn format_shard_line(result: &ShardResult) -> String {
    let mut line = format!(
        "shard {}: exit {}, tests {}",
        result.shard_index, result.exit_status, result.item_count
    );
    if let Some(label) = &result.label {
        line.push_str(&format!(" ({})", label));
    }
    line
}

fn verdict_line(verdict: &JobVerdict) -> String {
    if verdict.success() {
        "ALL SHARDS PASSED".to_string()
    } else {
        let failed: Vec<String> = verdict.failed_shards.iter().map(|i| i.to_string()).collect();
        format!("FAILED shards: [{}]", failed.join(", "))
    }
}

/// One-line footer with the work item count and wall time.
pub fn format_totals(verdict: &JobVerdict, duration: Duration) -> String {
    format!(
        "Ran {} work items across {} shards in {:.2}s",
        verdict.total_items(),
        verdict.results.len(),
        duration.as_secs_f64()
    )
}

/// Prints the summary to stdout with the verdict line styled.
pub fn print_summary(verdict: &JobVerdict) {
    println!();
    for result in &verdict.results {
        println!("{}", format_shard_line(result));
    }

    let last = verdict_line(verdict);
    if verdict.success() {
        println!("{}", console::style(last).green().bold());
    } else {
        println!("{}", console::style(last).red().bold());
    }
}
