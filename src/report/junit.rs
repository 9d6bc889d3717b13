//! JUnit XML report generation.
//!
//! Writes one `<testcase>` per shard so CI systems (Jenkins, GitLab CI,
//! GitHub Actions) can show shard outcomes next to their own test reports.
//!
//! # Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="2" failures="1" errors="0" time="12.345">
//!   <testsuite name="regression" tests="2" failures="1" errors="0" skipped="0" time="12.345" timestamp="2024-05-01T12:00:00+00:00">
//!     <properties>
//!       <property name="run_id" value="0b7c5f3e-9a51-4d5e-8f0c-3a2b1c4d5e6f"/>
//!     </properties>
//!     <testcase classname="regression" name="shard 1" time="6.100"/>
//!     <testcase classname="regression" name="shard 2" time="6.245">
//!       <failure message="exit status 1" type="ShardFailed">2 work items</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Launch failures, timeouts and faults are written as `<error>`; shards
//! that exited non-zero as `<failure>`; empty shards as `<skipped/>`.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use uuid::Uuid;

use super::Reporter;
use crate::orchestrator::{JobVerdict, Shard, ShardAssignment, ShardOutcome, ShardResult};

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created if needed; an existing file is
/// overwritten. The run id received with the plan is written as a suite
/// property.
///
/// # Example
///
/// ```
/// use shardrun::report::JUnitReporter;
///
/// let reporter = JUnitReporter::new("build/test-results/shards.xml".into())
///     .with_testsuite_name("regression");
/// ```
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
    run_id: Mutex<Option<Uuid>>,
}

impl JUnitReporter {
    /// Creates a reporter writing to `output_path`.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "shardrun".to_string(),
            run_id: Mutex::new(None),
        }
    }

    /// Sets the test suite name, normally the job name.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    fn generate_xml(
        &self,
        verdict: &JobVerdict,
        duration: std::time::Duration,
    ) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = verdict.results.len();
        let failures = count(verdict, |o| o == ShardOutcome::Exited);
        let errors = count(verdict, |o| {
            matches!(
                o,
                ShardOutcome::LaunchFailed | ShardOutcome::TimedOut | ShardOutcome::Faulted
            )
        });
        let skipped = verdict
            .results
            .iter()
            .filter(|r| r.outcome == ShardOutcome::Skipped)
            .count();
        let time = format!("{:.3}", duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.to_string().as_str()));
        testsuites.push_attribute(("failures", failures.to_string().as_str()));
        testsuites.push_attribute(("errors", errors.to_string().as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.to_string().as_str()));
        testsuite.push_attribute(("failures", failures.to_string().as_str()));
        testsuite.push_attribute(("errors", errors.to_string().as_str()));
        testsuite.push_attribute(("skipped", skipped.to_string().as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute(("timestamp", chrono::Utc::now().to_rfc3339().as_str()));
        writer.write_event(Event::Start(testsuite))?;

        let run_id = self.run_id.lock().ok().and_then(|id| *id);
        if let Some(run_id) = run_id {
            writer.write_event(Event::Start(BytesStart::new("properties")))?;
            let mut property = BytesStart::new("property");
            property.push_attribute(("name", "run_id"));
            property.push_attribute(("value", run_id.to_string().as_str()));
            writer.write_event(Event::Empty(property))?;
            writer.write_event(Event::End(BytesEnd::new("properties")))?;
        }

        for result in &verdict.results {
            self.write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }

    fn write_testcase<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        result: &ShardResult,
    ) -> anyhow::Result<()> {
        let name = format!("shard {}", result.shard_index);
        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute(("classname", self.testsuite_name.as_str()));
        testcase.push_attribute(("name", name.as_str()));
        testcase.push_attribute((
            "time",
            format!("{:.3}", result.duration.as_secs_f64()).as_str(),
        ));

        if result.success() && result.outcome != ShardOutcome::Skipped {
            writer.write_event(Event::Empty(testcase))?;
            return Ok(());
        }

        writer.write_event(Event::Start(testcase))?;

        if result.outcome == ShardOutcome::Skipped {
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
        } else {
            let (tag, kind) = match result.outcome {
                ShardOutcome::Exited => ("failure", "ShardFailed"),
                ShardOutcome::LaunchFailed => ("error", "LaunchFailed"),
                ShardOutcome::TimedOut => ("error", "TimedOut"),
                _ => ("error", "Faulted"),
            };
            let message = format!("exit status {}", result.exit_status);

            let mut element = BytesStart::new(tag);
            element.push_attribute(("message", message.as_str()));
            element.push_attribute(("type", kind));
            writer.write_event(Event::Start(element))?;

            let body = match &result.label {
                Some(label) => format!("{} work items; {}", result.item_count, label),
                None => format!("{} work items", result.item_count),
            };
            writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(&body))))?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }

        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        Ok(())
    }
}

fn count(verdict: &JobVerdict, outcome: impl Fn(ShardOutcome) -> bool) -> usize {
    verdict
        .results
        .iter()
        .filter(|r| !r.success() && outcome(r.outcome))
        .count()
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_plan_ready(&self, run_id: Uuid, _assignment: &ShardAssignment) {
        if let Ok(mut slot) = self.run_id.lock() {
            *slot = Some(run_id);
        }
    }

    async fn on_shard_start(&self, _shard: &Shard) {}

    async fn on_shard_complete(&self, _result: &ShardResult) {}

    async fn on_run_complete(&self, verdict: &JobVerdict, duration: std::time::Duration) {
        match self.generate_xml(verdict, duration) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}

/// Drops characters XML 1.0 cannot carry; escaping is left to quick-xml.
fn strip_invalid_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t'
                | '\n'
                | '\r'
                | ' '..='\u{D7FF}'
                | '\u{E000}'..='\u{FFFD}'
                | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}
