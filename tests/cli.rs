use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_job(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn shardrun(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shardrun").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn unsupported_framework_exits_2_without_running() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: unsupported-x\n  parallelism: 2\n",
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("shard").not())
        .stderr(predicate::str::contains("Unsupported framework: unsupported-x"));
}

#[test]
fn zero_timeout_exits_2_without_running() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: command\n  timeout_secs: 0\n  command:\n    run: \"touch ran\"\n",
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("timeout_secs must be at least 1"));
    assert!(!dir.path().join("ran").exists());
}

#[test]
fn five_items_two_shards_reports_failed_second_shard() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.toml",
        r#"
[metadata]
name = "five-items"

[spec]
framework = "command"
parallelism = 2

[spec.discovery]
command = 'printf "a\nb\nc\nd\ne\n"'

[spec.command]
run = '''sh -c 'for t in "$@"; do [ "$t" != b ] || exit 1; done' sh {items}'''
"#,
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("shard 1: exit 0, tests 3"))
        .stdout(predicate::str::contains("shard 2: exit 1, tests 2"))
        .stdout(predicate::str::contains("FAILED shards: [2]"));
}

#[test]
fn native_command_all_shards_pass() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        r#"
spec:
  framework: command
  parallelism: 3
  command:
    run: "sh -c 'test {index} -le {total}'"
"#,
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "shard 3: exit 0, tests 0 (native shard 3/3)",
        ))
        .stdout(predicate::str::contains("ALL SHARDS PASSED"));
}

#[test]
fn each_shard_command_is_echoed_at_default_level() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: command\n  parallelism: 2\n  command:\n    run: \"true {index}\"\n",
    );

    shardrun(&dir)
        .env_remove("RUST_LOG")
        .arg("run")
        .arg(&job)
        .assert()
        .success()
        .stderr(predicate::str::contains("[shard 1] running: true 1"))
        .stderr(predicate::str::contains("[shard 2] running: true 2"));
}

#[test]
fn junit_report_carries_run_id() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "metadata:\n  name: nightly\nspec:\n  framework: command\n  command:\n    run: \"true\"\n",
    );

    shardrun(&dir)
        .args(["run", "--junit", "reports/junit.xml"])
        .arg(&job)
        .assert()
        .success();

    let xml = std::fs::read_to_string(dir.path().join("reports/junit.xml")).unwrap();
    assert!(xml.contains(r#"<testsuite name="nightly""#));
    let run_id = xml
        .split(r#"<property name="run_id" value=""#)
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap();
    assert!(uuid::Uuid::parse_str(run_id).is_ok());
}

#[test]
fn parallel_flag_sets_shard_count() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: command\n  command:\n    run: \"true\"\n",
    );

    shardrun(&dir)
        .args(["run", "--parallel", "4"])
        .arg(&job)
        .assert()
        .success()
        .stdout(predicate::str::contains("shard 4: exit 0"));
}

#[test]
fn missing_executable_is_launch_failure() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        r#"
spec:
  framework: command
  parallelism: 2
  command:
    run: "/nonexistent/shardrun-missing-binary --shard={index}"
"#,
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("shard 1: exit 127"))
        .stdout(predicate::str::contains("shard 2: exit 127"))
        .stdout(predicate::str::contains("FAILED shards: [1, 2]"));
}

#[test]
fn environment_override_wins_over_ambient() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.toml",
        r#"
[spec]
framework = "command"

[spec.command]
run = '''sh -c 'test "$SHARDRUN_MODE" = ci' '''

[spec.environment.variables]
SHARDRUN_MODE = "ci"
"#,
    );

    shardrun(&dir)
        .env("SHARDRUN_MODE", "local")
        .arg("run")
        .arg(&job)
        .assert()
        .success();
}

#[test]
fn missing_discovery_root_exits_2() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: pytest\n  discovery:\n    root: no-such-dir\n",
    );

    shardrun(&dir)
        .arg("run")
        .arg(&job)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no-such-dir"));
}

#[test]
fn plan_json_lists_round_robin_items() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("tests/unit")).unwrap();
    for file in ["tests/test_a.py", "tests/test_b.py", "tests/unit/test_c.py"] {
        std::fs::write(dir.path().join(file), "").unwrap();
    }
    let job = write_job(
        &dir,
        "job.yaml",
        "spec:\n  framework: pytest\n  parallelism: 2\n",
    );

    let output = shardrun(&dir)
        .args(["plan", "--format", "json"])
        .arg(&job)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(plan["framework"], "pytest");
    assert_eq!(plan["shards"][0]["work"]["kind"], "items");
    assert_eq!(
        plan["shards"][0]["work"]["items"],
        serde_json::json!(["tests/test_a.py", "tests/unit/test_c.py"])
    );
    assert_eq!(
        plan["shards"][1]["work"]["items"],
        serde_json::json!(["tests/test_b.py"])
    );
}

#[test]
fn validate_reports_settings() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        "metadata:\n  name: smoke\nspec:\n  framework: playwright\n  parallelism: 3\n",
    );

    shardrun(&dir)
        .arg("validate")
        .arg(&job)
        .assert()
        .success()
        .stdout(predicate::str::contains("Job file is valid!"))
        .stdout(predicate::str::contains("Framework: playwright"))
        .stdout(predicate::str::contains("Shards: 3"));
}

#[test]
fn init_writes_valid_job_and_refuses_overwrite() {
    let dir = TempDir::new().unwrap();

    for framework in ["pytest", "playwright", "command"] {
        let output = format!("{}.yaml", framework);
        shardrun(&dir)
            .args(["init", "--framework", framework, "--output", &output])
            .assert()
            .success();

        shardrun(&dir)
            .args(["validate", &output])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Framework: {}", framework)));
    }

    shardrun(&dir)
        .args(["init", "--output", "pytest.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}
