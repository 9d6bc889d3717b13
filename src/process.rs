//! Child-process plumbing shared by the shard runner.
//!
//! Two values describe a shard invocation:
//!
//! - [`Command`] - program and arguments produced by a framework template
//! - [`Environment`] - the complete, immutable child environment
//!
//! The environment is built once per run (ambient snapshot with the job's
//! overrides on top) and handed to every shard by reference. Shards never
//! touch the orchestrator's own process environment, so concurrent shards
//! cannot interfere with each other.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::ExitStatus;

/// A command to execute for a shard.
///
/// Built with a fluent API, in the same spirit as
/// [`std::process::Command`] but cloneable and printable.
///
/// # Example
///
/// ```
/// use shardrun::process::Command;
///
/// let cmd = Command::new("pytest")
///     .arg("-q")
///     .args(["tests/test_a.py", "tests/test b.py"]);
///
/// assert_eq!(cmd.program, "pytest");
/// assert_eq!(cmd.to_shell_string(), "pytest -q tests/test_a.py 'tests/test b.py'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Renders the command as a shell-quoted string, for logs.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| shell_words::quote(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds the tokio command that launches this program with exactly
    /// the given environment.
    pub(crate) fn to_tokio(&self, env: &Environment) -> tokio::process::Command {
        let mut process = tokio::process::Command::new(&self.program);
        process.args(&self.args);
        process.env_clear();
        process.envs(env.iter());
        process
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// The complete environment of a shard's child process.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use shardrun::process::Environment;
///
/// let mut overrides = BTreeMap::new();
/// overrides.insert("MODE".to_string(), "ci".to_string());
///
/// let env = Environment::merge([("MODE", "local"), ("HOME", "/root")], &overrides);
/// assert_eq!(env.get("MODE").unwrap(), "ci");
/// assert_eq!(env.get("HOME").unwrap(), "/root");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Snapshots the current process environment and applies `overrides`.
    pub fn capture(overrides: &BTreeMap<String, String>) -> Self {
        Self::merge(std::env::vars_os(), overrides)
    }

    /// Combines a base environment with overrides; an override wins when
    /// both define the same key.
    pub fn merge<I, K, V>(base: I, overrides: &BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut vars: BTreeMap<OsString, OsString> = base
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        for (key, value) in overrides {
            vars.insert(OsString::from(key), OsString::from(value));
        }

        Self { vars }
    }

    /// Looks up a variable.
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Iterates over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Converts a child's exit status into the integer reported for a shard.
///
/// Processes killed by a signal report `128 + signal`, the shell convention.
pub fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_on_collision() {
        let mut overrides = BTreeMap::new();
        overrides.insert("A".to_string(), "override".to_string());
        overrides.insert("C".to_string(), "new".to_string());

        let env = Environment::merge([("A", "ambient"), ("B", "kept")], &overrides);

        assert_eq!(env.get("A").unwrap(), "override");
        assert_eq!(env.get("B").unwrap(), "kept");
        assert_eq!(env.get("C").unwrap(), "new");
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn test_capture_includes_ambient_path() {
        let env = Environment::capture(&BTreeMap::new());
        if std::env::var_os("PATH").is_some() {
            assert!(env.get("PATH").is_some());
        }
    }

    #[test]
    fn test_shell_string_quotes_spaces() {
        let cmd = Command::new("npx")
            .arg("playwright")
            .arg("test")
            .arg("--grep=login page");
        assert_eq!(
            cmd.to_shell_string(),
            "npx playwright test '--grep=login page'"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_code_for_signal() {
        use std::os::unix::process::ExitStatusExt;
        // Raw wait status for "killed by SIGKILL".
        assert_eq!(exit_status_code(ExitStatus::from_raw(9)), 137);
        // Raw wait status for "exited with 3".
        assert_eq!(exit_status_code(ExitStatus::from_raw(3 << 8)), 3);
    }
}
