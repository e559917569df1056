//! Process sandbox runner
//!
//! Executes a program once under a hard wall-clock timeout. Every fault
//! (launch failure, timeout, wait error) is folded into the returned
//! [`ExecutionResult`] so callers always get a comparable string.

use crate::language::{Interpreters, Language};
use crate::util::run_command_with_timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Prefix of the observable output recorded when a program could not be run.
pub const CRITICAL_ERROR_PREFIX: &str = "CRITICAL ERROR: ";

/// Outcome of one (program, arguments) execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout + stderr, trimmed. This is what gets compared.
    pub raw_output: String,
    pub succeeded: bool,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn completed(raw_output: String, duration_ms: u64) -> Self {
        Self {
            raw_output,
            succeeded: true,
            error_detail: None,
            duration_ms,
        }
    }

    /// The program ran but exited unsuccessfully; its output is still the observation.
    pub fn exited_with_failure(raw_output: String, detail: String, duration_ms: u64) -> Self {
        Self {
            raw_output,
            succeeded: false,
            error_detail: Some(detail),
            duration_ms,
        }
    }

    /// The program could not produce an observation at all.
    pub fn fault(cause: impl std::fmt::Display, duration_ms: u64) -> Self {
        let detail = format!("{}{}", CRITICAL_ERROR_PREFIX, cause);
        Self {
            raw_output: detail.clone(),
            succeeded: false,
            error_detail: Some(detail),
            duration_ms,
        }
    }
}

/// Anything that can run a program against positional arguments.
///
/// Implementations must never panic or return early without a result; the
/// mirror loop relies on always receiving an observation.
pub trait Executor: Send + Sync {
    fn execute(&self, program: &Path, args: &[String], timeout: Duration) -> ExecutionResult;
}

/// Runs programs as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    interpreters: Interpreters,
}

impl ProcessRunner {
    pub fn new(interpreters: Interpreters) -> Self {
        Self { interpreters }
    }

    fn command_for(&self, program: &Path) -> Command {
        let language = Language::from_path(program);
        match self.interpreters.for_language(language) {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(program);
                command
            }
            None => Command::new(program),
        }
    }
}

impl Executor for ProcessRunner {
    fn execute(&self, program: &Path, args: &[String], timeout: Duration) -> ExecutionResult {
        let mut command = self.command_for(program);
        command.args(args);

        let start = Instant::now();
        let outcome = run_command_with_timeout(&mut command, timeout);
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) if result.timed_out => {
                tracing::debug!(program = %program.display(), ?args, "execution timed out");
                ExecutionResult::fault(
                    format!("timed out after {}ms", timeout.as_millis()),
                    duration_ms,
                )
            }
            Ok(result) => {
                let combined = format!("{}{}", result.stdout, result.stderr)
                    .trim()
                    .to_string();
                match result.status {
                    Some(status) if status.success() => {
                        ExecutionResult::completed(combined, duration_ms)
                    }
                    Some(status) => ExecutionResult::exited_with_failure(
                        combined,
                        format!("exited with {}", status),
                        duration_ms,
                    ),
                    None => ExecutionResult::fault("process status unavailable", duration_ms),
                }
            }
            Err(error) => {
                tracing::debug!(program = %program.display(), %error, "execution fault");
                ExecutionResult::fault(error, duration_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn runner() -> ProcessRunner {
        ProcessRunner::default()
    }

    #[cfg(unix)]
    #[test]
    fn test_combines_and_trims_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("both.sh");
        fs::write(&script, "printf '  out'\nprintf 'err  \\n' 1>&2\n").unwrap();

        let result = runner().execute(&script, &[], Duration::from_secs(5));
        assert!(result.succeeded);
        assert_eq!(result.raw_output, "outerr");
        assert!(result.error_detail.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_passes_arguments_positionally() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("args.sh");
        fs::write(&script, "echo \"$2-$1\"\n").unwrap();

        let args = vec!["40".to_string(), "20".to_string()];
        let result = runner().execute(&script, &args, Duration::from_secs(5));
        assert_eq!(result.raw_output, "20-40");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_keeps_output_as_observation() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("crash.sh");
        fs::write(&script, "echo 'Traceback: boom'\nexit 3\n").unwrap();

        let result = runner().execute(&script, &[], Duration::from_secs(5));
        assert!(!result.succeeded);
        assert_eq!(result.raw_output, "Traceback: boom");
        assert!(result.error_detail.unwrap().contains("exited"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_is_absorbed_into_critical_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        fs::write(&script, "sleep 5\necho late\n").unwrap();

        let start = Instant::now();
        let result = runner().execute(&script, &[], Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(!result.succeeded);
        assert!(result.raw_output.starts_with(CRITICAL_ERROR_PREFIX));
        assert!(result.raw_output.contains("timed out"));
    }

    #[test]
    fn test_launch_failure_is_absorbed() {
        let interpreters = Interpreters {
            python: "lazarus-missing-python".to_string(),
            ..Interpreters::default()
        };
        let result = ProcessRunner::new(interpreters).execute(
            Path::new("nowhere.py"),
            &[],
            Duration::from_secs(1),
        );
        assert!(!result.succeeded);
        assert!(result.raw_output.starts_with(CRITICAL_ERROR_PREFIX));
        assert_eq!(result.error_detail.as_deref(), Some(result.raw_output.as_str()));
    }
}
