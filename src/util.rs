use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_GRACE: Duration = Duration::from_millis(250);

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run a command to completion, killing it once `timeout` elapses.
///
/// Output pipes are drained on background threads so a chatty child cannot
/// block on a full pipe while we poll for exit. On unix the child leads its
/// own process group and the whole group is killed on timeout, so
/// grandchildren holding the pipes open cannot outlive the deadline.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_rx = drain(stdout);
    let stderr_rx = drain(stderr);

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    kill_tree(&mut child);
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(format!("Failed to wait for command: {}", e));
            }
        }
    };

    // A descendant may still hold the pipes after the leader exits.
    let drain_deadline = if timed_out {
        Instant::now() + DRAIN_GRACE
    } else {
        (start + timeout).max(Instant::now()) + DRAIN_GRACE
    };
    let stdout_bytes = collect(&stdout_rx, drain_deadline);
    let stderr_bytes = collect(&stderr_rx, drain_deadline);
    let (stdout_bytes, stderr_bytes) = match (stdout_bytes, stderr_bytes) {
        (Some(out), Some(err)) => (out, err),
        (out, err) => {
            kill_tree(&mut child);
            timed_out = true;
            (out.unwrap_or_default(), err.unwrap_or_default())
        }
    };

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

fn drain<R: Read + Send + 'static>(pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(pipe);
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(rx: &mpsc::Receiver<Vec<u8>>, deadline: Instant) -> Option<Vec<u8>> {
    let wait = deadline.saturating_duration_since(Instant::now());
    rx.recv_timeout(wait).ok()
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child was spawned with process_group(0), so its pid is the pgid.
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !killed {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Resolve `candidate` as an existing file strictly inside `root`.
pub fn resolve_inside(root: &Path, candidate: &Path) -> Result<PathBuf, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    let root = root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve directory {}: {}", root.display(), e))?;
    let resolved = root
        .join(candidate)
        .canonicalize()
        .map_err(|e| format!("No such program {}: {}", candidate.display(), e))?;

    // Symlinks could still point outside the directory.
    if !resolved.starts_with(&root) {
        return Err(format!("Path escapes directory: {}", candidate.display()));
    }
    if !resolved.is_file() {
        return Err(format!("Not a file: {}", candidate.display()));
    }

    Ok(resolved)
}

/// Compute a stable hash of file contents (FNV-1a 64-bit).
pub fn hash_bytes(content: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{:016x}", hash)
}

pub fn hash_str(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::{hash_str, resolve_inside, run_command_with_timeout, truncate};
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_hash_str_is_stable() {
        let a = hash_str("hello");
        let b = hash_str("hello");
        let c = hash_str("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_resolve_inside_accepts_existing_file() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("old_payroll.py"), "print(1)\n").unwrap();

        let resolved = resolve_inside(root.path(), Path::new("old_payroll.py")).unwrap();
        assert!(resolved.ends_with("old_payroll.py"));
    }

    #[test]
    fn test_resolve_inside_rejects_traversal_and_absolute() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve_inside(root.path(), Path::new("../etc/passwd")).is_err());
        assert!(resolve_inside(root.path(), Path::new("/etc/passwd")).is_err());
        assert!(resolve_inside(root.path(), Path::new("")).is_err());
    }

    #[test]
    fn test_resolve_inside_rejects_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let err = resolve_inside(root.path(), Path::new("missing.py")).unwrap_err();
        assert!(err.contains("No such program"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_kills_slow_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(100)).unwrap();
        assert!(result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let mut cmd = Command::new("sh");
        let script = format!("sh -c 'sleep 2; touch {}' & sleep 3", marker.display());
        cmd.args(["-c", script.as_str()]);

        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap();
        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(1));

        std::thread::sleep(Duration::from_millis(2500));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_does_not_wait_on_detached_writer() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 3 & echo done"]);

        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(300)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(result.timed_out);
    }

    #[test]
    fn test_run_command_with_timeout_reports_spawn_failure() {
        let mut cmd = Command::new("lazarus-definitely-not-a-binary");
        let err = run_command_with_timeout(&mut cmd, Duration::from_secs(1)).unwrap_err();
        assert!(err.starts_with("Failed to start command"));
    }
}
