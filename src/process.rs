//! Subprocess execution for external model tools.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GoldenError, GoldenResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(100);

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run `program args...`, capturing stdout and stderr.
///
/// With a `timeout`, the child is polled and killed once the budget is
/// spent; the error then carries whatever stderr the tool produced so far.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> GoldenResult<Output> {
    if !command_exists(program) {
        return Err(GoldenError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = render_command(program, args);
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let Some(limit) = timeout else {
        let output = command.output()?;
        return validate_command_output(&rendered, output);
    };

    let mut child = command.spawn()?;
    let started_at = Instant::now();
    let (stdout_rx, stderr_rx) = drain_pipes(&mut child)?;

    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = stdout_rx.recv_timeout(PIPE_DRAIN_GRACE).unwrap_or_default();
            let stderr = stderr_rx.recv_timeout(PIPE_DRAIN_GRACE).unwrap_or_default();
            return validate_command_output(
                &rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if started_at.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            let stderr = stderr_rx.recv_timeout(PIPE_DRAIN_GRACE).unwrap_or_default();
            return Err(GoldenError::from_command_timeout(
                rendered,
                saturating_duration_ms(limit),
                String::from_utf8_lossy(&stderr).into_owned(),
            ));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Spawn reader threads so a chatty tool never blocks on a full pipe.
fn drain_pipes(child: &mut Child) -> GoldenResult<(Receiver<Vec<u8>>, Receiver<Vec<u8>>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("child stderr was not piped"))?;
    Ok((spawn_reader(stdout), spawn_reader(stderr)))
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_owned()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn validate_command_output(rendered: &str, output: Output) -> GoldenResult<Output> {
    if output.status.success() {
        return Ok(output);
    }

    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(GoldenError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}

pub(crate) fn saturating_duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::{render_command, run_command_with_timeout, saturating_duration_ms};
    use crate::error::GoldenError;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_owned(), script.to_owned()]
    }

    #[test]
    fn captures_stdout_without_timeout() {
        let output = run_command_with_timeout("sh", &sh("printf '{\"ok\":true}'"), None, None)
            .expect("sh should succeed");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "{\"ok\":true}");
    }

    #[test]
    fn captures_stdout_with_generous_timeout() {
        let output = run_command_with_timeout(
            "sh",
            &sh("echo hello"),
            None,
            Some(Duration::from_secs(10)),
        )
        .expect("fast command should finish inside budget");
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    fn missing_program_returns_command_missing() {
        let err = run_command_with_timeout("nonexistent_model_tool_xyz", &[], None, None)
            .expect_err("missing binary must fail");
        assert!(matches!(err, GoldenError::CommandMissing { .. }), "{err:?}");
    }

    #[test]
    fn nonzero_exit_reports_status_and_stderr() {
        let err = run_command_with_timeout("sh", &sh("echo model exploded >&2; exit 3"), None, None)
            .expect_err("non-zero exit must fail");
        match err {
            GoldenError::CommandFailed {
                status,
                stderr_suffix,
                ..
            } => {
                assert_eq!(status, 3);
                assert!(stderr_suffix.contains("model exploded"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn hung_tool_is_killed_at_timeout() {
        let err = run_command_with_timeout(
            "sh",
            &sh("exec sleep 30"),
            None,
            Some(Duration::from_millis(100)),
        )
        .expect_err("sleep must exceed budget");
        match err {
            GoldenError::CommandTimedOut { timeout_ms, .. } => assert_eq!(timeout_ms, 100),
            other => panic!("expected CommandTimedOut, got {other:?}"),
        }
    }

    #[test]
    fn runs_in_requested_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("marker.json"), "[1]").expect("write marker");
        let output = run_command_with_timeout("sh", &sh("cat marker.json"), Some(dir.path()), None)
            .expect("cat inside cwd");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "[1]");
    }

    #[test]
    fn render_command_omits_trailing_space() {
        assert_eq!(render_command("true", &[]), "true");
        assert_eq!(
            render_command("python3", &["face.py".to_owned()]),
            "python3 face.py"
        );
    }

    #[test]
    fn saturating_duration_handles_huge_values() {
        assert_eq!(saturating_duration_ms(Duration::from_millis(42)), 42);
        assert_eq!(saturating_duration_ms(Duration::MAX), u64::MAX);
    }
}
