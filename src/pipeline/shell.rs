//! Subprocess strategy: run the agent CLI once per job.
//!
//! The command runs under `sh -c` with its stdout, stderr and exit status
//! redirected into three temp files:
//!
//! ```text
//! '<bin>' agent --agent '<id>' --session-id '<session>' --message '<instruction>' \
//!     >'<stdout>' 2>'<stderr>'; echo $? >'<status>'
//! ```
//!
//! Every interpolated value is single-quoted. The temp files are removed when
//! their handles drop, which covers success, failure and timeout alike.
//!
//! On unix the shell leads its own process group. A timeout (or the request
//! future being dropped) kills the whole group, so the agent the shell forked
//! dies with it instead of finishing in the background.

use crate::error::Pdf2CsvError;
use crate::pipeline::dispatch::{Backend, BackendReply, ExtractionJob};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs `<bin> agent …` as a one-shot subprocess.
#[derive(Debug, Clone)]
pub struct ShellBackend {
    program: String,
    agent_id: String,
    session_id: String,
    timeout: Duration,
    capture_dir: PathBuf,
}

impl ShellBackend {
    pub fn new(
        program: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            timeout: agent_gateway::client::DEFAULT_CALL_TIMEOUT,
            capture_dir: std::env::temp_dir(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for the stdout/stderr/status capture files.
    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    fn script(&self, instruction: &str, captures: &Captures) -> String {
        format!(
            "{} agent --agent {} --session-id {} --message {} >{} 2>{}; echo $? >{}",
            shell_quote(&self.program),
            shell_quote(&self.agent_id),
            shell_quote(&self.session_id),
            shell_quote(instruction),
            shell_quote_path(captures.stdout.path()),
            shell_quote_path(captures.stderr.path()),
            shell_quote_path(captures.status.path()),
        )
    }
}

/// Wrap `value` in single quotes, escaping embedded quotes as `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Kills the subprocess group on drop unless disarmed.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: killpg has no memory-safety preconditions.
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    warn!("Failed to kill agent process group {}: {}", pgid, err);
                }
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// The three capture files of one run.
struct Captures {
    stdout: NamedTempFile,
    stderr: NamedTempFile,
    status: NamedTempFile,
}

impl Captures {
    fn create(dir: &Path) -> Result<Self, Pdf2CsvError> {
        let prefix = format!("pdf2csv-{}-", chrono::Utc::now().timestamp_millis());
        let make = |suffix: &str| {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(suffix)
                .tempfile_in(dir)
                .map_err(|e| Pdf2CsvError::io(dir, e))
        };
        Ok(Self {
            stdout: make(".stdout")?,
            stderr: make(".stderr")?,
            status: make(".status")?,
        })
    }

    async fn read(file: &NamedTempFile) -> String {
        match tokio::fs::read(file.path()).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Could not read {}: {}", file.path().display(), e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl Backend for ShellBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn process(&self, job: &ExtractionJob) -> Result<BackendReply, Pdf2CsvError> {
        let captures = Captures::create(&self.capture_dir)?;
        let script = self.script(&job.instruction, &captures);
        debug!("Running agent subprocess for {}", job.input.display());

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(|e| Pdf2CsvError::io("sh", e))?;
        let mut group = GroupGuard::new(&child);

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(_)) => group.disarm(),
            Ok(Err(e)) => return Err(Pdf2CsvError::io("sh", e)),
            Err(_) => {
                warn!(
                    "Agent subprocess timed out after {:?}; killing it",
                    self.timeout
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to reap agent subprocess: {}", e);
                }
                return Err(Pdf2CsvError::AgentTimeout {
                    elapsed: self.timeout,
                });
            }
        }

        let stdout = Captures::read(&captures.stdout).await;
        let stderr = Captures::read(&captures.stderr).await;
        let status = Captures::read(&captures.status).await;
        let status = status.trim();

        if status == "0" {
            return Ok(BackendReply::ok(stdout));
        }

        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(Pdf2CsvError::AgentFailed {
            status: if status.is_empty() {
                "unknown".to_string()
            } else {
                status.to_string()
            },
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Write an executable fake agent CLI into a fresh temp dir.
        fn fake_agent(body: &str) -> (TempDir, String) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("fake-agent");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            let program = path.to_string_lossy().into_owned();
            (dir, program)
        }

        fn job(instruction: &str) -> ExtractionJob {
            ExtractionJob {
                input: "in.pdf".into(),
                output: "out.csv".into(),
                instruction: instruction.into(),
            }
        }

        fn capture_count(dir: &Path) -> usize {
            std::fs::read_dir(dir)
                .unwrap()
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("pdf2csv-"))
                .count()
        }

        #[tokio::test]
        async fn success_returns_stdout_and_cleans_captures() {
            let (dir, program) = fake_agent(r#"printf '%s|%s|%s|%s' "$1" "$3" "$5" "$7""#);
            let captures = tempfile::tempdir().unwrap();
            let backend = ShellBackend::new(program, "main", "pdf2csv").capture_dir(captures.path());

            let reply = backend
                .process(&job(r#"it's a "quoted" $HOME message"#))
                .await
                .unwrap();
            assert_eq!(
                reply.message,
                r#"agent|main|pdf2csv|it's a "quoted" $HOME message"#
            );
            assert_eq!(capture_count(captures.path()), 0);
            drop(dir);
        }

        #[tokio::test]
        async fn non_zero_exit_reports_stderr() {
            let (_dir, program) = fake_agent("echo partial; echo 'bad model' >&2; exit 3");
            let backend = ShellBackend::new(program, "main", "s");

            let err = backend.process(&job("x")).await.unwrap_err();
            match err {
                Pdf2CsvError::AgentFailed { status, detail } => {
                    assert_eq!(status, "3");
                    assert_eq!(detail, "bad model");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn empty_stderr_falls_back_to_stdout() {
            let (_dir, program) = fake_agent("echo 'only stdout'; exit 1");
            let backend = ShellBackend::new(program, "main", "s");

            let err = backend.process(&job("x")).await.unwrap_err();
            assert!(
                matches!(err, Pdf2CsvError::AgentFailed { ref detail, .. } if detail == "only stdout"),
                "got: {err}"
            );
        }

        #[tokio::test]
        async fn missing_binary_is_failure() {
            let backend = ShellBackend::new("/nonexistent/agent-bin", "main", "s");
            let err = backend.process(&job("x")).await.unwrap_err();
            assert!(matches!(err, Pdf2CsvError::AgentFailed { .. }), "got: {err}");
        }

        #[tokio::test]
        async fn slow_agent_times_out() {
            let (_dir, program) = fake_agent("sleep 10");
            let captures = tempfile::tempdir().unwrap();
            let backend = ShellBackend::new(program, "main", "s")
                .timeout(Duration::from_millis(300))
                .capture_dir(captures.path());

            let started = std::time::Instant::now();
            let err = backend.process(&job("x")).await.unwrap_err();
            assert!(matches!(err, Pdf2CsvError::AgentTimeout { .. }), "got: {err}");
            assert!(err.to_string().contains("300ms"), "got: {err}");
            assert!(started.elapsed() < Duration::from_secs(5));
            assert_eq!(capture_count(captures.path()), 0);
        }

        #[tokio::test]
        async fn timeout_kills_the_agent_not_just_the_shell() {
            let marker_dir = tempfile::tempdir().unwrap();
            let marker = marker_dir.path().join("finished");
            let (_dir, program) =
                fake_agent(&format!("sleep 1; touch {}", shell_quote_path(&marker)));
            let backend = ShellBackend::new(program, "main", "s")
                .timeout(Duration::from_millis(200));

            let err = backend.process(&job("x")).await.unwrap_err();
            assert!(matches!(err, Pdf2CsvError::AgentTimeout { .. }), "got: {err}");

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(!marker.exists(), "agent kept running after the timeout");
        }

        #[tokio::test]
        async fn dropped_request_kills_the_agent() {
            let marker_dir = tempfile::tempdir().unwrap();
            let marker = marker_dir.path().join("finished");
            let (_dir, program) =
                fake_agent(&format!("sleep 1; touch {}", shell_quote_path(&marker)));
            let backend = ShellBackend::new(program, "main", "s");

            let extraction = job("x");
            let run = backend.process(&extraction);
            assert!(tokio::time::timeout(Duration::from_millis(200), run)
                .await
                .is_err());

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(!marker.exists(), "agent kept running after the request was dropped");
        }
    }
}
