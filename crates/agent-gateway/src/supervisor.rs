//! Gateway process lifecycle: spawn, readiness detection, shutdown.
//!
//! ## Startup
//!
//! ```text
//! spawn <bin> gateway --port P --bind loopback --token T
//!   │
//!   ├─ stdout/stderr line matches listening|ready|started ─▶ ready
//!   ├─ process exits first ───────────────────────────────▶ Err(ExitedEarly)
//!   └─ grace period elapses ──────────────────────────────▶ ready (assumed)
//! ```
//!
//! The last branch is an optimistic fallback: a gateway that never prints a
//! marker is treated as up, and calls that fail against it fall through to
//! the subprocess strategy.
//!
//! After startup a monitor task owns the child. It clears the readiness flag
//! if the process dies and kills the process on [`GatewaySupervisor::shutdown`]
//! (or when the supervisor is dropped).

use crate::{GatewayConfig, GatewayError, Readiness, STATE_DIR_ENV, TOKEN_ENV};
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keep at most this much process output for error reports.
const CAPTURE_LIMIT: usize = 8 * 1024;

static READY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)listening|ready|started").expect("static regex"));

/// Whether a line of gateway output announces readiness.
pub fn is_ready_line(line: &str) -> bool {
    READY_MARKER.is_match(line)
}

enum Startup {
    Confirmed,
    Assumed,
    PipesClosed,
    Exited(std::io::Result<std::process::ExitStatus>),
}

/// Owner of the (optional) gateway child process and its readiness flag.
#[derive(Debug)]
pub struct GatewaySupervisor {
    readiness: Readiness,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    pid: Option<u32>,
}

impl GatewaySupervisor {
    /// A supervisor without a gateway: readiness stays cleared and every
    /// call goes through the subprocess strategy.
    pub fn disabled() -> Self {
        Self {
            readiness: Readiness::new(),
            stop: Mutex::new(None),
            monitor: Mutex::new(None),
            pid: None,
        }
    }

    /// Probe a gateway managed by someone else. Any HTTP response on its
    /// port counts as ready.
    pub async fn probe(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let url = config.http_url();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| GatewayError::Probe {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let response = client
            .get(&url)
            .bearer_auth(&config.token)
            .send()
            .await
            .map_err(|e| GatewayError::Probe {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "External gateway answered {} on port {}",
            response.status(),
            config.port
        );
        let supervisor = Self::disabled();
        supervisor.readiness.set(true);
        Ok(supervisor)
    }

    /// Spawn the gateway and wait until it is ready (or assumed ready).
    pub async fn launch(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.subcommand)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--bind")
            .arg("loopback")
            .arg("--token")
            .arg(&config.token)
            .env(STATE_DIR_ENV, &config.state_dir)
            .env(TOKEN_ENV, &config.token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Starting gateway: {} {} (port {})",
            config.program,
            config.subcommand.join(" "),
            config.port
        );

        let mut child = cmd.spawn().map_err(|source| GatewayError::Spawn {
            program: config.program.clone(),
            source,
        })?;
        let pid = child.id();

        let captured = Arc::new(Mutex::new(String::new()));
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                stdout,
                "stdout",
                Arc::clone(&captured),
                ready_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                stderr,
                "stderr",
                Arc::clone(&captured),
                ready_tx.clone(),
            )));
        }
        drop(ready_tx);

        let startup = tokio::select! {
            res = ready_rx.wait_for(|ready| *ready) => {
                if res.is_ok() { Startup::Confirmed } else { Startup::PipesClosed }
            }
            status = child.wait() => Startup::Exited(status),
            _ = tokio::time::sleep(config.ready_grace) => Startup::Assumed,
        };

        let startup = match startup {
            Startup::PipesClosed => {
                match tokio::time::timeout(config.ready_grace, child.wait()).await {
                    Ok(status) => Startup::Exited(status),
                    Err(_) => Startup::Assumed,
                }
            }
            other => other,
        };

        match startup {
            Startup::Exited(status) => {
                for handle in pumps {
                    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
                }
                let output = snapshot(&captured);
                return Err(match status {
                    Ok(status) => GatewayError::exited_early(status, output),
                    Err(e) => GatewayError::ExitedEarly {
                        status: format!("wait failed: {e}"),
                        output,
                    },
                });
            }
            Startup::Confirmed => info!("Gateway ready on port {}", config.port),
            Startup::Assumed | Startup::PipesClosed => warn!(
                "No readiness marker from gateway within {:?}; assuming it is up",
                config.ready_grace
            ),
        }

        let readiness = Readiness::new();
        readiness.set(true);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let monitor_readiness = readiness.clone();
        let monitor = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = stop_rx => None,
            };
            monitor_readiness.set(false);
            match exited {
                Some(Ok(status)) => warn!("Gateway exited unexpectedly ({})", status),
                Some(Err(e)) => warn!("Lost track of gateway process: {}", e),
                None => match child.kill().await {
                    Ok(()) => info!("Gateway stopped"),
                    Err(e) => warn!("Failed to stop gateway: {}", e),
                },
            }
        });

        Ok(Self {
            readiness,
            stop: Mutex::new(Some(stop_tx)),
            monitor: Mutex::new(Some(monitor)),
            pid,
        })
    }

    /// Shared readiness flag.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// OS process id of the launched gateway, if any.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate the gateway (if one was launched) and wait for it to exit.
    pub async fn shutdown(&self) {
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        self.readiness.set(false);
    }
}

/// Forward one output stream line by line: log, capture, detect readiness.
async fn pump<R>(
    reader: R,
    stream: &'static str,
    captured: Arc<Mutex<String>>,
    ready: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "agent_gateway::process", stream, "{}", line);
        append_capped(&captured, &line);
        if is_ready_line(&line) {
            ready.send_replace(true);
        }
    }
}

fn append_capped(captured: &Mutex<String>, line: &str) {
    let mut buf = captured
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > CAPTURE_LIMIT {
        let mut cut = buf.len() - CAPTURE_LIMIT;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

fn snapshot(captured: &Mutex<String>) -> String {
    captured
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn ready_markers_are_case_insensitive() {
        assert!(is_ready_line("[gateway] Listening on ws://127.0.0.1:18789"));
        assert!(is_ready_line("gateway READY"));
        assert!(is_ready_line("server started in 120ms"));
        assert!(!is_ready_line("loading plugins"));
    }

    #[test]
    fn capture_keeps_the_tail() {
        let buf = Mutex::new(String::new());
        for i in 0..2000 {
            append_capped(&buf, &format!("line {i}"));
        }
        let s = snapshot(&buf);
        assert!(s.len() <= CAPTURE_LIMIT);
        assert!(s.ends_with("line 1999"));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let config = GatewayConfig::new("/definitely/not/a/gateway-binary", 1, "t");
        let err = GatewaySupervisor::launch(&config).await.unwrap_err();
        assert!(matches!(err, GatewayError::Spawn { .. }));
    }

    #[test]
    fn disabled_supervisor_is_never_ready() {
        let s = GatewaySupervisor::disabled();
        assert!(!s.readiness().is_ready());
        assert!(s.pid().is_none());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> GatewayConfig {
        let dir = std::env::temp_dir();
        GatewayConfig::new("sh", 18789, "token")
            .subcommand(["-c", script, "sh"])
            .state_dir(dir)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn readiness_marker_confirms_startup() {
        let config = sh("echo 'gateway listening on 18789'; sleep 30")
            .ready_grace(Duration::from_secs(10));
        let started = Instant::now();
        let supervisor = GatewaySupervisor::launch(&config).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(supervisor.readiness().is_ready());
        assert!(supervisor.pid().is_some());

        supervisor.shutdown().await;
        assert!(!supervisor.readiness().is_ready());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_reports_captured_output() {
        let config = sh("echo 'bad config' >&2; exit 3").ready_grace(Duration::from_secs(10));
        let err = GatewaySupervisor::launch(&config).await.unwrap_err();
        match err {
            GatewayError::ExitedEarly { output, .. } => assert!(output.contains("bad config")),
            other => panic!("unexpected error: {other}"),
        }
    }

    /// The optimistic fallback: silence for the whole grace period still
    /// counts as ready.
    #[cfg(unix)]
    #[tokio::test]
    async fn assumes_ready_after_grace_without_marker() {
        let config = sh("sleep 30").ready_grace(Duration::from_millis(200));
        let supervisor = GatewaySupervisor::launch(&config).await.unwrap();
        assert!(supervisor.readiness().is_ready());
        supervisor.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unexpected_exit_clears_readiness() {
        let config = sh("echo ready; sleep 0.3; exit 0").ready_grace(Duration::from_secs(10));
        let supervisor = GatewaySupervisor::launch(&config).await.unwrap();
        let readiness = supervisor.readiness();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn probe_marks_external_gateway_ready() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            let _ = sock
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let config = GatewayConfig::new("unused", port, "t");
        let supervisor = GatewaySupervisor::probe(&config).await.unwrap();
        assert!(supervisor.readiness().is_ready());
    }

    #[tokio::test]
    async fn probe_fails_on_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = GatewayConfig::new("unused", port, "t");
        let err = GatewaySupervisor::probe(&config).await.unwrap_err();
        assert!(matches!(err, GatewayError::Probe { .. }));
    }
}
