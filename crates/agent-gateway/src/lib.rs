//! # agent-gateway
//!
//! Launch, health-check and talk to a local AI-agent gateway process.
//!
//! The agent runtime (by default the `openclaw` binary) is an opaque
//! collaborator. This crate owns everything needed to reach it:
//!
//! 1. [`profile`] writes the JSON config files the runtime reads at start.
//! 2. [`supervisor`] spawns `<bin> gateway …`, watches its output for a
//!    readiness marker and terminates it on shutdown.
//! 3. [`client`] performs one request/response exchange over the gateway's
//!    WebSocket: connect handshake, a single agent request, then frames are
//!    accumulated until a terminal frame, an error, a close, or the timeout.
//! 4. [`protocol`] holds the wire frames shared by both directions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agent_gateway::{client::AgentClient, supervisor::GatewaySupervisor, GatewayConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), agent_gateway::GatewayError> {
//! let config = GatewayConfig::new("openclaw", 18789, agent_gateway::generate_token());
//! let supervisor = GatewaySupervisor::launch(&config).await?;
//!
//! if supervisor.readiness().is_ready() {
//!     let client = AgentClient::new(config.ws_url(), config.token.clone())
//!         .timeout(Duration::from_secs(300));
//!     let reply = client.send("main", "agent:main:main", "Say hello").await?;
//!     println!("{reply}");
//! }
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment
//!
//! | Variable | Set on | Meaning |
//! |----------|--------|---------|
//! | `OPENCLAW_STATE_DIR` | gateway child | Where the runtime keeps config/sessions |
//! | `OPENCLAW_GATEWAY_TOKEN` | gateway child | Bearer token clients must present |

use rand::RngCore;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod client;
pub mod profile;
pub mod protocol;
pub mod supervisor;

// ── Public constants ─────────────────────────────────────────────────────────

/// Port the gateway listens on unless configured otherwise.
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// Agent runtime binary looked up on `PATH` by default.
pub const DEFAULT_AGENT_BIN: &str = "openclaw";

/// How long the supervisor waits for a readiness marker before assuming
/// the gateway is up anyway.
pub const DEFAULT_READY_GRACE: Duration = Duration::from_secs(5);

/// Environment variable carrying the runtime's state directory.
pub const STATE_DIR_ENV: &str = "OPENCLAW_STATE_DIR";

/// Environment variable carrying the gateway bearer token.
pub const TOKEN_ENV: &str = "OPENCLAW_GATEWAY_TOKEN";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by agent-gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway or agent binary could not be started at all.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The gateway process exited before it ever reported readiness.
    #[error("Gateway exited before becoming ready ({status})\n{output}")]
    ExitedEarly { status: String, output: String },

    /// The WebSocket connection could not be opened.
    #[error("Failed to connect to gateway at {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The gateway answered with an `error` frame.
    #[error("Gateway error: {0}")]
    Remote(String),

    /// The socket closed before any content or terminal frame arrived.
    #[error("Gateway connection closed before a response was received")]
    ConnectionClosed,

    /// The whole exchange exceeded its wall-clock budget.
    #[error("Gateway call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Reading from or writing to the socket failed mid-exchange.
    #[error("WebSocket transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded.
    #[error("Failed to encode gateway frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Writing generated config files failed.
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The externally managed gateway did not answer the probe.
    #[error("Gateway probe to {url} failed: {reason}")]
    Probe { url: String, reason: String },
}

impl GatewayError {
    pub(crate) fn exited_early(status: ExitStatus, output: String) -> Self {
        GatewayError::ExitedEarly {
            status: status.to_string(),
            output,
        }
    }
}

// ── Readiness handle ─────────────────────────────────────────────────────────

/// Process-wide "the gateway can take WebSocket calls" flag.
///
/// Cloning shares the flag. The supervisor writes it; request handlers read
/// it before every backend call.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// A flag that starts cleared.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

/// How to launch (or find) the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Agent runtime binary, resolved through `PATH` when relative.
    pub program: String,
    /// Arguments placed before the generated `--port/--bind/--token` flags.
    /// Default: `["gateway"]`.
    pub subcommand: Vec<String>,
    /// Loopback port the gateway listens on.
    pub port: u16,
    /// Bearer token presented in the connect handshake.
    pub token: String,
    /// Runtime state directory exported as [`STATE_DIR_ENV`].
    pub state_dir: PathBuf,
    /// Readiness grace period; see [`DEFAULT_READY_GRACE`].
    pub ready_grace: Duration,
}

impl GatewayConfig {
    pub fn new(program: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            subcommand: vec!["gateway".to_string()],
            port,
            token: token.into(),
            state_dir: default_state_dir(),
            ready_grace: DEFAULT_READY_GRACE,
        }
    }

    pub fn subcommand<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subcommand = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn ready_grace(mut self, grace: Duration) -> Self {
        self.ready_grace = grace;
        self
    }

    /// WebSocket endpoint of the local gateway.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Plain HTTP endpoint used by [`supervisor::GatewaySupervisor::probe`].
    pub fn http_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }
}

/// Default runtime state directory: `~/.openclaw`, or a temp-dir fallback
/// when no home directory can be determined.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".openclaw")
}

/// Generate a fresh bearer token: 32 random bytes, lowercase hex.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
