//! CLI binary for edgequake-pdf2csv.
//!
//! A thin shim over the library crate: maps CLI flags to `ServiceConfig`,
//! brings up the agent gateway, then serves HTTP until SIGINT/SIGTERM.

use agent_gateway::profile::{self, AgentProfile};
use agent_gateway::supervisor::GatewaySupervisor;
use agent_gateway::{GatewayConfig, DEFAULT_AGENT_BIN, DEFAULT_GATEWAY_PORT};
use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2csv::{server, Pdf2CsvService, ServiceConfig};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on :3000, launching the agent gateway
  pdf2csv

  # Require an API key and use an already running gateway
  pdf2csv --api-key s3cret --no-gateway

  # Subprocess-only mode with a custom agent binary
  pdf2csv --no-gateway --agent-bin /opt/openclaw/bin/openclaw

ENDPOINTS:
  GET  /health                    liveness + gateway readiness
  GET  /api/gateway-status        {ready, port}
  POST /api/parse                 multipart field "pdf" → {downloadUrl}
  GET  /api/download/<name>.csv   generated CSV (deleted 5 minutes later)

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY   Written into the agent's auth profile when present
  OPENAI_API_KEY      Used when ANTHROPIC_API_KEY is absent
  RUST_LOG            Overrides --verbose / --quiet
"#;

/// Serve a PDF-to-CSV HTTP API backed by a local AI-agent runtime.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2csv",
    version,
    about = "Serve a PDF table → CSV HTTP API backed by a local AI-agent runtime",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP listen address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP listen port.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Directory for staged uploads.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory the agent writes CSV files into.
    #[arg(long, env = "OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Agent runtime state directory. Default: ~/.openclaw.
    #[arg(long, env = "AGENT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Require this value in the x-api-key header of parse requests.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gateway bearer token. Generated when not set.
    #[arg(long, env = "GATEWAY_TOKEN", hide_env_values = true)]
    gateway_token: Option<String>,

    /// Gateway loopback port.
    #[arg(long, env = "GATEWAY_PORT", default_value_t = DEFAULT_GATEWAY_PORT)]
    gateway_port: u16,

    /// Agent runtime binary.
    #[arg(long, env = "AGENT_BIN", default_value = DEFAULT_AGENT_BIN)]
    agent_bin: String,

    /// Agent id used for every extraction.
    #[arg(long, env = "AGENT_ID", default_value = "main")]
    agent_id: String,

    /// Model written into the generated agent config.
    #[arg(long, env = "AGENT_MODEL", default_value = profile::DEFAULT_MODEL)]
    model: String,

    /// Do not launch a gateway; probe an external one instead.
    #[arg(long, env = "NO_GATEWAY")]
    no_gateway: bool,

    /// Seconds to wait for the gateway's readiness marker.
    #[arg(long, env = "GATEWAY_READY_GRACE", default_value_t = 5)]
    ready_grace: u64,

    /// Seconds in-flight requests get to finish after a shutdown signal.
    #[arg(long, env = "DRAIN_TIMEOUT", default_value_t = 30)]
    drain_timeout: u64,

    /// Wall-clock budget for one backend call, in seconds.
    #[arg(long, env = "BACKEND_TIMEOUT", default_value_t = 300)]
    backend_timeout: u64,

    /// Parse requests per client per hour.
    #[arg(long, env = "RATE_LIMIT", default_value_t = 100)]
    rate_limit: u32,

    /// Path to a text file with a custom instruction ({input}/{output} placeholders).
    #[arg(long, env = "PDF2CSV_PROMPT")]
    prompt_file: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CSV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    for dir in [&config.upload_dir, &config.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    let token = config
        .gateway_token
        .clone()
        .unwrap_or_else(agent_gateway::generate_token);

    // ── Gateway ──────────────────────────────────────────────────────────
    let gateway = GatewayConfig::new(&config.agent_bin, config.gateway_port, token.clone())
        .state_dir(&config.state_dir)
        .ready_grace(std::time::Duration::from_secs(cli.ready_grace));
    let supervisor = start_gateway(&config, &gateway).await;

    // ── HTTP server ──────────────────────────────────────────────────────
    let service = Arc::new(Pdf2CsvService::new(
        config.clone(),
        &token,
        supervisor.readiness(),
    ));
    let addr = format!("{}:{}", cli.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let served = server::serve_with_drain(
        listener,
        service,
        shutdown_signal(),
        std::time::Duration::from_secs(cli.drain_timeout),
        || async {
            info!("Stopping agent gateway");
            supervisor.shutdown().await;
        },
    )
    .await;
    served.context("HTTP server error")?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .port(cli.port)
        .upload_dir(&cli.upload_dir)
        .output_dir(&cli.output_dir)
        .gateway_port(cli.gateway_port)
        .agent_bin(&cli.agent_bin)
        .agent_id(&cli.agent_id)
        .model(&cli.model)
        .launch_gateway(!cli.no_gateway)
        .backend_timeout_secs(cli.backend_timeout)
        .rate_limit(cli.rate_limit);

    if let Some(dir) = &cli.state_dir {
        builder = builder.state_dir(dir);
    }
    if let Some(key) = &cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(token) = &cli.gateway_token {
        builder = builder.gateway_token(token);
    }
    if let Some(path) = &cli.prompt_file {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        builder = builder.prompt_template(template);
    }

    builder.build().context("Invalid configuration")
}

/// Launch (or probe) the gateway. Failures degrade to subprocess-only mode.
async fn start_gateway(config: &ServiceConfig, gateway: &GatewayConfig) -> GatewaySupervisor {
    if !config.launch_gateway {
        return match GatewaySupervisor::probe(gateway).await {
            Ok(supervisor) => supervisor,
            Err(e) => {
                warn!("{e}; using the agent CLI for every request");
                GatewaySupervisor::disabled()
            }
        };
    }

    write_agent_files(config, gateway);
    match GatewaySupervisor::launch(gateway).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            warn!("Gateway launch failed: {e}; using the agent CLI for every request");
            GatewaySupervisor::disabled()
        }
    }
}

/// Write the runtime's config and auth profile. Failures are logged only.
fn write_agent_files(config: &ServiceConfig, gateway: &GatewayConfig) {
    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let agent_profile = AgentProfile {
        model: config
            .model
            .clone()
            .unwrap_or_else(|| profile::DEFAULT_MODEL.to_string()),
        workspace,
        port: gateway.port,
        token: gateway.token.clone(),
    };
    if let Err(e) = profile::write_config(&gateway.state_dir, &agent_profile) {
        warn!("Could not write agent config: {e}");
    }

    match profile::provider_key_from_env() {
        Some((provider, key)) => {
            if let Err(e) =
                profile::write_auth_profile(&gateway.state_dir, &config.agent_id, provider, &key)
            {
                warn!("Could not write {provider} auth profile: {e}");
            }
        }
        None => warn!(
            "No ANTHROPIC_API_KEY or OPENAI_API_KEY set; the agent must already be authenticated"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("pdf2csv shutting down");
}
