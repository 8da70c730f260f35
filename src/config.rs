//! Configuration for the PDF-to-CSV service.
//!
//! Every knob lives in [`ServiceConfig`], built through
//! [`ServiceConfigBuilder`]. The binary maps its CLI flags onto the builder;
//! tests build configs directly with temp directories.

use crate::error::Pdf2CsvError;
use agent_gateway::{DEFAULT_AGENT_BIN, DEFAULT_GATEWAY_PORT};
use std::path::PathBuf;
use std::time::Duration;

/// Upload size ceiling: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Requests allowed per client per window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Fixed rate-limit window: one hour.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(3600);

/// Configuration for a [`crate::service::Pdf2CsvService`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2csv::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(8080)
///     .upload_dir("/tmp/uploads")
///     .output_dir("/tmp/outputs")
///     .api_key("s3cret")
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// HTTP listen port. Default: 3000.
    pub port: u16,

    /// Where accepted uploads are staged. Default: `./uploads`.
    pub upload_dir: PathBuf,

    /// Where the agent writes CSV files and downloads are served from.
    /// Default: `./outputs`.
    pub output_dir: PathBuf,

    /// Agent runtime state directory. Default: `~/.openclaw`.
    pub state_dir: PathBuf,

    /// When set, `POST /api/parse` requires a matching `x-api-key` header.
    pub api_key: Option<String>,

    /// Loopback port of the gateway. Default: 18789.
    pub gateway_port: u16,

    /// Gateway bearer token. Generated at startup when absent.
    pub gateway_token: Option<String>,

    /// Agent runtime binary. Default: `openclaw`.
    pub agent_bin: String,

    /// Agent id used by both strategies. Default: `main`.
    pub agent_id: String,

    /// Session key for gateway calls. Default: `agent:<id>:main`.
    pub session_key: Option<String>,

    /// Session id for subprocess calls. Default: `pdf2csv`.
    pub session_id: String,

    /// Model written into the generated agent config.
    pub model: Option<String>,

    /// Spawn and supervise the gateway. Default: true.
    pub launch_gateway: bool,

    /// Wall-clock budget for one backend call, in seconds. Default: 300.
    pub backend_timeout_secs: u64,

    /// Upload size ceiling in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Requests per client per window. Default: 100.
    pub rate_limit: u32,

    /// Rate-limit window length. Default: 1 hour.
    pub rate_window: Duration,

    /// Delay before a processed upload is deleted, in seconds. Default: 60.
    pub upload_cleanup_secs: u64,

    /// Delay before a served CSV is deleted, in seconds. Default: 300.
    pub download_cleanup_secs: u64,

    /// Custom extraction instruction with `{input}` / `{output}` placeholders.
    /// If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt_template: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            state_dir: agent_gateway::default_state_dir(),
            api_key: None,
            gateway_port: DEFAULT_GATEWAY_PORT,
            gateway_token: None,
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
            agent_id: "main".to_string(),
            session_key: None,
            session_id: "pdf2csv".to_string(),
            model: None,
            launch_gateway: true,
            backend_timeout_secs: 300,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            upload_cleanup_secs: 60,
            download_cleanup_secs: 300,
            prompt_template: None,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("port", &self.port)
            .field("upload_dir", &self.upload_dir)
            .field("output_dir", &self.output_dir)
            .field("state_dir", &self.state_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("gateway_port", &self.gateway_port)
            .field(
                "gateway_token",
                &self.gateway_token.as_ref().map(|_| "<redacted>"),
            )
            .field("agent_bin", &self.agent_bin)
            .field("agent_id", &self.agent_id)
            .field("launch_gateway", &self.launch_gateway)
            .field("backend_timeout_secs", &self.backend_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window", &self.rate_window)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Session key for gateway calls, derived from the agent id when unset.
    pub fn session_key(&self) -> String {
        self.session_key
            .clone()
            .unwrap_or_else(|| format!("agent:{}:main", self.agent_id))
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.state_dir = dir.into();
        self
    }

    /// Empty keys are treated as "no key configured".
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn gateway_port(mut self, port: u16) -> Self {
        self.config.gateway_port = port;
        self
    }

    pub fn gateway_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.config.gateway_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn agent_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.agent_bin = bin.into();
        self
    }

    pub fn agent_id(mut self, id: impl Into<String>) -> Self {
        self.config.agent_id = id.into();
        self
    }

    pub fn session_key(mut self, key: impl Into<String>) -> Self {
        self.config.session_key = Some(key.into());
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.config.session_id = id.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn launch_gateway(mut self, v: bool) -> Self {
        self.config.launch_gateway = v;
        self
    }

    pub fn backend_timeout_secs(mut self, secs: u64) -> Self {
        self.config.backend_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn rate_limit(mut self, n: u32) -> Self {
        self.config.rate_limit = n;
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.config.rate_window = window;
        self
    }

    pub fn upload_cleanup_secs(mut self, secs: u64) -> Self {
        self.config.upload_cleanup_secs = secs;
        self
    }

    pub fn download_cleanup_secs(mut self, secs: u64) -> Self {
        self.config.download_cleanup_secs = secs;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Pdf2CsvError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        if c.rate_limit == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "Rate limit must be ≥ 1 request per window".into(),
            ));
        }
        if c.rate_window.is_zero() {
            return Err(Pdf2CsvError::InvalidConfig(
                "Rate-limit window must be non-zero".into(),
            ));
        }
        if c.agent_bin.trim().is_empty() {
            return Err(Pdf2CsvError::InvalidConfig(
                "Agent binary must not be empty".into(),
            ));
        }
        if c.agent_id.trim().is_empty() {
            return Err(Pdf2CsvError::InvalidConfig(
                "Agent id must not be empty".into(),
            ));
        }
        if let Some(t) = &c.prompt_template {
            if !t.contains("{input}") || !t.contains("{output}") {
                return Err(Pdf2CsvError::InvalidConfig(
                    "Prompt template must contain {input} and {output}".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = ServiceConfig::default();
        assert_eq!(c.port, 3000);
        assert_eq!(c.gateway_port, 18789);
        assert_eq!(c.agent_bin, "openclaw");
        assert_eq!(c.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(c.rate_limit, 100);
        assert_eq!(c.rate_window, Duration::from_secs(3600));
        assert_eq!(c.backend_timeout_secs, 300);
        assert!(c.launch_gateway);
        assert!(c.api_key.is_none());
    }

    #[test]
    fn session_key_derives_from_agent_id() {
        let c = ServiceConfig::builder().agent_id("tables").build().unwrap();
        assert_eq!(c.session_key(), "agent:tables:main");

        let c = ServiceConfig::builder().session_key("custom").build().unwrap();
        assert_eq!(c.session_key(), "custom");
    }

    #[test]
    fn empty_api_key_means_no_auth() {
        let c = ServiceConfig::builder().api_key("").build().unwrap();
        assert!(c.api_key.is_none());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let err = ServiceConfig::builder().rate_limit(0).build().unwrap_err();
        assert!(matches!(err, Pdf2CsvError::InvalidConfig(_)));
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        let err = ServiceConfig::builder()
            .prompt_template("extract the tables")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{input}"));
    }

    #[test]
    fn timeout_is_clamped_to_one_second() {
        let c = ServiceConfig::builder()
            .backend_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.backend_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = ServiceConfig::builder()
            .api_key("hunter2")
            .gateway_token("tok")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("\"tok\""));
    }
}
