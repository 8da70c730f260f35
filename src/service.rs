//! Shared service state and the parse/download operations.
//!
//! [`Pdf2CsvService`] is built once at startup and shared by every request
//! handler behind an `Arc`. It owns the rate-limit map, the gateway readiness
//! handle and the backend dispatcher.

use crate::config::ServiceConfig;
use crate::error::Pdf2CsvError;
use crate::pipeline::cleanup::RemoveOnDrop;
use crate::pipeline::dispatch::{Backend, Dispatcher, ExtractionJob};
use crate::pipeline::gateway::GatewayBackend;
use crate::pipeline::shell::ShellBackend;
use crate::pipeline::upload::{self, PendingUpload};
use crate::pipeline::{download, reply};
use crate::prompts::extraction_prompt;
use crate::rate_limit::RateLimiter;
use agent_gateway::client::AgentClient;
use agent_gateway::Readiness;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Result of a successful parse.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// CSV name under the output directory.
    pub filename: String,
    /// Summarised backend reply.
    pub message: String,
}

impl ParseOutcome {
    pub fn download_url(&self) -> String {
        format!("/api/download/{}", self.filename)
    }
}

/// A resolved CSV ready to stream.
#[derive(Debug)]
pub struct Download {
    pub path: PathBuf,
    /// Keep alive for the length of the transfer; dropping it starts the
    /// deletion timer.
    pub cleanup: RemoveOnDrop,
}

/// Process-wide state shared by all requests.
#[derive(Debug)]
pub struct Pdf2CsvService {
    config: ServiceConfig,
    limiter: RateLimiter,
    dispatcher: Dispatcher,
}

impl Pdf2CsvService {
    /// Build the service with the real gateway and subprocess backends.
    ///
    /// `gateway_token` must match the token the gateway was started with.
    pub fn new(config: ServiceConfig, gateway_token: &str, readiness: Readiness) -> Self {
        let client = AgentClient::new(
            format!("ws://127.0.0.1:{}", config.gateway_port),
            gateway_token,
        )
        .timeout(config.backend_timeout());
        let gateway = GatewayBackend::new(client, &config.agent_id, config.session_key());
        let subprocess = ShellBackend::new(&config.agent_bin, &config.agent_id, &config.session_id)
            .timeout(config.backend_timeout());
        Self::with_backends(config, Arc::new(gateway), Arc::new(subprocess), readiness)
    }

    /// Build the service around arbitrary backends.
    pub fn with_backends(
        config: ServiceConfig,
        gateway: Arc<dyn Backend>,
        subprocess: Arc<dyn Backend>,
        readiness: Readiness,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_window);
        Self {
            dispatcher: Dispatcher::new(gateway, subprocess, readiness),
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn readiness(&self) -> &Readiness {
        self.dispatcher.readiness()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Check the `x-api-key` value against the configured key, if any.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), Pdf2CsvError> {
        match &self.config.api_key {
            None => Ok(()),
            Some(expected) if presented == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(Pdf2CsvError::Unauthorized),
        }
    }

    /// Count one request from `identity` against its window.
    pub fn admit(&self, identity: &str) -> Result<(), Pdf2CsvError> {
        if self.limiter.allow(identity) {
            Ok(())
        } else {
            warn!("Rate limit exceeded for {}", identity);
            Err(Pdf2CsvError::RateLimited)
        }
    }

    /// Stage `pending`, run the extraction and confirm a CSV was written.
    ///
    /// The output file is the source of truth: if it exists after dispatch
    /// the parse succeeds whatever the backend reported.
    pub async fn parse(&self, pending: PendingUpload) -> Result<ParseOutcome, Pdf2CsvError> {
        let record = upload::persist(&self.config.upload_dir, pending).await?;
        let _staged = RemoveOnDrop::new(
            record.path.clone(),
            Duration::from_secs(self.config.upload_cleanup_secs),
        );

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| Pdf2CsvError::io(&self.config.output_dir, e))?;
        let filename = record.output_name();
        let output = std::path::absolute(self.config.output_dir.join(&filename))
            .map_err(|e| Pdf2CsvError::io(&self.config.output_dir, e))?;

        let job = ExtractionJob {
            instruction: extraction_prompt(
                &record.path,
                &output,
                self.config.prompt_template.as_deref(),
            ),
            input: record.path.clone(),
            output: output.clone(),
        };

        info!("Processing {} -> {}", record.filename, filename);
        let result = self.dispatcher.dispatch(&job).await;

        let written = tokio::fs::try_exists(&output).await.unwrap_or(false);
        match (result, written) {
            (Ok(reply), true) => Ok(ParseOutcome {
                filename,
                message: reply::summarize(&reply.message),
            }),
            (Err(e), true) => {
                warn!("Backend reported failure but {} exists: {}", filename, e);
                Ok(ParseOutcome {
                    filename,
                    message: reply::DEFAULT_SUMMARY.to_string(),
                })
            }
            (Ok(_), false) => {
                error!("Backend finished but {} was not written", output.display());
                Err(Pdf2CsvError::OutputMissing { path: output })
            }
            (Err(e), false) => {
                error!("Processing {} failed: {}", record.filename, e);
                Err(e)
            }
        }
    }

    /// Resolve a download. The file is deleted a fixed delay after the
    /// returned [`Download`] is dropped.
    pub async fn download(&self, name: &str) -> Result<Download, Pdf2CsvError> {
        let path = download::resolve(&self.config.output_dir, name).await?;
        let cleanup = RemoveOnDrop::new(
            path.clone(),
            Duration::from_secs(self.config.download_cleanup_secs),
        );
        Ok(Download { path, cleanup })
    }
}
