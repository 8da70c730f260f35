//! Backend selection: gateway first when it is ready, subprocess otherwise.
//!
//! ## Policy
//!
//! | Readiness | Gateway result | Action |
//! |-----------|----------------|--------|
//! | set | `Ok` | return it |
//! | set | `Err` | warn, run the subprocess, return its result |
//! | clear | n/a | run the subprocess only |
//!
//! At most one switch per request; no retries, no backoff. When both
//! strategies fail the subprocess error is the one surfaced.

use crate::error::Pdf2CsvError;
use agent_gateway::Readiness;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a backend needs to run one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Rendered natural-language instruction.
    pub instruction: String,
}

/// What a backend reports back on success; failures travel as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub message: String,
}

impl BackendReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One way of reaching the agent runtime.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn process(&self, job: &ExtractionJob) -> Result<BackendReply, Pdf2CsvError>;
}

/// Chooses between the gateway and subprocess strategies per request.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn Backend>,
    subprocess: Arc<dyn Backend>,
    readiness: Readiness,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("gateway", &self.gateway.name())
            .field("subprocess", &self.subprocess.name())
            .field("ready", &self.readiness.is_ready())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn Backend>,
        subprocess: Arc<dyn Backend>,
        readiness: Readiness,
    ) -> Self {
        Self {
            gateway,
            subprocess,
            readiness,
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Run `job` on the preferred backend, switching once on failure.
    pub async fn dispatch(&self, job: &ExtractionJob) -> Result<BackendReply, Pdf2CsvError> {
        if self.readiness.is_ready() {
            match self.gateway.process(job).await {
                Ok(reply) => {
                    info!("{} backend finished {}", self.gateway.name(), job.input.display());
                    return Ok(reply);
                }
                Err(e) => warn!(
                    "{} backend failed ({}); falling back to {}",
                    self.gateway.name(),
                    e,
                    self.subprocess.name()
                ),
            }
        }

        let reply = self.subprocess.process(job).await?;
        info!("{} backend finished {}", self.subprocess.name(), job.input.display());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        calls: AtomicUsize,
        fail_with: Option<&'static str>,
    }

    impl Scripted {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail_with: None,
            })
        }

        fn failing(name: &'static str, msg: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail_with: Some(msg),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&self, _job: &ExtractionJob) -> Result<BackendReply, Pdf2CsvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(msg) => Err(Pdf2CsvError::AgentFailed {
                    status: "1".into(),
                    detail: msg.into(),
                }),
                None => Ok(BackendReply::ok(self.name)),
            }
        }
    }

    fn job() -> ExtractionJob {
        ExtractionJob {
            input: "in.pdf".into(),
            output: "out.csv".into(),
            instruction: "extract".into(),
        }
    }

    fn ready(v: bool) -> Readiness {
        let r = Readiness::new();
        r.set(v);
        r
    }

    #[tokio::test]
    async fn ready_gateway_is_used() {
        let gw = Scripted::ok("gateway");
        let sh = Scripted::ok("subprocess");
        let d = Dispatcher::new(gw.clone(), sh.clone(), ready(true));

        let reply = d.dispatch(&job()).await.unwrap();
        assert_eq!(reply.message, "gateway");
        assert_eq!((gw.calls(), sh.calls()), (1, 0));
    }

    #[tokio::test]
    async fn not_ready_skips_gateway() {
        let gw = Scripted::ok("gateway");
        let sh = Scripted::ok("subprocess");
        let d = Dispatcher::new(gw.clone(), sh.clone(), ready(false));

        let reply = d.dispatch(&job()).await.unwrap();
        assert_eq!(reply.message, "subprocess");
        assert_eq!((gw.calls(), sh.calls()), (0, 1));
    }

    #[tokio::test]
    async fn gateway_error_falls_back_to_subprocess() {
        let gw = Scripted::failing("gateway", "socket closed");
        let sh = Scripted::ok("subprocess");
        let d = Dispatcher::new(gw.clone(), sh.clone(), ready(true));

        let reply = d.dispatch(&job()).await.unwrap();
        assert_eq!(reply.message, "subprocess");
        assert_eq!((gw.calls(), sh.calls()), (1, 1));
    }

    #[tokio::test]
    async fn both_failing_surfaces_subprocess_error() {
        let gw = Scripted::failing("gateway", "gateway boom");
        let sh = Scripted::failing("subprocess", "cli boom");
        let d = Dispatcher::new(gw, sh, ready(true));

        let err = d.dispatch(&job()).await.unwrap_err();
        assert!(err.to_string().contains("cli boom"), "got: {err}");
    }
}
