//! # edgequake-pdf2csv
//!
//! HTTP service that extracts the tables of an uploaded PDF into a CSV file
//! by delegating the work to a local AI-agent runtime.
//!
//! ## Request Flow
//!
//! ```text
//! POST /api/parse
//!  │
//!  ├─ 1. Auth      optional x-api-key check
//!  ├─ 2. Limit     fixed-window quota per client
//!  ├─ 3. Upload    validate + stage the PDF
//!  ├─ 4. Dispatch  gateway over WebSocket, else one-shot agent CLI
//!  ├─ 5. Verify    the CSV on disk is the source of truth
//!  └─ 6. Respond   download URL; file deleted 5 minutes after download
//! ```
//!
//! The gateway process itself is launched and watched by the
//! [`agent_gateway`] crate; this crate only reads its readiness flag.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2csv::{server, Pdf2CsvService, ServiceConfig};
//! use agent_gateway::Readiness;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().port(3000).build()?;
//!     let service = Arc::new(Pdf2CsvService::new(config, "token", Readiness::new()));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     server::serve(listener, service, async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2csv` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod rate_limit;
pub mod server;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::Pdf2CsvError;
pub use pipeline::dispatch::{Backend, BackendReply, ExtractionJob};
pub use pipeline::upload::{PendingUpload, UploadRecord};
pub use rate_limit::RateLimiter;
pub use service::{ParseOutcome, Pdf2CsvService};
