//! Error type for the edgequake-pdf2csv library.
//!
//! [`Pdf2CsvError`] covers three families, each with its own HTTP treatment:
//!
//! * **Validation**: missing file, wrong content type, oversized upload,
//!   bad download name, bad API key, rate limit. Surfaced verbatim as 4xx.
//! * **Backend**: timeout, non-zero exit, gateway error frame, no CSV written.
//!   Surfaced as 500 after at most one strategy switch.
//! * **Infrastructure**: I/O and configuration problems.
//!
//! [`Pdf2CsvError::status_code`] is the single place that maps a variant to a
//! status; the HTTP layer only serialises.

use agent_gateway::GatewayError;
use axum::http::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors returned by the edgequake-pdf2csv library.
#[derive(Debug, Error)]
pub enum Pdf2CsvError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The multipart body had no `pdf` field.
    #[error("No PDF file uploaded (expected multipart field 'pdf')")]
    NoFile,

    /// The declared content type is not `application/pdf`.
    #[error("Only PDF files are allowed (got content type '{found}')")]
    InvalidContentType { found: String },

    /// The upload exceeded the size ceiling.
    #[error("File too large: limit is {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// The multipart body itself could not be read.
    #[error("Malformed upload: {0}")]
    Multipart(String),

    /// Download name failed the `.csv` / no-`..` guard.
    #[error("Invalid filename '{name}'")]
    InvalidFilename { name: String },

    /// Requested output does not exist (never written, or already cleaned up).
    #[error("File not found: '{name}'")]
    NotFound { name: String },

    /// `x-api-key` missing or wrong while an API key is configured.
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// Fixed-window quota exhausted for this client.
    #[error("Too many requests, please try again later")]
    RateLimited,

    // ── Backend errors ────────────────────────────────────────────────────
    /// Gateway strategy failure (connect, error frame, closed, timeout).
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The agent subprocess exited non-zero.
    #[error("Agent process failed (exit status {status}): {detail}")]
    AgentFailed { status: String, detail: String },

    /// The agent subprocess exceeded its wall-clock budget and was killed.
    #[error("Agent process timed out after {elapsed:?}")]
    AgentTimeout { elapsed: Duration },

    /// The backend reported completion but no CSV exists at the promised path.
    #[error("Processing finished but no CSV was written to '{path}'")]
    OutputMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, write or read a staged file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Pdf2CsvError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Pdf2CsvError::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Pdf2CsvError::NoFile
            | Pdf2CsvError::InvalidContentType { .. }
            | Pdf2CsvError::Multipart(_)
            | Pdf2CsvError::InvalidFilename { .. } => StatusCode::BAD_REQUEST,
            Pdf2CsvError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Pdf2CsvError::NotFound { .. } => StatusCode::NOT_FOUND,
            Pdf2CsvError::Unauthorized => StatusCode::UNAUTHORIZED,
            Pdf2CsvError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Pdf2CsvError::Gateway(_)
            | Pdf2CsvError::AgentFailed { .. }
            | Pdf2CsvError::AgentTimeout { .. }
            | Pdf2CsvError::OutputMissing { .. }
            | Pdf2CsvError::Io { .. }
            | Pdf2CsvError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error came from a backend call (and may be retried via
    /// the other strategy).
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Pdf2CsvError::Gateway(_)
                | Pdf2CsvError::AgentFailed { .. }
                | Pdf2CsvError::AgentTimeout { .. }
        )
    }
}
