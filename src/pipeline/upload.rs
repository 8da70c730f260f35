//! Upload intake: read the `pdf` multipart field, validate it, stage it.
//!
//! Validation happens before anything is written: the content type is checked
//! from the field headers, and the body is buffered in memory while counting
//! bytes so an oversized file is dropped without touching the disk.

use crate::error::Pdf2CsvError;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Multipart field carrying the document.
pub const FIELD_NAME: &str = "pdf";

/// The only accepted content type.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A PDF received from a client but not yet written anywhere.
#[derive(Debug)]
pub struct PendingUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub original_name: Option<String>,
}

/// An accepted upload staged on disk.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    /// Generated name, `<millis>-<16 hex>.pdf`.
    pub filename: String,
    /// Absolute path of the stored file.
    pub path: PathBuf,
    pub size: u64,
    pub content_type: String,
    /// Name the client sent, for logging only.
    pub original_name: Option<String>,
}

impl UploadRecord {
    /// Generated name without the `.pdf` extension.
    pub fn stem(&self) -> &str {
        self.filename
            .strip_suffix(".pdf")
            .unwrap_or(&self.filename)
    }

    /// Name of the CSV the agent is asked to produce for this upload.
    pub fn output_name(&self) -> String {
        format!("{}.csv", self.stem())
    }
}

/// Reject anything that is not declared as `application/pdf`.
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), Pdf2CsvError> {
    match content_type {
        Some(ct) if ct.eq_ignore_ascii_case(PDF_CONTENT_TYPE) => Ok(()),
        other => Err(Pdf2CsvError::InvalidContentType {
            found: other.unwrap_or("none").to_string(),
        }),
    }
}

/// Unique stored name: millisecond timestamp plus 16 random hex characters.
pub fn generate_name() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{}.pdf", chrono::Utc::now().timestamp_millis(), hex)
}

/// Pull the `pdf` field out of a multipart body.
///
/// Other fields are skipped. Fails with [`Pdf2CsvError::NoFile`] when the
/// body has no `pdf` field.
pub async fn receive(
    multipart: &mut Multipart,
    limit: u64,
) -> Result<PendingUpload, Pdf2CsvError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FIELD_NAME) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        validate_content_type(field.content_type())?;
        let content_type = field.content_type().unwrap_or(PDF_CONTENT_TYPE).to_string();
        let original_name = field.file_name().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, limit))?
        {
            if (bytes.len() + chunk.len()) as u64 > limit {
                return Err(Pdf2CsvError::FileTooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(PendingUpload {
            bytes,
            content_type,
            original_name,
        });
    }
    Err(Pdf2CsvError::NoFile)
}

fn multipart_error(e: MultipartError, limit: u64) -> Pdf2CsvError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Pdf2CsvError::FileTooLarge { limit }
    } else {
        Pdf2CsvError::Multipart(e.body_text())
    }
}

/// Write an accepted upload to `<upload_dir>/<generated name>`.
pub async fn persist(
    upload_dir: &Path,
    upload: PendingUpload,
) -> Result<UploadRecord, Pdf2CsvError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| Pdf2CsvError::io(upload_dir, e))?;

    let filename = generate_name();
    let path = std::path::absolute(upload_dir.join(&filename))
        .map_err(|e| Pdf2CsvError::io(upload_dir.join(&filename), e))?;
    tokio::fs::write(&path, &upload.bytes)
        .await
        .map_err(|e| Pdf2CsvError::io(&path, e))?;

    info!(
        "Stored upload {} ({} bytes, client name {:?})",
        filename,
        upload.bytes.len(),
        upload.original_name
    );
    Ok(UploadRecord {
        filename,
        path,
        size: upload.bytes.len() as u64,
        content_type: upload.content_type,
        original_name: upload.original_name,
    })
}
