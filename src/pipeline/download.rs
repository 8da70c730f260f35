//! Download name validation and resolution.
//!
//! The name check is a pure string test: it runs before the filesystem is
//! touched, so a file named `../x.csv` is rejected even if it exists. Names
//! must be a single path component; the router percent-decodes the segment,
//! so `%2F` arrives here as a real separator.

use crate::error::Pdf2CsvError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Accept only bare names ending in `.csv` that contain no `..`.
pub fn validate_filename(name: &str) -> Result<(), Pdf2CsvError> {
    let bare = !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name));
    if !bare || !name.ends_with(".csv") || name.contains("..") {
        return Err(Pdf2CsvError::InvalidFilename {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validate `name` and return its path under `output_dir` if it exists.
pub async fn resolve(output_dir: &Path, name: &str) -> Result<PathBuf, Pdf2CsvError> {
    validate_filename(name)?;
    let path = output_dir.join(name);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => Err(Pdf2CsvError::NotFound {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn csv_names_pass() {
        assert_ok!(validate_filename("1700000000000-0123456789abcdef.csv"));
        assert_ok!(validate_filename("report.csv"));
        assert_err!(validate_filename(""));
    }

    #[test]
    fn wrong_extension_or_traversal_fails() {
        for bad in ["report.pdf", "../secret.csv", "a..b.csv", "csv", "x.csv.bak"] {
            assert!(
                matches!(
                    validate_filename(bad),
                    Err(Pdf2CsvError::InvalidFilename { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn separators_and_absolute_paths_fail() {
        for bad in ["/etc/x.csv", "sub/x.csv", r"sub\x.csv", "/x.csv", "./x.csv"] {
            assert!(
                matches!(
                    validate_filename(bad),
                    Err(Pdf2CsvError::InvalidFilename { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn resolve_stays_inside_output_dir() {
        let outputs = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let secret = elsewhere.path().join("secret.csv");
        std::fs::write(&secret, "top,secret\n").unwrap();

        let err = resolve(outputs.path(), &secret.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2CsvError::InvalidFilename { .. }));
    }

    #[tokio::test]
    async fn resolve_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(dir.path(), "nope.csv").await.unwrap_err();
        assert!(matches!(err, Pdf2CsvError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a..b.csv"), "x").unwrap();
        let err = resolve(dir.path(), "a..b.csv").await.unwrap_err();
        assert!(matches!(err, Pdf2CsvError::InvalidFilename { .. }));
    }

    #[tokio::test]
    async fn resolve_finds_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.csv"), "a\n").unwrap();
        let path = resolve(dir.path(), "t.csv").await.unwrap();
        assert_eq!(path, dir.path().join("t.csv"));
    }
}
