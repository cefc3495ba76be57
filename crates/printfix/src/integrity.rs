//! Post-fix document validation and the backup/restore pair around it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::format::DocumentFormat;
use crate::services::{IntegrityReport, IntegrityValidator};

const CENTRAL_DIR_SIGNATURE: &[u8] = b"PK\x01\x02";
const CENTRAL_DIR_NAME_LEN_OFFSET: usize = 28;
const CENTRAL_DIR_HEADER_LEN: usize = 46;
const PDF_TRAILER_WINDOW: usize = 1024;

/// Signature-level validation: existence, non-empty, magic bytes, and for
/// container formats the presence of the required archive members.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureValidator;

impl SignatureValidator {
    /// Validate an in-memory document.
    pub fn check_bytes(
        path: &Path,
        format: Option<DocumentFormat>,
        bytes: &[u8],
    ) -> IntegrityReport {
        if bytes.is_empty() {
            return IntegrityReport::corrupt(path, format, "file is empty (0 bytes)");
        }
        let Some(format) = format else {
            return IntegrityReport::valid(path, None, "no structural check available for this format");
        };

        if !bytes.starts_with(format.magic()) {
            return IntegrityReport::corrupt(
                path,
                Some(format),
                format!("magic bytes mismatch for {format}"),
            );
        }

        match format {
            DocumentFormat::Pdf => {
                let tail = &bytes[bytes.len().saturating_sub(PDF_TRAILER_WINDOW)..];
                if contains(tail, b"%%EOF") {
                    IntegrityReport::valid(path, Some(format), "valid PDF signature and trailer")
                } else {
                    IntegrityReport::corrupt(path, Some(format), "PDF trailer (%%EOF) missing")
                }
            }
            f if !f.required_entries().is_empty() => {
                let names = archive_entry_names(bytes);
                if names.is_empty() {
                    return IntegrityReport::corrupt(
                        path,
                        Some(f),
                        "invalid ZIP archive: no central directory entries",
                    );
                }
                let missing: Vec<&str> = f
                    .required_entries()
                    .iter()
                    .copied()
                    .filter(|required| !names.iter().any(|n| n == required))
                    .collect();
                if missing.is_empty() {
                    IntegrityReport::valid(path, Some(f), "valid ZIP structure")
                } else {
                    IntegrityReport::corrupt(
                        path,
                        Some(f),
                        format!("missing required entries: {}", missing.join(", ")),
                    )
                }
            }
            f => IntegrityReport::valid(path, Some(f), "valid signature"),
        }
    }
}

#[async_trait]
impl IntegrityValidator for SignatureValidator {
    async fn validate(&self, path: &Path, format: Option<DocumentFormat>) -> IntegrityReport {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::check_bytes(path, format, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                IntegrityReport::corrupt(path, format, "file does not exist")
            }
            Err(e) => IntegrityReport::corrupt(path, format, format!("unreadable: {e}")),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// File names from the ZIP central directory records.
fn archive_entry_names(bytes: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut offset = 0;
    while let Some(pos) = find(&bytes[offset..], CENTRAL_DIR_SIGNATURE) {
        let header = offset + pos;
        let len_at = header + CENTRAL_DIR_NAME_LEN_OFFSET;
        let name_at = header + CENTRAL_DIR_HEADER_LEN;
        let Some(len_bytes) = bytes.get(len_at..len_at + 2) else {
            break;
        };
        let name_len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if let Some(name) = bytes.get(name_at..name_at + name_len) {
            names.push(String::from_utf8_lossy(name).into_owned());
        }
        offset = header + CENTRAL_DIR_SIGNATURE.len();
    }
    names
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Backup / restore ──────────────────────────────────────────────────

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Copy `path` to `<path>.bak`.
pub async fn create_backup(path: &Path) -> std::io::Result<PathBuf> {
    let backup = backup_path(path);
    tokio::fs::copy(path, &backup).await?;
    debug!(path = %path.display(), "Backup created");
    Ok(backup)
}

/// Copy the backup over `path` and remove it.
pub async fn restore_from_backup(path: &Path, backup: &Path) -> std::io::Result<()> {
    tokio::fs::copy(backup, path).await?;
    tokio::fs::remove_file(backup).await?;
    debug!(path = %path.display(), "Restored from backup");
    Ok(())
}

/// Remove a backup that is no longer needed. Missing is fine.
pub async fn cleanup_backup(backup: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(backup).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
