//! Document formats and their on-disk signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    Odt,
    Ods,
    Odp,
    Png,
    Jpeg,
    Tiff,
}

impl DocumentFormat {
    /// Parse a file-type string as stored on the job (`.docx`, `docx`, `.PDF`).
    pub fn from_file_type(file_type: &str) -> Option<Self> {
        let ext = file_type.trim().trim_start_matches('.').to_ascii_lowercase();
        Some(match ext.as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "xlsx" => Self::Xlsx,
            "pptx" => Self::Pptx,
            "odt" => Self::Odt,
            "ods" => Self::Ods,
            "odp" => Self::Odp,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "tif" | "tiff" => Self::Tiff,
            _ => return None,
        })
    }

    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_file_type)
    }

    /// File extension with the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
            Self::Xlsx => ".xlsx",
            Self::Pptx => ".pptx",
            Self::Odt => ".odt",
            Self::Ods => ".ods",
            Self::Odp => ".odp",
            Self::Png => ".png",
            Self::Jpeg => ".jpg",
            Self::Tiff => ".tiff",
        }
    }

    /// Whether source-format fix tools can edit this format directly.
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            Self::Docx | Self::Xlsx | Self::Pptx | Self::Odt | Self::Ods | Self::Odp
        )
    }

    /// Leading bytes every well-formed file of this format starts with.
    pub fn magic(self) -> &'static [u8] {
        match self {
            Self::Pdf => b"%PDF-",
            Self::Docx | Self::Xlsx | Self::Pptx | Self::Odt | Self::Ods | Self::Odp => ZIP_MAGIC,
            Self::Png => b"\x89PNG\r\n\x1a\n",
            Self::Jpeg => b"\xff\xd8\xff",
            Self::Tiff => b"II*\x00",
        }
    }

    /// Archive members that must be present in container formats.
    pub fn required_entries(self) -> &'static [&'static str] {
        match self {
            Self::Docx => &["word/document.xml", "[Content_Types].xml"],
            Self::Xlsx => &["xl/workbook.xml", "[Content_Types].xml"],
            Self::Pptx => &["ppt/presentation.xml", "[Content_Types].xml"],
            Self::Odt | Self::Ods | Self::Odp => &["content.xml", "META-INF/manifest.xml"],
            _ => &[],
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
