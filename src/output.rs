//! Output types returned by the conversion pipeline.

use std::fmt;

pub const PDF_MIME: &str = "application/pdf";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const ZIP_MIME: &str = "application/zip";

/// Bytes of one synthesised document, before it is named.
#[derive(Clone, PartialEq, Eq)]
pub struct SynthesizedDocument {
    pub bytes: Vec<u8>,
    pub size: usize,
}

impl SynthesizedDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self { bytes, size }
    }
}

impl fmt::Debug for SynthesizedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedDocument")
            .field("size", &self.size)
            .finish()
    }
}

/// The single artifact of a successful job.
///
/// Only ever constructed complete: a failed job yields an error, never a
/// partially filled result.
#[derive(Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub file_name: String,
    /// Byte length of `bytes`.
    pub size: usize,
    pub mime_type: String,
}

impl ConversionResult {
    pub fn new(doc: SynthesizedDocument, file_name: impl Into<String>, mime_type: &str) -> Self {
        Self {
            size: doc.size,
            bytes: doc.bytes,
            file_name: file_name.into(),
            mime_type: mime_type.to_string(),
        }
    }

    /// Human-readable size, e.g. `"1.4 MB"`.
    pub fn display_size(&self) -> String {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut value = self.size as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} B", self.size)
        } else {
            format!("{value:.1} {}", UNITS[unit])
        }
    }
}

impl fmt::Debug for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionResult")
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}
