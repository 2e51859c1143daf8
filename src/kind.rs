//! Conversion kinds and the input formats each one accepts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five conversions the pipeline knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionKind {
    /// One PDF → one spreadsheet of extracted tables.
    #[serde(rename = "pdf-to-excel")]
    PdfToSpreadsheet,
    /// One spreadsheet → one PDF, a styled table per sheet.
    #[serde(rename = "excel-to-pdf")]
    SpreadsheetToPdf,
    /// N images → one PDF, optionally with a searchable text layer.
    #[serde(rename = "image-to-pdf")]
    ImageToPdf,
    /// N PDFs → N re-rasterised, smaller PDFs (zipped when N > 1).
    #[serde(rename = "compress-pdf")]
    CompressPdf,
    /// N images → one spreadsheet of extracted tables.
    #[serde(rename = "image-to-excel")]
    ImageToSpreadsheet,
}

const SPREADSHEET_IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const SPREADSHEET_IMAGE_EXTS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

impl ConversionKind {
    pub const ALL: [ConversionKind; 5] = [
        ConversionKind::PdfToSpreadsheet,
        ConversionKind::SpreadsheetToPdf,
        ConversionKind::ImageToPdf,
        ConversionKind::CompressPdf,
        ConversionKind::ImageToSpreadsheet,
    ];

    /// Stable identifier, also accepted by [`FromStr`].
    pub fn id(self) -> &'static str {
        match self {
            ConversionKind::PdfToSpreadsheet => "pdf-to-excel",
            ConversionKind::SpreadsheetToPdf => "excel-to-pdf",
            ConversionKind::ImageToPdf => "image-to-pdf",
            ConversionKind::CompressPdf => "compress-pdf",
            ConversionKind::ImageToSpreadsheet => "image-to-excel",
        }
    }

    /// Format predicate for one input file.
    ///
    /// `mime` is whatever the caller knows (an upload's declared type or a
    /// guess from the extension); an empty string means unknown.
    pub fn accepts(self, name: &str, mime: &str) -> bool {
        let name = name.to_lowercase();
        let mime = mime.to_lowercase();
        match self {
            ConversionKind::PdfToSpreadsheet | ConversionKind::CompressPdf => {
                mime == "application/pdf" || name.ends_with(".pdf")
            }
            ConversionKind::SpreadsheetToPdf => name.ends_with(".xlsx") || name.ends_with(".xls"),
            ConversionKind::ImageToSpreadsheet => {
                SPREADSHEET_IMAGE_MIMES.contains(&mime.as_str())
                    || SPREADSHEET_IMAGE_EXTS.iter().any(|ext| name.ends_with(ext))
            }
            ConversionKind::ImageToPdf => mime.starts_with("image/"),
        }
    }

    /// `true` when the kind takes exactly one input file.
    pub fn single_input(self) -> bool {
        matches!(
            self,
            ConversionKind::PdfToSpreadsheet | ConversionKind::SpreadsheetToPdf
        )
    }

    /// `true` when inputs must be PDFs (and are sniffed for the `%PDF` magic).
    pub fn pdf_input(self) -> bool {
        matches!(
            self,
            ConversionKind::PdfToSpreadsheet | ConversionKind::CompressPdf
        )
    }

    /// Whether a job of this kind calls the extraction service.
    pub fn needs_extraction(self, use_ocr: bool) -> bool {
        match self {
            ConversionKind::PdfToSpreadsheet | ConversionKind::ImageToSpreadsheet => true,
            ConversionKind::ImageToPdf => use_ocr,
            ConversionKind::SpreadsheetToPdf | ConversionKind::CompressPdf => false,
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ConversionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        ConversionKind::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ConversionKind::ALL.iter().map(|k| k.id()).collect();
                format!("unknown conversion '{s}', expected one of: {}", known.join(", "))
            })
    }
}
