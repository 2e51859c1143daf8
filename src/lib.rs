//! # docmorph
//!
//! Convert between images, PDFs and spreadsheets. Rendering happens locally
//! through pdfium; table extraction and OCR are delegated to a vision model
//! that answers in a fixed JSON schema.
//!
//! ## Conversions
//!
//! | Kind | Input | Output |
//! |------|-------|--------|
//! | `pdf-to-excel`   | 1 PDF            | workbook of extracted tables |
//! | `image-to-excel` | N images         | workbook, sheets prefixed by image name |
//! | `excel-to-pdf`   | 1 `.xlsx`/`.xls` | one styled table per sheet |
//! | `image-to-pdf`   | N images         | one page per image, optional OCR layer |
//! | `compress-pdf`   | N PDFs           | re-rasterised PDF, or a ZIP when N > 1 |
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Check   formats and credential, before any I/O
//!  ├─ 2. Load    read inputs (bounded parallel)               0–10 %
//!  ├─ 3. Render  rasterise PDF pages via pdfium (spawn_blocking)
//!  ├─ 4. Extract tables / OCR via the vision model            10–80 %
//!  ├─ 5. Synth   PDF (lopdf), XLSX (zip + quick-xml)          80–100 %
//!  └─ 6. Output  one ConversionResult (ZIP for PDF batches)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmorph::{convert, ConversionConfig, ConversionKind, InputFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from GEMINI_API_KEY / API_KEY
//!     let config = ConversionConfig::default();
//!     let files = [InputFile::path("invoice.pdf")];
//!     let progress = |pct: f32, status: &str| eprintln!("{pct:>3.0}% {status}");
//!     let result = convert(ConversionKind::PdfToSpreadsheet, &files, &progress, &config).await?;
//!     std::fs::write(&result.file_name, &result.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmorph` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docmorph = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod kind;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, RenderSettings};
pub use convert::{convert, convert_sync, convert_to_file, convert_with_cancel, write_output};
pub use error::DocMorphError;
pub use job::{ConversionJob, JobHandle, JobState};
pub use kind::ConversionKind;
pub use output::{ConversionResult, SynthesizedDocument};
pub use pipeline::extract::{Accuracy, ExtractionBackend, GeminiBackend, GenerationRequest};
pub use pipeline::input::InputFile;
pub use pipeline::render::{PageRenderingProvider, PdfiumRenderer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback};
pub use tokio_util::sync::CancellationToken;
pub use types::{BoundingBox, CellValue, EncodedImage, ExtractedTable, OcrBlock, RenderedPage};
