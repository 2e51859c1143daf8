//! Error type for the docmorph library.
//!
//! Every failure a conversion can hit is a variant of [`DocMorphError`].
//! Two groups are worth telling apart:
//!
//! * **Precondition failures** ([`DocMorphError::UnsupportedFormat`],
//!   [`DocMorphError::InvalidInput`], [`DocMorphError::MissingCredential`]) are
//!   detected before any file is read or any request is sent. Nothing has
//!   happened yet, so the caller can fix the input and try again.
//!
//! * **Pipeline failures** (everything else) happen mid-job. A job yields
//!   exactly one artifact or none, so these also leave nothing behind; the
//!   only recovery is to start a new job.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docmorph library.
#[derive(Debug, Error)]
pub enum DocMorphError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A file does not match the formats accepted by the conversion kind.
    #[error("Unsupported file format for this tool: '{file}' ({reason})")]
    UnsupportedFormat { file: String, reason: String },

    /// The batch itself is unusable (empty, or too many files for the kind).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An input file could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Extraction service errors ─────────────────────────────────────────
    /// No API key is configured for the extraction service.
    #[error("AI extraction requires an API key.\nSet one of: {vars}")]
    MissingCredential { vars: String },

    /// The remote call failed or returned a non-success status.
    #[error("Analysis failed: {message}")]
    NetworkOrAi { message: String },

    /// The service answered, but the body could not be parsed even after repair.
    #[error("The AI response was malformed: {detail}")]
    MalformedResponse { detail: String },

    // ── Local processing errors ───────────────────────────────────────────
    /// The rendering surface could not be acquired, or a page failed to render.
    #[error("Rendering failed{}: {detail}", page_suffix(.page))]
    Render { page: Option<usize>, detail: String },

    /// A PDF handed to the compressor produced no renderable pages.
    #[error("Compression failed: '{file}' has no renderable pages")]
    Compression { file: String },

    /// The output document could not be produced.
    #[error("Could not build output document: {0}")]
    Synthesis(String),

    /// A bounded stage exceeded its deadline.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// The job was cancelled through its cancellation token.
    #[error("Conversion was cancelled")]
    Cancelled,

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, runtime construction).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn page_suffix(page: &Option<usize>) -> String {
    page.map(|p| format!(" for page {p}")).unwrap_or_default()
}

impl DocMorphError {
    /// `true` for errors raised before any asynchronous work began.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DocMorphError::UnsupportedFormat { .. }
                | DocMorphError::InvalidInput(_)
                | DocMorphError::MissingCredential { .. }
        )
    }
}
