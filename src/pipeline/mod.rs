//! Pipeline stages for document conversion.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ synth ──▶ archive
//! (files)   (pdfium)   (vision)    (pdf/xlsx) (zip)
//! ```
//!
//! 1. [`input`]: validate the batch against the conversion kind and read it
//! 2. [`render`]: rasterise pages one at a time on the blocking pool
//! 3. [`encode`]: JPEG encoding and dimension probing for raster images
//! 4. [`extract`]: schema-constrained table extraction and OCR; the only
//!    stage with network I/O. Responses go through [`repair`].
//! 5. [`synth`]: build the output PDF or workbook
//! 6. [`archive`]: bundle per-file outputs into one ZIP

pub mod archive;
pub mod encode;
pub mod extract;
pub mod input;
pub mod render;
pub mod repair;
pub mod synth;

use crate::error::DocMorphError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it finishes, `secs` elapse, or `cancel` fires.
pub(crate) async fn guarded<T, F>(
    fut: F,
    cancel: &CancellationToken,
    stage: &str,
    secs: u64,
) -> Result<T, DocMorphError>
where
    F: Future<Output = Result<T, DocMorphError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocMorphError::Cancelled),
        res = tokio::time::timeout(Duration::from_secs(secs), fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(DocMorphError::Timeout {
                stage: stage.to_string(),
                secs,
            }),
        },
    }
}

/// Run `fut` until it finishes or `cancel` fires.
pub(crate) async fn cancellable<T, F>(fut: F, cancel: &CancellationToken) -> Result<T, DocMorphError>
where
    F: Future<Output = Result<T, DocMorphError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocMorphError::Cancelled),
        res = fut => res,
    }
}
