//! PDF rasterisation: render pages to JPEG through a pluggable provider.
//!
//! ## Why one page per blocking call?
//!
//! pdfium holds the whole document plus a full-size bitmap for every page it
//! renders. Binding, loading, rendering and dropping inside a single
//! `spawn_blocking` call per page keeps at most `concurrency` bitmaps alive
//! and guarantees every handle is released when the call returns, even on
//! error.

use crate::config::RenderSettings;
use crate::error::DocMorphError;
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::guarded;
use crate::types::RenderedPage;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable naming a pdfium library file or the directory holding it.
pub const PDFIUM_LIB_PATH_VAR: &str = "PDFIUM_LIB_PATH";

/// Rasterises pages of a paginated document.
#[async_trait]
pub trait PageRenderingProvider: Send + Sync {
    /// Number of pages in `document`.
    async fn page_count(&self, document: Arc<[u8]>) -> Result<usize, DocMorphError>;

    /// Render the 0-based page `index` of `document`.
    async fn render_page(
        &self,
        document: Arc<[u8]>,
        index: usize,
        settings: RenderSettings,
    ) -> Result<RenderedPage, DocMorphError>;
}

/// pdfium-backed renderer.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Bind the library named by `PDFIUM_LIB_PATH`, or the system library.
    pub fn from_env() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, DocMorphError> {
    let bindings = match library_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DocMorphError::Render {
        page: None,
        detail: format!(
            "could not load the pdfium library ({e:?}); set {PDFIUM_LIB_PATH_VAR} to its location"
        ),
    })?;
    Ok(Pdfium::new(bindings))
}

fn page_count_blocking(library_path: Option<&Path>, bytes: &[u8]) -> Result<usize, DocMorphError> {
    let pdfium = bind_pdfium(library_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DocMorphError::Render {
            page: None,
            detail: format!("could not open document: {e:?}"),
        })?;
    let count = document.pages().len() as usize;
    Ok(count)
}

fn render_page_blocking(
    library_path: Option<&Path>,
    bytes: &[u8],
    index: usize,
    settings: RenderSettings,
) -> Result<RenderedPage, DocMorphError> {
    let page_err = |detail: String| DocMorphError::Render {
        page: Some(index + 1),
        detail,
    };

    let pdfium = bind_pdfium(library_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| page_err(format!("could not open document: {e:?}")))?;
    let pages = document.pages();
    let page = pages
        .get(index as u16)
        .map_err(|e| page_err(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(settings.scale);
    let image = page
        .render_with_config(&render_config)
        .map_err(|e| page_err(format!("{e:?}")))?
        .as_image();

    let (width, height) = (image.width(), image.height());
    let encoded =
        encode_jpeg(&image, settings.jpeg_quality).map_err(|e| page_err(e.to_string()))?;
    debug!(
        "Rendered page {} → {}x{} px, {} bytes",
        index + 1,
        width,
        height,
        encoded.data.len()
    );

    Ok(RenderedPage {
        index,
        width,
        height,
        image: encoded,
    })
}

#[async_trait]
impl PageRenderingProvider for PdfiumRenderer {
    async fn page_count(&self, document: Arc<[u8]>) -> Result<usize, DocMorphError> {
        let lib = self.library_path.clone();
        tokio::task::spawn_blocking(move || page_count_blocking(lib.as_deref(), &document))
            .await
            .map_err(|e| DocMorphError::Internal(format!("Render task panicked: {}", e)))?
    }

    async fn render_page(
        &self,
        document: Arc<[u8]>,
        index: usize,
        settings: RenderSettings,
    ) -> Result<RenderedPage, DocMorphError> {
        let lib = self.library_path.clone();
        tokio::task::spawn_blocking(move || {
            render_page_blocking(lib.as_deref(), &document, index, settings)
        })
        .await
        .map_err(|e| DocMorphError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Limits shared by every page of one render pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderLimits {
    /// Render at most this many leading pages.
    pub max_pages: Option<usize>,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

/// Render the first `min(count, max_pages)` pages of `document`, in order.
///
/// Fails on the first page error. `on_page` is called after each page
/// completes with the number of pages finished so far and the total.
pub async fn render_pages(
    renderer: &dyn PageRenderingProvider,
    document: Arc<[u8]>,
    settings: RenderSettings,
    limits: RenderLimits,
    cancel: &CancellationToken,
    on_page: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<Vec<RenderedPage>, DocMorphError> {
    let count = guarded(
        renderer.page_count(document.clone()),
        cancel,
        "Page count",
        limits.timeout_secs,
    )
    .await?;

    let take = limits.max_pages.map_or(count, |cap| count.min(cap));
    if take < count {
        warn!(
            "Document has {} pages; only the first {} will be rendered",
            count, take
        );
    }
    info!(
        "Rendering {} page(s) at scale {} (q={})",
        take, settings.scale, settings.jpeg_quality
    );

    let done = std::sync::atomic::AtomicUsize::new(0);
    let done = &done;
    stream::iter(0..take)
        .map(|index| {
            let document = document.clone();
            async move {
                let page = guarded(
                    renderer.render_page(document, index, settings),
                    cancel,
                    "Page render",
                    limits.timeout_secs,
                )
                .await?;
                let n = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                on_page(n, take);
                Ok::<_, DocMorphError>(page)
            }
        })
        .buffered(limits.concurrency.max(1))
        .try_collect()
        .await
}
