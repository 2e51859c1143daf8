//! Configuration types for document conversion.
//!
//! Every knob lives in [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`]. Defaults match the behaviour of the hosted
//! tool: tables are extracted from at most 20 pages rendered at 2×, and
//! compression re-renders every page at 1.2× with aggressive JPEG settings.

use crate::error::DocMorphError;
use crate::pipeline::extract::ExtractionBackend;
use crate::pipeline::render::PageRenderingProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default model for single-image table extraction and OCR.
pub const DEFAULT_FAST_MODEL: &str = "gemini-3-flash-preview";
/// Default model for multi-page, high-accuracy table extraction.
pub const DEFAULT_ACCURATE_MODEL: &str = "gemini-3-pro-preview";
/// Default base URL of the extraction service.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for one conversion job.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use docmorph::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .concurrency(8)
///     .use_ocr(true)
///     .fast_model("gemini-2.5-flash")
///     .build()
///     .unwrap();
/// assert!(config.use_ocr);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Width of every bounded fan-out (file reads, page renders, image
    /// probes). Default: 4.
    pub concurrency: usize,

    /// Add an invisible OCR text layer when bundling images into a PDF.
    /// Default: false.
    pub use_ocr: bool,

    /// Page cap for PDF table extraction. Default: 20.
    ///
    /// Every rendered page is sent in a single request, so the cap bounds the
    /// request payload. Pages beyond it are dropped with a warning.
    pub max_extraction_pages: usize,

    /// Page cap for compression. Default: `None` (all pages).
    pub max_compress_pages: Option<usize>,

    /// Render settings for pages sent to the extraction service.
    /// Default: scale 2.0, quality 80.
    pub extraction_render: RenderSettings,

    /// Render settings for compressed output pages. Default: scale 1.2,
    /// quality 40.
    pub compress_render: RenderSettings,

    /// Model used for per-image requests (OCR, image tables).
    pub fast_model: String,

    /// Model used for whole-document table extraction.
    pub accurate_model: String,

    /// Base URL of the `generateContent` REST API.
    pub endpoint: String,

    /// Explicit API key. Takes precedence over `api_key_vars`.
    pub api_key: Option<String>,

    /// Environment variables consulted, in order, when `api_key` is unset.
    pub api_key_vars: Vec<String>,

    /// Per-request timeout for the extraction service in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Per-page render timeout in seconds. Default: 120.
    pub render_timeout_secs: u64,

    /// Pre-constructed extraction backend. Takes precedence over any key.
    pub backend: Option<Arc<dyn ExtractionBackend>>,

    /// Page renderer. Defaults to pdfium when `None`.
    pub renderer: Option<Arc<dyn PageRenderingProvider>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            use_ocr: false,
            max_extraction_pages: 20,
            max_compress_pages: None,
            extraction_render: RenderSettings::EXTRACTION,
            compress_render: RenderSettings::COMPRESSION,
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            accurate_model: DEFAULT_ACCURATE_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            api_key_vars: vec!["GEMINI_API_KEY".to_string(), "API_KEY".to_string()],
            api_timeout_secs: 60,
            render_timeout_secs: 120,
            backend: None,
            renderer: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("concurrency", &self.concurrency)
            .field("use_ocr", &self.use_ocr)
            .field("max_extraction_pages", &self.max_extraction_pages)
            .field("max_compress_pages", &self.max_compress_pages)
            .field("extraction_render", &self.extraction_render)
            .field("compress_render", &self.compress_render)
            .field("fast_model", &self.fast_model)
            .field("accurate_model", &self.accurate_model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_vars", &self.api_key_vars)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ExtractionBackend>"))
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn PageRenderingProvider>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn use_ocr(mut self, v: bool) -> Self {
        self.config.use_ocr = v;
        self
    }

    pub fn max_extraction_pages(mut self, n: usize) -> Self {
        self.config.max_extraction_pages = n;
        self
    }

    pub fn max_compress_pages(mut self, n: Option<usize>) -> Self {
        self.config.max_compress_pages = n;
        self
    }

    pub fn extraction_render(mut self, settings: RenderSettings) -> Self {
        self.config.extraction_render = settings;
        self
    }

    pub fn compress_render(mut self, settings: RenderSettings) -> Self {
        self.config.compress_render = settings;
        self
    }

    pub fn fast_model(mut self, model: impl Into<String>) -> Self {
        self.config.fast_model = model.into();
        self
    }

    pub fn accurate_model(mut self, model: impl Into<String>) -> Self {
        self.config.accurate_model = model.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_key_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.api_key_vars = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PageRenderingProvider>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, DocMorphError> {
        let c = &self.config;
        c.extraction_render.validate("extraction")?;
        c.compress_render.validate("compression")?;
        if c.concurrency == 0 {
            return Err(DocMorphError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.render_timeout_secs == 0 {
            return Err(DocMorphError::InvalidConfig(
                "Timeouts must be at least one second".into(),
            ));
        }
        if c.fast_model.trim().is_empty() || c.accurate_model.trim().is_empty() {
            return Err(DocMorphError::InvalidConfig("Model names must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Render settings ──────────────────────────────────────────────────────

/// How a PDF page is rasterised and encoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Multiplier applied to the page's point size (1.0 = 72 px per inch).
    pub scale: f32,
    /// JPEG quality, 1–100.
    pub jpeg_quality: u8,
}

impl RenderSettings {
    /// Sharp enough for a vision model to read dense tables.
    pub const EXTRACTION: RenderSettings = RenderSettings {
        scale: 2.0,
        jpeg_quality: 80,
    };

    pub const COMPRESSION: RenderSettings = RenderSettings {
        scale: 1.2,
        jpeg_quality: 40,
    };

    fn validate(&self, label: &str) -> Result<(), DocMorphError> {
        if !(0.1..=8.0).contains(&self.scale) {
            return Err(DocMorphError::InvalidConfig(format!(
                "{label} render scale must be 0.1–8.0, got {}",
                self.scale
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(DocMorphError::InvalidConfig(format!(
                "{label} JPEG quality must be 1–100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::EXTRACTION
    }
}
