//! Conversion entry points and the per-kind pipelines.
//!
//! Every job runs the same outer sequence: check preconditions (input
//! formats, then the extraction credential when the kind needs one), load
//! the files, run the kind's pipeline, name the artifact. Preconditions fail
//! before any file is read or any request is sent.

use crate::config::ConversionConfig;
use crate::error::DocMorphError;
use crate::kind::ConversionKind;
use crate::output::{ConversionResult, SynthesizedDocument, PDF_MIME, XLSX_MIME, ZIP_MIME};
use crate::pipeline::archive::{archive_outputs, lite_entry_name};
use crate::pipeline::encode::probe_async;
use crate::pipeline::extract::{Accuracy, ExtractionClient};
use crate::pipeline::input::{load_assets, validate_inputs, InputFile};
use crate::pipeline::render::{render_pages, PageRenderingProvider, PdfiumRenderer, RenderLimits};
use crate::pipeline::synth::{pdf, sheet_pdf, xlsx};
use crate::pipeline::{cancellable, guarded};
use crate::progress::{ConversionProgressCallback, ProgressTracker, Stage};
use crate::types::{file_stem, ExtractedTable, RenderedPage, SourceAsset};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Characters of an image's stem kept in front of its sheet names.
const SHEET_PREFIX_LEN: usize = 10;

/// Convert `files` as `kind` describes and return the single artifact.
///
/// `progress` receives clamped, non-decreasing percentages. The job cannot
/// be cancelled; use [`convert_with_cancel`] for that.
///
/// # Errors
/// - `UnsupportedFormat` / `InvalidInput` when the batch does not fit `kind`
/// - `MissingCredential` when the kind needs extraction and no key is set
/// - any stage error (`Render`, `NetworkOrAi`, `MalformedResponse`, …)
pub async fn convert(
    kind: ConversionKind,
    files: &[InputFile],
    progress: &dyn ConversionProgressCallback,
    config: &ConversionConfig,
) -> Result<ConversionResult, DocMorphError> {
    convert_with_cancel(kind, files, progress, config, CancellationToken::new()).await
}

/// [`convert`] with a caller-held cancellation token.
///
/// Cancelling the token makes the job fail with
/// [`DocMorphError::Cancelled`] at its next suspension point.
pub async fn convert_with_cancel(
    kind: ConversionKind,
    files: &[InputFile],
    progress: &dyn ConversionProgressCallback,
    config: &ConversionConfig,
    cancel: CancellationToken,
) -> Result<ConversionResult, DocMorphError> {
    let started = Instant::now();

    // ── Preconditions ────────────────────────────────────────────────────
    validate_inputs(kind, files)?;
    let client = if kind.needs_extraction(config.use_ocr) {
        Some(ExtractionClient::from_config(config)?)
    } else {
        None
    };

    info!("Starting {} job with {} file(s)", kind, files.len());
    let tracker = ProgressTracker::new(progress);

    // ── Load ─────────────────────────────────────────────────────────────
    tracker.enter(Stage::Load, "Reading files...");
    let assets = cancellable(load_assets(kind, files, config.concurrency), &cancel).await?;
    tracker.report(Stage::Load.range().1, "Files loaded");

    let job = Pipeline {
        config,
        cancel: &cancel,
        tracker: &tracker,
        client: client.as_ref(),
    };

    let result = match kind {
        ConversionKind::ImageToPdf => job.image_to_pdf(assets).await,
        ConversionKind::ImageToSpreadsheet => job.image_to_spreadsheet(assets).await,
        ConversionKind::PdfToSpreadsheet => job.pdf_to_spreadsheet(assets).await,
        ConversionKind::SpreadsheetToPdf => job.spreadsheet_to_pdf(assets).await,
        ConversionKind::CompressPdf => job.compress(assets).await,
    }?;

    tracker.report(100.0, "Done");
    info!(
        "{} finished: '{}' ({}) in {}ms",
        kind,
        result.file_name,
        result.display_size(),
        started.elapsed().as_millis()
    );
    Ok(result)
}

/// Run [`convert`] and write the artifact to disk.
///
/// `output` may be a directory (existing, or any path ending in a separator;
/// the artifact keeps its generated name) or a file path. Returns the path
/// written.
pub async fn convert_to_file(
    kind: ConversionKind,
    files: &[InputFile],
    progress: &dyn ConversionProgressCallback,
    config: &ConversionConfig,
    output: impl AsRef<Path>,
) -> Result<(PathBuf, ConversionResult), DocMorphError> {
    let result = convert(kind, files, progress, config).await?;
    let path = write_output(&result, output.as_ref()).await?;
    Ok((path, result))
}

/// Write `result` atomically (temp file + rename).
pub async fn write_output(result: &ConversionResult, output: &Path) -> Result<PathBuf, DocMorphError> {
    let names_dir = output.to_string_lossy().ends_with(std::path::is_separator);
    let path = if names_dir
        || tokio::fs::metadata(output)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    {
        output.join(&result.file_name)
    } else {
        output.to_path_buf()
    };
    let write_err = |source| DocMorphError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| result.file_name.clone());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp_path, &result.bytes)
        .await
        .map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    debug!("Wrote {} bytes to {}", result.size, path.display());
    Ok(path)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    kind: ConversionKind,
    files: &[InputFile],
    progress: &dyn ConversionProgressCallback,
    config: &ConversionConfig,
) -> Result<ConversionResult, DocMorphError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocMorphError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(kind, files, progress, config))
}

// ── Pipelines ────────────────────────────────────────────────────────────

struct Pipeline<'a> {
    config: &'a ConversionConfig,
    cancel: &'a CancellationToken,
    tracker: &'a ProgressTracker<'a>,
    client: Option<&'a ExtractionClient>,
}

impl Pipeline<'_> {
    fn client(&self) -> Result<&ExtractionClient, DocMorphError> {
        self.client
            .ok_or_else(|| DocMorphError::Internal("extraction client not resolved".into()))
    }

    fn renderer(&self) -> Arc<dyn PageRenderingProvider> {
        self.config
            .renderer
            .clone()
            .unwrap_or_else(|| Arc::new(PdfiumRenderer::from_env()))
    }

    fn limits(&self, max_pages: Option<usize>) -> RenderLimits {
        RenderLimits {
            max_pages,
            concurrency: self.config.concurrency,
            timeout_secs: self.config.render_timeout_secs,
        }
    }

    async fn image_to_pdf(&self, assets: Vec<SourceAsset>) -> Result<ConversionResult, DocMorphError> {
        let (start, end) = Stage::Process.range();
        self.tracker.report(start, "Reading image dimensions...");

        let sources: Vec<(String, Vec<u8>)> = assets
            .iter()
            .map(|a| (a.name.clone(), a.data.clone()))
            .collect();
        let dims: Vec<(u32, u32)> = cancellable(
            stream::iter(sources)
                .map(|(name, data)| probe_async(name, data))
                .buffered(self.config.concurrency)
                .try_collect(),
            self.cancel,
        )
        .await?;

        let pages: Vec<RenderedPage> = assets
            .iter()
            .zip(dims)
            .enumerate()
            .map(|(index, (asset, (width, height)))| RenderedPage {
                index,
                width,
                height,
                image: asset.as_image(),
            })
            .collect();

        let ocr = if self.config.use_ocr {
            let client = self.client()?;
            let images: Vec<_> = pages.iter().map(|p| p.image.clone()).collect();
            let layers = cancellable(
                client.ocr(&images, &|i, total| {
                    self.tracker.report_span(
                        start,
                        end,
                        i,
                        total,
                        &format!("Running OCR on image {}/{}...", i + 1, total),
                    )
                }),
                self.cancel,
            )
            .await?;
            Some(layers)
        } else {
            None
        };

        self.tracker.enter(Stage::Synthesis, "Creating PDF...");
        let doc = blocking(move || pdf::images_to_pdf(&pages, ocr.as_deref())).await?;
        Ok(ConversionResult::new(
            doc,
            format!("DocMorph_Bundle_{}.pdf", unix_millis()),
            PDF_MIME,
        ))
    }

    async fn image_to_spreadsheet(&self, assets: Vec<SourceAsset>) -> Result<ConversionResult, DocMorphError> {
        let client = self.client()?;
        let (start, end) = Stage::Process.range();
        let total = assets.len();
        let mut tables = Vec::new();

        for (i, asset) in assets.iter().enumerate() {
            self.tracker.report_span(
                start,
                end,
                i,
                total,
                &format!("Analyzing image {}/{}...", i + 1, total),
            );
            let found = guarded(
                client.extract_tables(&[asset.as_image()], Accuracy::Fast),
                self.cancel,
                "Table extraction",
                self.config.api_timeout_secs,
            )
            .await?;
            debug!("'{}': {} table(s)", asset.name, found.len());
            tables.extend(prefix_sheets(asset.stem(), found));
        }

        self.tracker.enter(Stage::Synthesis, "Generating Excel file...");
        let doc = blocking(move || xlsx::tables_to_xlsx(&tables)).await?;
        Ok(ConversionResult::new(doc, "DocMorph_Analysis.xlsx", XLSX_MIME))
    }

    async fn pdf_to_spreadsheet(&self, mut assets: Vec<SourceAsset>) -> Result<ConversionResult, DocMorphError> {
        let client = self.client()?;
        let asset = assets
            .pop()
            .ok_or_else(|| DocMorphError::InvalidInput("no PDF supplied".into()))?;
        let stem = asset.stem().to_string();
        let (start, end) = Stage::Process.range();
        let render_end = 40.0;

        self.tracker.report(start, "Rendering PDF pages...");
        let document: Arc<[u8]> = Arc::from(asset.data);
        let pages = render_pages(
            self.renderer().as_ref(),
            document,
            self.config.extraction_render,
            self.limits(Some(self.config.max_extraction_pages)),
            self.cancel,
            &|done, total| {
                self.tracker.report_span(
                    start,
                    render_end,
                    done,
                    total,
                    &format!("Rendered page {done}/{total}"),
                )
            },
        )
        .await?;
        if pages.is_empty() {
            return Err(DocMorphError::Render {
                page: None,
                detail: format!("'{}' has no pages", asset.name),
            });
        }

        self.tracker.report(
            render_end,
            &format!("Analyzing {} page(s) with AI...", pages.len()),
        );
        let images: Vec<_> = pages.into_iter().map(|p| p.image).collect();
        let tables = guarded(
            client.extract_tables(&images, Accuracy::High),
            self.cancel,
            "Table extraction",
            self.config.api_timeout_secs,
        )
        .await?;
        self.tracker.report(end, &format!("Found {} table(s)", tables.len()));

        self.tracker.enter(Stage::Synthesis, "Generating Excel file...");
        let doc = blocking(move || xlsx::tables_to_xlsx(&tables)).await?;
        Ok(ConversionResult::new(doc, format!("{stem}_data.xlsx"), XLSX_MIME))
    }

    async fn spreadsheet_to_pdf(&self, mut assets: Vec<SourceAsset>) -> Result<ConversionResult, DocMorphError> {
        let asset = assets
            .pop()
            .ok_or_else(|| DocMorphError::InvalidInput("no spreadsheet supplied".into()))?;
        let stem = asset.stem().to_string();
        let (start, _) = Stage::Process.range();
        let end = 95.0;

        self.tracker.report(start, "Reading workbook...");
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize, String)>();
        let data = asset.data;
        let layout = blocking(move || {
            sheet_pdf::workbook_to_pdf(&data, &|done, total, name| {
                let _ = tx.send((done, total, name.to_string()));
            })
        });
        let relay = async {
            while let Some((done, total, name)) = rx.recv().await {
                self.tracker.report_span(
                    start,
                    end,
                    done,
                    total,
                    &format!("Rendered sheet '{name}' ({done}/{total})"),
                );
            }
        };
        let doc = cancellable(
            async {
                let (doc, ()) = tokio::join!(layout, relay);
                doc
            },
            self.cancel,
        )
        .await?;
        Ok(ConversionResult::new(doc, format!("{stem}.pdf"), PDF_MIME))
    }

    async fn compress(&self, assets: Vec<SourceAsset>) -> Result<ConversionResult, DocMorphError> {
        let (start, _) = Stage::Process.range();
        let end = 90.0;
        let total = assets.len();
        let renderer = self.renderer();
        let mut outputs: Vec<(String, SynthesizedDocument)> = Vec::with_capacity(total);

        for (i, asset) in assets.into_iter().enumerate() {
            let span = (end - start) / total as f32;
            let file_start = start + span * i as f32;
            let file_end = file_start + span;
            self.tracker.report(
                file_start,
                &format!("Compressing {} ({}/{})...", asset.name, i + 1, total),
            );

            let original_size = asset.data.len();
            let document: Arc<[u8]> = Arc::from(asset.data);
            let pages = render_pages(
                renderer.as_ref(),
                document,
                self.config.compress_render,
                self.limits(self.config.max_compress_pages),
                self.cancel,
                &|done, pages| {
                    self.tracker.report_span(
                        file_start,
                        file_end,
                        done,
                        pages,
                        &format!("Compressing {} (page {done}/{pages})", asset.name),
                    )
                },
            )
            .await?;
            if pages.is_empty() {
                return Err(DocMorphError::Compression { file: asset.name });
            }

            let doc = blocking(move || pdf::images_to_pdf(&pages, None)).await?;
            info!(
                "Compressed '{}': {} → {} bytes",
                asset.name, original_size, doc.size
            );
            outputs.push((asset.name, doc));
        }

        if outputs.len() == 1 {
            let (name, doc) = outputs.remove(0);
            return Ok(ConversionResult::new(
                doc,
                format!("{}_optimized.pdf", file_stem(&name)),
                PDF_MIME,
            ));
        }

        self.tracker.report(end, "Packaging ZIP archive...");
        let entries: Vec<(String, Vec<u8>)> = outputs
            .into_iter()
            .map(|(name, doc)| (lite_entry_name(&name), doc.bytes))
            .collect();
        let archive = blocking(move || archive_outputs(&entries)).await?;
        Ok(ConversionResult::new(
            archive,
            format!("DocMorph_Batch_{}.zip", unix_millis()),
            ZIP_MIME,
        ))
    }
}

/// Prefix each table's sheet name with the first characters of `stem`.
fn prefix_sheets(stem: &str, tables: Vec<ExtractedTable>) -> Vec<ExtractedTable> {
    let prefix: String = stem.chars().take(SHEET_PREFIX_LEN).collect();
    tables
        .into_iter()
        .map(|mut t| {
            t.sheet_name = format!("{prefix}_{}", t.sheet_name)
                .chars()
                .take(xlsx::MAX_SHEET_NAME_LEN)
                .collect();
            t
        })
        .collect()
}

/// Run CPU-bound synthesis off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, DocMorphError>
where
    F: FnOnce() -> Result<T, DocMorphError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocMorphError::Internal(format!("synthesis task panicked: {e}")))?
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use crate::types::CellValue;

    fn table(name: &str) -> ExtractedTable {
        ExtractedTable {
            sheet_name: name.into(),
            headers: vec!["A".into()],
            rows: vec![vec![CellValue::from("1")]],
        }
    }

    #[test]
    fn sheet_prefix_uses_ten_stem_chars() {
        let out = prefix_sheets("receipt_march_2024", vec![table("Totals")]);
        assert_eq!(out[0].sheet_name, "receipt_ma_Totals");
    }

    #[test]
    fn prefixed_names_fit_excel_limit() {
        let out = prefix_sheets("scan", vec![table(&"x".repeat(60))]);
        assert_eq!(out[0].sheet_name.chars().count(), xlsx::MAX_SHEET_NAME_LEN);
        assert!(out[0].sheet_name.starts_with("scan_"));
    }

    #[tokio::test]
    async fn write_output_into_directory_uses_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConversionResult::new(SynthesizedDocument::new(b"%PDF".to_vec()), "x.pdf", PDF_MIME);
        let path = write_output(&result, dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("x.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF");
        assert!(!dir.path().join(".x.pdf.tmp").exists());
    }

    #[tokio::test]
    async fn write_output_creates_directory_named_with_trailing_separator() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/");
        let result = ConversionResult::new(SynthesizedDocument::new(b"PK".to_vec()), "batch.zip", ZIP_MIME);
        let path = write_output(&result, &target).await.unwrap();
        assert_eq!(path, dir.path().join("out").join("batch.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK");
    }

    #[test]
    fn conversion_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let config = ConversionConfig::default();
        let files: Vec<InputFile> = Vec::new();
        let fut = convert(ConversionKind::ImageToPdf, &files, &NoopProgressCallback, &config);
        assert_send(&fut);
    }

    #[tokio::test]
    async fn write_output_to_explicit_path_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out.zip");
        let result = ConversionResult::new(SynthesizedDocument::new(vec![1, 2]), "b.zip", ZIP_MIME);
        assert_eq!(write_output(&result, &target).await.unwrap(), target);
        assert_eq!(std::fs::read(&target).unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn credential_is_checked_before_reading_files() {
        let config = ConversionConfig::builder()
            .api_key_vars(["DOCMORPH_TEST_UNSET_KEY_VAR"])
            .build()
            .unwrap();
        // The file does not exist: a credential error proves no read happened.
        let files = [InputFile::path("/nonexistent/scan.png")];
        let err = convert(
            ConversionKind::ImageToSpreadsheet,
            &files,
            &NoopProgressCallback,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DocMorphError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn format_is_checked_before_credential() {
        let config = ConversionConfig::builder()
            .api_key_vars(["DOCMORPH_TEST_UNSET_KEY_VAR"])
            .build()
            .unwrap();
        let files = [InputFile::path("/nonexistent/notes.txt")];
        let err = convert(
            ConversionKind::ImageToSpreadsheet,
            &files,
            &NoopProgressCallback,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DocMorphError::UnsupportedFormat { .. }));
    }

    #[test]
    fn sync_wrapper_runs_a_job() {
        let err = convert_sync(
            ConversionKind::CompressPdf,
            &[],
            &NoopProgressCallback,
            &ConversionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DocMorphError::InvalidInput(_)));
    }
}
