//! CLI binary for docmorph.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and writes the artifact.

use anyhow::{Context, Result};
use clap::Parser;
use docmorph::{
    convert_to_file, ConversionConfig, ConversionKind, ConversionProgressCallback, InputFile,
    NoopProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Percentage bar fed by the job's progress reports.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(kind: ConversionKind) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(kind.id());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgress {
    fn on_progress(&self, percent: f32, status: &str) {
        self.bar.set_position(percent.round() as u64);
        self.bar.set_message(status.to_string());
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the tables of a scanned invoice into a workbook
  docmorph pdf-to-excel invoice.pdf -o out/

  # Several photos of receipts into one workbook
  docmorph image-to-excel r1.jpg r2.png r3.webp

  # Bundle images into a searchable PDF
  docmorph image-to-pdf --ocr page1.png page2.png -o scans.pdf

  # Spreadsheet into a printable PDF (no API key needed)
  docmorph excel-to-pdf budget.xlsx

  # Shrink a batch of PDFs (ZIP when more than one)
  docmorph compress-pdf a.pdf b.pdf c.pdf -o compressed/

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY, API_KEY   Vision model API key (first non-empty wins)
  PDFIUM_LIB_PATH           Path to libpdfium (file or directory)
  RUST_LOG                  Log filter, overrides -v / -q
"#;

/// Convert between images, PDFs and spreadsheets.
#[derive(Parser, Debug)]
#[command(
    name = "docmorph",
    version,
    about = "Convert between images, PDFs and spreadsheets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Conversion: pdf-to-excel, excel-to-pdf, image-to-pdf, compress-pdf, image-to-excel.
    #[arg(value_parser = parse_kind)]
    kind: ConversionKind,

    /// Input files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output file or directory (default: current directory).
    #[arg(short, long, env = "DOCMORPH_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Add an invisible OCR text layer (image-to-pdf only).
    #[arg(long, env = "DOCMORPH_OCR")]
    ocr: bool,

    /// Parallel file reads and page renders.
    #[arg(short, long, env = "DOCMORPH_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Model for image-to-excel and OCR.
    #[arg(long, env = "DOCMORPH_FAST_MODEL")]
    fast_model: Option<String>,

    /// Model for pdf-to-excel.
    #[arg(long, env = "DOCMORPH_ACCURATE_MODEL")]
    accurate_model: Option<String>,

    /// Per-request timeout for the vision model, in seconds.
    #[arg(long, env = "DOCMORPH_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Pages analysed by pdf-to-excel.
    #[arg(long, env = "DOCMORPH_MAX_PAGES", default_value_t = 20)]
    max_pages: usize,

    /// Disable progress bar.
    #[arg(long, env = "DOCMORPH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCMORPH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCMORPH_QUIET")]
    quiet: bool,
}

fn parse_kind(s: &str) -> Result<ConversionKind, String> {
    s.parse::<ConversionKind>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar carries the feedback while it is shown; library logs drop to
    // errors unless verbose.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let files: Vec<InputFile> = cli.files.iter().cloned().map(InputFile::path).collect();

    // ── Run conversion ───────────────────────────────────────────────────
    let started = Instant::now();
    let bar = show_progress.then(|| CliProgress::new(cli.kind));
    let outcome = match &bar {
        Some(bar) => convert_to_file(cli.kind, &files, bar, &config, &cli.output).await,
        None => convert_to_file(cli.kind, &files, &NoopProgressCallback, &config, &cli.output).await,
    };
    if let Some(bar) = &bar {
        bar.finish();
    }
    let (path, result) = outcome.context("Conversion failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {}  {}  →  {}",
            green("✔"),
            result.display_size(),
            dim(&format!("{}ms", started.elapsed().as_millis())),
            bold(&path.display().to_string()),
        );
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .use_ocr(cli.ocr)
        .concurrency(cli.concurrency)
        .max_extraction_pages(cli.max_pages)
        .api_timeout_secs(cli.api_timeout);

    if let Some(model) = &cli.fast_model {
        builder = builder.fast_model(model.clone());
    }
    if let Some(model) = &cli.accurate_model {
        builder = builder.accurate_model(model.clone());
    }

    builder.build().context("Invalid configuration")
}
