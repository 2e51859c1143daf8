//! Progress reporting for conversion jobs.
//!
//! The pipeline reports a percentage (0–100) and a short human-readable
//! status through [`ConversionProgressCallback`]. Any
//! `Fn(f32, &str) + Send + Sync` closure is a callback, so the common case
//! needs no boilerplate:
//!
//! ```rust
//! use docmorph::ConversionProgressCallback;
//!
//! let cb = |pct: f32, status: &str| eprintln!("{pct:>5.1}% {status}");
//! cb.on_progress(10.0, "Loading assets");
//! ```
//!
//! Inside the pipeline every report goes through a [`ProgressTracker`], which
//! clamps values to 0–100 and drops anything that would move the bar
//! backwards.

use std::sync::Mutex;

/// Receives progress updates from a running job.
///
/// Calls may come from different tasks but never concurrently for the same
/// job; implementations must still be `Send + Sync`.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called zero or more times with a monotonically non-decreasing
    /// percentage and the current stage description.
    fn on_progress(&self, percent: f32, status: &str) {
        let _ = (percent, status);
    }
}

impl<F> ConversionProgressCallback for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn on_progress(&self, percent: f32, status: &str) {
        self(percent, status)
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

// ── Stage weights ────────────────────────────────────────────────────────

/// Coarse pipeline stages and the share of the bar each one owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and validating inputs: 0–10 %.
    Load,
    /// Rendering pages and calling the extraction service: 10–80 %.
    Process,
    /// Building the output document: 80–100 %.
    Synthesis,
}

impl Stage {
    /// `(start, end)` percentages of this stage.
    pub fn range(self) -> (f32, f32) {
        match self {
            Stage::Load => (0.0, 10.0),
            Stage::Process => (10.0, 80.0),
            Stage::Synthesis => (80.0, 100.0),
        }
    }
}

/// Monotonic, clamped front for a [`ConversionProgressCallback`].
pub struct ProgressTracker<'a> {
    callback: &'a dyn ConversionProgressCallback,
    last: Mutex<f32>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(callback: &'a dyn ConversionProgressCallback) -> Self {
        Self {
            callback,
            last: Mutex::new(0.0),
        }
    }

    /// Report an absolute percentage. Values below the last report are
    /// raised to it; the status is still forwarded.
    pub fn report(&self, percent: f32, status: &str) {
        let pct = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let value = {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if pct > *last {
                *last = pct;
            }
            *last
        };
        self.callback.on_progress(value, status);
    }

    /// Report `done / total` of the way through `start..end`.
    pub fn report_span(&self, start: f32, end: f32, done: usize, total: usize, status: &str) {
        let frac = if total == 0 {
            1.0
        } else {
            done.min(total) as f32 / total as f32
        };
        self.report(start + (end - start) * frac, status);
    }

    /// Report the start of a stage.
    pub fn enter(&self, stage: Stage, status: &str) {
        self.report(stage.range().0, status);
    }

    /// Most recent reported value.
    pub fn current(&self) -> f32 {
        match self.last.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
