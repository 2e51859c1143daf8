//! Job lifecycle: `Idle → Processing → Complete | Failed`.
//!
//! [`ConversionJob`] wraps one call to [`convert_with_cancel`] and publishes
//! its state on a `tokio::sync::watch` channel so that a UI (or any other
//! task) can poll or await changes. [`ConversionJob::spawn`] runs the job on
//! the current runtime and hands back a [`JobHandle`] for observation and
//! cancellation.

use crate::config::ConversionConfig;
use crate::convert::convert_with_cancel;
use crate::kind::ConversionKind;
use crate::output::ConversionResult;
use crate::pipeline::input::InputFile;
use crate::progress::ConversionProgressCallback;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Observable state of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Idle,
    Processing { progress: f32, status: String },
    Complete { result: ConversionResult },
    Failed { error: String },
}

impl JobState {
    /// 0–100. `Complete` is always 100; `Idle` and `Failed` are 0.
    pub fn progress(&self) -> f32 {
        match self {
            JobState::Processing { progress, .. } => *progress,
            JobState::Complete { .. } => 100.0,
            JobState::Idle | JobState::Failed { .. } => 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete { .. } | JobState::Failed { .. })
    }
}

/// One conversion request and its state.
pub struct ConversionJob {
    kind: ConversionKind,
    files: Vec<InputFile>,
    config: ConversionConfig,
    state: Arc<watch::Sender<JobState>>,
    cancel: CancellationToken,
}

impl ConversionJob {
    pub fn new(kind: ConversionKind, files: Vec<InputFile>, config: ConversionConfig) -> Self {
        let (tx, _rx) = watch::channel(JobState::Idle);
        Self {
            kind,
            files,
            config,
            state: Arc::new(tx),
            cancel: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> ConversionKind {
        self.kind
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Token that cancels this job when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the job to a terminal state and return it.
    ///
    /// A job runs at most once; calling `run` again returns the state it is
    /// already in.
    pub async fn run(&self, progress: &dyn ConversionProgressCallback) -> JobState {
        let started = self.state.send_if_modified(|state| {
            if matches!(state, JobState::Idle) {
                *state = JobState::Processing {
                    progress: 0.0,
                    status: "Starting...".into(),
                };
                true
            } else {
                false
            }
        });
        if !started {
            warn!("{} job already started; not running it again", self.kind);
            return self.state();
        }

        let observer = StateObserver {
            state: &self.state,
            inner: progress,
        };
        let outcome = convert_with_cancel(
            self.kind,
            &self.files,
            &observer,
            &self.config,
            self.cancel.clone(),
        )
        .await;

        let terminal = match outcome {
            Ok(result) => JobState::Complete { result },
            Err(e) => {
                error!("{} job failed: {}", self.kind, e);
                JobState::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.state.send_replace(terminal.clone());
        terminal
    }

    /// Run the job on a background task.
    pub fn spawn(self, progress: Arc<dyn ConversionProgressCallback>) -> JobHandle {
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { self.run(progress.as_ref()).await });
        JobHandle {
            state,
            cancel,
            task,
        }
    }
}

/// Forwards progress to the caller's callback and mirrors it into the state.
struct StateObserver<'a> {
    state: &'a watch::Sender<JobState>,
    inner: &'a dyn ConversionProgressCallback,
}

impl ConversionProgressCallback for StateObserver<'_> {
    fn on_progress(&self, percent: f32, status: &str) {
        self.state.send_replace(JobState::Processing {
            progress: percent,
            status: status.to_string(),
        });
        self.inner.on_progress(percent, status);
    }
}

/// Handle to a job running on a background task.
pub struct JobHandle {
    state: Arc<watch::Sender<JobState>>,
    cancel: CancellationToken,
    task: JoinHandle<JobState>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Request cancellation. The job ends `Failed` with the cancellation
    /// message at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> JobState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                let failed = JobState::Failed {
                    error: format!("Internal error: job task ended abnormally: {e}"),
                };
                self.state.send_replace(failed.clone());
                failed
            }
        }
    }
}
