//! Async entry point: one blocking worker per transcode.

use crate::capability::{MediaBackend, SourceHandle};
use crate::config::TranscodeSettings;
use crate::engine::TranscodeEngine;
use crate::error::{Failure, FailureReason, TranscodeOutcome};
use crate::progress::{Progress, ProgressSender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Hands out transcode tasks. Owned by the caller; cheap to clone.
#[derive(Debug, Clone)]
pub struct TranscodeManager {
    engine: TranscodeEngine,
}

impl TranscodeManager {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self::with_settings(backend, TranscodeSettings::default())
    }

    pub fn with_settings(backend: Arc<dyn MediaBackend>, settings: TranscodeSettings) -> Self {
        Self {
            engine: TranscodeEngine::new(backend, settings),
        }
    }

    pub fn engine(&self) -> &TranscodeEngine {
        &self.engine
    }

    /// Start compressing `source` into `output` on a blocking worker.
    ///
    /// Must be called from within a Tokio runtime. If the transcode does not
    /// succeed after the output was created, the partial file is removed. A
    /// file already at `output` is left alone when the transcode fails before
    /// getting that far.
    pub fn compress(&self, source: SourceHandle, output: impl Into<PathBuf>) -> TranscodeTask {
        let output = output.into();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(Progress::Fraction(0.0));

        let engine = self.engine.clone();
        let token = cancel.clone();
        let path = output.clone();
        let handle = tokio::task::spawn_blocking(move || {
            info!(source = %source, output = %path.display(), "transcode started");
            let sender = ProgressSender::new(move |progress| {
                progress_tx.send_replace(progress);
            });
            let attempt = engine.attempt(&source, &path, &token, &sender);
            let outcome = TranscodeOutcome::from(attempt.result);
            if !outcome.is_success() && attempt.output_created {
                remove_partial_output(&path);
            }
            info!(?outcome, "transcode ended");
            outcome
        });

        TranscodeTask {
            handle,
            cancel,
            progress: progress_rx,
            output,
        }
    }
}

fn remove_partial_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed partial output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove partial output"),
    }
}

/// A running transcode.
#[derive(Debug)]
pub struct TranscodeTask {
    handle: JoinHandle<TranscodeOutcome>,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
    output: PathBuf,
}

impl TranscodeTask {
    /// Ask the worker to stop; it finishes with [`TranscodeOutcome::Canceled`]
    /// unless it was already done.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress updates. Starts at `Fraction(0.0)`.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to end.
    pub async fn wait(self) -> TranscodeOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    output = %self.output.display(),
                    "transcode worker died; output may be incomplete"
                );
                TranscodeOutcome::Failed(Failure {
                    reason: FailureReason::Internal,
                    message: format!("transcode worker failed: {err}"),
                })
            }
        }
    }
}
