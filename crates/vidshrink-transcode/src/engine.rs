//! Synchronous transcode of one source into one output.

use crate::capability::{CapabilityError, Demuxer, MediaBackend, SourceHandle};
use crate::config::TranscodeSettings;
use crate::driver::PipelineDriver;
use crate::error::{Result, TranscodeError};
use crate::metadata::{self, SourceMetadata};
use crate::muxer::{DeferredMuxer, TrackRole};
use crate::policy::{self, VideoPlan};
use crate::progress::ProgressSender;
use crate::transcoder::TrackTranscoder;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs the whole pipeline for one transcode on the calling thread.
#[derive(Clone)]
pub struct TranscodeEngine {
    backend: Arc<dyn MediaBackend>,
    settings: TranscodeSettings,
}

impl TranscodeEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, settings: TranscodeSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &TranscodeSettings {
        &self.settings
    }

    /// Open `source`, resolve its tracks and decide what happens to the video,
    /// without creating any output.
    pub fn probe(&self, source: &SourceHandle) -> Result<(SourceMetadata, VideoPlan)> {
        let mut demuxer = self
            .backend
            .open_source(source)
            .map_err(TranscodeError::UnreadableSource)?;
        let result = metadata::resolve(demuxer.as_ref()).and_then(|meta| {
            let plan = policy::decide_video(
                &meta.video.format,
                &self.settings.target,
                self.backend.codecs(),
            )?;
            Ok((meta, plan))
        });
        match (result, demuxer.release()) {
            (result, Err(err)) => {
                error!(error = %err, "failed to release demuxer");
                if let Err(original) = &result {
                    warn!(error = %original, "superseded by shutdown fault");
                }
                Err(TranscodeError::ShutdownFault(err))
            }
            (result, Ok(())) => result,
        }
    }

    /// Transcode `source` into `output`.
    ///
    /// Every opened resource is released exactly once before this returns,
    /// whatever the outcome. Partial output is left for the caller to remove.
    pub fn transcode(
        &self,
        source: &SourceHandle,
        output: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<()> {
        self.attempt(source, output, cancel, progress).result
    }

    /// [`transcode`](Self::transcode), also telling whether `output` was
    /// ever handed to the muxer.
    pub fn attempt(
        &self,
        source: &SourceHandle,
        output: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Attempt {
        if cancel.is_cancelled() {
            return Attempt::untouched(Err(TranscodeError::Canceled));
        }
        let demuxer = match self.backend.open_source(source) {
            Ok(demuxer) => demuxer,
            Err(err) => return Attempt::untouched(Err(TranscodeError::UnreadableSource(err))),
        };

        let mut session = Session {
            demuxer,
            mux: None,
            transcoders: Vec::new(),
            output_created: false,
        };
        let result = self.run(&mut session, output, cancel, progress);
        let output_created = session.output_created;
        Attempt {
            result: session.finish(result),
            output_created,
        }
    }

    fn run(
        &self,
        session: &mut Session,
        output: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> Result<()> {
        let meta = metadata::resolve(session.demuxer.as_ref())?;
        let plan = policy::decide_video(&meta.video.format, &self.settings.target, self.backend.codecs())?;

        if cancel.is_cancelled() {
            return Err(TranscodeError::Canceled);
        }

        session.output_created = true;
        let muxer = self.backend.create_muxer(output)?;
        let mux = session.mux.insert(
            DeferredMuxer::new(muxer, TrackRole::ALL)
                .with_format_validation(self.settings.pipeline.validate_output_formats),
        );
        mux.set_orientation_hint(meta.rotation)?;

        let video = match plan {
            VideoPlan::PassThrough => {
                TrackTranscoder::pass_through(TrackRole::Video, meta.video.index, meta.video.format)
            }
            VideoPlan::Reencode(target) => TrackTranscoder::active(
                TrackRole::Video,
                meta.video.index,
                meta.video.format,
                target,
            ),
        };
        let audio =
            TrackTranscoder::pass_through(TrackRole::Audio, meta.audio.index, meta.audio.format);
        session.transcoders = vec![video, audio];

        for transcoder in &mut session.transcoders {
            transcoder.setup(session.demuxer.as_mut(), self.backend.codecs(), mux)?;
        }

        let video_mode = if session.transcoders[0].is_pass_through() {
            "pass-through"
        } else {
            "re-encode"
        };
        info!(
            source_duration_us = ?meta.duration_us,
            rotation = meta.rotation,
            video = video_mode,
            "transcoding"
        );

        let mut driver = PipelineDriver::new(&self.settings.pipeline, meta.duration_us);
        driver.run(
            &mut session.transcoders,
            session.demuxer.as_mut(),
            mux,
            cancel,
            progress,
        )?;
        mux.stop()
    }
}

impl std::fmt::Debug for TranscodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`TranscodeEngine::attempt`].
#[derive(Debug)]
pub struct Attempt {
    pub result: Result<()>,
    /// The muxer was asked to create `output`. When false, any file at that
    /// path predates the transcode and is not partial output.
    pub output_created: bool,
}

impl Attempt {
    fn untouched(result: Result<()>) -> Self {
        Self {
            result,
            output_created: false,
        }
    }
}

/// Resources opened by one transcode.
struct Session {
    demuxer: Box<dyn Demuxer>,
    mux: Option<DeferredMuxer>,
    transcoders: Vec<TrackTranscoder>,
    output_created: bool,
}

impl Session {
    /// Release transcoders, then the demuxer, then the muxer, and fold the
    /// release results into the run result.
    fn finish(mut self, result: Result<()>) -> Result<()> {
        let mut shutdown: Option<CapabilityError> = None;

        for transcoder in &mut self.transcoders {
            if let Err(err) = transcoder.release() {
                error!(role = %transcoder.role(), error = %err, "failed to release codecs");
                shutdown.get_or_insert(err);
            }
        }
        if let Err(err) = self.demuxer.release() {
            error!(error = %err, "failed to release demuxer");
            shutdown.get_or_insert(err);
        }
        let muxer_release = self.mux.as_mut().map_or(Ok(()), DeferredMuxer::release);

        if let Some(err) = shutdown {
            if let Err(original) = &result {
                warn!(error = %original, "superseded by shutdown fault");
            }
            return Err(TranscodeError::ShutdownFault(err));
        }
        match (result, muxer_release) {
            (Ok(()), Err(err)) => Err(TranscodeError::ReleaseFault(err)),
            (Err(original), Err(err)) => {
                warn!(error = %err, "failed to release muxer after failed run");
                Err(original)
            }
            (result, Ok(())) => result,
        }
    }
}
