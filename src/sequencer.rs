use std::fmt;
use std::time::Instant;

use crate::annotate::Annotator;
use crate::controls::StopSignal;
use crate::model::Detector;
use crate::progress_bar::frame_progress;
use crate::sink::DisplaySink;
use crate::source::FrameHandle;

/// Why a detection loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The source ran out of frames
    Exhausted,
    /// The stop trigger was raised
    Stopped,
    /// A read failed mid-stream; handled like end-of-stream
    ReadFailed(String),
    /// The model failed on a frame
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_annotated: u64,
    pub end: EndReason,
}

impl SessionReport {
    /// Whether the run ended without a model failure.
    pub fn is_success(&self) -> bool {
        !matches!(self.end, EndReason::Failed(_))
    }

    pub fn user_message(&self) -> String {
        match &self.end {
            EndReason::Exhausted => format!(
                "Detection finished: {} frames annotated",
                self.frames_annotated
            ),
            EndReason::Stopped => format!(
                "Detection stopped after {} frames",
                self.frames_annotated
            ),
            EndReason::ReadFailed(e) => format!(
                "Video ended after {} frames ({e})",
                self.frames_annotated
            ),
            EndReason::Failed(e) => format!("Detection failed: {e}"),
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message())
    }
}

/// Shared read -> annotate -> display loop for every source.
pub struct FrameSequencer<'a> {
    detector: &'a dyn Detector,
    annotator: &'a Annotator,
    conf: f32,
    verbose: bool,
}

impl<'a> FrameSequencer<'a> {
    pub fn new(detector: &'a dyn Detector, annotator: &'a Annotator, conf: f32) -> Self {
        Self {
            detector,
            annotator,
            conf,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Drive `handle` until it is exhausted, fails, or `stop` is raised.
    ///
    /// Frames are handled strictly one at a time. The handle is released
    /// before this returns, whatever the exit path.
    pub fn run<H, S>(&self, handle: &mut H, sink: &mut S, stop: &StopSignal) -> SessionReport
    where
        H: FrameHandle + ?Sized,
        S: DisplaySink + ?Sized,
    {
        let start_time = Instant::now();
        let pb = frame_progress(handle.total_frames());
        let mut frames_annotated = 0u64;

        let end = loop {
            if stop.is_raised() {
                break EndReason::Stopped;
            }

            let frame = match handle.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break EndReason::Exhausted,
                Err(e) => {
                    tracing::warn!("Read failed, ending stream: {}", e);
                    break EndReason::ReadFailed(e.to_string());
                }
            };

            // a frame read after stop was raised is discarded unannotated
            if stop.is_raised() {
                break EndReason::Stopped;
            }

            if self.verbose {
                tracing::debug!("Processing frame {}", frame.index);
            }

            match self.annotator.annotate(self.detector, self.conf, &frame) {
                Ok(annotated) => {
                    sink.show(annotated);
                    frames_annotated += 1;
                    pb.inc(1);
                }
                Err(e) => {
                    tracing::error!("Detection failed on frame {}: {}", frame.index, e);
                    break EndReason::Failed(e.to_string());
                }
            }
        };

        handle.release();
        pb.finish_and_clear();

        tracing::info!(
            "Detection loop ended ({:?}) after {} frames in {:.3?}",
            end,
            frames_annotated,
            start_time.elapsed()
        );
        SessionReport {
            frames_annotated,
            end,
        }
    }
}
