use std::sync::Arc;

use crate::annotate::Annotator;
use crate::controls::{DetectionControls, RunGuard};
use crate::error::Result;
use crate::model::{Detector, load_model};
use crate::peer::{IceServerProvider, MediaTransport, PeerSession, annotating_transform};
use crate::sequencer::{FrameSequencer, SessionReport};
use crate::sink::DisplaySink;
use crate::source::{FrameHandle, SourceRequest};
use crate::toml_utils::AppConfig;

/// Result of one "start detection" trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// The loop ran and ended (possibly stopped or cut short)
    Completed(SessionReport),
    /// Another detection was running, the trigger had no effect
    AlreadyRunning,
    /// The source could not be opened; message is meant for the user
    Failed(String),
}

impl DetectionOutcome {
    pub fn user_message(&self) -> String {
        match self {
            DetectionOutcome::Completed(report) => report.user_message(),
            DetectionOutcome::AlreadyRunning => "Detection is already running".to_string(),
            DetectionOutcome::Failed(msg) => msg.clone(),
        }
    }
}

/// Ties configuration, model and controls together behind the user triggers.
pub struct Inspector {
    config: AppConfig,
    detector: Arc<dyn Detector>,
    annotator: Arc<Annotator>,
    controls: DetectionControls,
    conf: f32,
}

impl Inspector {
    /// Load the model named in `config`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let detector = load_model(&config.model)?;
        let annotator = Annotator::new(config.annotate.clone());
        Ok(Self::new(config, Arc::new(detector), annotator))
    }

    pub fn new(config: AppConfig, detector: Arc<dyn Detector>, annotator: Annotator) -> Self {
        let conf = config.model.conf;
        Self {
            config,
            detector,
            annotator: Arc::new(annotator),
            controls: DetectionControls::new(),
            conf,
        }
    }

    /// Override the confidence threshold used by later runs.
    pub fn set_conf(&mut self, conf: f32) {
        self.conf = conf.clamp(0.0, 1.0);
    }

    pub fn conf(&self) -> f32 {
        self.conf
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controls(&self) -> &DetectionControls {
        &self.controls
    }

    /// Display names of the stored sample videos.
    pub fn sample_names(&self) -> Vec<String> {
        self.config.source.videos.keys().cloned().collect()
    }

    /// "Start detection" trigger: open the requested source and run it to the end.
    ///
    /// Errors never escape; they come back as a user facing message.
    pub fn detect(
        &self,
        request: &SourceRequest,
        sink: &mut dyn DisplaySink,
    ) -> DetectionOutcome {
        let Some(guard) = self.controls.try_start() else {
            tracing::warn!("Start ignored, a detection is already running");
            return DetectionOutcome::AlreadyRunning;
        };

        tracing::info!("Starting {} detection", request.kind());
        let mut handle = match request.open(&self.config.source) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Cannot open {} source: {}", request.kind(), e);
                return DetectionOutcome::Failed(e.to_string());
            }
        };

        let report = self.run_handle(&mut handle, sink, &guard);
        DetectionOutcome::Completed(report)
    }

    /// Run an already opened handle under the same controls as `detect`.
    pub fn detect_with_handle(
        &self,
        handle: &mut dyn FrameHandle,
        sink: &mut dyn DisplaySink,
    ) -> DetectionOutcome {
        let Some(guard) = self.controls.try_start() else {
            handle.release();
            return DetectionOutcome::AlreadyRunning;
        };
        DetectionOutcome::Completed(self.run_handle(handle, sink, &guard))
    }

    fn run_handle(
        &self,
        handle: &mut dyn FrameHandle,
        sink: &mut dyn DisplaySink,
        guard: &RunGuard,
    ) -> SessionReport {
        FrameSequencer::new(self.detector.as_ref(), &self.annotator, self.conf)
            .verbose(tracing::enabled!(tracing::Level::DEBUG))
            .run(handle, sink, guard.stop_signal())
    }

    /// "Stop detection" trigger.
    pub fn stop(&self) {
        self.controls.request_stop();
    }

    /// Start a real-time peer session annotating every inbound frame.
    pub fn start_live(
        &self,
        provider: &dyn IceServerProvider,
        transport: &mut dyn MediaTransport,
    ) -> Result<PeerSession> {
        let transform = annotating_transform(
            Arc::clone(&self.detector),
            Arc::clone(&self.annotator),
            self.conf,
        );
        PeerSession::start(provider, transport, transform)
    }
}
