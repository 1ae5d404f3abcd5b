mod annotate;
mod app;
mod controls;
mod error;
mod frame;
mod logging;
mod model;
mod peer;
mod progress_bar;
mod sequencer;
mod sink;
mod source;
mod toml_utils;

pub use annotate::{AnnotateConfigs, Annotator};
pub use app::{DetectionOutcome, Inspector};
pub use controls::{DetectionControls, RunGuard, StopSignal};
pub use error::{AppError, Result};
pub use frame::Frame;
pub use logging::init_logger;
pub use model::{Detection, Detections, Detector, ModelArgs, YoloDetector, load_model};
pub use progress_bar::progress_bar_style;
pub use sink::{DisplaySink, ImageFileSink, LatestFrame};
pub use source::{
    CapturedImage, FfmpegInput, FfmpegReader, FormatInfo, FrameHandle, RemoteResolver,
    SourceConfig, SourceHandle, SourceKind, SourceRequest, StillImage, StreamPreference,
    ToolPaths, UPLOAD_EXTENSIONS, UploadedFile, VideoGeometry, WebcamConfig, parse_device_index,
    parse_probe, select_format,
};
pub use toml_utils::{AppConfig, parse_toml};

// Core detection loop
pub use sequencer::{EndReason, FrameSequencer, SessionReport};

// Real-time peer session
pub use peer::{
    FrameTransform, HttpIceProvider, IceServer, IceServerProvider, IceTransportPolicy,
    LoopbackTransport, MediaChannels, MediaTransport, PeerSession, PeerStats, RelayConfig,
    RtcConfiguration, StaticIceProvider, StaticIceServer, annotating_transform,
    parse_ice_servers,
};
#[cfg(feature = "webrtc")]
pub use peer::{FileSignaling, Signaling, WebRtcTransport, rtc_configuration};
