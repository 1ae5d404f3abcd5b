use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::ice::{IceServerProvider, RtcConfiguration};
use crate::annotate::Annotator;
use crate::controls::StopSignal;
use crate::error::{AppError, Result};
use crate::frame::Frame;
use crate::model::Detector;

/// Per-frame hook injected into the transport: inbound frame in, outbound frame out.
pub type FrameTransform = Arc<dyn Fn(&Frame) -> Result<Frame> + Send + Sync>;

/// How often the worker re-checks the stop signal while waiting for frames.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Frame channels produced by a successful negotiation.
pub struct MediaChannels {
    pub inbound: Receiver<Frame>,
    pub outbound: Sender<Frame>,
}

/// Transport collaborator that negotiates the media session.
pub trait MediaTransport {
    fn negotiate(&mut self, config: &RtcConfiguration) -> Result<MediaChannels>;
}

/// Hook that annotates every inbound frame with a fixed model and threshold.
pub fn annotating_transform(
    detector: Arc<dyn Detector>,
    annotator: Arc<Annotator>,
    conf: f32,
) -> FrameTransform {
    Arc::new(move |frame: &Frame| annotator.annotate(detector.as_ref(), conf, frame))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub frames_transformed: u64,
    /// Inbound frames skipped because a newer one had already arrived
    pub frames_dropped: u64,
}

/// A running real-time session. Dropping it stops the worker.
pub struct PeerSession {
    config: RtcConfiguration,
    stop: StopSignal,
    worker: Option<JoinHandle<PeerStats>>,
}

impl PeerSession {
    /// Fetch relay credentials, negotiate, and start transforming frames.
    ///
    /// A failed fetch or negotiation means no session: the transport is not
    /// negotiated (for a failed fetch) and the transform is never called.
    pub fn start(
        provider: &dyn IceServerProvider,
        transport: &mut dyn MediaTransport,
        transform: FrameTransform,
    ) -> Result<Self> {
        let servers = provider.fetch().map_err(|e| match e {
            AppError::PeerSessionSetup(_) => e,
            other => AppError::PeerSessionSetup(other.to_string()),
        })?;
        let config = RtcConfiguration::relay_only(servers)?;

        let channels = transport.negotiate(&config).map_err(|e| match e {
            AppError::PeerSessionSetup(_) => e,
            other => AppError::PeerSessionSetup(format!("negotiation failed: {other}")),
        })?;

        let stop = StopSignal::new();
        let worker_stop = stop.clone();
        let worker = thread::Builder::new()
            .name("peer-transform".to_string())
            .spawn(move || transform_loop(channels, transform, worker_stop))
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot spawn worker: {e}")))?;

        tracing::info!(
            "Peer session started with {} ICE servers (policy: {})",
            config.ice_servers.len(),
            config.ice_transport_policy
        );
        Ok(Self {
            config,
            stop,
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &RtcConfiguration {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Block until the transport closes the session.
    pub fn wait(mut self) -> PeerStats {
        self.join()
    }

    /// Stop the worker and return its counters.
    pub fn stop(mut self) -> PeerStats {
        self.stop.raise();
        self.join()
    }

    fn join(&mut self) -> PeerStats {
        let Some(worker) = self.worker.take() else {
            return PeerStats::default();
        };
        match worker.join() {
            Ok(stats) => {
                tracing::info!(
                    "Peer session ended: {} frames transformed, {} dropped",
                    stats.frames_transformed,
                    stats.frames_dropped
                );
                stats
            }
            Err(_) => {
                tracing::error!("Peer transform thread panicked");
                PeerStats::default()
            }
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.stop.raise();
        self.join();
    }
}

fn transform_loop(
    channels: MediaChannels,
    transform: FrameTransform,
    stop: StopSignal,
) -> PeerStats {
    let MediaChannels { inbound, outbound } = channels;
    let mut stats = PeerStats::default();

    while !stop.is_raised() {
        let mut frame = match inbound.recv_timeout(STOP_POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // latest wins: skip anything that queued up behind the current frame
        loop {
            match inbound.try_recv() {
                Ok(newer) => {
                    frame = newer;
                    stats.frames_dropped += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if stop.is_raised() {
            break;
        }

        let out = match transform(&frame) {
            Ok(annotated) => annotated,
            Err(e) => {
                tracing::warn!(
                    "Transform failed on frame {}, passing it through: {}",
                    frame.index,
                    e
                );
                frame
            }
        };
        stats.frames_transformed += 1;

        if outbound.send(out).is_err() {
            break;
        }
    }
    stats
}
