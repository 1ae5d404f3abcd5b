use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::thread::{self, JoinHandle};

use super::ice::{IceTransportPolicy, RtcConfiguration};
use super::session::{MediaChannels, MediaTransport};
use crate::controls::StopSignal;
use crate::error::{AppError, Result};
use crate::sink::DisplaySink;
use crate::source::FrameHandle;

type SourceOpener<F> = Box<dyn FnOnce() -> Result<F> + Send>;

/// Local stand-in for the remote peer.
///
/// Inbound frames come from a local source; outbound frames go to a display
/// sink. Used to exercise a peer session without a browser on the other end.
///
/// The inbound channel holds a single frame: while the session is busy,
/// newly captured frames are dropped instead of queued.
pub struct LoopbackTransport<F, S> {
    open: Option<SourceOpener<F>>,
    sink: Option<S>,
    stop: StopSignal,
    dropped: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl<F, S> LoopbackTransport<F, S>
where
    F: FrameHandle + Send + 'static,
    S: DisplaySink + Send + 'static,
{
    pub fn new(source: F, sink: S) -> Self {
        Self::deferred(move || Ok(source), sink)
    }

    /// Open the source only once negotiation starts, i.e. after the relay
    /// configuration has been fetched and accepted.
    pub fn deferred(open: impl FnOnce() -> Result<F> + Send + 'static, sink: S) -> Self {
        Self {
            open: Some(Box::new(open)),
            sink: Some(sink),
            stop: StopSignal::new(),
            dropped: Arc::new(AtomicU64::new(0)),
            threads: Vec::new(),
        }
    }
}

impl<F, S> LoopbackTransport<F, S> {
    /// Captured frames discarded because the previous one was still pending.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Stop capturing and wait for both pump threads.
    pub fn close(&mut self) {
        self.stop.raise();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Loopback pump thread panicked");
            }
        }
    }
}

impl<F, S> MediaTransport for LoopbackTransport<F, S>
where
    F: FrameHandle + Send + 'static,
    S: DisplaySink + Send + 'static,
{
    fn negotiate(&mut self, config: &RtcConfiguration) -> Result<MediaChannels> {
        if config.ice_transport_policy != IceTransportPolicy::Relay
            || !config.ice_servers.iter().any(|s| s.is_relay())
        {
            return Err(AppError::PeerSessionSetup(
                "loopback peer expects a relay-only configuration".to_string(),
            ));
        }
        let (open, mut sink) = match (self.open.take(), self.sink.take()) {
            (Some(open), Some(sink)) => (open, sink),
            _ => {
                return Err(AppError::PeerSessionSetup(
                    "loopback transport already negotiated".to_string(),
                ));
            }
        };

        let mut source = open().map_err(|e| {
            AppError::PeerSessionSetup(format!("cannot open the local source: {e}"))
        })?;

        let (in_tx, in_rx) = mpsc::sync_channel(1);
        let (out_tx, out_rx) = mpsc::channel();

        let stop = self.stop.clone();
        let dropped = Arc::clone(&self.dropped);
        let capture = thread::Builder::new()
            .name("loopback-capture".to_string())
            .spawn(move || {
                while !stop.is_raised() {
                    match source.read_next() {
                        Ok(Some(frame)) => match in_tx.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                dropped.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Loopback capture ended: {}", e);
                            break;
                        }
                    }
                }
                source.release();
            })
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot spawn capture: {e}")))?;

        let display = thread::Builder::new()
            .name("loopback-display".to_string())
            .spawn(move || {
                for frame in out_rx {
                    sink.show(frame);
                }
            })
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot spawn display: {e}")))?;

        self.threads.push(capture);
        self.threads.push(display);

        Ok(MediaChannels {
            inbound: in_rx,
            outbound: out_tx,
        })
    }
}

impl<F, S> Drop for LoopbackTransport<F, S> {
    fn drop(&mut self) {
        self.close();
    }
}
