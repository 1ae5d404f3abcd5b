//! Media transport backed by a WebRTC peer connection.
//!
//! The remote peer sends an H.264 video track. Every access unit is decoded
//! and handed to the session; annotated frames are encoded back onto a local
//! track of the same connection, so the browser sees one SENDRECV stream.
//! Only the relay configuration produced by the session is used for ICE.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use image::RgbImage;
use openh264::decoder::Decoder;
use openh264::encoder::Encoder;
use openh264::formats::{RgbSliceU8, YUVBuffer, YUVSource};
use serde::Deserialize;
use tokio::runtime::{Handle, Runtime};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MediaEngine};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packetizer::Depacketizer;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::ice::{IceTransportPolicy, RtcConfiguration};
use super::session::{MediaChannels, MediaTransport};
use crate::controls::StopSignal;
use crate::error::{AppError, Result};
use crate::frame::Frame;

const POLL: Duration = Duration::from_millis(50);
const FRAME_DURATION: Duration = Duration::from_millis(33);
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
/// Compressed access units waiting for the decoder
const UNIT_BACKLOG: usize = 64;

/// Offer/answer exchange with the remote peer.
pub trait Signaling: Send {
    /// SDP offer of the remote peer.
    fn remote_offer(&mut self) -> Result<String>;

    /// Deliver the local answer, with gathered ICE candidates.
    fn send_answer(&mut self, sdp: &str) -> Result<()>;
}

/// Offer read from a file, answer written to another.
///
/// The offer may be raw SDP or the browser's `{"type": "offer", "sdp": ...}`.
#[derive(Debug, Clone)]
pub struct FileSignaling {
    offer: PathBuf,
    answer: PathBuf,
}

#[derive(Deserialize)]
struct SessionDescriptionJson {
    sdp: String,
}

impl FileSignaling {
    pub fn new(offer: impl Into<PathBuf>, answer: impl Into<PathBuf>) -> Self {
        Self {
            offer: offer.into(),
            answer: answer.into(),
        }
    }
}

impl Signaling for FileSignaling {
    fn remote_offer(&mut self) -> Result<String> {
        let text = std::fs::read_to_string(&self.offer)?;
        Ok(match serde_json::from_str::<SessionDescriptionJson>(&text) {
            Ok(desc) => desc.sdp,
            Err(_) => text,
        })
    }

    fn send_answer(&mut self, sdp: &str) -> Result<()> {
        std::fs::write(&self.answer, sdp)?;
        tracing::info!("Wrote SDP answer to {:?}", self.answer);
        Ok(())
    }
}

/// Peer connection configuration for `config`.
pub fn rtc_configuration(config: &RtcConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ice_transport_policy: match config.ice_transport_policy {
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
        },
        ..Default::default()
    }
}

fn setup_error(e: webrtc::Error) -> AppError {
    AppError::PeerSessionSetup(e.to_string())
}

/// Answering side of a WebRTC session carrying one H.264 video track each way.
pub struct WebRtcTransport<G> {
    signaling: G,
    runtime: Runtime,
    peer: Option<Arc<RTCPeerConnection>>,
    stop: StopSignal,
    dropped: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl<G: Signaling> WebRtcTransport<G> {
    pub fn new(signaling: G) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("webrtc")
            .build()
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot start runtime: {e}")))?;
        Ok(Self {
            signaling,
            runtime,
            peer: None,
            stop: StopSignal::new(),
            dropped: Arc::new(AtomicU64::new(0)),
            threads: Vec::new(),
        })
    }
}

impl<G> WebRtcTransport<G> {
    /// Inbound units or frames discarded because the next stage was busy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Close the peer connection and wait for the codec threads.
    pub fn close(&mut self) {
        self.stop.raise();
        if let Some(peer) = self.peer.take()
            && let Err(e) = self.runtime.block_on(peer.close())
        {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("WebRTC codec thread panicked");
            }
        }
    }
}

impl<G: Signaling> MediaTransport for WebRtcTransport<G> {
    fn negotiate(&mut self, config: &RtcConfiguration) -> Result<MediaChannels> {
        if self.peer.is_some() {
            return Err(AppError::PeerSessionSetup(
                "peer connection already negotiated".to_string(),
            ));
        }
        let offer = self.signaling.remote_offer()?;

        let (unit_tx, unit_rx) = mpsc::sync_channel(UNIT_BACKLOG);
        let (in_tx, in_rx) = mpsc::sync_channel(1);
        let (out_tx, out_rx) = mpsc::channel();

        let track = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "annotated".to_string(),
            "solar-inspect".to_string(),
        ));
        let (peer, answer) = self.runtime.block_on(connect(
            rtc_configuration(config),
            offer,
            Arc::clone(&track),
            unit_tx,
            Arc::clone(&self.dropped),
        ))?;
        self.peer = Some(peer);
        self.signaling.send_answer(&answer)?;

        let stop = self.stop.clone();
        let dropped = Arc::clone(&self.dropped);
        let decode = thread::Builder::new()
            .name("webrtc-decode".to_string())
            .spawn(move || decode_loop(unit_rx, in_tx, dropped, stop))
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot spawn decoder: {e}")))?;
        self.threads.push(decode);

        let stop = self.stop.clone();
        let handle = self.runtime.handle().clone();
        let encode = thread::Builder::new()
            .name("webrtc-encode".to_string())
            .spawn(move || encode_loop(out_rx, track, handle, stop))
            .map_err(|e| AppError::PeerSessionSetup(format!("cannot spawn encoder: {e}")))?;
        self.threads.push(encode);

        Ok(MediaChannels {
            inbound: in_rx,
            outbound: out_tx,
        })
    }
}

impl<G> Drop for WebRtcTransport<G> {
    fn drop(&mut self) {
        self.close();
    }
}

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_string(),
        rtcp_feedback: vec![],
    }
}

async fn connect(
    config: RTCConfiguration,
    offer_sdp: String,
    track: Arc<TrackLocalStaticSample>,
    units: SyncSender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
) -> Result<(Arc<RTCPeerConnection>, String)> {
    // H.264 only, both directions use the same codec
    let mut media = MediaEngine::default();
    media
        .register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: 102,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(setup_error)?;
    let registry = register_default_interceptors(Registry::new(), &mut media).map_err(setup_error)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();
    let peer = Arc::new(api.new_peer_connection(config).await.map_err(setup_error)?);

    let sender = peer
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(setup_error)?;
    // interceptors only run while RTCP is being read
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });

    peer.on_track(Box::new(move |remote, _receiver, _transceiver| {
        let units = units.clone();
        let dropped = Arc::clone(&dropped);
        Box::pin(async move { forward_access_units(remote, units, dropped).await })
    }));

    let offer = RTCSessionDescription::offer(offer_sdp).map_err(setup_error)?;
    peer.set_remote_description(offer).await.map_err(setup_error)?;
    let answer = peer.create_answer(None).await.map_err(setup_error)?;
    let mut gathered = peer.gathering_complete_promise().await;
    peer.set_local_description(answer).await.map_err(setup_error)?;
    let _ = gathered.recv().await;

    let local = peer.local_description().await.ok_or_else(|| {
        AppError::PeerSessionSetup("no local description after gathering".to_string())
    })?;
    tracing::info!("Peer connection negotiated");
    Ok((peer, local.sdp))
}

/// Reassemble RTP packets into Annex-B access units for the decoder.
async fn forward_access_units(
    track: Arc<TrackRemote>,
    units: SyncSender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
) {
    let mut depacketizer = H264Packet::default();
    let mut unit = Vec::new();
    while let Ok((packet, _)) = track.read_rtp().await {
        match depacketizer.depacketize(&packet.payload) {
            Ok(nal) => unit.extend_from_slice(&nal),
            Err(e) => {
                tracing::debug!("Skipping RTP packet: {}", e);
                continue;
            }
        }
        if !packet.header.marker || unit.is_empty() {
            continue;
        }
        match units.try_send(std::mem::take(&mut unit)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    tracing::debug!("Remote track ended");
}

fn decode_loop(
    units: Receiver<Vec<u8>>,
    inbound: SyncSender<Frame>,
    dropped: Arc<AtomicU64>,
    stop: StopSignal,
) {
    let mut decoder = match Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!("Cannot create H.264 decoder: {}", e);
            return;
        }
    };

    let mut index = 0u64;
    while !stop.is_raised() {
        let unit = match units.recv_timeout(POLL) {
            Ok(unit) => unit,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let frame = match decode_unit(&mut decoder, &unit) {
            Ok(Some(frame)) => frame.with_index(index),
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!("Undecodable access unit: {}", e);
                continue;
            }
        };
        index += 1;

        // latest wins: a frame still waiting for the session is not replaced
        match inbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::SeqCst);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn decode_unit(decoder: &mut Decoder, unit: &[u8]) -> Result<Option<Frame>> {
    let Some(yuv) = decoder
        .decode(unit)
        .map_err(|e| AppError::StreamRead(e.to_string()))?
    else {
        return Ok(None);
    };
    let (width, height) = yuv.dimensions();
    let mut rgb = vec![0u8; width * height * 3];
    yuv.write_rgb8(&mut rgb);
    let image = RgbImage::from_raw(width as u32, height as u32, rgb)
        .ok_or_else(|| AppError::StreamRead("decoded frame has the wrong size".to_string()))?;
    Ok(Some(Frame::from_rgb_image(&image)))
}

fn encode_loop(
    outbound: Receiver<Frame>,
    track: Arc<TrackLocalStaticSample>,
    runtime: Handle,
    stop: StopSignal,
) {
    let mut encoder = match Encoder::new() {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::error!("Cannot create H.264 encoder: {}", e);
            return;
        }
    };

    while !stop.is_raised() {
        let frame = match outbound.recv_timeout(POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let data = match encode_frame(&mut encoder, &frame) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Cannot encode frame {}: {}", frame.index, e);
                continue;
            }
        };
        let sample = Sample {
            data: Bytes::from(data),
            duration: FRAME_DURATION,
            ..Default::default()
        };
        if let Err(e) = runtime.block_on(track.write_sample(&sample)) {
            tracing::warn!("Failed to send frame {}: {}", frame.index, e);
        }
    }
}

fn encode_frame(encoder: &mut Encoder, frame: &Frame) -> Result<Vec<u8>> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width % 2 != 0 || height % 2 != 0 {
        return Err(AppError::Inference(format!(
            "H.264 needs even dimensions, got {width}x{height}"
        )));
    }
    let rgb = frame.to_rgb_image();
    let yuv = YUVBuffer::from_rgb_source(RgbSliceU8::new(rgb.as_raw(), (width, height)));
    let bitstream = encoder
        .encode(&yuv)
        .map_err(|e| AppError::Inference(format!("H.264 encode failed: {e}")))?;
    Ok(bitstream.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ice::IceServer;
    use tempfile::TempDir;

    #[test]
    fn test_relay_configuration_maps_to_peer_connection() {
        let config = RtcConfiguration::relay_only(vec![
            IceServer {
                urls: vec!["stun:stun.example:3478".to_string()],
                username: None,
                credential: None,
            },
            IceServer {
                urls: vec!["turn:relay.example:3478".to_string()],
                username: Some("user".to_string()),
                credential: Some("secret".to_string()),
            },
        ])
        .unwrap();

        let rtc = rtc_configuration(&config);
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::Relay);
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[0].username, "");
        assert_eq!(rtc.ice_servers[1].urls, vec!["turn:relay.example:3478"]);
        assert_eq!(rtc.ice_servers[1].credential, "secret");
    }

    #[test]
    fn test_file_signaling_accepts_raw_and_json_offers() {
        let dir = TempDir::new().unwrap();
        let offer = dir.path().join("offer");
        let answer = dir.path().join("answer.sdp");
        let mut signaling = FileSignaling::new(&offer, &answer);

        std::fs::write(&offer, "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n").unwrap();
        assert!(signaling.remote_offer().unwrap().starts_with("v=0"));

        std::fs::write(&offer, r#"{"type": "offer", "sdp": "v=0\r\n"}"#).unwrap();
        assert_eq!(signaling.remote_offer().unwrap(), "v=0\r\n");

        signaling.send_answer("v=0 answer").unwrap();
        assert_eq!(std::fs::read_to_string(&answer).unwrap(), "v=0 answer");
    }

    #[test]
    fn test_odd_frames_are_not_encoded() {
        let mut encoder = Encoder::new().unwrap();
        let frame = Frame::from_bgr(3, 2, vec![0; 18]).unwrap();
        assert!(matches!(
            encode_frame(&mut encoder, &frame),
            Err(AppError::Inference(_))
        ));
    }
}
