// -- submodules
mod ice;
mod loopback;
#[cfg(feature = "webrtc")]
mod rtc_transport;
mod session;

pub use ice::{
    HttpIceProvider, IceServer, IceServerProvider, IceTransportPolicy, RelayConfig,
    RtcConfiguration, StaticIceProvider, StaticIceServer, parse_ice_servers,
};
pub use loopback::LoopbackTransport;
#[cfg(feature = "webrtc")]
pub use rtc_transport::{FileSignaling, Signaling, WebRtcTransport, rtc_configuration};
pub use session::{
    FrameTransform, MediaChannels, MediaTransport, PeerSession, PeerStats, annotating_transform,
};
