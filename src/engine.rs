//! The native media engine.
//!
//! Codecs, RTP/SRTP transport, ZRTP, DTLS and the DSP graphs live outside
//! this crate. [`MediaEngine`] is everything the orchestration asks of them.
//! Streams hold handles ([`NativeStreamId`], [`SessionsId`], ...) that the
//! engine hands out.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use thiserror::Error;

use crate::config::MediaEncryption;
use crate::desc::{Direction, DtlsRole, RtcpFeedback, SrtpSuite, StreamType};
use crate::ice::IceEvent;
use crate::port::PortConfig;
use crate::profile::RtpProfile;
use crate::stats::BandwidthUsage;

/// Errors from the native engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No local port could be bound.
    #[error("Cannot bind local port {0:?}")]
    Bind(Option<u16>),

    /// The OS refused access to the local network.
    #[error("Local network permission denied")]
    PermissionDenied,

    /// No DTLS certificate is available.
    #[error("No DTLS certificate")]
    NoCertificate,

    /// The engine does not support the requested feature.
    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    /// A native call returned an error code.
    #[error("Native error {code} in {what}")]
    Native {
        /// Which call failed.
        what: &'static str,
        /// The returned code.
        code: i32,
    },

    /// Some io error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a native media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeStreamId(pub u64);

/// Handle to the transport sessions (RTP, SRTP, ZRTP, DTLS contexts) of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionsId(pub u64);

/// Handle to an RTP profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileId(pub u64);

/// Handle to an RTP bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleId(pub u64);

/// Transport sessions with the ports they were bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSessions {
    /// The handle.
    pub id: SessionsId,
    /// Bound RTP port.
    pub rtp_port: u16,
    /// Bound RTCP port.
    pub rtcp_port: u16,
}

/// Where RTP and RTCP are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpDestination {
    /// RTP destination.
    pub rtp: SocketAddr,
    /// RTCP destination.
    pub rtcp: SocketAddr,
}

/// Everything needed to start media on a native stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    /// The profile created from the negotiated payloads.
    pub profile: ProfileId,
    /// Payload type used for sending.
    pub payload_type: u8,
    /// Remote destinations.
    pub dest: RtpDestination,
    /// Negotiated direction.
    pub dir: Direction,
    /// Start with the input muted.
    pub muted: bool,
    /// RTP and RTCP on the same port.
    pub rtcp_mux: bool,
    /// AVPF feedback, `None` when AVPF is not negotiated.
    pub rtcp_fb: Option<RtcpFeedback>,
    /// RTCP-XR reports.
    pub rtcp_xr: bool,
    /// TTL when sending to a multicast group.
    pub multicast_ttl: Option<u8>,
    /// Upper bound of the network bitrate in bit/s, 0 for none.
    pub max_network_bitrate: u32,
    /// Refuse to send unencrypted media.
    pub encryption_mandatory: bool,
}

/// Events polled from a native stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// ZRTP encryption went on or off.
    ZrtpEncryptionChanged {
        /// New state.
        encrypted: bool,
    },
    /// The ZRTP short authentication string is known.
    ZrtpSasReady {
        /// The SAS.
        token: String,
        /// Whether it was verified in a previous call.
        verified: bool,
    },
    /// DTLS-SRTP encryption went on or off.
    DtlsEncryptionChanged {
        /// New state.
        encrypted: bool,
    },
    /// A telephone event (RFC 4733) was received.
    TelephoneEvent(u8),
    /// An ICE engine event for the check list of this stream.
    Ice(IceEvent),
    /// The receiver side estimated the available video bandwidth.
    VideoBandwidthEstimation {
        /// Estimate in kbit/s.
        kbps: f32,
    },
    /// The first video frame was decoded.
    FirstVideoFrameDecoded,
}

/// The native media engine.
///
/// One engine serves every stream of a group. Methods with defaults are
/// optional capabilities.
pub trait MediaEngine {
    /// Bind transport sessions for a new stream.
    fn create_sessions(
        &mut self,
        kind: StreamType,
        ports: &PortConfig,
    ) -> Result<TransportSessions, EngineError>;

    /// Release transport sessions. Called once on finish.
    fn release_sessions(&mut self, sessions: SessionsId);

    /// Create a dormant native stream on top of transport sessions.
    fn create_stream(&mut self, kind: StreamType, sessions: SessionsId) -> NativeStreamId;

    /// Destroy a native stream.
    fn destroy_stream(&mut self, id: NativeStreamId);

    /// Create an RTP profile.
    fn create_profile(&mut self, profile: &RtpProfile) -> ProfileId;

    /// Release an RTP profile. The graph must not reference it anymore.
    fn release_profile(&mut self, profile: ProfileId);

    /// Replace the payload table of a running stream.
    fn set_profile(&mut self, id: NativeStreamId, profile: ProfileId);

    /// Start media.
    fn start_stream(&mut self, id: NativeStreamId, params: &StartParams) -> Result<(), EngineError>;

    /// Stop media. The stream goes back to dormant, transport sessions are kept.
    fn stop_stream(&mut self, id: NativeStreamId);

    /// Change the remote destinations of a running stream.
    fn update_destinations(&mut self, id: NativeStreamId, dest: &RtpDestination);

    /// Add a destination receiving a copy of the sent media.
    fn add_aux_destination(&mut self, id: NativeStreamId, dest: &RtpDestination);

    /// Drop all auxiliary destinations.
    fn clear_aux_destinations(&mut self, id: NativeStreamId);

    /// Toggle symmetric RTP.
    fn set_symmetric_rtp(&mut self, id: NativeStreamId, enabled: bool);

    /// Mute or unmute the input of a running stream.
    fn set_muted(&mut self, id: NativeStreamId, muted: bool);

    /// Whether the engine can do this kind of encryption.
    fn supports_encryption(&self, _enc: MediaEncryption) -> bool {
        true
    }

    /// Whether the engine can do this SRTP suite.
    fn supports_srtp_suite(&self, _suite: SrtpSuite) -> bool {
        true
    }

    /// Set the SRTP key for incoming media.
    fn set_srtp_recv_key(
        &mut self,
        sessions: SessionsId,
        suite: SrtpSuite,
        key: &str,
    ) -> Result<(), EngineError>;

    /// Set the SRTP key for outgoing media.
    fn set_srtp_send_key(
        &mut self,
        sessions: SessionsId,
        suite: SrtpSuite,
        key: &str,
    ) -> Result<(), EngineError>;

    /// Our ZRTP hello hash, for `a=zrtp-hash`.
    fn zrtp_hello_hash(&self, _sessions: SessionsId) -> Option<String> {
        None
    }

    /// Start ZRTP, with the hello hash of the remote if known.
    fn start_zrtp(
        &mut self,
        id: NativeStreamId,
        peer_hello_hash: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Mark the short authentication string as verified or not.
    fn set_auth_token_verified(&mut self, _sessions: SessionsId, _verified: bool) {}

    /// Fingerprint of our DTLS certificate.
    fn dtls_fingerprint(&mut self) -> Result<String, EngineError>;

    /// Tell the DTLS context of a stream the fingerprint of the remote.
    fn set_dtls_peer_fingerprint(&mut self, sessions: SessionsId, fingerprint: &str);

    /// Start the DTLS handshake.
    fn start_dtls(&mut self, sessions: SessionsId, role: DtlsRole);

    /// Whether media of the stream is currently encrypted.
    fn is_encrypted(&self, sessions: SessionsId) -> bool;

    /// Tell the stream whether it has an ICE check list.
    fn set_ice_check_list(&mut self, id: NativeStreamId, active: bool);

    /// Local addresses ICE host candidates are made of.
    fn local_addresses(&self) -> Result<Vec<IpAddr>, EngineError>;

    /// Rebind the sockets, after a network change.
    fn refresh_sockets(&mut self, _sessions: SessionsId) {}

    /// SSRC of outgoing RTP.
    fn local_ssrc(&self, sessions: SessionsId) -> u32;

    /// Create a bundle carried by `owner`.
    fn bundle_create(&mut self, owner: SessionsId, mid: &str) -> BundleId;

    /// Add sessions to a bundle.
    fn bundle_add(&mut self, bundle: BundleId, sessions: SessionsId, mid: &str);

    /// Remove sessions from a bundle.
    fn bundle_remove(&mut self, bundle: BundleId, sessions: SessionsId);

    /// Destroy a bundle.
    fn bundle_destroy(&mut self, bundle: BundleId);

    /// Connect a running stream to the conference mixer of its type.
    fn mixer_connect(&mut self, _id: NativeStreamId, _kind: StreamType, _recv_only: bool) {}

    /// Disconnect a stream from its conference mixer.
    fn mixer_disconnect(&mut self, _id: NativeStreamId) {}

    /// Play a file to the remote in place of the microphone.
    fn play_file(&mut self, _id: NativeStreamId, _path: &str) -> Result<(), EngineError> {
        Err(EngineError::NotSupported("play_file"))
    }

    /// Next event of a native stream.
    fn poll_event(&mut self, id: NativeStreamId) -> Option<EngineEvent>;

    /// Current quality rating, 0 to 5, if computed.
    fn quality_rating(&self, _id: NativeStreamId) -> Option<f32> {
        None
    }

    /// Average quality rating since start, if computed.
    fn average_quality_rating(&self, _id: NativeStreamId) -> Option<f32> {
        None
    }

    /// Current bandwidth figures.
    fn bandwidth_usage(&self, _id: NativeStreamId) -> BandwidthUsage {
        BandwidthUsage::default()
    }

    /// When the last RTP packet was received.
    fn last_rtp_received(&self, _id: NativeStreamId) -> Option<Instant> {
        None
    }

    /// Mute the speaker.
    fn set_speaker_muted(&mut self, _id: NativeStreamId, _muted: bool) {}

    /// Microphone gain in dB.
    fn set_mic_gain_db(&mut self, _id: NativeStreamId, _gain: f32) {}

    /// Speaker volume, 0 to 1.
    fn set_speaker_volume(&mut self, _id: NativeStreamId, _volume: f32) {}

    /// Toggle the echo canceller.
    fn set_echo_canceller(&mut self, _id: NativeStreamId, _enabled: bool) {}

    /// Ask the encoder of the remote for a key frame.
    fn send_vfu_request(&mut self, _id: NativeStreamId) {}

    /// Toggle the camera.
    fn set_camera_enabled(&mut self, _id: NativeStreamId, _enabled: bool) {}

    /// Send one character of real time text.
    fn send_text_char(&mut self, _id: NativeStreamId, _c: char) -> Result<(), EngineError> {
        Err(EngineError::NotSupported("send_text_char"))
    }
}
