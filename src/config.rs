use std::rc::Rc;
use std::time::Duration;

use crate::desc::{CryptoSuitePolicy, DefaultCryptoPolicy, SrtpSuite, StreamType};
use crate::ice::NatPolicy;
use crate::port::PortRegistry;

/// Core wide media configuration, shared by every call.
///
/// ```
/// use callstreams::MediaConfig;
/// use callstreams::ice::NatPolicy;
///
/// let config = MediaConfig::new()
///     .set_port_range(callstreams::StreamType::Audio, 7078, 7078)
///     .set_nat_policy(NatPolicy::new().set_ice_enabled(true))
///     .set_upload_bandwidth(512);
///
/// assert_eq!(config.port_range(callstreams::StreamType::Audio), (7078, 7078));
/// assert!(config.nat_policy().ice_enabled());
/// ```
///
/// Configs implement [`Clone`]. Clones share the [`PortRegistry`], which is
/// how streams of different calls avoid each other's ports.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub(crate) audio_ports: (u16, u16),
    pub(crate) video_ports: (u16, u16),
    pub(crate) text_ports: (u16, u16),
    pub(crate) allow_late_ice: bool,
    pub(crate) ice_message_integrity_check: bool,
    pub(crate) dont_default_to_stun_candidates: bool,
    pub(crate) ice_credentials_per_stream: bool,
    pub(crate) ipv6_enabled: bool,
    pub(crate) rtcp_enabled: bool,
    pub(crate) symmetric_rtp: bool,
    pub(crate) avpf_rr_interval: Duration,
    pub(crate) upload_bandwidth: u32,
    pub(crate) download_bandwidth: u32,
    pub(crate) srtp_suites: Vec<SrtpSuite>,
    pub(crate) crypto_policy: Rc<dyn CryptoSuitePolicy>,
    pub(crate) nat_policy: NatPolicy,
    pub(crate) hold_music_file: Option<String>,
    pub(crate) no_rtp_timeout: Option<Duration>,
    pub(crate) audio_multicast_addr: String,
    pub(crate) video_multicast_addr: String,
    pub(crate) multicast_ttl: u8,
    pub(crate) public_ip: Option<String>,
    pub(crate) port_registry: PortRegistry,
}

impl MediaConfig {
    /// Creates a new default config.
    pub fn new() -> Self {
        MediaConfig::default()
    }

    /// Local port range for a stream type.
    ///
    /// `(0, 0)` lets the engine choose. `min == max` is a fixed port which is
    /// stepped by 2 when already taken.
    pub fn port_range(&self, kind: StreamType) -> (u16, u16) {
        match kind {
            StreamType::Audio => self.audio_ports,
            StreamType::Video => self.video_ports,
            StreamType::Text => self.text_ports,
            StreamType::Other => (0, 0),
        }
    }

    /// Set the local port range for a stream type.
    ///
    /// Defaults are 7078 for audio, 9078 for video and 11078 for text.
    pub fn set_port_range(mut self, kind: StreamType, min: u16, max: u16) -> Self {
        let range = (min, max);
        match kind {
            StreamType::Audio => self.audio_ports = range,
            StreamType::Video => self.video_ports = range,
            StreamType::Text => self.text_ports = range,
            StreamType::Other => {}
        }
        self
    }

    /// Whether ICE may be used again after a negotiation turned it off.
    pub fn allow_late_ice(&self) -> bool {
        self.allow_late_ice
    }

    /// Allow ICE again in later negotiations of a call where it was off.
    ///
    /// Defaults to `false`.
    pub fn set_allow_late_ice(mut self, v: bool) -> Self {
        self.allow_late_ice = v;
        self
    }

    /// Whether STUN message integrity is checked in connectivity checks.
    pub fn ice_message_integrity_check(&self) -> bool {
        self.ice_message_integrity_check
    }

    /// Toggle STUN message integrity checking. Defaults to `true`.
    pub fn set_ice_message_integrity_check(mut self, v: bool) -> Self {
        self.ice_message_integrity_check = v;
        self
    }

    /// Whether server reflexive candidates are skipped as default candidates.
    pub fn dont_default_to_stun_candidates(&self) -> bool {
        self.dont_default_to_stun_candidates
    }

    /// Prefer relay, then host, as default candidates. Defaults to `false`.
    pub fn set_dont_default_to_stun_candidates(mut self, v: bool) -> Self {
        self.dont_default_to_stun_candidates = v;
        self
    }

    /// Whether ICE credentials are written per m-line instead of per session.
    pub fn ice_credentials_per_stream(&self) -> bool {
        self.ice_credentials_per_stream
    }

    /// Write ICE credentials per m-line. Defaults to `false`.
    pub fn set_ice_credentials_per_stream(mut self, v: bool) -> Self {
        self.ice_credentials_per_stream = v;
        self
    }

    /// Whether IPv6 local addresses are used.
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6_enabled
    }

    /// Toggle IPv6. Defaults to `true`.
    pub fn set_ipv6_enabled(mut self, v: bool) -> Self {
        self.ipv6_enabled = v;
        self
    }

    /// Whether RTCP is sent.
    pub fn rtcp_enabled(&self) -> bool {
        self.rtcp_enabled
    }

    /// Toggle RTCP. Defaults to `true`.
    pub fn set_rtcp_enabled(mut self, v: bool) -> Self {
        self.rtcp_enabled = v;
        self
    }

    /// Whether symmetric RTP is used when ICE is not.
    pub fn symmetric_rtp(&self) -> bool {
        self.symmetric_rtp
    }

    /// Toggle symmetric RTP. Defaults to `true`.
    pub fn set_symmetric_rtp(mut self, v: bool) -> Self {
        self.symmetric_rtp = v;
        self
    }

    /// Interval of regular RTCP reports with AVPF.
    pub fn avpf_rr_interval(&self) -> Duration {
        self.avpf_rr_interval
    }

    /// Set the AVPF report interval. Defaults to 5 seconds.
    pub fn set_avpf_rr_interval(mut self, v: Duration) -> Self {
        self.avpf_rr_interval = v;
        self
    }

    /// Upload bandwidth in kbit/s, 0 is unlimited.
    pub fn upload_bandwidth(&self) -> u32 {
        self.upload_bandwidth
    }

    /// Set the upload bandwidth in kbit/s.
    pub fn set_upload_bandwidth(mut self, kbps: u32) -> Self {
        self.upload_bandwidth = kbps;
        self
    }

    /// Download bandwidth in kbit/s, 0 is unlimited.
    pub fn download_bandwidth(&self) -> u32 {
        self.download_bandwidth
    }

    /// Set the download bandwidth in kbit/s.
    pub fn set_download_bandwidth(mut self, kbps: u32) -> Self {
        self.download_bandwidth = kbps;
        self
    }

    /// Core SRTP suites, used when the call parameters have none.
    pub fn srtp_suites(&self) -> &[SrtpSuite] {
        &self.srtp_suites
    }

    /// Set the core SRTP suites.
    pub fn set_srtp_suites(mut self, suites: &[SrtpSuite]) -> Self {
        self.srtp_suites = suites.to_vec();
        self
    }

    /// Set the crypto suite selection policy.
    ///
    /// Defaults to [`DefaultCryptoPolicy`].
    pub fn set_crypto_policy(mut self, policy: Rc<dyn CryptoSuitePolicy>) -> Self {
        self.crypto_policy = policy;
        self
    }

    /// The NAT policy.
    pub fn nat_policy(&self) -> &NatPolicy {
        &self.nat_policy
    }

    /// Set the NAT policy.
    pub fn set_nat_policy(mut self, policy: NatPolicy) -> Self {
        self.nat_policy = policy;
        self
    }

    /// File played to the remote while the call is on hold.
    pub fn hold_music_file(&self) -> Option<&str> {
        self.hold_music_file.as_deref()
    }

    /// Set the hold music file.
    pub fn set_hold_music_file(mut self, path: Option<&str>) -> Self {
        self.hold_music_file = path.map(|s| s.to_string());
        self
    }

    /// How long without incoming RTP before the media is considered lost.
    pub fn no_rtp_timeout(&self) -> Option<Duration> {
        self.no_rtp_timeout
    }

    /// Set the no-RTP timeout. `None` disables the check.
    pub fn set_no_rtp_timeout(mut self, v: Option<Duration>) -> Self {
        self.no_rtp_timeout = v;
        self
    }

    /// Multicast group used for audio when the call enables multicast.
    pub fn audio_multicast_addr(&self) -> &str {
        &self.audio_multicast_addr
    }

    /// Set the audio multicast group. Defaults to `224.1.2.3`.
    pub fn set_audio_multicast_addr(mut self, addr: &str) -> Self {
        self.audio_multicast_addr = addr.to_string();
        self
    }

    /// Multicast group used for video when the call enables multicast.
    pub fn video_multicast_addr(&self) -> &str {
        &self.video_multicast_addr
    }

    /// Set the video multicast group. Defaults to `224.1.2.3`.
    pub fn set_video_multicast_addr(mut self, addr: &str) -> Self {
        self.video_multicast_addr = addr.to_string();
        self
    }

    /// TTL of multicast packets.
    pub fn multicast_ttl(&self) -> u8 {
        self.multicast_ttl
    }

    /// Set the multicast TTL. Defaults to 1.
    pub fn set_multicast_ttl(mut self, ttl: u8) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    /// Address written in local descriptions instead of the local one.
    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref()
    }

    /// Set the public IP.
    pub fn set_public_ip(mut self, ip: Option<&str>) -> Self {
        self.public_ip = ip.map(|s| s.to_string());
        self
    }

    /// The registry of local ports in use across calls.
    pub fn port_registry(&self) -> &PortRegistry {
        &self.port_registry
    }

    /// Share a port registry with another config.
    pub fn set_port_registry(mut self, registry: PortRegistry) -> Self {
        self.port_registry = registry;
        self
    }

    /// Multicast group for a stream type.
    pub(crate) fn multicast_addr(&self, kind: StreamType) -> Option<&str> {
        match kind {
            StreamType::Audio => Some(&self.audio_multicast_addr),
            StreamType::Video => Some(&self.video_multicast_addr),
            _ => None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio_ports: (7078, 7078),
            video_ports: (9078, 9078),
            text_ports: (11078, 11078),
            allow_late_ice: false,
            ice_message_integrity_check: true,
            dont_default_to_stun_candidates: false,
            ice_credentials_per_stream: false,
            ipv6_enabled: true,
            rtcp_enabled: true,
            symmetric_rtp: true,
            avpf_rr_interval: Duration::from_secs(5),
            upload_bandwidth: 0,
            download_bandwidth: 0,
            srtp_suites: vec![],
            crypto_policy: Rc::new(DefaultCryptoPolicy),
            nat_policy: NatPolicy::default(),
            hold_music_file: None,
            no_rtp_timeout: None,
            audio_multicast_addr: "224.1.2.3".into(),
            video_multicast_addr: "224.1.2.3".into(),
            multicast_ttl: 1,
            public_ip: None,
            port_registry: PortRegistry::new(),
        }
    }
}

/// Media encryption requested for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaEncryption {
    /// Plain RTP.
    #[default]
    None,
    /// SDES-SRTP.
    Srtp,
    /// ZRTP.
    Zrtp,
    /// DTLS-SRTP.
    Dtls,
}

/// Target state of the call session a render is done for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing yet.
    #[default]
    Idle,
    /// We sent early media.
    OutgoingEarlyMedia,
    /// We receive early media.
    IncomingEarlyMedia,
    /// Media flows.
    StreamsRunning,
    /// Going on hold.
    Pausing,
    /// We put the call on hold.
    Paused,
    /// The remote put us on hold.
    PausedByRemote,
    /// The call is updating.
    Updating,
}

impl SessionState {
    pub(crate) fn is_paused(&self) -> bool {
        matches!(self, SessionState::Pausing | SessionState::Paused)
    }
}

/// Per call parameters set by the signaling layer.
///
/// ```
/// use callstreams::{CallParams, MediaEncryption};
///
/// let params = CallParams::new()
///     .set_media_encryption(MediaEncryption::Srtp)
///     .set_encryption_mandatory(true);
///
/// assert!(params.encryption_mandatory());
/// ```
#[derive(Debug, Clone)]
pub struct CallParams {
    pub(crate) media_encryption: MediaEncryption,
    pub(crate) encryption_mandatory: bool,
    pub(crate) early_media_sending: bool,
    pub(crate) avpf: bool,
    pub(crate) audio_multicast: bool,
    pub(crate) video_multicast: bool,
    pub(crate) srtp_suites: Vec<SrtpSuite>,
    pub(crate) mic_muted: bool,
    pub(crate) camera_enabled: bool,
    pub(crate) in_conference: bool,
}

impl CallParams {
    /// Creates new default parameters.
    pub fn new() -> Self {
        CallParams::default()
    }

    /// Requested encryption.
    pub fn media_encryption(&self) -> MediaEncryption {
        self.media_encryption
    }

    /// Set the requested encryption.
    pub fn set_media_encryption(mut self, v: MediaEncryption) -> Self {
        self.media_encryption = v;
        self
    }

    /// Whether the call must end when encryption cannot be set up.
    pub fn encryption_mandatory(&self) -> bool {
        self.encryption_mandatory
    }

    /// Make encryption mandatory.
    pub fn set_encryption_mandatory(mut self, v: bool) -> Self {
        self.encryption_mandatory = v;
        self
    }

    /// Whether we send media during early media.
    pub fn early_media_sending(&self) -> bool {
        self.early_media_sending
    }

    /// Send media during early media.
    pub fn set_early_media_sending(mut self, v: bool) -> Self {
        self.early_media_sending = v;
        self
    }

    /// Whether AVPF is requested.
    pub fn avpf(&self) -> bool {
        self.avpf
    }

    /// Request AVPF.
    pub fn set_avpf(mut self, v: bool) -> Self {
        self.avpf = v;
        self
    }

    /// Whether multicast is used for a stream type.
    pub fn multicast(&self, kind: StreamType) -> bool {
        match kind {
            StreamType::Audio => self.audio_multicast,
            StreamType::Video => self.video_multicast,
            _ => false,
        }
    }

    /// Use multicast for a stream type.
    pub fn set_multicast(mut self, kind: StreamType, v: bool) -> Self {
        match kind {
            StreamType::Audio => self.audio_multicast = v,
            StreamType::Video => self.video_multicast = v,
            _ => {}
        }
        self
    }

    /// SRTP suites for this call. Empty means the core ones.
    pub fn srtp_suites(&self) -> &[SrtpSuite] {
        &self.srtp_suites
    }

    /// Set the SRTP suites for this call.
    pub fn set_srtp_suites(mut self, suites: &[SrtpSuite]) -> Self {
        self.srtp_suites = suites.to_vec();
        self
    }

    /// Whether the microphone starts muted.
    pub fn mic_muted(&self) -> bool {
        self.mic_muted
    }

    /// Start with the microphone muted.
    pub fn set_mic_muted(mut self, v: bool) -> Self {
        self.mic_muted = v;
        self
    }

    /// Whether the camera is on.
    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Toggle the camera.
    pub fn set_camera_enabled(mut self, v: bool) -> Self {
        self.camera_enabled = v;
        self
    }

    /// Whether the call is part of a conference.
    pub fn in_conference(&self) -> bool {
        self.in_conference
    }

    /// Mark the call as part of a conference.
    pub fn set_in_conference(mut self, v: bool) -> Self {
        self.in_conference = v;
        self
    }
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            media_encryption: MediaEncryption::None,
            encryption_mandatory: false,
            early_media_sending: false,
            avpf: false,
            audio_multicast: false,
            video_multicast: false,
            srtp_suites: vec![],
            mic_muted: false,
            camera_enabled: true,
            in_conference: false,
        }
    }
}
