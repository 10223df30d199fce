//! Media descriptions exchanged in one offer/answer round.
//!
//! These are the SDP-level values the signaling layer produces after parsing,
//! and that this crate reads (remote, result) or fills in (local). There is no
//! SDP text handling here. A [`MediaDescription`] describes a whole call, each
//! [`StreamDescription`] one `m=` line, addressed by its index.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::ice::Candidate;

mod dir;
pub use dir::Direction;

mod crypto;
pub(crate) use crypto::make_crypto_lines;
pub use crypto::{CryptoSuitePolicy, DefaultCryptoPolicy, SrtpCrypto, SrtpSuite};

mod diff;
pub use diff::DescriptionChanges;

/// Port value the signaling layer puts in a local description when the
/// actual port is to be filled in by [`crate::StreamsGroup::fill_local_media_description`].
///
/// This is the discard port, as used by trickle ICE placeholders.
pub const PORT_TO_BE_DETERMINED: u16 = 9;

/// Kind of media in a stream description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamType {
    /// Audio.
    #[default]
    Audio,
    /// Video.
    Video,
    /// Real time text (RFC 4103).
    Text,
    /// Anything else, for example an application m-line.
    Other,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Text => "text",
            StreamType::Other => "other",
        };
        write!(f, "{x}")
    }
}

/// RTP transport profile of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Proto {
    /// RTP/AVP
    #[default]
    RtpAvp,
    /// RTP/AVPF
    RtpAvpf,
    /// RTP/SAVP
    RtpSavp,
    /// RTP/SAVPF
    RtpSavpf,
    /// UDP/TLS/RTP/SAVP
    UdpTlsRtpSavp,
    /// UDP/TLS/RTP/SAVPF
    UdpTlsRtpSavpf,
    /// Any non RTP profile.
    Other,
}

impl Proto {
    /// Whether the profile has RTCP feedback (RFC 4585).
    pub fn is_avpf(&self) -> bool {
        matches!(self, Proto::RtpAvpf | Proto::RtpSavpf | Proto::UdpTlsRtpSavpf)
    }

    /// Whether the profile keys SRTP using SDES crypto lines.
    pub fn is_srtp(&self) -> bool {
        matches!(self, Proto::RtpSavp | Proto::RtpSavpf)
    }

    /// Whether the profile keys SRTP using DTLS.
    pub fn is_dtls(&self) -> bool {
        matches!(self, Proto::UdpTlsRtpSavp | Proto::UdpTlsRtpSavpf)
    }
}

/// One entry in the payload type list of an m-line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadType {
    /// RTP payload type number.
    pub number: u8,
    /// Encoding name, e.g. `opus`.
    pub mime: String,
    /// Clock rate in Hz.
    pub clock_rate: u32,
    /// Audio channels.
    pub channels: u8,
    /// fmtp we want to receive.
    pub recv_fmtp: Option<String>,
    /// fmtp the remote wants to receive.
    pub send_fmtp: Option<String>,
    /// Nominal codec bitrate in bit/s. 0 if unknown.
    pub normal_bitrate: u32,
    /// Variable bitrate codec.
    pub vbr: bool,
}

impl PayloadType {
    /// New payload type with the given number, encoding name and clock rate.
    pub fn new(number: u8, mime: &str, clock_rate: u32) -> Self {
        PayloadType {
            number,
            mime: mime.to_string(),
            clock_rate,
            channels: 1,
            recv_fmtp: None,
            send_fmtp: None,
            normal_bitrate: 0,
            vbr: false,
        }
    }

    /// Whether this is RFC 4733 telephone-event, which never carries media.
    pub fn is_telephone_event(&self) -> bool {
        self.mime.eq_ignore_ascii_case("telephone-event")
    }

    /// Whether two payload types are the same codec at the same number.
    pub fn same_codec(&self, other: &PayloadType) -> bool {
        self.number == other.number
            && self.clock_rate == other.clock_rate
            && self.mime.eq_ignore_ascii_case(&other.mime)
    }

    /// The `ptime` parameter from the send fmtp, if any.
    pub fn ptime_fmtp(&self) -> Option<u32> {
        fmtp_value(self.send_fmtp.as_deref()?, "ptime")?.parse().ok()
    }
}

fn fmtp_value<'a>(fmtp: &'a str, key: &str) -> Option<&'a str> {
    fmtp.split(';').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// DTLS setup role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DtlsRole {
    /// Not a DTLS stream.
    #[default]
    Invalid,
    /// DTLS stream, role decided by the answer.
    Unset,
    /// We are the DTLS client.
    Client,
    /// We are the DTLS server.
    Server,
}

/// Role of a stream using multicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MulticastRole {
    /// Unicast stream.
    #[default]
    Inactive,
    /// We send to the multicast group.
    Sender,
    /// We receive from the multicast group.
    Receiver,
}

/// RTCP feedback messages enabled for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RtcpFeedback {
    /// Generic NACK.
    pub generic_nack: bool,
    /// TMMBR/TMMBN.
    pub tmmbr: bool,
}

/// One m-line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamDescription {
    /// Media kind.
    pub stream_type: StreamType,
    /// Transport profile.
    pub proto: Proto,
    /// Media direction.
    pub dir: Direction,
    /// Connection address for RTP. Empty means use the session address.
    pub rtp_addr: String,
    /// RTP port. 0 means the stream is rejected/disabled.
    pub rtp_port: u16,
    /// Connection address for RTCP. Empty means use the RTP address.
    pub rtcp_addr: String,
    /// RTCP port. 0 means RTP port + 1.
    pub rtcp_port: u16,
    /// Payload types in preference order.
    pub payloads: Vec<PayloadType>,
    /// Bandwidth in kbit/s (`b=AS`). 0 means unspecified.
    pub bandwidth: u32,
    /// Packet time in ms. 0 means unspecified.
    pub ptime: u32,
    /// Max packet time in ms. 0 means unspecified.
    pub max_ptime: u32,
    /// SDES crypto lines.
    pub crypto: Vec<SrtpCrypto>,
    /// Stream level ICE ufrag. Empty means use the session level.
    pub ice_ufrag: String,
    /// Stream level ICE password. Empty means use the session level.
    pub ice_pwd: String,
    /// `a=ice-mismatch`.
    pub ice_mismatch: bool,
    /// ICE candidates.
    pub ice_candidates: Vec<Candidate>,
    /// `a=remote-candidates`, by component (RTP first).
    pub ice_remote_candidates: Vec<SocketAddr>,
    /// Bundle media id.
    pub mid: String,
    /// `a=bundle-only`.
    pub bundle_only: bool,
    /// RTP and RTCP on the same port.
    pub rtcp_mux: bool,
    /// RTCP feedback.
    pub rtcp_fb: RtcpFeedback,
    /// RTCP extended reports.
    pub rtcp_xr: bool,
    /// Multicast role.
    pub multicast_role: MulticastRole,
    /// Multicast TTL.
    pub ttl: u8,
    /// ZRTP hello hash (`a=zrtp-hash`).
    pub zrtp_hash: Option<String>,
    /// DTLS role.
    pub dtls_role: DtlsRole,
    /// DTLS certificate fingerprint.
    pub dtls_fingerprint: String,
    /// Local RTP SSRC.
    pub ssrc: u32,
    /// Header extension id for mixer-to-client audio levels. 0 is absent.
    pub mixer_to_client_extension_id: u8,
    /// Header extension id for frame marking. 0 is absent.
    pub frame_marking_extension_id: u8,
}

static EMPTY_STREAM: Lazy<StreamDescription> = Lazy::new(StreamDescription::default);

impl StreamDescription {
    /// New stream description of the given kind and profile, with no port.
    pub fn new(stream_type: StreamType, proto: Proto) -> Self {
        StreamDescription {
            stream_type,
            proto,
            ..Default::default()
        }
    }

    /// The sentinel returned for stream indexes outside a description.
    pub fn empty() -> &'static StreamDescription {
        &EMPTY_STREAM
    }

    /// Whether this is the sentinel (or equal to it).
    pub fn is_empty(&self) -> bool {
        *self == *EMPTY_STREAM
    }

    /// Whether the stream is part of the negotiated session.
    ///
    /// A bundle-only stream has port 0 but is carried by its transport owner.
    pub fn enabled(&self) -> bool {
        self.rtp_port > 0 || self.bundle_only
    }

    /// Reject the stream.
    pub fn disable(&mut self) {
        self.rtp_port = 0;
        self.mid.clear();
        self.bundle_only = false;
    }

    /// Whether the stream uses RTCP feedback.
    pub fn has_avpf(&self) -> bool {
        self.proto.is_avpf()
    }

    /// Whether the stream uses SDES-SRTP.
    pub fn has_srtp(&self) -> bool {
        self.proto.is_srtp()
    }

    /// Whether the stream uses DTLS-SRTP.
    pub fn has_dtls(&self) -> bool {
        self.proto.is_dtls()
    }

    /// Whether the description carries a ZRTP hello hash.
    pub fn has_zrtp(&self) -> bool {
        self.zrtp_hash.is_some()
    }

    /// Whether the RTP address is a multicast group.
    pub fn is_multicast(&self) -> bool {
        is_multicast(&self.rtp_addr)
    }

    /// The RTP address, falling back on the session address.
    pub fn rtp_addr_or<'a>(&'a self, md: Option<&'a MediaDescription>) -> &'a str {
        if !self.rtp_addr.is_empty() {
            return &self.rtp_addr;
        }
        md.map(|m| m.addr.as_str()).unwrap_or("")
    }

    /// The RTCP address, falling back on the RTP address and then the session address.
    pub fn rtcp_addr_or<'a>(&'a self, md: Option<&'a MediaDescription>) -> &'a str {
        if !self.rtcp_addr.is_empty() {
            return &self.rtcp_addr;
        }
        self.rtp_addr_or(md)
    }

    /// The RTCP port, defaulting to RTP port + 1.
    pub fn rtcp_port_or_default(&self) -> u16 {
        if self.rtcp_port != 0 {
            self.rtcp_port
        } else if self.rtcp_mux {
            self.rtp_port
        } else {
            self.rtp_port.saturating_add(1)
        }
    }

    /// Crypto line with a given tag.
    pub fn crypto_by_tag(&self, tag: u32) -> Option<&SrtpCrypto> {
        self.crypto.iter().find(|c| c.tag == tag)
    }

    /// ICE credentials at this level, if both are set.
    pub(crate) fn ice_creds(&self) -> Option<(&str, &str)> {
        (!self.ice_ufrag.is_empty() && !self.ice_pwd.is_empty())
            .then(|| (self.ice_ufrag.as_str(), self.ice_pwd.as_str()))
    }
}

/// A `a=group:BUNDLE` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bundle {
    /// Media ids in the group. The first one is the transport owner.
    pub mids: Vec<String>,
}

impl Bundle {
    /// Bundle with the given mids, first is the transport owner.
    pub fn new<S: Into<String>>(mids: impl IntoIterator<Item = S>) -> Self {
        Bundle {
            mids: mids.into_iter().map(Into::into).collect(),
        }
    }

    /// The mid of the transport owner.
    pub fn owner_mid(&self) -> Option<&str> {
        self.mids.first().map(|s| s.as_str())
    }

    /// Whether the group contains `mid`.
    pub fn contains(&self, mid: &str) -> bool {
        self.mids.iter().any(|m| m == mid)
    }
}

/// One whole session description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaDescription {
    /// Session level connection address.
    pub addr: String,
    /// Session level bandwidth in kbit/s. 0 means unspecified.
    pub bandwidth: u32,
    /// The m-lines, by index.
    pub streams: Vec<StreamDescription>,
    /// Bundle groups.
    pub bundles: Vec<Bundle>,
    /// Session level ICE ufrag.
    pub ice_ufrag: String,
    /// Session level ICE password.
    pub ice_pwd: String,
    /// `a=ice-lite`.
    pub ice_lite: bool,
}

impl MediaDescription {
    /// New description with a session address.
    pub fn new(addr: &str) -> Self {
        MediaDescription {
            addr: addr.to_string(),
            ..Default::default()
        }
    }

    /// Stream at `index`, or [`StreamDescription::empty()`] if there is none.
    pub fn stream(&self, index: usize) -> &StreamDescription {
        self.streams.get(index).unwrap_or_else(|| StreamDescription::empty())
    }

    /// Index of the stream with the given mid.
    pub fn stream_index_by_mid(&self, mid: &str) -> Option<usize> {
        if mid.is_empty() {
            return None;
        }
        self.streams.iter().position(|s| s.mid == mid)
    }

    /// The bundle group the given mid belongs to.
    pub fn bundle_of(&self, mid: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.contains(mid))
    }

    /// Index of the stream whose transport carries stream `index`.
    ///
    /// `None` when the stream has no mid or is not in a bundle group.
    pub fn transport_owner_index(&self, index: usize) -> Option<usize> {
        let mid = &self.streams.get(index)?.mid;
        if mid.is_empty() {
            return None;
        }
        let owner = self.bundle_of(mid)?.owner_mid()?;
        self.stream_index_by_mid(owner)
    }

    /// Number of enabled streams.
    pub fn active_streams_count(&self) -> usize {
        self.streams.iter().filter(|s| s.enabled()).count()
    }

    /// Session level ICE credentials, if both are set.
    pub(crate) fn ice_creds(&self) -> Option<(&str, &str)> {
        (!self.ice_ufrag.is_empty() && !self.ice_pwd.is_empty())
            .then(|| (self.ice_ufrag.as_str(), self.ice_pwd.as_str()))
    }

    /// Whether the session address is the "to be negotiated" wildcard.
    pub(crate) fn has_wildcard_addr(&self) -> bool {
        is_wildcard(&self.addr)
    }
}

pub(crate) fn is_multicast(addr: &str) -> bool {
    addr.parse::<IpAddr>().map(|ip| ip.is_multicast()).unwrap_or(false)
}

pub(crate) fn is_wildcard(addr: &str) -> bool {
    matches!(addr, "0.0.0.0" | "::0" | "::")
}

#[cfg(test)]
mod test {
    use super::*;

    fn md_with_mids(mids: &[&str]) -> MediaDescription {
        let mut md = MediaDescription::new("10.0.0.1");
        for mid in mids {
            let mut s = StreamDescription::new(StreamType::Audio, Proto::RtpAvp);
            s.mid = mid.to_string();
            s.rtp_port = 7078;
            md.streams.push(s);
        }
        md
    }

    #[test]
    fn out_of_range_stream_is_sentinel() {
        let md = md_with_mids(&["a"]);
        assert!(!md.stream(0).is_empty());
        assert!(md.stream(5).is_empty());
        assert!(!md.stream(5).enabled());
    }

    #[test]
    fn transport_owner_by_bundle_group() {
        let mut md = md_with_mids(&["as", "vs", "solo"]);
        md.bundles.push(Bundle::new(["as", "vs"]));

        assert_eq!(md.transport_owner_index(0), Some(0));
        assert_eq!(md.transport_owner_index(1), Some(0));
        assert_eq!(md.transport_owner_index(2), None);
        assert_eq!(md.transport_owner_index(7), None);
    }

    #[test]
    fn bundle_only_is_enabled() {
        let mut s = StreamDescription::new(StreamType::Video, Proto::RtpAvp);
        assert!(!s.enabled());
        s.bundle_only = true;
        s.mid = "vs".into();
        assert!(s.enabled());
        s.disable();
        assert!(!s.enabled());
        assert!(s.mid.is_empty());
    }

    #[test]
    fn ptime_from_fmtp() {
        let mut pt = PayloadType::new(0, "PCMU", 8000);
        assert_eq!(pt.ptime_fmtp(), None);
        pt.send_fmtp = Some("maxptime=40; ptime=20".into());
        assert_eq!(pt.ptime_fmtp(), Some(20));
    }

    #[test]
    fn multicast_addr() {
        assert!(is_multicast("224.1.2.3"));
        assert!(!is_multicast("192.168.0.1"));
        assert!(!is_multicast("example.com"));
    }
}
