use std::fmt;

use bitflags::bitflags;

use super::{MediaDescription, StreamDescription};

bitflags! {
    /// Categories of attributes that differ between two rounds of a description.
    ///
    /// The stream render path decides "patch in place" versus "restart" from
    /// these categories alone.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescriptionChanges: u32 {
        /// Payload list, profile, media type, or a port that went to/from 0.
        const CODEC = 1 << 0;
        /// RTP/RTCP address or port.
        const NETWORK = 1 << 1;
        /// ICE credentials changed.
        const ICE_RESTART = 1 << 2;
        /// SRTP master key or DTLS role/fingerprint.
        const CRYPTO_KEYS = 1 << 3;
        /// Unicast/multicast switch or multicast role.
        const NETWORK_XXXCAST = 1 << 4;
        /// Number of streams.
        const STREAMS = 1 << 5;
        /// SRTP suite or tag.
        const CRYPTO_POLICY = 1 << 6;
        /// Set by callers that want a full restart regardless.
        const FORCE_STREAM_RECONSTRUCTION = 1 << 7;
        /// Bandwidth (`b=AS`).
        const BANDWIDTH = 1 << 8;
        /// Media direction.
        const DIRECTION = 1 << 9;
        /// Packet time.
        const PTIME = 1 << 10;
        /// Mixer-to-client audio level header extension id.
        const MIXER_TO_CLIENT_EXTENSION = 1 << 11;
        /// Frame marking header extension id.
        const FRAME_MARKING_EXTENSION = 1 << 12;
    }
}

const NAMES: &[(DescriptionChanges, &str)] = &[
    (DescriptionChanges::CODEC, "CODEC_CHANGED"),
    (DescriptionChanges::NETWORK, "NETWORK_CHANGED"),
    (DescriptionChanges::ICE_RESTART, "ICE_RESTART_DETECTED"),
    (DescriptionChanges::CRYPTO_KEYS, "CRYPTO_KEYS_CHANGED"),
    (DescriptionChanges::NETWORK_XXXCAST, "NETWORK_XXXCAST_CHANGED"),
    (DescriptionChanges::STREAMS, "STREAMS_CHANGED"),
    (DescriptionChanges::CRYPTO_POLICY, "CRYPTO_POLICY_CHANGED"),
    (
        DescriptionChanges::FORCE_STREAM_RECONSTRUCTION,
        "FORCE_STREAM_RECONSTRUCTION",
    ),
    (DescriptionChanges::BANDWIDTH, "BANDWIDTH_CHANGED"),
    (DescriptionChanges::DIRECTION, "DIRECTION_CHANGED"),
    (DescriptionChanges::PTIME, "PTIME_CHANGED"),
    (
        DescriptionChanges::MIXER_TO_CLIENT_EXTENSION,
        "MIXER_TO_CLIENT_EXTENSION_CHANGED",
    ),
    (
        DescriptionChanges::FRAME_MARKING_EXTENSION,
        "FRAME_MARKING_EXTENSION_CHANGED",
    ),
];

impl fmt::Display for DescriptionChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl StreamDescription {
    /// Categories in which `self` differs from `prev`.
    pub fn changes_from(&self, prev: &StreamDescription) -> DescriptionChanges {
        use DescriptionChanges as C;
        let mut c = C::empty();

        if self.proto != prev.proto || self.stream_type != prev.stream_type {
            c |= C::CODEC;
        }

        if self.crypto.len() != prev.crypto.len() {
            c |= C::CRYPTO_POLICY | C::CRYPTO_KEYS;
        } else {
            for (a, b) in self.crypto.iter().zip(prev.crypto.iter()) {
                if a.tag != b.tag || a.suite != b.suite {
                    c |= C::CRYPTO_POLICY;
                }
                if a.master_key != b.master_key {
                    c |= C::CRYPTO_KEYS;
                }
            }
        }

        if self.rtp_addr != prev.rtp_addr {
            c |= C::NETWORK;
        }
        if self.is_multicast() != prev.is_multicast() || self.multicast_role != prev.multicast_role
        {
            c |= C::NETWORK_XXXCAST;
        }
        if self.rtp_port != prev.rtp_port {
            if self.rtp_port == 0 || prev.rtp_port == 0 {
                c |= C::CODEC;
            } else {
                c |= C::NETWORK;
            }
        }
        if self.rtcp_addr != prev.rtcp_addr || self.rtcp_port != prev.rtcp_port {
            c |= C::NETWORK;
        }

        if self.payloads != prev.payloads {
            c |= C::CODEC;
        }
        if self.bandwidth != prev.bandwidth {
            c |= C::BANDWIDTH;
        }
        if self.ptime != prev.ptime {
            c |= C::PTIME;
        }
        if self.dir != prev.dir {
            c |= C::DIRECTION;
        }

        // A restart is only signalled by a change to a new, non-empty credential.
        if (!self.ice_ufrag.is_empty() && self.ice_ufrag != prev.ice_ufrag)
            || (!self.ice_pwd.is_empty() && self.ice_pwd != prev.ice_pwd)
        {
            c |= C::ICE_RESTART;
        }

        if self.dtls_role != prev.dtls_role || self.dtls_fingerprint != prev.dtls_fingerprint {
            c |= C::CRYPTO_KEYS;
        }

        if self.mixer_to_client_extension_id != prev.mixer_to_client_extension_id {
            c |= C::MIXER_TO_CLIENT_EXTENSION;
        }
        if self.frame_marking_extension_id != prev.frame_marking_extension_id {
            c |= C::FRAME_MARKING_EXTENSION;
        }

        c
    }
}

impl MediaDescription {
    /// Session level categories in which `self` differs from `prev`.
    pub fn global_changes_from(&self, prev: &MediaDescription) -> DescriptionChanges {
        use DescriptionChanges as C;
        let mut c = C::empty();

        if self.addr != prev.addr {
            c |= C::NETWORK;
        }
        if super::is_multicast(&self.addr) != super::is_multicast(&prev.addr) {
            c |= C::NETWORK_XXXCAST;
        }
        if self.streams.len() != prev.streams.len() {
            c |= C::STREAMS;
        }
        if self.bandwidth != prev.bandwidth {
            c |= C::BANDWIDTH;
        }
        if (!self.ice_ufrag.is_empty() && self.ice_ufrag != prev.ice_ufrag)
            || (!self.ice_pwd.is_empty() && self.ice_pwd != prev.ice_pwd)
        {
            c |= C::ICE_RESTART;
        }

        c
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::desc::{Direction, PayloadType, Proto, SrtpCrypto, SrtpSuite, StreamType};

    fn audio() -> StreamDescription {
        let mut s = StreamDescription::new(StreamType::Audio, Proto::RtpSavp);
        s.rtp_addr = "192.168.0.2".into();
        s.rtp_port = 7078;
        s.payloads.push(PayloadType::new(0, "PCMU", 8000));
        s.crypto.push(SrtpCrypto {
            tag: 1,
            suite: SrtpSuite::AES_CM_128_HMAC_SHA1_80,
            master_key: "a".repeat(40),
        });
        s
    }

    #[test]
    fn identical_is_empty() {
        assert_eq!(audio().changes_from(&audio()), DescriptionChanges::empty());
        assert_eq!(DescriptionChanges::empty().to_string(), "NONE");
    }

    #[test]
    fn port_change_network_or_codec() {
        let prev = audio();
        let mut s = audio();
        s.rtp_port = 9000;
        assert_eq!(s.changes_from(&prev), DescriptionChanges::NETWORK);

        s.rtp_port = 0;
        assert_eq!(s.changes_from(&prev), DescriptionChanges::CODEC);
    }

    #[test]
    fn master_key_only() {
        let prev = audio();
        let mut s = audio();
        s.crypto[0].master_key = "b".repeat(40);
        assert_eq!(s.changes_from(&prev), DescriptionChanges::CRYPTO_KEYS);

        s.crypto[0].suite = SrtpSuite::AES_CM_128_HMAC_SHA1_32;
        assert_eq!(
            s.changes_from(&prev),
            DescriptionChanges::CRYPTO_KEYS | DescriptionChanges::CRYPTO_POLICY
        );
    }

    #[test]
    fn direction_and_multicast() {
        let prev = audio();
        let mut s = audio();
        s.dir = Direction::SendOnly;
        s.rtp_addr = "224.0.0.9".into();
        let c = s.changes_from(&prev);
        assert!(c.contains(DescriptionChanges::DIRECTION));
        assert!(c.contains(DescriptionChanges::NETWORK_XXXCAST));
        assert!(c.contains(DescriptionChanges::NETWORK));
    }

    #[test]
    fn ice_creds_cleared_is_not_restart() {
        let mut prev = audio();
        prev.ice_ufrag = "abcd".into();
        prev.ice_pwd = "p".repeat(22);
        let s = audio();
        assert!(!s.changes_from(&prev).contains(DescriptionChanges::ICE_RESTART));
        assert!(prev.changes_from(&s).contains(DescriptionChanges::ICE_RESTART));
    }

    #[test]
    fn global_stream_count() {
        let mut prev = MediaDescription::new("10.0.0.1");
        prev.streams.push(audio());
        let mut md = prev.clone();
        md.streams.push(audio());
        md.bandwidth = 380;
        let c = md.global_changes_from(&prev);
        assert_eq!(c, DescriptionChanges::STREAMS | DescriptionChanges::BANDWIDTH);
        assert_eq!(c.to_string(), "STREAMS_CHANGED BANDWIDTH_CHANGED");
    }
}
