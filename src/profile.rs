//! RTP profiles and bandwidth arithmetic.
//!
//! All bandwidths are in kbit/s and 0 means unlimited.

use crate::desc::{MediaDescription, PayloadType, StreamDescription};

/// Payload table handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpProfile {
    /// Negotiated payload types.
    pub payloads: Vec<PayloadType>,
    /// Payload type used to send.
    pub send_payload_type: u8,
    /// Packetization time in ms, 0 for the codec default.
    pub ptime: u32,
    /// Max packetization time in ms, 0 for none.
    pub max_ptime: u32,
    /// Bandwidth the stream may use.
    pub bandwidth: u32,
}

impl RtpProfile {
    /// Build the profile of a negotiated stream.
    ///
    /// The first payload type that is not telephone-event is the one used to
    /// send. `None` when there is no such payload type.
    pub(crate) fn build(desc: &StreamDescription, bandwidth: u32) -> Option<Self> {
        let send = desc.payloads.iter().find(|p| !p.is_telephone_event())?;
        Some(RtpProfile {
            payloads: desc.payloads.clone(),
            send_payload_type: send.number,
            ptime: desc.ptime,
            max_ptime: desc.max_ptime,
            bandwidth,
        })
    }

    /// The payload type used to send.
    pub fn send_payload(&self) -> Option<&PayloadType> {
        self.payloads
            .iter()
            .find(|p| p.number == self.send_payload_type)
    }
}

/// Smallest of two bandwidths where 0 is unlimited.
pub(crate) fn min_bandwidth(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

/// Audio bandwidth to leave room for video in a given upload bandwidth.
pub(crate) fn ideal_audio_bandwidth(upload: u32) -> u32 {
    if upload > 512 {
        100
    } else if upload > 256 {
        64
    } else if upload > 128 {
        40
    } else if upload > 0 {
        24
    } else {
        0
    }
}

/// Bandwidth of an audio stream for the given remote description.
///
/// With video, the audio gets the ideal share of the upload. Without it,
/// as much as both sides allow.
pub(crate) fn audio_bandwidth(
    md: &MediaDescription,
    desc: &StreamDescription,
    upload: u32,
    has_video: bool,
) -> u32 {
    let remote = if desc.bandwidth > 0 {
        desc.bandwidth
    } else {
        md.bandwidth
    };
    let upload = if has_video {
        ideal_audio_bandwidth(upload)
    } else {
        upload
    };
    min_bandwidth(upload, remote)
}

/// Network bandwidth of an audio codec, with IP/UDP/RTP overhead at 50 packets/s.
pub(crate) fn audio_payload_bandwidth(pt: &PayloadType) -> u32 {
    const PACKETS_PER_SEC: f64 = 50.0;
    // IPv4 + UDP + RTP headers
    const OVERHEAD: f64 = 8.0 + 12.0 + 20.0;

    let bitrate = pt.normal_bitrate as f64;
    let bytes_per_packet = bitrate / (PACKETS_PER_SEC * 8.0) + OVERHEAD;
    let bps = bytes_per_packet * 8.0 * PACKETS_PER_SEC;
    (bps / 1000.0).ceil() as u32
}

/// Upload bandwidth left for video once audio took its share.
pub(crate) fn remaining_bandwidth_for_video(total: u32, audio: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    // Never go below a minimal video bitrate.
    total.saturating_sub(audio).max(24)
}

/// Bandwidth of a video stream.
///
/// The remote limit is the stream bandwidth, else the session bandwidth
/// minus what audio uses.
pub(crate) fn video_bandwidth(
    md: &MediaDescription,
    desc: &StreamDescription,
    upload: u32,
    audio: u32,
) -> u32 {
    let remote = if desc.bandwidth > 0 {
        desc.bandwidth
    } else if md.bandwidth > 0 {
        md.bandwidth.saturating_sub(audio).max(1)
    } else {
        0
    };
    min_bandwidth(remaining_bandwidth_for_video(upload, audio), remote)
}
