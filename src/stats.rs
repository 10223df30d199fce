//! Statistics exposed to the application for each stream.

use serde::{Deserialize, Serialize};

use crate::desc::StreamType;

/// ICE state of a stream, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceState {
    /// ICE is not used for the stream.
    #[default]
    NotActivated,
    /// Checks failed.
    Failed,
    /// Gathering or checking.
    InProgress,
    /// Connected through host candidates.
    HostConnection,
    /// Connected through a reflexive candidate.
    ReflexiveConnection,
    /// Connected through a relay.
    RelayConnection,
}

/// Bandwidth figures of a stream in kbit/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandwidthUsage {
    /// RTP upload.
    pub upload: f32,
    /// RTP download.
    pub download: f32,
    /// RTCP upload.
    pub rtcp_upload: f32,
    /// RTCP download.
    pub rtcp_download: f32,
    /// Download estimated by the receiver side bandwidth estimator.
    pub estimated_download: f32,
}

/// Statistics of one stream of a call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    /// Index of the stream in the call.
    pub index: usize,
    /// Media kind.
    pub stream_type: StreamType,
    /// ICE state.
    pub ice_state: IceState,
    /// Latest bandwidth figures.
    pub bandwidth: BandwidthUsage,
    /// Whether media is encrypted.
    pub encrypted: bool,
    /// Number of times the stream was started.
    pub start_count: u32,
    /// Telephone events received so far, as DTMF characters.
    pub received_dtmfs: String,
}

impl StreamStats {
    pub(crate) fn new(index: usize, stream_type: StreamType) -> Self {
        StreamStats {
            index,
            stream_type,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_json() {
        let mut s = StreamStats::new(1, StreamType::Video);
        s.ice_state = IceState::RelayConnection;
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"ice_state\":\"relay_connection\""));
        assert!(json.contains("\"stream_type\":\"Video\""));
        let back: StreamStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
