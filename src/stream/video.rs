use crate::config::CallParams;
use crate::engine::MediaEngine;

use super::{Stream, StreamKind, StreamState};

/// Video specific state of a stream.
#[derive(Debug)]
pub struct VideoState {
    camera_enabled: bool,
    first_frame_decoded: bool,
    estimated_bandwidth: Option<u32>,
}

impl VideoState {
    pub(crate) fn new(params: &CallParams) -> Self {
        VideoState {
            camera_enabled: params.camera_enabled(),
            first_frame_decoded: false,
            estimated_bandwidth: None,
        }
    }

    /// Whether the camera sends.
    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Whether a frame from the remote was decoded.
    pub fn first_frame_decoded(&self) -> bool {
        self.first_frame_decoded
    }

    /// Available download bandwidth as estimated by the engine, in kbit/s.
    pub fn estimated_bandwidth(&self) -> Option<u32> {
        self.estimated_bandwidth
    }

    pub(crate) fn set_first_frame_decoded(&mut self) -> bool {
        !std::mem::replace(&mut self.first_frame_decoded, true)
    }

    pub(crate) fn set_estimated_bandwidth(&mut self, kbps: u32) {
        self.estimated_bandwidth = Some(kbps);
    }
}

/// Controls of a video stream.
///
/// Obtained with [`crate::StreamsGroup::video_control`].
pub struct VideoControl<'a> {
    stream: &'a mut Stream,
    engine: &'a mut dyn MediaEngine,
}

impl<'a> VideoControl<'a> {
    pub(crate) fn new(stream: &'a mut Stream, engine: &'a mut dyn MediaEngine) -> Option<Self> {
        if !matches!(stream.kind, StreamKind::Video(_)) {
            error!("{} has no video controls", stream);
            return None;
        }
        Some(VideoControl { stream, engine })
    }

    /// The controlled stream.
    pub fn stream(&self) -> &Stream {
        self.stream
    }

    /// Turn the camera on or off.
    pub fn enable_camera(&mut self, enabled: bool) {
        if let StreamKind::Video(v) = &mut self.stream.kind {
            v.camera_enabled = enabled;
        }
        if self.stream.state == StreamState::Running {
            self.engine.set_camera_enabled(self.stream.native, enabled);
        }
    }

    /// Ask the remote for a full frame.
    pub fn send_vfu_request(&mut self) {
        if self.stream.state == StreamState::Running {
            debug!("Sending VFU request on {}", self.stream);
            self.engine.send_vfu_request(self.stream.native);
        }
    }
}
