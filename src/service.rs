//! Helpers shared by the streams of one group.

use std::fmt;

use crate::desc::StreamType;
use crate::profile::remaining_bandwidth_for_video;

/// The kinds of shared service a group can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedServiceKind {
    /// Joint rate control of audio and video in a conference.
    BandwidthController,
}

impl SharedServiceKind {
    const ALL: [SharedServiceKind; 1] = [SharedServiceKind::BandwidthController];
}

impl fmt::Display for SharedServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedServiceKind::BandwidthController => write!(f, "BandwidthController"),
        }
    }
}

/// Audio and video streams of a call under joint rate control.
///
/// Audio gets what its codec needs, video the rest.
#[derive(Debug, Default)]
pub struct BandwidthController {
    audio: Option<usize>,
    video: Vec<usize>,
}

impl BandwidthController {
    /// Put a stream under control.
    pub fn add_stream(&mut self, index: usize, kind: StreamType) {
        match kind {
            StreamType::Audio => self.audio = Some(index),
            StreamType::Video => {
                if !self.video.contains(&index) {
                    self.video.push(index);
                }
            }
            _ => {}
        }
    }

    /// Release a stream from control.
    pub fn remove_stream(&mut self, index: usize) {
        if self.audio == Some(index) {
            self.audio = None;
        }
        self.video.retain(|i| *i != index);
    }

    /// The controlled audio stream.
    pub fn audio_stream(&self) -> Option<usize> {
        self.audio
    }

    /// The controlled video streams.
    pub fn video_streams(&self) -> &[usize] {
        &self.video
    }

    /// Budget of each video stream, given the total upload and what audio uses.
    pub fn video_budget(&self, upload: u32, audio: u32) -> u32 {
        let audio = if self.audio.is_some() { audio } else { 0 };
        let total = remaining_bandwidth_for_video(upload, audio);
        if self.video.is_empty() {
            return total;
        }
        total / self.video.len() as u32
    }
}

/// Registry of shared services, one slot per [`SharedServiceKind`].
///
/// Services are created on first use and destroyed when the group finishes.
#[derive(Debug, Default)]
pub struct SharedServices {
    bandwidth_controller: Option<BandwidthController>,
}

impl SharedServices {
    pub(crate) fn new() -> Self {
        SharedServices::default()
    }

    /// Whether a service is installed.
    pub fn is_installed(&self, kind: SharedServiceKind) -> bool {
        match kind {
            SharedServiceKind::BandwidthController => self.bandwidth_controller.is_some(),
        }
    }

    /// The bandwidth controller, installed on first use.
    pub fn bandwidth_controller(&mut self) -> &mut BandwidthController {
        self.bandwidth_controller.get_or_insert_with(|| {
            debug!("Shared service {} initialized", SharedServiceKind::BandwidthController);
            BandwidthController::default()
        })
    }

    /// The bandwidth controller, if installed.
    pub fn get_bandwidth_controller(&self) -> Option<&BandwidthController> {
        self.bandwidth_controller.as_ref()
    }

    /// Destroy every installed service.
    pub(crate) fn destroy_all(&mut self) {
        for kind in SharedServiceKind::ALL {
            if !self.is_installed(kind) {
                continue;
            }
            match kind {
                SharedServiceKind::BandwidthController => self.bandwidth_controller = None,
            }
            debug!("Shared service {} destroyed", kind);
        }
    }
}
