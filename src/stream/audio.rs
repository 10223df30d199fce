use crate::config::CallParams;
use crate::engine::{EngineError, MediaEngine};
use crate::task::AudioRoute;

use super::{Stream, StreamKind, StreamState};

/// Audio specific state of a stream.
#[derive(Debug)]
pub struct AudioState {
    mic_muted: bool,
    speaker_muted: bool,
    mic_gain_db: f32,
    speaker_volume: f32,
    echo_canceller: bool,
    route: Option<AudioRoute>,
    pub(crate) playing_hold_file: bool,
}

impl AudioState {
    pub(crate) fn new(params: &CallParams) -> Self {
        AudioState {
            mic_muted: params.mic_muted(),
            speaker_muted: false,
            mic_gain_db: 0.0,
            speaker_volume: 1.0,
            echo_canceller: true,
            route: None,
            playing_hold_file: false,
        }
    }

    /// Whether the microphone is muted by the user.
    pub fn mic_muted(&self) -> bool {
        self.mic_muted
    }

    /// Whether playback is muted.
    pub fn speaker_muted(&self) -> bool {
        self.speaker_muted
    }

    /// Microphone gain in dB.
    pub fn mic_gain_db(&self) -> f32 {
        self.mic_gain_db
    }

    /// Playback volume, 0.0 to 1.0.
    pub fn speaker_volume(&self) -> f32 {
        self.speaker_volume
    }

    /// Whether echo cancellation is on.
    pub fn echo_canceller(&self) -> bool {
        self.echo_canceller
    }

    /// The current audio route, if one was reported.
    pub fn route(&self) -> Option<AudioRoute> {
        self.route
    }

    /// Whether the hold music is playing.
    pub fn playing_hold_file(&self) -> bool {
        self.playing_hold_file
    }
}

/// Controls of an audio stream.
///
/// Obtained with [`crate::StreamsGroup::audio_control`].
pub struct AudioControl<'a> {
    stream: &'a mut Stream,
    engine: &'a mut dyn MediaEngine,
}

impl<'a> AudioControl<'a> {
    pub(crate) fn new(stream: &'a mut Stream, engine: &'a mut dyn MediaEngine) -> Option<Self> {
        if !matches!(stream.kind, StreamKind::Audio(_)) {
            error!("{} has no audio controls", stream);
            return None;
        }
        Some(AudioControl { stream, engine })
    }

    fn state(&mut self) -> &mut AudioState {
        match &mut self.stream.kind {
            StreamKind::Audio(a) => a,
            // Checked in new().
            _ => unreachable!(),
        }
    }

    fn running(&self) -> bool {
        self.stream.state == StreamState::Running
    }

    /// The controlled stream.
    pub fn stream(&self) -> &Stream {
        self.stream
    }

    /// Mute the microphone.
    ///
    /// While early media keeps the stream muted, the native stream stays muted
    /// and the setting applies once early media ends.
    pub fn set_mic_muted(&mut self, muted: bool) {
        self.state().mic_muted = muted;
        if self.running() && !self.stream.muted {
            let id = self.stream.native;
            self.engine.set_muted(id, muted);
        }
    }

    /// Mute playback.
    pub fn set_speaker_muted(&mut self, muted: bool) {
        self.state().speaker_muted = muted;
        let id = self.stream.native;
        self.engine.set_speaker_muted(id, muted);
    }

    /// Set the microphone gain in dB.
    pub fn set_mic_gain_db(&mut self, gain: f32) {
        self.state().mic_gain_db = gain;
        let id = self.stream.native;
        self.engine.set_mic_gain_db(id, gain);
    }

    /// Set the playback volume, clamped to 0.0 to 1.0.
    pub fn set_speaker_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.state().speaker_volume = volume;
        let id = self.stream.native;
        self.engine.set_speaker_volume(id, volume);
    }

    /// Toggle echo cancellation.
    pub fn enable_echo_canceller(&mut self, enabled: bool) {
        self.state().echo_canceller = enabled;
        let id = self.stream.native;
        self.engine.set_echo_canceller(id, enabled);
    }

    /// Play a file to the remote in place of the microphone.
    pub fn play_file(&mut self, path: &str) -> Result<(), EngineError> {
        if !self.running() {
            return Err(EngineError::NotSupported("play_file on a stopped stream"));
        }
        let id = self.stream.native;
        self.engine.play_file(id, path)
    }

    pub(crate) fn play_hold_file(&mut self, path: &str) {
        match self.play_file(path) {
            Ok(()) => {
                info!("Playing hold music on {}", self.stream);
                self.state().playing_hold_file = true;
            }
            Err(e) => warn!("Cannot play hold music {}: {}", path, e),
        }
    }

    /// Adapt to a new audio route.
    ///
    /// The loudspeaker needs echo cancellation, headsets do not.
    pub(crate) fn route_changed(&mut self, route: AudioRoute) {
        let previous = self.state().route.replace(route);
        if previous == Some(route) {
            return;
        }
        info!("Audio route of {} changed to {:?}", self.stream, route);
        let echo_canceller = match route {
            AudioRoute::Speaker | AudioRoute::Earpiece => true,
            AudioRoute::Bluetooth | AudioRoute::Headset => false,
        };
        self.enable_echo_canceller(echo_canceller);
    }
}
