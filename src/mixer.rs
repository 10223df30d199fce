//! Conference mixing bookkeeping.
//!
//! One [`MixerSession`] per conference, shared by the groups of every call in
//! it. The mixing graph is in the engine; here we only track who is connected.

use std::cell::RefCell;
use std::rc::Rc;

use crate::desc::StreamType;

/// Identifies a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

/// A stream connected to a mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixerEndpoint {
    /// The call the stream belongs to.
    pub call: CallId,
    /// Index of the stream in its call.
    pub index: usize,
    /// The participant only receives the mix.
    pub recv_only: bool,
}

/// The mixer of one media type.
#[derive(Debug)]
pub struct StreamMixer {
    kind: StreamType,
    endpoints: Vec<MixerEndpoint>,
}

impl StreamMixer {
    fn new(kind: StreamType) -> Self {
        StreamMixer {
            kind,
            endpoints: vec![],
        }
    }

    /// Media type mixed.
    pub fn kind(&self) -> StreamType {
        self.kind
    }

    /// Connected endpoints, in connection order.
    pub fn endpoints(&self) -> &[MixerEndpoint] {
        &self.endpoints
    }

    /// Whether a stream is connected.
    pub fn is_connected(&self, call: CallId, index: usize) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.call == call && e.index == index)
    }

    pub(crate) fn connect(&mut self, ep: MixerEndpoint) {
        if self.is_connected(ep.call, ep.index) {
            return;
        }
        debug!("{} mixer: connect {:?}", self.kind, ep);
        self.endpoints.push(ep);
    }

    pub(crate) fn disconnect(&mut self, call: CallId, index: usize) -> bool {
        let before = self.endpoints.len();
        self.endpoints
            .retain(|e| !(e.call == call && e.index == index));
        let removed = self.endpoints.len() != before;
        if removed {
            debug!("{} mixer: disconnect call {:?} stream #{}", self.kind, call, index);
        }
        removed
    }
}

/// A conference's mixers.
///
/// ```
/// use callstreams::mixer::{MixerSession, CallId};
/// use callstreams::StreamType;
///
/// let session = MixerSession::new_shared();
/// session.borrow_mut().set_focus(Some(CallId(1)));
/// assert!(session.borrow().mixer(StreamType::Audio).is_some());
/// assert!(session.borrow().mixer(StreamType::Text).is_none());
/// ```
#[derive(Debug)]
pub struct MixerSession {
    audio: StreamMixer,
    video: StreamMixer,
    focus: Option<CallId>,
    local_participant: bool,
}

impl MixerSession {
    /// New session with an audio and a video mixer.
    pub fn new() -> Self {
        MixerSession {
            audio: StreamMixer::new(StreamType::Audio),
            video: StreamMixer::new(StreamType::Video),
            focus: None,
            local_participant: true,
        }
    }

    /// New session ready to share between groups.
    pub fn new_shared() -> Rc<RefCell<MixerSession>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Mixer of a media type.
    pub fn mixer(&self, kind: StreamType) -> Option<&StreamMixer> {
        match kind {
            StreamType::Audio => Some(&self.audio),
            StreamType::Video => Some(&self.video),
            _ => None,
        }
    }

    pub(crate) fn mixer_mut(&mut self, kind: StreamType) -> Option<&mut StreamMixer> {
        match kind {
            StreamType::Audio => Some(&mut self.audio),
            StreamType::Video => Some(&mut self.video),
            _ => None,
        }
    }

    /// The call towards the conference focus, for a client side conference.
    pub fn focus(&self) -> Option<CallId> {
        self.focus
    }

    /// Set the call towards the focus.
    pub fn set_focus(&mut self, call: Option<CallId>) {
        self.focus = call;
    }

    /// Whether the local user takes part in the mix.
    pub fn local_participant_enabled(&self) -> bool {
        self.local_participant
    }

    /// Toggle the local user's participation.
    pub fn enable_local_participant(&mut self, enabled: bool) {
        self.local_participant = enabled;
    }

    /// Disconnect every stream of a call.
    pub(crate) fn disconnect_call(&mut self, call: CallId) {
        self.audio.endpoints.retain(|e| e.call != call);
        self.video.endpoints.retain(|e| e.call != call);
    }
}

impl Default for MixerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connect_is_idempotent() {
        let mut s = MixerSession::new();
        let m = s.mixer_mut(StreamType::Audio).unwrap();
        let ep = MixerEndpoint {
            call: CallId(1),
            index: 0,
            recv_only: false,
        };
        m.connect(ep);
        m.connect(ep);
        assert_eq!(m.endpoints().len(), 1);
        assert!(m.disconnect(CallId(1), 0));
        assert!(!m.disconnect(CallId(1), 0));
    }

    #[test]
    fn disconnect_call_clears_all_types() {
        let mut s = MixerSession::new();
        for kind in [StreamType::Audio, StreamType::Video] {
            s.mixer_mut(kind).unwrap().connect(MixerEndpoint {
                call: CallId(7),
                index: 1,
                recv_only: false,
            });
        }
        s.disconnect_call(CallId(7));
        assert!(s.mixer(StreamType::Audio).unwrap().endpoints().is_empty());
        assert!(s.mixer(StreamType::Video).unwrap().endpoints().is_empty());
    }
}
