//! Sans I/O orchestration of the media streams of SIP calls.
//!
//! A call negotiates its media through offer/answer rounds. Each round
//! produces a local, a remote and a negotiated (result) description. This
//! crate turns those rounds into actions on a native media engine: it creates
//! audio, video and real time text streams, starts them, patches them in place
//! when a renegotiation allows it, restarts them when it does not, and tears
//! them down. Along the way it keeps the ICE session of the call, the SRTP,
//! ZRTP and DTLS keying, the RTP bundles and the conference mixer in line.
//!
//! # Sans I/O
//!
//! Nothing here talks to the network, spawns threads or reads the clock.
//!
//! * The native engine (sockets, codecs, SRTP) is behind the [`MediaEngine`]
//!   trait, handed to the [`StreamsGroup`] at creation.
//! * Time comes in through [`StreamsGroup::handle_timeout`]. When to call it
//!   next comes out of [`StreamsGroup::poll_timeout`].
//! * Work for the ICE machinery (STUN resolution, gathering, checks) comes out
//!   of [`StreamsGroup::poll_ice_request`], its results go back in through
//!   [`StreamsGroup::handle_ice_event`].
//! * Notifications for the call session come out of [`StreamsGroup::poll_event`].
//!
//! # Offer/answer rounds
//!
//! For every round the signaling layer builds an [`OfferAnswerContext`] and calls
//!
//! ```text
//! create_streams(ctx) -> fill_local_media_description(ctx) -> prepare()
//!   -> finish_prepare() -> render(ctx, target_state)
//! ```
//!
//! `render()` compares the round with the previous one. The differences, as
//! [`DescriptionChanges`], decide per stream whether it is patched while
//! running (a new destination, new keys, the same codec with other payload
//! numbers) or stopped and started again. Rendering the same round twice
//! never restarts anything.
//!
//! # Panics
//!
//! Rendering or stopping a finished group is a programming error and panics.
//! Everything else that goes wrong during a round (no common codec, an
//! unresolvable address, a failed native call) is logged and leaves the stream
//! stopped, or asks for the call to end through
//! [`GroupEvent::TerminationRequired`].

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod bundle;
pub use bundle::{BundleMembership, RtpBundle};

mod config;
pub use config::{CallParams, MediaConfig, MediaEncryption, SessionState};

mod context;
pub use context::{OfferAnswerContext, StreamView};

mod desc;
pub use desc::{Bundle, CryptoSuitePolicy, DefaultCryptoPolicy, DescriptionChanges, Direction};
pub use desc::{DtlsRole, MediaDescription, MulticastRole, PayloadType, Proto, RtcpFeedback};
pub use desc::{SrtpCrypto, SrtpSuite, StreamDescription, StreamType, PORT_TO_BE_DETERMINED};

mod engine;
pub use engine::{BundleId, EngineError, EngineEvent, MediaEngine, NativeStreamId};
pub use engine::{ProfileId, RtpDestination, SessionsId, StartParams, TransportSessions};

mod group;
pub use group::{GroupEvent, StreamsGroup, TerminationReason};

pub mod ice;
use ice::IceError;

pub mod mixer;

mod port;
pub use port::{PortConfig, PortRegistry};

mod profile;
pub use profile::RtpProfile;

mod service;
pub use service::{BandwidthController, SharedServiceKind, SharedServices};

pub mod stats;

mod stream;
pub use stream::{AudioControl, AudioState, Stream, StreamKind, StreamState};
pub use stream::{TextState, VideoControl, VideoState};

mod task;
pub use task::{AudioRoute, StreamHandle};

mod util;

/// Errors of the explicit API surface.
///
/// Negotiation failures are not errors, they leave the affected stream stopped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MediaError {
    /// ICE errors.
    #[error("{0}")]
    Ice(#[from] IceError),

    /// Native engine errors.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// There is no stream at the index.
    #[error("No stream at index {0}")]
    NoSuchStream(usize),

    /// Another stream of the type is main already.
    #[error("There is already a main {0} stream")]
    MainStreamExists(StreamType),

    /// The operation needs a running stream.
    #[error("Stream #{0} is not running")]
    NotRunning(usize),

    /// The stream is of another type than the operation needs.
    #[error("Stream #{0} is not a {1} stream")]
    WrongCapability(usize, StreamType),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            MediaError::MainStreamExists(StreamType::Video).to_string(),
            "There is already a main video stream"
        );
        let e: MediaError = EngineError::PermissionDenied.into();
        assert!(matches!(e, MediaError::Engine(_)));
    }
}
