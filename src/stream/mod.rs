//! Media streams of a call.
//!
//! A [`Stream`] wraps one native stream of the engine. The state common to all
//! kinds lives in `Stream` itself, what differs per media type lives in
//! [`StreamKind`]. Streams are created with [`Stream::create`] and owned by
//! the [`crate::StreamsGroup`], which drives them in lock-step:
//!
//! ```text
//!  Stopped --prepare()--> Preparing --finish_prepare()--> Stopped --render()--> Running
//!     ^                                                                            |
//!     +-------------------------------- stop() ------------------------------------+
//! ```
//!
//! `render()` is called again for every renegotiation while the stream runs.
//! Each time it decides, from the changes of the result description, whether
//! the running stream can be patched or has to be stopped and started anew.

use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::bundle::BundleMembership;
use crate::config::{CallParams, MediaConfig, MediaEncryption, SessionState};
use crate::context::StreamView;
use crate::desc::{make_crypto_lines, DescriptionChanges, Direction, DtlsRole, SrtpSuite};
use crate::desc::{MulticastRole, StreamDescription, StreamType, PORT_TO_BE_DETERMINED};
use crate::engine::{MediaEngine, NativeStreamId, ProfileId, RtpDestination};
use crate::engine::{StartParams, TransportSessions};
use crate::group::{GroupEvent, TerminationReason};
use crate::ice::IceService;
use crate::port::PortConfig;
use crate::profile::{self, RtpProfile};
use crate::stats::StreamStats;
use crate::task::{Task, TaskQueue};
use crate::util::Pii;

mod audio;
pub use audio::{AudioControl, AudioState};

mod video;
pub use video::{VideoControl, VideoState};

mod text;
pub use text::TextState;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No media flows. Initial state, and where a stream idles between renders.
    Stopped,
    /// Preparing, e.g. waiting for ICE gathering.
    Preparing,
    /// Media flows, possibly muted.
    Running,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            StreamState::Stopped => "Stopped",
            StreamState::Preparing => "Preparing",
            StreamState::Running => "Running",
        };
        write!(f, "{x}")
    }
}

/// The media type specific part of a [`Stream`].
#[derive(Debug)]
pub enum StreamKind {
    /// An audio stream.
    Audio(AudioState),
    /// A video stream.
    Video(VideoState),
    /// A real time text stream.
    Text(TextState),
}

/// Work a stream asks to run once every stream of the group is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostRenderHook {
    /// Play the hold music to the remote.
    PlayHoldFile(usize),
}

/// What a stream borrows from its group while doing its work.
pub(crate) struct StreamEnv<'a> {
    pub engine: &'a mut dyn MediaEngine,
    pub config: &'a MediaConfig,
    pub params: &'a CallParams,
    pub ice: &'a IceService,
    pub tasks: &'a mut TaskQueue,
    pub hooks: &'a mut Vec<PostRenderHook>,
    pub events: &'a mut VecDeque<GroupEvent>,
    /// Whether the main audio stream is encrypted.
    pub main_audio_encrypted: bool,
    /// Bandwidth allocated to audio, for video to take the rest.
    pub audio_bandwidth: u32,
}

/// One media stream of a call.
#[derive(Debug)]
pub struct Stream {
    index: usize,
    stream_type: StreamType,
    state: StreamState,
    is_main: bool,
    kind: StreamKind,
    port_config: PortConfig,
    sessions: TransportSessions,
    native: NativeStreamId,
    profile: Option<ProfileId>,
    rtp_profile: Option<RtpProfile>,
    pub(crate) bundle: BundleMembership,
    in_conference: bool,
    muted: bool,
    mixer_connected: bool,
    avpf: bool,
    forked: bool,
    dtls_started: bool,
    zrtp_started: bool,
    encrypted: bool,
    ice_check_list: bool,
    media_loss_check: bool,
    media_lost: bool,
    auth_token: Option<String>,
    auth_token_verified: bool,
    stats: StreamStats,
}

impl Stream {
    /// Create the stream for the local description at `view`'s index.
    ///
    /// `None` if the description is disabled, of a type with no stream
    /// implementation, or if the engine cannot set up the transport.
    pub(crate) fn create(view: &StreamView<'_>, env: &mut StreamEnv<'_>) -> Option<Stream> {
        let index = view.index();
        let local = view.local_stream();
        let stream_type = local.stream_type;

        let kind = match stream_type {
            StreamType::Audio => StreamKind::Audio(AudioState::new(env.params)),
            StreamType::Video => StreamKind::Video(VideoState::new(env.params)),
            StreamType::Text => StreamKind::Text(TextState::default()),
            StreamType::Other => {
                error!("Could not create Stream of type {}", stream_type);
                return None;
            }
        };
        if !local.enabled() {
            debug!("Stream #{} is disabled, not creating it", index);
            return None;
        }

        let registry = &env.config.port_registry;
        let mut port_config = PortConfig::select(env.config.port_range(stream_type), registry);
        init_multicast(&mut port_config, view, env.config, env.params);

        let sessions = match env.engine.create_sessions(stream_type, &port_config) {
            Ok(v) => v,
            Err(e) => {
                error!("Could not create transport for {} stream #{}: {}", stream_type, index, e);
                return None;
            }
        };
        registry.register(sessions.rtp_port);
        registry.register(sessions.rtcp_port);

        let native = env.engine.create_stream(stream_type, sessions.id);
        env.engine
            .set_symmetric_rtp(native, env.config.symmetric_rtp);

        let stream = Stream {
            index,
            stream_type,
            state: StreamState::Stopped,
            is_main: false,
            kind,
            port_config,
            sessions,
            native,
            profile: None,
            rtp_profile: None,
            bundle: BundleMembership::None,
            in_conference: env.params.in_conference,
            muted: false,
            mixer_connected: false,
            avpf: false,
            forked: false,
            dtls_started: false,
            zrtp_started: false,
            encrypted: false,
            ice_check_list: false,
            media_loss_check: false,
            media_lost: false,
            auth_token: None,
            auth_token_verified: false,
            stats: StreamStats::new(index, stream_type),
        };
        info!("Created {}", stream);
        Some(stream)
    }

    /// Position of the stream in the call. Never changes.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Media type.
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether this is the main stream of its type.
    pub fn is_main(&self) -> bool {
        self.is_main
    }

    pub(crate) fn set_main(&mut self, v: bool) {
        self.is_main = v;
    }

    /// Media type specific state.
    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    /// The audio state, if this is an audio stream.
    pub fn as_audio(&self) -> Option<&AudioState> {
        match &self.kind {
            StreamKind::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// The video state, if this is a video stream.
    pub fn as_video(&self) -> Option<&VideoState> {
        match &self.kind {
            StreamKind::Video(v) => Some(v),
            _ => None,
        }
    }

    /// The text state, if this is a text stream.
    pub fn as_text(&self) -> Option<&TextState> {
        match &self.kind {
            StreamKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn kind_mut(&mut self) -> &mut StreamKind {
        &mut self.kind
    }

    /// Local ports.
    pub fn port_config(&self) -> &PortConfig {
        &self.port_config
    }

    /// Transport sessions with their bound ports.
    pub fn sessions(&self) -> &TransportSessions {
        &self.sessions
    }

    /// Native stream handle.
    pub fn native(&self) -> NativeStreamId {
        self.native
    }

    /// Bundle role.
    pub fn bundle(&self) -> &BundleMembership {
        &self.bundle
    }

    /// Whether the stream carries its own transport.
    pub fn is_transport_owner(&self) -> bool {
        self.bundle.is_transport_owner()
    }

    /// The profile in use while running.
    pub fn rtp_profile(&self) -> Option<&RtpProfile> {
        self.rtp_profile.as_ref()
    }

    /// Whether media is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub(crate) fn set_encrypted(&mut self, v: bool) {
        self.encrypted = v;
        self.stats.encrypted = v;
    }

    /// Whether ZRTP was started on this stream.
    pub fn zrtp_started(&self) -> bool {
        self.zrtp_started
    }

    /// Whether the DTLS handshake was started.
    pub fn dtls_started(&self) -> bool {
        self.dtls_started
    }

    /// Whether the input is muted, during early media or by the user.
    pub fn is_muted(&self) -> bool {
        match &self.kind {
            StreamKind::Audio(a) => self.muted || a.mic_muted(),
            _ => self.muted,
        }
    }

    /// Whether the running stream negotiated AVPF.
    pub fn avpf_enabled(&self) -> bool {
        self.state == StreamState::Running && self.avpf
    }

    /// Whether the stream was connected to a conference mixer.
    pub fn is_mixer_connected(&self) -> bool {
        self.mixer_connected
    }

    /// Whether the stream has an ICE check list.
    pub fn has_ice_check_list(&self) -> bool {
        self.ice_check_list
    }

    /// ZRTP short authentication string.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Whether the SAS was verified.
    pub fn auth_token_verified(&self) -> bool {
        self.auth_token_verified
    }

    pub(crate) fn set_auth_token(&mut self, token: String, verified: bool) {
        self.auth_token = Some(token);
        self.auth_token_verified = verified;
    }

    pub(crate) fn set_auth_token_verified(&mut self, verified: bool) {
        self.auth_token_verified = verified;
    }

    /// Statistics.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut StreamStats {
        &mut self.stats
    }

    /// Whether the main audio stream watches for lost media.
    pub(crate) fn media_loss_check(&self) -> bool {
        self.media_loss_check
    }

    /// Record a media loss. True the first time.
    pub(crate) fn mark_media_lost(&mut self) -> bool {
        !std::mem::replace(&mut self.media_lost, true)
    }

    pub(crate) fn set_ice_check_list(&mut self, engine: &mut dyn MediaEngine, active: bool) {
        if self.ice_check_list != active {
            self.ice_check_list = active;
            engine.set_ice_check_list(self.native, active);
        }
    }

    /// Write what the stream knows into its local description.
    pub(crate) fn fill_local_media_description(
        &mut self,
        desc: &mut StreamDescription,
        env: &mut StreamEnv<'_>,
    ) {
        let config = env.config;

        if let Some(ip) = config.public_ip() {
            desc.rtp_addr = ip.to_string();
            desc.rtcp_addr = ip.to_string();
        }
        if self.port_config.multicast_role == MulticastRole::Sender {
            if let Some(ip) = &self.port_config.multicast_ip {
                desc.rtp_addr = ip.clone();
                desc.rtcp_addr = ip.clone();
                desc.ttl = config.multicast_ttl;
            }
        }
        desc.multicast_role = self.port_config.multicast_role;

        if desc.rtp_port == PORT_TO_BE_DETERMINED && !desc.payloads.is_empty() {
            desc.rtp_port = self.sessions.rtp_port;
            desc.rtcp_port = self.sessions.rtcp_port;
        }
        if !self.bundle.is_transport_owner() {
            // Carried by the owner's transport.
            desc.rtp_port = 0;
            desc.rtcp_port = 0;
            desc.bundle_only = true;
        }

        desc.ssrc = env.engine.local_ssrc(self.sessions.id);

        let zrtp = env.params.media_encryption() == MediaEncryption::Zrtp;
        if zrtp && env.engine.supports_encryption(MediaEncryption::Zrtp) {
            desc.zrtp_hash = env.engine.zrtp_hello_hash(self.sessions.id);
        } else {
            desc.zrtp_hash = None;
        }

        if desc.has_dtls() {
            match env.engine.dtls_fingerprint() {
                Ok(fp) => desc.dtls_fingerprint = fp,
                Err(e) => warn!("No DTLS fingerprint for stream #{}: {}", self.index, e),
            }
            if desc.dtls_role == DtlsRole::Invalid {
                desc.dtls_role = DtlsRole::Unset;
            }
        } else {
            desc.dtls_role = DtlsRole::Invalid;
        }

        if desc.has_srtp() && desc.crypto.is_empty() {
            let engine: &dyn MediaEngine = &*env.engine;
            let supported = |s: SrtpSuite| engine.supports_srtp_suite(s);
            let suites = config.crypto_policy.select(
                env.params.srtp_suites(),
                config.srtp_suites(),
                &supported,
            );
            if suites.is_empty() {
                warn!("No SRTP suite available for stream #{}", self.index);
            }
            desc.crypto = make_crypto_lines(&suites);
        }
    }

    /// Start preparing. Returns true if asynchronous work is pending.
    pub(crate) fn prepare(&mut self) -> bool {
        self.state = StreamState::Preparing;
        false
    }

    pub(crate) fn finish_prepare(&mut self) {
        self.state = StreamState::Stopped;
    }

    /// Apply a negotiated round.
    pub(crate) fn render(
        &mut self,
        view: &StreamView<'_>,
        target: SessionState,
        env: &mut StreamEnv<'_>,
    ) {
        if self.handle_basic_changes(view, env) {
            if self.state == StreamState::Running {
                let was_muted = self.muted;
                self.render_transport(view, target, env);
                if was_muted && !self.muted {
                    if let StreamKind::Audio(a) = &self.kind {
                        info!("Early media finished, unmuting audio input...");
                        env.engine.set_muted(self.native, a.mic_muted());
                    } else {
                        env.engine.set_muted(self.native, false);
                    }
                }
            }
            return;
        }

        let result = view.result_stream();
        let bandwidth = self.negotiated_bandwidth(view, env);
        let Some(rtp_profile) = RtpProfile::build(result, bandwidth) else {
            error!("No payload types configured for this stream !");
            self.stop(env);
            return;
        };

        if result.has_dtls() && env.engine.dtls_fingerprint().is_err() {
            if env.params.encryption_mandatory() {
                error!(
                    "No DTLS certificate for stream #{} and encryption is mandatory, terminating",
                    self.index
                );
                env.events.push_back(GroupEvent::TerminationRequired(
                    TerminationReason::NotAcceptable,
                ));
            } else {
                error!("No DTLS certificate for stream #{}", self.index);
            }
            self.stop(env);
            return;
        }

        let Some(dest) = self.destination(view, env.ice) else {
            error!(
                "Cannot resolve destination of stream #{}: {}:{}",
                self.index,
                Pii(result.rtp_addr_or(view.result_media())),
                result.rtp_port
            );
            self.stop(env);
            return;
        };

        self.render_transport(view, target, env);

        let mut dir = result.dir;
        match self.port_config.multicast_role {
            MulticastRole::Sender => dir = Direction::SendOnly,
            MulticastRole::Receiver => dir = Direction::RecvOnly,
            MulticastRole::Inactive => {}
        }

        let profile_id = env.engine.create_profile(&rtp_profile);
        let muted = self.muted || matches!(&self.kind, StreamKind::Audio(a) if a.mic_muted());
        let params = StartParams {
            profile: profile_id,
            payload_type: rtp_profile.send_payload_type,
            dest,
            dir,
            muted,
            rtcp_mux: result.rtcp_mux,
            rtcp_fb: result.has_avpf().then_some(result.rtcp_fb),
            rtcp_xr: result.rtcp_xr,
            multicast_ttl: result.is_multicast().then_some(result.ttl),
            max_network_bitrate: env.config.upload_bandwidth.saturating_mul(1000),
            encryption_mandatory: env.params.encryption_mandatory(),
        };

        if let Err(e) = env.engine.start_stream(self.native, &params) {
            error!("Failed to start {}: {}", self, e);
            env.engine.release_profile(profile_id);
            self.stop(env);
            return;
        }
        let payload_type = rtp_profile.send_payload_type;
        self.profile = Some(profile_id);
        self.rtp_profile = Some(rtp_profile);
        self.stats.start_count += 1;
        self.in_conference = env.params.in_conference();
        self.media_lost = false;

        self.avpf = result.has_avpf();
        self.state = StreamState::Running;
        debug!(
            "Started {} with payload type {} to {}",
            self,
            payload_type,
            Pii(dest.rtp)
        );

        let remote_hash = view.remote_stream().zrtp_hash.clone();
        let zrtp_wanted =
            env.params.media_encryption() == MediaEncryption::Zrtp || remote_hash.is_some();

        match self.stream_type {
            StreamType::Audio => {
                if self.is_main && zrtp_wanted {
                    self.start_zrtp(remote_hash.as_deref(), env.engine);
                }
                if target.is_paused()
                    && !env.params.in_conference()
                    && env.config.hold_music_file().is_some()
                {
                    env.hooks.push(PostRenderHook::PlayHoldFile(self.index));
                }
                self.media_loss_check = self.is_main
                    && target == SessionState::StreamsRunning
                    && env.config.no_rtp_timeout().is_some();
            }
            StreamType::Video => {
                if let StreamKind::Video(v) = &self.kind {
                    env.engine
                        .set_camera_enabled(self.native, v.camera_enabled() && dir.is_sending());
                }
                // Multistream ZRTP keys off the main audio stream.
                if zrtp_wanted && env.main_audio_encrypted {
                    self.start_zrtp(remote_hash.as_deref(), env.engine);
                }
            }
            _ => {}
        }
    }

    /// The part of rendering a running stream redoes every round.
    fn render_transport(
        &mut self,
        view: &StreamView<'_>,
        target: SessionState,
        env: &mut StreamEnv<'_>,
    ) {
        let result = view.result_stream();

        let early_sending =
            env.params.early_media_sending() && target == SessionState::OutgoingEarlyMedia;
        if env.ice.is_active() || early_sending {
            env.engine.set_symmetric_rtp(self.native, false);
        }

        if result.has_srtp() {
            self.set_srtp_keys(view, env.engine, true, true);
        }

        if result.dtls_role != DtlsRole::Invalid {
            env.engine
                .set_dtls_peer_fingerprint(self.sessions.id, &result.dtls_fingerprint);
        }

        match target {
            SessionState::IncomingEarlyMedia | SessionState::OutgoingEarlyMedia => {
                if !env.params.early_media_sending() {
                    self.muted = true;
                }
            }
            SessionState::StreamsRunning => {
                self.muted = false;
                self.finish_early_media_forking(env.engine);
            }
            _ => {}
        }
    }

    fn set_srtp_keys(
        &self,
        view: &StreamView<'_>,
        engine: &mut dyn MediaEngine,
        send: bool,
        recv: bool,
    ) {
        let result = view.result_stream();
        let Some(remote) = result.crypto.first() else {
            return;
        };
        let Some(local) = view.local_stream().crypto_by_tag(remote.tag) else {
            warn!("Failed to find local crypto algo with tag: {}", remote.tag);
            return;
        };
        if recv {
            if let Err(e) = engine.set_srtp_recv_key(self.sessions.id, remote.suite, &remote.master_key) {
                warn!("Cannot set SRTP receive key of stream #{}: {}", self.index, e);
            }
        }
        if send {
            if let Err(e) = engine.set_srtp_send_key(self.sessions.id, remote.suite, &local.master_key) {
                warn!("Cannot set SRTP send key of stream #{}: {}", self.index, e);
            }
        }
    }

    /// Decide whether a running stream can be patched for this round.
    ///
    /// Returns true if the round is fully handled. Returns false when the
    /// stream must be (re)started, in which case it is stopped already.
    fn handle_basic_changes(
        &mut self,
        view: &StreamView<'_>,
        env: &mut StreamEnv<'_>,
    ) -> bool {
        let result = view.result_stream();

        if result.dir == Direction::Inactive || !result.enabled() {
            if self.state != StreamState::Stopped {
                self.stop(env);
            }
            return true;
        }

        match self.state {
            StreamState::Stopped => return false,
            StreamState::Preparing => {
                self.stop(env);
                return false;
            }
            StreamState::Running => {}
        }

        if env.params.in_conference() != self.in_conference {
            info!(
                "{} changes conference membership, it has to be restarted",
                self
            );
            self.stop(env);
            return false;
        }

        let changes = view.result_changes();
        let mut remaining = changes;

        if changes.contains(DescriptionChanges::NETWORK) {
            self.update_destinations(view, env);
            remaining.remove(DescriptionChanges::NETWORK);
        }
        if changes.contains(DescriptionChanges::CRYPTO_KEYS) {
            self.update_crypto_parameters(view, env);
            remaining.remove(DescriptionChanges::CRYPTO_KEYS);
        }
        // Stream count is handled by the group.
        remaining.remove(DescriptionChanges::STREAMS);

        if changes.contains(DescriptionChanges::CODEC) && self.patch_codecs(view, env) {
            remaining.remove(DescriptionChanges::CODEC);
        }
        if changes.contains(DescriptionChanges::PTIME) && self.ptime_unchanged_for_codec(result) {
            remaining.remove(DescriptionChanges::PTIME);
        }
        if changes.contains(DescriptionChanges::BANDWIDTH) && result.bandwidth == 0 {
            // 0 is "unspecified", not a limit.
            remaining.remove(DescriptionChanges::BANDWIDTH);
        }

        if remaining.is_empty() {
            if !changes.is_empty() {
                info!("Stream updated, no need to restart.");
            }
            return true;
        }

        info!("{} has to be restarted, changes: {}", self, remaining);
        self.stop(env);
        false
    }

    fn update_destinations(&mut self, view: &StreamView<'_>, env: &mut StreamEnv<'_>) {
        let result = view.result_stream();
        if result.rtp_port == 0 && result.bundle_only {
            // Secondary stream of a bundle, the owner's destination applies.
            return;
        }
        match self.destination(view, env.ice) {
            Some(dest) => {
                info!(
                    "Change {} stream destination: RTP={} RTCP={}",
                    self.stream_type,
                    Pii(dest.rtp),
                    Pii(dest.rtcp)
                );
                env.engine.update_destinations(self.native, &dest);
            }
            None => warn!("Cannot resolve new destination of stream #{}", self.index),
        }
    }

    fn update_crypto_parameters(&mut self, view: &StreamView<'_>, env: &mut StreamEnv<'_>) {
        let result = view.result_stream();
        if result.has_srtp() {
            let send = view.local_changes().contains(DescriptionChanges::CRYPTO_KEYS);
            let recv = view.result_changes().contains(DescriptionChanges::CRYPTO_KEYS);
            self.set_srtp_keys(view, env.engine, send, recv);
        }
        self.start_dtls(view, env);
    }

    /// Swap the payload table in place when the payload type used to send
    /// stays the same.
    fn patch_codecs(&mut self, view: &StreamView<'_>, env: &mut StreamEnv<'_>) -> bool {
        let result = view.result_stream();
        let Some(current) = &self.rtp_profile else {
            return false;
        };
        let bandwidth = current.bandwidth;
        let Some(new) = RtpProfile::build(result, bandwidth) else {
            return false;
        };
        if new.payloads == current.payloads {
            // Not a payload change, e.g. a port to or from 0.
            return false;
        }
        let same_pt = match (current.send_payload(), new.send_payload()) {
            (Some(a), Some(b)) => a.same_codec(b),
            _ => false,
        };
        if !same_pt {
            return false;
        }

        let id = env.engine.create_profile(&new);
        env.engine.set_profile(self.native, id);
        if let Some(old) = self.profile.replace(id) {
            env.tasks.push(Task::ReleaseProfile(old));
        }
        debug!("Patched payload table of {}", self);
        self.rtp_profile = Some(new);
        true
    }

    fn ptime_unchanged_for_codec(&self, result: &StreamDescription) -> bool {
        let Some(pt) = self.rtp_profile.as_ref().and_then(|p| p.send_payload()) else {
            return false;
        };
        pt.ptime_fmtp() == Some(result.ptime)
    }

    fn negotiated_bandwidth(&self, view: &StreamView<'_>, env: &StreamEnv<'_>) -> u32 {
        let Some(md) = view.result_media() else {
            return 0;
        };
        let result = view.result_stream();
        let upload = env.config.upload_bandwidth;
        match self.stream_type {
            StreamType::Audio => {
                let has_video = md
                    .streams
                    .iter()
                    .any(|s| s.stream_type == StreamType::Video && s.enabled());
                profile::audio_bandwidth(md, result, upload, has_video)
            }
            StreamType::Video => profile::video_bandwidth(md, result, upload, env.audio_bandwidth),
            _ => 0,
        }
    }

    /// Where to send. The ICE selected pair wins over the description, a
    /// bundle secondary uses the owner's description.
    fn destination(&self, view: &StreamView<'_>, ice: &IceService) -> Option<RtpDestination> {
        if let Some((rtp, rtcp)) = ice.destinations(self.index) {
            return Some(RtpDestination { rtp, rtcp });
        }
        let md = view.result_media();
        let desc = match &self.bundle {
            BundleMembership::Secondary { owner } => md?.stream(*owner),
            _ => view.result_stream(),
        };
        resolve_destination(desc, md)
    }

    /// Start DTLS if the round negotiated it.
    pub(crate) fn start_dtls(&mut self, view: &StreamView<'_>, env: &mut StreamEnv<'_>) {
        if self.dtls_started {
            return;
        }
        let result = view.result_stream();
        if !result.has_dtls() {
            return;
        }
        if result.dtls_role == DtlsRole::Invalid {
            warn!(
                "Unable to start DTLS engine on stream #{}, DTLS role in resulting media description is invalid",
                self.index
            );
            return;
        }
        if !self.bundle.is_transport_owner() {
            return;
        }
        info!("Starting DTLS on stream #{} as {:?}", self.index, result.dtls_role);
        env.engine.start_dtls(self.sessions.id, result.dtls_role);
        self.dtls_started = true;
    }

    pub(crate) fn start_zrtp(&mut self, peer_hash: Option<&str>, engine: &mut dyn MediaEngine) {
        if self.zrtp_started || !engine.supports_encryption(MediaEncryption::Zrtp) {
            return;
        }
        match engine.start_zrtp(self.native, peer_hash) {
            Ok(()) => {
                debug!("Started ZRTP on stream #{}", self.index);
                self.zrtp_started = true;
            }
            Err(e) => warn!("Cannot start ZRTP on stream #{}: {}", self.index, e),
        }
    }

    /// Send a copy of the media to a forked early media destination.
    pub(crate) fn add_early_media_destination(
        &mut self,
        dest: &RtpDestination,
        engine: &mut dyn MediaEngine,
    ) {
        info!("Adding early media fork destination {} to stream #{}", Pii(dest.rtp), self.index);
        engine.add_aux_destination(self.native, dest);
        self.forked = true;
    }

    pub(crate) fn finish_early_media_forking(&mut self, engine: &mut dyn MediaEngine) {
        if std::mem::take(&mut self.forked) {
            engine.clear_aux_destinations(self.native);
        }
    }

    pub(crate) fn connect_mixer(&mut self, recv_only: bool, engine: &mut dyn MediaEngine) {
        if self.mixer_connected || self.state != StreamState::Running {
            return;
        }
        engine.mixer_connect(self.native, self.stream_type, recv_only);
        self.mixer_connected = true;
    }

    pub(crate) fn disconnect_mixer(&mut self, engine: &mut dyn MediaEngine) -> bool {
        if !self.mixer_connected {
            return false;
        }
        engine.mixer_disconnect(self.native);
        self.mixer_connected = false;
        true
    }

    /// Stop media. Transport sessions are kept for the next render.
    pub(crate) fn stop(&mut self, env: &mut StreamEnv<'_>) {
        if self.state == StreamState::Stopped {
            return;
        }
        self.disconnect_mixer(env.engine);
        self.finish_early_media_forking(env.engine);
        env.engine.stop_stream(self.native);
        env.engine
            .set_symmetric_rtp(self.native, env.config.symmetric_rtp);
        if let Some(p) = self.profile.take() {
            // The graph may still reference it.
            env.tasks.push(Task::ReleaseProfile(p));
        }
        self.rtp_profile = None;
        self.zrtp_started = false;
        self.avpf = false;
        self.media_loss_check = false;
        if let StreamKind::Audio(a) = &mut self.kind {
            a.playing_hold_file = false;
        }
        self.state = StreamState::Stopped;
        info!("Stopped {}", self);
    }

    /// Release everything, transport sessions included.
    pub(crate) fn finish(&mut self, env: &mut StreamEnv<'_>) {
        self.stop(env);
        if let BundleMembership::Owner(b) = std::mem::take(&mut self.bundle) {
            env.engine.bundle_destroy(b.id());
        }
        env.engine.destroy_stream(self.native);
        env.engine.release_sessions(self.sessions.id);
        env.config.port_registry.release(self.sessions.rtp_port);
        env.config.port_registry.release(self.sessions.rtcp_port);
        debug!("Finished stream #{}", self.index);
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stream #{} [{}{}]",
            self.stream_type,
            self.index,
            self.state,
            if self.is_main { ", main" } else { "" }
        )
    }
}

fn init_multicast(
    port_config: &mut PortConfig,
    view: &StreamView<'_>,
    config: &MediaConfig,
    params: &CallParams,
) {
    let kind = view.local_stream().stream_type;
    if params.multicast(kind) {
        port_config.multicast_ip = config.multicast_addr(kind).map(|s| s.to_string());
    }

    port_config.multicast_role = MulticastRole::Inactive;
    if view.local_is_offerer() {
        port_config.multicast_role = view.local_stream().multicast_role;
        if port_config.multicast_ip.is_some() && port_config.multicast_role == MulticastRole::Inactive
        {
            port_config.multicast_role = MulticastRole::Sender;
        }
    } else {
        let remote = view.remote_stream();
        if remote.is_multicast() {
            port_config.multicast_role = MulticastRole::Receiver;
            port_config.multicast_ip = Some(remote.rtp_addr.clone());
            port_config.rtp_port = Some(remote.rtp_port);
            port_config.rtcp_port = Some(remote.rtcp_port_or_default());
        }
    }
}

/// Parse the destination of a stream. `None` if the address is not an IP.
pub(crate) fn resolve_destination(
    desc: &StreamDescription,
    md: Option<&crate::desc::MediaDescription>,
) -> Option<RtpDestination> {
    let rtp_ip: IpAddr = desc.rtp_addr_or(md).parse().ok()?;
    let rtcp_ip: IpAddr = desc.rtcp_addr_or(md).parse().ok()?;
    let rtcp_port = if desc.rtcp_mux {
        desc.rtp_port
    } else {
        desc.rtcp_port_or_default()
    };
    Some(RtpDestination {
        rtp: SocketAddr::new(rtp_ip, desc.rtp_port),
        rtcp: SocketAddr::new(rtcp_ip, rtcp_port),
    })
}
