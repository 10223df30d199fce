//! The streams of one call.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::bundle::{BundleMembership, RtpBundle};
use crate::config::{CallParams, MediaConfig, SessionState};
use crate::context::OfferAnswerContext;
use crate::desc::{DescriptionChanges, Direction, MediaDescription, PayloadType};
use crate::desc::{StreamDescription, StreamType};
use crate::engine::{EngineEvent, MediaEngine, RtpDestination};
use crate::ice::{IceEvent, IceEventOutcome, IceRequest, IceService, IceStreamSlot};
use crate::mixer::{CallId, MixerEndpoint, MixerSession};
use crate::profile::{self, audio_payload_bandwidth, min_bandwidth};
use crate::service::{SharedServiceKind, SharedServices};
use crate::stats::StreamStats;
use crate::stream::{resolve_destination, AudioControl, PostRenderHook, Stream, StreamEnv};
use crate::stream::{StreamKind, StreamState, VideoControl};
use crate::task::{AudioRoute, StreamHandle, Task, TaskQueue};
use crate::util::{already_happened, Pii, Soonest};
use crate::MediaError;

/// How often the native event queues are polled.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How often bandwidth usage is reported.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// How often the main audio stream is checked for lost media.
const MEDIA_LOSS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Characters of the telephone events 0 to 16.
const DTMF_CHARS: &[u8] = b"0123456789*#ABCD!";

/// Why the call has to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TerminationReason {
    /// The negotiated media cannot be used, e.g. mandatory encryption
    /// without a DTLS certificate.
    NotAcceptable,
}

/// Notifications for the call session.
///
/// Polled with [`StreamsGroup::poll_event`].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GroupEvent {
    /// The encryption of one or more streams changed.
    ///
    /// Emitted once per loop turn however many streams changed.
    EncryptionChanged {
        /// Whether every active stream is encrypted now.
        all_encrypted: bool,
    },

    /// The ZRTP short authentication string is ready to be shown.
    AuthTokenReady {
        /// The SAS.
        token: String,
        /// Whether it was verified in a previous call.
        verified: bool,
    },

    /// A telephone event was received.
    DtmfReceived {
        /// Stream index.
        index: usize,
        /// The DTMF.
        dtmf: char,
    },

    /// No RTP arrived on the main audio stream for longer than the no-RTP timeout.
    MediaLost {
        /// Stream index.
        index: usize,
    },

    /// Periodic statistics of a stream.
    StatsUpdated(StreamStats),

    /// The first video frame from the remote was decoded.
    FirstVideoFrameDecoded {
        /// Stream index.
        index: usize,
    },

    /// The engine estimated the available download bandwidth.
    VideoBandwidthEstimated {
        /// Stream index.
        index: usize,
        /// Estimate in kbit/s.
        kbps: u32,
    },

    /// The call cannot continue.
    TerminationRequired(TerminationReason),
}

#[derive(Debug, Default)]
struct Slot {
    stream: Option<Stream>,
    generation: u32,
}

#[derive(Debug, Default)]
struct Timers {
    events: Option<Instant>,
    report: Option<Instant>,
    media_loss: Option<Instant>,
}

impl Timers {
    fn arm(&mut self) {
        // Fire on the next handle_timeout, which then schedules relative to its now.
        self.events = self.events.or(Some(already_happened()));
        self.report = self.report.or(Some(already_happened()));
        self.media_loss = self.media_loss.or(Some(already_happened()));
    }

    fn disarm(&mut self) {
        *self = Timers::default();
    }

    fn next(&self) -> Option<Instant> {
        self.events.soonest(self.report).soonest(self.media_loss)
    }
}

/// The ordered streams of one call, driven together through offer/answer rounds.
///
/// For each round the call session calls, in sequence:
///
/// 1. [`StreamsGroup::create_streams`] to align the streams with the local description.
/// 2. [`StreamsGroup::fill_local_media_description`] to write ports, keys and ICE
///    attributes into the local description.
/// 3. [`StreamsGroup::prepare`] and, once it is done, [`StreamsGroup::finish_prepare`].
/// 4. [`StreamsGroup::render`] with the negotiated result.
///
/// Like the rest of this crate, the group does no I/O and reads no clock.
/// Drive it with [`StreamsGroup::poll_timeout`] and [`StreamsGroup::handle_timeout`],
/// forward [`IceRequest`] to the ICE machinery and feed its answers back with
/// [`StreamsGroup::handle_ice_event`].
pub struct StreamsGroup {
    call_id: CallId,
    config: MediaConfig,
    params: CallParams,
    engine: Box<dyn MediaEngine>,
    slots: Vec<Slot>,
    current: OfferAnswerContext,
    current_state: SessionState,
    ice: IceService,
    shared: SharedServices,
    mixer: Option<Weak<RefCell<MixerSession>>>,
    tasks: TaskQueue,
    hooks: Vec<PostRenderHook>,
    events: VecDeque<GroupEvent>,
    timers: Timers,
    media_loss_ref: Option<Instant>,
    audio_bandwidth: u32,
    finished: bool,
}

impl StreamsGroup {
    /// New group without streams.
    pub fn new(call_id: CallId, config: MediaConfig, engine: Box<dyn MediaEngine>) -> Self {
        let ice = IceService::new(&config);
        StreamsGroup {
            call_id,
            config,
            params: CallParams::new(),
            engine,
            slots: vec![],
            current: OfferAnswerContext::new(),
            current_state: SessionState::Idle,
            ice,
            shared: SharedServices::new(),
            mixer: None,
            tasks: TaskQueue::new(),
            hooks: vec![],
            events: VecDeque::new(),
            timers: Timers::default(),
            media_loss_ref: None,
            audio_bandwidth: 0,
            finished: false,
        }
    }

    /// The call this group belongs to.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// The configuration.
    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Call parameters used by the next operations.
    pub fn params(&self) -> &CallParams {
        &self.params
    }

    /// Set the call parameters.
    pub fn set_params(&mut self, params: CallParams) {
        self.params = params;
    }

    /// The ICE service.
    pub fn ice(&self) -> &IceService {
        &self.ice
    }

    /// The ICE service, to set a listener or reset the session.
    pub fn ice_mut(&mut self) -> &mut IceService {
        &mut self.ice
    }

    /// Shared services of the group.
    pub fn shared_services(&self) -> &SharedServices {
        &self.shared
    }

    /// Shared services of the group, installing on first use.
    pub fn shared_services_mut(&mut self) -> &mut SharedServices {
        &mut self.shared
    }

    /// The context of the last render.
    pub fn current_offer_answer(&self) -> &OfferAnswerContext {
        &self.current
    }

    /// Target state of the last render.
    pub fn current_session_state(&self) -> SessionState {
        self.current_state
    }

    /// Whether [`StreamsGroup::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Join or leave a conference.
    ///
    /// The group only keeps a weak reference to the session.
    pub fn set_mixer_session(&mut self, session: Option<&Rc<RefCell<MixerSession>>>) {
        if session.is_none() {
            if let Some(m) = self.mixer_session() {
                m.borrow_mut().disconnect_call(self.call_id);
            }
        }
        self.mixer = session.map(Rc::downgrade);
    }

    /// The conference mixer session, if the call is in one that is still alive.
    pub fn mixer_session(&self) -> Option<Rc<RefCell<MixerSession>>> {
        self.mixer.as_ref().and_then(Weak::upgrade)
    }

    /// Number of stream slots, including indexes without a stream.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there is no slot at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The stream at an index.
    pub fn stream(&self, index: usize) -> Option<&Stream> {
        self.slots.get(index)?.stream.as_ref()
    }

    /// All streams, in index order.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.slots.iter().filter_map(|s| s.stream.as_ref())
    }

    fn streams_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.slots.iter_mut().filter_map(|s| s.stream.as_mut())
    }

    /// A handle to the current stream at an index.
    pub fn stream_handle(&self, index: usize) -> Option<StreamHandle> {
        let slot = self.slots.get(index)?;
        slot.stream.as_ref()?;
        Some(StreamHandle {
            index,
            generation: slot.generation,
        })
    }

    fn resolve(&mut self, handle: StreamHandle) -> Option<&mut Stream> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.stream.as_mut()
    }

    /// Split the group into its streams and what the streams may use.
    fn split(&mut self) -> (&mut [Slot], StreamEnv<'_>) {
        let main_audio_encrypted = self.main_audio_encrypted();
        let env = StreamEnv {
            engine: &mut *self.engine,
            config: &self.config,
            params: &self.params,
            ice: &self.ice,
            tasks: &mut self.tasks,
            hooks: &mut self.hooks,
            events: &mut self.events,
            main_audio_encrypted,
            audio_bandwidth: self.audio_bandwidth,
        };
        (&mut self.slots, env)
    }

    fn main_audio_encrypted(&self) -> bool {
        self.lookup_main_stream(StreamType::Audio)
            .map(|s| s.is_encrypted())
            .unwrap_or(false)
    }

    fn ice_slots(&self) -> Vec<IceStreamSlot> {
        self.streams()
            .map(|s| IceStreamSlot {
                index: s.index(),
                rtp_port: s.sessions().rtp_port,
                rtcp_port: s.sessions().rtcp_port,
                transport_owner: s.is_transport_owner(),
            })
            .collect()
    }

    fn sync_ice_check_lists(&mut self) {
        let ice = &self.ice;
        let engine = &mut *self.engine;
        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            let index = s.index();
            s.set_ice_check_list(engine, ice.has_check_list(index));
            s.stats_mut().ice_state = ice.ice_state(index);
        }
    }

    /// Create the streams the local description asks for.
    ///
    /// Existing streams are kept. A stream whose type changed is replaced if
    /// it is stopped, as is a stream switching between unicast and multicast.
    pub fn create_streams(&mut self, ctx: &OfferAnswerContext) {
        let count = ctx.local().map(|md| md.streams.len()).unwrap_or(0);
        if self.slots.len() < count {
            self.slots.resize_with(count, Slot::default);
        }

        for index in 0..count {
            let view = ctx.scope_with_diff(index, &self.current);
            let local = view.local_stream();

            let replace = match &self.slots[index].stream {
                None => true,
                Some(s) if s.stream_type() != local.stream_type => {
                    if s.state() == StreamState::Stopped {
                        true
                    } else {
                        error!(
                            "Inconsistent streams in offer/answer: stream #{} of type {} is {}",
                            index,
                            s.stream_type(),
                            local.stream_type
                        );
                        false
                    }
                }
                Some(_) => view
                    .local_changes()
                    .contains(DescriptionChanges::NETWORK_XXXCAST),
            };
            if !replace {
                continue;
            }

            let (slots, mut env) = self.split();
            let slot = &mut slots[index];
            if let Some(mut old) = slot.stream.take() {
                info!("Stream at index {} is being replaced.", index);
                old.finish(&mut env);
            }
            slot.stream = Stream::create(&view, &mut env);
            if slot.stream.is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }

        self.elect_main_streams();

        let slots = self.ice_slots();
        self.ice.create_streams(ctx, &slots);
        self.sync_ice_check_lists();
    }

    fn elect_main_streams(&mut self) {
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Text] {
            if self.lookup_main_stream(kind).is_some() {
                continue;
            }
            if let Some(s) = self.streams_mut().find(|s| s.stream_type() == kind) {
                debug!("{} is the main {} stream", s, kind);
                s.set_main(true);
            }
        }
    }

    /// Make a stream the main stream of its type.
    ///
    /// Fails if another stream of the type is main already.
    pub fn set_stream_main(&mut self, index: usize) -> Result<(), MediaError> {
        let kind = self
            .stream(index)
            .ok_or(MediaError::NoSuchStream(index))?
            .stream_type();
        if let Some(main) = self.lookup_main_stream(kind) {
            if main.index() != index {
                return Err(MediaError::MainStreamExists(kind));
            }
        }
        if let Some(s) = self.slots[index].stream.as_mut() {
            s.set_main(true);
        }
        Ok(())
    }

    /// The main stream of a type.
    pub fn lookup_main_stream(&self, kind: StreamType) -> Option<&Stream> {
        self.streams()
            .find(|s| s.stream_type() == kind && s.is_main())
    }

    /// Write ports, keys, bundle roles and ICE attributes into the local description.
    pub fn fill_local_media_description(&mut self, ctx: &mut OfferAnswerContext) {
        if let Some(md) = ctx.local().cloned() {
            self.update_bundles(&md);
        }
        if let Some(md) = ctx.local_mut() {
            let (slots, mut env) = self.split();
            for slot in slots.iter_mut() {
                let Some(s) = &mut slot.stream else {
                    continue;
                };
                if let Some(desc) = md.streams.get_mut(s.index()) {
                    s.fill_local_media_description(desc, &mut env);
                }
            }
        }
        self.ice.fill_local_media_description(ctx);
    }

    /// Start preparing the streams.
    ///
    /// Returns true if ICE gathering is in progress. The group then finishes
    /// preparing by itself when the gathering ends and tells the ICE listener.
    pub fn prepare(&mut self) -> bool {
        if self.finished {
            error!("prepare() called on a finished StreamsGroup");
            return false;
        }
        for s in self.streams_mut() {
            if s.state() == StreamState::Stopped {
                s.prepare();
            }
        }
        let slots = self.ice_slots();
        let engine = &*self.engine;
        let pending = self.ice.prepare(|| engine.local_addresses(), &slots);
        self.sync_ice_check_lists();
        pending
    }

    /// Finish preparing.
    pub fn finish_prepare(&mut self) {
        for s in self.streams_mut() {
            if s.state() == StreamState::Preparing {
                s.finish_prepare();
            }
        }
        self.ice.finish_prepare();
    }

    /// Apply a negotiated round to the streams.
    ///
    /// Streams render in index order, then ICE, then DTLS if ICE is absent or
    /// done, then the hooks streams queued while rendering.
    ///
    /// # Panics
    ///
    /// If the group is finished.
    pub fn render(&mut self, ctx: &OfferAnswerContext, target: SessionState) {
        assert!(!self.finished, "render() called on a finished StreamsGroup");

        let mut ctx_copy = OfferAnswerContext::new();
        ctx_copy.dup_from(ctx);
        if ctx_copy.remote().is_none() {
            // A final answer without SDP keeps the remote of the early dialog.
            debug!("No remote description in this round, keeping the previous one");
            ctx_copy.set_remote_rc(self.current.remote_rc());
        }
        let ctx = &ctx_copy;

        if let Some(md) = ctx.result() {
            self.update_bundles(md);
        }
        self.compute_audio_bandwidth(ctx);

        let current = std::mem::take(&mut self.current);
        if let Some(count) = ctx.result().map(|md| md.streams.len()) {
            let (slots, mut env) = self.split();
            for slot in slots.iter_mut().take(count) {
                let Some(s) = &mut slot.stream else {
                    continue;
                };
                let view = ctx.scope_with_diff(s.index(), &current);
                s.render(&view, target, &mut env);
            }

            for (index, slot) in slots.iter_mut().enumerate().skip(count) {
                if let Some(mut s) = slot.stream.take() {
                    info!("Stream #{} is beyond the negotiated streams, destroying it", index);
                    s.finish(&mut env);
                }
            }
        } else {
            warn!("Render without a negotiated result, streams left as they are");
        }

        self.ice.render(ctx);
        self.sync_ice_check_lists();

        if !self.ice.is_active() || self.ice.has_completed() {
            self.start_dtls_all(ctx);
        }

        self.sync_mixer(ctx);
        self.run_hooks();

        if ctx_copy.result().is_none() {
            // Later rounds compare against the last negotiated result.
            ctx_copy.set_result_rc(current.result_rc());
        }
        self.current = ctx_copy;
        self.current_state = target;
        self.timers.arm();
    }

    fn start_dtls_all(&mut self, ctx: &OfferAnswerContext) {
        let (slots, mut env) = self.split();
        for slot in slots.iter_mut() {
            if let Some(s) = &mut slot.stream {
                let view = ctx.scope(s.index());
                s.start_dtls(&view, &mut env);
            }
        }
    }

    fn start_dtls(&mut self, index: usize) {
        let mut ctx = OfferAnswerContext::new();
        ctx.copy_from(&self.current);
        let (slots, mut env) = self.split();
        if let Some(s) = slots.get_mut(index).and_then(|s| s.stream.as_mut()) {
            s.start_dtls(&ctx.scope(index), &mut env);
        }
    }

    fn compute_audio_bandwidth(&mut self, ctx: &OfferAnswerContext) {
        let Some(md) = ctx.result() else {
            return;
        };
        let Some(main) = self.lookup_main_stream(StreamType::Audio) else {
            return;
        };
        let desc = md.stream(main.index());
        let has_video = md
            .streams
            .iter()
            .any(|s| s.stream_type == StreamType::Video && s.enabled());
        let max = profile::audio_bandwidth(md, desc, self.config.upload_bandwidth, has_video);
        let pt = desc.payloads.iter().find(|p| !p.is_telephone_event()).cloned();
        match pt {
            Some(pt) => {
                self.update_allocated_audio_bandwidth(&pt, max);
            }
            None => self.audio_bandwidth = max,
        }
    }

    /// Set the bandwidth allocated to audio from the codec in use and a limit.
    ///
    /// Returns the allocated bandwidth in kbit/s.
    pub fn update_allocated_audio_bandwidth(&mut self, pt: &PayloadType, max: u32) -> u32 {
        self.audio_bandwidth = min_bandwidth(audio_payload_bandwidth(pt), max);
        debug!("Allocated audio bandwidth: {} kbit/s", self.audio_bandwidth);
        self.audio_bandwidth
    }

    /// Bandwidth allocated to audio in kbit/s.
    pub fn allocated_audio_bandwidth(&self) -> u32 {
        self.audio_bandwidth
    }

    /// Bandwidth a video stream may use, after audio took its share.
    pub fn video_bandwidth(&self, md: &MediaDescription, desc: &StreamDescription) -> u32 {
        profile::video_bandwidth(md, desc, self.config.upload_bandwidth, self.audio_bandwidth)
    }

    /// Assign bundle roles from the BUNDLE groups of a description.
    fn update_bundles(&mut self, md: &MediaDescription) {
        let roles: Vec<(usize, Option<usize>)> = self
            .streams()
            .map(|s| (s.index(), md.transport_owner_index(s.index())))
            .collect();

        // Owners first, secondaries need their bundle.
        for &(index, owner) in &roles {
            let is_owner = owner == Some(index);
            let (slots, env) = self.split();
            let Some(s) = slots[index].stream.as_ref() else {
                continue;
            };
            if s.bundle.owns_bundle() == is_owner {
                continue;
            }
            leave_bundle(slots, index, env.engine);
            if !is_owner {
                continue;
            }
            let Some(s) = slots[index].stream.as_mut() else {
                continue;
            };
            let mid = md.stream(index).mid.clone();
            let id = env.engine.bundle_create(s.sessions().id, &mid);
            info!("Stream #{} owns the RTP bundle of mid {}", index, mid);
            s.bundle = BundleMembership::Owner(RtpBundle::new(id, index));
        }

        for (index, owner) in roles {
            let (slots, env) = self.split();
            match owner {
                Some(o) if o != index => {
                    let already = matches!(
                        slots[index].stream.as_ref().map(|s| &s.bundle),
                        Some(BundleMembership::Secondary { owner }) if *owner == o
                    );
                    if already {
                        continue;
                    }
                    leave_bundle(slots, index, env.engine);
                    let Some(sessions) = slots[index].stream.as_ref().map(|s| s.sessions().id)
                    else {
                        continue;
                    };
                    let mid = md.stream(index).mid.clone();
                    let Some(bundle) = slots
                        .get_mut(o)
                        .and_then(|s| s.stream.as_mut())
                        .and_then(|s| s.bundle.bundle_mut())
                    else {
                        warn!("Bundle owner #{} of stream #{} has no bundle", o, index);
                        continue;
                    };
                    bundle.add_member(index);
                    env.engine.bundle_add(bundle.id(), sessions, &mid);
                    if let Some(s) = slots[index].stream.as_mut() {
                        info!("Stream #{} joins the RTP bundle of stream #{}", index, o);
                        s.bundle = BundleMembership::Secondary { owner: o };
                    }
                }
                None => leave_bundle(slots, index, env.engine),
                _ => {}
            }
        }
    }

    /// Keep the mixer session and bandwidth controller in line with the streams.
    fn sync_mixer(&mut self, ctx: &OfferAnswerContext) {
        let mixer = self.mixer_session();
        let in_conference = self.params.in_conference() && mixer.is_some();
        let call = self.call_id;

        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            let index = s.index();
            let kind = s.stream_type();
            let running = s.state() == StreamState::Running;
            let mixable = matches!(kind, StreamType::Audio | StreamType::Video);

            if running && in_conference && mixable {
                let recv_only = !ctx.scope(index).result_stream().dir.is_sending();
                s.connect_mixer(recv_only, &mut *self.engine);
                if let Some(m) = &mixer {
                    if let Some(mixer) = m.borrow_mut().mixer_mut(kind) {
                        mixer.connect(MixerEndpoint {
                            call,
                            index,
                            recv_only,
                        });
                    }
                }
                self.shared.bandwidth_controller().add_stream(index, kind);
            } else {
                s.disconnect_mixer(&mut *self.engine);
                if let Some(m) = &mixer {
                    if let Some(mixer) = m.borrow_mut().mixer_mut(kind) {
                        mixer.disconnect(call, index);
                    }
                }
                if self.shared.is_installed(SharedServiceKind::BandwidthController) {
                    self.shared.bandwidth_controller().remove_stream(index);
                }
            }
        }
    }

    fn run_hooks(&mut self) {
        let hooks = std::mem::take(&mut self.hooks);
        for hook in hooks {
            match hook {
                PostRenderHook::PlayHoldFile(index) => {
                    let Some(path) = self.config.hold_music_file.clone() else {
                        continue;
                    };
                    if let Some(mut ctl) = self.audio_control(index) {
                        ctl.play_hold_file(&path);
                    }
                }
            }
        }
    }

    /// Stop every stream. The transport survives for the next render.
    ///
    /// # Panics
    ///
    /// If the group is finished.
    pub fn stop(&mut self) {
        assert!(!self.finished, "stop() called on a finished StreamsGroup");
        {
            let (slots, mut env) = self.split();
            for slot in slots.iter_mut() {
                if let Some(s) = &mut slot.stream {
                    s.stop(&mut env);
                }
            }
        }
        let ctx = OfferAnswerContext::new();
        self.sync_mixer(&ctx);
        self.ice.stop();
        self.hooks.clear();
        self.timers.disarm();
        self.media_loss_ref = None;
    }

    /// Release everything. The group cannot be rendered again.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        {
            let (slots, mut env) = self.split();
            for slot in slots.iter_mut() {
                if let Some(mut s) = slot.stream.take() {
                    s.finish(&mut env);
                }
            }
        }
        if let Some(m) = self.mixer_session() {
            m.borrow_mut().disconnect_call(self.call_id);
        }
        self.ice.finish();
        self.shared.destroy_all();
        // Profiles can go now, nothing references them anymore.
        for task in self.tasks.take() {
            if let Task::ReleaseProfile(p) = task {
                self.engine.release_profile(p);
            }
        }
        self.hooks.clear();
        self.timers.disarm();
        self.finished = true;
        info!("StreamsGroup of call {:?} finished", self.call_id);
    }

    /// Finish and forget all streams, leaving an empty group that can be used again.
    pub fn clear_streams(&mut self) {
        self.finish();
        self.slots.clear();
        self.current.clear();
        self.current_state = SessionState::Idle;
        self.events.clear();
        self.finished = false;
    }

    /// Next time [`StreamsGroup::handle_timeout`] wants to be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if !self.tasks.is_empty() {
            return Some(already_happened());
        }
        self.timers.next()
    }

    /// Run deferred tasks and timers due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.run_tasks();

        if matches!(self.timers.events, Some(t) if t <= now) {
            self.timers.events = Some(now + EVENT_POLL_INTERVAL);
            self.poll_engine_events();
            // Events may have queued tasks.
            self.run_tasks();
        }
        if matches!(self.timers.report, Some(t) if t <= now) {
            self.timers.report = Some(now + REPORT_INTERVAL);
            self.report_bandwidth();
        }
        if matches!(self.timers.media_loss, Some(t) if t <= now) {
            self.timers.media_loss = Some(now + MEDIA_LOSS_CHECK_INTERVAL);
            self.check_media_loss(now);
        }
    }

    /// Next event for the call session.
    pub fn poll_event(&mut self) -> Option<GroupEvent> {
        self.events.pop_front()
    }

    /// Next request for the ICE machinery.
    pub fn poll_ice_request(&mut self) -> Option<IceRequest> {
        self.ice.poll_request()
    }

    /// Feed back the outcome of an [`IceRequest`] or an ICE event of the engine.
    pub fn handle_ice_event(&mut self, ev: IceEvent) {
        match self.ice.handle_event(ev) {
            IceEventOutcome::Nothing => {}
            IceEventOutcome::GatheringFinished => self.gathering_finished(),
            IceEventOutcome::ResumeGathering => {
                let slots = self.ice_slots();
                let engine = &*self.engine;
                if !self.ice.need_ice_gathering(|| engine.local_addresses(), &slots) {
                    self.gathering_finished();
                }
            }
            IceEventOutcome::StartDtls(index) => {
                if let Some(handle) = self.stream_handle(index) {
                    self.tasks.push(Task::UpdateIceDestinations(handle));
                }
                self.start_dtls(index);
            }
            IceEventOutcome::RestartNeeded => {
                self.tasks.push(Task::IceRestartNeeded);
            }
        }
        self.sync_ice_check_lists();
    }

    fn gathering_finished(&mut self) {
        self.finish_prepare();
        self.ice.notify_gathering_finished();
    }

    fn run_tasks(&mut self) {
        for task in self.tasks.take() {
            trace!("Run task {:?}", task);
            match task {
                Task::ReleaseProfile(p) => self.engine.release_profile(p),
                Task::NotifyEncryptionChanged => {
                    let all_encrypted = self.all_streams_encrypted();
                    self.events
                        .push_back(GroupEvent::EncryptionChanged { all_encrypted });
                }
                Task::AudioRouteChanged(handle, route) => {
                    if self.resolve(handle).is_none() {
                        debug!("Drop audio route change for replaced stream #{}", handle.index);
                        continue;
                    }
                    if let Some(mut ctl) = self.audio_control(handle.index) {
                        ctl.route_changed(route);
                    }
                }
                Task::UpdateIceDestinations(handle) => {
                    let dest = self.ice.destinations(handle.index);
                    let engine = &mut *self.engine;
                    let Some(s) = self
                        .slots
                        .get(handle.index)
                        .filter(|slot| slot.generation == handle.generation)
                        .and_then(|slot| slot.stream.as_ref())
                    else {
                        debug!("Drop ICE destination update for replaced stream #{}", handle.index);
                        continue;
                    };
                    if let (Some((rtp, rtcp)), StreamState::Running) = (dest, s.state()) {
                        info!(
                            "Change {} stream destination: RTP={} RTCP={}",
                            s.stream_type(),
                            Pii(rtp),
                            Pii(rtcp)
                        );
                        engine.update_destinations(s.native(), &RtpDestination { rtp, rtcp });
                    }
                }
                Task::IceRestartNeeded => {
                    self.ice.reset_session();
                    self.ice.notify_restart_needed();
                }
            }
        }
    }

    fn poll_engine_events(&mut self) {
        let mut polled = vec![];
        for s in self.slots.iter().filter_map(|s| s.stream.as_ref()) {
            if s.state() != StreamState::Running {
                continue;
            }
            while let Some(ev) = self.engine.poll_event(s.native()) {
                polled.push((s.index(), ev));
            }
        }
        for (index, ev) in polled {
            self.handle_engine_event(index, ev);
        }
    }

    fn handle_engine_event(&mut self, index: usize, ev: EngineEvent) {
        let Some(s) = self.slots.get_mut(index).and_then(|s| s.stream.as_mut()) else {
            return;
        };
        match ev {
            EngineEvent::ZrtpEncryptionChanged { encrypted } => {
                info!("ZRTP encryption of {} is {}", s, if encrypted { "on" } else { "off" });
                s.set_encrypted(encrypted);
                let main_audio = s.is_main() && s.stream_type() == StreamType::Audio;
                if main_audio && encrypted {
                    self.zrtp_started_fan_out();
                }
                self.tasks.push(Task::NotifyEncryptionChanged);
            }
            EngineEvent::ZrtpSasReady { token, verified } => {
                s.set_auth_token(token.clone(), verified);
                self.events
                    .push_back(GroupEvent::AuthTokenReady { token, verified });
            }
            EngineEvent::DtlsEncryptionChanged { encrypted } => {
                info!("DTLS encryption of {} is {}", s, if encrypted { "on" } else { "off" });
                s.set_encrypted(encrypted);
                self.tasks.push(Task::NotifyEncryptionChanged);
            }
            EngineEvent::TelephoneEvent(n) => match DTMF_CHARS.get(n as usize) {
                Some(c) => {
                    let dtmf = *c as char;
                    s.stats_mut().received_dtmfs.push(dtmf);
                    self.events.push_back(GroupEvent::DtmfReceived { index, dtmf });
                }
                None => warn!("Unsupported telephone event {}", n),
            },
            EngineEvent::Ice(ev) => {
                s.stats_mut().ice_state = self.ice.ice_state(index);
                self.handle_ice_event(ev);
            }
            EngineEvent::VideoBandwidthEstimation { kbps } => {
                if let StreamKind::Video(v) = s.kind_mut() {
                    let rounded = kbps.round() as u32;
                    v.set_estimated_bandwidth(rounded);
                    s.stats_mut().bandwidth.estimated_download = kbps;
                    self.events.push_back(GroupEvent::VideoBandwidthEstimated {
                        index,
                        kbps: rounded,
                    });
                }
            }
            EngineEvent::FirstVideoFrameDecoded => {
                if let StreamKind::Video(v) = s.kind_mut() {
                    if v.set_first_frame_decoded() {
                        self.events
                            .push_back(GroupEvent::FirstVideoFrameDecoded { index });
                    }
                }
            }
        }
    }

    /// Start ZRTP on the streams that waited for the main audio stream.
    fn zrtp_started_fan_out(&mut self) {
        let mut ctx = OfferAnswerContext::new();
        ctx.copy_from(&self.current);
        let engine = &mut *self.engine;
        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            if s.stream_type() == StreamType::Audio || s.state() != StreamState::Running {
                continue;
            }
            let hash = ctx.scope(s.index()).remote_stream().zrtp_hash.clone();
            s.start_zrtp(hash.as_deref(), engine);
        }
    }

    fn report_bandwidth(&mut self) {
        let ice = &self.ice;
        let engine = &*self.engine;
        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            if s.state() != StreamState::Running {
                continue;
            }
            let usage = engine.bandwidth_usage(s.native());
            let index = s.index();
            let stats = s.stats_mut();
            let estimated = stats.bandwidth.estimated_download;
            stats.bandwidth = usage;
            if usage.estimated_download == 0.0 {
                stats.bandwidth.estimated_download = estimated;
            }
            stats.ice_state = ice.ice_state(index);
            debug!(
                "Bandwidth usage for stream #{} [{}]: RTP up/down={:.1}/{:.1} kbit/s, RTCP up/down={:.1}/{:.1} kbit/s",
                index,
                stats.stream_type,
                usage.upload,
                usage.download,
                usage.rtcp_upload,
                usage.rtcp_download
            );
            self.events
                .push_back(GroupEvent::StatsUpdated(s.stats().clone()));
        }
    }

    fn check_media_loss(&mut self, now: Instant) {
        let Some(timeout) = self.config.no_rtp_timeout else {
            return;
        };
        let since = *self.media_loss_ref.get_or_insert(now);
        let engine = &*self.engine;
        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            if !s.media_loss_check() || s.state() != StreamState::Running {
                continue;
            }
            let last = engine.last_rtp_received(s.native()).unwrap_or(since);
            if now.saturating_duration_since(last) > timeout && s.mark_media_lost() {
                warn!("Media lost on {}, no RTP for {:?}", s, timeout);
                self.events
                    .push_back(GroupEvent::MediaLost { index: s.index() });
            }
        }
    }

    /// Send early media to another forked destination too.
    ///
    /// Applies to running streams whose first payload type is the same in the
    /// fork's result.
    pub fn try_early_media_forking(&mut self, ctx: &OfferAnswerContext) {
        let Some(fork) = ctx.result() else {
            return;
        };
        let current = self.current.result().cloned();
        let engine = &mut *self.engine;
        for slot in &mut self.slots {
            let Some(s) = &mut slot.stream else {
                continue;
            };
            if s.state() != StreamState::Running {
                continue;
            }
            let index = s.index();
            let new_desc = fork.stream(index);
            if !new_desc.enabled() || new_desc.dir == Direction::Inactive {
                continue;
            }
            let Some(current) = &current else {
                continue;
            };
            let same_pt = match (current.stream(index).payloads.first(), new_desc.payloads.first()) {
                (Some(a), Some(b)) => a.same_codec(b) && a.number == b.number,
                _ => false,
            };
            if !same_pt {
                debug!("Stream #{} of the fork uses another payload type", index);
                continue;
            }
            match resolve_destination(new_desc, Some(fork)) {
                Some(dest) => s.add_early_media_destination(&dest, engine),
                None => warn!("Cannot resolve early media fork destination of stream #{}", index),
            }
        }
    }

    /// Stop sending to forked early media destinations.
    pub fn finish_early_media_forking(&mut self) {
        let engine = &mut *self.engine;
        for s in self.slots.iter_mut().filter_map(|s| s.stream.as_mut()) {
            s.finish_early_media_forking(engine);
        }
    }

    /// The call session got confirmed.
    pub fn session_confirmed(&mut self, ctx: &OfferAnswerContext) {
        self.ice.session_confirmed(ctx);
        debug!("Session of call {:?} confirmed", self.call_id);
    }

    /// Rebind the sockets of every stream, e.g. after a network change.
    pub fn refresh_sockets(&mut self) {
        let engine = &mut *self.engine;
        for s in self.slots.iter().filter_map(|s| s.stream.as_ref()) {
            engine.refresh_sockets(s.sessions().id);
        }
    }

    /// Audio controls of a stream.
    ///
    /// `None`, with an error logged, if the stream is not an audio stream.
    pub fn audio_control(&mut self, index: usize) -> Option<AudioControl<'_>> {
        let s = self.slots.get_mut(index)?.stream.as_mut()?;
        AudioControl::new(s, &mut *self.engine)
    }

    /// Video controls of a stream.
    ///
    /// `None`, with an error logged, if the stream is not a video stream.
    pub fn video_control(&mut self, index: usize) -> Option<VideoControl<'_>> {
        let s = self.slots.get_mut(index)?.stream.as_mut()?;
        VideoControl::new(s, &mut *self.engine)
    }

    /// Send a character on a real time text stream.
    pub fn send_text(&mut self, index: usize, c: char) -> Result<(), MediaError> {
        let s = self
            .slots
            .get_mut(index)
            .and_then(|s| s.stream.as_mut())
            .ok_or(MediaError::NoSuchStream(index))?;
        if s.state() != StreamState::Running {
            return Err(MediaError::NotRunning(index));
        }
        let native = s.native();
        let StreamKind::Text(t) = s.kind_mut() else {
            return Err(MediaError::WrongCapability(index, StreamType::Text));
        };
        self.engine.send_text_char(native, c)?;
        t.count_sent();
        Ok(())
    }

    /// The audio route changed. Handled on the next turn.
    pub fn audio_route_changed(&mut self, route: AudioRoute) {
        let Some(index) = self.lookup_main_stream(StreamType::Audio).map(|s| s.index()) else {
            return;
        };
        if let Some(handle) = self.stream_handle(index) {
            self.tasks.push(Task::AudioRouteChanged(handle, route));
        }
    }

    /// The ZRTP SAS of the main audio stream.
    pub fn auth_token(&self) -> Option<&str> {
        self.lookup_main_stream(StreamType::Audio)?.auth_token()
    }

    /// Whether the ZRTP SAS was verified.
    pub fn auth_token_verified(&self) -> bool {
        self.lookup_main_stream(StreamType::Audio)
            .map(|s| s.auth_token_verified())
            .unwrap_or(false)
    }

    /// Mark the ZRTP SAS as verified or not.
    pub fn set_auth_token_verified(&mut self, verified: bool) {
        let Some(index) = self.lookup_main_stream(StreamType::Audio).map(|s| s.index()) else {
            return;
        };
        let engine = &mut *self.engine;
        if let Some(s) = self.slots[index].stream.as_mut() {
            s.set_auth_token_verified(verified);
            engine.set_auth_token_verified(s.sessions().id, verified);
        }
    }

    /// Whether every active stream is encrypted. False without active streams.
    pub fn all_streams_encrypted(&self) -> bool {
        let mut active = self
            .streams()
            .filter(|s| s.state() == StreamState::Running)
            .peekable();
        active.peek().is_some() && active.all(|s| s.is_encrypted())
    }

    /// Mean of the current quality ratings, -1.0 if no stream rates.
    pub fn current_quality(&self) -> f32 {
        self.quality(|e, s| e.quality_rating(s.native()))
    }

    /// Mean of the average quality ratings, -1.0 if no stream rates.
    pub fn average_quality(&self) -> f32 {
        self.quality(|e, s| e.average_quality_rating(s.native()))
    }

    fn quality(&self, rating: impl Fn(&dyn MediaEngine, &Stream) -> Option<f32>) -> f32 {
        let ratings: Vec<f32> = self
            .streams()
            .filter(|s| s.state() == StreamState::Running)
            .filter_map(|s| rating(&*self.engine, s))
            .collect();
        if ratings.is_empty() {
            return -1.0;
        }
        ratings.iter().sum::<f32>() / ratings.len() as f32
    }

    /// Whether the running audio streams are all muted.
    pub fn is_muted(&self) -> bool {
        let mut audio = self
            .streams()
            .filter(|s| s.stream_type() == StreamType::Audio && s.state() == StreamState::Running)
            .peekable();
        audio.peek().is_some() && audio.all(|s| s.is_muted())
    }

    /// Whether every running stream uses AVPF.
    pub fn avpf_enabled(&self) -> bool {
        let mut running = self
            .streams()
            .filter(|s| s.state() == StreamState::Running)
            .peekable();
        running.peek().is_some() && running.all(|s| s.avpf_enabled())
    }

    /// Interval of AVPF regular reports, zero when AVPF is off.
    pub fn avpf_rr_interval(&self) -> Duration {
        if self.avpf_enabled() {
            self.config.avpf_rr_interval
        } else {
            Duration::ZERO
        }
    }

    /// Number of running streams.
    pub fn active_streams_count(&self) -> usize {
        self.streams()
            .filter(|s| s.state() == StreamState::Running)
            .count()
    }

    /// Whether at least one stream runs.
    pub fn is_started(&self) -> bool {
        self.active_streams_count() > 0
    }

    /// Whether a local port is taken by a stream of any call.
    pub fn is_port_used(&self, port: u16) -> bool {
        self.config.port_registry.is_used(port)
    }
}

/// Take a stream out of its bundle, destroying the bundle it owned.
fn leave_bundle(slots: &mut [Slot], index: usize, engine: &mut dyn MediaEngine) {
    let Some(s) = slots.get_mut(index).and_then(|s| s.stream.as_mut()) else {
        return;
    };
    let sessions = s.sessions().id;
    match std::mem::take(&mut s.bundle) {
        BundleMembership::None => {}
        BundleMembership::Owner(b) => {
            info!("Stream #{} leaves the RTP bundle it owned", index);
            engine.bundle_destroy(b.id());
        }
        BundleMembership::Secondary { owner } => {
            info!("Stream #{} leaves the RTP bundle of stream #{}", index, owner);
            let bundle = slots
                .get_mut(owner)
                .and_then(|s| s.stream.as_mut())
                .and_then(|s| s.bundle.bundle_mut());
            if let Some(b) = bundle {
                b.remove_member(index);
                engine.bundle_remove(b.id(), sessions);
            }
        }
    }
}

impl std::fmt::Debug for StreamsGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamsGroup")
            .field("call_id", &self.call_id)
            .field("slots", &self.slots)
            .field("current_state", &self.current_state)
            .field("ice", &self.ice)
            .field("finished", &self.finished)
            .finish()
    }
}
