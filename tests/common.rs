#![allow(unused)]
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Once;
use std::time::Instant;

use callstreams::mixer::CallId;
use callstreams::stats::BandwidthUsage;
use callstreams::{BundleId, Direction, DtlsRole, EngineError, EngineEvent, MediaConfig};
use callstreams::{MediaDescription, MediaEncryption, MediaEngine, NativeStreamId};
use callstreams::{OfferAnswerContext, PayloadType, PortConfig, ProfileId, Proto, RtpDestination};
use callstreams::{RtpProfile, SessionState, SessionsId, SrtpSuite, StartParams};
use callstreams::{StreamDescription, StreamType, StreamsGroup, TransportSessions};

/// What the engine saw and what it answers with.
#[derive(Debug)]
pub struct EngineState {
    /// Every call, e.g. `start_stream 1`.
    pub calls: Vec<String>,
    pub next_id: u64,
    pub next_port: u16,
    pub started: Vec<(NativeStreamId, StartParams)>,
    pub events: HashMap<NativeStreamId, VecDeque<EngineEvent>>,
    pub dtls_fingerprint: Option<String>,
    pub zrtp_supported: bool,
    pub encrypted: HashSet<SessionsId>,
    pub quality: HashMap<NativeStreamId, f32>,
    pub last_rtp: Option<Instant>,
    pub local_addrs: Vec<IpAddr>,
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState {
            calls: vec![],
            next_id: 1,
            next_port: 7078,
            started: vec![],
            events: HashMap::new(),
            dtls_fingerprint: Some("sha-256 AB:CD:EF".into()),
            zrtp_supported: true,
            encrypted: HashSet::new(),
            quality: HashMap::new(),
            last_rtp: None,
            local_addrs: vec!["192.168.1.2".parse().unwrap()],
        }
    }
}

impl EngineState {
    /// Number of calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn has(&self, call: &str) -> bool {
        self.calls.iter().any(|c| c == call)
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.started.clear();
    }

    pub fn queue_event(&mut self, id: NativeStreamId, ev: EngineEvent) {
        self.events.entry(id).or_default().push_back(ev);
    }
}

/// Engine recording every call into a shared [`EngineState`].
///
/// Sessions and native streams get the same number, `SessionsId(n)` goes
/// with `NativeStreamId(n)`.
pub struct TestEngine(pub Rc<RefCell<EngineState>>);

impl TestEngine {
    pub fn new() -> (Self, Rc<RefCell<EngineState>>) {
        let state = Rc::new(RefCell::new(EngineState::default()));
        (TestEngine(state.clone()), state)
    }

    fn log(&self, call: String) {
        self.0.borrow_mut().calls.push(call);
    }
}

impl MediaEngine for TestEngine {
    fn create_sessions(
        &mut self,
        kind: StreamType,
        ports: &PortConfig,
    ) -> Result<TransportSessions, EngineError> {
        let mut s = self.0.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        let rtp_port = match ports.rtp_port {
            Some(p) => p,
            None => {
                let p = s.next_port;
                s.next_port += 2;
                p
            }
        };
        s.calls.push(format!("create_sessions {} {}", id, kind));
        Ok(TransportSessions {
            id: SessionsId(id),
            rtp_port,
            rtcp_port: rtp_port + 1,
        })
    }

    fn release_sessions(&mut self, sessions: SessionsId) {
        self.log(format!("release_sessions {}", sessions.0));
    }

    fn create_stream(&mut self, _kind: StreamType, sessions: SessionsId) -> NativeStreamId {
        self.log(format!("create_stream {}", sessions.0));
        NativeStreamId(sessions.0)
    }

    fn destroy_stream(&mut self, id: NativeStreamId) {
        self.log(format!("destroy_stream {}", id.0));
    }

    fn create_profile(&mut self, _profile: &RtpProfile) -> ProfileId {
        let mut s = self.0.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        s.calls.push(format!("create_profile {}", id));
        ProfileId(id)
    }

    fn release_profile(&mut self, profile: ProfileId) {
        self.log(format!("release_profile {}", profile.0));
    }

    fn set_profile(&mut self, id: NativeStreamId, profile: ProfileId) {
        self.log(format!("set_profile {} {}", id.0, profile.0));
    }

    fn start_stream(&mut self, id: NativeStreamId, params: &StartParams) -> Result<(), EngineError> {
        let mut s = self.0.borrow_mut();
        s.calls.push(format!("start_stream {}", id.0));
        s.started.push((id, params.clone()));
        Ok(())
    }

    fn stop_stream(&mut self, id: NativeStreamId) {
        self.log(format!("stop_stream {}", id.0));
    }

    fn update_destinations(&mut self, id: NativeStreamId, dest: &RtpDestination) {
        self.log(format!("update_destinations {} {}", id.0, dest.rtp));
    }

    fn add_aux_destination(&mut self, id: NativeStreamId, dest: &RtpDestination) {
        self.log(format!("add_aux_destination {} {}", id.0, dest.rtp));
    }

    fn clear_aux_destinations(&mut self, id: NativeStreamId) {
        self.log(format!("clear_aux_destinations {}", id.0));
    }

    fn set_symmetric_rtp(&mut self, id: NativeStreamId, enabled: bool) {
        self.log(format!("set_symmetric_rtp {} {}", id.0, enabled));
    }

    fn set_muted(&mut self, id: NativeStreamId, muted: bool) {
        self.log(format!("set_muted {} {}", id.0, muted));
    }

    fn supports_encryption(&self, enc: MediaEncryption) -> bool {
        enc != MediaEncryption::Zrtp || self.0.borrow().zrtp_supported
    }

    fn set_srtp_recv_key(
        &mut self,
        sessions: SessionsId,
        _suite: SrtpSuite,
        key: &str,
    ) -> Result<(), EngineError> {
        self.log(format!("set_srtp_recv_key {} {}", sessions.0, key));
        Ok(())
    }

    fn set_srtp_send_key(
        &mut self,
        sessions: SessionsId,
        _suite: SrtpSuite,
        key: &str,
    ) -> Result<(), EngineError> {
        self.log(format!("set_srtp_send_key {} {}", sessions.0, key));
        Ok(())
    }

    fn start_zrtp(
        &mut self,
        id: NativeStreamId,
        _peer_hello_hash: Option<&str>,
    ) -> Result<(), EngineError> {
        self.log(format!("start_zrtp {}", id.0));
        Ok(())
    }

    fn dtls_fingerprint(&mut self) -> Result<String, EngineError> {
        self.0
            .borrow()
            .dtls_fingerprint
            .clone()
            .ok_or(EngineError::NoCertificate)
    }

    fn set_dtls_peer_fingerprint(&mut self, sessions: SessionsId, fingerprint: &str) {
        self.log(format!("set_dtls_peer_fingerprint {} {}", sessions.0, fingerprint));
    }

    fn start_dtls(&mut self, sessions: SessionsId, role: DtlsRole) {
        self.log(format!("start_dtls {} {:?}", sessions.0, role));
    }

    fn is_encrypted(&self, sessions: SessionsId) -> bool {
        self.0.borrow().encrypted.contains(&sessions)
    }

    fn set_ice_check_list(&mut self, id: NativeStreamId, active: bool) {
        self.log(format!("set_ice_check_list {} {}", id.0, active));
    }

    fn local_addresses(&self) -> Result<Vec<IpAddr>, EngineError> {
        Ok(self.0.borrow().local_addrs.clone())
    }

    fn local_ssrc(&self, sessions: SessionsId) -> u32 {
        sessions.0 as u32 * 1000
    }

    fn bundle_create(&mut self, owner: SessionsId, mid: &str) -> BundleId {
        let mut s = self.0.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        s.calls.push(format!("bundle_create {} {} {}", id, owner.0, mid));
        BundleId(id)
    }

    fn bundle_add(&mut self, bundle: BundleId, sessions: SessionsId, mid: &str) {
        self.log(format!("bundle_add {} {} {}", bundle.0, sessions.0, mid));
    }

    fn bundle_remove(&mut self, bundle: BundleId, sessions: SessionsId) {
        self.log(format!("bundle_remove {} {}", bundle.0, sessions.0));
    }

    fn bundle_destroy(&mut self, bundle: BundleId) {
        self.log(format!("bundle_destroy {}", bundle.0));
    }

    fn mixer_connect(&mut self, id: NativeStreamId, kind: StreamType, recv_only: bool) {
        self.log(format!("mixer_connect {} {} {}", id.0, kind, recv_only));
    }

    fn mixer_disconnect(&mut self, id: NativeStreamId) {
        self.log(format!("mixer_disconnect {}", id.0));
    }

    fn play_file(&mut self, id: NativeStreamId, path: &str) -> Result<(), EngineError> {
        self.log(format!("play_file {} {}", id.0, path));
        Ok(())
    }

    fn poll_event(&mut self, id: NativeStreamId) -> Option<EngineEvent> {
        self.0.borrow_mut().events.get_mut(&id)?.pop_front()
    }

    fn quality_rating(&self, id: NativeStreamId) -> Option<f32> {
        self.0.borrow().quality.get(&id).copied()
    }

    fn bandwidth_usage(&self, _id: NativeStreamId) -> BandwidthUsage {
        BandwidthUsage {
            upload: 64.0,
            download: 64.0,
            ..Default::default()
        }
    }

    fn last_rtp_received(&self, _id: NativeStreamId) -> Option<Instant> {
        self.0.borrow().last_rtp
    }

    fn send_text_char(&mut self, id: NativeStreamId, c: char) -> Result<(), EngineError> {
        self.log(format!("send_text_char {} {}", id.0, c));
        Ok(())
    }
}

pub fn pcmu() -> PayloadType {
    PayloadType::new(0, "PCMU", 8000)
}

pub fn telephone_event() -> PayloadType {
    PayloadType::new(101, "telephone-event", 8000)
}

pub fn stream(kind: StreamType, port: u16) -> StreamDescription {
    let mut s = StreamDescription::new(kind, Proto::RtpAvp);
    s.rtp_port = port;
    match kind {
        StreamType::Audio => {
            s.payloads.push(pcmu());
            s.payloads.push(telephone_event());
        }
        StreamType::Video => s.payloads.push(PayloadType::new(96, "VP8", 90000)),
        StreamType::Text => s.payloads.push(PayloadType::new(98, "t140", 1000)),
        StreamType::Other => {}
    }
    s
}

pub fn audio(port: u16) -> StreamDescription {
    stream(StreamType::Audio, port)
}

pub fn video(port: u16) -> StreamDescription {
    stream(StreamType::Video, port)
}

pub fn text(port: u16) -> StreamDescription {
    stream(StreamType::Text, port)
}

pub fn media(addr: &str, streams: Vec<StreamDescription>) -> MediaDescription {
    let mut md = MediaDescription::new(addr);
    md.streams = streams;
    md
}

/// Group over a [`TestEngine`].
pub fn group(config: MediaConfig) -> (StreamsGroup, Rc<RefCell<EngineState>>) {
    let (engine, state) = TestEngine::new();
    (StreamsGroup::new(CallId(1), config, Box::new(engine)), state)
}

/// One offer/answer round driven the way the call session does it.
///
/// `local` is ours, `remote` the peer's. The result is `remote` with the
/// directions seen from our side, which is enough for these tests.
pub fn round(
    group: &mut StreamsGroup,
    local: MediaDescription,
    remote: MediaDescription,
    local_is_offerer: bool,
    target: SessionState,
) -> OfferAnswerContext {
    let mut ctx = OfferAnswerContext::new();
    ctx.set_local(local);
    ctx.set_local_is_offerer(local_is_offerer);
    if !local_is_offerer {
        ctx.set_remote(remote.clone());
    }
    group.create_streams(&ctx);
    group.fill_local_media_description(&mut ctx);
    if !group.prepare() {
        group.finish_prepare();
    }
    ctx.set_remote(remote.clone());
    ctx.set_result(result_of(&remote));
    group.render(&ctx, target);
    ctx
}

/// The result of a round as seen from our side of `remote`.
pub fn result_of(remote: &MediaDescription) -> MediaDescription {
    let mut md = remote.clone();
    for s in &mut md.streams {
        s.dir = s.dir.invert();
    }
    md
}

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}
