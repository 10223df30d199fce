use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};

use crate::config::MediaConfig;
use crate::context::OfferAnswerContext;
use crate::desc::{MediaDescription, StreamDescription};
use crate::engine::EngineError;
use crate::stats::IceState;
use crate::util::Pii;

use super::{preferred_stun_server_addr, Candidate, CandidateKind, CheckListState};
use super::{IceRole, IceSession, IceSessionState, LosingPair, NatPolicy, SelectedPair};
use super::{TurnTransport, COMPONENT_RTCP, COMPONENT_RTP};

/// Receives notifications from the [`IceService`].
///
/// Implemented by the call session layer, which for instance sends a deferred
/// SIP response once gathering completes.
pub trait IceServiceListener {
    /// Local candidates are gathered (or gathering gave up).
    fn on_gathering_finished(&mut self);
    /// Connectivity checks are done and at least one check list completed.
    fn on_ice_completed(&mut self);
    /// Pairs from `a=remote-candidates` have been checked.
    fn on_losing_pairs_completed(&mut self);
    /// The engine requests an ICE restart (e.g. after a network change).
    fn on_ice_restart_needed(&mut self);
}

/// TURN details for a gathering request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnParams {
    /// Transport to the TURN server.
    pub transport: TurnTransport,
    /// Common name expected in the TURN server certificate.
    pub common_name: String,
}

/// Work for the external ICE/NAT machinery.
///
/// Polled with [`crate::StreamsGroup::poll_ice_request`]. Results come back as
/// [`IceEvent`] through [`crate::StreamsGroup::handle_ice_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceRequest {
    /// Resolve the STUN server name. Answer with [`IceEvent::StunServerResolved`].
    ResolveStunServer {
        /// The configured `host[:port]`.
        server: String,
    },
    /// Refresh the TURN credentials. Answer with [`IceEvent::TurnConfigurationRefreshed`].
    RefreshTurnConfiguration {
        /// Where to fetch the configuration.
        endpoint: String,
    },
    /// Gather server reflexive (and relayed) candidates for every check list
    /// whose candidates are not yet gathered. Answer with [`IceEvent::GatheringFinished`].
    GatherCandidates {
        /// The STUN server address to use.
        stun_server: SocketAddr,
        /// Set when relay candidates are wanted.
        turn: Option<TurnParams>,
    },
    /// Start connectivity checks on the session.
    StartConnectivityChecks {
        /// Our role.
        role: IceRole,
    },
    /// The session was reset, the engine should drop its pairs.
    SessionRestarted {
        /// Our role after the restart.
        role: IceRole,
    },
    /// The session is gone, drop everything.
    SessionDeleted,
    /// Cancel the pending asynchronous operation (resolution, refresh or gathering).
    CancelAsync,
}

/// Events from the external ICE/NAT machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceEvent {
    /// Answer to [`IceRequest::GatherCandidates`].
    GatheringFinished {
        /// False if the STUN server did not answer.
        success: bool,
        /// Gathered candidates, by stream index.
        candidates: Vec<(usize, Candidate)>,
    },
    /// The default candidate of a check list was verified. DTLS may start.
    DefaultCandidateVerified {
        /// Stream index.
        index: usize,
    },
    /// Checks of one check list finished.
    CheckListProcessingFinished {
        /// Stream index.
        index: usize,
        /// Selected RTP pair, `None` if the check list failed.
        rtp: Option<SelectedPair>,
        /// Selected RTCP pair, if any.
        rtcp: Option<SelectedPair>,
    },
    /// Losing pairs of a check list were checked.
    LosingPairsCompleted {
        /// Stream index.
        index: usize,
    },
    /// The engine wants an ICE restart.
    RestartNeeded,
    /// Answer to [`IceRequest::ResolveStunServer`]. Empty on failure.
    StunServerResolved(Vec<SocketAddr>),
    /// Answer to [`IceRequest::RefreshTurnConfiguration`].
    TurnConfigurationRefreshed {
        /// Whether the refresh succeeded.
        success: bool,
    },
}

/// What the group has to do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IceEventOutcome {
    Nothing,
    /// Finish preparing, then [`IceService::notify_gathering_finished`].
    GatheringFinished,
    /// An asynchronous step before gathering finished, gather again.
    ResumeGathering,
    /// Start DTLS on a stream.
    StartDtls(usize),
    /// Schedule a deferred restart notification.
    RestartNeeded,
}

/// What ICE needs to know about one stream of the group.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IceStreamSlot {
    pub index: usize,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub transport_owner: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    StunResolution,
    TurnRefresh,
    Gathering,
}

enum Gather {
    Started,
    NotStarted,
    Failed,
}

/// Drives the ICE session of one call through the offer/answer rounds.
///
/// The session exists only while ICE is in use. It is created on the first
/// [`IceService::create_streams`] if the NAT policy enables ICE, and deleted
/// when the remote description comes without ICE attributes, when no check
/// list remains, or on [`IceService::finish`]. Once deleted by a negotiation
/// it is not created again, unless late ICE is allowed.
pub struct IceService {
    session: Option<IceSession>,
    gathering_finished: bool,
    ice_was_disabled: bool,
    allow_late_ice: bool,
    integrity_check: bool,
    dont_default_to_stun: bool,
    per_stream_creds: bool,
    ipv6_enabled: bool,
    nat_policy: NatPolicy,
    stun_addrs: Option<Vec<SocketAddr>>,
    turn_refreshed: bool,
    pending: Option<PendingOp>,
    requests: VecDeque<IceRequest>,
    listener: Option<Box<dyn IceServiceListener>>,
}

impl std::fmt::Debug for IceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceService")
            .field("session", &self.session)
            .field("gathering_finished", &self.gathering_finished)
            .field("ice_was_disabled", &self.ice_was_disabled)
            .field("pending", &self.pending)
            .finish()
    }
}

impl IceService {
    pub(crate) fn new(config: &MediaConfig) -> Self {
        IceService {
            session: None,
            gathering_finished: false,
            ice_was_disabled: false,
            allow_late_ice: config.allow_late_ice,
            integrity_check: config.ice_message_integrity_check,
            dont_default_to_stun: config.dont_default_to_stun_candidates,
            per_stream_creds: config.ice_credentials_per_stream,
            ipv6_enabled: config.ipv6_enabled,
            nat_policy: config.nat_policy.clone(),
            stun_addrs: None,
            turn_refreshed: false,
            pending: None,
            requests: VecDeque::new(),
            listener: None,
        }
    }

    /// Set the listener receiving completion notifications.
    pub fn set_listener(&mut self, listener: Box<dyn IceServiceListener>) {
        self.listener = Some(listener);
    }

    /// Whether there is an ICE session.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether connectivity checks are running.
    pub fn is_running(&self) -> bool {
        matches!(&self.session, Some(s) if s.state() == IceSessionState::Running)
    }

    /// Whether ICE has nothing left to do. True without a session.
    pub fn has_completed(&self) -> bool {
        match &self.session {
            None => true,
            Some(s) => s.state() == IceSessionState::Completed,
        }
    }

    /// Whether the session is done and at least one check list completed.
    pub fn has_completed_check_list(&self) -> bool {
        match &self.session {
            Some(s) => {
                matches!(
                    s.state(),
                    IceSessionState::Completed | IceSessionState::Failed
                ) && s.has_completed_check_list()
            }
            None => false,
        }
    }

    /// Whether we are the controlling agent.
    pub fn is_controlling(&self) -> bool {
        matches!(&self.session, Some(s) if s.role() == IceRole::Controlling)
    }

    /// The session, if ICE is active.
    pub fn session(&self) -> Option<&IceSession> {
        self.session.as_ref()
    }

    /// Whether ICE was turned off by a previous negotiation.
    pub fn ice_was_disabled(&self) -> bool {
        self.ice_was_disabled
    }

    /// Whether a check list exists for the stream index.
    pub fn has_check_list(&self, index: usize) -> bool {
        matches!(&self.session, Some(s) if s.has_check_list(index))
    }

    /// ICE state of a stream, as reported in the call statistics.
    pub fn ice_state(&self, index: usize) -> IceState {
        let Some(cl) = self.session.as_ref().and_then(|s| s.check_list(index)) else {
            return IceState::NotActivated;
        };
        match cl.state() {
            CheckListState::Failed => IceState::Failed,
            CheckListState::Running => IceState::InProgress,
            CheckListState::Completed => match cl.selected_kind() {
                Some(CandidateKind::Host) => IceState::HostConnection,
                Some(CandidateKind::ServerReflexive) | Some(CandidateKind::PeerReflexive) => {
                    IceState::ReflexiveConnection
                }
                Some(CandidateKind::Relayed) => IceState::RelayConnection,
                None => IceState::InProgress,
            },
        }
    }

    /// The selected or default RTP/RTCP addresses of a stream's check list.
    pub(crate) fn destinations(&self, index: usize) -> Option<(SocketAddr, SocketAddr)> {
        let cl = self.session.as_ref()?.check_list(index)?;
        if cl.state() != CheckListState::Completed {
            return None;
        }
        let rtp = cl.selected_pair(COMPONENT_RTP)?.remote;
        let rtcp = cl
            .selected_pair(COMPONENT_RTCP)
            .map(|p| p.remote)
            .unwrap_or(rtp);
        Some((rtp, rtcp))
    }

    /// Whether the description has ICE credentials at session or stream level.
    pub fn ice_found_in_media_description(md: &MediaDescription) -> bool {
        md.ice_creds().is_some() || md.streams.iter().any(|s| s.ice_creds().is_some())
    }

    pub(crate) fn poll_request(&mut self) -> Option<IceRequest> {
        self.requests.pop_front()
    }

    fn check_session(&mut self, role: IceRole, prefer_ipv6: bool) {
        if !self.nat_policy.ice_enabled() {
            return;
        }
        if self.session.is_none() && self.ice_was_disabled && !self.allow_late_ice {
            // Disabled by a previous negotiation.
            return;
        }
        if self.session.is_some() {
            return;
        }

        let mut session = IceSession::new(role, self.integrity_check);
        if self.dont_default_to_stun {
            session.set_default_candidate_types(&[CandidateKind::Relayed, CandidateKind::Host]);
        }
        session.set_prefer_ipv6_defaults(prefer_ipv6);
        info!("Created ICE session, role {:?}", role);
        self.session = Some(session);
    }

    /// Create the session if needed and align the check lists with the streams.
    pub(crate) fn create_streams(&mut self, ctx: &OfferAnswerContext, slots: &[IceStreamSlot]) {
        let role = if ctx.local_is_offerer() {
            IceRole::Controlling
        } else {
            IceRole::Controlled
        };
        let prefer_ipv6 = ctx.local().map(|md| md.addr.contains(':')).unwrap_or(false);
        self.check_session(role, prefer_ipv6);

        let Some(session) = &mut self.session else {
            return;
        };

        for slot in slots {
            let index = slot.index;
            let view = ctx.scope(index);
            let mut active = view.local_stream().enabled();

            if !ctx.local_is_offerer() {
                let owner = ctx.remote().and_then(|md| md.transport_owner_index(index));
                if matches!(owner, Some(o) if o != index) {
                    info!(
                        "Stream #{} is part of a bundle as secondary stream, ICE not needed",
                        index
                    );
                    active = false;
                }
            } else if !slot.transport_owner {
                info!(
                    "Stream #{} is currently part of a bundle as secondary stream, ICE not needed",
                    index
                );
                active = false;
            }

            let exists = session.has_check_list(index);
            if !exists && active {
                session.add_check_list(index);
                info!("Created new ICE check list for stream #{}", index);
            } else if exists && !active {
                session.remove_check_list(index);
                info!("Removed ICE check list of stream #{}", index);
            }
        }

        if !ctx.local_is_offerer() {
            if let Some(remote) = ctx.remote() {
                // This may delete the session.
                self.update_from_remote(ctx.local(), remote, true);
            }
        }
        if self.session.is_none() {
            self.ice_was_disabled = true;
        }
    }

    /// Start what is needed before candidates are known.
    ///
    /// Returns true while asynchronous work is in flight, the caller then waits
    /// for the gathering to finish.
    pub(crate) fn prepare<F>(&mut self, local_addrs: F, slots: &[IceStreamSlot]) -> bool
    where
        F: FnOnce() -> Result<Vec<IpAddr>, EngineError>,
    {
        if self.session.is_none() {
            return false;
        }
        if let Some(endpoint) = self.nat_policy.turn_configuration_endpoint() {
            if !self.turn_refreshed {
                info!("Refreshing TURN configuration before gathering");
                self.requests.push_back(IceRequest::RefreshTurnConfiguration {
                    endpoint: endpoint.to_string(),
                });
                self.pending = Some(PendingOp::TurnRefresh);
                return true;
            }
        }
        self.need_ice_gathering(local_addrs, slots)
    }

    /// Gather if the candidates are not there yet. True if gathering is in flight.
    pub(crate) fn need_ice_gathering<F>(&mut self, local_addrs: F, slots: &[IceStreamSlot]) -> bool
    where
        F: FnOnce() -> Result<Vec<IpAddr>, EngineError>,
    {
        let Some(session) = &self.session else {
            return false;
        };
        if session.candidates_gathered() {
            return false;
        }
        match self.gather_candidates(local_addrs, slots) {
            Gather::Started => true,
            Gather::NotStarted => false,
            Gather::Failed => {
                self.delete_session();
                self.ice_was_disabled = true;
                false
            }
        }
    }

    fn gather_candidates<F>(&mut self, local_addrs: F, slots: &[IceStreamSlot]) -> Gather
    where
        F: FnOnce() -> Result<Vec<IpAddr>, EngineError>,
    {
        let mut stun_addr = None;
        if self.nat_policy.stun_server_activated() {
            match &self.stun_addrs {
                None => {
                    let server = self.nat_policy.stun_server().unwrap_or_default().to_string();
                    debug!("Resolving STUN server {}", server);
                    self.requests
                        .push_back(IceRequest::ResolveStunServer { server });
                    self.pending = Some(PendingOp::StunResolution);
                    return Gather::Started;
                }
                Some(addrs) => {
                    stun_addr = preferred_stun_server_addr(addrs);
                    if stun_addr.is_none() {
                        warn!("Failed to resolve STUN server for ICE gathering, continuing without STUN");
                    }
                }
            }
        } else {
            warn!("ICE is used without STUN server");
        }

        let addrs = match local_addrs() {
            Ok(v) => v,
            Err(e) => {
                error!("Cannot fetch local addresses for ICE: {}", e);
                return Gather::Failed;
            }
        };
        self.gather_local_candidates(&addrs, slots);

        match stun_addr {
            Some(stun_server) => {
                let server = self.nat_policy.stun_server().unwrap_or_default();
                let turn = self.nat_policy.turn_enabled().then(|| TurnParams {
                    transport: self.nat_policy.turn_transport(),
                    common_name: self
                        .nat_policy
                        .stun_server_host()
                        .unwrap_or_default()
                        .to_string(),
                });
                info!(
                    "ICE: gathering candidates from [{}] using {}",
                    server,
                    if turn.is_some() { "TURN" } else { "STUN" }
                );
                self.requests.push_back(IceRequest::GatherCandidates {
                    stun_server,
                    turn,
                });
                self.pending = Some(PendingOp::Gathering);
                Gather::Started
            }
            None => {
                info!("ICE: bypass candidates gathering");
                if let Some(session) = &mut self.session {
                    let indexes: Vec<_> = session.check_list_indexes().collect();
                    for i in indexes {
                        if let Some(cl) = session.check_list_mut(i) {
                            cl.set_gathered();
                        }
                    }
                }
                self.gathering_finished();
                Gather::NotStarted
            }
        }
    }

    fn gather_local_candidates(&mut self, addrs: &[IpAddr], slots: &[IceStreamSlot]) {
        let Some(session) = &mut self.session else {
            return;
        };
        for slot in slots {
            let Some(cl) = session.check_list_mut(slot.index) else {
                continue;
            };
            if cl.state() == CheckListState::Completed || cl.candidates_gathered() {
                continue;
            }
            for ip in addrs {
                if ip.is_ipv6() && !self.ipv6_enabled {
                    continue;
                }
                let ports = [(slot.rtp_port, COMPONENT_RTP), (slot.rtcp_port, COMPONENT_RTCP)];
                for (port, component) in ports {
                    match Candidate::host(SocketAddr::new(*ip, port), component) {
                        Ok(c) => {
                            trace!("Add local host candidate {:?}", Pii(&c));
                            cl.add_local_candidate(c);
                        }
                        Err(e) => debug!("Skip local address {}: {}", Pii(ip), e),
                    }
                }
            }
        }
    }

    fn gathering_finished(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.pending = None;
        self.gathering_finished = true;
    }

    pub(crate) fn finish_prepare(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.gathering_finished();
    }

    pub(crate) fn notify_gathering_finished(&mut self) {
        if let Some(l) = &mut self.listener {
            l.on_gathering_finished();
        }
    }

    pub(crate) fn notify_restart_needed(&mut self) {
        if let Some(l) = &mut self.listener {
            l.on_ice_restart_needed();
        }
    }

    /// Overlay ICE attributes onto the local description.
    pub(crate) fn fill_local_media_description(&mut self, ctx: &mut OfferAnswerContext) {
        if self.session.is_none() {
            return;
        }

        if self.gathering_finished {
            let remote = ctx.remote_rc();
            if let (Some(local), Some(remote)) = (ctx.local(), remote.as_deref()) {
                self.clear_unused_candidates(local, remote, ctx.local_is_offerer());
            }
            if let Some(session) = &mut self.session {
                session.compute_foundations();
                session.eliminate_redundant_candidates();
                session.choose_default_candidates();
            }
            self.gathering_finished = false;
        }

        if let Some(md) = ctx.local_mut() {
            self.update_local_media_description(md);
        }
    }

    fn update_local_media_description(&self, desc: &mut MediaDescription) {
        let Some(session) = &self.session else {
            return;
        };

        if session.state() == IceSessionState::Completed {
            let first = (0..desc.streams.len()).find_map(|i| session.check_list(i));
            match first.and_then(|cl| cl.selected_pair(COMPONENT_RTP)) {
                Some(p) => desc.addr = p.local.ip().to_string(),
                None => warn!("If ICE has completed successfully, a selected pair should be set"),
            }
        }

        if !self.per_stream_creds {
            desc.ice_ufrag = session.local_creds().ufrag.clone();
            desc.ice_pwd = session.local_creds().pass.clone();
        }

        let (session_ufrag, session_pwd) = (desc.ice_ufrag.clone(), desc.ice_pwd.clone());
        for (i, stream) in desc.streams.iter_mut().enumerate() {
            let Some(cl) = session.check_list(i) else {
                continue;
            };
            if !stream.enabled() || stream.rtp_port == 0 {
                continue;
            }

            let completed = cl.state() == CheckListState::Completed;
            let (rtp, rtcp) = if completed {
                (
                    cl.selected_pair(COMPONENT_RTP).map(|p| p.local),
                    cl.selected_pair(COMPONENT_RTCP).map(|p| p.local),
                )
            } else {
                (
                    cl.default_local_candidate(COMPONENT_RTP).map(|c| c.addr()),
                    cl.default_local_candidate(COMPONENT_RTCP).map(|c| c.addr()),
                )
            };
            match rtp {
                Some(rtp) => {
                    let rtcp = rtcp.unwrap_or(rtp);
                    stream.rtp_addr = rtp.ip().to_string();
                    stream.rtp_port = rtp.port();
                    stream.rtcp_addr = rtcp.ip().to_string();
                    stream.rtcp_port = rtcp.port();
                }
                None => {
                    stream.rtp_addr.clear();
                    stream.rtcp_addr.clear();
                }
            }

            let creds = cl.local_creds();
            if self.per_stream_creds || creds.pass != session_pwd {
                stream.ice_pwd = creds.pass.clone();
            } else {
                stream.ice_pwd.clear();
            }
            if self.per_stream_creds || creds.ufrag != session_ufrag {
                stream.ice_ufrag = creds.ufrag.clone();
            } else {
                stream.ice_ufrag.clear();
            }

            stream.ice_mismatch = cl.is_mismatch();

            if matches!(
                cl.state(),
                CheckListState::Running | CheckListState::Completed
            ) {
                stream.ice_candidates = cl
                    .local_candidates()
                    .iter()
                    .filter(|c| {
                        // Once completed, only the candidates matching the
                        // default destination of their component remain.
                        !completed || is_default_of(stream, c)
                    })
                    .cloned()
                    .collect();
            }

            stream.ice_remote_candidates.clear();
            if completed && session.role() == IceRole::Controlling {
                match cl.selected_pair(COMPONENT_RTP) {
                    Some(p) => {
                        stream.ice_remote_candidates.push(p.remote);
                        if let Some(p) = cl.selected_pair(COMPONENT_RTCP) {
                            stream.ice_remote_candidates.push(p.remote);
                        }
                    }
                    None => error!(
                        "Selected remote candidates should be present if the check list is completed"
                    ),
                }
            }
        }
    }

    fn clear_unused_candidates(
        &mut self,
        local: &MediaDescription,
        remote: &MediaDescription,
        local_is_offerer: bool,
    ) {
        let Some(session) = &mut self.session else {
            return;
        };
        let n = local.streams.len().min(remote.streams.len());
        for i in 0..n {
            let Some(cl) = session.check_list_mut(i) else {
                continue;
            };
            let (l, r) = (&local.streams[i], &remote.streams[i]);
            if (local_is_offerer && r.rtcp_mux && l.rtcp_mux) || (!local_is_offerer && r.rtcp_mux) {
                cl.remove_rtcp_candidates();
            }
        }
    }

    /// Apply the ICE attributes of the remote description.
    ///
    /// `is_offer` is true when `remote` is an offer.
    pub(crate) fn update_from_remote(
        &mut self,
        local: Option<&MediaDescription>,
        remote: &MediaDescription,
        is_offer: bool,
    ) {
        if self.session.is_none() {
            return;
        }

        if !Self::ice_found_in_media_description(remote) {
            info!("Remote description has no ICE attributes, deleting ICE session");
            self.delete_session();
            return;
        }

        let restarted = self.check_for_restart_and_set_remote_credentials(remote, is_offer);
        self.create_check_lists_and_parse(remote, restarted);

        let Some(session) = &mut self.session else {
            return;
        };
        for (i, s) in remote.streams.iter().enumerate() {
            // rtp_port 0 is also a secondary stream of a bundle.
            if session.has_check_list(i) && (!s.enabled() || s.rtp_port == 0) {
                session.remove_check_list(i);
                info!("Removed ICE check list of stream #{}, not active remotely", i);
            }
        }

        if let Some(local) = local {
            self.clear_unused_candidates(local, remote, !is_offer);
        }

        let Some(session) = &mut self.session else {
            return;
        };
        session.check_mismatch();
        if session.check_list_count() == 0 {
            self.delete_session();
        }
    }

    fn check_for_restart_and_set_remote_credentials(
        &mut self,
        md: &MediaDescription,
        is_offer: bool,
    ) -> bool {
        let role = if is_offer {
            IceRole::Controlled
        } else {
            IceRole::Controlling
        };
        let mut restarted = false;

        let has_list_with_wildcard = {
            let Some(session) = &self.session else {
                return false;
            };
            md.streams
                .iter()
                .enumerate()
                .any(|(i, s)| session.has_check_list(i) && s.rtp_addr == "0.0.0.0")
        };
        if md.has_wildcard_addr() || has_list_with_wildcard {
            self.restart_session(role);
            restarted = true;
        }

        let Some(session) = &mut self.session else {
            return restarted;
        };

        if let Some((ufrag, pwd)) = md.ice_creds() {
            if session.remote_creds().is_none() {
                session.set_remote_credentials(ufrag, pwd);
            } else if session.remote_credentials_changed(ufrag, pwd) {
                if !restarted {
                    self.restart_session(role);
                    restarted = true;
                }
                if let Some(s) = &mut self.session {
                    s.set_remote_credentials(ufrag, pwd);
                }
            }
        }

        let Some(session) = &mut self.session else {
            return restarted;
        };
        for (i, s) in md.streams.iter().enumerate() {
            let Some((ufrag, pwd)) = s.ice_creds() else {
                continue;
            };
            let Some(cl) = session.check_list(i) else {
                continue;
            };
            if !cl.remote_credentials_changed(ufrag, pwd) {
                continue;
            }
            // Restart only if the remote credentials were already set.
            let had_creds = cl.remote_creds().is_some();
            if !restarted && had_creds {
                session.reset(role);
                self.requests
                    .push_back(IceRequest::SessionRestarted { role });
                info!("ICE restart, stream #{} credentials changed", i);
                restarted = true;
            }
            if let Some(cl) = session.check_list_mut(i) {
                cl.set_remote_credentials(ufrag, pwd);
            }
        }

        restarted
    }

    fn create_check_lists_and_parse(&mut self, md: &MediaDescription, restarted: bool) {
        let Some(session) = &mut self.session else {
            return;
        };

        for (i, stream) in md.streams.iter().enumerate() {
            if !session.has_check_list(i) {
                continue;
            }
            if stream.ice_mismatch {
                if let Some(cl) = session.check_list_mut(i) {
                    cl.set_mismatch();
                }
                continue;
            }
            if stream.rtp_port == 0 {
                session.remove_check_list(i);
                continue;
            }
            let Some(cl) = session.check_list_mut(i) else {
                continue;
            };
            if let Some((ufrag, pwd)) = stream.ice_creds() {
                cl.set_remote_credentials(ufrag, pwd);
            }

            for c in &stream.ice_candidates {
                let component = c.component_id();
                if component != COMPONENT_RTP && component != COMPONENT_RTCP {
                    continue;
                }
                let is_default = default_addr(md, stream, component) == Some(c.addr());
                cl.add_remote_candidate(c.clone(), is_default);
            }

            if !restarted {
                let mut added = false;
                for (j, rc) in stream.ice_remote_candidates.iter().enumerate() {
                    let component = j as u16 + 1;
                    let Some(remote) = default_addr(md, stream, component) else {
                        continue;
                    };
                    // A re-INVITE with remote-candidates: those may be the
                    // selected pairs already, or losing pairs.
                    cl.add_losing_pair(LosingPair {
                        component_id: component,
                        local: *rc,
                        remote,
                    });
                    added = true;
                }
                if added && !cl.check_losing_pairs() {
                    debug!("Losing pairs of stream #{} are the selected pairs", i);
                }
            }
        }
    }

    /// Apply the latest remote description and start connectivity checks.
    pub(crate) fn render(&mut self, ctx: &OfferAnswerContext) {
        if self.session.is_none() {
            return;
        }

        if let Some(remote) = ctx.remote() {
            self.update_from_remote(ctx.local(), remote, !ctx.local_is_offerer());
        }

        if let Some(session) = &mut self.session {
            if session.state() != IceSessionState::Completed && session.start_connectivity_checks()
            {
                info!("Starting ICE connectivity checks");
                let role = session.role();
                self.requests
                    .push_back(IceRequest::StartConnectivityChecks { role });
            }
        }

        if self.session.is_none() {
            self.ice_was_disabled = true;
        }
    }

    /// Nothing to confirm for ICE.
    pub(crate) fn session_confirmed(&mut self, _ctx: &OfferAnswerContext) {}

    /// The session survives a stop, so ICE state is kept across stream restarts.
    pub(crate) fn stop(&mut self) {}

    pub(crate) fn finish(&mut self) {
        self.delete_session();
    }

    fn delete_session(&mut self) {
        if self.session.take().is_none() {
            return;
        }
        if self.pending.take().is_some() {
            self.requests.push_back(IceRequest::CancelAsync);
        }
        self.gathering_finished = false;
        self.requests.push_back(IceRequest::SessionDeleted);
        info!("ICE session deleted");
    }

    fn restart_session(&mut self, role: IceRole) {
        let Some(session) = &mut self.session else {
            return;
        };
        // Local candidates are cleared too, they are gathered again after
        // the restart.
        session.reset(role);
        info!("ICE session restarted, role {:?}", role);
        self.requests.push_back(IceRequest::SessionRestarted { role });
    }

    /// Reset the session as controlling agent.
    pub fn reset_session(&mut self) {
        self.restart_session(IceRole::Controlling);
    }

    /// Whether a re-INVITE must wait before being answered.
    ///
    /// This is the case while checks are running and the remote sent
    /// `a=remote-candidates` for a running check list.
    pub fn reinvite_needs_deferred_response(&self, remote: &MediaDescription) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if session.state() != IceSessionState::Running {
            return false;
        }
        for (i, s) in remote.streams.iter().enumerate() {
            let Some(cl) = session.check_list(i) else {
                continue;
            };
            if s.ice_mismatch {
                return false;
            }
            if s.rtp_port == 0 || cl.state() != CheckListState::Running {
                continue;
            }
            if !s.ice_remote_candidates.is_empty() {
                return true;
            }
        }
        false
    }

    pub(crate) fn handle_event(&mut self, ev: IceEvent) -> IceEventOutcome {
        use IceEvent::*;

        if let StunServerResolved(addrs) = ev {
            if addrs.is_empty() {
                warn!("STUN server resolution failed");
            }
            self.stun_addrs = Some(addrs);
            if self.pending == Some(PendingOp::StunResolution) && self.session.is_some() {
                self.pending = None;
                return IceEventOutcome::ResumeGathering;
            }
            return IceEventOutcome::Nothing;
        }

        if self.session.is_none() {
            debug!("Ignore ICE event without session: {:?}", ev);
            return IceEventOutcome::Nothing;
        }

        match ev {
            GatheringFinished {
                success,
                candidates,
            } => {
                if !success {
                    warn!(
                        "No STUN answer from [{}], continuing without STUN",
                        self.nat_policy.stun_server().unwrap_or_default()
                    );
                }
                if let Some(session) = &mut self.session {
                    for (index, c) in candidates {
                        match session.check_list_mut(index) {
                            Some(cl) => {
                                cl.add_local_candidate(c);
                            }
                            None => debug!("Gathered candidate for unknown check list #{}", index),
                        }
                    }
                    let indexes: Vec<_> = session.check_list_indexes().collect();
                    for i in indexes {
                        if let Some(cl) = session.check_list_mut(i) {
                            cl.set_gathered();
                        }
                    }
                }
                self.gathering_finished();
                IceEventOutcome::GatheringFinished
            }
            DefaultCandidateVerified { index } => IceEventOutcome::StartDtls(index),
            CheckListProcessingFinished { index, rtp, rtcp } => {
                let Some(session) = &mut self.session else {
                    return IceEventOutcome::Nothing;
                };
                let Some(cl) = session.check_list_mut(index) else {
                    return IceEventOutcome::Nothing;
                };
                let completed = match rtp {
                    Some(rtp) => {
                        info!("ICE check list of stream #{} completed: {:?}", index, Pii(rtp.remote));
                        cl.complete(rtp, rtcp);
                        true
                    }
                    None => {
                        warn!("ICE check list of stream #{} failed", index);
                        cl.fail();
                        false
                    }
                };
                let was_running = session.state() == IceSessionState::Running;
                session.update_state();
                if was_running
                    && session.state() != IceSessionState::Running
                    && self.has_completed_check_list()
                {
                    if let Some(l) = &mut self.listener {
                        l.on_ice_completed();
                    }
                }
                if completed {
                    IceEventOutcome::StartDtls(index)
                } else {
                    IceEventOutcome::Nothing
                }
            }
            LosingPairsCompleted { index } => {
                if let Some(cl) = self.session.as_mut().and_then(|s| s.check_list_mut(index)) {
                    cl.clear_losing_pairs();
                }
                if let Some(l) = &mut self.listener {
                    l.on_losing_pairs_completed();
                }
                IceEventOutcome::Nothing
            }
            RestartNeeded => IceEventOutcome::RestartNeeded,
            TurnConfigurationRefreshed { success } => {
                if !success {
                    warn!("TURN configuration refresh failed, gathering with the current one");
                }
                self.turn_refreshed = true;
                if self.pending == Some(PendingOp::TurnRefresh) {
                    self.pending = None;
                    IceEventOutcome::ResumeGathering
                } else {
                    IceEventOutcome::Nothing
                }
            }
            StunServerResolved(_) => IceEventOutcome::Nothing,
        }
    }
}

/// Default address of a component in the description.
fn default_addr(md: &MediaDescription, s: &StreamDescription, component: u16) -> Option<SocketAddr> {
    let (addr, port) = match component {
        COMPONENT_RTP => (s.rtp_addr_or(Some(md)), s.rtp_port),
        COMPONENT_RTCP => (s.rtcp_addr_or(Some(md)), s.rtcp_port_or_default()),
        _ => return None,
    };
    let ip: IpAddr = addr.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

fn is_default_of(s: &StreamDescription, c: &Candidate) -> bool {
    let (addr, port) = match c.component_id() {
        COMPONENT_RTP => (&s.rtp_addr, s.rtp_port),
        COMPONENT_RTCP => (&s.rtcp_addr, s.rtcp_port),
        _ => return false,
    };
    c.addr().port() == port && c.addr().ip().to_string() == *addr
}
