use std::collections::BTreeMap;
use std::net::SocketAddr;

use super::{Candidate, CandidateKind, IceCreds, COMPONENT_RTCP, COMPONENT_RTP};

/// Role of this agent in the ICE session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    /// The side that made the offer, nominates pairs.
    Controlling,
    /// The answering side.
    Controlled,
}

/// State of an [`IceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceSessionState {
    /// Created, connectivity checks not started.
    Stopped,
    /// Connectivity checks are running.
    Running,
    /// Every check list completed.
    Completed,
    /// Every check list finished, at least one of them failed.
    Failed,
}

/// State of a [`CheckList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckListState {
    /// Initial state. Gathering or checking.
    Running,
    /// A valid pair was selected.
    Completed,
    /// No valid pair, or the remote signalled `a=ice-mismatch`.
    Failed,
}

/// A pair the remote asked us to check with `a=remote-candidates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LosingPair {
    /// 1 for RTP, 2 for RTCP.
    pub component_id: u16,
    /// Our address as the remote knows it.
    pub local: SocketAddr,
    /// The remote default address for the component.
    pub remote: SocketAddr,
}

/// The pair the connectivity engine selected for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedPair {
    /// Local address of the pair.
    pub local: SocketAddr,
    /// Remote address of the pair.
    pub remote: SocketAddr,
    /// Kind of the local candidate.
    pub kind: CandidateKind,
}

#[derive(Debug, Clone)]
struct RemoteCandidate {
    candidate: Candidate,
    is_default: bool,
}

/// ICE state of one stream index.
#[derive(Debug)]
pub struct CheckList {
    state: CheckListState,
    local_creds: IceCreds,
    remote_creds: Option<IceCreds>,
    local_candidates: Vec<Candidate>,
    remote_candidates: Vec<RemoteCandidate>,
    losing_pairs: Vec<LosingPair>,
    defaults: [Option<Candidate>; 2],
    selected: [Option<SelectedPair>; 2],
    gathered: bool,
    mismatch: bool,
}

impl CheckList {
    fn new(local_creds: IceCreds) -> Self {
        CheckList {
            state: CheckListState::Running,
            local_creds,
            remote_creds: None,
            local_candidates: vec![],
            remote_candidates: vec![],
            losing_pairs: vec![],
            defaults: [None, None],
            selected: [None, None],
            gathered: false,
            mismatch: false,
        }
    }

    fn reset(&mut self, local_creds: IceCreds) {
        *self = CheckList::new(local_creds);
    }

    /// Current state.
    pub fn state(&self) -> CheckListState {
        self.state
    }

    /// Local credentials.
    pub fn local_creds(&self) -> &IceCreds {
        &self.local_creds
    }

    /// Remote credentials, when known at stream level.
    pub fn remote_creds(&self) -> Option<&IceCreds> {
        self.remote_creds.as_ref()
    }

    pub(crate) fn set_remote_credentials(&mut self, ufrag: &str, pass: &str) {
        self.remote_creds = Some(IceCreds::from_pair(ufrag, pass));
    }

    pub(crate) fn remote_credentials_changed(&self, ufrag: &str, pass: &str) -> bool {
        match &self.remote_creds {
            Some(c) => c.differs(ufrag, pass),
            None => true,
        }
    }

    /// Local candidates.
    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    /// Remote candidates from the remote description.
    pub fn remote_candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.remote_candidates.iter().map(|r| &r.candidate)
    }

    /// Remote candidates that match the default address of their component.
    pub fn remote_default_candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.remote_candidates
            .iter()
            .filter(|r| r.is_default)
            .map(|r| &r.candidate)
    }

    pub(crate) fn add_local_candidate(&mut self, c: Candidate) -> bool {
        let exists = self.local_candidates.iter().any(|o| {
            o.addr() == c.addr() && o.component_id() == c.component_id() && o.kind() == c.kind()
        });
        if exists {
            return false;
        }
        self.local_candidates.push(c);
        true
    }

    pub(crate) fn add_remote_candidate(&mut self, c: Candidate, is_default: bool) {
        let exists = self.remote_candidates.iter().any(|o| {
            o.candidate.addr() == c.addr() && o.candidate.component_id() == c.component_id()
        });
        if !exists {
            self.remote_candidates.push(RemoteCandidate {
                candidate: c,
                is_default,
            });
        }
    }

    /// Pairs from `a=remote-candidates` still to be confirmed.
    pub fn losing_pairs(&self) -> &[LosingPair] {
        &self.losing_pairs
    }

    pub(crate) fn add_losing_pair(&mut self, pair: LosingPair) {
        if !self.losing_pairs.contains(&pair) {
            self.losing_pairs.push(pair);
        }
    }

    /// Drop losing pairs that are already the selected pairs.
    ///
    /// Returns true if some pairs remain to be checked by the engine.
    pub(crate) fn check_losing_pairs(&mut self) -> bool {
        let selected = self.selected;
        self.losing_pairs.retain(|p| {
            let idx = (p.component_id - 1) as usize;
            !matches!(selected.get(idx), Some(Some(s)) if s.local == p.local && s.remote == p.remote)
        });
        !self.losing_pairs.is_empty()
    }

    pub(crate) fn clear_losing_pairs(&mut self) {
        self.losing_pairs.clear();
    }

    /// Whether local candidates have been gathered.
    pub fn candidates_gathered(&self) -> bool {
        self.gathered
    }

    pub(crate) fn set_gathered(&mut self) {
        self.gathered = true;
    }

    /// Whether the remote signalled `a=ice-mismatch`.
    pub fn is_mismatch(&self) -> bool {
        self.mismatch
    }

    pub(crate) fn set_mismatch(&mut self) {
        self.mismatch = true;
        self.state = CheckListState::Failed;
    }

    /// Remove RTCP candidates, used once rtcp-mux is agreed.
    pub(crate) fn remove_rtcp_candidates(&mut self) {
        self.local_candidates
            .retain(|c| c.component_id() != COMPONENT_RTCP);
        self.remote_candidates
            .retain(|r| r.candidate.component_id() != COMPONENT_RTCP);
        self.defaults[1] = None;
    }

    fn compute_foundations(&mut self) {
        for c in &mut self.local_candidates {
            c.compute_foundation();
        }
    }

    /// Remove local candidates with the same address and base as a higher
    /// priority one of the same component.
    fn eliminate_redundant_candidates(&mut self) {
        let mut keep: Vec<Candidate> = Vec::with_capacity(self.local_candidates.len());
        let mut sorted = std::mem::take(&mut self.local_candidates);
        sorted.sort_by_key(|c| std::cmp::Reverse(c.prio()));
        for c in sorted {
            let redundant = keep.iter().any(|k| {
                k.component_id() == c.component_id() && k.addr() == c.addr() && k.base() == c.base()
            });
            if redundant {
                trace!("Eliminate redundant candidate: {:?}", c);
                continue;
            }
            keep.push(c);
        }
        self.local_candidates = keep;
    }

    fn choose_default_candidates(&mut self, types: &[CandidateKind], prefer_ipv6: bool) {
        for (i, component) in [COMPONENT_RTP, COMPONENT_RTCP].into_iter().enumerate() {
            let mut chosen = None;
            'kinds: for kind in types {
                for family_v6 in [prefer_ipv6, !prefer_ipv6] {
                    let best = self
                        .local_candidates
                        .iter()
                        .filter(|c| {
                            c.component_id() == component
                                && c.kind() == *kind
                                && c.addr().is_ipv6() == family_v6
                        })
                        .max_by_key(|c| c.prio());
                    if let Some(c) = best {
                        chosen = Some(c.clone());
                        break 'kinds;
                    }
                }
            }
            self.defaults[i] = chosen;
        }
    }

    /// Default local candidate for a component.
    pub fn default_local_candidate(&self, component_id: u16) -> Option<&Candidate> {
        self.defaults
            .get(component_id.checked_sub(1)? as usize)?
            .as_ref()
    }

    /// Selected pair for a component, once the check list completed.
    pub fn selected_pair(&self, component_id: u16) -> Option<SelectedPair> {
        *self.selected.get(component_id.checked_sub(1)? as usize)?
    }

    /// Kind of the local candidate of the selected RTP pair.
    pub fn selected_kind(&self) -> Option<CandidateKind> {
        self.selected[0].map(|s| s.kind)
    }

    pub(crate) fn complete(&mut self, rtp: SelectedPair, rtcp: Option<SelectedPair>) {
        self.selected = [Some(rtp), rtcp];
        self.state = CheckListState::Completed;
    }

    pub(crate) fn fail(&mut self) {
        self.state = CheckListState::Failed;
    }
}

/// The ICE session of one call.
///
/// One check list per stream index that needs ICE. The session only keeps
/// the state; checks happen in the connectivity engine, which reports back
/// through [`crate::ice::IceEvent`].
#[derive(Debug)]
pub struct IceSession {
    role: IceRole,
    state: IceSessionState,
    local_creds: IceCreds,
    remote_creds: Option<IceCreds>,
    check_lists: BTreeMap<usize, CheckList>,
    integrity_check: bool,
    default_types: Vec<CandidateKind>,
    prefer_ipv6_defaults: bool,
}

impl IceSession {
    /// Default candidate preference: relay, then server reflexive, then host.
    pub const DEFAULT_CANDIDATE_TYPES: &'static [CandidateKind] = &[
        CandidateKind::Relayed,
        CandidateKind::ServerReflexive,
        CandidateKind::Host,
    ];

    /// New stopped session.
    pub fn new(role: IceRole, integrity_check: bool) -> Self {
        IceSession {
            role,
            state: IceSessionState::Stopped,
            local_creds: IceCreds::new(),
            remote_creds: None,
            check_lists: BTreeMap::new(),
            integrity_check,
            default_types: Self::DEFAULT_CANDIDATE_TYPES.to_vec(),
            prefer_ipv6_defaults: false,
        }
    }

    /// Role of the local agent.
    pub fn role(&self) -> IceRole {
        self.role
    }

    /// Session state.
    pub fn state(&self) -> IceSessionState {
        self.state
    }

    /// Local session credentials.
    pub fn local_creds(&self) -> &IceCreds {
        &self.local_creds
    }

    /// Remote session credentials.
    pub fn remote_creds(&self) -> Option<&IceCreds> {
        self.remote_creds.as_ref()
    }

    /// Whether STUN message integrity is checked.
    pub fn integrity_check(&self) -> bool {
        self.integrity_check
    }

    /// Kinds considered for default candidates, in preference order.
    pub fn default_candidate_types(&self) -> &[CandidateKind] {
        &self.default_types
    }

    pub(crate) fn set_default_candidate_types(&mut self, types: &[CandidateKind]) {
        self.default_types = types.to_vec();
    }

    pub(crate) fn set_prefer_ipv6_defaults(&mut self, v: bool) {
        self.prefer_ipv6_defaults = v;
    }

    /// Check list of a stream index.
    pub fn check_list(&self, index: usize) -> Option<&CheckList> {
        self.check_lists.get(&index)
    }

    pub(crate) fn check_list_mut(&mut self, index: usize) -> Option<&mut CheckList> {
        self.check_lists.get_mut(&index)
    }

    /// Whether there is a check list for the stream index.
    pub fn has_check_list(&self, index: usize) -> bool {
        self.check_lists.contains_key(&index)
    }

    /// Indexes of all check lists, ascending.
    pub fn check_list_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.check_lists.keys().copied()
    }

    /// Number of check lists.
    pub fn check_list_count(&self) -> usize {
        self.check_lists.len()
    }

    pub(crate) fn add_check_list(&mut self, index: usize) {
        let creds = self.local_creds.clone();
        self.check_lists
            .entry(index)
            .or_insert_with(|| CheckList::new(creds));
    }

    pub(crate) fn remove_check_list(&mut self, index: usize) -> bool {
        let removed = self.check_lists.remove(&index).is_some();
        if removed {
            self.update_state();
        }
        removed
    }

    pub(crate) fn set_remote_credentials(&mut self, ufrag: &str, pass: &str) {
        self.remote_creds = Some(IceCreds::from_pair(ufrag, pass));
    }

    pub(crate) fn remote_credentials_changed(&self, ufrag: &str, pass: &str) -> bool {
        match &self.remote_creds {
            Some(c) => c.differs(ufrag, pass),
            None => false,
        }
    }

    /// Whether every check list has its local candidates.
    pub fn candidates_gathered(&self) -> bool {
        self.check_lists.values().all(|cl| cl.candidates_gathered())
    }

    /// Reset to a fresh session with the given role.
    ///
    /// Local candidates are cleared too, they are gathered again afterwards.
    pub(crate) fn reset(&mut self, role: IceRole) {
        self.role = role;
        self.state = IceSessionState::Stopped;
        self.local_creds = IceCreds::new();
        self.remote_creds = None;
        for cl in self.check_lists.values_mut() {
            cl.reset(self.local_creds.clone());
        }
    }

    pub(crate) fn compute_foundations(&mut self) {
        for cl in self.check_lists.values_mut() {
            cl.compute_foundations();
        }
    }

    pub(crate) fn eliminate_redundant_candidates(&mut self) {
        for cl in self.check_lists.values_mut() {
            cl.eliminate_redundant_candidates();
        }
    }

    pub(crate) fn choose_default_candidates(&mut self) {
        let types = self.default_types.clone();
        for cl in self.check_lists.values_mut() {
            cl.choose_default_candidates(&types, self.prefer_ipv6_defaults);
        }
    }

    /// Fail the check lists where the remote signalled a mismatch.
    pub(crate) fn check_mismatch(&mut self) {
        for cl in self.check_lists.values_mut() {
            if cl.is_mismatch() {
                cl.fail();
            }
        }
        self.update_state();
    }

    /// Move to running. Returns true if this started the checks.
    pub(crate) fn start_connectivity_checks(&mut self) -> bool {
        if self.state != IceSessionState::Stopped {
            return false;
        }
        self.state = IceSessionState::Running;
        self.update_state();
        true
    }

    /// Whether at least one check list completed.
    pub fn has_completed_check_list(&self) -> bool {
        self.check_lists
            .values()
            .any(|cl| cl.state() == CheckListState::Completed)
    }

    pub(crate) fn update_state(&mut self) {
        if self.state == IceSessionState::Stopped || self.check_lists.is_empty() {
            return;
        }
        let all_done = self
            .check_lists
            .values()
            .all(|cl| cl.state() != CheckListState::Running);
        if !all_done {
            return;
        }
        let any_failed = self
            .check_lists
            .values()
            .any(|cl| cl.state() == CheckListState::Failed);
        self.state = if any_failed {
            IceSessionState::Failed
        } else {
            IceSessionState::Completed
        };
    }
}
