//! ICE orchestration.
//!
//! The connectivity engine itself (STUN transactions, pair checking, TURN
//! allocations) lives outside this crate. What lives here is the bookkeeping
//! of the ICE session as the call sees it: which stream has a check list,
//! what was gathered, which candidates are defaults, when a restart happens,
//! and what to write into the local description.

use thiserror::Error;

use crate::util::Id;

mod candidate;
pub use candidate::{Candidate, CandidateKind, Protocol, COMPONENT_RTCP, COMPONENT_RTP};

mod session;
pub use session::{CheckList, CheckListState, IceRole, IceSession, IceSessionState};
pub use session::{LosingPair, SelectedPair};

mod nat;
pub use nat::{preferred_stun_server_addr, NatPolicy, TurnTransport};

mod service;
pub(crate) use service::{IceEventOutcome, IceStreamSlot};
pub use service::{IceEvent, IceRequest, IceService, IceServiceListener, TurnParams};

/// Errors from the ICE layer.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum IceError {
    #[error("ICE bad candidate: {0}")]
    BadCandidate(String),
}

/// Credentials for a check list or a whole session.
///
/// Local credentials are generated, remote ones come from `a=ice-ufrag` and
/// `a=ice-pwd` of the remote description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IceCreds {
    /// From a=ice-ufrag
    pub ufrag: String,
    /// From a=ice-pwd
    pub pass: String,
}

impl IceCreds {
    /// Creates a new instance of `IceCreds` with random values for the username fragment and password.
    pub fn new() -> Self {
        // Username Fragment and Password:  Values used to perform connectivity
        // checks.  The values MUST be unguessable, with at least 128 bits of
        // random number generator output used to generate the password, and
        // at least 24 bits of output to generate the username fragment.
        let ufrag = Id::<4>::random().to_string();
        let pass = Id::<22>::random().to_string();
        IceCreds { ufrag, pass }
    }

    pub(crate) fn from_pair(ufrag: &str, pass: &str) -> Self {
        IceCreds {
            ufrag: ufrag.to_string(),
            pass: pass.to_string(),
        }
    }

    pub(crate) fn differs(&self, ufrag: &str, pass: &str) -> bool {
        self.ufrag != ufrag || self.pass != pass
    }
}
