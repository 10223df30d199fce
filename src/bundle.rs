//! RTP bundle bookkeeping.
//!
//! The stream of the first mid of a BUNDLE group is the transport owner. It
//! holds the [`RtpBundle`], the other streams of the group are secondary and
//! refer to the owner by index.

use crate::engine::BundleId;

/// A bundle as held by its transport owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpBundle {
    id: BundleId,
    owner: usize,
    members: Vec<usize>,
}

impl RtpBundle {
    pub(crate) fn new(id: BundleId, owner: usize) -> Self {
        RtpBundle {
            id,
            owner,
            members: vec![],
        }
    }

    /// Engine handle.
    pub fn id(&self) -> BundleId {
        self.id
    }

    /// Index of the transport owner.
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Indexes of the secondary streams.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub(crate) fn add_member(&mut self, index: usize) -> bool {
        if index == self.owner || self.members.contains(&index) {
            return false;
        }
        self.members.push(index);
        true
    }

    pub(crate) fn remove_member(&mut self, index: usize) -> bool {
        let before = self.members.len();
        self.members.retain(|m| *m != index);
        before != self.members.len()
    }
}

/// Bundle role of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BundleMembership {
    /// Not bundled.
    #[default]
    None,
    /// Transport owner, holds the bundle.
    Owner(RtpBundle),
    /// Carried by the stream at `owner`.
    Secondary {
        /// Index of the transport owner.
        owner: usize,
    },
}

impl BundleMembership {
    /// Whether the stream carries its own transport.
    ///
    /// True for unbundled streams too.
    pub fn is_transport_owner(&self) -> bool {
        !matches!(self, BundleMembership::Secondary { .. })
    }

    /// Whether the stream owns a bundle.
    pub fn owns_bundle(&self) -> bool {
        matches!(self, BundleMembership::Owner(_))
    }

    /// The bundle, only for its owner.
    pub fn bundle(&self) -> Option<&RtpBundle> {
        match self {
            BundleMembership::Owner(b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn bundle_mut(&mut self) -> Option<&mut RtpBundle> {
        match self {
            BundleMembership::Owner(b) => Some(b),
            _ => None,
        }
    }

    /// Index of the transport owner, if bundled.
    pub fn owner_index(&self) -> Option<usize> {
        match self {
            BundleMembership::None => None,
            BundleMembership::Owner(b) => Some(b.owner),
            BundleMembership::Secondary { owner } => Some(*owner),
        }
    }
}
