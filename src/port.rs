//! Local port selection.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::desc::MulticastRole;
use crate::util::NonCryptographicRng;

const PORT_TRIES: u16 = 100;

/// Ports in use by streams of every call.
///
/// Cloning gives another handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry(Rc<RefCell<HashSet<u16>>>);

impl PortRegistry {
    /// New empty registry.
    pub fn new() -> Self {
        PortRegistry::default()
    }

    /// Whether some stream holds the port.
    pub fn is_used(&self, port: u16) -> bool {
        self.0.borrow().contains(&port)
    }

    pub(crate) fn register(&self, port: u16) {
        self.0.borrow_mut().insert(port);
    }

    pub(crate) fn release(&self, port: u16) {
        self.0.borrow_mut().remove(&port);
    }
}

/// Local transport configuration of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortConfig {
    /// Local RTP port, `None` lets the engine choose.
    pub rtp_port: Option<u16>,
    /// Local RTCP port, `None` lets the engine choose.
    pub rtcp_port: Option<u16>,
    /// Multicast group to join or send to.
    pub multicast_ip: Option<String>,
    /// Multicast role of the stream.
    pub multicast_role: MulticastRole,
}

impl PortConfig {
    /// Pick ports in `range`.
    ///
    /// A range with `min == max` is a fixed port: the first free even port
    /// from `min`, stepping by 2. Otherwise a random even port in the range.
    /// `(0, 0)`, or no free port, lets the engine choose.
    pub(crate) fn select(range: (u16, u16), registry: &PortRegistry) -> Self {
        let (min, max) = range;
        let rtp = if min == 0 && max == 0 {
            None
        } else if min == max {
            select_fixed(min, registry)
        } else {
            select_random(min, max, registry)
        };
        if rtp.is_none() && (min, max) != (0, 0) {
            warn!("No free port in {}-{}, letting the engine choose", min, max);
        }
        PortConfig {
            rtp_port: rtp,
            rtcp_port: rtp.map(|p| p + 1),
            ..Default::default()
        }
    }
}

fn select_fixed(first: u16, registry: &PortRegistry) -> Option<u16> {
    let last = first.saturating_add(PORT_TRIES);
    (first..last)
        .step_by(2)
        .find(|p| !registry.is_used(*p) && *p < u16::MAX)
}

fn select_random(min: u16, max: u16, registry: &PortRegistry) -> Option<u16> {
    if min > max {
        return None;
    }
    let size = max - min;
    for _ in 0..PORT_TRIES {
        let n = if size == 0 {
            0
        } else {
            NonCryptographicRng::u16_in(0..=size - 1)
        };
        let p = (n & !1).saturating_add(min);
        if p < max && !registry.is_used(p) {
            return Some(p);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_port_steps_over_used() {
        let r = PortRegistry::new();
        r.register(7078);
        r.register(7080);
        let c = PortConfig::select((7078, 7078), &r);
        assert_eq!(c.rtp_port, Some(7082));
        assert_eq!(c.rtcp_port, Some(7083));
    }

    #[test]
    fn random_port_is_even_and_in_range() {
        let r = PortRegistry::new();
        for _ in 0..50 {
            let c = PortConfig::select((10000, 10100), &r);
            let p = c.rtp_port.unwrap();
            assert!(p >= 10000 && p < 10100);
            assert_eq!(p % 2, 0);
        }
    }

    #[test]
    fn zero_range_is_engine_chosen() {
        let r = PortRegistry::new();
        let c = PortConfig::select((0, 0), &r);
        assert_eq!(c.rtp_port, None);
        assert_eq!(c.rtcp_port, None);
    }

    #[test]
    fn registry_is_shared_between_clones() {
        let r = PortRegistry::new();
        let r2 = r.clone();
        r.register(5000);
        assert!(r2.is_used(5000));
        r2.release(5000);
        assert!(!r.is_used(5000));
    }
}
