use std::fmt;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

mod pii;
pub(crate) use pii::Pii;

/// An instant that is guaranteed to be in the past for every caller of the crate.
///
/// Used as "fire immediately" for timers that are enabled but not yet armed.
pub(crate) fn already_happened() -> Instant {
    static PAST: Lazy<Instant> = Lazy::new(|| {
        let now = Instant::now();
        // Find an Instant in the past which is up to an hour back.
        let mut secs = 3600;
        loop {
            if let Some(v) = now.checked_sub(Duration::from_secs(secs)) {
                break v;
            }
            secs /= 2;
            if secs == 0 {
                break now;
            }
        }
    });
    *PAST
}

pub(crate) trait Soonest {
    fn soonest(self, other: Self) -> Self;
}

impl Soonest for Option<Instant> {
    fn soonest(self, other: Self) -> Self {
        match (self, other) {
            (Some(v1), Some(v2)) => Some(v1.min(v2)),
            (None, v) => v,
            (v, None) => v,
        }
    }
}

pub(crate) struct NonCryptographicRng;

impl NonCryptographicRng {
    #[inline(always)]
    pub fn u16_in(range: std::ops::RangeInclusive<u16>) -> u16 {
        fastrand::u16(range)
    }

    #[inline(always)]
    pub fn index(len: usize) -> usize {
        fastrand::usize(..len)
    }
}

// deliberate subset of ice-char that is also valid base64
const CHARS: &[u8] = b"abcdefghijklmnopqrstuvxyzABCDEFGHIJKLMNOPQRSTUVXYZ0123456789";

/// Random string of `L` characters safe for ICE ufrag/pwd and SDP key params.
pub(crate) struct Id<const L: usize>([u8; L]);

impl<const L: usize> Id<L> {
    pub fn random() -> Self {
        let mut x = [0; L];
        for c in x.iter_mut() {
            *c = CHARS[NonCryptographicRng::index(CHARS.len())];
        }
        Id(x)
    }
}

impl<const L: usize> fmt::Display for Id<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0 {
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}
