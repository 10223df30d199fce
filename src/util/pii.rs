//! Log wrapper for addresses and credentials.
//!
//! Values wrapped in `Pii` print as `{REDACTED}` when the `pii` feature is
//! enabled. Media addresses, ICE candidates and SAS tokens identify the
//! user's network and must go through this wrapper in debug, info, warn
//! and error logs. Trace logs may print them unwrapped.

use core::fmt;
use core::ops::Deref;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pii<T>(pub T);

impl<T: fmt::Display> fmt::Display for Pii<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if cfg!(feature = "pii") {
            write!(f, "{{REDACTED}}")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pii<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if cfg!(feature = "pii") {
            write!(f, "{{REDACTED}}")
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

impl<T> Deref for Pii<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
