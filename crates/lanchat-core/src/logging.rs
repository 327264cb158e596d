//! Logging helpers.
//!
//! The handshake deals in a shared password; the wrapper here keeps it
//! out of log output even at debug level.

use std::fmt;

/// A wrapper that redacts its value when displayed, reporting only the
/// byte length.
pub struct Redacted<T>(pub T);

impl<T: AsRef<str>> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes redacted]", self.0.as_ref().len())
    }
}

impl<T: AsRef<str>> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
