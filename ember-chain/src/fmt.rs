//! Format wrappers for chain types.

use std::fmt;

/// Wrapper to override `Debug`, redirecting it to the `Display` impl.
pub struct DisplayToDebug<T>(pub T);

impl<T> fmt::Debug for DisplayToDebug<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
