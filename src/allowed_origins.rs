use std::fmt;
use std::sync::Arc;

/// The set of origins a [`OriginPolicy`] permits.
///
/// Entries are `host[:port]` values, or the wildcard token `"*"` which
/// matches any origin. The set is small and checked linearly, in order.
///
/// Values are compared verbatim against the lowercased incoming origin, so
/// entries should be lowercase themselves.
///
/// [`OriginPolicy`]: crate::OriginPolicy
#[derive(Clone)]
pub struct AllowedOrigins(Arc<[String]>);

impl AllowedOrigins {
    pub(crate) fn new(origins: Vec<String>) -> Self {
        Self(origins.into())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `origin` matches any entry, either exactly or via a wildcard
    /// entry.
    pub fn matches(&self, origin: &str) -> bool {
        self.0.iter().any(|entry| entry == origin || entry == "*")
    }

    /// Iterate over the configured entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Debug for AllowedOrigins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
