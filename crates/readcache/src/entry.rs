use std::time::{Duration, Instant};

/// A cached value together with the instant it expires at.
///
/// Entries are immutable. A key's entry is only ever replaced as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    /// Creates an entry that expires at the given instant.
    pub fn new(value: V, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    /// Creates an entry that expires `ttl` from now.
    ///
    /// A `ttl` too large to be represented is capped, so such an entry effectively never expires.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| saturating_add(now, ttl));
        Self::new(value, expires_at)
    }

    /// The cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The instant after which this entry is considered absent.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether this entry is still live at `now`.
    ///
    /// An entry is live only while `expires_at` lies strictly after `now`.
    pub fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    /// Consumes the entry, returning the value.
    pub fn into_value(self) -> V {
        self.value
    }
}

/// Adds as much of `ttl` to `now` as the platform's `Instant` can represent.
fn saturating_add(now: Instant, ttl: Duration) -> Instant {
    let mut expires_at = now;
    let mut step = ttl;
    while !step.is_zero() {
        match expires_at.checked_add(step) {
            Some(later) => expires_at = later,
            None => step /= 2,
        }
    }
    expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_is_strict() {
        let now = Instant::now();
        let entry = Entry::new("foo", now);
        assert!(!entry.is_live_at(now));
        assert!(entry.is_live_at(now - Duration::from_nanos(1)));
    }

    #[test]
    fn test_with_ttl() {
        let before = Instant::now();
        let entry = Entry::with_ttl(42, Duration::from_secs(100));
        assert!(entry.expires_at() >= before + Duration::from_secs(100));
        assert!(entry.is_live_at(Instant::now()));
        assert_eq!(entry.into_value(), 42);
    }

    #[test]
    fn test_with_huge_ttl_never_expires() {
        let entry = Entry::with_ttl(1, Duration::MAX);
        let now = Instant::now();
        assert!(entry.expires_at() > now);
        assert!(entry.is_live_at(now + Duration::from_secs(100 * 365 * 24 * 3600)));
    }
}
