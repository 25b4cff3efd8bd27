use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounds the number of entries held by the cache.
///
/// Once a store reaches `purge_at` entries, the oldest inserted entries are evicted until only
/// `purge_to` remain. Eviction order is by insertion, not by access: reading an entry does not
/// keep it alive, while refetching an entry counts as a new insertion.
///
/// Both limits are disabled by default. When only `purge_at` is given, the store is purged down
/// to half of it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PurgePolicy {
    /// The number of entries at which a purge is triggered.
    pub purge_at: Option<usize>,
    /// The number of entries left behind by a purge.
    pub purge_to: Option<usize>,
}

impl PurgePolicy {
    /// A policy that never evicts anything.
    pub const DISABLED: Self = Self {
        purge_at: None,
        purge_to: None,
    };

    /// Creates a policy purging down to `purge_to` entries once `purge_at` entries are stored.
    pub fn new(purge_at: usize, purge_to: usize) -> Result<Self, ConfigError> {
        let policy = Self {
            purge_at: Some(purge_at),
            purge_to: Some(purge_to),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Whether this policy ever evicts anything.
    pub fn is_enabled(&self) -> bool {
        self.purge_at.is_some()
    }

    /// Checks that the limits are consistent with each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.purge_at, self.purge_to) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(ConfigError::PurgeToWithoutPurgeAt),
            (Some(0), _) => Err(ConfigError::ZeroPurgeAt),
            (Some(purge_at), Some(purge_to)) if purge_to >= purge_at => {
                Err(ConfigError::PurgeToNotBelowPurgeAt { purge_at, purge_to })
            }
            (Some(_), _) => Ok(()),
        }
    }

    /// Returns the size a store holding `len` entries has to be shrunk to, if any.
    pub(crate) fn target_len(&self, len: usize) -> Option<usize> {
        let purge_at = self.purge_at?;
        if len < purge_at {
            return None;
        }
        let purge_to = self.purge_to.unwrap_or(purge_at / 2);
        Some(purge_to.min(purge_at.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_purges() {
        let policy = PurgePolicy::default();
        assert_eq!(policy, PurgePolicy::DISABLED);
        assert!(!policy.is_enabled());
        assert_eq!(policy.target_len(usize::MAX), None);
    }

    #[test]
    fn test_purge_at_threshold() {
        let policy = PurgePolicy::new(3, 1).unwrap();
        assert_eq!(policy.target_len(2), None);
        assert_eq!(policy.target_len(3), Some(1));
        assert_eq!(policy.target_len(4), Some(1));
    }

    #[test]
    fn test_purge_to_defaults_to_half() {
        let policy = PurgePolicy {
            purge_at: Some(200),
            purge_to: None,
        };
        policy.validate().unwrap();
        assert_eq!(policy.target_len(200), Some(100));

        let policy = PurgePolicy {
            purge_at: Some(1),
            purge_to: None,
        };
        assert_eq!(policy.target_len(1), Some(0));
    }

    #[test]
    fn test_validate() {
        assert_eq!(PurgePolicy::new(0, 0), Err(ConfigError::ZeroPurgeAt));
        assert_eq!(
            PurgePolicy::new(3, 3),
            Err(ConfigError::PurgeToNotBelowPurgeAt {
                purge_at: 3,
                purge_to: 3
            })
        );

        let policy = PurgePolicy {
            purge_at: None,
            purge_to: Some(10),
        };
        assert_eq!(policy.validate(), Err(ConfigError::PurgeToWithoutPurgeAt));
    }
}
