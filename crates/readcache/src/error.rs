use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The error type a [`Fetcher`](crate::Fetcher) returns.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error returned by [`Cache::get`](crate::Cache::get).
///
/// Errors are never written into the cache. Every caller that waited on the same fetch attempt
/// receives a clone of the same error, and the next `get` for that key fetches again.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The fetch function failed for the requested key.
    ///
    /// The attached error is the one returned by the fetch function, and is displayed verbatim.
    #[error("{0}")]
    FetchFailed(Arc<dyn StdError + Send + Sync + 'static>),
    /// A fetch attempt completed without producing either a value or an error.
    ///
    /// This happens when the fetch function panics while other callers are waiting on it.
    #[error("concurrent fetch failed")]
    InternalError,
}

impl CacheError {
    /// Wraps an error returned by a fetch function.
    pub fn fetch_failed(err: BoxError) -> Self {
        Self::FetchFailed(Arc::from(err))
    }

    /// Returns the error of the fetch function, if this is a [`FetchFailed`](Self::FetchFailed).
    pub fn fetch_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::FetchFailed(err) => Some(err.as_ref()),
            Self::InternalError => None,
        }
    }
}

/// An invalid cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `purge_at` was set to zero, which would evict every entry right after it is stored.
    #[error("purge_at must be greater than zero")]
    ZeroPurgeAt,
    /// `purge_to` does not lie below `purge_at`.
    #[error("purge_to ({purge_to}) must be less than purge_at ({purge_at})")]
    PurgeToNotBelowPurgeAt { purge_at: usize, purge_to: usize },
    /// `purge_to` was set without a `purge_at` threshold.
    #[error("purge_to is set, but purge_at is not")]
    PurgeToWithoutPurgeAt,
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_fetch_failed_is_verbatim() {
        let err = CacheError::fetch_failed("Error message".into());
        assert_eq!(err.to_string(), "Error message");

        let io_err = io::Error::new(io::ErrorKind::TimedOut, "upstream timed out");
        let err = CacheError::fetch_failed(Box::new(io_err));
        assert_eq!(err.to_string(), "upstream timed out");

        let inner = err.fetch_error().unwrap();
        let io_err = inner.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_internal_error() {
        let err = CacheError::InternalError;
        assert_eq!(err.to_string(), "concurrent fetch failed");
        assert!(err.fetch_error().is_none());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::PurgeToNotBelowPurgeAt {
            purge_at: 3,
            purge_to: 5,
        };
        assert_eq!(err.to_string(), "purge_to (5) must be less than purge_at (3)");
    }
}
