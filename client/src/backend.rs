//! Backend capability trait.
//!
//! The client's queueing, batching and gating logic is written once against
//! [`Backend`]. Transports (RESP, memcache, in-process) implement it.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendError;

/// Result of looking up a single key in a multi-get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key was found.
    Hit(Bytes),
    /// The key was not found (or was an explicit not-found marker).
    Miss,
    /// The backend returned a value shape the client does not understand.
    /// Treated as a miss after being logged.
    Unexpected(String),
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Operations a remote cache backend must support.
///
/// # Thread Safety
///
/// A single backend is shared by every async worker and every in-flight
/// multi-get batch, so implementations must be `Send + Sync` and safe to call
/// concurrently.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Store `value` under `key`. A zero `ttl` means no expiry.
    async fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<(), BackendError>;

    /// Look up `keys`.
    ///
    /// The returned vector has the same length and order as `keys`.
    async fn multi_get(&self, keys: &[Bytes]) -> Result<Vec<Lookup>, BackendError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), BackendError>;

    /// Release connections held by the backend.
    async fn close(&self) -> Result<(), BackendError>;
}
