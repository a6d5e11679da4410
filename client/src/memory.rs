//! In-process backend.
//!
//! Useful for embedding the client without a remote store and for tests.
//! Entries expire lazily: an expired entry is removed the next time it is
//! read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::backend::{Backend, Lookup};
use crate::error::BackendError;

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<Bytes, Entry>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), BackendError> {
        if self.is_closed() {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn set(&self, key: &[u8], value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        self.check_open()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(Bytes::copy_from_slice(key), Entry { value, expires_at });
        Ok(())
    }

    async fn multi_get(&self, keys: &[Bytes]) -> Result<Vec<Lookup>, BackendError> {
        self.check_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let lookups = keys
            .iter()
            .map(|key| {
                let expired = match entries.get(key) {
                    Some(entry) if !entry.is_expired(now) => {
                        return Lookup::Hit(entry.value.clone());
                    }
                    Some(_) => true,
                    None => false,
                };
                if expired {
                    entries.remove(key);
                }
                Lookup::Miss
            })
            .collect();

        Ok(lookups)
    }

    async fn delete(&self, key: &[u8]) -> Result<(), BackendError> {
        self.check_open()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.entries.lock().clear();
        Ok(())
    }
}
