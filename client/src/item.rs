use std::time::Duration;

use bytes::Bytes;

/// A value queued for an async write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: Bytes,
    pub value: Bytes,
    pub ttl: Duration,
}

impl CacheItem {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    /// Size counted against the max item size.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

/// Rejects items whose value exceeds the configured maximum.
///
/// A max size of zero disables the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGuard {
    max_item_size: usize,
}

impl SizeGuard {
    pub fn new(max_item_size: usize) -> Self {
        Self { max_item_size }
    }

    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }

    pub fn permits(&self, item: &CacheItem) -> bool {
        self.max_item_size == 0 || item.size() <= self.max_item_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(len: usize) -> CacheItem {
        CacheItem::new(&b"key"[..], vec![0u8; len], Duration::ZERO)
    }

    #[test]
    fn zero_is_unbounded() {
        let guard = SizeGuard::new(0);
        assert!(guard.permits(&item(0)));
        assert!(guard.permits(&item(16 * 1024 * 1024)));
    }

    #[test]
    fn boundary_is_inclusive() {
        let guard = SizeGuard::new(100);
        assert!(guard.permits(&item(99)));
        assert!(guard.permits(&item(100)));
        assert!(!guard.permits(&item(101)));
    }

    #[test]
    fn key_length_is_not_counted() {
        let guard = SizeGuard::new(4);
        let item = CacheItem::new(vec![b'k'; 64], &b"abcd"[..], Duration::from_secs(1));
        assert!(guard.permits(&item));
    }
}
