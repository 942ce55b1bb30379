use indexmap::IndexMap;

use crate::common::GeoPoint;
use crate::domains::requests::models::NormalizedAddress;

/// Default number of memoized addresses.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Memoized geocode results, bounded by entry count rather than time.
///
/// The same literal address is expected to resolve to the same point for the
/// life of the process, so entries never expire; once full, the least recently
/// used address is evicted. A capacity of zero disables caching.
#[derive(Debug)]
pub struct GeocodeCache {
    entries: IndexMap<NormalizedAddress, GeoPoint>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

impl Default for GeocodeCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl GeocodeCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY)),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &NormalizedAddress) -> Option<GeoPoint> {
        // Re-insert at the back to mark as most recently used
        match self.entries.shift_remove(key) {
            Some(point) => {
                self.entries.insert(key.clone(), point);
                self.hits += 1;
                Some(point)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: NormalizedAddress, point: GeoPoint) {
        if self.capacity == 0 {
            return;
        }
        self.entries.shift_remove(&key);
        self.entries.insert(key, point);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::requests::Address;

    fn key(street: &str) -> NormalizedAddress {
        Address::new(street, "Port Angeles", "WA", "98362").normalized()
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = GeocodeCache::with_capacity(2);
        cache.insert(key("1 A St"), GeoPoint::new(1.0, 1.0));
        cache.insert(key("2 B St"), GeoPoint::new(2.0, 2.0));

        // Touch A so B becomes the eviction candidate
        assert!(cache.get(&key("1 A St")).is_some());
        cache.insert(key("3 C St"), GeoPoint::new(3.0, 3.0));

        assert!(cache.get(&key("2 B St")).is_none());
        assert_eq!(cache.get(&key("1 A St")), Some(GeoPoint::new(1.0, 1.0)));
        assert_eq!(cache.get(&key("3 C St")), Some(GeoPoint::new(3.0, 3.0)));
        assert_eq!(cache.stats().len, 2);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut cache = GeocodeCache::with_capacity(0);
        cache.insert(key("1 A St"), GeoPoint::new(1.0, 1.0));
        assert!(cache.get(&key("1 A St")).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1, len: 0 });
    }
}
