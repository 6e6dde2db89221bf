//! TTL-aware cache for resolved answer sets
//!
//! Entries are keyed by (lower-cased domain, query type) and expire as a
//! unit: the whole record set lives for the minimum TTL of its records.
//! Expired entries are evicted lazily by the lookup that finds them.
//! Negative results are never stored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};

use crate::dns::protocol::{DnsRecord, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum CacheError {
    Io(std::io::Error),
    PoisonedLock,
}

type Result<T> = std::result::Result<T, CacheError>;

#[derive(Clone, Debug)]
struct CacheEntry {
    records: Vec<DnsRecord>,
    expires: Instant,
}

fn cache_key(qname: &str, qtype: QueryType) -> (String, QueryType) {
    (qname.to_lowercase(), qtype)
}

/// The cache proper, without locking. All methods take an explicit `now` so
/// expiry behavior is deterministic under test.
#[derive(Default)]
pub struct ResponseCache {
    entries: HashMap<(String, QueryType), CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> ResponseCache {
        ResponseCache {
            entries: HashMap::new(),
        }
    }

    pub fn lookup_at(
        &mut self,
        qname: &str,
        qtype: QueryType,
        now: Instant,
    ) -> Option<Vec<DnsRecord>> {
        let key = cache_key(qname, qtype);

        match self.entries.get(&key) {
            Some(entry) if now < entry.expires => Some(entry.records.clone()),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a record set under the minimum TTL of its members. An empty set
    /// or a zero minimum TTL leaves the cache untouched.
    pub fn store_at(&mut self, qname: &str, qtype: QueryType, records: &[DnsRecord], now: Instant) {
        let min_ttl = match records.iter().map(|r| r.get_ttl()).min() {
            Some(ttl) if ttl > 0 => ttl,
            _ => return,
        };

        self.entries.insert(
            cache_key(qname, qtype),
            CacheEntry {
                records: records.to_vec(),
                expires: now + Duration::from_secs(u64::from(min_ttl)),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe wrapper around `ResponseCache`. A single mutex is held for
/// the duration of each lookup or store; callers clone the records out, so
/// cached entries are never aliased across requests.
pub struct SynchronizedCache {
    cache: Mutex<ResponseCache>,
    enabled: bool,
}

impl SynchronizedCache {
    pub fn new() -> SynchronizedCache {
        SynchronizedCache {
            cache: Mutex::new(ResponseCache::new()),
            enabled: true,
        }
    }

    /// A disabled cache still answers lookups (it will simply never have
    /// anything to say) but silently discards stores.
    pub fn disabled() -> SynchronizedCache {
        SynchronizedCache {
            cache: Mutex::new(ResponseCache::new()),
            enabled: false,
        }
    }

    pub fn lookup(&self, qname: &str, qtype: QueryType) -> Result<Option<Vec<DnsRecord>>> {
        let mut cache = self.cache.lock().map_err(|_| CacheError::PoisonedLock)?;

        Ok(cache.lookup_at(qname, qtype, Instant::now()))
    }

    pub fn store(&self, qname: &str, qtype: QueryType, records: &[DnsRecord]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut cache = self.cache.lock().map_err(|_| CacheError::PoisonedLock)?;
        cache.store_at(qname, qtype, records, Instant::now());

        Ok(())
    }
}

impl Default for SynchronizedCache {
    fn default() -> Self {
        SynchronizedCache::new()
    }
}
