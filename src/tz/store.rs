//! Loading zones from the filesystem by IANA key, with a small cache.
use crate::{Error, tz::TimeZone, tz::tzif};
use ahash::AHashMap;
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Directories probed by [`ZoneStore::new`], in order.
const DEFAULT_PATHS: &[&str] = &["/usr/share/zoneinfo", "/usr/lib/zoneinfo", "/etc/zoneinfo"];

/// Keep this many recently used zones alive; the value works well for
/// Python's zoneinfo and there's no reason to differ.
const LRU_CAPACITY: usize = 8;

/// A cached loader of [`TimeZone`]s by IANA key ("Europe/Amsterdam").
///
/// Zone records are handed out as `Arc`s: they stay valid for as long as
/// the caller holds them, regardless of cache eviction. Lookups take a
/// mutex only around the cache bookkeeping, never around conversions.
#[derive(Debug)]
pub struct ZoneStore {
    paths: Vec<PathBuf>,
    cache: Mutex<Cache>,
}

#[derive(Debug)]
struct Cache {
    // Ahash over the standard hasher: the keys are validated zone names,
    // so hash-flooding is not a concern and the speed is welcome.
    lookup: AHashMap<String, Arc<TimeZone>>,
    // Most-recently-used keys, newest in front. Entries evicted here are
    // also dropped from the lookup map, bounding the cache.
    lru: VecDeque<String>,
}

impl ZoneStore {
    /// A store over the conventional zoneinfo directories.
    pub fn new() -> Self {
        Self::with_paths(DEFAULT_PATHS.iter().map(PathBuf::from).collect())
    }

    /// A store over explicit search paths, probed in order.
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        ZoneStore {
            paths,
            cache: Mutex::new(Cache {
                lookup: AHashMap::with_capacity(LRU_CAPACITY),
                lru: VecDeque::with_capacity(LRU_CAPACITY),
            }),
        }
    }

    /// Fetch the zone for the given IANA key, reading and parsing its TZif
    /// file on a cache miss.
    pub fn get(&self, key: &str) -> Result<Arc<TimeZone>, Error> {
        // Note: poisoning can't happen (no panics while the lock is held),
        // but there's no reason to unwrap either
        if let Ok(mut cache) = self.cache.lock()
            && let Some(zone) = cache.hit(key)
        {
            return Ok(zone);
        }
        let zone = Arc::new(self.load(key)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, zone.clone());
        }
        Ok(zone)
    }

    /// Drop all cached zones. Outstanding `Arc`s stay valid.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.lookup.clear();
            cache.lru.clear();
        }
    }

    /// Load a zone by key, assuming the key is untrusted input.
    fn load(&self, key: &str) -> Result<TimeZone, Error> {
        if !tzif::is_valid_key(key) {
            return Err(Error::ZoneNotFound);
        }
        self.paths
            .iter()
            .find_map(|base| read_tzif_at_path(&base.join(key)))
            .ok_or(Error::ZoneNotFound)
    }
}

impl Default for ZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    fn hit(&mut self, key: &str) -> Option<Arc<TimeZone>> {
        let zone = self.lookup.get(key)?.clone();
        // Mark as recently used
        if self.lru.front().is_none_or(|k| k != key) {
            if let Some(i) = self.lru.iter().position(|k| k == key) {
                self.lru.remove(i);
            }
            self.lru.push_front(key.to_string());
        }
        Some(zone)
    }

    fn insert(&mut self, key: &str, zone: Arc<TimeZone>) {
        // Two threads may race to load the same key; keep the LRU free of
        // duplicates either way
        if self.lookup.insert(key.to_string(), zone).is_some() {
            if let Some(i) = self.lru.iter().position(|k| k == key) {
                self.lru.remove(i);
            }
        }
        if self.lru.len() == LRU_CAPACITY {
            if let Some(evicted) = self.lru.pop_back() {
                self.lookup.remove(&evicted);
            }
        }
        self.lru.push_front(key.to_string());
    }
}

/// Read a TZif file at the given path; None if it doesn't exist or
/// doesn't parse.
fn read_tzif_at_path(path: &Path) -> Option<TimeZone> {
    if path.is_file() {
        fs::read(path).ok().and_then(|d| tzif::parse(&d).ok())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A fixed +13 zone, assembled by hand (v1 block with no data, then the
    // v2 block: one offset record, "+13" designation, "<+13>-13" footer)
    fn plus13_tzif() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"TZif2");
        out.extend_from_slice(&[0; 15]);
        for c in [0u32, 0, 0, 0, 1, 1] {
            out.extend_from_slice(&c.to_be_bytes());
        }
        out.extend_from_slice(&[0; 6]);
        out.push(0);
        out.extend_from_slice(b"TZif2");
        out.extend_from_slice(&[0; 15]);
        for c in [0u32, 0, 0, 0, 1, 4] {
            out.extend_from_slice(&c.to_be_bytes());
        }
        out.extend_from_slice(&(13 * 3600i32).to_be_bytes());
        out.extend_from_slice(&[0, 0]); // isdst, desig index
        out.extend_from_slice(b"+13\0");
        out.extend_from_slice(b"\n<+13>-13\n");
        out
    }

    fn tmp_zoneinfo() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "zone64-store-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        fs::create_dir_all(dir.join("Pacific")).unwrap();
        fs::write(dir.join("Pacific/Testland"), plus13_tzif()).unwrap();
        fs::write(dir.join("Broken"), b"TZif-garbage").unwrap();
        dir
    }

    #[test]
    fn lookup_and_cache() {
        let dir = tmp_zoneinfo();
        let store = ZoneStore::with_paths(vec![dir.clone()]);

        let zone = store.get("Pacific/Testland").unwrap();
        assert_eq!(zone.to_civil(0).unwrap().utc_offset, 13 * 3600);

        // Cached: the same record comes back
        let again = store.get("Pacific/Testland").unwrap();
        assert!(Arc::ptr_eq(&zone, &again));

        // Eviction doesn't invalidate outstanding handles
        store.clear_cache();
        assert_eq!(zone.to_civil(0).unwrap().utc_offset, 13 * 3600);
        let reloaded = store.get("Pacific/Testland").unwrap();
        assert!(!Arc::ptr_eq(&zone, &reloaded));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_and_invalid() {
        let dir = tmp_zoneinfo();
        let store = ZoneStore::with_paths(vec![dir.clone()]);

        assert!(matches!(
            store.get("Atlantis/Lost_City"),
            Err(Error::ZoneNotFound)
        ));
        // unparseable files are treated as absent
        assert!(matches!(store.get("Broken"), Err(Error::ZoneNotFound)));
        // path traversal is rejected before touching the filesystem
        assert!(matches!(
            store.get("../Pacific/Testland"),
            Err(Error::ZoneNotFound)
        ));
        assert!(matches!(store.get(""), Err(Error::ZoneNotFound)));

        fs::remove_dir_all(dir).unwrap();
    }
}
