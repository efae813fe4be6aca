//! Named concurrent caches with LRU bounding, expiry, soft values, and
//! optional write-through persistence

use std::any::Any;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config;
use crate::config::CacheTuning;
use crate::error::{PathguardError, Result};
use crate::store::{shared_env, DiskTable, LmdbTable, NullTable};

/// Tuning for one cache. Zero `max_in_memory` (and `max_size`) means
/// unbounded; zero `expire_millis` means entries never expire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_size: usize,
    pub max_in_memory: usize,
    pub expire_millis: u64,
    pub soft_values: bool,
    pub file_store: bool,
}

impl CacheSettings {
    /// The effective in-memory bound: `max_in_memory`, falling back to
    /// `max_size`.
    fn memory_bound(&self) -> usize {
        if self.max_in_memory > 0 {
            self.max_in_memory
        } else {
            self.max_size
        }
    }

    /// Apply file-config overrides on top of the constructor's values.
    pub(crate) fn apply(&mut self, tuning: &CacheTuning) {
        if let Some(v) = tuning.max_size {
            self.max_size = v;
        }
        if let Some(v) = tuning.max_in_memory {
            self.max_in_memory = v;
        }
        if let Some(v) = tuning.expire_millis {
            self.expire_millis = v;
        }
        if let Some(v) = tuning.soft_values {
            self.soft_values = v;
        }
        if let Some(v) = tuning.file_store {
            self.file_store = v;
        }
    }
}

/// Receives synchronous notifications after the cache map changes.
pub trait CacheListener<K, V>: Send + Sync {
    fn note_key_addition(&self, _cache: &str, _key: &K, _new: &Arc<V>) {}
    fn note_key_removal(&self, _cache: &str, _key: &K, _old: &Arc<V>) {}
    fn note_key_update(&self, _cache: &str, _key: &K, _new: &Arc<V>, _old: &Arc<V>) {}
}

/// Atomic hit/miss counters.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses_not_found: AtomicU64,
    misses_expired: AtomicU64,
    misses_soft: AtomicU64,
    remove_hits: AtomicU64,
    remove_misses: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatSnapshot {
    pub hits: u64,
    pub misses_not_found: u64,
    pub misses_expired: u64,
    pub misses_soft: u64,
    pub remove_hits: u64,
    pub remove_misses: u64,
}

enum LineValue<V> {
    Hard(Arc<V>),
    Soft(Weak<V>),
}

/// One stored entry: the value, when it was loaded, and how long it
/// lives. A dead `Soft` reference reads as a reclaimed value.
struct CacheLine<V> {
    value: LineValue<V>,
    loaded_at: Option<Instant>,
    expire_after: Duration,
}

impl<V> CacheLine<V> {
    fn new(value: Arc<V>, expire_after: Duration) -> Self {
        Self {
            value: LineValue::Hard(value),
            loaded_at: (!expire_after.is_zero()).then(Instant::now),
            expire_after,
        }
    }

    fn value(&self) -> Option<Arc<V>> {
        match &self.value {
            LineValue::Hard(v) => Some(v.clone()),
            LineValue::Soft(w) => w.upgrade(),
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.loaded_at, Some(t) if t.elapsed() >= self.expire_after)
    }

    fn soften(&mut self) {
        if let LineValue::Hard(v) = &self.value {
            self.value = LineValue::Soft(Arc::downgrade(v));
        }
    }
}

enum Lookup<V> {
    Hit(Arc<V>),
    Expired,
    SoftCleared,
    Absent,
}

/// The in-memory table: unbounded concurrent map, or an LRU map behind a
/// lock when a capacity is set.
enum MemoryTable<K, V> {
    Unbounded(DashMap<K, CacheLine<V>>),
    Bounded(Mutex<LruCache<K, CacheLine<V>>>),
}

impl<K, V> MemoryTable<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(bound: usize) -> Self {
        match NonZeroUsize::new(bound) {
            Some(capacity) => MemoryTable::Bounded(Mutex::new(LruCache::new(capacity))),
            None => MemoryTable::Unbounded(DashMap::new()),
        }
    }

    /// Classify the entry under `key`, pruning expired and reclaimed
    /// lines on the way out.
    fn lookup(&self, key: &K) -> Lookup<V> {
        match self {
            MemoryTable::Unbounded(map) => {
                let outcome = match map.get(key) {
                    None => return Lookup::Absent,
                    Some(entry) => {
                        let line = entry.value();
                        if line.is_expired() {
                            Lookup::Expired
                        } else {
                            match line.value() {
                                Some(v) => Lookup::Hit(v),
                                None => Lookup::SoftCleared,
                            }
                        }
                    }
                };
                match outcome {
                    Lookup::Expired => {
                        map.remove_if(key, |_, line| line.is_expired());
                        Lookup::Expired
                    }
                    Lookup::SoftCleared => {
                        map.remove_if(key, |_, line| line.value().is_none());
                        Lookup::SoftCleared
                    }
                    hit => hit,
                }
            }
            MemoryTable::Bounded(table) => {
                let mut table = table.lock();
                let outcome = match table.get(key) {
                    None => Lookup::Absent,
                    Some(line) => {
                        if line.is_expired() {
                            Lookup::Expired
                        } else {
                            match line.value() {
                                Some(v) => Lookup::Hit(v),
                                None => Lookup::SoftCleared,
                            }
                        }
                    }
                };
                if matches!(outcome, Lookup::Expired | Lookup::SoftCleared) {
                    table.pop(key);
                }
                outcome
            }
        }
    }

    fn insert(&self, key: K, line: CacheLine<V>) -> Option<CacheLine<V>> {
        match self {
            MemoryTable::Unbounded(map) => map.insert(key, line),
            MemoryTable::Bounded(table) => {
                let mut table = table.lock();
                match table.push(key.clone(), line) {
                    // A returned pair with our key is the replaced line;
                    // anything else was a silent LRU eviction.
                    Some((evicted, old)) if evicted == key => Some(old),
                    _ => None,
                }
            }
        }
    }

    /// Insert only when no live entry exists; returns the surviving
    /// value otherwise. Atomic per key.
    fn insert_if_absent(&self, key: K, line: CacheLine<V>) -> Option<Arc<V>> {
        match self {
            MemoryTable::Unbounded(map) => match map.entry(key) {
                Entry::Occupied(mut entry) => {
                    let live = {
                        let existing = entry.get();
                        if existing.is_expired() {
                            None
                        } else {
                            existing.value()
                        }
                    };
                    match live {
                        Some(v) => Some(v),
                        None => {
                            entry.insert(line);
                            None
                        }
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(line);
                    None
                }
            },
            MemoryTable::Bounded(table) => {
                let mut table = table.lock();
                if let Some(existing) = table.peek(&key) {
                    if !existing.is_expired() {
                        if let Some(v) = existing.value() {
                            return Some(v);
                        }
                    }
                }
                table.push(key, line);
                None
            }
        }
    }

    fn remove(&self, key: &K) -> Option<CacheLine<V>> {
        match self {
            MemoryTable::Unbounded(map) => map.remove(key).map(|(_, line)| line),
            MemoryTable::Bounded(table) => table.lock().pop(key),
        }
    }

    fn contains(&self, key: &K) -> bool {
        matches!(self.lookup(key), Lookup::Hit(_))
    }

    fn len(&self) -> usize {
        match self {
            MemoryTable::Unbounded(map) => map.len(),
            MemoryTable::Bounded(table) => table.lock().len(),
        }
    }

    fn keys(&self) -> Vec<K> {
        match self {
            MemoryTable::Unbounded(map) => map.iter().map(|e| e.key().clone()).collect(),
            MemoryTable::Bounded(table) => {
                table.lock().iter().map(|(k, _)| k.clone()).collect()
            }
        }
    }

    fn values(&self) -> Vec<Arc<V>> {
        match self {
            MemoryTable::Unbounded(map) => {
                map.iter().filter_map(|e| e.value().value()).collect()
            }
            MemoryTable::Bounded(table) => {
                table.lock().iter().filter_map(|(_, line)| line.value()).collect()
            }
        }
    }

    fn drain(&self) -> Vec<(K, Arc<V>)> {
        match self {
            MemoryTable::Unbounded(map) => {
                let keys: Vec<K> = map.iter().map(|e| e.key().clone()).collect();
                let mut drained = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Some((key, line)) = map.remove(&key) {
                        if let Some(value) = line.value() {
                            drained.push((key, value));
                        }
                    }
                }
                drained
            }
            MemoryTable::Bounded(table) => {
                let mut table = table.lock();
                let mut drained = Vec::with_capacity(table.len());
                while let Some((key, line)) = table.pop_lru() {
                    if let Some(value) = line.value() {
                        drained.push((key, value));
                    }
                }
                drained
            }
        }
    }

    fn clear(&self) {
        match self {
            MemoryTable::Unbounded(map) => map.clear(),
            MemoryTable::Bounded(table) => table.lock().clear(),
        }
    }

    fn soften_all(&self) {
        match self {
            MemoryTable::Unbounded(map) => {
                for mut entry in map.iter_mut() {
                    entry.value_mut().soften();
                }
            }
            MemoryTable::Bounded(table) => {
                for (_, line) in table.lock().iter_mut() {
                    line.soften();
                }
            }
        }
    }
}

/// A named concurrent cache.
///
/// Values are shared as `Arc<V>`. When a capacity is configured the
/// coldest entry is evicted on insert over capacity; expiry is evaluated
/// lazily at read time; an optional disk table makes every write a
/// write-through and turns a memory miss into a disk probe.
pub struct Cache<K, V> {
    name: String,
    memory: MemoryTable<K, V>,
    disk: Box<dyn DiskTable<K, V>>,
    expire_after: Duration,
    soft_values: bool,
    stats: CacheStats,
    listeners: RwLock<Vec<Arc<dyn CacheListener<K, V>>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// A memory-only cache.
    pub fn new(name: impl Into<String>, settings: CacheSettings) -> Self {
        Self::with_disk(name, settings, Box::new(NullTable))
    }

    /// A cache backed by the given persistent table.
    pub fn with_disk(
        name: impl Into<String>,
        settings: CacheSettings,
        disk: Box<dyn DiskTable<K, V>>,
    ) -> Self {
        Self {
            name: name.into(),
            memory: MemoryTable::new(settings.memory_bound()),
            disk,
            expire_after: Duration::from_millis(settings.expire_millis),
            soft_values: settings.soft_values,
            stats: CacheStats::default(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_disk_backed(&self) -> bool {
        self.disk.enabled()
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.memory.lookup(key) {
            Lookup::Hit(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Lookup::Expired => {
                self.stats.misses_expired.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.disk.remove(key) {
                    warn!(cache = %self.name, error = %e, "disk remove failed");
                }
                None
            }
            Lookup::SoftCleared => {
                self.stats.misses_soft.fetch_add(1, Ordering::Relaxed);
                self.disk_fallback(key, false)
            }
            Lookup::Absent => self.disk_fallback(key, true),
        }
    }

    /// Memory missed; the disk table gets the last word. A disk hit
    /// repopulates memory.
    fn disk_fallback(&self, key: &K, count_missing: bool) -> Option<Arc<V>> {
        match self.disk.get(key) {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let value = Arc::new(value);
                self.memory
                    .insert(key.clone(), CacheLine::new(value.clone(), self.expire_after));
                Some(value)
            }
            Ok(None) => {
                if count_missing {
                    self.stats.misses_not_found.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            Err(e) => {
                warn!(cache = %self.name, error = %e, "disk read failed");
                if count_missing {
                    self.stats.misses_not_found.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// Store `value` under `key`, returning the replaced value if any.
    pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        self.put_line(key, Arc::new(value), self.expire_after)
    }

    /// Store with a per-entry time-to-live instead of the cache default.
    pub fn put_expiring(&self, key: K, value: V, ttl: Duration) -> Option<Arc<V>> {
        self.put_line(key, Arc::new(value), ttl)
    }

    fn put_line(&self, key: K, value: Arc<V>, ttl: Duration) -> Option<Arc<V>> {
        let old = self
            .memory
            .insert(key.clone(), CacheLine::new(value.clone(), ttl))
            .and_then(|line| line.value());
        let old = match old {
            Some(v) => Some(v),
            None => match self.disk.get(&key) {
                Ok(v) => v.map(Arc::new),
                Err(e) => {
                    warn!(cache = %self.name, error = %e, "disk read failed");
                    None
                }
            },
        };
        if let Err(e) = self.disk.put(&key, &value) {
            warn!(cache = %self.name, error = %e, "disk write failed");
        }
        match &old {
            None => self.note_addition(&key, &value),
            Some(prev) => self.note_update(&key, &value, prev),
        }
        old
    }

    /// Store `value` only when no live entry exists; returns the
    /// surviving value otherwise. Atomic per key: of two racing callers
    /// exactly one writes, and both observe the winning value.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        self.put_if_absent_arc(key, Arc::new(value))
    }

    /// `put_if_absent`, then the value that ended up in the cache.
    pub fn put_if_absent_and_get(&self, key: K, value: V) -> Arc<V> {
        let candidate = Arc::new(value);
        match self.put_if_absent_arc(key, candidate.clone()) {
            Some(existing) => existing,
            None => candidate,
        }
    }

    fn put_if_absent_arc(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        match self.memory.lookup(&key) {
            Lookup::Hit(existing) => return Some(existing),
            Lookup::Expired => {
                if let Err(e) = self.disk.remove(&key) {
                    warn!(cache = %self.name, error = %e, "disk remove failed");
                }
            }
            _ => {}
        }
        match self.disk.get(&key) {
            Ok(Some(existing)) => {
                let existing = Arc::new(existing);
                self.memory
                    .insert(key, CacheLine::new(existing.clone(), self.expire_after));
                return Some(existing);
            }
            Ok(None) => {}
            Err(e) => warn!(cache = %self.name, error = %e, "disk read failed"),
        }
        match self
            .memory
            .insert_if_absent(key.clone(), CacheLine::new(value.clone(), self.expire_after))
        {
            Some(existing) => Some(existing),
            None => {
                if let Err(e) = self.disk.put(&key, &value) {
                    warn!(cache = %self.name, error = %e, "disk write failed");
                }
                self.note_addition(&key, &value);
                None
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mem_old = self.memory.remove(key).and_then(|line| line.value());
        let disk_old = if self.disk.enabled() {
            match self.disk.get(key) {
                Ok(v) => v.map(Arc::new),
                Err(e) => {
                    warn!(cache = %self.name, error = %e, "disk read failed");
                    None
                }
            }
        } else {
            None
        };
        if let Err(e) = self.disk.remove(key) {
            warn!(cache = %self.name, error = %e, "disk remove failed");
        }
        match mem_old.or(disk_old) {
            Some(old) => {
                self.note_removal(key, &old);
                self.stats.remove_hits.fetch_add(1, Ordering::Relaxed);
                Some(old)
            }
            None => {
                self.stats.remove_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove every entry, notifying listeners. Counters are untouched.
    pub fn erase(&self) {
        if self.disk.enabled() {
            match self.disk.keys() {
                Ok(keys) => {
                    for key in keys {
                        let old = self.disk.get(&key).ok().flatten().map(Arc::new);
                        if let Err(e) = self.disk.remove(&key) {
                            warn!(cache = %self.name, error = %e, "disk remove failed");
                        }
                        if let Some(old) = old {
                            self.note_removal(&key, &old);
                            self.stats.remove_hits.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Err(e) => warn!(cache = %self.name, error = %e, "disk iteration failed"),
            }
            self.memory.clear();
        } else {
            for (key, value) in self.memory.drain() {
                self.note_removal(&key, &value);
                self.stats.remove_hits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Erase and zero the counters.
    pub fn clear(&self) {
        self.erase();
        self.clear_counters();
    }

    pub fn contains_key(&self, key: &K) -> bool {
        if self.memory.contains(key) {
            return true;
        }
        self.disk.contains(key).unwrap_or_else(|e| {
            warn!(cache = %self.name, error = %e, "disk read failed");
            false
        })
    }

    /// Entry count. Best-effort snapshot; the disk table is
    /// authoritative when one is configured.
    pub fn len(&self) -> usize {
        if self.disk.enabled() {
            self.disk.len().unwrap_or_else(|e| {
                warn!(cache = %self.name, error = %e, "disk iteration failed");
                0
            })
        } else {
            self.memory.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        if self.disk.enabled() {
            self.disk.keys().unwrap_or_else(|e| {
                warn!(cache = %self.name, error = %e, "disk iteration failed");
                Vec::new()
            })
        } else {
            self.memory.keys()
        }
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        if self.disk.enabled() {
            match self.disk.values() {
                Ok(values) => values.into_iter().map(Arc::new).collect(),
                Err(e) => {
                    warn!(cache = %self.name, error = %e, "disk iteration failed");
                    Vec::new()
                }
            }
        } else {
            self.memory.values()
        }
    }

    /// Downgrade every held value to a weak reference. Values still in
    /// use elsewhere survive; the rest read as soft-reference misses.
    /// Only caches configured with `soft_values` respond.
    pub fn release_memory(&self) {
        if self.soft_values {
            self.memory.soften_all();
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CacheListener<K, V>>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CacheListener<K, V>>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn note_addition(&self, key: &K, new: &Arc<V>) {
        for listener in self.listeners.read().iter() {
            listener.note_key_addition(&self.name, key, new);
        }
    }

    fn note_removal(&self, key: &K, old: &Arc<V>) {
        for listener in self.listeners.read().iter() {
            listener.note_key_removal(&self.name, key, old);
        }
    }

    fn note_update(&self, key: &K, new: &Arc<V>, old: &Arc<V>) {
        for listener in self.listeners.read().iter() {
            listener.note_key_update(&self.name, key, new, old);
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.stats.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count_not_found(&self) -> u64 {
        self.stats.misses_not_found.load(Ordering::Relaxed)
    }

    pub fn miss_count_expired(&self) -> u64 {
        self.stats.misses_expired.load(Ordering::Relaxed)
    }

    pub fn miss_count_soft(&self) -> u64 {
        self.stats.misses_soft.load(Ordering::Relaxed)
    }

    pub fn miss_count_total(&self) -> u64 {
        self.miss_count_not_found() + self.miss_count_expired() + self.miss_count_soft()
    }

    pub fn remove_hit_count(&self) -> u64 {
        self.stats.remove_hits.load(Ordering::Relaxed)
    }

    pub fn remove_miss_count(&self) -> u64 {
        self.stats.remove_misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CacheStatSnapshot {
        CacheStatSnapshot {
            hits: self.hit_count(),
            misses_not_found: self.miss_count_not_found(),
            misses_expired: self.miss_count_expired(),
            misses_soft: self.miss_count_soft(),
            remove_hits: self.remove_hit_count(),
            remove_misses: self.remove_miss_count(),
        }
    }

    pub fn clear_counters(&self) {
        self.stats.hits.store(0, Ordering::Relaxed);
        self.stats.misses_not_found.store(0, Ordering::Relaxed);
        self.stats.misses_expired.store(0, Ordering::Relaxed);
        self.stats.misses_soft.store(0, Ordering::Relaxed);
        self.stats.remove_hits.store(0, Ordering::Relaxed);
        self.stats.remove_misses.store(0, Ordering::Relaxed);
    }
}

/// Type-erased handle kept by the manager.
trait ManagedCache: Send + Sync {
    fn cache_name(&self) -> &str;
    fn clear(&self);
    fn release_memory(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K, V> ManagedCache for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn cache_name(&self) -> &str {
        self.name()
    }

    fn clear(&self) {
        Cache::clear(self);
    }

    fn release_memory(&self) {
        Cache::release_memory(self);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Named registry of caches. Per-cache file tuning is merged over the
/// caller's settings at creation time; disk-backed caches share one LMDB
/// environment per store directory.
pub struct CacheManager {
    name: String,
    store_dir: PathBuf,
    table: DashMap<String, Arc<dyn ManagedCache>>,
}

impl CacheManager {
    /// A manager whose disk store lives in the configured directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store_dir(name, config::get().store_dir())
    }

    pub fn with_store_dir(name: impl Into<String>, store_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            store_dir,
            table: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch or create a memory-only cache. A `file-store` request from
    /// config is ignored here because the value type carries no
    /// serialization contract; use [`CacheManager::get_or_create_persistent`].
    pub fn get_or_create<K, V>(&self, name: &str, settings: CacheSettings) -> Result<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        if let Some(cache) = self.find::<K, V>(name) {
            return Ok(cache);
        }
        let settings = self.tuned(name, settings);
        if settings.file_store {
            warn!(cache = name, "file store requested for a non-persistent cache; keeping it in memory");
        }
        self.register(name, Arc::new(Cache::new(name, settings)))
    }

    /// Fetch or create a cache whose entries can be written through to
    /// the shared LMDB store when `file_store` is set.
    pub fn get_or_create_persistent<K, V>(
        &self,
        name: &str,
        settings: CacheSettings,
    ) -> Result<Arc<Cache<K, V>>>
    where
        K: Serialize + DeserializeOwned + Eq + Hash + Clone + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if let Some(cache) = self.find::<K, V>(name) {
            return Ok(cache);
        }
        let settings = self.tuned(name, settings);
        let cache = if settings.file_store {
            let env = shared_env(&self.store_dir)?;
            let table = LmdbTable::open(env, name)?;
            Arc::new(Cache::with_disk(name, settings, Box::new(table)))
        } else {
            Arc::new(Cache::new(name, settings))
        };
        self.register(name, cache)
    }

    /// Look up an existing cache by name and type.
    pub fn find<K, V>(&self, name: &str) -> Option<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.table
            .get(name)
            .and_then(|entry| entry.value().clone().as_any().downcast::<Cache<K, V>>().ok())
    }

    fn register<K, V>(&self, name: &str, cache: Arc<Cache<K, V>>) -> Result<Arc<Cache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let managed: Arc<dyn ManagedCache> = cache;
        let stored = self
            .table
            .entry(name.to_string())
            .or_insert(managed)
            .value()
            .clone();
        stored.as_any().downcast::<Cache<K, V>>().map_err(|_| {
            PathguardError::Config(format!("cache {} already registered with a different type", name))
        })
    }

    fn tuned(&self, name: &str, mut settings: CacheSettings) -> CacheSettings {
        if let Some(tuning) = config::get().cache_tuning(name) {
            settings.apply(tuning);
        }
        settings
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.table.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear_all(&self) {
        for entry in self.table.iter() {
            entry.value().clear();
        }
    }

    pub fn clear_cache(&self, name: &str) {
        if let Some(entry) = self.table.get(name) {
            entry.value().clear();
        }
    }

    pub fn clear_caches_that_start_with(&self, prefix: &str) {
        for entry in self.table.iter() {
            if entry.value().cache_name().starts_with(prefix) {
                entry.value().clear();
            }
        }
    }

    /// Ask every soft-valued cache to drop its strong references.
    pub fn release_memory(&self) {
        for entry in self.table.iter() {
            entry.value().release_memory();
        }
    }
}
