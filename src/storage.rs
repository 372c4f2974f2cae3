use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::error::CommandError;
use crate::glob::glob_match;
use crate::hyperloglog::HyperLogLog;
use crate::zset::SortedSet;

pub type Key = Vec<u8>;
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(SortedSet),
    HyperLogLog(HyperLogLog),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    List,
    Hash,
    Set,
    ZSet,
    HyperLogLog,
}

impl ValueKind {
    /// Name reported by TYPE. HyperLogLogs are strings on a real server.
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::String | ValueKind::HyperLogLog => "string",
            ValueKind::List => "list",
            ValueKind::Hash => "hash",
            ValueKind::Set => "set",
            ValueKind::ZSet => "zset",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Hash(_) => ValueKind::Hash,
            Value::Set(_) => ValueKind::Set,
            Value::ZSet(_) => ValueKind::ZSet,
            Value::HyperLogLog(_) => ValueKind::HyperLogLog,
        }
    }

    /// Collections are deleted when they become empty; strings never are.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) | Value::HyperLogLog(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

/// Maps a Rust collection type onto its `Value` variant.
pub trait Stored: Default + Sized {
    const KIND: ValueKind;
    fn view(value: &Value) -> Option<&Self>;
    fn view_mut(value: &mut Value) -> Option<&mut Self>;
    fn into_value(self) -> Value;
}

macro_rules! impl_stored {
    ($ty:ty, $variant:ident) => {
        impl Stored for $ty {
            const KIND: ValueKind = ValueKind::$variant;

            fn view(value: &Value) -> Option<&Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(value: &mut Value) -> Option<&mut Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_stored!(Vec<u8>, String);
impl_stored!(VecDeque<Vec<u8>>, List);
impl_stored!(HashMap<Vec<u8>, Vec<u8>>, Hash);
impl_stored!(HashSet<Vec<u8>>, Set);
impl_stored!(SortedSet, ZSet);
impl_stored!(HyperLogLog, HyperLogLog);

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Absolute unix time in milliseconds.
    pub expire_at: Option<i64>,
    pub version: u64,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expire_at, Some(at) if now >= at)
    }
}

/// One numbered logical database.
pub struct Database {
    entries: HashMap<Key, Entry>,
    /// Keys that carry an expiry, sampled by the active sweep.
    volatile: HashSet<Key>,
    /// key -> sessions watching it
    watchers: HashMap<Key, HashSet<SessionId>>,
    /// Version left behind by deleting a watched key.
    tombstones: HashMap<Key, u64>,
    /// Keys written since the blocking registry last looked.
    touched: Vec<Key>,
    versions: Arc<AtomicU64>,
}

impl Database {
    pub fn new(versions: Arc<AtomicU64>) -> Self {
        Database {
            entries: HashMap::new(),
            volatile: HashSet::new(),
            watchers: HashMap::new(),
            tombstones: HashMap::new(),
            touched: Vec::new(),
            versions,
        }
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Passive expiry. Returns true if the key was expired and removed.
    pub fn expire_if_needed(&mut self, key: &[u8], now: i64) -> bool {
        let expired = self
            .entries
            .get(key)
            .map_or(false, |entry| entry.is_expired(now));
        if expired {
            self.remove_entry(key);
        }
        expired
    }

    pub fn get(&mut self, key: &[u8], now: i64) -> Option<&Entry> {
        self.expire_if_needed(key, now);
        self.entries.get(key)
    }

    pub fn contains(&mut self, key: &[u8], now: i64) -> bool {
        self.get(key, now).is_some()
    }

    pub fn kind_of(&mut self, key: &[u8], now: i64) -> Option<ValueKind> {
        self.get(key, now).map(|e| e.value.kind())
    }

    /// Typed read. A missing key is `Ok(None)`; a key of another type is WRONGTYPE.
    pub fn read<T: Stored>(&mut self, key: &[u8], now: i64) -> Result<Option<&T>, CommandError> {
        match self.get(key, now) {
            None => Ok(None),
            Some(entry) => T::view(&entry.value).map(Some).ok_or(CommandError::WrongType),
        }
    }

    /// Typed read-modify-write. `f` works on the stored value, or on a fresh
    /// default if the key is missing, and reports whether it changed anything.
    /// Only a change creates the key, bumps its version, or deletes it when
    /// it became an empty collection.
    pub fn write<T, R, F>(&mut self, key: &[u8], now: i64, f: F) -> Result<R, CommandError>
    where
        T: Stored,
        F: FnOnce(&mut T) -> Result<(R, bool), CommandError>,
    {
        self.expire_if_needed(key, now);
        match self.entries.get_mut(key) {
            Some(entry) => {
                let slot = T::view_mut(&mut entry.value).ok_or(CommandError::WrongType)?;
                let (out, changed) = f(slot)?;
                if changed {
                    self.touch(key);
                }
                Ok(out)
            }
            None => {
                let mut fresh = T::default();
                let (out, changed) = f(&mut fresh)?;
                if changed {
                    self.insert(key.to_vec(), fresh.into_value());
                }
                Ok(out)
            }
        }
    }

    /// Stores `value`, dropping any previous expiry.
    pub fn insert(&mut self, key: Key, value: Value) {
        self.insert_entry(key, value, None);
    }

    /// Stores `value` but keeps the current expiry, if any.
    pub fn insert_keep_ttl(&mut self, key: Key, value: Value, now: i64) {
        let expire_at = self.get(&key, now).and_then(|e| e.expire_at);
        self.insert_entry(key, value, expire_at);
    }

    pub fn insert_entry(&mut self, key: Key, value: Value, expire_at: Option<i64>) {
        if value.is_empty_collection() {
            self.remove_entry(&key);
            return;
        }
        if expire_at.is_some() {
            self.volatile.insert(key.clone());
        } else {
            self.volatile.remove(&key);
        }
        let version = self.next_version();
        self.tombstones.remove(&key);
        self.touched.push(key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expire_at,
                version,
            },
        );
    }

    pub fn remove(&mut self, key: &[u8], now: i64) -> Option<Entry> {
        self.expire_if_needed(key, now);
        self.remove_entry(key)
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<Entry> {
        let removed = self.entries.remove(key)?;
        self.volatile.remove(key);
        if self.watchers.contains_key(key) {
            let version = self.next_version();
            self.tombstones.insert(key.to_vec(), version);
        }
        Some(removed)
    }

    /// Records an in-place mutation: fresh version, wake-up bookkeeping, and
    /// removal if the value is now an empty collection.
    pub fn touch(&mut self, key: &[u8]) {
        let version = self.next_version();
        let empty = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.version = version;
                entry.value.is_empty_collection()
            }
            None => return,
        };
        if empty {
            self.remove_entry(key);
        } else {
            self.touched.push(key.to_vec());
        }
    }

    /// Sets or clears the absolute expiry. Returns false if the key is missing.
    pub fn set_expiry(&mut self, key: &[u8], expire_at: Option<i64>, now: i64) -> bool {
        self.expire_if_needed(key, now);
        let version = self.next_version();
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.expire_at = expire_at;
        entry.version = version;
        if expire_at.is_some() {
            self.volatile.insert(key.to_vec());
        } else {
            self.volatile.remove(key);
        }
        true
    }

    /// Version a WATCH compares against: the entry's, else the tombstone's, else 0.
    pub fn version_of(&mut self, key: &[u8], now: i64) -> u64 {
        self.expire_if_needed(key, now);
        match self.entries.get(key) {
            Some(entry) => entry.version,
            None => self.tombstones.get(key).copied().unwrap_or(0),
        }
    }

    /// Forces a watched key to look modified (FLUSHDB, SWAPDB).
    fn invalidate(&mut self, key: &[u8]) {
        let version = self.next_version();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.version = version;
        } else {
            self.tombstones.insert(key.to_vec(), version);
        }
    }

    pub fn add_watcher(&mut self, key: &[u8], session: SessionId) {
        self.watchers.entry(key.to_vec()).or_default().insert(session);
    }

    pub fn remove_watcher(&mut self, key: &[u8], session: SessionId) {
        if let Some(sessions) = self.watchers.get_mut(key) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.watchers.remove(key);
                self.tombstones.remove(key);
            }
        }
    }

    pub fn take_touched(&mut self) -> Vec<Key> {
        std::mem::take(&mut self.touched)
    }

    /// Live keys, unordered. Expired entries are purged on the way.
    pub fn keys(&mut self, now: i64) -> Vec<Key> {
        self.purge_expired(now);
        self.entries.keys().cloned().collect()
    }

    pub fn len(&mut self, now: i64) -> usize {
        self.purge_expired(now);
        self.entries.len()
    }

    pub fn is_empty(&mut self, now: i64) -> bool {
        self.len(now) == 0
    }

    fn purge_expired(&mut self, now: i64) {
        let expired: Vec<Key> = self
            .volatile
            .iter()
            .filter(|k| self.entries.get(*k).map_or(true, |e| e.is_expired(now)))
            .cloned()
            .collect();
        for key in expired {
            self.remove_entry(&key);
            self.volatile.remove(&key);
        }
    }

    pub fn random_key<R: Rng>(&mut self, now: i64, rng: &mut R) -> Option<Key> {
        self.purge_expired(now);
        self.entries.keys().choose(rng).cloned()
    }

    /// Drops every key. Watched keys are left looking modified.
    pub fn flush(&mut self) {
        let watched: Vec<Key> = self.watchers.keys().cloned().collect();
        self.entries.clear();
        self.volatile.clear();
        self.touched.clear();
        for key in watched {
            self.invalidate(&key);
        }
    }

    /// Exchanges keyspaces with `other`; watch indexes stay with their
    /// database number.
    pub fn swap_contents(&mut self, other: &mut Database) {
        std::mem::swap(&mut self.entries, &mut other.entries);
        std::mem::swap(&mut self.volatile, &mut other.volatile);
        std::mem::swap(&mut self.tombstones, &mut other.tombstones);
        for db in [&mut *self, &mut *other] {
            let watched: Vec<Key> = db.watchers.keys().cloned().collect();
            for key in watched {
                db.invalidate(&key);
            }
            let present: Vec<Key> = db.entries.keys().cloned().collect();
            db.touched.extend(present);
        }
    }

    /// Up to `count` keys drawn at random from those carrying an expiry.
    pub fn sample_volatile<R: Rng>(&self, count: usize, rng: &mut R) -> Vec<Key> {
        self.volatile.iter().cloned().choose_multiple(rng, count)
    }

    pub fn volatile_len(&self) -> usize {
        self.volatile.len()
    }

    /// SCAN over the keyspace; see [`scan_page`].
    pub fn scan(&mut self, cursor: usize, opts: &ScanOptions, now: i64) -> (usize, Vec<Key>) {
        let keys = self.keys(now);
        let type_filter = opts.type_filter.as_deref();
        let entries = &self.entries;
        scan_page(keys, cursor, opts, |key| {
            type_filter.map_or(true, |wanted| {
                entries.get(key).map_or(false, |e| {
                    e.value.kind().type_name().as_bytes().eq_ignore_ascii_case(wanted)
                })
            })
        })
    }
}

/// MATCH / COUNT / TYPE options shared by the SCAN family.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub pattern: Option<Vec<u8>>,
    pub count: usize,
    pub type_filter: Option<Vec<u8>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            pattern: None,
            count: 10,
            type_filter: None,
        }
    }
}

/// Stateless cursor paging: the cursor is an offset into the sorted item
/// order, so an unchanged collection yields every item exactly once.
pub fn scan_page<F>(
    mut items: Vec<Key>,
    cursor: usize,
    opts: &ScanOptions,
    mut keep: F,
) -> (usize, Vec<Key>)
where
    F: FnMut(&[u8]) -> bool,
{
    if cursor >= items.len() {
        return (0, Vec::new());
    }
    items.sort();
    let total = items.len();
    let end = cursor.saturating_add(opts.count).min(total);
    let page: Vec<Key> = items
        .drain(cursor..end)
        .filter(|item| {
            opts.pattern
                .as_deref()
                .map_or(true, |pattern| glob_match(pattern, item))
                && keep(item)
        })
        .collect();
    let next = if end >= total { 0 } else { end };
    (next, page)
}
