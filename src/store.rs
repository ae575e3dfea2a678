//! Keyed per-track state with per-key locking.
//!
//! The map lock is held only to look up, insert or remove an entry; mutation
//! happens under the entry's own mutex, so updates for different tracks never
//! serialize on each other while updates for one track always do. An entry
//! mutex is never waited on while the map lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use crate::track::{StreamId, TrackKey};

pub struct TrackStore<T> {
    entries: RwLock<HashMap<TrackKey, Arc<Mutex<T>>>>,
}

impl<T> Default for TrackStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TrackStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &TrackKey) -> Option<Arc<Mutex<T>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Runs `f` on the entry for `key` while holding its lock, creating the
    /// entry with `init` first if needed. The flag passed to `f` is `true`
    /// when the entry was created by this call.
    pub fn with_entry<R>(
        &self,
        key: &TrackKey,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T, bool) -> R,
    ) -> R {
        let (slot, created) = match self.entry(key) {
            Some(slot) => (slot, false),
            None => {
                let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                let mut created = false;
                let slot = map
                    .entry(key.clone())
                    .or_insert_with(|| {
                        created = true;
                        Arc::new(Mutex::new(init()))
                    })
                    .clone();

                (slot, created)
            }
        };

        let mut guard = lock(&slot);
        f(&mut guard, created)
    }

    /// Runs `f` on an existing entry.
    pub fn with_existing<R>(&self, key: &TrackKey, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = self.entry(key)?;
        let mut guard = lock(&slot);

        Some(f(&mut guard))
    }

    pub fn get_cloned(&self, key: &TrackKey) -> Option<T>
    where
        T: Clone,
    {
        self.with_existing(key, |v| v.clone())
    }

    #[inline]
    pub fn contains(&self, key: &TrackKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn remove(&self, key: &TrackKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drops every entry of `stream`, returning how many were removed.
    pub fn remove_stream(&self, stream: &StreamId) -> usize {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();

        map.retain(|key, _| &key.stream != stream);

        before - map.len()
    }

    /// Drops the entries for which `keep` returns `false`, returning how many
    /// were removed. Entries locked by someone else are kept until a later
    /// call; an entry replaced while `keep` ran is left alone.
    pub fn retain(&self, mut keep: impl FnMut(&TrackKey, &T) -> bool) -> usize {
        let slots: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        let mut stale = Vec::new();
        for (key, slot) in slots {
            let drop_it = match slot.try_lock() {
                Ok(guard) => !keep(&key, &guard),
                Err(TryLockError::Poisoned(err)) => !keep(&key, &err.into_inner()),
                Err(TryLockError::WouldBlock) => false,
            };

            if drop_it {
                stale.push((key, slot));
            }
        }

        if stale.is_empty() {
            return 0;
        }

        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for (key, slot) in stale {
            if map.get(&key).map_or(false, |current| Arc::ptr_eq(current, &slot)) {
                map.remove(&key);
                removed += 1;
            }
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
