//! Idle-expiring cache for publisher handles.
//!
//! The worker reads and fills the cache on every publish; a background
//! sweeper evicts entries that have not been used for a while. Both go
//! through the cache's own lock, so the cache shares nothing with the
//! request table.

use std::{
  collections::HashMap,
  hash::Hash,
  time::{Duration, Instant},
};

use parking_lot::Mutex;

#[derive(Debug)]
struct Slot<V> {
  value:     V,
  last_used: Instant,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
  entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
  fn default() -> Self {
    Self { entries: Mutex::new(HashMap::new()) }
  }
}

impl<K, V> TtlCache<K, V>
where
  K: Eq + Hash + Clone,
  V: Clone,
{
  pub fn new() -> Self { Self::default() }

  /// Return the cached value for `key`, creating it with `open` on a miss.
  /// Either way the entry counts as used now.
  pub fn get_or_try_insert_with<E>(
    &self,
    key: K,
    open: impl FnOnce() -> Result<V, E>,
  ) -> Result<V, E> {
    let now = Instant::now();
    let mut entries = self.entries.lock();

    if let Some(slot) = entries.get_mut(&key) {
      slot.last_used = now;
      return Ok(slot.value.clone());
    }

    let value = open()?;
    entries.insert(key, Slot { value: value.clone(), last_used: now });
    Ok(value)
  }

  pub fn remove(&self, key: &K) -> Option<V> {
    self.entries.lock().remove(key).map(|slot| slot.value)
  }

  /// Remove and return every entry unused for at least `max_idle` as of
  /// `now`.
  pub fn evict_idle(&self, now: Instant, max_idle: Duration) -> Vec<(K, V)> {
    let mut entries = self.entries.lock();
    let stale: Vec<K> = entries
      .iter()
      .filter(|(_, slot)| now.saturating_duration_since(slot.last_used) >= max_idle)
      .map(|(k, _)| k.clone())
      .collect();

    stale
      .into_iter()
      .filter_map(|k| entries.remove(&k).map(|slot| (k, slot.value)))
      .collect()
  }

  /// Remove and return everything.
  pub fn drain(&self) -> Vec<(K, V)> {
    self
      .entries
      .lock()
      .drain()
      .map(|(k, slot)| (k, slot.value))
      .collect()
  }

  pub fn len(&self) -> usize { self.entries.lock().len() }

  pub fn is_empty(&self) -> bool { self.entries.lock().is_empty() }
}
