//! Trigger Overlap Cache
//!
//! Tracks sensor overlap episodes across steps so enter/exit callbacks
//! fire exactly once per contiguous episode, not once per frame of
//! continued contact.
//!
//! A cache entry is keyed by the *unordered* pair of (object, child index)
//! sides: multi-child shapes (tile grids, chains) can overlap the same two
//! bodies at several child indices simultaneously, and each of those is an
//! independent episode.
//!
//! Per step the integration layer resets the cache, re-adds every
//! currently qualifying overlap (firing enter for pairs not seen before)
//! and prunes entries that were not re-added (firing exit for each).

use std::collections::BTreeMap;

use tracing::warn;

use crate::body::BodyHandle;
use crate::events::TriggerData;

/// One side of an overlap pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OverlapSide {
    pub object: BodyHandle,
    pub child: u32,
}

/// Unordered pair key: the smaller side always comes first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OverlapKey {
    lo: OverlapSide,
    hi: OverlapSide,
}

impl OverlapKey {
    #[must_use]
    pub fn new(a: OverlapSide, b: OverlapSide) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }
}

struct OverlapEntry {
    data: TriggerData,
    /// Re-added during the current step?
    current: bool,
}

/// Outcome of [`OverlapCache::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapAdd {
    /// New episode: fire the enter callback
    Entered,
    /// Episode continues: fire nothing
    Continued,
    /// Cache full: overlap not tracked this step
    Rejected,
}

/// Capacity-bounded overlap episode tracker.
pub struct OverlapCache {
    entries: BTreeMap<OverlapKey, OverlapEntry>,
    capacity: usize,
}

impl OverlapCache {
    /// Create a cache holding at most `capacity` concurrent episodes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Begin a step: mark every tracked episode as not-yet-seen.
    pub fn reset(&mut self) {
        for entry in self.entries.values_mut() {
            entry.current = false;
        }
    }

    /// Record a qualifying overlap for this step.
    pub fn add(&mut self, key: OverlapKey, data: TriggerData) -> OverlapAdd {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.current = true;
            return OverlapAdd::Continued;
        }
        if self.entries.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                "trigger overlap cache full, overlap not tracked"
            );
            return OverlapAdd::Rejected;
        }
        self.entries.insert(key, OverlapEntry { data, current: true });
        OverlapAdd::Entered
    }

    /// End a step: drop every episode that was not re-added, invoking the
    /// exit callback for each.
    pub fn prune<F: FnMut(&TriggerData)>(&mut self, mut on_exit: F) {
        let stale: Vec<OverlapKey> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.current)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            if let Some(entry) = self.entries.remove(&key) {
                on_exit(&entry.data);
            }
        }
    }

    /// Forget every episode involving an object, without exit callbacks.
    /// Used when the object itself is destroyed.
    pub fn remove_object(&mut self, object: BodyHandle) {
        self.entries
            .retain(|key, _| key.lo.object != object && key.hi.object != object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;

    fn handle(index: u32) -> BodyHandle {
        BodyHandle(Handle {
            index,
            generation: 0,
        })
    }

    fn key(a: u32, child_a: u32, b: u32, child_b: u32) -> OverlapKey {
        OverlapKey::new(
            OverlapSide {
                object: handle(a),
                child: child_a,
            },
            OverlapSide {
                object: handle(b),
                child: child_b,
            },
        )
    }

    fn data(a: u32, b: u32) -> TriggerData {
        TriggerData {
            object_a: handle(a),
            user_data_a: a as u64,
            object_b: handle(b),
            user_data_b: b as u64,
            group_a: 1,
            group_b: 1,
        }
    }

    #[test]
    fn test_enter_fires_once_per_episode() {
        let mut cache = OverlapCache::new(16);

        // Step 1: new overlap
        cache.reset();
        assert_eq!(cache.add(key(0, 0, 1, 0), data(0, 1)), OverlapAdd::Entered);
        let mut exits = 0;
        cache.prune(|_| exits += 1);
        assert_eq!(exits, 0);

        // Steps 2..5: continued overlap, no events
        for _ in 0..4 {
            cache.reset();
            assert_eq!(cache.add(key(0, 0, 1, 0), data(0, 1)), OverlapAdd::Continued);
            cache.prune(|_| exits += 1);
        }
        assert_eq!(exits, 0, "no exit while the episode persists");

        // Step 6: overlap gone, exactly one exit
        cache.reset();
        cache.prune(|_| exits += 1);
        assert_eq!(exits, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_is_unordered() {
        assert_eq!(key(3, 1, 7, 2), key(7, 2, 3, 1));
    }

    #[test]
    fn test_child_indices_are_independent_episodes() {
        let mut cache = OverlapCache::new(16);
        cache.reset();
        // Same two bodies, two grid cells
        assert_eq!(cache.add(key(0, 4, 1, 0), data(0, 1)), OverlapAdd::Entered);
        assert_eq!(cache.add(key(0, 5, 1, 0), data(0, 1)), OverlapAdd::Entered);
        assert_eq!(cache.len(), 2);

        // One cell stops overlapping: exactly one exit
        cache.reset();
        cache.add(key(0, 4, 1, 0), data(0, 1));
        let mut exits = 0;
        cache.prune(|_| exits += 1);
        assert_eq!(exits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_rejection() {
        let mut cache = OverlapCache::new(2);
        cache.reset();
        assert_eq!(cache.add(key(0, 0, 1, 0), data(0, 1)), OverlapAdd::Entered);
        assert_eq!(cache.add(key(0, 0, 2, 0), data(0, 2)), OverlapAdd::Entered);
        assert_eq!(
            cache.add(key(0, 0, 3, 0), data(0, 3)),
            OverlapAdd::Rejected,
            "cache beyond capacity must reject, not grow"
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remove_object_is_silent() {
        let mut cache = OverlapCache::new(16);
        cache.reset();
        cache.add(key(0, 0, 1, 0), data(0, 1));
        cache.add(key(2, 0, 1, 0), data(2, 1));

        cache.remove_object(handle(1));
        assert!(cache.is_empty(), "all episodes of the object are forgotten");

        // Next prune fires nothing for the removed entries
        cache.reset();
        let mut exits = 0;
        cache.prune(|_| exits += 1);
        assert_eq!(exits, 0);
    }
}
