//! Incrementally Rehashing Hash Map
//!
//! A chained hash table that never rehashes everything at once. Growing a
//! table with millions of keys in one go would stall the event loop for
//! the whole copy, so the map keeps two generations instead:
//!
//! ```text
//!            insert                         lookup / delete
//!              │                          ┌──────┴──────┐
//!              ▼                          ▼             ▼
//!   ┌──────────────────────┐     ┌──────────────┐  ┌──────────┐
//!   │ newer: 2N slots      │ ◄── │ migrate up to│◄─│ older:   │
//!   │ (all new entries)    │     │ 128 per call │  │ N slots  │
//!   └──────────────────────┘     └──────────────┘  └──────────┘
//!                                                   migrate_pos ─┘
//! ```
//!
//! When the newer table reaches a load factor of 8 it becomes the older
//! generation and an empty table twice its size takes its place. Every
//! subsequent `insert` moves a bounded amount of work from the older table
//! to the newer one until the older table is empty and dropped.
//!
//! The map stores caller-provided hash codes and leaves key equality to a
//! predicate passed with each lookup, so it can index any entry type.

use std::fmt;

/// Slot count of the first table.
const INITIAL_SLOTS: usize = 4;

/// Entries per slot that trigger a generation flip.
const MAX_LOAD_FACTOR: usize = 8;

/// Units of migration work (entries moved or empty slots skipped) per insert.
const MIGRATE_WORK: usize = 128;

struct Node<T> {
    hcode: u64,
    value: T,
    next: Option<Box<Node<T>>>,
}

/// One generation: a power-of-two slot array, each slot owning its chain.
struct Table<T> {
    slots: Vec<Option<Box<Node<T>>>>,
    mask: usize,
    size: usize,
}

impl<T> Table<T> {
    /// A table with no slots; the first insert allocates.
    fn empty() -> Self {
        Self {
            slots: Vec::new(),
            mask: 0,
            size: 0,
        }
    }

    fn with_slots(n: usize) -> Self {
        assert!(n.is_power_of_two(), "slot count {} is not a power of two", n);
        Self {
            slots: (0..n).map(|_| None).collect(),
            mask: n - 1,
            size: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, hcode: u64) -> usize {
        (hcode as usize) & self.mask
    }

    /// Prepends `node` to its chain.
    fn insert(&mut self, mut node: Box<Node<T>>) {
        let pos = self.slot(node.hcode);
        node.next = self.slots[pos].take();
        self.slots[pos] = Some(node);
        self.size += 1;
    }

    /// Appends `node` after every entry already in its chain.
    ///
    /// Migration uses this: whatever is still in the older generation was
    /// inserted before anything in the newer one, so it belongs behind it.
    fn push_back(&mut self, node: Box<Node<T>>) {
        let pos = self.slot(node.hcode);
        let mut link = &mut self.slots[pos];
        while let Some(existing) = link {
            link = &mut existing.next;
        }
        *link = Some(node);
        self.size += 1;
    }

    fn lookup(&self, hcode: u64, eq: &mut impl FnMut(&T) -> bool) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }

        let mut cur = self.slots[self.slot(hcode)].as_deref();
        while let Some(node) = cur {
            if node.hcode == hcode && eq(&node.value) {
                return Some(&node.value);
            }
            cur = node.next.as_deref();
        }
        None
    }

    fn lookup_mut(&mut self, hcode: u64, eq: &mut impl FnMut(&T) -> bool) -> Option<&mut T> {
        if self.slots.is_empty() {
            return None;
        }

        let pos = self.slot(hcode);
        let mut cur = self.slots[pos].as_deref_mut();
        while let Some(node) = cur {
            if node.hcode == hcode && eq(&node.value) {
                return Some(&mut node.value);
            }
            cur = node.next.as_deref_mut();
        }
        None
    }

    /// Unlinks the first matching node and hands back its value.
    fn remove(&mut self, hcode: u64, eq: &mut impl FnMut(&T) -> bool) -> Option<T> {
        if self.slots.is_empty() {
            return None;
        }

        let pos = self.slot(hcode);
        let mut link = &mut self.slots[pos];
        loop {
            let found = match link.as_deref() {
                None => return None,
                Some(node) => node.hcode == hcode && eq(&node.value),
            };
            if found {
                break;
            }
            link = &mut link.as_mut()?.next;
        }

        let node = link.take()?;
        let Node { value, next, .. } = *node;
        *link = next;
        self.size -= 1;
        Some(value)
    }

    fn for_each(&self, f: &mut impl FnMut(&T)) {
        for slot in &self.slots {
            let mut cur = slot.as_deref();
            while let Some(node) = cur {
                f(&node.value);
                cur = node.next.as_deref();
            }
        }
    }
}

impl<T> Drop for Table<T> {
    // Unlink chains iteratively; the default recursive drop could overflow
    // the stack on a long chain of colliding keys.
    fn drop(&mut self) {
        for slot in &mut self.slots {
            let mut cur = slot.take();
            while let Some(mut node) = cur {
                cur = node.next.take();
            }
        }
    }
}

/// A hash map of `T` entries keyed by caller-supplied 64-bit hash codes,
/// resized incrementally across two generations.
///
/// # Example
///
/// ```
/// use pollkv::storage::{hash_bytes, HMap};
///
/// let mut map: HMap<(String, u32)> = HMap::new();
/// map.insert(hash_bytes(b"apples"), ("apples".to_string(), 3));
///
/// let hit = map.lookup(hash_bytes(b"apples"), |(k, _)| k == "apples");
/// assert_eq!(hit.map(|(_, n)| *n), Some(3));
///
/// assert!(map.delete(hash_bytes(b"apples"), |(k, _)| k == "apples").is_some());
/// assert!(map.is_empty());
/// ```
pub struct HMap<T> {
    newer: Table<T>,
    /// Present only while a migration is in progress
    older: Option<Table<T>>,
    /// Next slot of `older` to migrate
    migrate_pos: usize,
}

impl<T> Default for HMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HMap<T> {
    /// Creates an empty map. No slots are allocated until the first insert.
    pub fn new() -> Self {
        Self {
            newer: Table::empty(),
            older: None,
            migrate_pos: 0,
        }
    }

    /// Finds the entry with hash code `hcode` for which `eq` returns `true`.
    ///
    /// Searches the newer generation first, then the older one.
    pub fn lookup(&self, hcode: u64, mut eq: impl FnMut(&T) -> bool) -> Option<&T> {
        if let Some(found) = self.newer.lookup(hcode, &mut eq) {
            return Some(found);
        }
        self.older.as_ref()?.lookup(hcode, &mut eq)
    }

    /// Like [`lookup`](Self::lookup), for in-place updates.
    pub fn lookup_mut(&mut self, hcode: u64, mut eq: impl FnMut(&T) -> bool) -> Option<&mut T> {
        if let Some(found) = self.newer.lookup_mut(hcode, &mut eq) {
            return Some(found);
        }
        self.older.as_mut()?.lookup_mut(hcode, &mut eq)
    }

    /// Inserts `value` into the newer generation.
    ///
    /// Does not check for an existing entry with the same key. A repeated
    /// key shadows the earlier copy, which lookups reach again only after
    /// the newer one is deleted. Use [`upsert`](Self::upsert) to replace.
    pub fn insert(&mut self, hcode: u64, value: T) {
        if self.newer.capacity() == 0 {
            self.newer = Table::with_slots(INITIAL_SLOTS);
        }

        self.newer.insert(Box::new(Node {
            hcode,
            value,
            next: None,
        }));

        if self.older.is_none() && self.newer.size >= self.newer.capacity() * MAX_LOAD_FACTOR {
            self.start_migration();
        }
        self.help_migrate();
    }

    /// Replaces the value of the entry matching `eq`, or inserts `value` if
    /// there is none. Returns the replaced value.
    pub fn upsert(&mut self, hcode: u64, value: T, eq: impl FnMut(&T) -> bool) -> Option<T> {
        if let Some(slot) = self.lookup_mut(hcode, eq) {
            return Some(std::mem::replace(slot, value));
        }
        self.insert(hcode, value);
        None
    }

    /// Removes and returns the entry matching `eq`.
    ///
    /// Deletion never performs migration work.
    pub fn delete(&mut self, hcode: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        if let Some(removed) = self.newer.remove(hcode, &mut eq) {
            return Some(removed);
        }
        let older = self.older.as_mut()?;
        let removed = older.remove(hcode, &mut eq)?;
        if older.size == 0 {
            self.finish_migration();
        }
        Some(removed)
    }

    /// Drops every entry and both generations.
    pub fn clear(&mut self) {
        self.newer = Table::empty();
        self.older = None;
        self.migrate_pos = 0;
    }

    /// Number of live entries across both generations.
    #[inline]
    pub fn len(&self) -> usize {
        self.newer.size + self.older.as_ref().map_or(0, |t| t.size)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count of the newer generation.
    pub fn capacity(&self) -> usize {
        self.newer.capacity()
    }

    /// `true` while entries are still being moved out of the older table.
    pub fn is_migrating(&self) -> bool {
        self.older.is_some()
    }

    /// Calls `f` on every entry, in no particular order.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.newer.for_each(&mut f);
        if let Some(older) = &self.older {
            older.for_each(&mut f);
        }
    }

    fn start_migration(&mut self) {
        let slots = (self.newer.capacity() * 2).max(INITIAL_SLOTS);
        let older = std::mem::replace(&mut self.newer, Table::with_slots(slots));
        self.older = Some(older);
        self.migrate_pos = 0;
    }

    /// Moves a bounded amount of the older generation into the newer one.
    fn help_migrate(&mut self) {
        let Some(older) = self.older.as_mut() else {
            return;
        };

        let mut work = 0;
        while work < MIGRATE_WORK && older.size > 0 {
            let pos = self.migrate_pos;
            match older.slots[pos].take() {
                Some(mut node) => {
                    older.slots[pos] = node.next.take();
                    older.size -= 1;
                    self.newer.push_back(node);
                }
                None => self.migrate_pos += 1,
            }
            work += 1;
        }

        if older.size == 0 {
            self.finish_migration();
        }
    }

    fn finish_migration(&mut self) {
        self.older = None;
        self.migrate_pos = 0;
    }
}

impl<T: fmt::Debug> fmt::Debug for HMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("migrating", &self.is_migrating())
            .field("migrate_pos", &self.migrate_pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::hash::hash_bytes;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        key: String,
        value: u64,
    }

    fn entry(key: &str, value: u64) -> Entry {
        Entry {
            key: key.to_string(),
            value,
        }
    }

    fn key_eq(key: &str) -> impl FnMut(&Entry) -> bool + '_ {
        move |e: &Entry| e.key == key
    }

    fn chain_len<T>(table: &Table<T>, pos: usize) -> usize {
        let mut len = 0;
        let mut cur = table.slots[pos].as_deref();
        while let Some(node) = cur {
            len += 1;
            cur = node.next.as_deref();
        }
        len
    }

    #[test]
    fn test_empty_map() {
        let mut map: HMap<Entry> = HMap::new();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 0);
        assert!(map.lookup(0, key_eq("missing")).is_none());
        assert!(map.delete(0, key_eq("missing")).is_none());
    }

    #[test]
    fn test_colliding_codes_share_a_chain() {
        let mut map = HMap::new();
        map.insert(0, entry("zero", 0));
        map.insert(4, entry("four", 4));

        // Four slots, mask 3: both codes land in slot 0
        assert_eq!(map.capacity(), 4);
        assert_eq!(map.newer.mask, 3);
        assert_eq!(chain_len(&map.newer, 0), 2);

        assert_eq!(map.lookup(0, key_eq("zero")).unwrap().value, 0);
        assert_eq!(map.lookup(4, key_eq("four")).unwrap().value, 4);

        assert_eq!(map.delete(0, key_eq("zero")).unwrap().value, 0);
        assert_eq!(chain_len(&map.newer, 0), 1);
        assert_eq!(map.lookup(4, key_eq("four")).unwrap().value, 4);
        assert!(map.lookup(0, key_eq("zero")).is_none());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_same_hash_different_keys() {
        // The predicate, not the hash, decides identity
        let mut map = HMap::new();
        map.insert(42, entry("a", 1));
        map.insert(42, entry("b", 2));

        assert_eq!(map.lookup(42, key_eq("a")).unwrap().value, 1);
        assert_eq!(map.lookup(42, key_eq("b")).unwrap().value, 2);
        assert!(map.lookup(42, key_eq("c")).is_none());
    }

    #[test]
    fn test_delete_from_middle_of_chain() {
        let mut map = HMap::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            map.insert(1, entry(key, i as u64));
        }

        assert_eq!(map.delete(1, key_eq("b")).unwrap().key, "b");
        assert_eq!(map.lookup(1, key_eq("a")).unwrap().value, 0);
        assert_eq!(map.lookup(1, key_eq("c")).unwrap().value, 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_growth_triggers_incremental_migration() {
        let mut map = HMap::new();

        // 4 slots * load factor 8 = 32 entries flips the generation
        for i in 0..31u64 {
            map.insert(i, i);
        }
        assert!(!map.is_migrating());
        assert_eq!(map.capacity(), 4);

        map.insert(31, 31);
        assert_eq!(map.capacity(), 8);
        // 32 entries is well under one round of work, so the flip finished at once
        assert!(!map.is_migrating());
        assert_eq!(map.len(), 32);

        for i in 0..32u64 {
            assert_eq!(map.lookup(i, |v| *v == i), Some(&i));
        }
    }

    #[test]
    fn test_migration_spreads_over_many_inserts() {
        let mut map = HMap::new();
        let mut saw_migration = false;
        let mut max_older = 0;

        for i in 0..100_000u64 {
            map.insert(hash_bytes(&i.to_le_bytes()), i);
            if let Some(older) = &map.older {
                saw_migration = true;
                max_older = max_older.max(older.size);
                // A key is in exactly one generation at a time
                assert_eq!(map.newer.size + older.size, map.len());
            }
        }

        assert!(saw_migration);
        // The older generation was large when it was demoted, so it took
        // many inserts to drain it rather than one
        assert!(max_older > MIGRATE_WORK);
        assert_eq!(map.len(), 100_000);

        for i in (0..100_000u64).step_by(997) {
            assert_eq!(map.lookup(hash_bytes(&i.to_le_bytes()), |v| *v == i), Some(&i));
        }
    }

    #[test]
    fn test_lookup_and_delete_reach_older_generation() {
        let mut map = HMap::new();
        let mut i = 0u64;
        // Insert until a migration is underway
        while !map.is_migrating() || map.older.as_ref().map_or(0, |t| t.size) < 10 {
            map.insert(hash_bytes(&i.to_le_bytes()), i);
            i += 1;
        }

        let older = map.older.as_ref().unwrap();
        let mut in_older = Vec::new();
        older.for_each(&mut |v: &u64| in_older.push(*v));
        let victim = in_older[0];
        let hcode = hash_bytes(&victim.to_le_bytes());
        let before = map.len();

        assert_eq!(map.lookup(hcode, |v| *v == victim), Some(&victim));
        let migrate_pos = map.migrate_pos;
        assert_eq!(map.delete(hcode, |v| *v == victim), Some(victim));
        // Deleting did not advance the migration
        assert_eq!(map.migrate_pos, migrate_pos);
        assert_eq!(map.len(), before - 1);
        assert!(map.lookup(hcode, |v| *v == victim).is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut map = HMap::new();
        let h = hash_bytes(b"counter");

        assert_eq!(map.upsert(h, entry("counter", 1), key_eq("counter")), None);
        let old = map.upsert(h, entry("counter", 2), key_eq("counter"));
        assert_eq!(old.unwrap().value, 1);

        assert_eq!(map.len(), 1);
        assert_eq!(map.lookup(h, key_eq("counter")).unwrap().value, 2);
    }

    #[test]
    fn test_lookup_mut() {
        let mut map = HMap::new();
        let h = hash_bytes(b"k");
        map.insert(h, entry("k", 10));

        map.lookup_mut(h, key_eq("k")).unwrap().value += 5;
        assert_eq!(map.lookup(h, key_eq("k")).unwrap().value, 15);
    }

    #[test]
    fn test_clear() {
        let mut map = HMap::new();
        for i in 0..1000u64 {
            map.insert(i, i);
        }
        map.clear();

        assert!(map.is_empty());
        assert!(!map.is_migrating());
        assert_eq!(map.capacity(), 0);
        assert!(map.lookup(5, |v| *v == 5).is_none());

        // Usable again after clearing
        map.insert(5, 5);
        assert_eq!(map.lookup(5, |v| *v == 5), Some(&5));
    }

    #[test]
    fn test_for_each_visits_both_generations() {
        let mut map = HMap::new();
        let mut i = 0u64;
        while !map.is_migrating() || map.older.as_ref().map_or(0, |t| t.size) == 0 {
            map.insert(hash_bytes(&i.to_le_bytes()), i);
            i += 1;
        }

        let mut seen = Vec::new();
        map.for_each(|v| seen.push(*v));
        seen.sort_unstable();
        assert_eq!(seen, (0..i).collect::<Vec<_>>());
    }

    #[test]
    fn test_long_chain_drops_without_overflow() {
        // Every node collides into one slot
        let mut table = Table::with_slots(INITIAL_SLOTS);
        for i in 0..200_000u64 {
            table.insert(Box::new(Node {
                hcode: 7,
                value: i,
                next: None,
            }));
        }
        assert_eq!(chain_len(&table, 3), 200_000);
        drop(table);
    }

    #[test]
    fn test_migration_keeps_chain_order() {
        let mut table = Table::with_slots(INITIAL_SLOTS);
        table.insert(Box::new(Node {
            hcode: 1,
            value: "newest",
            next: None,
        }));
        table.push_back(Box::new(Node {
            hcode: 5,
            value: "migrated",
            next: None,
        }));

        let head = table.slots[1].as_deref().unwrap();
        assert_eq!(head.value, "newest");
        assert_eq!(head.next.as_deref().unwrap().value, "migrated");
        assert_eq!(table.size, 2);
    }

    #[test]
    fn test_reinsert_during_migration_keeps_latest() {
        let mut map = HMap::new();
        let mut i = 0u64;
        while map.older.as_ref().map_or(0, |t| t.size) < 1000 {
            map.insert(hash_bytes(&i.to_le_bytes()), (i, "v1"));
            i += 1;
        }

        // A key whose first copy is still waiting in the older generation
        let mut in_older = Vec::new();
        map.older
            .as_ref()
            .unwrap()
            .for_each(&mut |e: &(u64, &str)| in_older.push(e.0));
        let key = in_older[in_older.len() / 2];
        let h = hash_bytes(&key.to_le_bytes());

        map.insert(h, (key, "v2"));
        assert_eq!(map.lookup(h, |e| e.0 == key).map(|e| e.1), Some("v2"));

        // Drive the migration to completion
        while map.is_migrating() {
            map.insert(hash_bytes(&i.to_le_bytes()), (i, "v1"));
            i += 1;
        }
        assert_eq!(map.lookup(h, |e| e.0 == key).map(|e| e.1), Some("v2"));

        // Deleting the latest copy exposes the earlier one
        assert_eq!(map.delete(h, |e| e.0 == key).map(|e| e.1), Some("v2"));
        assert_eq!(map.lookup(h, |e| e.0 == key).map(|e| e.1), Some("v1"));
    }

    #[test]
    fn test_insert_shadows_across_many_migrations() {
        let mut map = HMap::new();
        let keys = 500u64;
        // Every key is written three times while the map grows underneath
        for round in 0..3u64 {
            for k in 0..keys {
                map.insert(hash_bytes(&k.to_le_bytes()), (k, round));
            }
            for filler in 0..5_000u64 {
                let id = 1_000_000 * (round + 1) + filler;
                map.insert(hash_bytes(&id.to_le_bytes()), (id, 0));
            }
        }

        for k in 0..keys {
            let found = map.lookup(hash_bytes(&k.to_le_bytes()), |e| e.0 == k);
            assert_eq!(found.map(|e| e.1), Some(2));
        }
    }

    #[test]
    fn test_matches_std_hashmap_under_random_operations() {
        // Deterministic xorshift so failures reproduce
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut map: HMap<Entry> = HMap::new();
        let mut model: HashMap<String, u64> = HashMap::new();

        for step in 0..50_000u64 {
            let key = format!("key:{}", next() % 2_000);
            let h = hash_bytes(key.as_bytes());

            match next() % 10 {
                0..=5 => {
                    let old = map.upsert(h, entry(&key, step), key_eq(&key));
                    let expected = model.insert(key.clone(), step);
                    assert_eq!(old.map(|e| e.value), expected);
                }
                6..=7 => {
                    let removed = map.delete(h, key_eq(&key));
                    assert_eq!(removed.map(|e| e.value), model.remove(&key));
                }
                _ => {
                    let found = map.lookup(h, key_eq(&key)).map(|e| e.value);
                    assert_eq!(found, model.get(&key).copied());
                }
            }

            assert_eq!(map.len(), model.len());
        }

        for (key, value) in &model {
            let found = map.lookup(hash_bytes(key.as_bytes()), key_eq(key));
            assert_eq!(found.map(|e| e.value), Some(*value));
        }
    }
}
