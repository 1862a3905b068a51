//! Open-addressing hash table with linear probing and tombstones.
//!
//! Slot states are encoded in the key/value pair, not in a separate tag:
//!
//! - unused: key `Empty`, value `Nil`
//! - tombstone (deleted): key `Empty`, value `true`
//! - live: any other key
//!
//! Lookup skips tombstones but remembers the first one seen so insertion
//! can reuse it; probing stops at the first truly-unused slot. The table
//! grows to `max(8, 2 * capacity)` once `count + 1` would exceed 75% of
//! capacity, where `count` includes tombstones (they only disappear on
//! resize, which rehashes live entries only).
//!
//! Every entry carries its key's hash so resizing and probing never need
//! to reach back into the heap. Interned string keys make key equality a
//! plain handle comparison.

use crate::Value;

const MAX_LOAD_NUMERATOR: usize = 3;
const MAX_LOAD_DENOMINATOR: usize = 4;
const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Value,
    hash: u32,
    value: Value,
}

impl Entry {
    const UNUSED: Entry = Entry {
        key: Value::EMPTY,
        hash: 0,
        value: Value::NIL,
    };

    #[inline]
    fn is_unused_or_tombstone(&self) -> bool {
        self.key.is_empty()
    }

    #[inline]
    fn is_tombstone(&self) -> bool {
        self.key.is_empty() && !self.value.is_nil()
    }
}

/// Hash table mapping `Value` keys to `Value` values.
#[derive(Debug, Default)]
pub struct Table {
    /// Live entries plus tombstones; drives the load factor.
    count: usize,
    /// Live entries only.
    len: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            len: 0,
            entries: Vec::new(),
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: Value, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let idx = self.find_slot(key, hash);
        let entry = &self.entries[idx];
        if entry.is_unused_or_tombstone() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Inserts or updates; returns `true` when the key was not present.
    pub fn set(&mut self, key: Value, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DENOMINATOR > self.entries.len() * MAX_LOAD_NUMERATOR {
            self.grow();
        }

        let idx = self.find_slot(key, hash);
        let entry = &mut self.entries[idx];
        let is_new = entry.is_unused_or_tombstone();
        if is_new {
            // A reused tombstone already counts toward the load factor.
            if !entry.is_tombstone() {
                self.count += 1;
            }
            self.len += 1;
        }
        *entry = Entry { key, hash, value };
        is_new
    }

    /// Removes the key, leaving a tombstone to keep probe chains intact.
    pub fn delete(&mut self, key: Value, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let idx = self.find_slot(key, hash);
        let entry = &mut self.entries[idx];
        if entry.is_unused_or_tombstone() {
            return false;
        }
        *entry = Entry {
            key: Value::EMPTY,
            hash: 0,
            value: Value::TRUE,
        };
        self.len -= 1;
        true
    }

    /// Copies every live entry into `other` (used for method inheritance).
    pub fn copy_to(&self, other: &mut Table) {
        for entry in &self.entries {
            if !entry.is_unused_or_tombstone() {
                other.set(entry.key, entry.hash, entry.value);
            }
        }
    }

    /// Live `(key, value)` pairs, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.is_unused_or_tombstone())
            .map(|e| (e.key, e.value))
    }

    /// Probes the chain for `hash`, returning the first key for which
    /// `pred` holds. Used by string interning, where equality must compare
    /// bytes rather than handles.
    pub fn find_key_by(&self, hash: u32, pred: impl Fn(Value) -> bool) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut idx = hash as usize % capacity;
        loop {
            let entry = &self.entries[idx];
            if entry.is_unused_or_tombstone() {
                if !entry.is_tombstone() {
                    return None;
                }
            } else if entry.hash == hash && pred(entry.key) {
                return Some(entry.key);
            }
            idx = (idx + 1) % capacity;
        }
    }

    /// Index of the entry for `key`: either the live entry, or the slot an
    /// insertion should use (preferring the first tombstone on the chain).
    fn find_slot(&self, key: Value, hash: u32) -> usize {
        let capacity = self.entries.len();
        let mut idx = hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[idx];
            if entry.is_unused_or_tombstone() {
                if entry.is_tombstone() {
                    tombstone.get_or_insert(idx);
                } else {
                    return tombstone.unwrap_or(idx);
                }
            } else if entry.key == key {
                return idx;
            }
            idx = (idx + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.entries, vec![Entry::UNUSED; new_capacity]);
        // Tombstones are dropped here, so the load count resets to the
        // live entries.
        self.count = 0;
        self.len = 0;
        for entry in old {
            if !entry.is_unused_or_tombstone() {
                let idx = self.find_slot(entry.key, entry.hash);
                self.entries[idx] = entry;
                self.count += 1;
                self.len += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: f64) -> (Value, u32) {
        (Value::number(n), n as u32)
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut table = Table::new();
        for i in 0..100 {
            let (k, h) = key(i as f64);
            assert!(table.set(k, h, Value::number(i as f64 * 2.0)));
        }
        assert_eq!(table.len(), 100);
        for i in 0..100 {
            let (k, h) = key(i as f64);
            assert_eq!(table.get(k, h), Some(Value::number(i as f64 * 2.0)));
        }
    }

    #[test]
    fn test_overwrite_keeps_len() {
        let mut table = Table::new();
        let (k, h) = key(1.0);
        assert!(table.set(k, h, Value::TRUE));
        assert!(!table.set(k, h, Value::FALSE));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(k, h), Some(Value::FALSE));
    }

    #[test]
    fn test_delete_leaves_probe_chain_intact() {
        let mut table = Table::new();
        // Three keys with colliding hashes probe into one chain.
        let a = Value::number(1.0);
        let b = Value::number(2.0);
        let c = Value::number(3.0);
        table.set(a, 7, Value::number(1.0));
        table.set(b, 7, Value::number(2.0));
        table.set(c, 7, Value::number(3.0));

        assert!(table.delete(b, 7));
        assert_eq!(table.get(b, 7), None);
        // c sits past the tombstone and must still be reachable.
        assert_eq!(table.get(c, 7), Some(Value::number(3.0)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut table = Table::new();
        let a = Value::number(1.0);
        let b = Value::number(2.0);
        table.set(a, 7, Value::NIL);
        table.set(b, 7, Value::NIL);
        table.delete(a, 7);
        assert!(table.set(Value::number(9.0), 7, Value::TRUE));
        assert_eq!(table.get(Value::number(9.0), 7), Some(Value::TRUE));
        assert_eq!(table.get(b, 7), Some(Value::NIL));
    }

    #[test]
    fn test_growth_drops_tombstones() {
        let mut table = Table::new();
        for i in 0..64 {
            let (k, h) = key(i as f64);
            table.set(k, h, Value::NIL);
        }
        for i in 0..32 {
            let (k, h) = key(i as f64);
            table.delete(k, h);
        }
        for i in 64..256 {
            let (k, h) = key(i as f64);
            table.set(k, h, Value::NIL);
        }
        assert_eq!(table.len(), 224);
        for i in 32..256 {
            let (k, h) = key(i as f64);
            assert_eq!(table.get(k, h), Some(Value::NIL), "key {i}");
        }
        for i in 0..32 {
            let (k, h) = key(i as f64);
            assert_eq!(table.get(k, h), None);
        }
    }

    #[test]
    fn test_find_key_by_skips_tombstones() {
        let mut table = Table::new();
        let a = Value::number(1.0);
        let b = Value::number(2.0);
        table.set(a, 5, Value::NIL);
        table.set(b, 5, Value::NIL);
        table.delete(a, 5);
        let found = table.find_key_by(5, |k| k == b);
        assert_eq!(found, Some(b));
        assert_eq!(table.find_key_by(5, |k| k == a), None);
    }

    #[test]
    fn test_copy_to() {
        let mut from = Table::new();
        let mut to = Table::new();
        for i in 0..10 {
            let (k, h) = key(i as f64);
            from.set(k, h, Value::number(i as f64));
        }
        let (shadowed, sh) = key(3.0);
        to.set(shadowed, sh, Value::TRUE);
        from.copy_to(&mut to);
        assert_eq!(to.len(), 10);
        // copy_to overwrites, mirroring method inheritance before
        // subclass methods are installed.
        assert_eq!(to.get(shadowed, sh), Some(Value::number(3.0)));
    }
}
