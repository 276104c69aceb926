//! Open-addressed hash dictionary over runtime values.
//!
//! Linear probing with tombstones; capacity is always a power of two and
//! the table grows at 3/4 load. Key equality is [`Value::eq_value`], so `2`
//! and `2.0` address the same slot, and strings match by content. The
//! `intern` operation makes the table double as the symbol intern pool:
//! after interning, symbol equality is identity.

use hashbrown::DefaultHashBuilder;

use crate::value::Value;

const INITIAL_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Used { key: Value, val: Value },
}

pub struct Dictionary {
    slots: Vec<Slot>,
    count: usize,
    tombstones: usize,
    hasher: DefaultHashBuilder,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            slots: Vec::new(),
            count: 0,
            tombstones: 0,
            hasher: DefaultHashBuilder::default(),
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bytes of table storage, for collector accounting.
    pub fn allocated_bytes(&self) -> usize {
        self.slots.capacity() * core::mem::size_of::<Slot>()
    }

    /// Index of the slot holding `key`, or of the slot an insert would use.
    /// Only call with a non-empty table.
    fn probe(&self, key: &Value) -> (usize, bool) {
        let mask = self.slots.len() - 1;
        let mut idx = key.hash_with(&self.hasher) as usize & mask;
        let mut insert_at = None;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return (insert_at.unwrap_or(idx), false),
                Slot::Tombstone => {
                    if insert_at.is_none() {
                        insert_at = Some(idx);
                    }
                }
                Slot::Used { key: k, .. } => {
                    if k.eq_value(key) {
                        return (idx, true);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.slots.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.slots.len() * 2
        };
        let old = core::mem::replace(&mut self.slots, vec![Slot::Empty; new_cap]);
        self.tombstones = 0;
        let mask = new_cap - 1;
        for slot in old {
            if let Slot::Used { key, val } = slot {
                let mut idx = key.hash_with(&self.hasher) as usize & mask;
                while let Slot::Used { .. } = self.slots[idx] {
                    idx = (idx + 1) & mask;
                }
                self.slots[idx] = Slot::Used { key, val };
            }
        }
    }

    fn ensure_space(&mut self) {
        if self.slots.is_empty() || (self.count + self.tombstones + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let (idx, found) = self.probe(key);
        if found {
            match self.slots[idx] {
                Slot::Used { val, .. } => Some(val),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// The canonical stored key equal to `key`, without inserting.
    pub fn get_key(&self, key: &Value) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let (idx, found) = self.probe(key);
        if found {
            match self.slots[idx] {
                Slot::Used { key: k, .. } => Some(k),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    /// Inserts or overwrites; returns true when the key was new.
    pub fn insert(&mut self, key: Value, val: Value) -> bool {
        self.ensure_space();
        let (idx, found) = self.probe(&key);
        if found {
            if let Slot::Used { val: v, .. } = &mut self.slots[idx] {
                *v = val;
            }
            false
        } else {
            if matches!(self.slots[idx], Slot::Tombstone) {
                self.tombstones -= 1;
            }
            self.slots[idx] = Slot::Used { key, val };
            self.count += 1;
            true
        }
    }

    /// Removes `key`, leaving a tombstone. Returns the removed value.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let (idx, found) = self.probe(key);
        if found {
            let old = match self.slots[idx] {
                Slot::Used { val, .. } => val,
                _ => unreachable!(),
            };
            self.slots[idx] = Slot::Tombstone;
            self.count -= 1;
            self.tombstones += 1;
            Some(old)
        } else {
            None
        }
    }

    /// Returns the canonical stored key equal to `key`, inserting `key` with
    /// a nil value if absent. After interning, equal symbols are the same
    /// object.
    pub fn intern(&mut self, key: Value) -> Value {
        self.ensure_space();
        let (idx, found) = self.probe(&key);
        if found {
            match self.slots[idx] {
                Slot::Used { key: k, .. } => k,
                _ => unreachable!(),
            }
        } else {
            if matches!(self.slots[idx], Slot::Tombstone) {
                self.tombstones -= 1;
            }
            self.slots[idx] = Slot::Used {
                key,
                val: Value::Nil,
            };
            self.count += 1;
            key
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.count = 0;
        self.tombstones = 0;
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Used { key, val } => Some((*key, *val)),
            _ => None,
        })
    }

    /// The n-th live entry's key in slot order, for the enumerate protocol.
    pub fn key_at(&self, n: usize) -> Option<Value> {
        self.iter().nth(n).map(|(k, _)| k)
    }

    /// A fresh dictionary with the same entries.
    pub fn copy(&self) -> Dictionary {
        let mut out = Dictionary::new();
        for (k, v) in self.iter() {
            out.insert(k, v);
        }
        out
    }

    /// Entries of `self` plus entries of `other` whose keys `self` lacks.
    pub fn union(&self, other: &Dictionary) -> Dictionary {
        let mut out = self.copy();
        for (k, v) in other.iter() {
            if !out.contains_key(&k) {
                out.insert(k, v);
            }
        }
        out
    }

    /// Entries of `self` whose keys `other` also has.
    pub fn intersection(&self, other: &Dictionary) -> Dictionary {
        let mut out = Dictionary::new();
        for (k, v) in self.iter() {
            if other.contains_key(&k) {
                out.insert(k, v);
            }
        }
        out
    }

    /// Entries of `self` whose keys `other` lacks.
    pub fn difference(&self, other: &Dictionary) -> Dictionary {
        let mut out = Dictionary::new();
        for (k, v) in self.iter() {
            if !other.contains_key(&k) {
                out.insert(k, v);
            }
        }
        out
    }
}
