//! Read-optimized OID tree backing simulated MIBs
//!
//! Lookups dominate once a profile is loaded, so the tree keeps a plain
//! hash map for exact GETs plus a sorted OID index for GETNEXT/GETBULK.
//! The index is invalidated on mutation and lazily rebuilt on the next
//! ordered read.

use std::collections::HashMap;
use std::sync::RwLock;

use super::oid::Oid;
use super::value::SnmpValue;

/// Per-OID behavior tag for dynamic values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Value is a monotonically increasing counter seeded from the walk.
    DynamicCounter,
    /// Value is a gauge that behaviors may move up and down.
    DynamicGauge,
    /// Value tracks device uptime in timeticks.
    Uptime,
}

/// A single MIB entry
#[derive(Debug, Clone, PartialEq)]
pub struct MibEntry {
    pub value: SnmpValue,
    pub behavior: Option<Behavior>,
}

impl MibEntry {
    pub fn new(value: SnmpValue) -> Self {
        Self {
            value,
            behavior: None,
        }
    }

    pub fn with_behavior(value: SnmpValue, behavior: Behavior) -> Self {
        Self {
            value,
            behavior: Some(behavior),
        }
    }
}

/// Ordered OID-to-value map shared by all devices of one type
#[derive(Debug, Default)]
pub struct MibTree {
    entries: HashMap<Oid, MibEntry>,
    // None = invalidated, rebuilt on next ordered read
    index: RwLock<Option<Vec<Oid>>>,
}

impl MibTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing any existing value for the same OID.
    pub fn insert(&mut self, oid: Oid, entry: MibEntry) {
        self.entries.insert(oid, entry);
        *self.index.get_mut().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn get(&self, oid: &Oid) -> Option<&MibEntry> {
        self.entries.get(oid)
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.entries.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the smallest OID strictly greater than `oid`, with its value.
    pub fn get_next(&self, oid: &Oid) -> Option<(Oid, SnmpValue)> {
        self.with_index(|index| {
            let pos = index.partition_point(|candidate| candidate <= oid);
            index.get(pos).map(|next| {
                let value = self.entries[next].value.clone();
                (next.clone(), value)
            })
        })
    }

    /// Returns up to `n` entries strictly greater than `start`, in order.
    pub fn bulk_walk(&self, start: &Oid, n: usize) -> Vec<(Oid, SnmpValue)> {
        self.with_index(|index| {
            let pos = index.partition_point(|candidate| candidate <= start);
            index[pos..]
                .iter()
                .take(n)
                .map(|oid| (oid.clone(), self.entries[oid].value.clone()))
                .collect()
        })
    }

    /// Snapshot of all OIDs in lexicographic order.
    pub fn sorted_oids(&self) -> Vec<Oid> {
        self.with_index(|index| index.to_vec())
    }

    fn with_index<T>(&self, f: impl FnOnce(&[Oid]) -> T) -> T {
        {
            let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
            if let Some(index) = guard.as_ref() {
                return f(index);
            }
        }

        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            let mut index: Vec<Oid> = self.entries.keys().cloned().collect();
            index.sort_unstable();
            *guard = Some(index);
        }
        f(guard.as_ref().unwrap_or(&Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn seeded_tree() -> MibTree {
        let mut tree = MibTree::new();
        tree.insert(
            oid("1.3.6.1.2.1.1.1.0"),
            MibEntry::new(SnmpValue::OctetString(b"Motorola SB6141".to_vec())),
        );
        tree.insert(
            oid("1.3.6.1.2.1.1.3.0"),
            MibEntry::new(SnmpValue::TimeTicks(12345)),
        );
        tree.insert(
            oid("1.3.6.1.2.1.2.2.1.10.1"),
            MibEntry::new(SnmpValue::Counter32(1234567)),
        );
        tree
    }

    #[test]
    fn test_insert_replaces_duplicate() {
        let mut tree = MibTree::new();
        tree.insert(oid("1.3.6.1"), MibEntry::new(SnmpValue::Integer(1)));
        tree.insert(oid("1.3.6.1"), MibEntry::new(SnmpValue::Integer(2)));

        assert_eq!(tree.len(), 1);
        assert_eq!(
            tree.get(&oid("1.3.6.1")).unwrap().value,
            SnmpValue::Integer(2)
        );
    }

    #[test]
    fn test_get_next_strictly_greater() {
        let tree = seeded_tree();

        let (next, _) = tree.get_next(&oid("1.3.6.1.2.1.1.1.0")).unwrap();
        assert_eq!(next.to_string(), "1.3.6.1.2.1.1.3.0");

        // A prefix yields its first extension
        let (next, _) = tree.get_next(&oid("1.3.6.1.2.1.1")).unwrap();
        assert_eq!(next.to_string(), "1.3.6.1.2.1.1.1.0");

        // Past the last OID
        assert!(tree.get_next(&oid("1.3.6.1.2.1.2.2.1.10.1")).is_none());
        assert!(tree.get_next(&oid("9.9")).is_none());
    }

    #[test]
    fn test_get_next_never_revisits() {
        let tree = seeded_tree();
        let mut cursor = oid("0.0");
        let mut seen = Vec::new();

        while let Some((next, _)) = tree.get_next(&cursor) {
            assert!(next > cursor, "{} should be > {}", next, cursor);
            seen.push(next.clone());
            cursor = next;
        }

        assert_eq!(seen.len(), tree.len());
    }

    #[test]
    fn test_index_invalidated_on_mutation() {
        let mut tree = seeded_tree();
        // Force index build
        assert_eq!(tree.sorted_oids().len(), 3);

        tree.insert(oid("1.3.6.1.2.1.1.2.0"), MibEntry::new(SnmpValue::Null));
        let oids = tree.sorted_oids();
        assert_eq!(oids.len(), 4);
        assert_eq!(oids[1].to_string(), "1.3.6.1.2.1.1.2.0");
    }

    #[test]
    fn test_bulk_walk_bounds() {
        let mut tree = MibTree::new();
        for i in 1..=100 {
            tree.insert(
                oid(&format!("1.3.6.1.2.1.2.2.1.1.{}", i)),
                MibEntry::new(SnmpValue::Integer(i as i64)),
            );
        }

        let rows = tree.bulk_walk(&oid("1.3.6.1.2.1.2.2.1.1"), 50);
        assert_eq!(rows.len(), 50);
        assert_eq!(rows[0].0.to_string(), "1.3.6.1.2.1.2.2.1.1.1");
        assert_eq!(rows[49].0.to_string(), "1.3.6.1.2.1.2.2.1.1.50");

        // Shorter at end of MIB
        let rows = tree.bulk_walk(&oid("1.3.6.1.2.1.2.2.1.1.95"), 50);
        assert_eq!(rows.len(), 5);
    }
}
