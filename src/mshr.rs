// miss status holding registers: one entry per in-flight miss, keyed by
// block tag (tags are unique within one cache)

use std::collections::HashMap;

#[derive(Clone, Copy, Debug)]
pub struct MshrEntry {
    pub tag: u64,
    pub set_idx: usize,
    /// Number of coalesced requests waiting on this miss. At least 1 while
    /// the entry exists.
    pub pending: u32,
}

pub struct Mshr {
    table: HashMap<u64, MshrEntry>,
    capacity: usize,
}

impl Mshr {
    pub fn new(capacity: usize) -> Self {
        Mshr {
            table: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, tag: u64) -> bool {
        self.table.contains_key(&tag)
    }

    pub fn is_full(&self) -> bool {
        self.table.len() >= self.capacity
    }

    /// Tracks a new in-flight miss. Returns false when the table is full.
    pub fn allocate(&mut self, tag: u64, set_idx: usize) -> bool {
        if self.is_full() {
            return false;
        }
        self.table.insert(
            tag,
            MshrEntry {
                tag,
                set_idx,
                pending: 1,
            },
        );
        true
    }

    /// Merges a duplicate miss into the existing entry. Returns the new
    /// pending count, or None when no entry exists for `tag`.
    pub fn coalesce(&mut self, tag: u64) -> Option<u32> {
        self.table.get_mut(&tag).map(|entry| {
            entry.pending += 1;
            entry.pending
        })
    }

    /// Retires the miss. Called exactly once, by the miss-service
    /// continuation.
    pub fn remove(&mut self, tag: u64) -> Option<MshrEntry> {
        self.table.remove(&tag)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_retire() {
        let mut mshr = Mshr::new(4);
        assert!(mshr.allocate(7, 2));
        assert!(mshr.contains(7));
        let entry = mshr.remove(7).unwrap();
        assert_eq!(entry.set_idx, 2);
        assert_eq!(entry.pending, 1);
        assert!(mshr.is_empty());
    }

    #[test]
    fn coalescing_counts_waiters() {
        let mut mshr = Mshr::new(4);
        assert!(mshr.allocate(7, 0));
        assert_eq!(mshr.coalesce(7), Some(2));
        assert_eq!(mshr.coalesce(7), Some(3));
        assert_eq!(mshr.coalesce(9), None);
        assert_eq!(mshr.remove(7).unwrap().pending, 3);
    }

    #[test]
    fn refuses_allocation_beyond_capacity() {
        let mut mshr = Mshr::new(2);
        assert!(mshr.allocate(1, 0));
        assert!(mshr.allocate(2, 0));
        assert!(!mshr.allocate(3, 0));
        // coalescing into an existing entry still works at capacity
        assert_eq!(mshr.coalesce(1), Some(2));
        mshr.remove(1);
        assert!(mshr.allocate(3, 0));
    }
}
