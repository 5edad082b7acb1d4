//! Slot arena holding the three LRU segments of the admission cache
//!
//! Entries live in a `Vec` of slots and are threaded onto per-segment
//! doubly linked lists through `prev`/`next` slot indices. Freed slots are
//! recycled through a free list, so links are plain integers and no entry
//! is ever referenced by pointer.

const NIL: usize = usize::MAX;

/// Residency segment of a cache entry, least eviction-resistant first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Window,
    Probation,
    Protected,
}

impl Segment {
    fn index(self) -> usize {
        match self {
            Segment::Window => 0,
            Segment::Probation => 1,
            Segment::Protected => 2,
        }
    }
}

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    segment: Segment,
    prev: usize,
    next: usize,
}

/// Head is most recently used, tail least
#[derive(Debug, Clone, Copy)]
struct Links {
    head: usize,
    tail: usize,
    len: usize,
}

impl Default for Links {
    fn default() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

#[derive(Debug)]
pub struct SegmentedSlab<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    lists: [Links; 3],
}

impl<K, V> SegmentedSlab<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            lists: [Links::default(); 3],
        }
    }

    pub fn len(&self, segment: Segment) -> usize {
        self.lists[segment.index()].len
    }

    /// Entries across all segments
    pub fn total(&self) -> usize {
        self.lists.iter().map(|l| l.len).sum()
    }

    /// Allocate a slot and link it at the head of `segment`
    pub fn insert_front(&mut self, key: K, value: V, segment: Segment) -> usize {
        let slot = Slot {
            key,
            value,
            segment,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_front(idx, segment);
        idx
    }

    /// Unlink and free a slot, returning its contents
    pub fn remove(&mut self, idx: usize) -> Option<(K, V)> {
        self.unlink(idx);
        let slot = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        Some((slot.key, slot.value))
    }

    /// Move an entry to the head of `segment`, which may differ from its current one
    pub fn move_to_front(&mut self, idx: usize, segment: Segment) {
        if self.slot(idx).is_some() {
            self.unlink(idx);
            self.link_front(idx, segment);
        }
    }

    /// Least recently used entry of `segment`
    pub fn tail(&self, segment: Segment) -> Option<usize> {
        let tail = self.lists[segment.index()].tail;
        (tail != NIL).then_some(tail)
    }

    pub fn key(&self, idx: usize) -> Option<&K> {
        self.slot(idx).map(|s| &s.key)
    }

    pub fn value(&self, idx: usize) -> Option<&V> {
        self.slot(idx).map(|s| &s.value)
    }

    pub fn value_mut(&mut self, idx: usize) -> Option<&mut V> {
        self.slot_mut(idx).map(|s| &mut s.value)
    }

    pub fn segment(&self, idx: usize) -> Option<Segment> {
        self.slot(idx).map(|s| s.segment)
    }

    /// Keys of `segment` from most to least recently used
    pub fn keys(&self, segment: Segment) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.len(segment));
        let mut cursor = self.lists[segment.index()].head;
        while let Some(slot) = self.slot(cursor) {
            keys.push(&slot.key);
            cursor = slot.next;
        }
        keys
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.lists = [Links::default(); 3];
    }

    fn slot(&self, idx: usize) -> Option<&Slot<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let Some(slot) = self.slot(idx) else {
            return;
        };
        let (prev, next, segment) = (slot.prev, slot.next, slot.segment);
        let links = &mut self.lists[segment.index()];

        if prev == NIL {
            links.head = next;
        }
        if next == NIL {
            links.tail = prev;
        }
        links.len -= 1;

        if let Some(p) = self.slot_mut(prev) {
            p.next = next;
        }
        if let Some(n) = self.slot_mut(next) {
            n.prev = prev;
        }
        if let Some(s) = self.slot_mut(idx) {
            s.prev = NIL;
            s.next = NIL;
        }
    }

    fn link_front(&mut self, idx: usize, segment: Segment) {
        let head = self.lists[segment.index()].head;
        if let Some(s) = self.slot_mut(idx) {
            s.segment = segment;
            s.prev = NIL;
            s.next = head;
        }
        if let Some(h) = self.slot_mut(head) {
            h.prev = idx;
        }

        let links = &mut self.lists[segment.index()];
        if head == NIL {
            links.tail = idx;
        }
        links.head = idx;
        links.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_orders_most_recent_first() {
        let mut slab = SegmentedSlab::with_capacity(4);
        slab.insert_front("a", 1, Segment::Window);
        slab.insert_front("b", 2, Segment::Window);
        slab.insert_front("c", 3, Segment::Window);

        assert_eq!(slab.keys(Segment::Window), vec![&"c", &"b", &"a"]);
        assert_eq!(slab.tail(Segment::Window).and_then(|i| slab.key(i)), Some(&"a"));
        assert_eq!(slab.total(), 3);
    }

    #[test]
    fn test_move_between_segments() {
        let mut slab = SegmentedSlab::with_capacity(4);
        let a = slab.insert_front("a", 1, Segment::Probation);
        slab.insert_front("b", 2, Segment::Probation);

        slab.move_to_front(a, Segment::Protected);

        assert_eq!(slab.keys(Segment::Probation), vec![&"b"]);
        assert_eq!(slab.keys(Segment::Protected), vec![&"a"]);
        assert_eq!(slab.segment(a), Some(Segment::Protected));
        assert_eq!(slab.len(Segment::Probation), 1);
        assert_eq!(slab.len(Segment::Protected), 1);
    }

    #[test]
    fn test_remove_middle_and_reuse_slot() {
        let mut slab = SegmentedSlab::with_capacity(4);
        slab.insert_front("a", 1, Segment::Window);
        let b = slab.insert_front("b", 2, Segment::Window);
        slab.insert_front("c", 3, Segment::Window);

        assert_eq!(slab.remove(b), Some(("b", 2)));
        assert_eq!(slab.remove(b), None);
        assert_eq!(slab.keys(Segment::Window), vec![&"c", &"a"]);

        let d = slab.insert_front("d", 4, Segment::Window);
        assert_eq!(d, b, "freed slot should be recycled");
        assert_eq!(slab.keys(Segment::Window), vec![&"d", &"c", &"a"]);
    }

    #[test]
    fn test_remove_only_entry_empties_list() {
        let mut slab = SegmentedSlab::with_capacity(1);
        let a = slab.insert_front("a", 1, Segment::Protected);
        slab.remove(a);

        assert_eq!(slab.tail(Segment::Protected), None);
        assert!(slab.keys(Segment::Protected).is_empty());
        assert_eq!(slab.total(), 0);
    }
}
