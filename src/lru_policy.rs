//! An [LruPolicy] tracks recency for a set of ids and decides which one to reclaim next.
//!
//! This is implemented as a vec-backed linked list plus an auxiliary hash-based index, so that touching and removing
//! are O(1).  The policy holds no values and no sizes: the owning cache keeps those, and asks the policy which id is
//! coldest whenever it is over budget.  Ids the owner considers pinned are skipped, not removed.
use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

struct OccupiedSlot<Id> {
    id: Id,
    /// Towards the most recently used end.
    prev: Option<usize>,
    /// Towards the least recently used end.
    next: Option<usize>,
}

struct EmptySlot {
    next_empty: Option<usize>,
}

enum Slot<Id> {
    /// This slot is free, possibly with a pointer at the next free slot.
    Empty(EmptySlot),
    /// This slot is linked into the recency list.
    Occupied(OccupiedSlot<Id>),
}

impl<Id> Slot<Id> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedSlot<Id> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedSlot<Id> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptySlot {
        match self {
            Self::Empty(ref mut x) => x,
            _ => panic!("Slot should be empty"),
        }
    }
}

pub struct LruPolicy<Id: Hash + Eq + Clone> {
    slots: Vec<Slot<Id>>,
    index: HashMap<Id, usize, RandomState>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    empty_head: Option<usize>,
}

impl<Id: Hash + Eq + Clone> Default for LruPolicy<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Hash + Eq + Clone> LruPolicy<Id> {
    pub fn new() -> LruPolicy<Id> {
        LruPolicy {
            slots: Default::default(),
            index: Default::default(),
            head: None,
            tail: None,
            empty_head: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.index.contains_key(id)
    }

    /// Entirely unlink an occupied slot from the list.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let s = self.slots[slot].as_occupied();
            (s.prev, s.next)
        };

        match prev {
            Some(p) => self.slots[p].as_occupied_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_occupied_mut().prev = prev,
            None => self.tail = prev,
        }

        let s = self.slots[slot].as_occupied_mut();
        s.prev = None;
        s.next = None;
    }

    /// Link an occupied, currently unlinked slot in as the most recent.
    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let s = self.slots[slot].as_occupied_mut();
            s.prev = None;
            s.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_occupied_mut().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Find an available empty slot, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.slots[e].as_empty_mut().next_empty;
            return e;
        }

        self.slots.push(Slot::Empty(EmptySlot { next_empty: None }));
        self.slots.len() - 1
    }

    /// Make `id` the most recently used, starting to track it if it wasn't already.
    pub fn touch(&mut self, id: Id) {
        if let Some(&slot) = self.index.get(&id) {
            self.unlink(slot);
            self.push_front(slot);
            return;
        }

        let slot = self.find_empty();
        self.slots[slot] = Slot::Occupied(OccupiedSlot {
            id: id.clone(),
            prev: None,
            next: None,
        });
        self.index.insert(id, slot);
        self.push_front(slot);
    }

    fn free_slot(&mut self, slot: usize) -> Id {
        self.unlink(slot);
        let mut old = Slot::Empty(EmptySlot {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.slots[slot]);
        self.empty_head = Some(slot);
        match old {
            Slot::Occupied(OccupiedSlot { id, .. }) => id,
            _ => panic!("Should have been occupied"),
        }
    }

    /// Stop tracking `id`.  Returns whether it was tracked.
    pub fn remove(&mut self, id: &Id) -> bool {
        match self.index.remove(id) {
            Some(slot) => {
                self.free_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Remove and return the least recently used id which isn't pinned.
    ///
    /// Pinned ids keep their place in the list.  The caller must hold whatever lock makes `pinned` stable for the
    /// duration of the call, so that checking and removing happen as one step.
    pub fn evict_one(&mut self, mut pinned: impl FnMut(&Id) -> bool) -> Option<Id> {
        let mut cur = self.tail;
        while let Some(slot) = cur {
            let s = self.slots[slot].as_occupied();
            if !pinned(&s.id) {
                let id = s.id.clone();
                self.index.remove(&id);
                return Some(self.free_slot(slot));
            }
            cur = s.prev;
        }
        None
    }

    /// The least recently used id, pinned or not.
    pub fn coldest(&self) -> Option<&Id> {
        self.tail.map(|t| &self.slots[t].as_occupied().id)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        self.empty_head = None;
    }

    /// Iterator visiting ids in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = &Id> {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let slot = self.slots[cur?].as_occupied();
            cur = slot.next;
            Some(&slot.id)
        })
    }
}
