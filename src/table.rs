//! Node arena.
//!
//! Nodes live in a vector of slots addressed by index. A freed slot is threaded onto an
//! intrusive free list and handed out again by the next allocation (last freed, first reused),
//! so indices stay stable for as long as a node is alive.

use std::ops::{Index, IndexMut};

/// End of the free list.
const NIL: usize = 0;

enum Slot<T> {
    Occupied(T),
    /// Free slot holding the index of the next free slot, or [`NIL`].
    Free(usize),
}

/// Slot arena with an intrusive free list.
///
/// Slot `0` is a sentinel and is never handed out, so index `0` can be used as "no node".
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: usize,
    live: usize,
}

impl<T> Arena<T> {
    /// Create an arena with room for `2^bits` slots before it has to grow.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Arena bits should be in the range 0..=31");
        let mut slots = Vec::with_capacity(1 << bits);
        slots.push(Slot::Free(NIL));
        Self {
            slots,
            free_head: NIL,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of slots ever allocated (occupied or free), sentinel excluded.
    pub fn len(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of occupied slots.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        index != 0 && matches!(self.slots.get(index), Some(Slot::Occupied(_)))
    }

    pub fn get(&self, index: usize) -> &T {
        match self.slots.get(index) {
            Some(Slot::Occupied(value)) if index != 0 => value,
            _ => panic!("Slot {} is not occupied", index),
        }
    }

    pub fn get_mut(&mut self, index: usize) -> &mut T {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(value)) if index != 0 => value,
            _ => panic!("Slot {} is not occupied", index),
        }
    }

    /// Store `value` and return its slot index.
    pub fn insert(&mut self, value: T) -> usize {
        self.live += 1;
        if self.free_head == NIL {
            self.slots.push(Slot::Occupied(value));
            return self.slots.len() - 1;
        }
        let index = self.free_head;
        match std::mem::replace(&mut self.slots[index], Slot::Occupied(value)) {
            Slot::Free(next) => self.free_head = next,
            Slot::Occupied(_) => unreachable!("free list points at occupied slot {}", index),
        }
        index
    }

    /// Take the value out of slot `index`, putting the slot on the free list.
    pub fn remove(&mut self, index: usize) -> T {
        if !self.is_occupied(index) {
            panic!("Slot {} is not occupied", index);
        }
        let old = std::mem::replace(&mut self.slots[index], Slot::Free(self.free_head));
        self.free_head = index;
        self.live -= 1;
        match old {
            Slot::Occupied(value) => value,
            Slot::Free(_) => unreachable!(),
        }
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter().enumerate().skip(1).filter_map(|(i, slot)| match slot {
            Slot::Occupied(value) => Some((i, value)),
            Slot::Free(_) => None,
        })
    }
}

impl<T> Index<usize> for Arena<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.get(index)
    }
}

impl<T> IndexMut<usize> for Arena<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.get_mut(index)
    }
}
