//! Free-List Object Pools
//!
//! Reuse-allocation storage for short-lived simulation records (arbiters,
//! islands, TOI events). A slot is handed out by [`Pool::acquire`] and given
//! back by [`Pool::release`], which calls [`Reset::reset`] on the record
//! before the slot joins the free list. Records must drop every reference to
//! other simulation objects in `reset`, so a recycled slot never aliases
//! state from its previous life.
//!
//! Long-lived records (bodies, constraints) live in an [`Arena`] and are
//! addressed by generational handles instead.

/// Clears a pooled record back to its pristine state.
pub trait Reset {
    /// Drop all references to other objects and zero cached values.
    fn reset(&mut self);
}

/// Free-list pool indexed by `u32` slot ids.
#[derive(Clone, Debug, Default)]
pub struct Pool<T> {
    slots: Vec<T>,
    live: Vec<bool>,
    free: Vec<u32>,
}

impl<T: Reset + Default> Pool<T> {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Take a pristine slot, recycling a released one when available
    pub fn acquire(&mut self) -> u32 {
        if let Some(id) = self.free.pop() {
            self.live[id as usize] = true;
            id
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(T::default());
            self.live.push(true);
            id
        }
    }

    /// Reset a slot and return it to the free list
    ///
    /// Releasing an id that is not live is ignored.
    pub fn release(&mut self, id: u32) {
        let i = id as usize;
        if i < self.live.len() && self.live[i] {
            self.slots[i].reset();
            self.live[i] = false;
            self.free.push(id);
        }
    }

    /// Release every live slot
    pub fn release_all(&mut self) {
        for i in 0..self.slots.len() {
            if self.live[i] {
                self.slots[i].reset();
                self.live[i] = false;
                self.free.push(i as u32);
            }
        }
    }

    /// Whether `id` is currently handed out
    #[inline]
    #[must_use]
    pub fn is_live(&self, id: u32) -> bool {
        self.live.get(id as usize).copied().unwrap_or(false)
    }

    /// Shared access to a live slot
    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&T> {
        if self.is_live(id) {
            self.slots.get(id as usize)
        } else {
            None
        }
    }

    /// Mutable access to a live slot
    #[inline]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        if self.is_live(id) {
            self.slots.get_mut(id as usize)
        } else {
            None
        }
    }

    /// Number of live slots
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total slots ever allocated
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate live slot ids
    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(i, _)| i as u32)
    }
}

// ============================================================================
// Arena
// ============================================================================

#[derive(Clone, Debug)]
struct ArenaSlot<T> {
    value: Option<T>,
    generation: u32,
}

/// Generational arena for records addressed by `(index, generation)` handles
///
/// Removing a record bumps its slot generation, so stale handles never
/// reach the record that later reuses the slot.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    slots: Vec<ArenaSlot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    /// Create an empty arena
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, returning its `(index, generation)`
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            (index, slot.generation)
        } else {
            self.slots.push(ArenaSlot {
                value: Some(value),
                generation: 0,
            });
            ((self.slots.len() - 1) as u32, 0)
        }
    }

    /// Take a record out if the generation matches
    pub fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    /// Record behind a handle
    #[inline]
    pub fn get(&self, index: u32, generation: u32) -> Option<&T> {
        let slot = self.slots.get(index as usize)?;
        if slot.generation == generation {
            slot.value.as_ref()
        } else {
            None
        }
    }

    /// Mutable record behind a handle
    #[inline]
    pub fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation == generation {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Record in a slot, whatever its generation
    #[inline]
    pub fn at(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize)?.value.as_ref()
    }

    /// Mutable record in a slot, whatever its generation
    #[inline]
    pub fn at_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.value.as_mut()
    }

    /// Two distinct records at once, in argument order
    pub fn pair_mut(&mut self, a: u32, b: u32) -> Option<(&mut T, &mut T)> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        if hi as usize >= self.slots.len() {
            return None;
        }
        let (left, right) = self.slots.split_at_mut(hi as usize);
        let x = left.get_mut(lo as usize)?.value.as_mut()?;
        let y = right.first_mut()?.value.as_mut()?;
        Some(if a < b { (x, y) } else { (y, x) })
    }

    /// Number of stored records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, live or free
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate `(index, generation, record)`
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.value.as_ref().map(|v| (i as u32, s.generation, v)))
    }

    /// Iterate `(index, generation, record)` mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, u32, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| {
                let generation = s.generation;
                s.value.as_mut().map(|v| (i as u32, generation, v))
            })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        owner: Option<u32>,
        value: f32,
    }

    impl Reset for Record {
        fn reset(&mut self) {
            self.owner = None;
            self.value = 0.0;
        }
    }

    #[test]
    fn test_acquire_release_recycles() {
        let mut pool: Pool<Record> = Pool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a, b);
        pool.release(a);
        let c = pool.acquire();
        assert_eq!(a, c, "released slot should be reused");
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_release_resets_record() {
        let mut pool: Pool<Record> = Pool::new();
        let a = pool.acquire();
        {
            let r = pool.get_mut(a).unwrap();
            r.owner = Some(7);
            r.value = 3.5;
        }
        pool.release(a);
        assert!(pool.get(a).is_none());
        let again = pool.acquire();
        let r = pool.get(again).unwrap();
        assert!(r.owner.is_none());
        assert_eq!(r.value, 0.0);
    }

    #[test]
    fn test_double_release_ignored() {
        let mut pool: Pool<Record> = Pool::new();
        let a = pool.acquire();
        pool.release(a);
        pool.release(a);
        assert_eq!(pool.live_count(), 0);
        let x = pool.acquire();
        let y = pool.acquire();
        assert_ne!(x, y);
    }

    #[test]
    fn test_release_all() {
        let mut pool: Pool<Record> = Pool::new();
        for _ in 0..5 {
            pool.acquire();
        }
        pool.release_all();
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.live_ids().count(), 0);
    }

    #[test]
    fn test_arena_generations() {
        let mut arena: Arena<&str> = Arena::new();
        let (a, ga) = arena.insert("a");
        let (b, _) = arena.insert("b");
        assert_eq!(arena.remove(a, ga), Some("a"));
        assert_eq!(arena.remove(a, ga), None);
        let (c, gc) = arena.insert("c");
        assert_eq!(c, a, "slot should be reused");
        assert_ne!(gc, ga);
        assert!(arena.get(a, ga).is_none());
        assert_eq!(arena.get(c, gc), Some(&"c"));
        assert_eq!(arena.at(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_arena_pair_mut() {
        let mut arena = Arena::new();
        let (a, _) = arena.insert(1);
        let (b, _) = arena.insert(2);
        {
            let (x, y) = arena.pair_mut(b, a).unwrap();
            assert_eq!((*x, *y), (2, 1));
            *x += 10;
        }
        assert_eq!(arena.at(b), Some(&12));
        assert!(arena.pair_mut(a, a).is_none());
        assert!(arena.pair_mut(a, 9).is_none());
    }
}
