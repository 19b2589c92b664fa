use std::collections::HashMap;
use std::hash::Hash;

use bitvec::prelude::{BitVec, Lsb0};

use crate::{TileAddressError, TileAddressTranslator, TilePoolError, TileSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePoolConfig {
    pub tiles_per_edge: u32,
    /// Parallel texture layers sharing the slot grid. Each slot owns the same region in all of
    /// them.
    pub layer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePoolEntry<K> {
    pub slot: TileSlot,
    pub owner: Option<K>,
    pub lock_count: u32,
    pub last_used_frame: u64,
}

#[derive(Debug, Clone, Copy)]
struct SlotState<K> {
    owner: Option<K>,
    lock_count: u32,
    last_used_frame: u64,
}

/// Fixed-capacity set of physical tile slots with per-frame pinning and LRU eviction.
///
/// `K` is the virtual tile identity bound to a slot by [`TilePool::map`]. Slots are never destroyed
/// individually; eviction rebinds them.
pub struct TilePool<K> {
    // slots.len() == translator.capacity() == pinned.len()
    translator: TileAddressTranslator,
    layer_count: u32,
    slots: Vec<SlotState<K>>,
    pinned: BitVec<usize, Lsb0>,
    residency: HashMap<K, TileSlot>,
}

impl<K> TilePool<K>
where
    K: Copy + Eq + Hash,
{
    pub fn new(config: TilePoolConfig) -> Result<Self, TileAddressError> {
        let translator = TileAddressTranslator::new(config.tiles_per_edge)?;
        let capacity = translator.capacity() as usize;
        Ok(Self {
            translator,
            layer_count: config.layer_count,
            slots: vec![
                SlotState {
                    owner: None,
                    lock_count: 0,
                    last_used_frame: 0,
                };
                capacity
            ],
            pinned: BitVec::repeat(false, capacity),
            residency: HashMap::new(),
        })
    }

    pub const fn translator(&self) -> &TileAddressTranslator {
        &self.translator
    }

    pub const fn tiles_per_edge(&self) -> u32 {
        self.translator.tiles_per_edge()
    }

    pub const fn capacity(&self) -> u32 {
        self.translator.capacity()
    }

    pub const fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn locked_slot_count(&self) -> usize {
        self.pinned.count_ones()
    }

    pub fn resident_count(&self) -> usize {
        self.residency.len()
    }

    pub fn entry(&self, slot: TileSlot) -> Option<TilePoolEntry<K>> {
        self.slots
            .get(slot.index() as usize)
            .map(|state| TilePoolEntry {
                slot,
                owner: state.owner,
                lock_count: state.lock_count,
                last_used_frame: state.last_used_frame,
            })
    }

    pub fn query_residency(&self, tiles: &[K]) -> Vec<Option<TileSlot>> {
        tiles
            .iter()
            .map(|tile| self.residency.get(tile).copied())
            .collect()
    }

    pub fn lock(&mut self, slots: &[TileSlot]) -> Result<(), TilePoolError> {
        for slot in slots {
            self.check_slot(*slot)?;
        }
        for slot in slots {
            self.pin(*slot)?;
        }
        Ok(())
    }

    /// Locks up to `count` unlocked slots and returns them in allocation order.
    ///
    /// Unbound slots come first, then bound slots from least to most recently used, ties broken by
    /// slot index. Returning fewer than `count` slots means the pool is exhausted for this frame.
    pub fn alloc_and_lock(&mut self, count: usize) -> Vec<TileSlot> {
        let mut candidates: Vec<(bool, u64, u32)> = self
            .pinned
            .iter_zeros()
            .map(|index| {
                let state = &self.slots[index];
                (state.owner.is_some(), state.last_used_frame, index as u32)
            })
            .collect();
        if count < candidates.len() {
            candidates.select_nth_unstable(count);
            candidates.truncate(count);
        }
        candidates.sort_unstable();

        let mut allocated = Vec::with_capacity(candidates.len());
        for (_, _, index) in candidates {
            let slot = TileSlot::new(index);
            self.pin(slot)
                .expect("unpinned slot must accept a first lock");
            allocated.push(slot);
        }
        if allocated.len() < count {
            log::debug!(
                "tile pool exhausted: requested {} slots, allocated {}",
                count,
                allocated.len()
            );
        }
        allocated
    }

    /// Binds `tiles[i]` to `slots[i]` and returns the tiles that lost their slot.
    ///
    /// Every slot must be locked by the caller and no tile may already be resident.
    pub fn map(&mut self, tiles: &[K], slots: &[TileSlot]) -> Result<Vec<K>, TilePoolError> {
        if tiles.len() != slots.len() {
            return Err(TilePoolError::LengthMismatch {
                tiles: tiles.len(),
                slots: slots.len(),
            });
        }
        for (tile, slot) in tiles.iter().zip(slots) {
            self.check_slot(*slot)?;
            if !self.pinned[slot.index() as usize] {
                return Err(TilePoolError::SlotNotLocked { slot: slot.index() });
            }
            if let Some(resident) = self.residency.get(tile) {
                return Err(TilePoolError::AlreadyResident {
                    slot: resident.index(),
                });
            }
        }

        let mut evicted = Vec::new();
        for (tile, slot) in tiles.iter().zip(slots) {
            let state = &mut self.slots[slot.index() as usize];
            if let Some(previous) = state.owner.replace(*tile) {
                self.residency.remove(&previous);
                evicted.push(previous);
            }
            self.residency.insert(*tile, *slot);
        }
        if !evicted.is_empty() {
            log::debug!("tile pool evicted {} tiles", evicted.len());
        }
        Ok(evicted)
    }

    /// Drops one lock from each slot and stamps it as used in `frame_number`.
    pub fn make_available(
        &mut self,
        slots: &[TileSlot],
        frame_number: u64,
    ) -> Result<(), TilePoolError> {
        for slot in slots {
            self.check_slot(*slot)?;
            if self.slots[slot.index() as usize].lock_count == 0 {
                return Err(TilePoolError::SlotNotLocked { slot: slot.index() });
            }
        }
        for slot in slots {
            let index = slot.index() as usize;
            let state = &mut self.slots[index];
            state.lock_count = state
                .lock_count
                .checked_sub(1)
                .ok_or(TilePoolError::SlotNotLocked { slot: slot.index() })?;
            state.last_used_frame = frame_number;
            if state.lock_count == 0 {
                self.pinned.set(index, false);
            }
        }
        Ok(())
    }

    pub fn unmap_all(&mut self) {
        for state in &mut self.slots {
            state.owner = None;
        }
        self.residency.clear();
    }

    fn check_slot(&self, slot: TileSlot) -> Result<(), TilePoolError> {
        self.translator.position_from_linear(slot)?;
        Ok(())
    }

    fn pin(&mut self, slot: TileSlot) -> Result<(), TilePoolError> {
        let index = slot.index() as usize;
        let state = &mut self.slots[index];
        state.lock_count = state
            .lock_count
            .checked_add(1)
            .ok_or(TilePoolError::LockCountOverflow { slot: slot.index() })?;
        self.pinned.set(index, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(tiles_per_edge: u32) -> TilePool<u32> {
        TilePool::new(TilePoolConfig {
            tiles_per_edge,
            layer_count: 1,
        })
        .expect("create tile pool")
    }

    #[test]
    fn alloc_and_lock_never_returns_more_than_requested() {
        let mut pool = pool(4);
        let slots = pool.alloc_and_lock(3);
        assert_eq!(slots.len(), 3);
        assert_eq!(pool.locked_slot_count(), 3);
    }

    #[test]
    fn alloc_and_lock_skips_locked_slots_and_returns_partial() {
        let mut pool = pool(2);
        let first = pool.alloc_and_lock(3);
        let second = pool.alloc_and_lock(3);
        assert_eq!(first.len(), 3);
        assert_eq!(second, vec![TileSlot::new(3)]);
        assert!(pool.alloc_and_lock(1).is_empty());
        assert_eq!(pool.locked_slot_count(), 4);
    }

    #[test]
    fn eviction_follows_least_recently_used_then_slot_index() {
        let mut pool = pool(2);
        let slots = pool.alloc_and_lock(4);
        pool.map(&[10, 11, 12, 13], &slots).expect("map tiles");
        pool.make_available(&slots[0..1], 7).expect("release slot 0");
        pool.make_available(&slots[1..2], 3).expect("release slot 1");
        pool.make_available(&slots[2..4], 3).expect("release slots 2 and 3");

        let victims = pool.alloc_and_lock(2);
        assert_eq!(victims, vec![TileSlot::new(1), TileSlot::new(2)]);
        let evicted = pool.map(&[20, 21], &victims).expect("map new tiles");
        assert_eq!(evicted, vec![11, 12]);
        assert_eq!(
            pool.query_residency(&[10, 11, 12, 13, 20, 21]),
            vec![
                Some(TileSlot::new(0)),
                None,
                None,
                Some(TileSlot::new(3)),
                Some(TileSlot::new(1)),
                Some(TileSlot::new(2)),
            ]
        );
    }

    #[test]
    fn unbound_slots_are_preferred_over_eviction() {
        let mut pool = pool(2);
        let slots = pool.alloc_and_lock(1);
        pool.map(&[1], &slots).expect("map tile");
        pool.make_available(&slots, 0).expect("release");

        let next = pool.alloc_and_lock(3);
        let evicted = pool.map(&[2, 3, 4], &next).expect("map tiles");
        assert!(evicted.is_empty());
        assert!(!next.contains(&slots[0]));
    }

    #[test]
    fn locked_resident_slots_survive_allocation_pressure() {
        let mut pool = pool(1);
        let slots = pool.alloc_and_lock(1);
        pool.map(&[5], &slots).expect("map tile");
        assert!(pool.alloc_and_lock(1).is_empty());
        assert_eq!(pool.query_residency(&[5]), vec![Some(slots[0])]);
    }

    #[test]
    fn map_rejects_unlocked_slots_and_resident_tiles() {
        let mut pool = pool(2);
        assert_eq!(
            pool.map(&[1], &[TileSlot::new(0)]),
            Err(TilePoolError::SlotNotLocked { slot: 0 })
        );
        let slots = pool.alloc_and_lock(2);
        pool.map(&[1], &slots[0..1]).expect("map tile");
        assert_eq!(
            pool.map(&[1], &slots[1..2]),
            Err(TilePoolError::AlreadyResident { slot: 0 })
        );
        assert_eq!(
            pool.map(&[2, 3], &slots[1..2]),
            Err(TilePoolError::LengthMismatch { tiles: 2, slots: 1 })
        );
    }

    #[test]
    fn make_available_requires_a_lock_and_records_frame() {
        let mut pool = pool(2);
        assert_eq!(
            pool.make_available(&[TileSlot::new(1)], 4),
            Err(TilePoolError::SlotNotLocked { slot: 1 })
        );
        let slots = pool.alloc_and_lock(1);
        pool.lock(&slots).expect("second lock");
        pool.make_available(&slots, 9).expect("first release");
        assert_eq!(pool.locked_slot_count(), 1);
        pool.make_available(&slots, 9).expect("second release");
        let entry = pool.entry(slots[0]).expect("slot entry");
        assert_eq!(entry.lock_count, 0);
        assert_eq!(entry.last_used_frame, 9);
        assert_eq!(pool.locked_slot_count(), 0);
    }

    #[test]
    fn unmap_all_clears_residency_but_keeps_slots() {
        let mut pool = pool(2);
        let slots = pool.alloc_and_lock(2);
        pool.map(&[1, 2], &slots).expect("map tiles");
        pool.make_available(&slots, 1).expect("release");
        pool.unmap_all();
        assert_eq!(pool.query_residency(&[1, 2]), vec![None, None]);
        assert_eq!(pool.resident_count(), 0);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn lock_rejects_out_of_range_slot() {
        let mut pool = pool(2);
        assert_eq!(
            pool.lock(&[TileSlot::new(4)]),
            Err(TilePoolError::Address(TileAddressError::SlotOutOfRange {
                slot: 4,
                capacity: 4
            }))
        );
        assert_eq!(pool.locked_slot_count(), 0);
    }
}
