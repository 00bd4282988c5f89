//! Fixed pool of rotating sample slots over one arena.
//!
//! Slot ownership alternates strictly between the application thread and
//! the device:
//! ```text
//! Free → Prepared → Submitted ──(device)──→ Done → Submitted → ...
//!        └──── application owns ────┘        └── application owns ──┘
//! ```
//! The pool refuses application access to a slot while it is submitted.

use std::ptr::NonNull;

use crate::buffer::arena::Arena;
use crate::models::error::StreamError;

/// Lifecycle of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Not registered with the device (before prepare / after unprepare).
    Free,
    Prepared,
    /// Owned by the device until it reports completion.
    Submitted,
    Done,
}

/// Bookkeeping for one slot of the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSlot {
    pub index: usize,
    pub offset: usize,
    /// Fixed capacity in bytes.
    pub capacity: usize,
    pub state: SlotState,
    /// Bytes handed to the device on the last submit.
    pub length: usize,
    /// Bytes the device filled (capture only).
    pub bytes_valid: usize,
}

/// `(offset, length)` view of a slot inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRegion {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

/// Slot memory as seen by a device backend.
///
/// Handed to the backend on prepare/submit. The backend may read or write
/// through it only between submit and reporting the slot done.
#[derive(Debug, Clone, Copy)]
pub struct DeviceBuffer {
    index: usize,
    ptr: NonNull<u8>,
    capacity: usize,
    length: usize,
}

// SAFETY: a DeviceBuffer is only dereferenced by whichever side currently
// owns the slot; ownership moves with the submit/done handshake.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes the application asked the device to play (or `capacity` for capture).
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The submitted payload.
    ///
    /// # Safety
    /// The caller must own the slot: it has been submitted and not yet
    /// reported done.
    pub unsafe fn payload(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.length)
    }

    /// The whole slot, for a device filling it with captured audio.
    ///
    /// # Safety
    /// Same ownership rule as [`DeviceBuffer::payload`]; no other reference
    /// to this slot may be alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn storage_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity)
    }
}

/// N fixed-length slots over one contiguous [`Arena`] plus a rotating cursor.
#[derive(Debug)]
pub struct BufferPool {
    arena: Arena,
    slots: Vec<BufferSlot>,
    bytes_per_sample: usize,
    cursor: usize,
}

impl BufferPool {
    /// Allocate `slot_count` slots of `samples_per_slot` samples each.
    pub fn new(slot_count: usize, samples_per_slot: usize, bytes_per_sample: usize) -> Result<Self, StreamError> {
        let slot_len = samples_per_slot
            .checked_mul(bytes_per_sample)
            .ok_or_else(|| StreamError::AllocationFailure("slot size overflows".into()))?;
        let arena = Arena::allocate(slot_count, slot_len)?;

        let slots = (0..slot_count)
            .map(|index| BufferSlot {
                index,
                offset: index * slot_len,
                capacity: slot_len,
                state: SlotState::Free,
                length: slot_len,
                bytes_valid: 0,
            })
            .collect();

        Ok(Self {
            arena,
            slots,
            bytes_per_sample,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot capacity in bytes (L).
    pub fn slot_capacity(&self) -> usize {
        self.arena.slot_len()
    }

    pub fn samples_per_slot(&self) -> usize {
        self.arena.slot_len() / self.bytes_per_sample
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index]
    }

    pub fn slot_region(&self, index: usize) -> SlotRegion {
        let slot = &self.slots[index];
        SlotRegion {
            index,
            offset: slot.offset,
            len: slot.capacity,
        }
    }

    /// Index of the next slot to submit (playback) or harvest (capture).
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    /// Advance the cursor modulo N and return the new index.
    pub fn advance(&mut self) -> usize {
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.cursor
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Slots currently owned by the device.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Submitted)
            .count()
    }

    /// Indices of submitted slots, oldest first, starting at the cursor.
    pub fn submitted_from_cursor(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.slots.len();
        (0..n)
            .map(move |k| (self.cursor + k) % n)
            .filter(move |&i| self.slots[i].state == SlotState::Submitted)
    }

    pub(crate) fn set_state(&mut self, index: usize, state: SlotState) {
        self.slots[index].state = state;
    }

    pub(crate) fn set_length(&mut self, index: usize, bytes: usize) {
        let slot = &mut self.slots[index];
        slot.length = bytes.min(slot.capacity);
    }

    pub(crate) fn set_bytes_valid(&mut self, index: usize, bytes: usize) {
        let slot = &mut self.slots[index];
        slot.bytes_valid = bytes.min(slot.capacity);
    }

    pub(crate) fn device_buffer(&self, index: usize) -> DeviceBuffer {
        let slot = &self.slots[index];
        DeviceBuffer {
            index,
            ptr: self.arena.slot_ptr(index),
            capacity: slot.capacity,
            length: slot.length,
        }
    }

    fn check_owned(&self, index: usize) -> Result<(), StreamError> {
        match self.slots.get(index) {
            None => Err(StreamError::InvalidState(format!("slot {} out of range", index))),
            Some(slot) if slot.state == SlotState::Submitted => Err(StreamError::InvalidState(format!(
                "slot {} is owned by the device",
                index
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Mutable sample view of an application-owned slot, full capacity.
    pub fn samples_mut(&mut self, index: usize) -> Result<&mut [i16], StreamError> {
        self.check_owned(index)?;
        let ptr = self.arena.slot_ptr(index).as_ptr() as *mut i16;
        // SAFETY: the slot lies inside the arena, is i16-aligned (arena
        // alignment and even slot length), is not submitted, and the
        // returned borrow is tied to &mut self.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.samples_per_slot()) })
    }

    /// The first `count` samples of an application-owned slot.
    pub fn samples(&self, index: usize, count: usize) -> Result<&[i16], StreamError> {
        self.check_owned(index)?;
        let count = count.min(self.samples_per_slot());
        let ptr = self.arena.slot_ptr(index).as_ptr() as *const i16;
        // SAFETY: see `samples_mut`.
        Ok(unsafe { std::slice::from_raw_parts(ptr, count) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_disjoint_and_contiguous() {
        for n in 2..8 {
            let pool = BufferPool::new(n, 100, 2).unwrap();
            assert_eq!(pool.len(), n);
            let base = pool.arena().base_ptr() as usize;
            for (i, slot) in pool.slots().iter().enumerate() {
                assert_eq!(slot.capacity, 200);
                assert_eq!(slot.offset, i * 200);
                assert_eq!(pool.device_buffer(i).as_ptr() as usize, base + i * 200);
            }
        }
    }

    #[test]
    fn cursor_wraps_modulo_n() {
        let mut pool = BufferPool::new(3, 4, 2).unwrap();
        assert_eq!(pool.current_index(), 0);
        for k in 1..=10 {
            assert_eq!(pool.advance(), k % 3);
        }
        pool.reset_cursor();
        assert_eq!(pool.current_index(), 0);
    }

    #[test]
    fn submitted_slot_is_not_accessible() {
        let mut pool = BufferPool::new(2, 4, 2).unwrap();
        pool.set_state(0, SlotState::Submitted);
        assert!(matches!(pool.samples_mut(0), Err(StreamError::InvalidState(_))));
        assert!(pool.samples_mut(1).is_ok());
        assert!(matches!(pool.samples_mut(2), Err(StreamError::InvalidState(_))));
    }

    #[test]
    fn sample_view_writes_into_arena() {
        let mut pool = BufferPool::new(2, 4, 2).unwrap();
        pool.samples_mut(1).unwrap().copy_from_slice(&[1, -1, 2, -2]);
        assert_eq!(pool.samples(1, 4).unwrap(), &[1, -1, 2, -2]);
        assert_eq!(pool.samples(0, 4).unwrap(), &[0, 0, 0, 0]);

        pool.set_length(1, 8);
        let buffer = pool.device_buffer(1);
        let bytes = unsafe { buffer.payload() };
        assert_eq!(&bytes[0..2], &1i16.to_ne_bytes());
    }

    #[test]
    fn submitted_iteration_starts_at_cursor() {
        let mut pool = BufferPool::new(4, 2, 2).unwrap();
        for i in [0, 2, 3] {
            pool.set_state(i, SlotState::Submitted);
        }
        pool.advance();
        pool.advance(); // cursor = 2
        assert_eq!(pool.submitted_from_cursor().collect::<Vec<_>>(), vec![2, 3, 0]);
        assert_eq!(pool.in_flight(), 3);
    }

    #[test]
    fn length_is_clamped_to_capacity() {
        let mut pool = BufferPool::new(2, 4, 2).unwrap();
        pool.set_length(0, 1000);
        pool.set_bytes_valid(0, 1000);
        assert_eq!(pool.slot(0).length, 8);
        assert_eq!(pool.slot(0).bytes_valid, 8);
    }
}
