//! One contiguous allocation backing every slot of a buffer pool.
//!
//! The device references slot memory directly for as long as a slot is
//! submitted, so the arena is allocated once and never moves or grows.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;

use crate::models::error::StreamError;

/// Fixed, zero-initialised region of `slot_count × slot_len` bytes.
///
/// Backed by 16-bit cells so every slot can be viewed as `[i16]`. The
/// cells are written through raw pointers by the device and by the pool.
pub struct Arena {
    storage: Box<[UnsafeCell<i16>]>,
    slot_count: usize,
    slot_len: usize,
}

// SAFETY: which thread may touch which slot is governed by the pool's
// ownership alternation, not by the arena itself.
unsafe impl Sync for Arena {}

impl Arena {
    /// Reserve `slot_count × slot_len` bytes.
    pub fn allocate(slot_count: usize, slot_len: usize) -> Result<Self, StreamError> {
        if slot_count == 0 || slot_len == 0 {
            return Err(StreamError::AllocationFailure(format!(
                "empty arena requested ({} × {} bytes)",
                slot_count, slot_len
            )));
        }
        if slot_len % std::mem::size_of::<i16>() != 0 {
            return Err(StreamError::AllocationFailure(format!(
                "slot length {} is not a whole number of samples",
                slot_len
            )));
        }
        let size = slot_count.checked_mul(slot_len).ok_or_else(|| {
            StreamError::AllocationFailure(format!("{} × {} bytes overflows", slot_count, slot_len))
        })?;

        let samples = size / std::mem::size_of::<i16>();
        let mut storage = Vec::new();
        storage.try_reserve_exact(samples).map_err(|e| {
            StreamError::AllocationFailure(format!("unable to reserve {} bytes for buffers: {}", size, e))
        })?;
        storage.resize_with(samples, || UnsafeCell::new(0i16));

        log::debug!("allocated {} byte arena ({} slots of {} bytes)", size, slot_count, slot_len);
        Ok(Self {
            storage: storage.into_boxed_slice(),
            slot_count,
            slot_len,
        })
    }

    pub fn len(&self) -> usize {
        self.storage.len() * std::mem::size_of::<i16>()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    pub fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr()).cast::<u8>()
    }

    /// Pointer to the first byte of slot `index`.
    ///
    /// Panics if `index` is out of range.
    pub fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(index < self.slot_count, "slot {} out of range", index);
        let cells = index * self.slot_len / std::mem::size_of::<i16>();
        NonNull::from(&self.storage[cells..]).cast::<u8>()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("bytes", &self.len())
            .field("slot_count", &self.slot_count)
            .field("slot_len", &self.slot_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_contiguous_slots() {
        let arena = Arena::allocate(4, 64).unwrap();
        assert_eq!(arena.len(), 256);
        let base = arena.base_ptr() as usize;
        for i in 0..4 {
            assert_eq!(arena.slot_ptr(i).as_ptr() as usize, base + i * 64);
        }
        assert_eq!(base % std::mem::align_of::<i16>(), 0);
    }

    #[test]
    fn rejects_empty_and_odd_sizes() {
        assert!(matches!(Arena::allocate(0, 64), Err(StreamError::AllocationFailure(_))));
        assert!(matches!(Arena::allocate(4, 0), Err(StreamError::AllocationFailure(_))));
        assert!(matches!(Arena::allocate(4, 63), Err(StreamError::AllocationFailure(_))));
    }

    #[test]
    fn rejects_overflowing_size() {
        assert!(matches!(
            Arena::allocate(usize::MAX / 2, 4),
            Err(StreamError::AllocationFailure(_))
        ));
    }

    #[test]
    fn oversized_arena_is_an_allocation_failure() {
        let result = Arena::allocate(4, (usize::MAX / 4) & !1);
        assert!(matches!(result, Err(StreamError::AllocationFailure(_))));
    }

    #[test]
    fn memory_starts_zeroed() {
        let arena = Arena::allocate(2, 16).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(arena.base_ptr() as *const u8, arena.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
