//! A fixed-capacity array kept sorted by a caller-supplied predicate.
//!
//! The heap uses it as its hole index, sorted by hole size. The storage is
//! raw memory (placed at the start of the heap region), so the array never
//! allocates or grows after construction.

use crate::ByteAlloc;
use core::alloc::Layout;
use core::ptr::NonNull;

/// Ordering predicate: `true` if the first argument sorts after the second.
pub type IsGreater<T> = fn(&T, &T) -> bool;

/// Errors raised by [`OrderedArray`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum OrderedArrayError {
    #[error("ordered array is full ({capacity} items)")]
    Full { capacity: usize },
    #[error("index {index} out of range for ordered array of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("failed to allocate storage for {capacity} items")]
    Allocation { capacity: usize },
}

/// Sorted, capacity-bounded array of `Copy` items.
///
/// Items for which `is_greater(existing, new)` is false stay in front of a
/// newly inserted one, so equal items keep insertion order.
pub struct OrderedArray<T> {
    items: NonNull<T>,
    len: usize,
    capacity: usize,
    is_greater: IsGreater<T>,
}

// SAFETY: the array exclusively owns its storage.
unsafe impl<T: Send> Send for OrderedArray<T> {}

impl<T: Copy> OrderedArray<T> {
    /// Build an array over caller-provided storage. The storage is zeroed.
    ///
    /// # Safety
    /// `storage` must be valid for writes of `capacity` items, suitably
    /// aligned, and owned by the array for its whole lifetime.
    pub unsafe fn place(storage: NonNull<T>, capacity: usize, is_greater: IsGreater<T>) -> Self {
        unsafe { storage.write_bytes(0, capacity) };
        Self {
            items: storage,
            len: 0,
            capacity,
            is_greater,
        }
    }

    /// Build an array with storage from `alloc`.
    ///
    /// # Errors
    /// [`OrderedArrayError::Allocation`] if the storage could not be obtained.
    pub fn new<A: ByteAlloc + ?Sized>(
        alloc: &mut A,
        capacity: usize,
        is_greater: IsGreater<T>,
    ) -> Result<Self, OrderedArrayError> {
        let layout =
            Layout::array::<T>(capacity).map_err(|_| OrderedArrayError::Allocation { capacity })?;
        let storage = alloc
            .allocate_bytes(layout)
            .ok_or(OrderedArrayError::Allocation { capacity })?;

        // SAFETY: freshly allocated with the layout of `capacity` items.
        Ok(unsafe { Self::place(storage.cast(), capacity, is_greater) })
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The items in order.
    #[inline]
    #[must_use]
    pub const fn as_slice(&self) -> &[T] {
        // SAFETY: the first `len` items are initialized.
        unsafe { core::slice::from_raw_parts(self.items.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.as_slice().iter().copied()
    }

    /// Insert `item` before the first item that sorts after it.
    ///
    /// # Errors
    /// [`OrderedArrayError::Full`] if there is no room left.
    pub fn insert(&mut self, item: T) -> Result<(), OrderedArrayError> {
        if self.len == self.capacity {
            return Err(OrderedArrayError::Full {
                capacity: self.capacity,
            });
        }

        let is_greater = self.is_greater;
        let at = self
            .as_slice()
            .iter()
            .position(|existing| is_greater(existing, &item))
            .unwrap_or(self.len);

        // SAFETY: `at <= len < capacity`, so the shifted range stays in bounds.
        unsafe {
            let slot = self.items.add(at);
            slot.copy_to(slot.add(1), self.len - at);
            slot.write(item);
        }
        self.len += 1;
        Ok(())
    }

    /// The item at `index`.
    ///
    /// # Errors
    /// [`OrderedArrayError::OutOfRange`] if `index >= len`.
    pub fn lookup(&self, index: usize) -> Result<T, OrderedArrayError> {
        self.as_slice().get(index).copied().ok_or_else(|| {
            log::warn!("ordered array lookup at {index} past length {}", self.len);
            OrderedArrayError::OutOfRange {
                index,
                len: self.len,
            }
        })
    }

    /// Remove and return the item at `index`, shifting later items down.
    ///
    /// # Errors
    /// [`OrderedArrayError::OutOfRange`] if `index >= len`.
    pub fn remove(&mut self, index: usize) -> Result<T, OrderedArrayError> {
        if index >= self.len {
            log::warn!("ordered array remove at {index} past length {}", self.len);
            return Err(OrderedArrayError::OutOfRange {
                index,
                len: self.len,
            });
        }

        // SAFETY: `index < len`, so both ranges lie in the initialized prefix.
        let item = unsafe {
            let slot = self.items.add(index);
            let item = slot.read();
            slot.add(1).copy_to(slot, self.len - index - 1);
            item
        };
        self.len -= 1;
        Ok(item)
    }

    /// Drop every item. The storage is kept.
    pub const fn clear(&mut self) {
        self.len = 0;
    }
}

impl<T: Copy + PartialEq> OrderedArray<T> {
    /// Index of the first item equal to `item`.
    #[must_use]
    pub fn position(&self, item: &T) -> Option<usize> {
        self.as_slice().iter().position(|x| x == item)
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for OrderedArray<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::PlacementAlloc;
    use crate::tests::Arena;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    fn greater(a: &u32, b: &u32) -> bool {
        a > b
    }

    fn array(storage: &mut [u32]) -> OrderedArray<u32> {
        let capacity = storage.len();
        unsafe { OrderedArray::place(NonNull::from(storage).cast(), capacity, greater) }
    }

    #[test]
    fn keeps_items_sorted() {
        let mut storage = [0u32; 8];
        let mut a = array(&mut storage);
        for v in [5, 1, 4, 1, 3, 9] {
            a.insert(v).unwrap();
        }
        assert_eq!(a.as_slice(), [1, 1, 3, 4, 5, 9]);
        assert_eq!(a.len(), 6);
        assert_eq!(a.lookup(2), Ok(3));
        assert_eq!(a.position(&4), Some(3));
        assert_eq!(a.position(&7), None);
    }

    #[test]
    fn equal_items_keep_insertion_order() {
        #[derive(Copy, Clone, Debug, PartialEq)]
        struct Tagged(u32, char);

        let mut storage = [Tagged(0, ' '); 4];
        let capacity = storage.len();
        let mut a = unsafe {
            OrderedArray::place(
                NonNull::from(&mut storage).cast::<Tagged>(),
                capacity,
                |x: &Tagged, y: &Tagged| x.0 > y.0,
            )
        };
        a.insert(Tagged(2, 'a')).unwrap();
        a.insert(Tagged(2, 'b')).unwrap();
        a.insert(Tagged(1, 'c')).unwrap();
        assert_eq!(
            a.as_slice(),
            [Tagged(1, 'c'), Tagged(2, 'a'), Tagged(2, 'b')]
        );
    }

    #[test]
    fn insert_beyond_capacity_fails() {
        let mut storage = [0u32; 2];
        let mut a = array(&mut storage);
        a.insert(1).unwrap();
        a.insert(2).unwrap();
        assert_eq!(a.insert(3), Err(OrderedArrayError::Full { capacity: 2 }));
        assert_eq!(a.as_slice(), [1, 2]);
    }

    #[test]
    fn remove_requires_index_below_len() {
        let mut storage = [0u32; 4];
        let mut a = array(&mut storage);
        a.insert(10).unwrap();
        a.insert(20).unwrap();
        a.insert(30).unwrap();

        assert_eq!(
            a.remove(3),
            Err(OrderedArrayError::OutOfRange { index: 3, len: 3 })
        );
        assert_eq!(a.remove(1), Ok(20));
        assert_eq!(a.as_slice(), [10, 30]);
        assert_eq!(a.remove(1), Ok(30));
        assert_eq!(a.remove(0), Ok(10));
        assert!(a.is_empty());
        assert_eq!(
            a.lookup(0),
            Err(OrderedArrayError::OutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn place_zeroes_storage() {
        let mut storage = [0xFFFF_FFFFu32; 3];
        let a = array(&mut storage);
        assert_eq!(a.capacity(), 3);
        drop(a);
        assert_eq!(storage, [0, 0, 0]);
    }

    #[test]
    fn new_takes_storage_from_allocator() {
        let arena = Arena::new(1);
        let mut placement = PlacementAlloc::identity(arena.start(), arena.end());
        let mut a = OrderedArray::new(&mut placement, 16, greater).unwrap();
        assert_eq!(placement.current(), arena.start() + 16 * size_of::<u32>());

        a.insert(7).unwrap();
        a.insert(3).unwrap();
        a.clear();
        assert!(a.is_empty());
        assert_eq!(a.capacity(), 16);

        let too_big = OrderedArray::<u32>::new(&mut placement, 4096, greater);
        assert_eq!(
            too_big.err(),
            Some(OrderedArrayError::Allocation { capacity: 4096 })
        );
    }
}
