use crate::{ENTRIES_PER_TABLE, MemoryAddress, PAGE_SHIFT};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses,
/// i.e. values that are translated through a page directory before they reach
/// physical memory.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0040_1008);
/// assert_eq!(va.table_index(), 1);
/// assert_eq!(va.page_index(), 1);
/// assert_eq!(va.page_offset(), 8);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    /// Build the address of entry `page` in table `table`, plus `offset`.
    #[inline]
    #[must_use]
    pub const fn from_indices(table: usize, page: usize, offset: u32) -> Self {
        debug_assert!(table < ENTRIES_PER_TABLE as usize);
        debug_assert!(page < ENTRIES_PER_TABLE as usize);
        #[allow(clippy::cast_possible_truncation)]
        let value = ((table as u32) << 22) | ((page as u32) << PAGE_SHIFT) | offset;
        Self::new(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0.as_usize()
    }

    /// Directory slot of the page table covering this address (bits 31‒22).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.as_u32() >> PAGE_SHIFT) / ENTRIES_PER_TABLE) as usize
    }

    /// Entry within the covering page table (bits 21‒12).
    #[inline]
    #[must_use]
    pub const fn page_index(self) -> usize {
        ((self.as_u32() >> PAGE_SHIFT) % ENTRIES_PER_TABLE) as usize
    }

    /// Byte offset within the page (bits 11‒0).
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0.page_offset()
    }

    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(self.0.page_base())
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_page_aligned()
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
