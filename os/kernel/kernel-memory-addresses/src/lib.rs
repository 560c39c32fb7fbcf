//! # Virtual and Physical Memory Address Types (IA-32)
//!
//! Strongly typed wrappers for the 32-bit addresses used by two-level x86
//! paging.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`VirtualAddress`] | An address translated by the page directory. |
//! | [`PhysicalAddress`] | An address in physical memory. |
//! | [`FrameIndex`] | The number of a 4 KiB physical frame (`address / 4096`). |
//!
//! A 32-bit virtual address splits into three fields:
//!
//! ```text
//! | 31‒22       | 21‒12      | 11‒0   |
//! | table index | page index | offset |
//! ```
//!
//! The table index selects one of the 1024 page tables of a directory, the page
//! index selects one of the 1024 entries of that table.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_2345);
//! assert_eq!(va.table_index(), 0x300);
//! assert_eq!(va.page_index(), 0x102);
//! assert_eq!(va.page_offset(), 0x345);
//!
//! let pa = PhysicalAddress::new(0x0040_3000);
//! assert_eq!(pa.frame(), FrameIndex::new(0x403));
//! assert_eq!(FrameIndex::new(0x403).base(), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod frame_index;
mod memory_address;
mod physical_address;
mod virtual_address;

pub use crate::frame_index::FrameIndex;
pub use crate::memory_address::MemoryAddress;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Size of a page and of a physical frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Number of low address bits covered by one page.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in one page table and tables in one page directory.
pub const ENTRIES_PER_TABLE: u32 = 1024;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: usize, a: usize) -> usize {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(0x12345, 16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: usize, a: usize) -> usize {
    (x + a - 1) & !(a - 1)
}

/// Whether `x` is a multiple of the page size.
#[inline(always)]
#[must_use]
pub const fn is_page_aligned(x: usize) -> bool {
    x & (PAGE_SIZE as usize - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_splits_into_indices() {
        let va = VirtualAddress::new(0xFFFF_FFFF);
        assert_eq!(va.table_index(), 1023);
        assert_eq!(va.page_index(), 1023);
        assert_eq!(va.page_offset(), 0xFFF);

        let va = VirtualAddress::from_indices(3, 7, 0x10);
        assert_eq!(va.as_u32(), (3 << 22) | (7 << 12) | 0x10);
    }

    #[test]
    fn page_base_clears_offset() {
        let va = VirtualAddress::new(0x1234_5678);
        assert_eq!(va.page_base(), VirtualAddress::new(0x1234_5000));
        assert!(!va.is_page_aligned());
        assert!(va.page_base().is_page_aligned());
    }

    #[test]
    fn frame_roundtrip_through_physical_address() {
        let frame = FrameIndex::new(0xABCDE);
        assert_eq!(frame.base().as_u32(), 0xABCD_E000);
        assert_eq!(PhysicalAddress::new(0xABCD_EFFF).frame(), frame);
        assert_eq!(frame.word(), 0xABCDE / 32);
        assert_eq!(frame.bit(), 0xABCDE % 32);
    }

    #[test]
    fn alignment_helpers() {
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(0x2000));
        assert!(!is_page_aligned(0x2001));
        assert_eq!(align_up(0x2001, 0x1000), 0x3000);
        assert_eq!(align_down(0x2FFF, 0x1000), 0x2000);
    }
}
