//! # Page Tables and the Page Directory
//!
//! The 32-bit two-level paging hierarchy:
//!
//! ```text
//!   CR3 ──► PageDirectory ──► PageTable ──► 4 KiB frame
//!           1024 entries      1024 entries
//!           (4 MiB each)      (4 KiB each)
//! ```
//!
//! A [`PageDirectory`] carries two parallel arrays. `entries` is what the CPU
//! walks (physical table addresses plus flags); `tables` holds the kernel's
//! own pointers to the same tables so they can be edited without any
//! physical-to-virtual translation. The hardware array comes first, so the
//! physical address of a directory is the physical address of its entries.

use crate::page_entry::{DirectoryEntry, PageEntry};
use core::ptr::NonNull;
use kernel_info::memory::{PAGES_PER_TABLE, PAGE_SIZE, TABLES_PER_DIRECTORY};
use kernel_memory_addresses::PhysicalAddress;

/// A 4 KiB page table: 1024 [`PageEntry`] values.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; PAGES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == PAGE_SIZE);

impl PageTable {
    /// A table with every entry not present.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::new(); PAGES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn get_mut(&mut self, index: usize) -> &mut PageEntry {
        &mut self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageEntry) {
        self.entries[index] = entry;
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PageEntry)> {
        self.entries.iter().enumerate()
    }
}

/// The root of a 32-bit address space.
///
/// An all-zero `PageDirectory` is valid and maps nothing, so directories can
/// be carved out of zeroed memory.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    /// Hardware view: physical table addresses and flags.
    pub(crate) entries: [DirectoryEntry; TABLES_PER_DIRECTORY],
    /// Kernel view: where each table lives in the kernel's address space.
    pub(crate) tables: [Option<NonNull<PageTable>>; TABLES_PER_DIRECTORY],
    /// Physical address of `entries`, i.e. the value loaded into CR3.
    pub(crate) physical: PhysicalAddress,
}

impl PageDirectory {
    /// Number of bytes to allocate for one directory, rounded to whole pages.
    pub const ALLOCATION_SIZE: usize = size_of::<Self>().next_multiple_of(PAGE_SIZE);

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        self.physical
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, index: usize) -> DirectoryEntry {
        self.entries[index]
    }

    /// Kernel-visible pointer to the table at `index`, if one exists.
    #[inline]
    #[must_use]
    pub const fn table_ptr(&self, index: usize) -> Option<NonNull<PageTable>> {
        self.tables[index]
    }

    /// Install `table` and its hardware `entry` in slot `index`.
    #[inline]
    pub(crate) fn install(
        &mut self,
        index: usize,
        table: NonNull<PageTable>,
        entry: DirectoryEntry,
    ) {
        self.tables[index] = Some(table);
        self.entries[index] = entry;
    }
}
