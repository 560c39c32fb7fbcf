//! # Address Space (IA-32, directory-rooted)
//!
//! A handle to one page directory and the page tables hanging off it.
//!
//! ## Highlights
//!
//! - [`AddressSpace::translate_or_create`] finds the page entry for a virtual
//!   address, creating the covering page table on demand.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] bind and release frames.
//! - [`AddressSpace::activate`] loads the directory and enables paging.
//! - [`AddressSpace::clone_space`] copies an address space, sharing every page
//!   table that belongs to the kernel and deep-copying the rest.
//!
//! ## Ownership
//!
//! Tables and directories are never freed. A table reachable from two
//! directories is a kernel table; a table reachable from one directory is
//! private to it.

use crate::page_entry::{DirectoryEntry, PageEntry};
use crate::page_table::{PageDirectory, PageTable};
use crate::{FrameAlloc, PagingControl, PhysMemory, TableAlloc, VmemError};
use core::ptr::NonNull;
use kernel_info::memory::{PAGE_SIZE, TABLES_PER_DIRECTORY};
use kernel_memory_addresses::{FrameIndex, PAGE_SHIFT, PhysicalAddress, VirtualAddress};

/// Handle to a single page directory.
///
/// The handle is a plain pointer: copying it does not copy the directory.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct AddressSpace {
    directory: NonNull<PageDirectory>,
}

// SAFETY: the directory is only reached through the handle, and all mutation
// requires `&mut self`. Callers serialize access with a lock.
unsafe impl Send for AddressSpace {}

impl AddressSpace {
    /// Allocate an empty directory.
    ///
    /// # Errors
    /// [`VmemError::TableAllocation`] if `tables` is exhausted.
    pub fn new<T: TableAlloc + ?Sized>(tables: &mut T) -> Result<Self, VmemError> {
        let (ptr, physical) = tables.alloc_zeroed_pages(PageDirectory::ALLOCATION_SIZE)?;
        let mut directory = ptr.cast::<PageDirectory>();

        // SAFETY: freshly allocated, zeroed and page aligned; zero is a valid directory.
        unsafe { directory.as_mut() }.physical = physical;

        log::debug!("created page directory at {physical}");
        Ok(Self { directory })
    }

    /// Wrap an existing directory.
    ///
    /// # Safety
    /// `directory` must point at a valid [`PageDirectory`] that outlives every
    /// copy of the returned handle.
    #[inline]
    #[must_use]
    pub const unsafe fn from_directory(directory: NonNull<PageDirectory>) -> Self {
        Self { directory }
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<PageDirectory> {
        self.directory
    }

    #[inline]
    #[must_use]
    pub const fn directory(&self) -> &PageDirectory {
        // SAFETY: upheld by construction.
        unsafe { self.directory.as_ref() }
    }

    #[inline]
    const fn directory_mut(&mut self) -> &mut PageDirectory {
        // SAFETY: upheld by construction.
        unsafe { self.directory.as_mut() }
    }

    /// Physical address of the directory, as loaded into CR3.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        self.directory().physical_address()
    }

    /// The page table in directory slot `index`, if present.
    #[must_use]
    pub fn table(&self, index: usize) -> Option<&PageTable> {
        // SAFETY: installed tables stay valid for the directory's lifetime.
        self.directory()
            .table_ptr(index)
            .map(|t| unsafe { t.as_ref() })
    }

    /// Whether slot `index` of both spaces points at the very same table.
    #[must_use]
    pub fn shares_table_with(&self, other: &Self, index: usize) -> bool {
        match (
            self.directory().table_ptr(index),
            other.directory().table_ptr(index),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Locate the page entry for `va`.
    ///
    /// When the covering table is missing, returns `Ok(None)` if `create` is
    /// false. Otherwise a zeroed table is allocated and installed with a
    /// present, writable, user-accessible directory entry.
    ///
    /// # Errors
    /// [`VmemError::TableAllocation`] if a new table was needed but could not
    /// be allocated.
    pub fn translate_or_create<T: TableAlloc + ?Sized>(
        &mut self,
        va: VirtualAddress,
        create: bool,
        tables: &mut T,
    ) -> Result<Option<&mut PageEntry>, VmemError> {
        let index = va.table_index();
        let mut table = match self.directory().table_ptr(index) {
            Some(table) => table,
            None if !create => return Ok(None),
            None => {
                let (ptr, physical) = tables.alloc_zeroed_pages(PAGE_SIZE)?;
                let table = ptr.cast::<PageTable>();
                self.directory_mut()
                    .install(index, table, DirectoryEntry::for_table(physical));
                log::trace!("created page table {index} at {physical} for {va}");
                table
            }
        };

        // SAFETY: installed tables stay valid for the directory's lifetime.
        let table = unsafe { table.as_mut() };
        Ok(Some(table.get_mut(va.page_index())))
    }

    /// Like [`translate_or_create`](Self::translate_or_create) with `create`
    /// set, for callers that need an entry.
    ///
    /// # Errors
    /// [`VmemError::TableAllocation`] if the table could not be allocated.
    pub fn page_or_create<T: TableAlloc + ?Sized>(
        &mut self,
        va: VirtualAddress,
        tables: &mut T,
    ) -> Result<&mut PageEntry, VmemError> {
        self.translate_or_create(va, true, tables)?
            .ok_or(VmemError::MissingTable(va))
    }

    /// The page entry for `va`, without creating tables.
    #[must_use]
    pub fn page(&mut self, va: VirtualAddress) -> Option<&mut PageEntry> {
        let mut table = self.directory().table_ptr(va.table_index())?;
        // SAFETY: installed tables stay valid for the directory's lifetime.
        Some(unsafe { table.as_mut() }.get_mut(va.page_index()))
    }

    /// A copy of the page entry for `va`, if its table exists.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntry> {
        self.table(va.table_index())
            .map(|t| t.get(va.page_index()))
    }

    /// Translate `va` to a physical address if a frame is bound to its page.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.entry(va).filter(PageEntry::is_bound)?;
        Some(entry.physical_address() + va.page_offset())
    }

    /// Bind a fresh frame to the page containing `va`, creating its table if
    /// needed. Already bound pages are left untouched.
    ///
    /// # Errors
    /// - [`VmemError::TableAllocation`] if a table could not be allocated.
    /// - [`VmemError::OutOfFrames`] if no frame is left.
    pub fn map<F, T>(
        &mut self,
        va: VirtualAddress,
        frames: &mut F,
        tables: &mut T,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), VmemError>
    where
        F: FrameAlloc + ?Sized,
        T: TableAlloc + ?Sized,
    {
        self.page_or_create(va, tables)?
            .bind_frame(frames, kernel_only, writable)
    }

    /// Map the page containing `va` onto the frame with the same number.
    ///
    /// # Errors
    /// - [`VmemError::TableAllocation`] if a table could not be allocated.
    /// - [`VmemError::FrameInUse`] if that frame belongs to another page.
    pub fn identity_map<F, T>(
        &mut self,
        va: VirtualAddress,
        frames: &mut F,
        tables: &mut T,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), VmemError>
    where
        F: FrameAlloc + ?Sized,
        T: TableAlloc + ?Sized,
    {
        let frame = FrameIndex::new(va.as_u32() >> PAGE_SHIFT);
        self.page_or_create(va, tables)?
            .bind_exact_frame(frames, frame, kernel_only, writable)
    }

    /// Release the frame bound to the page containing `va`.
    ///
    /// Returns the released frame, or `None` if nothing was bound.
    pub fn unmap<F: FrameAlloc + ?Sized>(
        &mut self,
        va: VirtualAddress,
        frames: &mut F,
    ) -> Option<FrameIndex> {
        self.page(va)?.unbind_frame(frames)
    }

    /// Make this the active address space.
    ///
    /// # Safety
    /// The directory must map the currently executing code, its stack and
    /// every structure the kernel touches next.
    pub unsafe fn activate<P: PagingControl + ?Sized>(&self, paging: &mut P) {
        let physical = self.physical_address();
        log::debug!("activating page directory at {physical}");
        unsafe { paging.load_directory(physical) };
    }

    /// Create a copy of this address space.
    ///
    /// A table that `kernel` has in the same slot is shared by pointer and its
    /// directory entry is copied as is. Every other table is copied: each
    /// bound page gets a fresh frame with the same flags and the same
    /// contents. Unbound entries stay zero.
    ///
    /// # Errors
    /// [`VmemError::TableAllocation`] or [`VmemError::OutOfFrames`] when
    /// memory runs out. Structures allocated before the failure are not
    /// reclaimed.
    pub fn clone_space<T, F, M>(
        &self,
        kernel: &Self,
        tables: &mut T,
        frames: &mut F,
        phys: &mut M,
    ) -> Result<Self, VmemError>
    where
        T: TableAlloc + ?Sized,
        F: FrameAlloc + ?Sized,
        M: PhysMemory + ?Sized,
    {
        let mut copy = Self::new(tables)?;
        let mut shared = 0usize;
        let mut copied = 0usize;

        for index in 0..TABLES_PER_DIRECTORY {
            let Some(source) = self.directory().table_ptr(index) else {
                continue;
            };

            if kernel.directory().table_ptr(index) == Some(source) {
                let entry = self.directory().entry(index);
                copy.directory_mut().install(index, source, entry);
                shared += 1;
                continue;
            }

            // SAFETY: installed tables stay valid for the directory's lifetime.
            let source = unsafe { source.as_ref() };
            let (table, physical) = Self::clone_table(source, tables, frames, phys)?;
            copy.directory_mut()
                .install(index, table, DirectoryEntry::for_table(physical));
            copied += 1;
        }

        log::debug!(
            "cloned page directory {} into {} ({shared} shared, {copied} copied tables)",
            self.physical_address(),
            copy.physical_address()
        );
        Ok(copy)
    }

    fn clone_table<T, F, M>(
        source: &PageTable,
        tables: &mut T,
        frames: &mut F,
        phys: &mut M,
    ) -> Result<(NonNull<PageTable>, PhysicalAddress), VmemError>
    where
        T: TableAlloc + ?Sized,
        F: FrameAlloc + ?Sized,
        M: PhysMemory + ?Sized,
    {
        let (ptr, physical) = tables.alloc_zeroed_pages(PAGE_SIZE)?;
        let mut table = ptr.cast::<PageTable>();
        // SAFETY: freshly allocated and zeroed.
        let target = unsafe { table.as_mut() };

        for (index, entry) in source.iter().filter(|(_, e)| e.is_bound()) {
            let page = target.get_mut(index);
            page.bind_frame(frames, !entry.user(), entry.writable())?;
            page.copy_flags_from(entry);

            // SAFETY: both frames are bound; the destination is not mapped anywhere else yet.
            unsafe { phys.copy_frame(entry.physical_address(), page.physical_address()) };
        }

        Ok((table, physical))
    }

    /// Every bound page with its virtual address, in address order.
    pub fn present_pages(&self) -> impl Iterator<Item = (VirtualAddress, PageEntry)> + '_ {
        (0..TABLES_PER_DIRECTORY).flat_map(move |ti| {
            self.table(ti).into_iter().flat_map(move |table| {
                table
                    .iter()
                    .filter(|(_, e)| e.is_bound())
                    .map(move |(pi, e)| (VirtualAddress::from_indices(ti, pi, 0), *e))
            })
        })
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("physical", &self.physical_address())
            .finish_non_exhaustive()
    }
}
