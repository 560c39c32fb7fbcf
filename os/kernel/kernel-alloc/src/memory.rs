//! # Kernel Memory Context
//!
//! [`KernelMemory`] owns every piece of memory management state: the
//! placement allocator, the frame bitmap, the kernel and current address
//! spaces and, once created, the heap.
//!
//! ## Bring-up
//!
//! 1. [`KernelMemory::new`] carves the frame bitmap and the kernel directory
//!    out of placement memory, creates the page tables for the whole heap
//!    range, identity maps everything up to one page past the placement
//!    pointer and binds frames for the initial heap.
//! 2. [`KernelMemory::enable_paging`] loads the kernel directory.
//! 3. [`KernelMemory::create_heap`] builds the heap. From here on, every
//!    allocation, including new page tables, comes from the heap.
//!
//! Page tables for the heap range are shared by every address space cloned
//! from the kernel directory, so heap growth is visible everywhere.

use crate::ByteAlloc;
use crate::bootstrap::{PlacementAlloc, PlacementError};
use crate::frame_alloc::{BitmapFrameAlloc, FrameError};
use crate::heap::{BLOCK_ALIGN, Heap, HeapBacking, HeapConfig, HeapError};
use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::NonNull;
use kernel_info::memory::{MEMORY_END, PAGE_SIZE};
use kernel_memory_addresses::{FrameIndex, PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, PagingControl, PhysMemory, TableAlloc, VmemError};

/// Errors raised by [`KernelMemory`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error("address {0:#x} is not a 32-bit virtual address")]
    AddressRange(usize),
    #[error("address {0:#x} is not mapped")]
    Unmapped(usize),
}

/// Layout of the kernel's memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryConfig {
    /// End of the physical memory tracked by the frame bitmap.
    pub memory_end: usize,
    /// Heap placement in virtual memory.
    pub heap: HeapConfig,
    /// Where the heap's virtual start is reachable from the running code.
    /// Equal to `heap.start` when the kernel runs on its own page tables.
    pub heap_native_base: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let heap = HeapConfig::default();
        Self {
            memory_end: MEMORY_END as usize,
            heap,
            heap_native_base: heap.start,
        }
    }
}

/// Converts between heap addresses as seen by running code and the virtual
/// addresses in the page tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct HeapWindow {
    native_base: usize,
    virtual_base: usize,
}

impl HeapWindow {
    fn to_virtual(self, native: usize) -> Result<VirtualAddress, MemoryError> {
        let address = native
            .checked_sub(self.native_base)
            .and_then(|offset| self.virtual_base.checked_add(offset))
            .ok_or(MemoryError::AddressRange(native))?;
        to_virtual(address)
    }

    /// `config` moved into the native window.
    const fn native_config(self, config: &HeapConfig) -> HeapConfig {
        HeapConfig {
            start: self.native_base,
            max: self.native_base + (config.max - config.start),
            ..*config
        }
    }
}

fn to_virtual(address: usize) -> Result<VirtualAddress, MemoryError> {
    u32::try_from(address)
        .map(VirtualAddress::new)
        .map_err(|_| MemoryError::AddressRange(address))
}

type Frames = RefCell<BitmapFrameAlloc<'static>>;

/// Hands the shared frame bitmap to code expecting a [`FrameAlloc`].
struct SharedFrames<'a>(&'a Frames);

impl FrameAlloc for SharedFrames<'_> {
    fn allocate(&mut self) -> Option<FrameIndex> {
        self.0.borrow_mut().allocate()
    }

    fn free(&mut self, frame: FrameIndex) {
        self.0.borrow_mut().free(frame);
    }

    fn is_used(&self, frame: FrameIndex) -> bool {
        self.0.borrow().is_used(frame)
    }

    fn reserve(&mut self, frame: FrameIndex) -> bool {
        self.0.borrow_mut().reserve(frame)
    }
}

/// Maps heap pages in the kernel directory.
struct KernelBacking<'a, C> {
    kernel: AddressSpace,
    frames: SharedFrames<'a>,
    window: HeapWindow,
    paging: &'a mut C,
}

impl<C: PagingControl> HeapBacking for KernelBacking<'_, C> {
    fn map_page(
        &mut self,
        address: usize,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), HeapError> {
        let va = self
            .window
            .to_virtual(address)
            .map_err(|_| VmemError::MissingTable(VirtualAddress::zero()))?;
        self.kernel
            .page(va)
            .ok_or(VmemError::MissingTable(va))?
            .bind_frame(&mut self.frames, kernel_only, writable)?;
        Ok(())
    }

    fn unmap_page(&mut self, address: usize) {
        let Ok(va) = self.window.to_virtual(address) else {
            log::warn!("heap page {address:#x} outside the heap window");
            return;
        };
        if let Some(page) = self.kernel.page(va) {
            page.unbind_frame(&mut self.frames);
            self.paging.flush_page(va);
        }
    }
}

/// Page-aligned zeroed memory from the heap, or from placement before the
/// heap exists.
struct ActiveTables<'a, C> {
    placement: &'a mut PlacementAlloc,
    heap: Option<&'a mut Heap>,
    backing: KernelBacking<'a, C>,
}

impl<C: PagingControl> TableAlloc for ActiveTables<'_, C> {
    fn alloc_zeroed_pages(
        &mut self,
        size: usize,
    ) -> Result<(NonNull<u8>, PhysicalAddress), VmemError> {
        let Some(heap) = self.heap.as_deref_mut() else {
            return self.placement.alloc_zeroed_pages(size);
        };

        let ptr = heap
            .alloc(size, true, &mut self.backing)
            .map_err(|_| VmemError::TableAllocation(size))?;
        let physical = self
            .backing
            .window
            .to_virtual(ptr.as_ptr() as usize)
            .ok()
            .and_then(|va| self.backing.kernel.translate(va))
            .ok_or(VmemError::TableAllocation(size))?;

        // SAFETY: freshly allocated block of at least `size` bytes.
        unsafe { ptr.write_bytes(0, size) };
        Ok((ptr, physical))
    }
}

/// The kernel's memory management state.
pub struct KernelMemory<P, C> {
    placement: PlacementAlloc,
    frames: Frames,
    kernel: AddressSpace,
    current: AddressSpace,
    heap: Option<Heap>,
    heap_config: HeapConfig,
    window: HeapWindow,
    phys: P,
    paging: C,
}

// SAFETY: all raw pointers reach memory owned by this context alone.
unsafe impl<P: Send, C: Send> Send for KernelMemory<P, C> {}

impl<P: PhysMemory, C: PagingControl> KernelMemory<P, C> {
    /// Set up frame tracking and the kernel directory, ready for paging.
    ///
    /// # Errors
    /// Any allocation or mapping failure during setup.
    ///
    /// # Safety
    /// - The placement region must be writable memory that is never used by
    ///   anything else and lives forever.
    /// - The placement window must be identity mapped once paging is on,
    ///   i.e. placement addresses equal their physical addresses, except
    ///   under test.
    pub unsafe fn new(
        config: &MemoryConfig,
        mut placement: PlacementAlloc,
        phys: P,
        paging: C,
    ) -> Result<Self, MemoryError> {
        let frame_count = BitmapFrameAlloc::frames_for(config.memory_end);
        let words = BitmapFrameAlloc::words_for(frame_count);
        let layout = Layout::array::<u32>(words).map_err(|_| FrameError::BitmapTooSmall {
            words,
            frames: frame_count,
        })?;
        let storage = placement
            .allocate_bytes(layout)
            .ok_or(PlacementError::OutOfSpace {
                requested: layout.size(),
                available: 0,
            })?;
        // SAFETY: placement memory is never handed out twice and lives forever.
        let words =
            unsafe { core::slice::from_raw_parts_mut(storage.cast::<u32>().as_ptr(), words) };
        let frames = RefCell::new(BitmapFrameAlloc::new(words, frame_count)?);

        let mut kernel = AddressSpace::new(&mut placement)?;

        // Tables for the whole heap range, so that heap growth never needs a
        // table allocation.
        let heap = &config.heap;
        let first = to_virtual(heap.start)?.table_index();
        let last = to_virtual(heap.max.saturating_sub(1).max(heap.start))?.table_index();
        for table in first..=last {
            let va = VirtualAddress::from_indices(table, 0, 0);
            kernel.translate_or_create(va, true, &mut placement)?;
        }

        // Identity map everything placement has handed out so far, plus one
        // page. The loop bound moves as tables are allocated.
        let mut address = 0usize;
        loop {
            let end = placement.physical_of(placement.current())?.as_usize() + PAGE_SIZE;
            if address >= end {
                break;
            }
            kernel.identity_map(
                to_virtual(address)?,
                &mut SharedFrames(&frames),
                &mut placement,
                false,
                false,
            )?;
            address += PAGE_SIZE;
        }

        for page in (heap.start..heap.end()).step_by(PAGE_SIZE) {
            let va = to_virtual(page)?;
            kernel
                .page(va)
                .ok_or(VmemError::MissingTable(va))?
                .bind_frame(&mut SharedFrames(&frames), heap.supervisor_only, !heap.read_only)?;
        }

        log::info!(
            "kernel directory at {}, identity map {address:#x} bytes, {}/{frame_count} frames",
            kernel.physical_address(),
            frames.borrow().used_count()
        );

        Ok(Self {
            placement,
            frames,
            kernel,
            current: kernel,
            heap: None,
            heap_config: *heap,
            window: HeapWindow {
                native_base: config.heap_native_base,
                virtual_base: heap.start,
            },
            phys,
            paging,
        })
    }

    /// Load the kernel directory and turn paging on.
    ///
    /// # Safety
    /// The running code, its stack and the placement region must be covered
    /// by the identity mapping.
    pub unsafe fn enable_paging(&mut self) {
        self.current = self.kernel;
        unsafe { self.kernel.activate(&mut self.paging) };
        log::info!("paging enabled");
    }

    /// Build the heap over its initial, already mapped pages.
    ///
    /// Does nothing if the heap already exists.
    ///
    /// # Errors
    /// [`MemoryError::Heap`] if the heap configuration is unusable.
    ///
    /// # Safety
    /// Paging must be enabled with the kernel directory (or the heap window
    /// must be valid memory, under test).
    pub unsafe fn create_heap(&mut self) -> Result<(), MemoryError> {
        if self.heap.is_some() {
            return Ok(());
        }

        let config = self.window.native_config(&self.heap_config);
        self.heap = Some(unsafe { Heap::create(&config) }?);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn heap(&self) -> Option<&Heap> {
        self.heap.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace {
        self.kernel
    }

    #[inline]
    #[must_use]
    pub const fn current_space(&self) -> AddressSpace {
        self.current
    }

    #[inline]
    pub const fn phys_mut(&mut self) -> &mut P {
        &mut self.phys
    }

    #[inline]
    pub const fn paging(&self) -> &C {
        &self.paging
    }

    #[must_use]
    pub fn used_frames(&self) -> usize {
        self.frames.borrow().used_count()
    }

    #[must_use]
    pub fn is_frame_used(&self, frame: FrameIndex) -> bool {
        self.frames.borrow().is_used(frame)
    }

    /// Allocate `size` bytes, page aligned if requested, and optionally
    /// report the physical address of the first byte.
    ///
    /// Served from placement memory until the heap exists.
    ///
    /// # Errors
    /// Exhaustion of whichever allocator is active.
    pub fn allocate(
        &mut self,
        size: usize,
        page_align: bool,
        want_physical: bool,
    ) -> Result<(NonNull<u8>, Option<PhysicalAddress>), MemoryError> {
        let Some(heap) = self.heap.as_mut() else {
            let placement = self.placement.allocate(size, page_align, want_physical)?;
            let ptr = NonNull::new(placement.address as *mut u8)
                .ok_or(MemoryError::Unmapped(placement.address))?;
            return Ok((ptr, placement.physical));
        };

        let window = self.window;
        let kernel = self.kernel;
        let mut backing = KernelBacking {
            kernel,
            frames: SharedFrames(&self.frames),
            window,
            paging: &mut self.paging,
        };
        let ptr = heap.alloc(size, page_align, &mut backing)?;

        let physical = if want_physical {
            let address = ptr.as_ptr() as usize;
            let va = window.to_virtual(address)?;
            Some(kernel.translate(va).ok_or(MemoryError::Unmapped(address))?)
        } else {
            None
        };
        Ok((ptr, physical))
    }

    /// Allocate `size` bytes.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        self.allocate(size, false, false).map(|(ptr, _)| ptr)
    }

    /// Allocate `size` bytes starting on a page boundary.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn kmalloc_aligned(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        self.allocate(size, true, false).map(|(ptr, _)| ptr)
    }

    /// Allocate `size` bytes and return their physical address too.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn kmalloc_physical(
        &mut self,
        size: usize,
    ) -> Result<(NonNull<u8>, PhysicalAddress), MemoryError> {
        self.allocate_physical(size, false)
    }

    /// Allocate `size` page-aligned bytes and return their physical address
    /// too.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn kmalloc_aligned_physical(
        &mut self,
        size: usize,
    ) -> Result<(NonNull<u8>, PhysicalAddress), MemoryError> {
        self.allocate_physical(size, true)
    }

    fn allocate_physical(
        &mut self,
        size: usize,
        page_align: bool,
    ) -> Result<(NonNull<u8>, PhysicalAddress), MemoryError> {
        let (ptr, physical) = self.allocate(size, page_align, true)?;
        let physical = physical.ok_or(MemoryError::Unmapped(ptr.as_ptr() as usize))?;
        Ok((ptr, physical))
    }

    /// Release memory from [`kmalloc`](Self::kmalloc) and friends.
    ///
    /// Null is ignored, and so is placement memory, which is never freed.
    ///
    /// # Errors
    /// [`MemoryError::Heap`] on corruption or double free.
    pub fn kfree(&mut self, ptr: *mut u8) -> Result<(), MemoryError> {
        if ptr.is_null() {
            return Ok(());
        }
        let Some(heap) = self.heap.as_mut() else {
            log::warn!("ignoring free of placement memory at {ptr:p}");
            return Ok(());
        };

        let mut backing = KernelBacking {
            kernel: self.kernel,
            frames: SharedFrames(&self.frames),
            window: self.window,
            paging: &mut self.paging,
        };
        heap.free(ptr, &mut backing)?;
        Ok(())
    }

    /// Bind a fresh frame to `va` in the current address space.
    ///
    /// # Errors
    /// Table or frame exhaustion.
    pub fn map_page(
        &mut self,
        va: VirtualAddress,
        kernel_only: bool,
        writable: bool,
    ) -> Result<(), MemoryError> {
        let mut current = self.current;
        let mut tables = ActiveTables {
            placement: &mut self.placement,
            heap: self.heap.as_mut(),
            backing: KernelBacking {
                kernel: self.kernel,
                frames: SharedFrames(&self.frames),
                window: self.window,
                paging: &mut self.paging,
            },
        };
        current.map(
            va,
            &mut SharedFrames(&self.frames),
            &mut tables,
            kernel_only,
            writable,
        )?;
        Ok(())
    }

    /// Release the frame bound to `va` in the current address space.
    pub fn unmap_page(&mut self, va: VirtualAddress) -> Option<FrameIndex> {
        let mut current = self.current;
        let frame = current.unmap(va, &mut SharedFrames(&self.frames))?;
        self.paging.flush_page(va);
        Some(frame)
    }

    /// Translate `va` through the current address space.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.current.translate(va)
    }

    /// A new address space holding only the kernel's mappings.
    ///
    /// # Errors
    /// Table allocation failure.
    pub fn create_address_space(&mut self) -> Result<AddressSpace, MemoryError> {
        let kernel = self.kernel;
        self.clone_space(kernel)
    }

    /// Copy the current address space: kernel tables are shared, everything
    /// else is duplicated frame by frame.
    ///
    /// # Errors
    /// Table or frame exhaustion.
    pub fn clone_current(&mut self) -> Result<AddressSpace, MemoryError> {
        let current = self.current;
        self.clone_space(current)
    }

    fn clone_space(&mut self, source: AddressSpace) -> Result<AddressSpace, MemoryError> {
        let kernel = self.kernel;
        let mut tables = ActiveTables {
            placement: &mut self.placement,
            heap: self.heap.as_mut(),
            backing: KernelBacking {
                kernel,
                frames: SharedFrames(&self.frames),
                window: self.window,
                paging: &mut self.paging,
            },
        };
        let copy = source.clone_space(
            &kernel,
            &mut tables,
            &mut SharedFrames(&self.frames),
            &mut self.phys,
        )?;
        Ok(copy)
    }

    /// Make `space` the current address space.
    ///
    /// # Safety
    /// `space` must share the kernel's tables, as every space created by this
    /// context does.
    pub unsafe fn switch_to(&mut self, space: AddressSpace) {
        self.current = space;
        unsafe { space.activate(&mut self.paging) };
    }
}

impl<P: PhysMemory, C: PagingControl> ByteAlloc for KernelMemory<P, C> {
    fn allocate_bytes(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() > PAGE_SIZE {
            return None;
        }
        let page_align = layout.align() > BLOCK_ALIGN;
        self.allocate(layout.size(), page_align, false)
            .ok()
            .map(|(ptr, _)| ptr)
    }
}
