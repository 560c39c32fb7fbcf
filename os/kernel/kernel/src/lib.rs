//! # Kernel Memory Services
//!
//! The boundary between the memory-management core and the rest of the
//! kernel. This crate owns the single [`KernelMemory`](kernel_alloc::memory::KernelMemory)
//! instance behind an interrupt-safe lock and turns its errors into a logged
//! [`halt`].
//!
//! ## Bring-up
//!
//! ```ignore
//! QemuLogger::init(LevelFilter::Info)?;
//! let placement = PlacementAlloc::identity(kernel_end, placement_limit);
//! unsafe { kernel::init_paging(&MemoryConfig::default(), placement, &mut idt)? };
//! let table = kernel::kmalloc_aligned(4096);
//! ```
//!
//! Everything here runs on a single hardware thread; the lock only shields
//! against interrupts arriving mid-update.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod allocator;
pub mod global;
pub mod interrupts;
pub mod phys_copy;

pub use global::GlobalMemory;
pub use interrupts::{InterruptFrame, InterruptHandler, InterruptHooks};

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use kernel_global::*;

/// Stop the machine for good.
///
/// Interrupts are disabled first so nothing can resume execution. On hosted
/// builds this panics instead.
#[inline]
pub fn halt() -> ! {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    loop {
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    panic!("kernel halted");
}

/// Log `error` as critical and [`halt`].
#[cold]
pub fn fatal(context: &str, error: &dyn core::fmt::Display) -> ! {
    log::error!("critical: {context}: {error}");
    kernel_qemu::qemu_trace!("critical: {context}: {error}\n");
    halt()
}

/// The kernel's memory instance and its free-function interface.
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod kernel_global {
    use crate::allocator::KernelHeapAllocator;
    use crate::global::GlobalMemory;
    use crate::interrupts::InterruptHooks;
    use crate::phys_copy::PagingOffCopy;
    use core::ptr::NonNull;
    use kernel_alloc::bootstrap::PlacementAlloc;
    use kernel_alloc::memory::{MemoryConfig, MemoryError};
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::AddressSpace;
    use kernel_vmem::paging::ControlRegisters;

    /// The one kernel memory context.
    pub static KERNEL_MEMORY: GlobalMemory<PagingOffCopy, ControlRegisters> = GlobalMemory::new();

    #[global_allocator]
    static GLOBAL_ALLOCATOR: KernelHeapAllocator<PagingOffCopy, ControlRegisters> =
        KernelHeapAllocator::new(&KERNEL_MEMORY);

    /// Set up paging and the kernel heap.
    ///
    /// # Errors
    /// Any allocation failure during setup.
    ///
    /// # Safety
    /// See [`GlobalMemory::init_paging`]. The placement region must be
    /// identity mapped memory starting past the kernel image.
    pub unsafe fn init_paging<H: InterruptHooks + ?Sized>(
        config: &MemoryConfig,
        placement: PlacementAlloc,
        hooks: &mut H,
    ) -> Result<(), MemoryError> {
        unsafe {
            KERNEL_MEMORY.init_paging(config, placement, PagingOffCopy, ControlRegisters, hooks)
        }
    }

    #[must_use]
    pub fn kmalloc(size: usize) -> NonNull<u8> {
        KERNEL_MEMORY.kmalloc(size)
    }

    #[must_use]
    pub fn kmalloc_aligned(size: usize) -> NonNull<u8> {
        KERNEL_MEMORY.kmalloc_aligned(size)
    }

    #[must_use]
    pub fn kmalloc_physical(size: usize) -> (NonNull<u8>, PhysicalAddress) {
        KERNEL_MEMORY.kmalloc_physical(size)
    }

    #[must_use]
    pub fn kmalloc_aligned_physical(size: usize) -> (NonNull<u8>, PhysicalAddress) {
        KERNEL_MEMORY.kmalloc_aligned_physical(size)
    }

    pub fn kfree(ptr: *mut u8) {
        KERNEL_MEMORY.kfree(ptr);
    }

    #[must_use]
    pub fn create_address_space() -> AddressSpace {
        KERNEL_MEMORY.create_address_space()
    }

    #[must_use]
    pub fn clone_current_address_space() -> AddressSpace {
        KERNEL_MEMORY.clone_current_address_space()
    }

    /// # Safety
    /// See [`GlobalMemory::switch_address_space`].
    pub unsafe fn switch_address_space(space: AddressSpace) {
        unsafe { KERNEL_MEMORY.switch_address_space(space) };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use kernel_alloc::bootstrap::PlacementAlloc;
    use kernel_alloc::heap::HeapConfig;
    use kernel_alloc::memory::MemoryConfig;
    use kernel_info::memory::PAGE_SIZE;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
    use kernel_vmem::{PagingControl, PhysMemory};

    #[repr(C, align(4096))]
    #[derive(Clone)]
    struct Aligned4K([u8; PAGE_SIZE]);

    /// Page-aligned host memory that lives for the rest of the test run.
    pub fn leaked_pages(count: usize) -> (usize, usize) {
        let pages = vec![Aligned4K([0; PAGE_SIZE]); count].into_boxed_slice();
        let pages = Box::leak(pages);
        let start = pages.as_ptr() as usize;
        (start, start + count * PAGE_SIZE)
    }

    /// Counts frame copies; contents are not simulated.
    #[derive(Default)]
    pub struct CountingPhys {
        pub copies: usize,
    }

    impl PhysMemory for CountingPhys {
        unsafe fn copy_frame(&mut self, _src: PhysicalAddress, _dst: PhysicalAddress) {
            self.copies += 1;
        }
    }

    #[derive(Default)]
    pub struct RecordingPaging {
        pub loaded: Vec<PhysicalAddress>,
        pub flushed: Vec<VirtualAddress>,
    }

    impl PagingControl for RecordingPaging {
        unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
            self.loaded.push(directory);
        }

        fn flush_page(&mut self, va: VirtualAddress) {
            self.flushed.push(va);
        }
    }

    pub const HEAP_START: usize = 0xC000_0000;
    pub const HEAP_MAX_PAGES: usize = 32;

    /// A small layout with the heap living in host memory.
    pub fn test_setup() -> (MemoryConfig, PlacementAlloc) {
        let (placement_start, placement_end) = leaked_pages(32);
        let (heap_native, _) = leaked_pages(HEAP_MAX_PAGES);

        let config = MemoryConfig {
            memory_end: 0x0080_0000,
            heap: HeapConfig {
                start: HEAP_START,
                initial_size: 8 * PAGE_SIZE,
                max: HEAP_START + HEAP_MAX_PAGES * PAGE_SIZE,
                min_size: 2 * PAGE_SIZE,
                index_capacity: 128,
                supervisor_only: true,
                read_only: false,
            },
            heap_native_base: heap_native,
        };
        let placement =
            PlacementAlloc::with_physical_window(placement_start, placement_end, 0x0010_0000);
        (config, placement)
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn halt_stops_hosted_builds() {
        super::halt();
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn fatal_halts() {
        super::fatal("test", &"boom");
    }
}
