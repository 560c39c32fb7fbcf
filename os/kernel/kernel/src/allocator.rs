//! # Kernel Global Allocator
//!
//! [`KernelHeapAllocator`] serves Rust's `alloc` types from the kernel heap.
//!
//! The heap only knows two alignments: its block alignment and page
//! alignment. Layouts asking for anything in between get a page-aligned
//! block; layouts above a page cannot be served and return null.
//!
//! Before [`init_paging`](crate::GlobalMemory::init_paging) every allocation
//! fails. Frees of foreign or corrupted pointers halt.

use crate::GlobalMemory;
use crate::fatal;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use kernel_alloc::heap::BLOCK_ALIGN;
use kernel_info::memory::PAGE_SIZE;
use kernel_vmem::{PagingControl, PhysMemory};

/// `GlobalAlloc` adapter over a [`GlobalMemory`].
pub struct KernelHeapAllocator<P: 'static, C: 'static> {
    memory: &'static GlobalMemory<P, C>,
}

impl<P: 'static, C: 'static> KernelHeapAllocator<P, C> {
    #[must_use]
    pub const fn new(memory: &'static GlobalMemory<P, C>) -> Self {
        Self { memory }
    }
}

unsafe impl<P, C> GlobalAlloc for KernelHeapAllocator<P, C>
where
    P: PhysMemory + 'static,
    C: PagingControl + 'static,
{
    /// Allocate a block of at least `layout.size()` bytes with `layout.align()`.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        let page_align = layout.align() > BLOCK_ALIGN;
        self.memory
            .try_with(|m| m.allocate(layout.size(), page_align, false))
            .and_then(Result::ok)
            .map_or(ptr::null_mut(), |(block, _)| block.as_ptr())
    }

    /// Deallocate a block previously returned by `alloc`/`alloc_zeroed`.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` and `layout` must match a prior allocation.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        match self.memory.try_with(|m| m.kfree(ptr)) {
            Some(Ok(())) => {}
            Some(Err(e)) => fatal("dealloc", &e),
            None => fatal("dealloc", &"kernel memory is not initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::{InterruptHandler, InterruptHooks};
    use crate::tests::{CountingPhys, RecordingPaging, test_setup};

    struct NoHooks;

    impl InterruptHooks for NoHooks {
        fn register_handler(&mut self, _vector: u8, _handler: InterruptHandler) {}
    }

    type TestAllocator = KernelHeapAllocator<CountingPhys, RecordingPaging>;

    fn allocator() -> TestAllocator {
        let global = Box::leak(Box::new(GlobalMemory::new()));
        let (config, placement) = test_setup();
        unsafe {
            global.init_paging(
                &config,
                placement,
                CountingPhys::default(),
                RecordingPaging::default(),
                &mut NoHooks,
            )
        }
        .unwrap();
        KernelHeapAllocator::new(global)
    }

    #[test]
    fn honours_small_and_page_alignments() {
        let allocator = allocator();

        let small = Layout::from_size_align(24, BLOCK_ALIGN).unwrap();
        let odd = Layout::from_size_align(40, 64).unwrap();
        let page = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap();

        unsafe {
            let a = allocator.alloc(small);
            let b = allocator.alloc(odd);
            let c = allocator.alloc_zeroed(page);
            assert!(!a.is_null() && !b.is_null() && !c.is_null());
            assert_eq!(a as usize % BLOCK_ALIGN, 0);
            assert_eq!(b as usize % 64, 0);
            assert_eq!(c as usize % PAGE_SIZE, 0);
            assert!(core::slice::from_raw_parts(c, PAGE_SIZE).iter().all(|&b| b == 0));

            allocator.dealloc(a, small);
            allocator.dealloc(b, odd);
            allocator.dealloc(c, page);
        }
        allocator
            .memory
            .try_with(|m| m.heap().unwrap().check().unwrap());
    }

    #[test]
    fn oversized_alignment_and_exhaustion_return_null() {
        let allocator = allocator();
        let huge_align = Layout::from_size_align(16, 2 * PAGE_SIZE).unwrap();
        let huge = Layout::from_size_align(1 << 24, 8).unwrap();
        unsafe {
            assert!(allocator.alloc(huge_align).is_null());
            assert!(allocator.alloc(huge).is_null());
        }
    }

    #[test]
    fn allocation_before_init_fails() {
        let global = Box::leak(Box::new(GlobalMemory::<CountingPhys, RecordingPaging>::new()));
        let allocator = KernelHeapAllocator::new(global);
        let layout = Layout::new::<u64>();
        unsafe {
            assert!(allocator.alloc(layout).is_null());
            allocator.dealloc(ptr::null_mut(), layout);
        }
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn double_dealloc_halts() {
        let allocator = allocator();
        let layout = Layout::new::<[u32; 4]>();
        unsafe {
            let p = allocator.alloc(layout);
            allocator.dealloc(p, layout);
            allocator.dealloc(p, layout);
        }
    }
}
