//! # Kernel Memory Allocation
//!
//! Everything the kernel allocates goes through this crate, from the first
//! page directory at boot to heap blocks at runtime.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 KernelMemory                        │
//! │    • kmalloc / kfree                                │
//! │    • address space creation, cloning, switching     │
//! └───────┬─────────────────────┬───────────────────────┘
//!         │                     │
//! ┌───────▼──────────┐  ┌───────▼───────────────────────┐
//! │ Placement        │  │ Heap                          │
//! │ (before heap)    │  │ • header/footer blocks        │
//! │ • bump pointer   │  │ • size-sorted hole index      │
//! └──────────────────┘  │ • grows and shrinks by pages  │
//!                       └───────┬───────────────────────┘
//!                               │
//! ┌─────────────────────────────▼───────────────────────┐
//! │           Bitmap Frame Allocator                    │
//! │    • one bit per 4 KiB frame                        │
//! │    • lowest free frame first                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! - [`frame_alloc`]: physical frame bitmap.
//! - [`bootstrap`]: placement allocator for the time before the heap.
//! - [`ordered`]: sorted fixed-capacity array, used as the heap's hole index.
//! - [`heap`]: the kernel heap.
//! - [`memory`]: [`KernelMemory`](memory::KernelMemory), the kernel's
//!   memory context tying the above to a kernel address space.
//!
//! None of the types lock internally. The kernel keeps a single
//! [`KernelMemory`](memory::KernelMemory) behind an interrupt-disabling spin
//! lock.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_vmem::FrameAlloc;
//!
//! let mut words = [0u32; 4];
//! let mut frames = BitmapFrameAlloc::new(&mut words, 128).unwrap();
//! let frame = frames.allocate().unwrap();
//! assert!(frames.is_used(frame));
//! frames.free(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod frame_alloc;
pub mod heap;
pub mod memory;
pub mod ordered;

use core::alloc::Layout;
use core::ptr::NonNull;

/// Raw byte allocation from whichever allocator is currently active.
pub trait ByteAlloc {
    /// Allocate memory fitting `layout`, or `None` when out of memory.
    fn allocate_bytes(&mut self, layout: Layout) -> Option<NonNull<u8>>;
}

#[cfg(test)]
pub(crate) mod tests {
    /// One host page, page aligned.
    #[derive(Clone)]
    #[repr(C, align(4096))]
    pub struct Aligned4K(pub [u8; 4096]);

    /// A run of contiguous, page-aligned host memory.
    pub struct Arena {
        pages: Box<[Aligned4K]>,
    }

    impl Arena {
        pub fn new(pages: usize) -> Self {
            Self {
                pages: vec![Aligned4K([0; 4096]); pages].into_boxed_slice(),
            }
        }

        pub fn start(&self) -> usize {
            self.pages.as_ptr() as usize
        }

        pub fn end(&self) -> usize {
            self.start() + self.pages.len() * 4096
        }

        pub fn fill(&mut self, byte: u8) {
            for page in &mut self.pages {
                page.0.fill(byte);
            }
        }

        pub fn bytes(&self) -> &[u8] {
            let len = self.pages.len() * 4096;
            unsafe { core::slice::from_raw_parts(self.pages.as_ptr().cast(), len) }
        }
    }
}
