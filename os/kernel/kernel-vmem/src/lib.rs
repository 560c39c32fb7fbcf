//! # Virtual Memory Support
//!
//! IA-32 two-level paging for the kernel: page entries, page tables, page
//! directories and the [`AddressSpace`] handle that ties them together.
//!
//! ## What you get
//! - [`PageEntry`]/[`DirectoryEntry`] bitfields matching the hardware layout.
//! - 4 KiB-aligned [`PageTable`] and [`PageDirectory`] types.
//! - An [`AddressSpace`] with lookup, on-demand table creation, frame binding,
//!   activation and cloning.
//! - Small interfaces for what paging needs from the rest of the kernel:
//!   [`FrameAlloc`], [`TableAlloc`], [`PhysMemory`] and [`PagingControl`].
//!
//! ## IA-32 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22       | 21‒12      | 11‒0   |
//! | Directory   | Table      | Offset |
//! ```
//!
//! ```text
//!  CR3 → PageDirectory → PageTable → Frame
//!          │               │
//!          │               └───► PTE → maps a 4 KiB page
//!          └───────────────────► PDE → points at a page table (4 MiB of VA)
//! ```
//!
//! Every directory entry covers 4 MiB of virtual address space and every table
//! entry covers a single 4 KiB page. Large pages are not used.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry;
mod page_table;
pub mod paging;

pub use crate::address_space::AddressSpace;
pub use crate::page_entry::{DirectoryEntry, PageEntry};
pub use crate::page_table::{PageDirectory, PageTable};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use core::ptr::NonNull;
use kernel_memory_addresses::{FrameIndex, PhysicalAddress, VirtualAddress};

/// Source of physical 4 KiB frames for mapped pages.
///
/// Every frame handed out by [`allocate`](Self::allocate) is owned by exactly
/// one page entry until it is given back through [`free`](Self::free).
pub trait FrameAlloc {
    /// Claim the lowest-numbered free frame, or `None` if all are in use.
    fn allocate(&mut self) -> Option<FrameIndex>;

    /// Return `frame` to the pool. Freeing a free frame is a no-op.
    fn free(&mut self, frame: FrameIndex);

    /// Whether `frame` is currently claimed.
    fn is_used(&self, frame: FrameIndex) -> bool;

    /// Claim a specific frame. Returns `false` if it was already claimed or
    /// lies outside the managed range.
    fn reserve(&mut self, frame: FrameIndex) -> bool;
}

/// Source of zeroed, page-aligned memory for page tables and directories.
///
/// Paging structures must be reachable both from the kernel (to edit them)
/// and from the CPU (through their physical address).
pub trait TableAlloc {
    /// Allocate `size` bytes of zeroed, page-aligned memory.
    ///
    /// Returns the kernel-visible pointer and the physical address of the
    /// first byte. Only the first page needs to be physically contiguous: the
    /// hardware view of every paging structure fits in one page.
    ///
    /// # Errors
    /// [`VmemError::TableAllocation`] if no memory is left.
    fn alloc_zeroed_pages(&mut self, size: usize)
    -> Result<(NonNull<u8>, PhysicalAddress), VmemError>;
}

/// Access to physical memory that is not necessarily mapped.
pub trait PhysMemory {
    /// Copy one 4 KiB frame from `src` to `dst`.
    ///
    /// # Safety
    /// - Both addresses must be page-aligned frames of real memory.
    /// - `dst` must not be in use by anything that would observe the write.
    unsafe fn copy_frame(&mut self, src: PhysicalAddress, dst: PhysicalAddress);
}

/// The CPU side of paging: loading a directory and flushing translations.
pub trait PagingControl {
    /// Make `directory` the active page directory and turn paging on.
    ///
    /// # Safety
    /// The directory must map the currently executing code and stack.
    unsafe fn load_directory(&mut self, directory: PhysicalAddress);

    /// Drop any cached translation for `va`.
    fn flush_page(&mut self, va: VirtualAddress) {
        let _ = va;
    }
}

/// Errors raised by page table manipulation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("no free physical frames left")]
    OutOfFrames,
    #[error("failed to allocate {0} bytes for paging structures")]
    TableAllocation(usize),
    #[error("physical frame {0} is already in use")]
    FrameInUse(FrameIndex),
    #[error("page is already bound to frame {0}")]
    AlreadyBound(FrameIndex),
    #[error("no page table covers {0}")]
    MissingTable(VirtualAddress),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone)]
    #[repr(C, align(4096))]
    pub struct Aligned4K(pub [u8; 4096]);

    impl Aligned4K {
        pub const fn zeroed() -> Self {
            Self([0; 4096])
        }
    }

    /// First-fit frame pool backed by a `Vec<bool>`.
    pub struct VecFrames {
        used: Vec<bool>,
    }

    impl VecFrames {
        pub fn new(count: usize) -> Self {
            Self {
                used: vec![false; count],
            }
        }

        pub fn used(&self) -> usize {
            self.used.iter().filter(|u| **u).count()
        }
    }

    impl FrameAlloc for VecFrames {
        fn allocate(&mut self) -> Option<FrameIndex> {
            let index = self.used.iter().position(|u| !*u)?;
            self.used[index] = true;
            Some(FrameIndex::new(u32::try_from(index).ok()?))
        }

        fn free(&mut self, frame: FrameIndex) {
            if let Some(u) = self.used.get_mut(frame.as_usize()) {
                *u = false;
            }
        }

        fn is_used(&self, frame: FrameIndex) -> bool {
            self.used.get(frame.as_usize()).copied().unwrap_or(false)
        }

        fn reserve(&mut self, frame: FrameIndex) -> bool {
            match self.used.get_mut(frame.as_usize()) {
                Some(u) if !*u => {
                    *u = true;
                    true
                }
                _ => false,
            }
        }
    }

    /// Hands out zeroed page runs from the host heap with made-up physical
    /// addresses starting at [`TestTables::PHYS_BASE`].
    pub struct TestTables {
        blocks: Vec<Box<[Aligned4K]>>,
        next_phys: u32,
        remaining_pages: usize,
    }

    impl TestTables {
        pub const PHYS_BASE: u32 = 0x0080_0000;

        pub fn new(page_budget: usize) -> Self {
            Self {
                blocks: Vec::new(),
                next_phys: Self::PHYS_BASE,
                remaining_pages: page_budget,
            }
        }

        pub fn pages_used(&self) -> usize {
            self.blocks.iter().map(|b| b.len()).sum()
        }
    }

    impl TableAlloc for TestTables {
        fn alloc_zeroed_pages(
            &mut self,
            size: usize,
        ) -> Result<(NonNull<u8>, PhysicalAddress), VmemError> {
            let pages = size.div_ceil(4096);
            if pages > self.remaining_pages {
                return Err(VmemError::TableAllocation(size));
            }
            self.remaining_pages -= pages;

            let mut block = vec![Aligned4K::zeroed(); pages].into_boxed_slice();
            let ptr = NonNull::new(block.as_mut_ptr().cast::<u8>())
                .ok_or(VmemError::TableAllocation(size))?;
            let phys = PhysicalAddress::new(self.next_phys);
            self.next_phys += u32::try_from(pages * 4096).expect("test tables overflow");
            self.blocks.push(block);
            Ok((ptr, phys))
        }
    }

    /// Physical memory simulated as one host page per frame.
    pub struct TestPhys {
        pub frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn new(count: usize) -> Self {
            Self {
                frames: vec![Aligned4K::zeroed(); count],
            }
        }

        pub fn frame(&mut self, frame: FrameIndex) -> &mut [u8; 4096] {
            &mut self.frames[frame.as_usize()].0
        }
    }

    impl PhysMemory for TestPhys {
        unsafe fn copy_frame(&mut self, src: PhysicalAddress, dst: PhysicalAddress) {
            let src = self.frames[src.frame().as_usize()].0;
            self.frames[dst.frame().as_usize()].0 = src;
        }
    }

    /// Remembers every directory it was asked to load.
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

    #[test]
    fn error_messages_name_the_culprit() {
        assert_eq!(
            VmemError::FrameInUse(FrameIndex::new(0x10)).to_string(),
            "physical frame 0x10 is already in use"
        );
        assert_eq!(
            VmemError::MissingTable(VirtualAddress::new(0xC000_0000)).to_string(),
            "no page table covers 0xC0000000"
        );
    }
}
