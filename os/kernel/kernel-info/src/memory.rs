//! # Memory Layout

use kernel_memory_addresses::{ENTRIES_PER_TABLE, PAGE_SIZE as FRAME_SIZE};

/// Size of a page and of a physical frame.
pub const PAGE_SIZE: usize = FRAME_SIZE as usize;

/// Number of pages in one page table.
pub const PAGES_PER_TABLE: usize = ENTRIES_PER_TABLE as usize;

/// Number of page tables in one page directory.
pub const TABLES_PER_DIRECTORY: usize = ENTRIES_PER_TABLE as usize;

/// Bytes of virtual memory covered by one page table (4 MiB).
pub const TABLE_SPAN: usize = PAGE_SIZE * PAGES_PER_TABLE;

/// End of the physical memory managed by the frame allocator (16 MiB).
pub const MEMORY_END: u32 = 0x0100_0000;

/// Where the kernel heap begins in every address space.
pub const KERNEL_HEAP_START: u32 = 0xC000_0000;

/// Upper bound the kernel heap may grow to.
pub const KERNEL_HEAP_MAX: u32 = 0xCFFF_F000;

/// Size of the kernel heap when it is created, including its hole index.
pub const KERNEL_HEAP_INITIAL_SIZE: usize = 0x10_0000;

/// Number of hole handles the heap index can hold.
pub const KERNEL_HEAP_INDEX_CAPACITY: usize = 0x2_0000;

/// The heap never shrinks below this many usable bytes.
pub const KERNEL_HEAP_MIN_SIZE: usize = 0x7_0000;

/// Sentinel stored in every heap block header.
pub const HEAP_HEADER_MAGIC: u32 = 0xCEC0_04B3;

/// Sentinel stored in every heap block footer.
pub const HEAP_FOOTER_MAGIC: u32 = 0xCEC6_F0FA;

const _: () = {
    assert!(PAGE_SIZE == 4096);
    assert!(TABLE_SPAN == 0x40_0000);
    assert!(MEMORY_END as usize % PAGE_SIZE == 0);
    assert!(KERNEL_HEAP_START as usize % PAGE_SIZE == 0);
    assert!(KERNEL_HEAP_MAX as usize % PAGE_SIZE == 0);
    assert!(KERNEL_HEAP_MAX > KERNEL_HEAP_START);
    assert!(KERNEL_HEAP_INITIAL_SIZE % PAGE_SIZE == 0);
    assert!(KERNEL_HEAP_MIN_SIZE < KERNEL_HEAP_INITIAL_SIZE);
    assert!(KERNEL_HEAP_MIN_SIZE % PAGE_SIZE == 0);
    assert!(HEAP_HEADER_MAGIC != HEAP_FOOTER_MAGIC);
};
