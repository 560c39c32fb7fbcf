//! # Kernel Heap
//!
//! Variable-size allocation over a contiguous virtual region that grows and
//! shrinks one page at a time.
//!
//! ## Layout
//!
//! ```text
//! start                      first_block                               end
//! ┌──────────────────────────┬────────┬─────────┬────────┬─────┬────────┐
//! │ hole index (OrderedArray)│ Header │ payload │ Footer │ ... │ Footer │
//! └──────────────────────────┴────────┴─────────┴────────┴─────┴────────┘
//! ```
//!
//! Every block, used or free ("hole"), is bracketed by a [`Header`] and a
//! [`Footer`]. The header records the full block size; the footer points back
//! at its header, so the block to the left of any header can be found in
//! constant time. Holes are additionally listed in the index, sorted by size,
//! which makes the first hole that fits also the smallest one that fits.
//!
//! Block sizes are rounded up to [`BLOCK_ALIGN`], so every header, footer and
//! payload is naturally aligned.

use crate::ordered::{OrderedArray, OrderedArrayError};
use core::ptr::NonNull;
use kernel_info::memory::{
    HEAP_FOOTER_MAGIC, HEAP_HEADER_MAGIC, KERNEL_HEAP_INDEX_CAPACITY, KERNEL_HEAP_INITIAL_SIZE,
    KERNEL_HEAP_MAX, KERNEL_HEAP_MIN_SIZE, KERNEL_HEAP_START, PAGE_SIZE,
};
use kernel_memory_addresses::{align_down, align_up};
use kernel_vmem::VmemError;

/// Metadata at the start of every block.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Header {
    pub magic: u32,
    pub is_hole: bool,
    /// Size of the whole block: header, payload and footer.
    pub size: usize,
}

/// Metadata at the end of every block.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Footer {
    pub magic: u32,
    pub header: *mut Header,
}

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const FOOTER_SIZE: usize = size_of::<Footer>();

/// Bytes of metadata per block. Also the size of the smallest block.
pub const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Alignment of every block and of every returned payload.
pub const BLOCK_ALIGN: usize = align_of::<Header>();

const _: () = {
    assert!(align_of::<Footer>() <= BLOCK_ALIGN);
    assert!(HEADER_SIZE % BLOCK_ALIGN == 0);
    assert!(FOOTER_SIZE % BLOCK_ALIGN == 0);
};

/// Handle of a hole in the index.
type Hole = NonNull<Header>;

/// Why a block failed validation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Corruption {
    #[error("pointer outside the heap")]
    OutOfHeap,
    #[error("header magic mismatch")]
    HeaderMagic,
    #[error("footer magic mismatch")]
    FooterMagic,
    #[error("footer does not point back at its header")]
    BackReference,
    #[error("block size out of bounds")]
    BadSize,
    #[error("hole missing from the index")]
    MissingIndexEntry,
    #[error("adjacent holes")]
    AdjacentHoles,
    #[error("index out of order")]
    UnsortedIndex,
}

/// Errors raised by the heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("heap exhausted: no room for {requested} bytes")]
    Exhausted { requested: usize },
    #[error("heap corruption at {address:#x}: {reason}")]
    Corrupted { address: usize, reason: Corruption },
    #[error("double free of {0:#x}")]
    DoubleFree(usize),
    #[error("heap index: {0}")]
    Index(#[from] OrderedArrayError),
    #[error("heap backing: {0}")]
    Backing(#[from] VmemError),
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(&'static str),
}

const fn corrupted(address: usize, reason: Corruption) -> HeapError {
    HeapError::Corrupted { address, reason }
}

/// Where the heap lives and how it may change.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapConfig {
    /// First byte of the region, page aligned. The hole index lives here.
    pub start: usize,
    /// Bytes mapped at creation, including the hole index.
    pub initial_size: usize,
    /// The heap never extends past this address.
    pub max: usize,
    /// Usable bytes the heap never shrinks below.
    pub min_size: usize,
    /// Number of holes the index can track.
    pub index_capacity: usize,
    /// Map heap pages for ring 0 only.
    pub supervisor_only: bool,
    /// Map heap pages read-only.
    pub read_only: bool,
}

impl HeapConfig {
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.initial_size
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            start: KERNEL_HEAP_START as usize,
            initial_size: KERNEL_HEAP_INITIAL_SIZE,
            max: KERNEL_HEAP_MAX as usize,
            min_size: KERNEL_HEAP_MIN_SIZE,
            index_capacity: KERNEL_HEAP_INDEX_CAPACITY,
            supervisor_only: false,
            read_only: false,
        }
    }
}

/// Maps and unmaps the pages behind the heap.
pub trait HeapBacking {
    /// Back the page at `address` with a frame.
    ///
    /// # Errors
    /// Whatever prevents the page from being mapped.
    fn map_page(&mut self, address: usize, kernel_only: bool, writable: bool)
    -> Result<(), HeapError>;

    /// Release the frame behind the page at `address`.
    fn unmap_page(&mut self, address: usize);
}

/// A block as seen by [`Heap::blocks`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    pub address: usize,
    pub size: usize,
    pub is_hole: bool,
}

/// The kernel heap.
pub struct Heap {
    index: OrderedArray<Hole>,
    start: usize,
    end: usize,
    max: usize,
    min_size: usize,
    supervisor_only: bool,
    read_only: bool,
}

// SAFETY: the heap exclusively owns its region.
unsafe impl Send for Heap {}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn hole_is_greater(a: &Hole, b: &Hole) -> bool {
    // SAFETY: the index only holds live hole headers.
    unsafe { (*a.as_ptr()).size > (*b.as_ptr()).size }
}

/// Write a header/footer pair for a block at `address`.
///
/// # Safety
/// `[address, address + size)` must lie inside the heap and be aligned to
/// [`BLOCK_ALIGN`], with `size >= OVERHEAD`.
unsafe fn write_block(address: usize, size: usize, is_hole: bool) -> Hole {
    debug_assert!(size >= OVERHEAD && address % BLOCK_ALIGN == 0);
    let header = address as *mut Header;
    let footer = (address + size - FOOTER_SIZE) as *mut Footer;
    unsafe {
        header.write(Header {
            magic: HEAP_HEADER_MAGIC,
            is_hole,
            size,
        });
        footer.write(Footer {
            magic: HEAP_FOOTER_MAGIC,
            header,
        });
        NonNull::new_unchecked(header)
    }
}

impl Heap {
    /// Build a heap over `[config.start, config.end())`.
    ///
    /// The hole index takes the front of the region; everything from the next
    /// page boundary on becomes one hole.
    ///
    /// # Errors
    /// [`HeapError::InvalidConfig`] if the region or the minimum size is
    /// misaligned, or the region is too small for the index plus one block.
    ///
    /// # Safety
    /// The initial region must be mapped, writable and used by nothing else.
    pub unsafe fn create(config: &HeapConfig) -> Result<Self, HeapError> {
        let end = config.end();
        if config.start % PAGE_SIZE != 0 || end % PAGE_SIZE != 0 {
            return Err(HeapError::InvalidConfig("heap bounds must be page aligned"));
        }
        if end > config.max {
            return Err(HeapError::InvalidConfig("initial heap exceeds its maximum"));
        }
        if config.min_size % PAGE_SIZE != 0 {
            return Err(HeapError::InvalidConfig("minimum heap size must be page aligned"));
        }

        let index_bytes = config
            .index_capacity
            .checked_mul(size_of::<Hole>())
            .ok_or(HeapError::InvalidConfig("hole index too large"))?;
        let first_block = align_up(config.start + index_bytes, PAGE_SIZE);
        if first_block + OVERHEAD > end {
            return Err(HeapError::InvalidConfig("heap too small for its hole index"));
        }

        let storage = NonNull::new(config.start as *mut Hole)
            .ok_or(HeapError::InvalidConfig("heap starts at address zero"))?;
        // SAFETY: the front of the region is reserved for the index.
        let index = unsafe { OrderedArray::place(storage, config.index_capacity, hole_is_greater) };

        let mut heap = Self {
            index,
            start: first_block,
            end,
            max: config.max,
            min_size: config.min_size,
            supervisor_only: config.supervisor_only,
            read_only: config.read_only,
        };

        // SAFETY: the block spans the mapped remainder of the region.
        let hole = unsafe { write_block(first_block, end - first_block, true) };
        heap.index.insert(hole)?;

        log::info!(
            "heap created at {first_block:#x}..{end:#x} (max {:#x}, index of {} holes)",
            config.max,
            config.index_capacity
        );
        Ok(heap)
    }

    /// Address of the first block.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// One past the last mapped byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Bytes currently spanned by blocks.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.end - self.start
    }

    /// Whether `address` falls inside the heap's blocks.
    #[inline]
    #[must_use]
    pub const fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end
    }

    /// `(address, size)` of every hole, smallest first.
    #[must_use]
    pub fn holes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.index.iter().map(|hole| {
            // SAFETY: the index only holds live hole headers.
            (hole.as_ptr() as usize, unsafe { (*hole.as_ptr()).size })
        })
    }

    /// Every block in address order.
    ///
    /// Stops early at a block whose size would leave the heap.
    #[must_use]
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mut address = self.start;
        core::iter::from_fn(move || {
            if address + HEADER_SIZE > self.end {
                return None;
            }
            // SAFETY: in bounds and aligned.
            let header = unsafe { (address as *const Header).read() };
            if header.size < OVERHEAD || header.size > self.end - address {
                return None;
            }
            let block = BlockInfo {
                address,
                size: header.size,
                is_hole: header.is_hole,
            };
            address += header.size;
            Some(block)
        })
    }

    /// Size of the payload at `ptr`, as handed out by [`alloc`](Self::alloc).
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] if `ptr` is not a live block.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let header = self.validate((ptr.as_ptr() as usize).wrapping_sub(HEADER_SIZE))?;
        Ok(header.size - OVERHEAD)
    }

    /// Allocate `size` bytes, with a page-aligned payload if `page_align`.
    ///
    /// Grows the heap once if no hole fits.
    ///
    /// # Errors
    /// - [`HeapError::Exhausted`] if nothing fits even after growing.
    /// - [`HeapError::Index`] if the hole index overflows.
    /// - [`HeapError::Backing`] if new pages could not be mapped.
    pub fn alloc<B: HeapBacking + ?Sized>(
        &mut self,
        size: usize,
        page_align: bool,
        backing: &mut B,
    ) -> Result<NonNull<u8>, HeapError> {
        let exhausted = HeapError::Exhausted { requested: size };
        let total = size
            .checked_add(OVERHEAD + BLOCK_ALIGN - 1)
            .map(|s| align_down(s, BLOCK_ALIGN))
            .ok_or(exhausted)?;

        for attempt in 0..2 {
            if let Some(position) = self.find_smallest_hole(total, page_align) {
                return self.carve(position, total, page_align);
            }
            if attempt == 0 {
                match self.grow_for(total, page_align, backing) {
                    Ok(()) => {}
                    Err(HeapError::Exhausted { .. }) => break,
                    Err(e) => return Err(e),
                }
            }
        }

        log::warn!("heap exhausted: no room for {size} bytes");
        Err(exhausted)
    }

    /// Return a block to the heap.
    ///
    /// A null pointer is ignored. Neighbouring holes are merged, and if the
    /// merged hole reaches the end of the heap, the heap shrinks.
    ///
    /// # Errors
    /// - [`HeapError::Corrupted`] if the block's metadata is damaged.
    /// - [`HeapError::DoubleFree`] if the block is already free.
    /// - [`HeapError::Index`] if the hole index overflows.
    pub fn free<B: HeapBacking + ?Sized>(
        &mut self,
        ptr: *mut u8,
        backing: &mut B,
    ) -> Result<(), HeapError> {
        if ptr.is_null() {
            return Ok(());
        }

        let address = (ptr as usize).wrapping_sub(HEADER_SIZE);
        let header = self.validate(address)?;
        if header.is_hole {
            return Err(HeapError::DoubleFree(ptr as usize));
        }

        let mut block = address;
        let mut size = header.size;

        if let Some(left) = self.hole_before(block)? {
            // SAFETY: validated hole header and the footer just before `block`.
            unsafe {
                let left_size = (*left.as_ptr()).size;
                Self::erase(block - FOOTER_SIZE, block);
                block = left.as_ptr() as usize;
                size += left_size;
            }
        }

        if let Some(right) = self.hole_at(block + size)? {
            // SAFETY: validated hole header; our footer sits right before it.
            unsafe {
                let right_size = (*right.as_ptr()).size;
                Self::erase(right.as_ptr() as usize - FOOTER_SIZE, right.as_ptr() as usize);
                size += right_size;
            }
        }

        // SAFETY: the merged range consists of whole blocks.
        unsafe { write_block(block, size, true) };

        if block + size == self.end {
            size = self.shrink_tail(block, backing);
            if size == 0 {
                return Ok(());
            }
            // SAFETY: the tail hole was cut to the new end.
            unsafe { write_block(block, size, true) };
        }

        // SAFETY: `block` is a valid hole header.
        self.index
            .insert(unsafe { NonNull::new_unchecked(block as *mut Header) })?;
        Ok(())
    }

    /// Grow the heap so it spans at least `new_size` bytes.
    ///
    /// Rounds up to whole pages and never shrinks. The new range is not yet
    /// part of any block.
    ///
    /// # Errors
    /// - [`HeapError::Exhausted`] if the heap would pass its maximum.
    /// - [`HeapError::Backing`] if a page could not be mapped. Pages mapped
    ///   by this call are released again and the heap keeps its size.
    pub fn expand<B: HeapBacking + ?Sized>(
        &mut self,
        new_size: usize,
        backing: &mut B,
    ) -> Result<(), HeapError> {
        let new_size = align_up(new_size, PAGE_SIZE);
        if new_size <= self.size() {
            return Ok(());
        }

        let new_end = self
            .start
            .checked_add(new_size)
            .filter(|end| *end <= self.max)
            .ok_or(HeapError::Exhausted {
                requested: new_size - self.size(),
            })?;

        let old_end = self.end;
        for page in (old_end..new_end).step_by(PAGE_SIZE) {
            if let Err(e) = backing.map_page(page, self.supervisor_only, !self.read_only) {
                for mapped in (old_end..page).step_by(PAGE_SIZE).rev() {
                    backing.unmap_page(mapped);
                }
                log::warn!("heap growth to {new_end:#x} failed at {page:#x}: {e}");
                return Err(e);
            }
        }
        self.end = new_end;

        log::debug!("heap grew to {:#x}..{:#x}", self.start, self.end);
        Ok(())
    }

    /// Shrink the heap towards `new_size` bytes.
    ///
    /// Rounds up to whole pages, never grows and never drops below the
    /// minimum size. Frames are released from the top down. The cut-off
    /// range must not hold any block. Returns the resulting size.
    pub fn contract<B: HeapBacking + ?Sized>(&mut self, new_size: usize, backing: &mut B) -> usize {
        let new_size = align_up(new_size, PAGE_SIZE).max(self.min_size);
        if new_size >= self.size() {
            return self.size();
        }

        let new_end = self.start + new_size;
        for page in (new_end..self.end).step_by(PAGE_SIZE).rev() {
            backing.unmap_page(page);
        }
        self.end = new_end;

        log::debug!("heap shrank to {:#x}..{:#x}", self.start, self.end);
        new_size
    }

    /// Walk every block and the index and verify all heap invariants.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] naming the first violation found.
    pub fn check(&self) -> Result<(), HeapError> {
        let mut address = self.start;
        let mut previous_hole = false;
        let mut holes = 0usize;

        while address < self.end {
            let header = self.validate(address)?;
            if header.is_hole {
                if previous_hole {
                    return Err(corrupted(address, Corruption::AdjacentHoles));
                }
                // SAFETY: validated header.
                let handle = unsafe { NonNull::new_unchecked(address as *mut Header) };
                if self.index.position(&handle).is_none() {
                    return Err(corrupted(address, Corruption::MissingIndexEntry));
                }
                holes += 1;
            }
            previous_hole = header.is_hole;
            address += header.size;
        }

        if holes != self.index.len() {
            return Err(corrupted(self.start, Corruption::MissingIndexEntry));
        }

        let mut previous = 0;
        for (address, size) in self.holes() {
            if size < previous {
                return Err(corrupted(address, Corruption::UnsortedIndex));
            }
            previous = size;
        }
        Ok(())
    }

    /// Bytes lost before the payload when a page-aligned block starts at the
    /// hole at `hole`. Zero, or large enough to hold a hole of its own.
    fn alignment_gap(hole: usize) -> usize {
        let payload = align_up(hole + HEADER_SIZE, PAGE_SIZE);
        let gap = payload - HEADER_SIZE - hole;
        if gap > 0 && gap < OVERHEAD {
            gap + PAGE_SIZE
        } else {
            gap
        }
    }

    fn find_smallest_hole(&self, total: usize, page_align: bool) -> Option<usize> {
        self.holes().position(|(address, size)| {
            let gap = if page_align {
                Self::alignment_gap(address)
            } else {
                0
            };
            size.checked_sub(gap).is_some_and(|usable| usable >= total)
        })
    }

    /// Turn (part of) the hole at index `position` into a used block.
    fn carve(
        &mut self,
        position: usize,
        total: usize,
        page_align: bool,
    ) -> Result<NonNull<u8>, HeapError> {
        let hole = self.index.lookup(position)?;
        let mut address = hole.as_ptr() as usize;
        let gap = if page_align {
            Self::alignment_gap(address)
        } else {
            0
        };
        // SAFETY: the index only holds live hole headers.
        let available = unsafe { (*hole.as_ptr()).size } - gap;

        let size = if available - total < OVERHEAD {
            available
        } else {
            total
        };

        // The hole is only touched once every split-off part fits the index.
        let added = usize::from(gap > 0) + usize::from(available > size);
        let capacity = self.index.capacity();
        if self.index.len() - 1 + added > capacity {
            return Err(OrderedArrayError::Full { capacity }.into());
        }

        self.index.remove(position)?;
        if gap > 0 {
            // SAFETY: the gap lies at the front of the hole.
            let leading = unsafe { write_block(address, gap, true) };
            self.index.insert(leading)?;
            address += gap;
        }

        // SAFETY: all within the original hole.
        unsafe { write_block(address, size, false) };
        if available > size {
            let trailing = unsafe { write_block(address + size, available - size, true) };
            self.index.insert(trailing)?;
        }

        // SAFETY: `address` is a non-null block header.
        Ok(unsafe { NonNull::new_unchecked((address + HEADER_SIZE) as *mut u8) })
    }

    /// Grow for a request of `total` block bytes and fold the new pages into
    /// the trailing hole, or a fresh one.
    fn grow_for<B: HeapBacking + ?Sized>(
        &mut self,
        total: usize,
        page_align: bool,
        backing: &mut B,
    ) -> Result<(), HeapError> {
        let old_end = self.end;
        let mut needed = total;
        if page_align {
            needed += PAGE_SIZE + OVERHEAD;
        }

        let requested = self
            .size()
            .checked_add(needed)
            .ok_or(HeapError::Exhausted { requested: total })?;

        let trailing = self
            .index
            .iter()
            // SAFETY: the index only holds live hole headers.
            .position(|hole| hole.as_ptr() as usize + unsafe { (*hole.as_ptr()).size } == old_end);
        let capacity = self.index.capacity();
        if trailing.is_none() && self.index.len() == capacity {
            return Err(OrderedArrayError::Full { capacity }.into());
        }

        self.expand(requested, backing)?;
        let added = self.end - old_end;

        match trailing {
            Some(position) => {
                let hole = self.index.remove(position)?;
                // SAFETY: the hole now extends over the freshly mapped pages.
                let hole = unsafe {
                    let size = (*hole.as_ptr()).size;
                    Self::erase(old_end - FOOTER_SIZE, old_end);
                    write_block(hole.as_ptr() as usize, size + added, true)
                };
                self.index.insert(hole)?;
            }
            None => {
                // SAFETY: the new pages belong to no block yet.
                let hole = unsafe { write_block(old_end, added, true) };
                self.index.insert(hole)?;
            }
        }
        Ok(())
    }

    /// Cut a tail hole at `block` back as far as the minimum size allows.
    ///
    /// Returns what is left of the hole, which may be zero.
    fn shrink_tail<B: HeapBacking + ?Sized>(&mut self, block: usize, backing: &mut B) -> usize {
        let offset = block - self.start;
        let mut request = offset;

        let target = align_up(offset, PAGE_SIZE).max(self.min_size);
        let remainder = target.saturating_sub(offset);
        if remainder > 0 && remainder < OVERHEAD {
            request = offset + OVERHEAD;
        }

        self.contract(request, backing);
        self.end - block
    }

    /// Read and validate the block header at `address`.
    fn validate(&self, address: usize) -> Result<Header, HeapError> {
        if !self.contains(address)
            || address % BLOCK_ALIGN != 0
            || address + HEADER_SIZE > self.end
        {
            return Err(corrupted(address, Corruption::OutOfHeap));
        }

        // SAFETY: in bounds and aligned.
        let header = unsafe { (address as *const Header).read() };
        if header.magic != HEAP_HEADER_MAGIC {
            return Err(corrupted(address, Corruption::HeaderMagic));
        }
        if header.size < OVERHEAD
            || header.size > self.end - address
            || header.size % BLOCK_ALIGN != 0
        {
            return Err(corrupted(address, Corruption::BadSize));
        }

        // SAFETY: in bounds and aligned, as the size was checked.
        let footer = unsafe { ((address + header.size - FOOTER_SIZE) as *const Footer).read() };
        if footer.magic != HEAP_FOOTER_MAGIC {
            return Err(corrupted(address, Corruption::FooterMagic));
        }
        if footer.header as usize != address {
            return Err(corrupted(address, Corruption::BackReference));
        }
        Ok(header)
    }

    /// The hole ending right before `block`, removed from the index.
    fn hole_before(&mut self, block: usize) -> Result<Option<Hole>, HeapError> {
        if block < self.start + OVERHEAD {
            return Ok(None);
        }

        // SAFETY: in bounds and aligned.
        let footer = unsafe { ((block - FOOTER_SIZE) as *const Footer).read() };
        if footer.magic != HEAP_FOOTER_MAGIC {
            return Ok(None);
        }
        let left = footer.header as usize;
        match self.validate(left) {
            Ok(header) if header.is_hole && left + header.size == block => {
                self.take_hole(left).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// The hole starting at `address`, removed from the index.
    fn hole_at(&mut self, address: usize) -> Result<Option<Hole>, HeapError> {
        if address + HEADER_SIZE > self.end {
            return Ok(None);
        }
        match self.validate(address) {
            Ok(header) if header.is_hole => self.take_hole(address).map(Some),
            _ => Ok(None),
        }
    }

    fn take_hole(&mut self, address: usize) -> Result<Hole, HeapError> {
        // SAFETY: callers pass validated, non-null headers.
        let handle = unsafe { NonNull::new_unchecked(address as *mut Header) };
        let position = self
            .index
            .position(&handle)
            .ok_or(corrupted(address, Corruption::MissingIndexEntry))?;
        Ok(self.index.remove(position)?)
    }

    /// Clear the magic of the footer at `footer` and the header at `header`
    /// once they end up inside a merged block.
    unsafe fn erase(footer: usize, header: usize) {
        unsafe {
            (*(footer as *mut Footer)).magic = 0;
            (*(header as *mut Header)).magic = 0;
        }
    }
}
