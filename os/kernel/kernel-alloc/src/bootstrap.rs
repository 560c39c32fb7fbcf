//! Placement ("bump") allocator used before the kernel heap exists.
//!
//! Memory is handed out from a monotonically increasing pointer and is never
//! returned. On the target the region is identity mapped, so the physical
//! address of an allocation is its address; under test the window is a host
//! buffer with a made-up physical base.

use crate::ByteAlloc;
use core::alloc::Layout;
use core::ptr::NonNull;
use kernel_memory_addresses::{PhysicalAddress, align_up};
use kernel_vmem::info::PAGE_SIZE;
use kernel_vmem::{TableAlloc, VmemError};

/// Errors raised by the placement allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PlacementError {
    #[error("placement region exhausted: {requested} bytes requested, {available} left")]
    OutOfSpace { requested: usize, available: usize },
    #[error("placement address {0:#x} has no 32-bit physical address")]
    NotPhysical(usize),
}

/// The result of a placement allocation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Placement {
    pub address: usize,
    pub physical: Option<PhysicalAddress>,
}

/// Bump allocator over `[next, end)`.
#[derive(Debug)]
pub struct PlacementAlloc {
    next: usize,
    end: usize,
    base: usize,
    physical_base: u32,
}

impl PlacementAlloc {
    /// Allocate from `start` upwards in identity-mapped memory.
    #[must_use]
    pub const fn identity(start: usize, end: usize) -> Self {
        Self {
            next: start,
            end,
            base: 0,
            physical_base: 0,
        }
    }

    /// Allocate from `[start, end)`, where `start` lives at `physical_start`.
    #[must_use]
    pub const fn with_physical_window(start: usize, end: usize, physical_start: u32) -> Self {
        Self {
            next: start,
            end,
            base: start,
            physical_base: physical_start,
        }
    }

    /// The next address that would be handed out, before alignment.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> usize {
        self.next
    }

    /// Physical address of a native address inside the placement window.
    ///
    /// # Errors
    /// [`PlacementError::NotPhysical`] if it does not fit 32 bits.
    pub fn physical_of(&self, address: usize) -> Result<PhysicalAddress, PlacementError> {
        address
            .checked_sub(self.base)
            .and_then(|offset| u32::try_from(offset).ok())
            .and_then(|offset| self.physical_base.checked_add(offset))
            .map(PhysicalAddress::new)
            .ok_or(PlacementError::NotPhysical(address))
    }

    /// Hand out `size` bytes, page aligned if `align_to_page` is set.
    ///
    /// The physical address is resolved only when `want_physical` is set.
    ///
    /// # Errors
    /// - [`PlacementError::OutOfSpace`] when the region is used up.
    /// - [`PlacementError::NotPhysical`] if the physical address does not fit.
    pub fn allocate(
        &mut self,
        size: usize,
        align_to_page: bool,
        want_physical: bool,
    ) -> Result<Placement, PlacementError> {
        let align = if align_to_page { PAGE_SIZE } else { 1 };
        self.allocate_aligned(size, align, want_physical)
    }

    fn allocate_aligned(
        &mut self,
        size: usize,
        align: usize,
        want_physical: bool,
    ) -> Result<Placement, PlacementError> {
        let address = align_up(self.next, align);
        let available = self.end.saturating_sub(address);
        if size > available {
            return Err(PlacementError::OutOfSpace {
                requested: size,
                available,
            });
        }

        let physical = if want_physical {
            Some(self.physical_of(address)?)
        } else {
            None
        };

        self.next = address + size;
        Ok(Placement { address, physical })
    }
}

impl ByteAlloc for PlacementAlloc {
    fn allocate_bytes(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let placement = self
            .allocate_aligned(layout.size(), layout.align(), false)
            .ok()?;
        NonNull::new(placement.address as *mut u8)
    }
}

impl TableAlloc for PlacementAlloc {
    fn alloc_zeroed_pages(
        &mut self,
        size: usize,
    ) -> Result<(NonNull<u8>, PhysicalAddress), VmemError> {
        let placement = self
            .allocate(size, true, true)
            .map_err(|_| VmemError::TableAllocation(size))?;
        let physical = placement
            .physical
            .ok_or(VmemError::TableAllocation(size))?;
        let ptr = NonNull::new(placement.address as *mut u8)
            .ok_or(VmemError::TableAllocation(size))?;

        // SAFETY: the range was just handed out and belongs to nobody else.
        unsafe { ptr.write_bytes(0, size) };
        Ok((ptr, physical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Arena;

    #[test]
    fn bumps_and_aligns() {
        let mut placement = PlacementAlloc::identity(0x0010_0010, 0x0020_0000);

        let a = placement.allocate(0x20, false, false).unwrap();
        assert_eq!(a.address, 0x0010_0010);
        assert_eq!(a.physical, None);

        let b = placement.allocate(0x1000, true, true).unwrap();
        assert_eq!(b.address, 0x0010_1000);
        assert_eq!(b.physical, Some(PhysicalAddress::new(0x0010_1000)));
        assert_eq!(placement.current(), 0x0010_2000);

        // already aligned stays put
        let c = placement.allocate(8, true, false).unwrap();
        assert_eq!(c.address, 0x0010_2000);
    }

    #[test]
    fn reports_exhaustion() {
        let mut placement = PlacementAlloc::identity(0x1000, 0x3000);
        placement.allocate(0x1800, false, false).unwrap();
        assert_eq!(
            placement.allocate(0x1000, true, false),
            Err(PlacementError::OutOfSpace {
                requested: 0x1000,
                available: 0
            })
        );
        // a failed request does not move the pointer
        assert_eq!(placement.current(), 0x2800);
    }

    #[test]
    fn hands_out_zeroed_tables_with_window_physical_addresses() {
        let mut arena = Arena::new(4);
        arena.fill(0xAA);
        let mut placement =
            PlacementAlloc::with_physical_window(arena.start(), arena.end(), 0x0040_0000);

        placement.allocate(3, false, false).unwrap();
        let (ptr, physical) = placement.alloc_zeroed_pages(PAGE_SIZE).unwrap();

        assert_eq!(ptr.as_ptr() as usize, arena.start() + PAGE_SIZE);
        assert_eq!(physical, PhysicalAddress::new(0x0040_1000));
        assert!(arena.bytes()[PAGE_SIZE..2 * PAGE_SIZE].iter().all(|b| *b == 0));
        assert_eq!(arena.bytes()[3], 0xAA);
    }
}
